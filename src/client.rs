//! Caller-side login helper: posts a login request to a running bridge.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde_json::{json, Value};

use crate::login::{AuthResponse, LoginResponse};

#[derive(Clone)]
pub struct BridgeLogin {
    address: Url,
    namespace: String,
    object: String,
    relation: String,
    session_token: String,
    client: reqwest::Client,
}

impl BridgeLogin {
    /// `session_token` is either the raw token or a full cookie such as
    /// `ory_kratos_session=<value>`.
    pub fn new(address: &str, namespace: &str, object: &str, relation: &str, session_token: &str) -> Result<Self> {
        for (value, what) in [
            (address, "bridge address"),
            (namespace, "namespace"),
            (object, "object"),
            (relation, "relation"),
            (session_token, "session token"),
        ] {
            if value.is_empty() {
                bail!("no {what} provided");
            }
        }
        let address = Url::parse(address).context("invalid bridge address")?;
        Ok(Self {
            address,
            namespace: namespace.to_string(),
            object: object.to_string(),
            relation: relation.to_string(),
            session_token: session_token.to_string(),
            client: reqwest::Client::new(),
        })
    }

    pub async fn login(&self) -> Result<AuthResponse> {
        let url = self.address.join("/login")?;
        let resp = self
            .client
            .post(url)
            .json(&json!({
                "session_token": self.session_token,
                "namespace": self.namespace,
                "object": self.object,
                "relation": self.relation,
            }))
            .send()
            .await
            .context("unable to log in with the identity bridge")?;
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(json!({}));
            let code = body.get("code").and_then(|v| v.as_str()).unwrap_or("unknown");
            let msg = body.get("error").and_then(|v| v.as_str()).unwrap_or("");
            return Err(anyhow!("login failed: HTTP {} {}: {}", status.as_u16(), code, msg));
        }
        let body: LoginResponse = resp.json().await.context("could not decode login response")?;
        Ok(body.auth)
    }
}
