use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::Url;
use tracing::debug;

use super::{IdentityProviderClient, SessionLookup, UpstreamClient, UpstreamError, UpstreamSession};
use crate::config::Config;

const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Identity-provider client over its public HTTP API.
///
/// A token containing `=` is treated as a full cookie string
/// (`name=value`) and sent as the `Cookie` header; anything else is a bare
/// session token and goes in `X-Session-Token`.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    base: Url,
    client: reqwest::Client,
    description: String,
    debug: bool,
}

fn base_url(raw: &str) -> Result<Url, UpstreamError> {
    let trimmed = raw.trim().trim_end_matches('/');
    Url::parse(&format!("{trimmed}/")).map_err(|_| UpstreamError::InvalidAddress(raw.to_string()))
}

impl HttpIdentityProvider {
    pub fn new(config: &Config, timeout: Duration) -> Result<Self, UpstreamError> {
        let base = base_url(&config.identity_provider_url)?;

        let mut headers = HeaderMap::new();
        for (k, v) in &config.identity_provider_headers {
            let name = HeaderName::from_bytes(k.as_bytes()).map_err(|_| UpstreamError::InvalidHeader(k.clone()))?;
            let value = HeaderValue::from_str(v).map_err(|_| UpstreamError::InvalidHeader(k.clone()))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder().timeout(timeout).default_headers(headers);
        if let Some(ua) = config.identity_provider_user_agent.as_deref() {
            builder = builder.user_agent(ua);
        }
        let client = builder.build()?;

        debug!(url = %base, description = %config.identity_provider_description, "identity provider client built");
        Ok(Self {
            base,
            client,
            description: config.identity_provider_description.clone(),
            debug: config.identity_provider_debug,
        })
    }

    /// Whether every request and its response status is logged.
    pub fn debug_enabled(&self) -> bool { self.debug }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base.join(path).map_err(|_| UpstreamError::InvalidAddress(format!("{}{}", self.base, path)))
    }
}

#[async_trait]
impl UpstreamClient for HttpIdentityProvider {
    fn name(&self) -> &'static str { "identity_provider" }

    async fn close(&self) {
        // reqwest pools connections per client; dropping the last handle releases them.
        debug!(url = %self.base, "identity provider client closed");
    }
}

#[async_trait]
impl IdentityProviderClient for HttpIdentityProvider {
    async fn to_session(&self, token: &str) -> Result<SessionLookup, UpstreamError> {
        let url = self.endpoint("sessions/whoami")?;
        let req = self.client.get(url.clone());
        let req = if token.contains('=') { req.header(COOKIE, token) } else { req.header(SESSION_TOKEN_HEADER, token) };

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if self.debug {
            debug!(idp = %self.description, url = %url, status, "identity provider whoami");
        }
        if status != 200 {
            return Ok(SessionLookup { status, session: None });
        }
        let session: UpstreamSession = resp.json().await.map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(SessionLookup { status, session: Some(session) })
    }

    async fn is_alive(&self) -> Result<u16, UpstreamError> {
        let url = self.endpoint("health/alive")?;
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status().as_u16();
        if self.debug {
            debug!(idp = %self.description, url = %url, status, "identity provider liveness");
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_path_prefix() {
        let u = base_url("http://idp.local/kratos").unwrap();
        assert_eq!(u.join("sessions/whoami").unwrap().as_str(), "http://idp.local/kratos/sessions/whoami");
        let u = base_url("http://idp.local:4433/").unwrap();
        assert_eq!(u.join("health/alive").unwrap().as_str(), "http://idp.local:4433/health/alive");
        assert!(matches!(base_url("not a url"), Err(UpstreamError::InvalidAddress(_))));
    }

    #[test]
    fn debug_flag_reaches_the_built_client() {
        let mut cfg = Config::new("keto:4466", "http://idp.local", "idp");
        assert!(!HttpIdentityProvider::new(&cfg, Duration::from_secs(1)).unwrap().debug_enabled());
        cfg.identity_provider_debug = true;
        assert!(HttpIdentityProvider::new(&cfg, Duration::from_secs(1)).unwrap().debug_enabled());
    }

    #[test]
    fn rejects_bad_default_headers() {
        let mut cfg = Config::new("keto:4466", "http://idp.local", "idp");
        cfg.identity_provider_headers.insert("bad header".into(), "v".into());
        let err = HttpIdentityProvider::new(&cfg, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidHeader(h) if h == "bad header"));
    }
}
