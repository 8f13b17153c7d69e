//!
//! bridge-login
//! ------------
//! Logs in against a running identity-bridge and prints the issued policies.

use anyhow::{Context, Result};
use std::env;

use identity_bridge::client::BridgeLogin;

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("bridge-login\n\nUSAGE:\n  bridge-login --namespace NS --object OBJ --relation REL [--address URL] [--token TOKEN]\n\nOPTIONS:\n  --address URL    Bridge address (env: BRIDGE_ADDR, default http://127.0.0.1:8210)\n  --token TOKEN    Session token or cookie (env: BRIDGE_SESSION_TOKEN)\n");
        return Ok(());
    }

    let address = arg_value(&args, "--address")
        .or_else(|| env::var("BRIDGE_ADDR").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8210".to_string());
    let token = arg_value(&args, "--token").or_else(|| env::var("BRIDGE_SESSION_TOKEN").ok()).unwrap_or_default();
    let namespace = arg_value(&args, "--namespace").unwrap_or_default();
    let object = arg_value(&args, "--object").unwrap_or_default();
    let relation = arg_value(&args, "--relation").unwrap_or_default();

    let login = BridgeLogin::new(&address, &namespace, &object, &relation, &token)
        .context("failed to build login request")?;
    let auth = login.login().await.context("failed to log in")?;

    println!("Policies: {:?}", auth.policies);
    println!("TTL: {}s (max {}s)", auth.ttl, auth.max_ttl);
    for (k, v) in &auth.metadata {
        println!("{k}: {v}");
    }
    Ok(())
}
