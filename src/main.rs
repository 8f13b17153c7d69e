//!
//! identity-bridge server binary
//! -----------------------------
//! Starts the HTTP server. Settings come from CLI flags, then environment
//! variables, then defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use identity_bridge::server::{self, ServerSettings, DEFAULT_HTTP_PORT, DEFAULT_UPSTREAM_TIMEOUT_MS};
use identity_bridge::version;

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    arg_value(args, flag).and_then(|v| v.parse::<T>().ok())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}\n\nUSAGE:\n  identity-bridge [--http-port N] [--data-dir PATH] [--upstream-timeout-ms N]\n\nOPTIONS:\n  --http-port N              HTTP API port (env: BRIDGE_HTTP_PORT, default {DEFAULT_HTTP_PORT})\n  --data-dir PATH            Directory for stored configuration (env: BRIDGE_DATA_DIR, default in-memory)\n  --upstream-timeout-ms N    Deadline for upstream calls per request (env: BRIDGE_UPSTREAM_TIMEOUT_MS, default {DEFAULT_UPSTREAM_TIMEOUT_MS})\n", version::human_version());
        return Ok(());
    }

    let http_port = parse_arg::<u16>(&args, "--http-port")
        .or_else(|| parse_env("BRIDGE_HTTP_PORT"))
        .unwrap_or(DEFAULT_HTTP_PORT);
    let data_dir = arg_value(&args, "--data-dir")
        .map(str::to_string)
        .or_else(|| env::var("BRIDGE_DATA_DIR").ok())
        .filter(|d| !d.is_empty())
        .map(PathBuf::from);
    let timeout_ms = parse_arg::<u64>(&args, "--upstream-timeout-ms")
        .or_else(|| parse_env("BRIDGE_UPSTREAM_TIMEOUT_MS"))
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS);

    info!(
        target: "startup",
        "{} starting: http_port={}, data_dir={:?}, upstream_timeout_ms={}",
        version::human_version(), http_port, data_dir, timeout_ms
    );

    server::run(ServerSettings { http_port, data_dir, upstream_timeout: Duration::from_millis(timeout_ms) }).await
}
