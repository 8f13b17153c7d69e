use serde::{Deserialize, Serialize};

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Commit the binary was built from, when `BRIDGE_GIT_COMMIT` was set at build time.
pub const GIT_COMMIT: Option<&str> = option_env!("BRIDGE_GIT_COMMIT");

pub fn running_version() -> String {
    format!("v{VERSION}")
}

pub fn human_version() -> String {
    match GIT_COMMIT {
        Some(commit) if !commit.is_empty() => format!("{NAME} {} ({commit})", running_version()),
        _ => format!("{NAME} {}", running_version()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            name: NAME.to_string(),
            version: running_version(),
            commit: GIT_COMMIT.filter(|c| !c.is_empty()).map(str::to_string),
        }
    }
}
