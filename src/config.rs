use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_LOG_FILTER: &str = "campusd=info";

/// Process configuration, read once at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,

    /// How long SQLite waits on a locked database before failing a write.
    pub busy_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Environment:
    ///
    /// - `CAMPUSD_WORKSPACE`: workspace directory to open on start-up
    /// - `CAMPUSD_BUSY_TIMEOUT_MS`: SQLite busy timeout (default 5000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let workspace = get("CAMPUSD_WORKSPACE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let busy_timeout_ms = match get("CAMPUSD_BUSY_TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse()
                .context("CAMPUSD_BUSY_TIMEOUT_MS must be a non-negative integer")?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        Ok(Config {
            workspace,
            busy_timeout_ms,
        })
    }
}
