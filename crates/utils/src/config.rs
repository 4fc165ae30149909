use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Single opaque configuration record driving engine behavior (§6).
///
/// Loaded once at startup and threaded explicitly through the `LocalDeployment` —
/// no ambient globals (§9 Design Notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChkdConfig {
    pub data_dir: PathBuf,
    pub default_branch: String,
    pub heartbeat_threshold_ms: u64,
    pub heartbeat_sweep_ms: u64,
    pub git_concurrency: usize,
    pub merge_lock_timeout_ms: u64,
}

impl Default for ChkdConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_branch: "main".to_string(),
            heartbeat_threshold_ms: 120_000,
            heartbeat_sweep_ms: 15_000,
            git_concurrency: 4,
            merge_lock_timeout_ms: 30_000,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chkd")
}

impl ChkdConfig {
    /// Overlays `CHKD_*` environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CHKD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(branch) = std::env::var("CHKD_DEFAULT_BRANCH") {
            config.default_branch = branch;
        }
        if let Some(v) = env_u64("CHKD_HEARTBEAT_THRESHOLD_MS") {
            config.heartbeat_threshold_ms = v;
        }
        if let Some(v) = env_u64("CHKD_HEARTBEAT_SWEEP_MS") {
            config.heartbeat_sweep_ms = v;
        }
        if let Some(v) = env_u64("CHKD_GIT_CONCURRENCY") {
            config.git_concurrency = v as usize;
        }
        if let Some(v) = env_u64("CHKD_MERGE_LOCK_TIMEOUT_MS") {
            config.merge_lock_timeout_ms = v;
        }

        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = ChkdConfig::default();
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.heartbeat_threshold_ms, 120_000);
        assert_eq!(config.heartbeat_sweep_ms, 15_000);
        assert_eq!(config.git_concurrency, 4);
        assert_eq!(config.merge_lock_timeout_ms, 30_000);
    }
}
