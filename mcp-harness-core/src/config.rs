//! Harness configuration.

use crate::runner::DEFAULT_NAVIGATION_TIMEOUT_MS;
use std::path::PathBuf;

/// Environment variable overriding the artifacts directory.
pub const ARTIFACTS_DIR_ENV: &str = "HARNESS_ARTIFACTS_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Base directory; every run gets `<artifacts_dir>/<run_id>`.
    pub artifacts_dir: PathBuf,
    /// Explicit browser binary, overriding engine lookup.
    pub browser_path: Option<PathBuf>,
    pub navigation_timeout_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("test-artifacts"),
            browser_path: None,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }
}

impl HarnessConfig {
    /// Resolve the artifacts directory from the environment.
    ///
    /// Priority:
    /// 1. `HARNESS_ARTIFACTS_DIR` env var
    /// 2. OS-specific data directory
    /// 3. `./test-artifacts`
    pub fn from_env() -> Self {
        Self {
            artifacts_dir: resolve_artifacts_dir(std::env::var(ARTIFACTS_DIR_ENV).ok()),
            ..Self::default()
        }
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    pub fn with_browser_path(mut self, path: Option<PathBuf>) -> Self {
        self.browser_path = path;
        self
    }
}

fn resolve_artifacts_dir(env_value: Option<String>) -> PathBuf {
    if let Some(dir) = env_value.filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }

    directories::ProjectDirs::from("com", "openclaw", "mcp-harness-server")
        .map(|dirs| dirs.data_dir().join("artifacts"))
        .unwrap_or_else(|| PathBuf::from("test-artifacts"))
}
