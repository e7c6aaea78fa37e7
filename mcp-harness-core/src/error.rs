//! Error type shared by the harness core.

use std::path::PathBuf;

/// Errors raised below the `run_tests` boundary.
///
/// The orchestrator converts every one of these into a `TestResult` error or a
/// failed run, so nothing here ever reaches the caller of `run_tests`.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("{action} timed out after {ms}ms")]
    Timeout { action: String, ms: u64 },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Invalid test file {}: {reason}", path.display())]
    TestFile { path: PathBuf, reason: String },

    #[error("Unsupported browser: {0}")]
    UnsupportedBrowser(String),

    #[error("Invalid run id '{0}'")]
    InvalidRunId(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn browser(message: impl std::fmt::Display) -> Self {
        Self::Browser(message.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Render the `source()` chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = format!("HarnessError: {}", self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\n    caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
