//! On-disk layout of a run and the artifact writers that fill it.
//!
//! Every writer here is callable on its own, outside a full run.

use crate::driver::Page;
use crate::error::{HarnessError, Result};
use crate::model::{ConsoleLog, NetworkLog, Screenshot};
use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Subdirectories created under every run directory.
pub const RUN_SUBDIRS: [&str; 6] = [
    "screenshots",
    "videos",
    "traces",
    "logs",
    "reports",
    "coverage",
];

/// Paths of one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(base_dir: impl AsRef<Path>, run_id: &str) -> Self {
        Self::at(base_dir.as_ref().join(run_id))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join("screenshots")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("videos")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn trace_archive(&self) -> PathBuf {
        self.root.join("traces").join("trace.zip")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    pub fn console_log_path(&self) -> PathBuf {
        self.logs_dir().join("console.json")
    }

    pub fn network_log_path(&self) -> PathBuf {
        self.logs_dir().join("network.json")
    }

    pub fn har_path(&self) -> PathBuf {
        self.logs_dir().join("network.har")
    }

    pub fn report_path(&self) -> PathBuf {
        self.reports_dir().join("report.html")
    }

    /// Create the run directory and all of its subdirectories.
    pub async fn create(&self) -> Result<()> {
        for sub in RUN_SUBDIRS {
            create_dir(&self.root.join(sub)).await?;
        }
        Ok(())
    }
}

pub(crate) async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| HarnessError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Lowercase and replace everything outside `[a-z0-9-]` with `-`.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn file_stamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// Write pretty JSON to `path`, creating its parent first.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent).await?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| HarnessError::io(path, e))
}

/// Take a full-page PNG into `screenshots/` and return it with a base64 data
/// URI of the written file.
pub async fn capture_screenshot(
    page: &dyn Page,
    name: &str,
    run_dir: &Path,
    action: Option<&str>,
) -> Result<Screenshot> {
    let dir = RunLayout::at(run_dir).screenshots_dir();
    create_dir(&dir).await?;

    let sanitized = sanitize_name(name);
    let path = dir.join(format!("{}-{}.png", sanitized, file_stamp()));

    let png = page.screenshot(true).await?;
    tokio::fs::write(&path, &png)
        .await
        .map_err(|e| HarnessError::io(&path, e))?;

    let written = tokio::fs::read(&path)
        .await
        .map_err(|e| HarnessError::io(&path, e))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(written);

    tracing::debug!(path = %path.display(), "Screenshot captured");

    Ok(Screenshot {
        name: sanitized,
        path: std::path::absolute(&path).unwrap_or(path),
        base64: Some(format!("data:image/png;base64,{}", encoded)),
        timestamp: Utc::now(),
        action: action.map(str::to_string),
    })
}

/// Save the live DOM as HTML under `logs/`.
pub async fn capture_dom_snapshot(
    page: &dyn Page,
    run_dir: &Path,
    name: Option<&str>,
) -> Result<PathBuf> {
    let dir = RunLayout::at(run_dir).logs_dir();
    create_dir(&dir).await?;

    let base = name.map(sanitize_name).unwrap_or_else(|| "dom".to_string());
    let path = dir.join(format!("{}-{}.html", base, file_stamp()));

    let html = page.content().await?;
    tokio::fs::write(&path, html)
        .await
        .map_err(|e| HarnessError::io(&path, e))?;
    Ok(path)
}

pub async fn save_console_logs(run_dir: &Path, logs: &[ConsoleLog]) -> Result<PathBuf> {
    let path = RunLayout::at(run_dir).console_log_path();
    write_json(&path, logs).await?;
    Ok(path)
}

pub async fn save_network_logs(run_dir: &Path, logs: &[NetworkLog]) -> Result<PathBuf> {
    let path = RunLayout::at(run_dir).network_log_path();
    write_json(&path, logs).await?;
    Ok(path)
}
