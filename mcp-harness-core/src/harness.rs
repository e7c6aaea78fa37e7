//! Shared state behind the MCP tools: configuration, the browser driver and
//! access to persisted runs.

use crate::capture::artifacts::RunLayout;
use crate::config::HarnessConfig;
use crate::driver::cdp::CdpDriver;
use crate::driver::BrowserDriver;
use crate::error::{HarnessError, Result};
use crate::model::{RunStatus, TestRunResult};
use crate::report::generate_html_report;
use crate::runner::{RunOptions, TestRunner};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Longest accepted run id; a UUID is 36.
const MAX_RUN_ID_LEN: usize = 64;

/// A run found under the artifacts directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListing {
    pub run_id: String,
    /// `None` when `summary.json` is missing or unreadable.
    pub status: Option<RunStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub total: Option<usize>,
}

pub struct Harness {
    config: HarnessConfig,
    driver: Arc<dyn BrowserDriver>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        let driver = Arc::new(CdpDriver::new(config.browser_path.clone()));
        Self::with_driver(config, driver)
    }

    pub fn with_driver(config: HarnessConfig, driver: Arc<dyn BrowserDriver>) -> Self {
        Self { config, driver }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run once with a fresh [`TestRunner`].
    pub async fn run(&self, options: RunOptions) -> TestRunResult {
        TestRunner::new(&self.config.artifacts_dir, self.driver.clone())
            .run_tests(options)
            .await
    }

    /// Directory of `run_id`, rejecting anything that is not a plain name.
    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if !is_valid_run_id(run_id) {
            return Err(HarnessError::InvalidRunId(run_id.to_string()));
        }
        Ok(self.config.artifacts_dir.join(run_id))
    }

    pub async fn load_summary(&self, run_id: &str) -> Result<TestRunResult> {
        let path = RunLayout::at(self.run_dir(run_id)?).summary_path();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| HarnessError::io(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All runs, newest first. Runs without a readable summary sort last.
    pub async fn list_runs(&self) -> Result<Vec<RunListing>> {
        let base = &self.config.artifacts_dir;
        let mut entries = match tokio::fs::read_dir(base).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HarnessError::io(base, e)),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarnessError::io(base, e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_dir || !is_valid_run_id(&name) {
                continue;
            }
            let listing = match self.load_summary(&name).await {
                Ok(summary) => RunListing {
                    run_id: name,
                    status: Some(summary.status),
                    start_time: Some(summary.start_time),
                    total: Some(summary.summary.total),
                },
                Err(e) => {
                    tracing::debug!(run_id = %name, error = %e, "Run has no readable summary");
                    RunListing {
                        run_id: name,
                        status: None,
                        start_time: None,
                        total: None,
                    }
                }
            };
            runs.push(listing);
        }

        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(runs)
    }

    /// Re-render `reports/report.html` from the persisted summary.
    pub async fn regenerate_report(&self, run_id: &str) -> Result<PathBuf> {
        let summary = self.load_summary(run_id).await?;
        generate_html_report(&self.run_dir(run_id)?, &summary).await
    }
}

pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= MAX_RUN_ID_LEN
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
