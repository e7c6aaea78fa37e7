//! Run data model: results, captured logs and screenshots.
//!
//! Everything here serialises to the camelCase JSON persisted as
//! `summary.json`.

use crate::error::HarnessError;
use crate::performance::PerformanceMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Header map as captured from the browser.
pub type Headers = BTreeMap<String, String>;

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Passed,
    Failed,
    Timedout,
    /// Reserved for callers that build test files before running them.
    BuildFailed,
}

impl RunStatus {
    /// Derive the run status from its test results.
    ///
    /// Any timed-out test wins over failures, and an empty run is a failure.
    pub fn derive(tests: &[TestResult]) -> Self {
        if tests.is_empty() {
            return Self::Failed;
        }
        if tests.iter().any(|t| t.status == TestStatus::Timedout) {
            Self::Timedout
        } else if tests.iter().any(|t| t.status == TestStatus::Failed) {
            Self::Failed
        } else {
            Self::Passed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Timedout => "timedout",
            Self::BuildFailed => "build-failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Timedout,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Timedout => "timedout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&HarnessError> for TestError {
    fn from(err: &HarnessError) -> Self {
        Self {
            message: err.to_string(),
            stack: Some(err.chain()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestArtifacts {
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
}

/// Outcome of one logical test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub file: String,
    pub status: TestStatus,
    /// Milliseconds.
    pub duration: u64,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(default)]
    pub artifacts: TestArtifacts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
    Info,
    Debug,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLog {
    #[serde(rename = "type")]
    pub level: ConsoleLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Phase timings of a response in milliseconds; `0` when not reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTiming {
    pub dns: f64,
    pub connect: f64,
    pub ssl: f64,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

impl ResponseTiming {
    pub fn total(&self) -> f64 {
        self.dns + self.connect + self.send + self.wait + self.receive
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    /// `Some(Value::Null)` records a body that could not be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub timing: ResponseTiming,
}

/// One observed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLog {
    pub id: String,
    /// Backend request id used for correlation.
    #[serde(default)]
    pub request_id: String,
    pub request: RequestRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Sum of test durations in milliseconds, not the run's wall clock.
    pub duration: u64,
}

impl RunSummary {
    pub fn from_tests(tests: &[TestResult]) -> Self {
        let count = |status: TestStatus| tests.iter().filter(|t| t.status == status).count();
        Self {
            total: tests.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed) + count(TestStatus::Timedout),
            skipped: count(TestStatus::Skipped),
            duration: tests.iter().map(|t| t.duration).sum(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub har_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

/// The complete, serialisable result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tests: Vec<TestResult>,
    pub summary: RunSummary,
    pub console_logs: Vec<ConsoleLog>,
    pub network_logs: Vec<NetworkLog>,
    pub screenshots: Vec<Screenshot>,
    pub performance_metrics: PerformanceMetrics,
    pub artifacts: RunArtifacts,
}
