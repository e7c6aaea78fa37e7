//! Test run orchestration.
//!
//! One [`TestRunner`] drives exactly one run: it creates the run directory,
//! launches the browser, attaches capture, executes the tests, collects
//! metrics, persists every artifact and tears the browser down again. The
//! returned [`TestRunResult`] is the only way failures surface.

use crate::capture::artifacts::{
    capture_dom_snapshot, capture_screenshot, save_console_logs, save_network_logs, write_json,
    RunLayout,
};
use crate::capture::sink::{DiagnosticSink, TracingSink};
use crate::capture::CaptureSession;
use crate::driver::{
    Browser, BrowserContext, BrowserDriver, BrowserKind, ContextOptions, LaunchOptions, Page,
    WaitUntil,
};
use crate::error::{HarnessError, Result};
use crate::har::save_har;
use crate::model::{
    RunArtifacts, RunStatus, RunSummary, TestArtifacts, TestError, TestResult, TestRunResult,
    TestStatus,
};
use crate::performance::{self, PerformanceMetrics};
use crate::redact::redact_network_logs;
use crate::report::generate_html_report;
use crate::testfile::{run_test_files, CaseEnv};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const BASIC_TEST_NAME: &str = "Basic Page Load Test";
pub const EXECUTION_FAILURE_NAME: &str = "Test Execution";
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

fn enabled() -> bool {
    true
}

fn default_navigation_timeout() -> u64 {
    DEFAULT_NAVIGATION_TIMEOUT_MS
}

/// Options for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    pub url: String,
    #[serde(default)]
    pub browser: BrowserKind,
    #[serde(default = "enabled")]
    pub headless: bool,
    #[serde(default = "enabled")]
    pub video: bool,
    #[serde(default = "enabled")]
    pub trace: bool,
    #[serde(default)]
    pub har: bool,
    #[serde(default)]
    pub test_files: Vec<PathBuf>,
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,
}

impl RunOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            browser: BrowserKind::default(),
            headless: true,
            video: true,
            trace: true,
            har: false,
            test_files: Vec::new(),
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }
}

/// Browser resources owned by a run, released in reverse order.
#[derive(Default)]
struct Session {
    browser: Option<Box<dyn Browser>>,
    context: Option<Box<dyn BrowserContext>>,
    page: Option<Arc<dyn Page>>,
    capture: Option<CaptureSession>,
}

pub struct TestRunner {
    run_id: String,
    layout: RunLayout,
    driver: Arc<dyn BrowserDriver>,
    sink: Arc<dyn DiagnosticSink>,
}

impl TestRunner {
    /// Fix a fresh run id and its directory under `base_dir`. Nothing is
    /// created on disk until [`run_tests`](Self::run_tests).
    pub fn new(base_dir: impl AsRef<Path>, driver: Arc<dyn BrowserDriver>) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let layout = RunLayout::new(base_dir, &run_id);
        Self {
            run_id,
            layout,
            driver,
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the default `tracing` mirror for browser console output.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        self.layout.root()
    }

    /// Execute the run. Never fails: setup errors become a failed result with
    /// a single "Test Execution" entry, and teardown always runs.
    pub async fn run_tests(self, options: RunOptions) -> TestRunResult {
        let start_time = Utc::now();
        tracing::info!(run_id = %self.run_id, url = %options.url, "Starting test run");

        let mut session = Session::default();
        let result = match self.execute(&options, &mut session, start_time).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "Test run failed");
                self.failed_run(&mut session, start_time, &e).await
            }
        };

        self.teardown(&mut session).await;

        tracing::info!(
            run_id = %self.run_id,
            status = result.status.as_str(),
            total = result.summary.total,
            passed = result.summary.passed,
            failed = result.summary.failed,
            "Test run finished"
        );
        result
    }

    async fn execute(
        &self,
        options: &RunOptions,
        session: &mut Session,
        start_time: DateTime<Utc>,
    ) -> Result<TestRunResult> {
        self.layout.create().await?;

        let launch = LaunchOptions {
            browser: options.browser,
            headless: options.headless,
            ..LaunchOptions::default()
        };
        let browser = session.browser.insert(self.driver.launch(&launch).await?);
        tracing::info!(
            browser = options.browser.as_str(),
            headless = options.headless,
            "Browser launched"
        );

        let video_dir = options.video.then(|| self.layout.videos_dir());
        let context = session.context.insert(
            browser
                .new_context(&ContextOptions {
                    record_video_dir: video_dir.clone(),
                    viewport: launch.viewport,
                })
                .await?,
        );
        if options.trace {
            context.start_tracing().await?;
        }

        let page = session.page.insert(context.new_page().await?).clone();
        let capture = session
            .capture
            .insert(CaptureSession::attach(page.clone(), self.sink.clone()).await?);

        let tests = if options.test_files.is_empty() {
            vec![self.basic_page_load(page.as_ref(), options).await]
        } else {
            let env = CaseEnv {
                page: page.as_ref(),
                base_url: &options.url,
                run_dir: self.layout.root(),
                navigation_timeout: Duration::from_millis(options.navigation_timeout_ms),
            };
            run_test_files(&env, &options.test_files).await
        };

        let performance_metrics = performance::collect(page.as_ref()).await;

        let trace_path = if options.trace {
            let archive = self.layout.trace_archive();
            match context.stop_tracing(&archive).await {
                Ok(()) => Some(archive),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to stop tracing");
                    None
                }
            }
        } else {
            None
        };

        capture.detach().await;
        let console_logs = capture.console_logs();
        let mut network_logs = capture.network_logs();
        redact_network_logs(&mut network_logs);

        let screenshots = tests
            .iter()
            .flat_map(|t| t.artifacts.screenshots.iter().cloned())
            .collect();

        let mut result = TestRunResult {
            run_id: self.run_id.clone(),
            status: RunStatus::derive(&tests),
            start_time,
            end_time: Utc::now(),
            summary: RunSummary::from_tests(&tests),
            tests,
            console_logs,
            network_logs,
            screenshots,
            performance_metrics,
            artifacts: RunArtifacts {
                run_dir: self.layout.root().to_path_buf(),
                trace_path,
                video_dir,
                har_path: None,
                report_path: None,
            },
        };
        self.persist(&mut result, options.har).await;
        Ok(result)
    }

    /// Navigate to the run URL between two screenshots.
    async fn basic_page_load(&self, page: &dyn Page, options: &RunOptions) -> TestResult {
        let start = Instant::now();
        let run_dir = self.layout.root();
        let mut screenshots = Vec::new();

        let outcome = async {
            screenshots
                .push(capture_screenshot(page, "before-navigation", run_dir, Some("navigate")).await?);

            let timeout = Duration::from_millis(options.navigation_timeout_ms);
            let response = page.goto(&options.url, WaitUntil::NetworkIdle, timeout).await?;
            match response {
                None => {
                    return Err(HarnessError::Navigation {
                        url: options.url.clone(),
                        reason: "no response received".to_string(),
                    })
                }
                Some(response) if response.status >= 400 => {
                    return Err(HarnessError::Navigation {
                        url: options.url.clone(),
                        reason: format!("HTTP {} {}", response.status, response.status_text)
                            .trim_end()
                            .to_string(),
                    })
                }
                Some(response) => {
                    tracing::info!(url = %response.url, status = response.status, "Page loaded");
                }
            }

            screenshots
                .push(capture_screenshot(page, "after-navigation", run_dir, Some("navigate")).await?);
            Ok::<(), HarnessError>(())
        }
        .await;

        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Basic page load failed");
                match capture_screenshot(page, "failure", run_dir, Some("failure")).await {
                    Ok(shot) => screenshots.push(shot),
                    Err(shot_err) => {
                        tracing::warn!(error = %shot_err, "Failure screenshot could not be taken")
                    }
                }
                match capture_dom_snapshot(page, run_dir, Some("failure")).await {
                    Ok(path) => tracing::info!(path = %path.display(), "DOM snapshot saved"),
                    Err(snap_err) => {
                        tracing::warn!(error = %snap_err, "DOM snapshot could not be taken")
                    }
                }
                Some(TestError::from(&e))
            }
        };

        TestResult {
            name: BASIC_TEST_NAME.to_string(),
            file: "internal".to_string(),
            status: if error.is_some() {
                TestStatus::Failed
            } else {
                TestStatus::Passed
            },
            duration: start.elapsed().as_millis() as u64,
            retries: 0,
            error,
            artifacts: TestArtifacts { screenshots },
        }
    }

    /// Write logs, HAR, report and `summary.json`. Write failures are logged
    /// and leave the matching artifact path unset.
    async fn persist(&self, result: &mut TestRunResult, har: bool) {
        let run_dir = self.layout.root();

        if let Err(e) = save_console_logs(run_dir, &result.console_logs).await {
            tracing::warn!(error = %e, "Failed to save console logs");
        }
        if let Err(e) = save_network_logs(run_dir, &result.network_logs).await {
            tracing::warn!(error = %e, "Failed to save network logs");
        }
        if har {
            match save_har(run_dir, &result.network_logs).await {
                Ok(path) => result.artifacts.har_path = Some(path),
                Err(e) => tracing::warn!(error = %e, "Failed to save HAR"),
            }
        }
        match generate_html_report(run_dir, result).await {
            Ok(path) => result.artifacts.report_path = Some(path),
            Err(e) => tracing::warn!(error = %e, "Failed to generate HTML report"),
        }
        self.save_summary(result).await;
    }

    async fn save_summary(&self, result: &TestRunResult) {
        let path = self.layout.summary_path();
        match write_json(&path, result).await {
            Ok(()) => tracing::info!(path = %path.display(), "Run summary saved"),
            Err(e) => tracing::warn!(error = %e, "Failed to save run summary"),
        }
    }

    async fn failed_run(
        &self,
        session: &mut Session,
        start_time: DateTime<Utc>,
        err: &HarnessError,
    ) -> TestRunResult {
        let (console_logs, mut network_logs) = match session.capture.as_mut() {
            Some(capture) => {
                capture.detach().await;
                (capture.console_logs(), capture.network_logs())
            }
            None => (Vec::new(), Vec::new()),
        };
        redact_network_logs(&mut network_logs);

        let tests = vec![TestResult {
            name: EXECUTION_FAILURE_NAME.to_string(),
            file: "internal".to_string(),
            status: TestStatus::Failed,
            duration: 0,
            retries: 0,
            error: Some(TestError::from(err)),
            artifacts: TestArtifacts::default(),
        }];

        let result = TestRunResult {
            run_id: self.run_id.clone(),
            status: RunStatus::Failed,
            start_time,
            end_time: Utc::now(),
            summary: RunSummary::from_tests(&tests),
            tests,
            console_logs,
            network_logs,
            screenshots: Vec::new(),
            performance_metrics: PerformanceMetrics::default(),
            artifacts: RunArtifacts {
                run_dir: self.layout.root().to_path_buf(),
                ..RunArtifacts::default()
            },
        };
        if self.layout.root().is_dir() {
            self.save_summary(&result).await;
        }
        result
    }

    /// Close page, context and browser. Each is attempted once; failures are
    /// only logged.
    async fn teardown(&self, session: &mut Session) {
        if let Some(mut capture) = session.capture.take() {
            capture.detach().await;
        }
        if let Some(page) = session.page.take() {
            if let Err(e) = page.close().await {
                tracing::warn!(error = %e, "Failed to close page");
            }
        }
        if let Some(context) = session.context.take() {
            if let Err(e) = context.close().await {
                tracing::warn!(error = %e, "Failed to close browser context");
            }
        }
        if let Some(browser) = session.browser.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!(error = %e, "Failed to close browser");
            }
        }
    }
}
