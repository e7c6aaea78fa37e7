//! JSON test files and their step interpreter.
//!
//! A file holds one case or a `{"tests": [...]}` suite:
//!
//! ```json
//! {
//!   "name": "add to cart",
//!   "timeoutMs": 20000,
//!   "retries": 1,
//!   "steps": [
//!     { "action": "goto", "url": "/products/42" },
//!     { "action": "click", "selector": "#add-to-cart" },
//!     { "action": "expectText", "selector": ".cart-count", "contains": "1" }
//!   ]
//! }
//! ```

use crate::capture::artifacts::capture_screenshot;
use crate::driver::{Page, WaitUntil};
use crate::error::{HarnessError, Result};
use crate::model::{Screenshot, TestArtifacts, TestError, TestResult, TestStatus};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_CASE_TIMEOUT_MS: u64 = 30_000;

/// `waitFor` default when the step gives no timeout.
const DEFAULT_WAIT_MS: u64 = 10_000;

fn default_case_timeout() -> u64 {
    DEFAULT_CASE_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    #[serde(default = "default_case_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub skip: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "camelCase",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum Step {
    Goto { url: String },
    Click { selector: String },
    Fill { selector: String, value: String },
    Press { key: String },
    Hover { selector: String },
    WaitFor { selector: String, timeout_ms: Option<u64> },
    Sleep { ms: u64 },
    ExpectText { selector: String, contains: String },
    ExpectUrl { contains: String },
    /// Status of the most recent `goto`.
    ExpectStatus { status: u16 },
    Evaluate {
        expression: String,
        equals: Option<serde_json::Value>,
    },
    Screenshot { name: String },
}

#[derive(Deserialize)]
struct Suite {
    tests: Vec<TestCase>,
}

/// Parse a test file body. `path` only labels errors.
pub fn parse_test_file(path: &Path, text: &str) -> Result<Vec<TestCase>> {
    let invalid = |reason: String| HarnessError::TestFile {
        path: path.to_path_buf(),
        reason,
    };
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;

    let cases = if value.get("tests").is_some() {
        serde_json::from_value::<Suite>(value)
            .map_err(|e| invalid(e.to_string()))?
            .tests
    } else {
        vec![serde_json::from_value::<TestCase>(value).map_err(|e| invalid(e.to_string()))?]
    };

    if cases.is_empty() {
        return Err(invalid("no test cases".to_string()));
    }
    Ok(cases)
}

pub async fn load_test_file(path: &Path) -> Result<Vec<TestCase>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| HarnessError::io(path, e))?;
    parse_test_file(path, &text)
}

/// Resolve `target` against the run's base URL. Absolute URLs pass through.
pub fn resolve_url(base: &str, target: &str) -> Result<String> {
    if let Ok(absolute) = url::Url::parse(target) {
        return Ok(absolute.to_string());
    }
    url::Url::parse(base)
        .and_then(|base| base.join(target))
        .map(|joined| joined.to_string())
        .map_err(|e| HarnessError::Navigation {
            url: target.to_string(),
            reason: e.to_string(),
        })
}

/// Everything a case needs from the surrounding run.
pub struct CaseEnv<'a> {
    pub page: &'a dyn Page,
    pub base_url: &'a str,
    pub run_dir: &'a Path,
    pub navigation_timeout: Duration,
}

struct StepState {
    last_status: Option<u16>,
    screenshots: Vec<Screenshot>,
}

async fn run_step(env: &CaseEnv<'_>, state: &mut StepState, step: &Step) -> Result<()> {
    let page = env.page;
    match step {
        Step::Goto { url } => {
            let target = resolve_url(env.base_url, url)?;
            let response = page
                .goto(&target, WaitUntil::Load, env.navigation_timeout)
                .await?;
            state.last_status = response.map(|r| r.status);
        }
        Step::Click { selector } => page.click(selector).await?,
        Step::Fill { selector, value } => page.fill(selector, value).await?,
        Step::Press { key } => page.press_key(key).await?,
        Step::Hover { selector } => page.hover(selector).await?,
        Step::WaitFor {
            selector,
            timeout_ms,
        } => {
            let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_WAIT_MS));
            page.wait_for_selector(selector, timeout).await?;
        }
        Step::Sleep { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        Step::ExpectText { selector, contains } => {
            let text = page.inner_text(selector).await?.ok_or_else(|| {
                HarnessError::Assertion(format!("Element '{}' not found", selector))
            })?;
            if !text.contains(contains.as_str()) {
                return Err(HarnessError::Assertion(format!(
                    "Expected '{}' to contain '{}', got '{}'",
                    selector, contains, text
                )));
            }
        }
        Step::ExpectUrl { contains } => {
            let url = page.url().await?.unwrap_or_default();
            if !url.contains(contains.as_str()) {
                return Err(HarnessError::Assertion(format!(
                    "Expected URL to contain '{}', got '{}'",
                    contains, url
                )));
            }
        }
        Step::ExpectStatus { status } => match state.last_status {
            Some(actual) if actual == *status => {}
            Some(actual) => {
                return Err(HarnessError::Assertion(format!(
                    "Expected status {}, got {}",
                    status, actual
                )))
            }
            None => {
                return Err(HarnessError::Assertion(format!(
                    "Expected status {}, but no navigation response was recorded",
                    status
                )))
            }
        },
        Step::Evaluate { expression, equals } => {
            let value = page.evaluate(expression).await?;
            if let Some(expected) = equals {
                if &value != expected {
                    return Err(HarnessError::Assertion(format!(
                        "Expected `{}` to equal {}, got {}",
                        expression, expected, value
                    )));
                }
            }
        }
        Step::Screenshot { name } => {
            let shot = capture_screenshot(page, name, env.run_dir, Some("step")).await?;
            state.screenshots.push(shot);
        }
    }
    Ok(())
}

enum Attempt {
    Passed,
    Failed(HarnessError),
    TimedOut(HarnessError),
}

/// Run one case with its timeout and retries. Never fails; errors land in
/// the returned result.
pub async fn run_case(env: &CaseEnv<'_>, case: &TestCase, file: &str) -> TestResult {
    if case.skip {
        return TestResult {
            name: case.name.clone(),
            file: file.to_string(),
            status: TestStatus::Skipped,
            duration: 0,
            retries: 0,
            error: None,
            artifacts: TestArtifacts::default(),
        };
    }

    let start = Instant::now();
    let mut state = StepState {
        last_status: None,
        screenshots: Vec::new(),
    };
    let mut retries = 0;

    let outcome = loop {
        state.last_status = None;
        let steps = async {
            for step in &case.steps {
                run_step(env, &mut state, step).await?;
            }
            Ok::<(), HarnessError>(())
        };
        let attempt =
            match tokio::time::timeout(Duration::from_millis(case.timeout_ms), steps).await {
                Ok(Ok(())) => Attempt::Passed,
                Ok(Err(e)) => Attempt::Failed(e),
                Err(_) => Attempt::TimedOut(HarnessError::Timeout {
                    action: format!("Test '{}'", case.name),
                    ms: case.timeout_ms,
                }),
            };
        match attempt {
            Attempt::Passed => break attempt,
            _ if retries < case.retries => {
                retries += 1;
                tracing::warn!(test = %case.name, attempt = retries, "Test failed, retrying");
            }
            _ => break attempt,
        }
    };

    let (status, error) = match outcome {
        Attempt::Passed => (TestStatus::Passed, None),
        Attempt::Failed(e) => (TestStatus::Failed, Some(e)),
        Attempt::TimedOut(e) => (TestStatus::Timedout, Some(e)),
    };

    if let Some(e) = &error {
        tracing::warn!(test = %case.name, error = %e, "Test failed");
        let name = format!("failure-{}", case.name);
        match capture_screenshot(env.page, &name, env.run_dir, Some("failure")).await {
            Ok(shot) => state.screenshots.push(shot),
            Err(shot_err) => {
                tracing::warn!(error = %shot_err, "Failure screenshot could not be taken")
            }
        }
    }

    TestResult {
        name: case.name.clone(),
        file: file.to_string(),
        status,
        duration: start.elapsed().as_millis() as u64,
        retries,
        error: error.as_ref().map(TestError::from),
        artifacts: TestArtifacts {
            screenshots: state.screenshots,
        },
    }
}

/// A file that could not be loaded becomes one failed result.
pub fn load_failure(path: &Path, err: &HarnessError) -> TestResult {
    TestResult {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        file: path.display().to_string(),
        status: TestStatus::Failed,
        duration: 0,
        retries: 0,
        error: Some(TestError::from(err)),
        artifacts: TestArtifacts::default(),
    }
}

/// Run every case of every file in order. A broken file does not stop the
/// files after it.
pub async fn run_test_files(env: &CaseEnv<'_>, files: &[PathBuf]) -> Vec<TestResult> {
    let mut results = Vec::new();
    for path in files {
        let label = path.display().to_string();
        match load_test_file(path).await {
            Ok(cases) => {
                tracing::info!(file = %label, cases = cases.len(), "Running test file");
                for case in &cases {
                    results.push(run_case(env, case, &label).await);
                }
            }
            Err(e) => {
                tracing::warn!(file = %label, error = %e, "Test file could not be loaded");
                results.push(load_failure(path, &e));
            }
        }
    }
    results
}
