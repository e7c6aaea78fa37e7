//! End-to-end orchestrator tests against the scripted driver.

mod common;

use common::{finished, request, response, text_body, Calls, FailAt, FakeDriver, Script};
use mcp_harness_core::capture::artifacts::RUN_SUBDIRS;
use mcp_harness_core::capture::sink::MemorySink;
use mcp_harness_core::model::{ConsoleLevel, TestStatus};
use mcp_harness_core::redact::REDACTED;
use mcp_harness_core::runner::{BASIC_TEST_NAME, EXECUTION_FAILURE_NAME};
use mcp_harness_core::{RunOptions, RunStatus, TestRunResult, TestRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const URL: &str = "https://example.test";

async fn run(base: &Path, driver: Arc<FakeDriver>, options: RunOptions) -> TestRunResult {
    TestRunner::new(base, driver).run_tests(options).await
}

fn shot_names(result: &TestRunResult) -> Vec<String> {
    result.screenshots.iter().map(|s| s.name.clone()).collect()
}

fn assert_closed_once(calls: &Calls) {
    assert_eq!(Calls::get(&calls.page_close), 1, "page close");
    assert_eq!(Calls::get(&calls.context_close), 1, "context close");
    assert_eq!(Calls::get(&calls.browser_close), 1, "browser close");
}

#[tokio::test]
async fn test_basic_page_load_passes() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new(Script::default());
    let runner = TestRunner::new(tmp.path(), driver.clone());
    let run_id = runner.run_id().to_string();
    let run_dir = runner.run_dir().to_path_buf();
    assert_eq!(run_dir, tmp.path().join(&run_id));

    let result = runner.run_tests(RunOptions::new(URL)).await;

    assert_eq!(result.run_id, run_id);
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.tests.len(), 1);
    assert_eq!(result.tests[0].name, BASIC_TEST_NAME);
    assert_eq!(result.tests[0].file, "internal");
    assert_eq!(result.summary.total, 1);
    assert_eq!(result.summary.passed, 1);
    assert_eq!(shot_names(&result), vec!["before-navigation", "after-navigation"]);
    assert!(result.end_time >= result.start_time);

    for shot in &result.screenshots {
        assert!(shot.path.is_absolute());
        assert!(shot.path.exists());
        assert!(shot
            .base64
            .as_deref()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    for sub in RUN_SUBDIRS {
        assert!(run_dir.join(sub).is_dir(), "missing {}", sub);
    }
    assert!(run_dir.join("logs/console.json").exists());
    assert!(run_dir.join("logs/network.json").exists());
    assert!(!run_dir.join("logs/network.har").exists());
    assert_eq!(result.artifacts.har_path, None);
    assert_eq!(
        result.artifacts.report_path.as_deref(),
        Some(run_dir.join("reports/report.html").as_path())
    );
    assert_eq!(
        result.artifacts.trace_path.as_deref(),
        Some(run_dir.join("traces/trace.zip").as_path())
    );
    assert_eq!(result.artifacts.video_dir, Some(run_dir.join("videos")));

    let persisted: TestRunResult =
        serde_json::from_slice(&std::fs::read(run_dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(persisted.run_id, result.run_id);
    assert_eq!(persisted.status, RunStatus::Passed);
    assert_eq!(persisted.artifacts, result.artifacts);

    let calls = &driver.calls;
    assert_eq!(Calls::get(&calls.start_tracing), 1);
    assert_eq!(Calls::get(&calls.stop_tracing), 1);
    assert_eq!(*calls.video_dir_requested.lock().unwrap(), Some(true));
    assert_closed_once(calls);
}

#[tokio::test]
async fn test_http_error_fails_with_status_in_message() {
    let tmp = tempfile::tempdir().unwrap();
    let script = Script {
        status: Some(500),
        ..Script::default()
    };
    let driver = FakeDriver::new(script);
    let result = run(tmp.path(), driver.clone(), RunOptions::new(URL)).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.tests.len(), 1);
    let test = &result.tests[0];
    assert_eq!(test.status, TestStatus::Failed);
    assert!(test.error.as_ref().unwrap().message.contains("500"));
    assert_eq!(shot_names(&result), vec!["before-navigation", "failure"]);
    assert_eq!(result.summary.failed, 1);

    let snapshots: Vec<_> = std::fs::read_dir(result.artifacts.run_dir.join("logs"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("failure-") && name.ends_with(".html"))
        .collect();
    assert_eq!(snapshots.len(), 1);
    assert_closed_once(&driver.calls);
}

#[tokio::test]
async fn test_missing_navigation_response_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let script = Script {
        status: None,
        ..Script::default()
    };
    let result = run(tmp.path(), FakeDriver::new(script), RunOptions::new(URL)).await;
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.tests[0]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("no response"));
}

#[tokio::test]
async fn test_navigation_timeout_is_a_test_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let script = Script {
        goto_times_out: true,
        ..Script::default()
    };
    let driver = FakeDriver::new(script);
    let result = run(tmp.path(), driver.clone(), RunOptions::new(URL)).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.tests[0].name, BASIC_TEST_NAME);
    assert!(result.tests[0]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("timed out"));
    // Metrics and persistence still happen.
    assert_eq!(Calls::get(&driver.calls.evaluate), 1);
    assert!(result.artifacts.report_path.is_some());
    assert_closed_once(&driver.calls);
}

#[tokio::test]
async fn test_sensitive_headers_are_redacted() {
    let tmp = tempfile::tempdir().unwrap();
    let mut script = Script::default();
    script.events_on_goto = vec![
        request(
            "7.1",
            "https://example.test/api/secret",
            "GET",
            &[("Authorization", "Bearer xyz"), ("Accept", "application/json")],
        ),
        response("7.1", "https://example.test/api/secret", 200, "application/json", 1.0),
        finished("7.1", 1.1),
    ];
    script
        .bodies
        .insert("7.1".into(), text_body(r#"{"secret": false}"#));

    let driver = FakeDriver::new(script);
    let mut options = RunOptions::new(URL);
    options.har = true;
    let result = run(tmp.path(), driver, options).await;

    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.network_logs.len(), 1);
    let log = &result.network_logs[0];
    assert_eq!(log.request.headers["Authorization"], REDACTED);
    assert_eq!(log.request.headers["Accept"], "application/json");
    let response = log.response.as_ref().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(serde_json::json!({"secret": false})));

    let run_dir = &result.artifacts.run_dir;
    for persisted in ["summary.json", "logs/network.json", "logs/network.har"] {
        let text = std::fs::read_to_string(run_dir.join(persisted)).unwrap();
        assert!(!text.contains("Bearer xyz"), "{} leaks the token", persisted);
        assert!(text.contains(REDACTED), "{} lacks the marker", persisted);
    }
    assert_eq!(
        result.artifacts.har_path,
        Some(run_dir.join("logs").join("network.har"))
    );
}

#[tokio::test]
async fn test_dialog_is_accepted_and_logged() {
    let tmp = tempfile::tempdir().unwrap();
    let script = Script {
        alert_on_goto: Some("hi".into()),
        ..Script::default()
    };
    let driver = FakeDriver::new(script);
    let sink = Arc::new(MemorySink::default());
    let mut options = RunOptions::new(URL);
    options.navigation_timeout_ms = 5000;

    let result = TestRunner::new(tmp.path(), driver.clone())
        .with_sink(sink.clone())
        .run_tests(options)
        .await;

    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(Calls::get(&driver.calls.accept_dialog), 1);
    let dialog = result
        .console_logs
        .iter()
        .find(|l| l.message.contains("hi"))
        .expect("dialog logged");
    assert_eq!(dialog.level, ConsoleLevel::Info);
    assert_eq!(dialog.message, "Dialog (alert): hi");
    assert!(sink
        .entries()
        .iter()
        .any(|(_, message)| message == "Dialog (alert): hi"));
}

#[tokio::test]
async fn test_video_and_trace_can_be_disabled() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new(Script::default());
    let mut options = RunOptions::new(URL);
    options.video = false;
    options.trace = false;
    let result = run(tmp.path(), driver.clone(), options).await;

    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(Calls::get(&driver.calls.start_tracing), 0);
    assert_eq!(Calls::get(&driver.calls.stop_tracing), 0);
    assert_eq!(*driver.calls.video_dir_requested.lock().unwrap(), Some(false));
    assert_eq!(result.artifacts.trace_path, None);
    assert_eq!(result.artifacts.video_dir, None);
}

#[tokio::test]
async fn test_each_run_gets_its_own_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new(Script::default());
    let first = TestRunner::new(tmp.path(), driver.clone());
    let second = TestRunner::new(tmp.path(), driver);
    assert_ne!(first.run_id(), second.run_id());
    assert_ne!(first.run_dir(), second.run_dir());
}

// ---------------------------------------------------------------------------
// Failure injection: teardown always runs and nothing escapes run_tests
// ---------------------------------------------------------------------------

fn assert_execution_failure(result: &TestRunResult) {
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.tests.len(), 1);
    assert_eq!(result.tests[0].name, EXECUTION_FAILURE_NAME);
    assert_eq!(result.tests[0].status, TestStatus::Failed);
    assert!(result.tests[0].error.is_some());
    assert_eq!(result.summary.total, 1);
    assert_eq!(result.summary.failed, 1);
    assert_eq!(result.performance_metrics, Default::default());
    assert!(result.end_time >= result.start_time);
}

#[tokio::test]
async fn test_directory_failure_never_launches() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();

    let driver = FakeDriver::new(Script::default());
    let result = run(&blocker, driver.clone(), RunOptions::new(URL)).await;

    assert_execution_failure(&result);
    assert!(result.tests[0]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("Failed to create directory"));
    assert_eq!(Calls::get(&driver.calls.launch), 0);
    assert_eq!(Calls::get(&driver.calls.browser_close), 0);
}

#[tokio::test]
async fn test_launch_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = FakeDriver::new(Script::failing(FailAt::Launch));
    let result = run(tmp.path(), driver.clone(), RunOptions::new(URL)).await;

    assert_execution_failure(&result);
    assert!(result.tests[0]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("injected failure"));
    assert_eq!(Calls::get(&driver.calls.browser_close), 0);
    // The failed result is still persisted.
    assert!(tmp
        .path()
        .join(&result.run_id)
        .join("summary.json")
        .exists());
}

#[tokio::test]
async fn test_setup_failures_close_what_was_opened() {
    // (stage, page closes, context closes, browser closes)
    let cases = [
        (FailAt::NewContext, 0, 0, 1),
        (FailAt::StartTracing, 0, 1, 1),
        (FailAt::NewPage, 0, 1, 1),
        (FailAt::Events, 1, 1, 1),
    ];
    for (stage, page, context, browser) in cases {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new(Script::failing(stage));
        let result = run(tmp.path(), driver.clone(), RunOptions::new(URL)).await;

        assert_execution_failure(&result);
        let calls = &driver.calls;
        assert_eq!(Calls::get(&calls.page_close), page, "{:?} page", stage);
        assert_eq!(Calls::get(&calls.context_close), context, "{:?} context", stage);
        assert_eq!(Calls::get(&calls.browser_close), browser, "{:?} browser", stage);
    }
}

#[tokio::test]
async fn test_late_failures_keep_the_run() {
    for stage in [FailAt::Goto, FailAt::Evaluate, FailAt::StopTracing, FailAt::Close] {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new(Script::failing(stage));
        let result = run(tmp.path(), driver.clone(), RunOptions::new(URL)).await;

        assert_eq!(result.tests.len(), 1, "{:?}", stage);
        assert_eq!(result.tests[0].name, BASIC_TEST_NAME, "{:?}", stage);
        let expected = if stage == FailAt::Goto {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };
        assert_eq!(result.status, expected, "{:?}", stage);
        assert_closed_once(&driver.calls);
        if stage == FailAt::StopTracing {
            assert_eq!(result.artifacts.trace_path, None);
        }
        if stage == FailAt::Evaluate {
            assert_eq!(result.performance_metrics, Default::default());
        }
    }
}

// ---------------------------------------------------------------------------
// Test files
// ---------------------------------------------------------------------------

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn shop_script() -> Script {
    let mut script = Script::default();
    script.texts.insert("h1".into(), "Shop".into());
    script.texts.insert(".cart-count".into(), "1 item".into());
    script.selectors.insert("#add-to-cart".into());
    script.selectors.insert("#search".into());
    script
        .evaluations
        .insert("document.title".into(), serde_json::json!("Shop"));
    script
}

#[tokio::test]
async fn test_broken_file_does_not_stop_the_next_one() {
    let tmp = tempfile::tempdir().unwrap();
    let files = tempfile::tempdir().unwrap();
    let broken = write(files.path(), "broken.json", "{ not json");
    let missing = files.path().join("missing.json");
    let good = write(
        files.path(),
        "cart.json",
        r##"{
            "name": "add to cart",
            "steps": [
                {"action": "goto", "url": "/products/42"},
                {"action": "expectStatus", "status": 200},
                {"action": "expectUrl", "contains": "/products/42"},
                {"action": "fill", "selector": "#search", "value": "socks"},
                {"action": "press", "key": "Enter"},
                {"action": "hover", "selector": "#add-to-cart"},
                {"action": "click", "selector": "#add-to-cart"},
                {"action": "waitFor", "selector": ".cart-count", "timeoutMs": 500},
                {"action": "expectText", "selector": ".cart-count", "contains": "1"},
                {"action": "evaluate", "expression": "document.title", "equals": "Shop"},
                {"action": "screenshot", "name": "Cart Page"}
            ]
        }"##,
    );

    let driver = FakeDriver::new(shop_script());
    let mut options = RunOptions::new(URL);
    options.test_files = vec![broken.clone(), missing.clone(), good.clone()];
    let result = run(tmp.path(), driver.clone(), options).await;

    assert_eq!(result.tests.len(), 3);
    assert_eq!(result.tests[0].name, "broken");
    assert_eq!(result.tests[0].status, TestStatus::Failed);
    assert_eq!(result.tests[0].file, broken.display().to_string());
    assert_eq!(result.tests[1].name, "missing");
    assert_eq!(result.tests[1].status, TestStatus::Failed);
    assert_eq!(result.tests[2].name, "add to cart");
    assert_eq!(
        result.tests[2].status,
        TestStatus::Passed,
        "{:?}",
        result.tests[2].error
    );
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.summary.passed, 1);
    assert_eq!(result.summary.failed, 2);
    assert_eq!(shot_names(&result), vec!["cart-page"]);

    assert_eq!(
        driver.calls.actions(),
        vec![
            "fill:#search=socks",
            "press:Enter",
            "hover:#add-to-cart",
            "click:#add-to-cart"
        ]
    );
}

#[tokio::test]
async fn test_case_timeout_makes_the_run_timedout() {
    let tmp = tempfile::tempdir().unwrap();
    let files = tempfile::tempdir().unwrap();
    let suite = write(
        files.path(),
        "suite.json",
        r#"{"tests": [
            {"name": "quick", "steps": [{"action": "goto", "url": "/"}]},
            {"name": "slow", "timeoutMs": 50, "steps": [{"action": "sleep", "ms": 2000}]}
        ]}"#,
    );

    let mut options = RunOptions::new(URL);
    options.test_files = vec![suite];
    let result = run(tmp.path(), FakeDriver::new(shop_script()), options).await;

    assert_eq!(result.tests[0].status, TestStatus::Passed);
    assert_eq!(result.tests[1].status, TestStatus::Timedout);
    assert!(result.tests[1]
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("timed out after 50ms"));
    assert_eq!(result.status, RunStatus::Timedout);
    assert_eq!(result.summary.failed, 1);
    assert!(shot_names(&result).contains(&"failure-slow".to_string()));
}

#[tokio::test]
async fn test_retries_and_skip() {
    let tmp = tempfile::tempdir().unwrap();
    let files = tempfile::tempdir().unwrap();
    let suite = write(
        files.path(),
        "suite.json",
        r#"{"tests": [
            {"name": "flaky", "retries": 2, "steps": [
                {"action": "goto", "url": "/"},
                {"action": "expectText", "selector": "h1", "contains": "Checkout"}
            ]},
            {"name": "later", "skip": true, "steps": [{"action": "goto", "url": "/later"}]}
        ]}"#,
    );

    let driver = FakeDriver::new(shop_script());
    let mut options = RunOptions::new(URL);
    options.test_files = vec![suite];
    let result = run(tmp.path(), driver.clone(), options).await;

    let flaky = &result.tests[0];
    assert_eq!(flaky.status, TestStatus::Failed);
    assert_eq!(flaky.retries, 2);
    assert!(flaky.error.as_ref().unwrap().message.contains("Checkout"));
    assert_eq!(flaky.artifacts.screenshots.len(), 1);
    assert_eq!(flaky.artifacts.screenshots[0].name, "failure-flaky");

    let later = &result.tests[1];
    assert_eq!(later.status, TestStatus::Skipped);
    assert_eq!(later.duration, 0);

    // Three attempts of "flaky"; the skipped case never navigates.
    assert_eq!(Calls::get(&driver.calls.goto), 3);
    assert_eq!(result.summary.skipped, 1);
    assert_eq!(result.status, RunStatus::Failed);
}
