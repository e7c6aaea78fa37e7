//! Tool registration for the test-run harness.

pub mod generate_report;
pub mod get_run;
pub mod list_runs;
pub mod performance_summary;

use crate::error::HarnessError;
use crate::harness::Harness;
use pmcp::TypedTool;
use std::sync::Arc;

/// Map a harness error onto the MCP error kinds.
pub(crate) fn tool_error(err: HarnessError) -> pmcp::Error {
    match &err {
        HarnessError::InvalidRunId(_) => pmcp::Error::validation(err.to_string()),
        HarnessError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            pmcp::Error::validation(format!("Run not found: {}", err))
        }
        _ => pmcp::Error::internal(err.to_string()),
    }
}

/// Register all harness tools onto the server builder.
///
/// Each tool captures an `Arc<Harness>`.
pub fn register_tools(builder: pmcp::ServerBuilder, harness: Arc<Harness>) -> pmcp::ServerBuilder {
    let h = harness.clone();
    let builder = builder.tool(
        "run_tests",
        TypedTool::new("run_tests", move |input: run_tests::RunTestsInput, _extra| {
            let h = h.clone();
            Box::pin(async move { run_tests::execute(&h, input).await })
        })
        .with_description(
            "Run browser tests against a URL: launches a browser, runs the given JSON test files \
             (or a basic page-load test), captures console, network, screenshots, trace and \
             performance metrics, and returns the run summary with artifact paths.",
        ),
    );

    let h = harness.clone();
    let builder = builder.tool(
        "list_runs",
        TypedTool::new("list_runs", move |input: list_runs::ListRunsInput, _extra| {
            let h = h.clone();
            Box::pin(async move { list_runs::execute(&h, input).await })
        })
        .with_description("List previous test runs, newest first, with their status."),
    );

    let h = harness.clone();
    let builder = builder.tool(
        "get_run",
        TypedTool::new("get_run", move |input: get_run::GetRunInput, _extra| {
            let h = h.clone();
            Box::pin(async move { get_run::execute(&h, input).await })
        })
        .with_description(
            "Get the persisted summary of a test run. Logs are summarised as counts unless include_logs is set.",
        ),
    );

    let h = harness.clone();
    let builder = builder.tool(
        "generate_report",
        TypedTool::new(
            "generate_report",
            move |input: generate_report::GenerateReportInput, _extra| {
                let h = h.clone();
                Box::pin(async move { generate_report::execute(&h, input).await })
            },
        )
        .with_description("Regenerate the self-contained HTML report of a test run."),
    );

    let h = harness;
    let builder = builder.tool(
        "performance_summary",
        TypedTool::new(
            "performance_summary",
            move |input: performance_summary::PerformanceSummaryInput, _extra| {
                let h = h.clone();
                Box::pin(async move { performance_summary::execute(&h, input).await })
            },
        )
        .with_description(
            "Get the performance score (0-100), letter grade and recommendations of a test run.",
        ),
    );

    builder
}
