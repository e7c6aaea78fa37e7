//! Self-contained HTML report for a finished run.

use crate::capture::artifacts::{create_dir, RunLayout};
use crate::error::{HarnessError, Result};
use crate::model::TestRunResult;
use crate::performance::create_performance_summary;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Console entries shown in the report, newest last.
const CONSOLE_TAIL: usize = 50;

const STYLE: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif; margin: 2rem; color: #1f2328; }
h1 { margin-bottom: 0.25rem; }
.meta { color: #59636e; margin-bottom: 1.5rem; }
.badge { display: inline-block; padding: 0.15rem 0.6rem; border-radius: 1rem; color: #fff; font-weight: 600; }
.passed { background: #1a7f37; } .failed { background: #cf222e; }
.timedout { background: #9a6700; } .skipped { background: #6e7781; } .build-failed { background: #8250df; }
.cards { display: flex; gap: 1rem; margin: 1rem 0 2rem; flex-wrap: wrap; }
.card { border: 1px solid #d1d9e0; border-radius: 0.5rem; padding: 0.75rem 1rem; min-width: 8rem; }
.card .value { font-size: 1.5rem; font-weight: 600; }
table { border-collapse: collapse; width: 100%; margin-bottom: 2rem; }
th, td { border-bottom: 1px solid #d1d9e0; padding: 0.4rem 0.6rem; text-align: left; vertical-align: top; }
pre { white-space: pre-wrap; background: #f6f8fa; padding: 0.5rem; margin: 0.25rem 0 0; font-size: 0.85rem; }
.log-error { color: #cf222e; } .log-warn { color: #9a6700; }
"#;

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_html_report(result: &TestRunResult) -> String {
    let perf = create_performance_summary(&result.performance_metrics);
    let metrics = &result.performance_metrics;
    let mut html = String::new();

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Test Run {id}</title>\n<style>{style}</style>\n</head>\n<body>\n\
         <h1>Test Run Report</h1>\n\
         <div class=\"meta\">Run <code>{id}</code> &middot; {start} &rarr; {end}</div>\n\
         <p><span class=\"badge {class}\">{status}</span></p>\n",
        id = escape_html(&result.run_id),
        style = STYLE,
        start = escape_html(&result.start_time.to_rfc3339()),
        end = escape_html(&result.end_time.to_rfc3339()),
        class = result.status.as_str(),
        status = escape_html(result.status.as_str()),
    );

    let summary = &result.summary;
    let _ = write!(
        html,
        "<div class=\"cards\">\
         <div class=\"card\"><div>Total</div><div class=\"value\">{}</div></div>\
         <div class=\"card\"><div>Passed</div><div class=\"value\">{}</div></div>\
         <div class=\"card\"><div>Failed</div><div class=\"value\">{}</div></div>\
         <div class=\"card\"><div>Skipped</div><div class=\"value\">{}</div></div>\
         <div class=\"card\"><div>Duration</div><div class=\"value\">{} ms</div></div>\
         </div>\n",
        summary.total, summary.passed, summary.failed, summary.skipped, summary.duration,
    );

    let _ = write!(
        html,
        "<h2>Performance</h2>\n<div class=\"cards\">\
         <div class=\"card\"><div>Score</div><div class=\"value\">{} ({})</div></div>\
         <div class=\"card\"><div>LCP</div><div class=\"value\">{:.0} ms</div></div>\
         <div class=\"card\"><div>FCP</div><div class=\"value\">{:.0} ms</div></div>\
         <div class=\"card\"><div>CLS</div><div class=\"value\">{:.3}</div></div>\
         <div class=\"card\"><div>TBT</div><div class=\"value\">{:.0} ms</div></div>\
         </div>\n",
        perf.score,
        perf.grade,
        metrics.largest_contentful_paint,
        metrics.first_contentful_paint,
        metrics.cumulative_layout_shift,
        metrics.total_blocking_time,
    );

    html.push_str(
        "<h2>Tests</h2>\n<table>\n<tr><th>Name</th><th>File</th><th>Status</th>\
         <th>Duration</th><th>Retries</th></tr>\n",
    );
    for test in &result.tests {
        let _ = write!(html, "<tr><td>{}", escape_html(&test.name));
        if let Some(error) = &test.error {
            let _ = write!(html, "<pre>{}", escape_html(&error.message));
            if let Some(stack) = &error.stack {
                let _ = write!(html, "\n{}", escape_html(stack));
            }
            html.push_str("</pre>");
        }
        let _ = writeln!(
            html,
            "</td><td>{file}</td><td><span class=\"badge {status}\">{status}</span></td>\
             <td>{duration} ms</td><td>{retries}</td></tr>",
            file = escape_html(&test.file),
            status = test.status.as_str(),
            duration = test.duration,
            retries = test.retries,
        );
    }
    html.push_str("</table>\n");

    if !result.screenshots.is_empty() {
        html.push_str("<h2>Screenshots</h2>\n<ul>\n");
        for shot in &result.screenshots {
            let _ = writeln!(
                html,
                "<li>{} <code>{}</code></li>",
                escape_html(&shot.name),
                escape_html(&shot.path.display().to_string()),
            );
        }
        html.push_str("</ul>\n");
    }

    let skip = result.console_logs.len().saturating_sub(CONSOLE_TAIL);
    let _ = writeln!(
        html,
        "<h2>Console ({} entries)</h2>\n<table>\n<tr><th>Time</th><th>Type</th><th>Message</th></tr>",
        result.console_logs.len(),
    );
    for log in result.console_logs.iter().skip(skip) {
        let _ = writeln!(
            html,
            "<tr class=\"log-{level}\"><td>{time}</td><td>{level}</td><td>{message}</td></tr>",
            level = log.level.as_str(),
            time = escape_html(&log.timestamp.format("%H:%M:%S%.3f").to_string()),
            message = escape_html(&log.message),
        );
    }
    html.push_str("</table>\n</body>\n</html>\n");
    html
}

/// Write `reports/report.html` and return its path.
pub async fn generate_html_report(run_dir: &Path, result: &TestRunResult) -> Result<PathBuf> {
    let layout = RunLayout::at(run_dir);
    create_dir(&layout.reports_dir()).await?;
    let path = layout.report_path();
    tokio::fs::write(&path, render_html_report(result))
        .await
        .map_err(|e| HarnessError::io(&path, e))?;
    Ok(path)
}
