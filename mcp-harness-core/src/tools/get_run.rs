//! Fetch the persisted summary of a run.

use crate::harness::Harness;
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct GetRunInput {
    #[validate(length(min = 1, max = 64))]
    #[schemars(description = "Run id as returned by run_tests or list_runs")]
    pub run_id: String,

    /// Include console/network logs and inline screenshot data
    #[serde(default)]
    #[schemars(description = "Include full console and network logs (default: false)")]
    pub include_logs: bool,
}

/// Replace bulky arrays with their counts and drop inline screenshots.
fn strip_logs(summary: &mut serde_json::Value) {
    let Some(object) = summary.as_object_mut() else {
        return;
    };
    for key in ["consoleLogs", "networkLogs"] {
        let count = object
            .get(key)
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        object.insert(key.to_string(), serde_json::json!({ "count": count }));
    }

    let strip_shots = |shots: Option<&mut serde_json::Value>| {
        if let Some(shots) = shots.and_then(|s| s.as_array_mut()) {
            for shot in shots {
                if let Some(shot) = shot.as_object_mut() {
                    shot.remove("base64");
                }
            }
        }
    };
    strip_shots(object.get_mut("screenshots"));
    if let Some(tests) = object.get_mut("tests").and_then(|t| t.as_array_mut()) {
        for test in tests {
            strip_shots(test.pointer_mut("/artifacts/screenshots"));
        }
    }
}

pub async fn execute(harness: &Arc<Harness>, input: GetRunInput) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let summary = harness
        .load_summary(&input.run_id)
        .await
        .map_err(super::tool_error)?;

    let mut value = serde_json::to_value(&summary)
        .map_err(|e| Error::internal(format!("Failed to serialize summary: {}", e)))?;
    if !input.include_logs {
        strip_logs(&mut value);
    }
    Ok(value)
}
