//! Regenerate the HTML report of a persisted run.

use crate::harness::Harness;
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct GenerateReportInput {
    #[validate(length(min = 1, max = 64))]
    #[schemars(description = "Run id as returned by run_tests or list_runs")]
    pub run_id: String,
}

pub async fn execute(
    harness: &Arc<Harness>,
    input: GenerateReportInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let path = harness
        .regenerate_report(&input.run_id)
        .await
        .map_err(super::tool_error)?;

    Ok(json!({
        "runId": input.run_id,
        "reportPath": path,
    }))
}
