//! Score, grade and recommendations for a persisted run.

use crate::harness::Harness;
use crate::performance::create_performance_summary;
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct PerformanceSummaryInput {
    #[validate(length(min = 1, max = 64))]
    #[schemars(description = "Run id as returned by run_tests or list_runs")]
    pub run_id: String,
}

pub async fn execute(
    harness: &Arc<Harness>,
    input: PerformanceSummaryInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let summary = harness
        .load_summary(&input.run_id)
        .await
        .map_err(super::tool_error)?;

    serde_json::to_value(create_performance_summary(&summary.performance_metrics))
        .map_err(|e| Error::internal(format!("Failed to serialize summary: {}", e)))
}
