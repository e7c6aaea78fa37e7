//! List runs under the artifacts directory.

use crate::harness::Harness;
use pmcp::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
#[schemars(deny_unknown_fields)]
pub struct ListRunsInput {}

pub async fn execute(
    harness: &Arc<Harness>,
    input: ListRunsInput,
) -> Result<serde_json::Value, Error> {
    input
        .validate()
        .map_err(|e| Error::validation(format!("Validation failed: {}", e)))?;

    let runs = harness.list_runs().await.map_err(super::tool_error)?;

    Ok(json!({
        "artifactsDir": harness.config().artifacts_dir,
        "runs": runs,
        "count": runs.len()
    }))
}
