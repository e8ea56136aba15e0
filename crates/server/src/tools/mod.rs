pub mod health_check;
pub mod search;
pub mod stock;

use concierge_mcp::{ToolCallError, ToolOutput};
use concierge_services::ServiceError;
use serde::Serialize;
use tracing::warn;

/// Backing-service failures are reported to the caller as tool errors.
pub(crate) fn service_failure(tool: &'static str, error: ServiceError) -> ToolCallError {
    warn!(event_name = "server.tool.failed", tool, error = %error, "tool call failed");
    ToolCallError::Failed(format!("{tool} failed: {error}"))
}

pub(crate) fn json_output<T: Serialize>(value: &T) -> Result<ToolOutput, ToolCallError> {
    serde_json::to_value(value)
        .map(ToolOutput::Json)
        .map_err(|error| ToolCallError::Failed(format!("could not encode result: {error}")))
}
