use serde_json::Value;

use super::error::ComputeError;

/// Tagged result a module returns for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginOutcome {
    /// The full tagged object (`{"type": ..., "payload": ...}`), left for the
    /// rendering layer to interpret.
    Success(Value),
    Failure { message: String },
}

/// Parse a module's JSON result string.
///
/// `{"type":"error","payload":{"message":..}}` is a failure; any other
/// string `type` counts as success. Non-JSON, non-objects, or a missing
/// `type` are `MalformedResult`.
pub fn parse_outcome(json: &str) -> Result<PluginOutcome, ComputeError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ComputeError::MalformedResult(format!("result is not JSON: {e}")))?;
    let kind = value
        .as_object()
        .ok_or_else(|| ComputeError::MalformedResult("result must be an object".into()))?
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ComputeError::MalformedResult("result.type must be a string".into()))?;
    if kind == "error" {
        let message = value
            .get("payload")
            .and_then(|p| p.get("message"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ComputeError::MalformedResult("error result missing payload.message".into())
            })?
            .to_string();
        return Ok(PluginOutcome::Failure { message });
    }
    Ok(PluginOutcome::Success(value))
}
