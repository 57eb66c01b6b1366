//! Tool error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a tool call did not produce a result.
///
/// These never escape the tool-call step as engine errors; they become the
/// `error` half of a [`ToolCallOutcome`](super::ToolCallOutcome) so the model
/// can tell a failed call from a successful one.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ToolError {
    #[error(
        "Tool \"{name}\" not found. Available tools: {}. Call tools by their exact registered name; never add a prefix or namespace to a tool name.",
        available.join(", ")
    )]
    NotFound { name: String, available: Vec<String> },

    #[error("Invalid arguments for tool \"{tool}\": {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("tool panicked: {message}")]
    Panicked { message: String },

    #[error("tool call {tool_call_id} suspended")]
    Suspended { tool_call_id: String },

    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn not_found(name: impl Into<String>, available: Vec<String>) -> Self {
        Self::NotFound {
            name: name.into(),
            available,
        }
    }

    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Arguments were missing because the model emitted unparseable JSON.
    pub fn malformed_arguments(tool: impl Into<String>) -> Self {
        Self::invalid_arguments(
            tool,
            "the model produced malformed JSON arguments; retry the call with a valid JSON object",
        )
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    pub fn is_suspension(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.to_string().contains(pattern)
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::execution_failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_available_tools() {
        let err = ToolError::not_found("serch", vec!["search".into(), "weather".into()]);
        let msg = err.to_string();
        assert!(msg.contains("search, weather"));
        assert!(msg.contains("never add a prefix"));
    }

    #[test]
    fn test_malformed_arguments_message() {
        let msg = ToolError::malformed_arguments("search").to_string();
        assert!(msg.contains("malformed JSON"));
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let value = serde_json::to_value(ToolError::execution_failed("boom")).unwrap();
        assert_eq!(value["kind"], "executionFailed");
        assert_eq!(value["message"], "boom");
    }
}
