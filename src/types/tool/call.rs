//! Tool call requests and their outcomes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::ToolError;
use crate::types::MessagePart;

/// Result text used when a human declines an approval request.
pub const NOT_APPROVED_MESSAGE: &str = "Tool call was not approved by the user";

/// One tool call requested by the model. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    /// `None` (or JSON `null`) when the model emitted arguments that did not parse.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub provider_executed: bool,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub output: Option<Value>,
}

impl ToolCallRequest {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args: Some(args),
            provider_executed: false,
            output: None,
        }
    }

    /// A call whose arguments could not be parsed.
    pub fn malformed(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args: None,
            provider_executed: false,
            output: None,
        }
    }

    /// A call the model provider already executed server-side.
    pub fn provider_executed(mut self, output: Option<Value>) -> Self {
        self.provider_executed = true;
        self.output = output;
        self
    }

    pub fn with_args(mut self, args: Option<Value>) -> Self {
        self.args = args;
        self
    }
}

/// A field that is present deserializes to `Some`, even when it is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Terminal state of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    Result(Value),
    Error(ToolError),
    /// Client-side tool: the request is handed back unchanged and the caller
    /// supplies the result out of band. Serializes with neither `result` nor
    /// `error`.
    Deferred,
}

/// A [`ToolCallRequest`] extended with at most one of `result` or `error`;
/// a deferred outcome carries neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "OutcomeRepr", try_from = "OutcomeRepr")]
pub struct ToolCallOutcome {
    pub request: ToolCallRequest,
    pub result: ToolCallResult,
}

impl ToolCallOutcome {
    pub fn success(request: ToolCallRequest, result: Value) -> Self {
        Self {
            request,
            result: ToolCallResult::Result(result),
        }
    }

    pub fn failure(request: ToolCallRequest, error: ToolError) -> Self {
        Self {
            request,
            result: ToolCallResult::Error(error),
        }
    }

    pub fn deferred(request: ToolCallRequest) -> Self {
        Self {
            request,
            result: ToolCallResult::Deferred,
        }
    }

    pub fn tool_call_id(&self) -> &str {
        &self.request.tool_call_id
    }

    pub fn tool_name(&self) -> &str {
        &self.request.tool_name
    }

    pub fn is_error(&self) -> bool {
        matches!(self.result, ToolCallResult::Error(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.result, ToolCallResult::Deferred)
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.result {
            ToolCallResult::Result(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ToolError> {
        match &self.result {
            ToolCallResult::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Model-facing tool-result part; `None` for deferred calls.
    pub fn to_model_part(&self) -> Option<MessagePart> {
        let (output, is_error) = match &self.result {
            ToolCallResult::Result(v) => (v.clone(), false),
            ToolCallResult::Error(e) => (Value::String(e.to_string()), true),
            ToolCallResult::Deferred => return None,
        };
        Some(MessagePart::tool_result(
            &self.request.tool_call_id,
            &self.request.tool_name,
            output,
            is_error,
        ))
    }
}

#[derive(Serialize, Deserialize)]
struct OutcomeRepr {
    #[serde(flatten)]
    request: ToolCallRequest,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ToolError>,
}

impl From<ToolCallOutcome> for OutcomeRepr {
    fn from(outcome: ToolCallOutcome) -> Self {
        let (result, error) = match outcome.result {
            ToolCallResult::Result(v) => (Some(v), None),
            ToolCallResult::Error(e) => (None, Some(e)),
            ToolCallResult::Deferred => (None, None),
        };
        Self {
            request: outcome.request,
            result,
            error,
        }
    }
}

impl TryFrom<OutcomeRepr> for ToolCallOutcome {
    type Error = String;

    fn try_from(repr: OutcomeRepr) -> Result<Self, Self::Error> {
        let result = match (repr.result, repr.error) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "tool call {} carries both a result and an error",
                    repr.request.tool_call_id
                ));
            }
            (Some(v), None) => ToolCallResult::Result(v),
            (None, Some(e)) => ToolCallResult::Error(e),
            (None, None) => ToolCallResult::Deferred,
        };
        Ok(Self {
            request: repr.request,
            result,
        })
    }
}
