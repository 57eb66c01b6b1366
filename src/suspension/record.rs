//! Suspension records and resume payloads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspensionKind {
    /// Waiting for a human to approve or decline the call.
    Approval,
    /// Waiting for a tool-defined external event.
    Suspension,
}

impl std::fmt::Display for SuspensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuspensionKind::Approval => write!(f, "approval"),
            SuspensionKind::Suspension => write!(f, "suspension"),
        }
    }
}

/// Durable marker that a tool call is parked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    #[serde(rename = "type")]
    pub kind: SuspensionKind,
    pub run_id: String,
    pub resume_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_payload: Option<Value>,
}

/// Resume contract for approval requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalDecision {
    /// Whether the tool call may run.
    pub approved: bool,
}

/// JSON schema describing the `{ "approved": boolean }` resume payload.
pub fn approval_resume_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(ApprovalDecision))
        .unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// `Some(approved)` when the payload carries an approval decision.
pub fn approval_decision(resume_data: &Value) -> Option<bool> {
    resume_data.get("approved").and_then(Value::as_bool)
}

/// True when the payload is nothing but the approval envelope.
pub fn is_approval_envelope(resume_data: &Value) -> bool {
    resume_data
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && obj.get("approved").is_some_and(Value::is_boolean))
}

/// Request to continue a parked run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    /// The parked tool call's id.
    pub resume_label: String,
    pub resume_data: Value,
}

impl ResumeRequest {
    pub fn new(resume_label: impl Into<String>, resume_data: Value) -> Self {
        Self {
            resume_label: resume_label.into(),
            resume_data,
        }
    }

    pub fn approve(resume_label: impl Into<String>) -> Self {
        Self::new(resume_label, serde_json::json!({"approved": true}))
    }

    pub fn decline(resume_label: impl Into<String>) -> Self {
        Self::new(resume_label, serde_json::json!({"approved": false}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_format() {
        let record = SuspensionRecord {
            tool_call_id: "c1".into(),
            tool_name: "deploy".into(),
            args: json!({"env": "prod"}),
            kind: SuspensionKind::Approval,
            run_id: "run-1".into(),
            resume_schema: approval_resume_schema(),
            suspend_payload: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "approval");
        assert_eq!(value["toolCallId"], "c1");
        assert!(value.get("suspendPayload").is_none());
    }

    #[test]
    fn test_approval_schema_describes_approved_flag() {
        let schema = approval_resume_schema();
        assert_eq!(schema["properties"]["approved"]["type"], "boolean");
        assert!(
            schema["required"]
                .as_array()
                .unwrap()
                .contains(&json!("approved"))
        );
    }

    #[test]
    fn test_approval_envelope_detection() {
        assert!(is_approval_envelope(&json!({"approved": true})));
        assert!(!is_approval_envelope(&json!({"approved": true, "note": "ok"})));
        assert!(!is_approval_envelope(&json!({"answer": 42})));
        assert_eq!(approval_decision(&json!({"approved": false})), Some(false));
        assert_eq!(approval_decision(&json!({"answer": 42})), None);
    }
}
