//! Per-iteration data owned by the agent loop.

use serde::{Deserialize, Serialize};

use super::{Message, ToolCallRequest};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationMessages {
    pub all: Vec<Message>,
    pub user: Vec<Message>,
    pub non_user: Vec<Message>,
}

/// What the model produced in one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOutput {
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub is_continued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Snapshot of one loop iteration.
///
/// Replaced, never mutated in place: each stage builds the next value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationData {
    pub messages: IterationMessages,
    pub output: ModelOutput,
    pub step_result: StepResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_retry_feedback: Option<String>,
}

impl IterationData {
    pub fn has_tool_calls(&self) -> bool {
        !self.output.tool_calls.is_empty()
    }

    pub fn with_messages(self, messages: IterationMessages) -> Self {
        Self { messages, ..self }
    }

    pub fn with_step_result(self, step_result: StepResult) -> Self {
        Self {
            step_result,
            ..self
        }
    }
}
