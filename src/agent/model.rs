//! The language model seam and loop termination.

use async_trait::async_trait;

use crate::types::{
    IterationData, Message, ModelOutput, StepResult, ToolCallOutcome, ToolDefinition,
};

/// Input for one model turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub run_id: String,
    pub iteration: usize,
    /// Model-visible conversation.
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Response messages the run already holds, oldest first.
    pub response_messages: Vec<Message>,
}

/// What a model turn produced.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    /// Every response message of the run so far, including earlier turns.
    /// Only the entries beyond the ones the request carried are recorded.
    pub response_messages: Vec<Message>,
    pub output: ModelOutput,
}

impl ModelTurn {
    /// Turn that appends `message` to the request's response messages, with
    /// the output derived from its parts.
    pub fn from_assistant(request: &ModelRequest, message: Message) -> Self {
        let text = message.text();
        let output = ModelOutput {
            tool_calls: message.tool_calls(),
            text: (!text.is_empty()).then_some(text),
            finish_reason: None,
        };
        let mut response_messages = request.response_messages.clone();
        response_messages.push(message);
        Self {
            response_messages,
            output,
        }
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.output.finish_reason = Some(reason.into());
        self
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str {
        "model"
    }

    async fn generate(&self, request: ModelRequest) -> crate::Result<ModelTurn>;
}

/// Decides whether the loop runs another model turn.
pub trait StopCondition: Send + Sync {
    fn evaluate(&self, data: &IterationData, outcomes: &[ToolCallOutcome]) -> StepResult;
}

/// Continues while the model keeps calling tools whose results are available.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStopCondition;

impl StopCondition for DefaultStopCondition {
    fn evaluate(&self, data: &IterationData, outcomes: &[ToolCallOutcome]) -> StepResult {
        if !data.has_tool_calls() {
            return StepResult {
                is_continued: false,
                reason: Some(
                    data.output
                        .finish_reason
                        .clone()
                        .unwrap_or_else(|| "stop".to_string()),
                ),
                warnings: Vec::new(),
            };
        }
        if outcomes.iter().any(ToolCallOutcome::is_deferred) {
            return StepResult {
                is_continued: false,
                reason: Some("client-tool-call".to_string()),
                warnings: Vec::new(),
            };
        }
        StepResult {
            is_continued: true,
            reason: Some("tool-calls".to_string()),
            warnings: Vec::new(),
        }
    }
}
