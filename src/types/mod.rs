//! Core data model: messages, tool calls, outcomes and per-iteration data.

mod iteration;
mod message;
mod tool;

pub use iteration::{IterationData, IterationMessages, ModelOutput, StepResult};
pub use message::{Message, MessageId, MessageMetadata, MessagePart, MessageSource, Role};
pub use tool::{
    NOT_APPROVED_MESSAGE, ToolCallOutcome, ToolCallRequest, ToolCallResult, ToolDefinition,
    ToolError,
};
