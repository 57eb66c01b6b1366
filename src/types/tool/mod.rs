//! Tool-related types.

mod call;
mod definition;
mod error;

pub use call::{NOT_APPROVED_MESSAGE, ToolCallOutcome, ToolCallRequest, ToolCallResult};
pub use definition::ToolDefinition;
pub use error::ToolError;
