//! Tool capability set, registry and execution context.

mod context;
mod function;
mod registry;
mod traits;

pub use context::{RequestContext, SuspendOptions, SuspendRequest, ToolExecutionContext};
pub use function::FnTool;
pub use registry::ToolRegistry;
pub use traits::{SchemaTool, Tool, ToolInputEvent, ToolOutputEvent};
