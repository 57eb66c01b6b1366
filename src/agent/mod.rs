//! Agent execution engine.

mod config;
pub mod dispatcher;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod snapshot;
mod state;
pub mod step;
pub mod testing;

pub use config::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOOL_CONCURRENCY, ExecutionConfig};
pub use dispatcher::{ConcurrencyPolicy, DispatchOutcome, DispatchState, ToolCallDispatcher};
pub use events::{AgentEvent, EventSink, NoopSink, RecordingSink, SuspensionEvent};
pub use model::{DefaultStopCondition, LanguageModel, ModelRequest, ModelTurn, StopCondition};
pub use orchestrator::AgentLoop;
pub use snapshot::{RunOutcome, RunResult, RunSnapshot};
pub use state::{RunMetrics, ToolStats};
pub use step::{ParkedCall, StepOutcome, ToolCallStep};
