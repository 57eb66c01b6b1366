//! # agent-runtime
//!
//! Execution engine for tool-calling language model agents.
//!
//! A run alternates between asking a model for its next turn and executing the
//! tool calls it requested. Tool calls can wait for human approval or for an
//! external event; the run then parks with a [`RunSnapshot`] and continues when
//! resumed with the parked call's id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agent_runtime::agent::testing::ScriptedModel;
//! use agent_runtime::{AgentLoop, FnTool, ResumeRequest, RunOutcome, ToolRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), agent_runtime::Error> {
//!     let model = ScriptedModel::new()
//!         .then_tool_call("c1", "deploy", json!({"env": "prod"}))
//!         .then_text("Deployed.");
//!
//!     let tools = ToolRegistry::new().with_tool(
//!         FnTool::new("deploy", "Deploy the service")
//!             .with_requires_approval(true)
//!             .with_handler(|args, _ctx| async move { Ok(json!({"deployed": args["env"]})) }),
//!     );
//!
//!     let agent = AgentLoop::new(Arc::new(model)).with_tools(tools);
//!     if let RunOutcome::Suspended(snapshot) = agent.run("ship it").await? {
//!         let label = snapshot.resume_label().to_string();
//!         let outcome = agent.resume(snapshot, ResumeRequest::approve(label)).await?;
//!         assert!(!outcome.is_suspended());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod agent;
pub mod config;
pub mod session;
pub mod suspension;
pub mod tools;
pub mod types;

pub use agent::{
    AgentEvent, AgentLoop, ConcurrencyPolicy, DispatchOutcome, DispatchState, EventSink,
    ExecutionConfig, LanguageModel, ModelRequest, ModelTurn, ParkedCall, RunMetrics, RunOutcome,
    RunResult, RunSnapshot, StepOutcome, StopCondition, ToolCallDispatcher, ToolCallStep,
};
pub use config::{ConfigBuilder, ConfigError, ConfigProvider, ConfigProviderExt};
#[cfg(feature = "jsonl")]
pub use session::{JsonlConfig, JsonlThreadStore, SyncMode};
pub use session::{
    Conversation, MemoryThreadStore, StoreError, ThreadRef, ThreadStore, flush_messages,
};
pub use suspension::{ResumeRequest, SuspensionKind, SuspensionMetadata, SuspensionRecord};
pub use tools::{
    FnTool, RequestContext, SchemaTool, SuspendOptions, Tool, ToolExecutionContext, ToolRegistry,
};
pub use types::{
    IterationData, Message, MessagePart, MessageSource, Role, ToolCallOutcome, ToolCallRequest,
    ToolError,
};

/// Error type for engine operations.
///
/// Tool failures are not engine errors: they become the `error` half of a
/// [`ToolCallOutcome`] and are shown to the model.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The language model failed to produce a turn.
    #[error("Model error: {message}")]
    Model { message: String },

    /// Operation exceeded timeout.
    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),

    /// Thread or snapshot storage failed.
    #[error("Store error: {0}")]
    Store(#[from] session::StoreError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A resume named a different call than the one the run parked on.
    #[error("Resume label mismatch: run is parked on {expected}, got {got}")]
    ResumeMismatch { expected: String, got: String },

    /// Nothing is parked.
    #[error("No suspended run to resume")]
    NotSuspended,

    /// No snapshot was saved for the run.
    #[error("No snapshot for run {run_id}")]
    SnapshotNotFound { run_id: String },

    /// The run's cancellation token fired.
    #[error("Run cancelled")]
    Cancelled,

    /// Request parameters are invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration or caller errors
    Configuration,
    /// Model failures that may succeed on retry
    Transient,
    /// Errors tied to the state of a run or its storage
    Stateful,
    /// Internal errors (JSON, unexpected states)
    Internal,
    /// Resource limits (timeout, cancellation)
    ResourceLimit,
}

impl Error {
    pub fn model(message: impl Into<String>) -> Self {
        Error::Model {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidRequest(_) | Error::ResumeMismatch { .. } => {
                ErrorCategory::Configuration
            }

            Error::Model { .. } => ErrorCategory::Transient,

            Error::Store(_) | Error::NotSuspended | Error::SnapshotNotFound { .. } => {
                ErrorCategory::Stateful
            }

            Error::Timeout(_) | Error::Cancelled => ErrorCategory::ResourceLimit,

            Error::Json(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_resource_limit(&self) -> bool {
        self.category() == ErrorCategory::ResourceLimit
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ResumeMismatch {
            expected: "c1".to_string(),
            got: "c2".to_string(),
        };
        assert!(err.to_string().contains("parked on c1"));
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::model("overloaded").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(Error::Timeout(std::time::Duration::from_secs(1)).is_resource_limit());
    }

    #[test]
    fn test_config_error_conversion() {
        let config_err = config::ConfigError::NotFound {
            key: "max_iterations".to_string(),
        };
        let err: Error = config_err.into();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: Error = session::StoreError::NotFound {
            id: "t1".to_string(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Stateful);
    }
}
