//! Parked and finished runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dispatcher::DispatchState;
use super::state::RunMetrics;
use crate::session::ThreadRef;
use crate::suspension::SuspensionKind;
use crate::types::{IterationData, Message};

/// Everything needed to continue a parked run, apart from the conversation
/// itself, which lives in the thread store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadRef>,
    /// Index of the iteration that parked.
    pub iteration: usize,
    pub data: IterationData,
    pub dispatch: DispatchState,
    pub metrics: RunMetrics,
    pub created_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn resume_label(&self) -> &str {
        &self.dispatch.parked.resume_label
    }

    pub fn kind(&self) -> SuspensionKind {
        self.dispatch.parked.kind
    }

    pub fn tool_name(&self) -> &str {
        &self.dispatch.parked.request.tool_name
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    /// Text of the final assistant turn.
    pub text: String,
    pub iterations: usize,
    pub data: IterationData,
    pub metrics: RunMetrics,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunResult),
    Suspended(RunSnapshot),
}

impl RunOutcome {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    pub fn result(self) -> Option<RunResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Suspended(_) => None,
        }
    }

    pub fn snapshot(self) -> Option<RunSnapshot> {
        match self {
            Self::Suspended(snapshot) => Some(snapshot),
            Self::Completed(_) => None,
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::Completed(result) => &result.run_id,
            Self::Suspended(snapshot) => &snapshot.run_id,
        }
    }
}
