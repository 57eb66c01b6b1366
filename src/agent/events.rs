//! Events emitted while a run executes.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::suspension::SuspensionRecord;
use crate::types::ToolError;

/// Payload of `tool-call-approval` and `tool-call-suspended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub resume_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_payload: Option<Value>,
}

impl From<&SuspensionRecord> for SuspensionEvent {
    fn from(record: &SuspensionRecord) -> Self {
        Self {
            tool_call_id: record.tool_call_id.clone(),
            tool_name: record.tool_name.clone(),
            args: record.args.clone(),
            resume_schema: record.resume_schema.clone(),
            suspend_payload: record.suspend_payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    ToolCallApproval(SuspensionEvent),
    ToolCallSuspended(SuspensionEvent),
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: Value,
    },
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: ToolError,
    },
    StepFinish {
        run_id: String,
        iteration: usize,
        tool_calls: usize,
        is_continued: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl AgentEvent {
    pub fn is_suspension(&self) -> bool {
        matches!(self, Self::ToolCallApproval(_) | Self::ToolCallSuspended(_))
    }
}

/// Receives events as they happen. Enqueueing never blocks the run.
pub trait EventSink: Send + Sync {
    fn enqueue(&self, event: AgentEvent);
}

impl EventSink for mpsc::UnboundedSender<AgentEvent> {
    fn enqueue(&self, event: AgentEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn enqueue(&self, _event: AgentEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn suspensions(&self) -> Vec<AgentEvent> {
        self.events()
            .into_iter()
            .filter(AgentEvent::is_suspension)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn enqueue(&self, event: AgentEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
