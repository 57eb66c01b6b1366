//! Suspension bookkeeping on the latest assistant message.
//!
//! Records live in the assistant message's metadata, in one map per
//! [`SuspensionKind`] keyed by tool name. Older producers wrote them inline as
//! `tool-approval` / `tool-suspended` message parts instead, so removal and
//! lookup check both encodings.
//!
//! Locating the latest assistant message is a reverse linear scan, bounded by
//! conversation length.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::record::{SuspensionKind, SuspensionRecord};
use crate::session::{Conversation, ThreadRef, ThreadStore, flush_messages};
use crate::types::{Message, MessageMetadata, MessagePart};

/// Sub-agent and sub-workflow tools carry a resumable run id.
pub(crate) const AGENT_TOOL_PREFIX: &str = "agent-";
pub(crate) const WORKFLOW_TOOL_PREFIX: &str = "workflow-";

pub(crate) fn is_sub_run_tool(tool_name: &str) -> bool {
    tool_name.starts_with(AGENT_TOOL_PREFIX) || tool_name.starts_with(WORKFLOW_TOOL_PREFIX)
}

#[derive(Clone)]
struct Durable {
    store: Arc<dyn ThreadStore>,
    thread: ThreadRef,
}

/// The only writer of suspension annotations.
#[derive(Clone)]
pub struct SuspensionMetadata {
    conversation: Conversation,
    durable: Option<Durable>,
}

impl std::fmt::Debug for SuspensionMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspensionMetadata")
            .field("thread", &self.durable.as_ref().map(|d| &d.thread))
            .finish_non_exhaustive()
    }
}

fn map_for(
    metadata: &mut MessageMetadata,
    kind: SuspensionKind,
) -> &mut Option<BTreeMap<String, SuspensionRecord>> {
    match kind {
        SuspensionKind::Approval => &mut metadata.pending_tool_approvals,
        SuspensionKind::Suspension => &mut metadata.suspended_tools,
    }
}

fn map_ref(
    metadata: &MessageMetadata,
    kind: SuspensionKind,
) -> Option<&BTreeMap<String, SuspensionRecord>> {
    match kind {
        SuspensionKind::Approval => metadata.pending_tool_approvals.as_ref(),
        SuspensionKind::Suspension => metadata.suspended_tools.as_ref(),
    }
}

fn inline_record(part: &MessagePart, kind: SuspensionKind) -> Option<&SuspensionRecord> {
    match (part, kind) {
        (MessagePart::ToolApproval { record }, SuspensionKind::Approval)
        | (MessagePart::ToolSuspended { record }, SuspensionKind::Suspension) => Some(record),
        _ => None,
    }
}

fn find_in(message: &Message, tool_name: &str, kind: SuspensionKind) -> Option<SuspensionRecord> {
    map_ref(&message.metadata, kind)
        .and_then(|m| m.get(tool_name))
        .or_else(|| {
            message
                .parts
                .iter()
                .rev()
                .filter_map(|p| inline_record(p, kind))
                .find(|r| r.tool_name == tool_name)
        })
        .cloned()
}

fn remove_from(
    message: &mut Message,
    tool_name: &str,
    kind: SuspensionKind,
) -> Option<SuspensionRecord> {
    let slot = map_for(&mut message.metadata, kind);
    let from_map = slot.as_mut().and_then(|m| m.remove(tool_name));
    if slot.as_ref().is_some_and(BTreeMap::is_empty) {
        *slot = None;
    }

    let mut from_parts = None;
    message.parts.retain(|part| match inline_record(part, kind) {
        Some(record) if record.tool_name == tool_name => {
            from_parts = Some(record.clone());
            false
        }
        _ => true,
    });

    from_map.or(from_parts)
}

impl SuspensionMetadata {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            durable: None,
        }
    }

    /// Persist every change to `thread` in `store`.
    pub fn with_store(mut self, store: Arc<dyn ThreadStore>, thread: ThreadRef) -> Self {
        self.durable = Some(Durable { store, thread });
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Replaces any record for `tool_name` of the same kind on the latest
    /// assistant message, then persists.
    ///
    /// Returns `false` when the conversation has no assistant message.
    pub async fn write(&self, tool_name: &str, record: SuspensionRecord) -> bool {
        let kind = record.kind;
        let written = self
            .conversation
            .write(|list| {
                list.update_last_assistant(|message| {
                    map_for(&mut message.metadata, kind)
                        .get_or_insert_with(BTreeMap::new)
                        .insert(tool_name.to_string(), record);
                })
            })
            .await
            .is_some();

        if !written {
            tracing::warn!(
                tool = %tool_name,
                kind = %kind,
                "No assistant message to attach suspension record to"
            );
            return false;
        }

        self.flush().await;
        true
    }

    /// Deletes the newest record for `tool_name` from the metadata map (dropping
    /// the map once empty) and from inline parts, then persists.
    pub async fn remove(&self, tool_name: &str, kind: SuspensionKind) -> Option<SuspensionRecord> {
        let removed = self
            .conversation
            .write(|list| {
                list.update_first_assistant_matching(|message| {
                    remove_from(message, tool_name, kind)
                })
            })
            .await;

        if removed.is_some() {
            tracing::debug!(tool = %tool_name, kind = %kind, "Removed suspension record");
            self.flush().await;
        }
        removed
    }

    pub async fn find(&self, tool_name: &str, kind: SuspensionKind) -> Option<SuspensionRecord> {
        self.conversation
            .read(|list| {
                list.assistants_rev()
                    .find_map(|message| find_in(message, tool_name, kind))
            })
            .await
    }

    /// Run id of the newest record of either kind for `tool_name`.
    pub async fn recover_run_id(&self, tool_name: &str) -> Option<String> {
        self.conversation
            .read(|list| {
                list.assistants_rev().find_map(|message| {
                    find_in(message, tool_name, SuspensionKind::Suspension)
                        .or_else(|| find_in(message, tool_name, SuspensionKind::Approval))
                        .map(|r| r.run_id)
                })
            })
            .await
    }

    /// Live records on the latest assistant message.
    pub async fn pending(&self) -> Vec<SuspensionRecord> {
        self.conversation
            .read(|list| {
                let Some(message) = list.last_assistant() else {
                    return Vec::new();
                };
                let mut records: Vec<SuspensionRecord> = [
                    SuspensionKind::Approval,
                    SuspensionKind::Suspension,
                ]
                .into_iter()
                .filter_map(|kind| map_ref(&message.metadata, kind))
                .flat_map(|m| m.values().cloned())
                .collect();
                records.extend(message.parts.iter().filter_map(|p| match p {
                    MessagePart::ToolApproval { record } | MessagePart::ToolSuspended { record } => {
                        Some(record.clone())
                    }
                    _ => None,
                }));
                records
            })
            .await
    }

    /// Flushes unsaved messages. Failures are logged, never returned.
    pub async fn flush(&self) {
        let Some(durable) = &self.durable else {
            return;
        };
        if let Err(e) =
            flush_messages(durable.store.as_ref(), &self.conversation, &durable.thread).await
        {
            tracing::warn!(
                thread_id = %durable.thread.thread_id,
                error = %e,
                "Failed to persist suspension metadata"
            );
        }
    }
}
