//! In-process conversation state shared by the loop, the tool step and tools.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::{Message, MessageId, MessageSource, Role};

/// A message together with the source tag it was added under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub source: MessageSource,
}

impl StoredMessage {
    pub fn new(message: Message, source: MessageSource) -> Self {
        Self { message, source }
    }
}

/// Ordered message list with upsert-by-id semantics and dirty tracking.
#[derive(Debug, Default, Clone)]
pub struct MessageList {
    messages: Vec<StoredMessage>,
    unsaved: Vec<MessageId>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces messages (matched by id) and marks them unsaved.
    pub fn add(&mut self, messages: impl IntoIterator<Item = Message>, source: MessageSource) {
        for message in messages {
            let id = message.id.clone();
            match self.messages.iter_mut().find(|m| m.message.id == id) {
                Some(existing) => {
                    existing.message = message;
                    existing.source = source;
                }
                None => self.messages.push(StoredMessage::new(message, source)),
            }
            self.mark(id);
        }
    }

    /// Replaces the contents with already-persisted messages.
    pub fn restore(&mut self, messages: Vec<StoredMessage>) {
        self.messages = messages;
        self.unsaved.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn stored(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn all(&self) -> Vec<Message> {
        self.collect(|_| true)
    }

    /// Messages supplied by the caller as input.
    pub fn user(&self) -> Vec<Message> {
        self.collect(|m| m.source == MessageSource::Input)
    }

    pub fn non_user(&self) -> Vec<Message> {
        self.collect(|m| m.source != MessageSource::Input)
    }

    pub fn response(&self) -> Vec<Message> {
        self.collect(|m| m.source == MessageSource::Response)
    }

    pub fn response_len(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.source == MessageSource::Response)
            .count()
    }

    /// Everything the model may see: cross-agent context is excluded.
    pub fn model_input(&self) -> Vec<Message> {
        self.collect(|m| m.source != MessageSource::Context)
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .map(|m| &m.message)
            .find(|m| m.role == Role::Assistant)
    }

    /// Assistant messages, newest first.
    pub fn assistants_rev(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .rev()
            .map(|m| &m.message)
            .filter(|m| m.role == Role::Assistant)
    }

    /// Applies `f` to the newest assistant message, marking it unsaved.
    pub fn update_last_assistant<R>(&mut self, f: impl FnOnce(&mut Message) -> R) -> Option<R> {
        let idx = self
            .messages
            .iter()
            .rposition(|m| m.message.role == Role::Assistant)?;
        let result = f(&mut self.messages[idx].message);
        let id = self.messages[idx].message.id.clone();
        self.mark(id);
        Some(result)
    }

    /// Walks assistant messages newest first and stops at the first one `f`
    /// reports as changed. That message is marked unsaved.
    pub fn update_first_assistant_matching<R>(
        &mut self,
        mut f: impl FnMut(&mut Message) -> Option<R>,
    ) -> Option<R> {
        let mut hit = None;
        for stored in self.messages.iter_mut().rev() {
            if stored.message.role != Role::Assistant {
                continue;
            }
            if let Some(result) = f(&mut stored.message) {
                hit = Some((stored.message.id.clone(), result));
                break;
            }
        }
        let (id, result) = hit?;
        self.mark(id);
        Some(result)
    }

    /// Takes every message changed since the last drain, in list order.
    pub fn drain_unsaved(&mut self) -> Vec<StoredMessage> {
        if self.unsaved.is_empty() {
            return Vec::new();
        }
        let pending: HashSet<MessageId> = self.unsaved.drain(..).collect();
        self.messages
            .iter()
            .filter(|m| pending.contains(&m.message.id))
            .cloned()
            .collect()
    }

    pub fn mark_unsaved(&mut self, ids: impl IntoIterator<Item = MessageId>) {
        for id in ids {
            self.mark(id);
        }
    }

    pub fn has_unsaved(&self) -> bool {
        !self.unsaved.is_empty()
    }

    fn mark(&mut self, id: MessageId) {
        if !self.unsaved.contains(&id) {
            self.unsaved.push(id);
        }
    }

    fn collect(&self, keep: impl Fn(&StoredMessage) -> bool) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| keep(m))
            .map(|m| m.message.clone())
            .collect()
    }
}

/// Shared handle to a [`MessageList`].
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    inner: Arc<RwLock<MessageList>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut list = MessageList::new();
        list.add(messages, MessageSource::Input);
        Self {
            inner: Arc::new(RwLock::new(list)),
        }
    }

    pub async fn add(&self, messages: impl IntoIterator<Item = Message>, source: MessageSource) {
        self.inner.write().await.add(messages, source);
    }

    pub async fn all(&self) -> Vec<Message> {
        self.inner.read().await.all()
    }

    pub async fn model_input(&self) -> Vec<Message> {
        self.inner.read().await.model_input()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&MessageList) -> R) -> R {
        f(&*self.inner.read().await)
    }

    pub async fn write<R>(&self, f: impl FnOnce(&mut MessageList) -> R) -> R {
        f(&mut *self.inner.write().await)
    }
}
