//! Thread store backends.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::conversation::{Conversation, StoredMessage};
use super::{StoreResult, Thread, ThreadRef};
use crate::agent::RunSnapshot;

/// Durable storage for threads, their messages and parked runs.
#[async_trait::async_trait]
pub trait ThreadStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get_thread(&self, thread_id: &str) -> StoreResult<Option<Thread>>;

    async fn create_thread(&self, thread: &ThreadRef) -> StoreResult<Thread>;

    /// Upserts messages by id.
    async fn save_messages(&self, thread_id: &str, messages: &[StoredMessage]) -> StoreResult<()>;

    async fn load_messages(&self, thread_id: &str) -> StoreResult<Vec<StoredMessage>>;

    async fn save_snapshot(&self, snapshot: &RunSnapshot) -> StoreResult<()>;

    async fn load_snapshot(&self, run_id: &str) -> StoreResult<Option<RunSnapshot>>;

    async fn delete_snapshot(&self, run_id: &str) -> StoreResult<bool>;
}

/// Writes every unsaved message of `conversation` to `thread`, creating the
/// thread first when the store does not know it yet.
///
/// Messages that fail to save stay marked unsaved for the next flush.
pub async fn flush_messages(
    store: &dyn ThreadStore,
    conversation: &Conversation,
    thread: &ThreadRef,
) -> StoreResult<usize> {
    if store.get_thread(&thread.thread_id).await?.is_none() {
        store.create_thread(thread).await?;
        tracing::debug!(thread_id = %thread.thread_id, store = store.name(), "Created thread");
    }

    let pending = conversation.write(|list| list.drain_unsaved()).await;
    if pending.is_empty() {
        return Ok(0);
    }

    match store.save_messages(&thread.thread_id, &pending).await {
        Ok(()) => Ok(pending.len()),
        Err(e) => {
            conversation
                .write(|list| list.mark_unsaved(pending.iter().map(|m| m.message.id.clone())))
                .await;
            Err(e)
        }
    }
}

pub(crate) fn upsert_messages(target: &mut Vec<StoredMessage>, messages: &[StoredMessage]) {
    for message in messages {
        match target
            .iter_mut()
            .find(|m| m.message.id == message.message.id)
        {
            Some(existing) => *existing = message.clone(),
            None => target.push(message.clone()),
        }
    }
}

/// In-memory store (for testing and single-process deployments)
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: Arc<RwLock<HashMap<String, Thread>>>,
    messages: Arc<RwLock<HashMap<String, Vec<StoredMessage>>>>,
    snapshots: Arc<RwLock<HashMap<String, RunSnapshot>>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait::async_trait]
impl ThreadStore for MemoryThreadStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_thread(&self, thread_id: &str) -> StoreResult<Option<Thread>> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn create_thread(&self, thread: &ThreadRef) -> StoreResult<Thread> {
        let mut threads = self.threads.write().await;
        let created = threads
            .entry(thread.thread_id.clone())
            .or_insert_with(|| Thread::new(thread));
        Ok(created.clone())
    }

    async fn save_messages(&self, thread_id: &str, messages: &[StoredMessage]) -> StoreResult<()> {
        let mut stored = self.messages.write().await;
        upsert_messages(stored.entry(thread_id.to_string()).or_default(), messages);
        if let Some(thread) = self.threads.write().await.get_mut(thread_id) {
            thread.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn load_messages(&self, thread_id: &str) -> StoreResult<Vec<StoredMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_snapshot(&self, snapshot: &RunSnapshot) -> StoreResult<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, run_id: &str) -> StoreResult<Option<RunSnapshot>> {
        Ok(self.snapshots.read().await.get(run_id).cloned())
    }

    async fn delete_snapshot(&self, run_id: &str) -> StoreResult<bool> {
        Ok(self.snapshots.write().await.remove(run_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, MessagePart, MessageSource};

    #[tokio::test]
    async fn test_flush_creates_thread_and_saves_changes() {
        let store = MemoryThreadStore::new();
        let conversation = Conversation::new();
        let thread = ThreadRef::new("t1").with_resource("user-1");

        conversation
            .add([Message::user("hi")], MessageSource::Input)
            .await;
        let saved = flush_messages(&store, &conversation, &thread).await.unwrap();
        assert_eq!(saved, 1);
        assert_eq!(store.thread_count().await, 1);

        let again = flush_messages(&store, &conversation, &thread).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_save_messages_upserts() {
        let store = MemoryThreadStore::new();
        let first = StoredMessage::new(
            Message::assistant(vec![MessagePart::text("a")]).with_id("m1"),
            MessageSource::Response,
        );
        let mut second = first.clone();
        second.message.parts = vec![MessagePart::text("b")];

        store.save_messages("t1", &[first]).await.unwrap();
        store.save_messages("t1", &[second]).await.unwrap();

        let loaded = store.load_messages("t1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].message.text(), "b");
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl ThreadStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }
        async fn get_thread(&self, _: &str) -> StoreResult<Option<Thread>> {
            Ok(None)
        }
        async fn create_thread(&self, thread: &ThreadRef) -> StoreResult<Thread> {
            Ok(Thread::new(thread))
        }
        async fn save_messages(&self, _: &str, _: &[StoredMessage]) -> StoreResult<()> {
            Err(crate::session::StoreError::Storage {
                message: "disk full".into(),
            })
        }
        async fn load_messages(&self, _: &str) -> StoreResult<Vec<StoredMessage>> {
            Ok(Vec::new())
        }
        async fn save_snapshot(&self, _: &RunSnapshot) -> StoreResult<()> {
            Ok(())
        }
        async fn load_snapshot(&self, _: &str) -> StoreResult<Option<RunSnapshot>> {
            Ok(None)
        }
        async fn delete_snapshot(&self, _: &str) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_messages_unsaved() {
        let conversation = Conversation::new();
        conversation
            .add([Message::user("hi")], MessageSource::Input)
            .await;

        let result = flush_messages(&FailingStore, &conversation, &ThreadRef::new("t1")).await;
        assert!(result.is_err());
        assert!(conversation.read(|list| list.has_unsaved()).await);
    }
}
