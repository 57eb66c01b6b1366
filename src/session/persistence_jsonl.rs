//! JSONL-based thread store.
//!
//! Each thread is an append-only JSON Lines log; parked runs are single JSON
//! documents replaced atomically.
//!
//! # File Structure
//!
//! ```text
//! {base_dir}/
//! ├── threads/
//! │   └── {thread-id}.jsonl    # thread header + message entries
//! └── runs/
//!     └── {run-id}.json        # parked run snapshot
//! ```
//!
//! Message entries are upserts: when an id appears more than once the last
//! entry wins, keeping the position of the first.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::conversation::StoredMessage;
use super::persistence::{ThreadStore, upsert_messages};
use super::{StorageResultExt, StoreError, StoreResult, Thread, ThreadRef};
use crate::agent::RunSnapshot;

/// Sync mode for file operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// No explicit sync (OS buffering only).
    #[default]
    None,
    /// Sync after every write (safest, slowest).
    OnWrite,
}

#[derive(Clone, Debug)]
pub struct JsonlConfig {
    pub base_dir: PathBuf,
    pub sync_mode: SyncMode,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(".agent-runtime"),
            sync_mode: SyncMode::default(),
        }
    }
}

impl JsonlConfig {
    pub fn builder() -> JsonlConfigBuilder {
        JsonlConfigBuilder::default()
    }

    fn threads_dir(&self) -> PathBuf {
        self.base_dir.join("threads")
    }

    fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.threads_dir()
            .join(format!("{}.jsonl", encode_file_stem(thread_id)))
    }

    fn snapshot_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir()
            .join(format!("{}.json", encode_file_stem(run_id)))
    }
}

#[derive(Default)]
pub struct JsonlConfigBuilder {
    base_dir: Option<PathBuf>,
    sync_mode: Option<SyncMode>,
}

impl JsonlConfigBuilder {
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = Some(mode);
        self
    }

    pub fn build(self) -> JsonlConfig {
        let default = JsonlConfig::default();
        JsonlConfig {
            base_dir: self.base_dir.unwrap_or(default.base_dir),
            sync_mode: self.sync_mode.unwrap_or(default.sync_mode),
        }
    }
}

/// Ids become file names. ASCII alphanumerics and `-` pass through; every
/// other byte, `_` included, is written as `_` plus two hex digits, so
/// distinct ids never share a file.
fn encode_file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonlEntry {
    Thread(Thread),
    Message(StoredMessage),
}

// File operations (blocking, run via spawn_blocking)

fn read_entries_sync(path: &Path) -> StoreResult<Vec<JsonlEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path)
        .storage_err_ctx(&format!("Failed to open {}", path.display()))?;
    let reader = BufReader::with_capacity(64 * 1024, file);
    let mut entries = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.storage_err_ctx(&format!("Read error at line {}", line_num + 1))?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonlEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    error = %e,
                    "Skipping malformed JSONL entry"
                );
            }
        }
    }

    Ok(entries)
}

fn append_entries_sync(path: &Path, entries: &[JsonlEntry], sync: bool) -> StoreResult<()> {
    if entries.is_empty() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .storage_err_ctx(&format!("Failed to create directory {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .storage_err_ctx(&format!("Failed to open {} for writing", path.display()))?;
    let mut writer = std::io::BufWriter::with_capacity(64 * 1024, file);

    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writeln!(writer)?;
    }
    writer.flush()?;

    if sync {
        writer
            .into_inner()
            .map_err(|e| StoreError::Storage {
                message: format!("Buffer error: {}", e.error()),
            })?
            .sync_all()?;
    }

    Ok(())
}

/// Writes to a sibling temp file and renames it over `path`.
fn write_atomic_sync(path: &Path, bytes: &[u8], sync: bool) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .storage_err_ctx(&format!("Failed to create directory {}", parent.display()))?;
    }

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        if sync {
            file.sync_all()?;
        }
    }
    std::fs::rename(&tmp, path)
        .storage_err_ctx(&format!("Failed to replace {}", path.display()))?;
    Ok(())
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .storage_err_ctx("Task join error")?
}

fn fold_entries(entries: Vec<JsonlEntry>) -> (Option<Thread>, Vec<StoredMessage>) {
    let mut thread = None;
    let mut messages = Vec::new();
    for entry in entries {
        match entry {
            JsonlEntry::Thread(t) => thread = Some(t),
            JsonlEntry::Message(m) => upsert_messages(&mut messages, std::slice::from_ref(&m)),
        }
    }
    (thread, messages)
}

pub struct JsonlThreadStore {
    config: JsonlConfig,
    threads: Arc<RwLock<HashMap<String, Thread>>>,
}

impl JsonlThreadStore {
    pub async fn new(config: JsonlConfig) -> StoreResult<Self> {
        tokio::fs::create_dir_all(config.threads_dir())
            .await
            .storage_err_ctx("Failed to create threads directory")?;
        tokio::fs::create_dir_all(config.runs_dir())
            .await
            .storage_err_ctx("Failed to create runs directory")?;

        Ok(Self {
            config,
            threads: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &JsonlConfig {
        &self.config
    }

    fn sync(&self) -> bool {
        self.config.sync_mode == SyncMode::OnWrite
    }

    async fn read_thread_file(&self, thread_id: &str) -> StoreResult<Vec<JsonlEntry>> {
        let path = self.config.thread_path(thread_id);
        blocking(move || read_entries_sync(&path)).await
    }

    async fn append(&self, thread_id: &str, entries: Vec<JsonlEntry>) -> StoreResult<()> {
        let path = self.config.thread_path(thread_id);
        let sync = self.sync();
        blocking(move || append_entries_sync(&path, &entries, sync)).await
    }
}

#[async_trait::async_trait]
impl ThreadStore for JsonlThreadStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn get_thread(&self, thread_id: &str) -> StoreResult<Option<Thread>> {
        if let Some(thread) = self.threads.read().await.get(thread_id) {
            return Ok(Some(thread.clone()));
        }

        let (thread, _) = fold_entries(self.read_thread_file(thread_id).await?);
        if let Some(ref t) = thread {
            self.threads
                .write()
                .await
                .insert(thread_id.to_string(), t.clone());
        }
        Ok(thread)
    }

    async fn create_thread(&self, thread: &ThreadRef) -> StoreResult<Thread> {
        if let Some(existing) = self.get_thread(&thread.thread_id).await? {
            return Ok(existing);
        }

        let created = Thread::new(thread);
        self.append(&thread.thread_id, vec![JsonlEntry::Thread(created.clone())])
            .await?;
        self.threads
            .write()
            .await
            .insert(thread.thread_id.clone(), created.clone());
        Ok(created)
    }

    async fn save_messages(&self, thread_id: &str, messages: &[StoredMessage]) -> StoreResult<()> {
        let entries = messages.iter().cloned().map(JsonlEntry::Message).collect();
        self.append(thread_id, entries).await
    }

    async fn load_messages(&self, thread_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let entries = self.read_thread_file(thread_id).await?;
        if entries.is_empty() {
            return Err(StoreError::NotFound {
                id: thread_id.to_string(),
            });
        }
        Ok(fold_entries(entries).1)
    }

    async fn save_snapshot(&self, snapshot: &RunSnapshot) -> StoreResult<()> {
        let path = self.config.snapshot_path(&snapshot.run_id);
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let sync = self.sync();
        blocking(move || write_atomic_sync(&path, &bytes, sync)).await
    }

    async fn load_snapshot(&self, run_id: &str) -> StoreResult<Option<RunSnapshot>> {
        let path = self.config.snapshot_path(run_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_snapshot(&self, run_id: &str) -> StoreResult<bool> {
        let path = self.config.snapshot_path(run_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
