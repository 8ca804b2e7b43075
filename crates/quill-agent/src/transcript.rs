//! Durable transcript storage
//!
//! Every persist writes a full snapshot of the conversation, then records a
//! checkpoint so earlier states stay recoverable. The snapshot write must
//! succeed; the checkpoint is best-effort.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::conversation::Conversation;
use crate::error::{Error, Result};

const SNAPSHOT_EXT: &str = "json";
const HISTORY_SUFFIX: &str = ".history.jsonl";
const PREVIEW_CHARS: usize = 80;

/// Ids name a single file in the store directory: no separators, no leading dot
fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty() || id.starts_with('.') || id.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Storage for conversation snapshots and their checkpoint history
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read the current snapshot, `None` if it does not exist
    async fn read(&self, id: &str) -> io::Result<Option<Vec<u8>>>;

    /// Atomically replace the snapshot for `id`
    async fn write_snapshot(&self, id: &str, data: &[u8]) -> io::Result<()>;

    /// Record one historical checkpoint for `id`
    async fn record_checkpoint(&self, id: &str, entry: &[u8]) -> io::Result<CheckpointOutcome>;

    /// Ids of every stored conversation
    async fn list(&self) -> io::Result<Vec<String>>;
}

/// How checkpoints are recorded by [`FsBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    /// No history is kept
    Off,
    /// Append each snapshot to `<id>.history.jsonl`
    Log,
    /// Commit each snapshot to a git repository in the conversations directory
    #[default]
    Git,
}

/// Result of the best-effort checkpoint step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Recorded,
    Disabled,
    Failed(String),
}

/// Result of a persist call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Nothing to save
    Empty,
    /// Snapshot written
    Saved { checkpoint: CheckpointOutcome },
}

/// Summary of a stored conversation for listings
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub turn_count: usize,
    pub preview: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointEntry<'a> {
    saved_at: DateTime<Utc>,
    conversation: &'a Conversation,
}

/// Loads and persists conversations through a [`Backend`]
#[derive(Clone)]
pub struct TranscriptStore {
    backend: Arc<dyn Backend>,
}

impl TranscriptStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Store conversations as JSON files under `dir`
    pub fn filesystem(dir: impl Into<PathBuf>, checkpoints: CheckpointMode) -> Self {
        Self::new(Arc::new(FsBackend::new(dir, checkpoints)))
    }

    /// Load a conversation by id
    pub async fn load(&self, id: &str) -> Result<Conversation> {
        validate_id(id)?;
        let data = self
            .backend
            .read(id)
            .await
            .map_err(|e| Error::persistence(id, e))?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        serde_json::from_slice(&data).map_err(|source| Error::Corrupt {
            id: id.to_string(),
            source,
        })
    }

    /// Write a full snapshot of `conversation`, then record a checkpoint
    pub async fn persist(&self, conversation: &Conversation) -> Result<PersistOutcome> {
        if conversation.is_empty() {
            return Ok(PersistOutcome::Empty);
        }

        let id = &conversation.id;
        validate_id(id)?;
        let snapshot =
            serde_json::to_vec_pretty(conversation).map_err(|source| Error::encoding(id, source))?;
        self.backend
            .write_snapshot(id, &snapshot)
            .await
            .map_err(|e| Error::persistence(id, e))?;

        let checkpoint = self.checkpoint(conversation).await;
        if let CheckpointOutcome::Failed(reason) = &checkpoint {
            tracing::warn!(%id, %reason, "checkpoint not recorded");
        }

        Ok(PersistOutcome::Saved { checkpoint })
    }

    async fn checkpoint(&self, conversation: &Conversation) -> CheckpointOutcome {
        let entry = CheckpointEntry {
            saved_at: Utc::now(),
            conversation,
        };
        let line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(e) => return CheckpointOutcome::Failed(e.to_string()),
        };

        match self.backend.record_checkpoint(&conversation.id, &line).await {
            Ok(outcome) => outcome,
            Err(e) => CheckpointOutcome::Failed(e.to_string()),
        }
    }

    /// Pretty JSON of the stored record
    pub async fn export(&self, id: &str) -> Result<String> {
        let conversation = self.load(id).await?;
        serde_json::to_string_pretty(&conversation).map_err(|source| Error::encoding(id, source))
    }

    /// All readable conversations, oldest first
    pub async fn list(&self) -> Result<Vec<ConversationInfo>> {
        let mut ids = self
            .backend
            .list()
            .await
            .map_err(|e| Error::persistence("*", e))?;
        ids.sort();

        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&id).await {
                Ok(conversation) => infos.push(ConversationInfo {
                    preview: conversation.preview(PREVIEW_CHARS),
                    turn_count: conversation.len(),
                    created_at: conversation.created_at,
                    id: conversation.id,
                }),
                Err(e) => tracing::warn!(%id, "skipping unreadable conversation: {}", e),
            }
        }
        Ok(infos)
    }
}

// --- Filesystem backend ---

/// One `<id>.json` file per conversation in a directory
pub struct FsBackend {
    dir: PathBuf,
    checkpoints: CheckpointMode,
}

impl FsBackend {
    pub fn new(dir: impl Into<PathBuf>, checkpoints: CheckpointMode) -> Self {
        Self {
            dir: dir.into(),
            checkpoints,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, SNAPSHOT_EXT))
    }

    fn history_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, HISTORY_SUFFIX))
    }

    async fn append_history(&self, id: &str, entry: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path(id))
            .await?;
        let mut line = entry.to_vec();
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await
    }

    async fn commit(&self, id: &str) -> io::Result<()> {
        if !self.dir.join(".git").exists() {
            git(&self.dir, &["init"]).await?;
        }
        let file = format!("{}.{}", id, SNAPSHOT_EXT);
        git(&self.dir, &["add", &file]).await?;
        git(&self.dir, &["commit", "-m", &format!("Update {}", id)]).await
    }
}

async fn git(dir: &Path, args: &[&str]) -> io::Result<()> {
    let status = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "git {} exited with {}",
            args.first().unwrap_or(&""),
            status
        )))
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn read(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.snapshot_path(id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_snapshot(&self, id: &str, data: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.snapshot_path(id);
        let tmp = self.dir.join(format!(".{}.{}.tmp", id, SNAPSHOT_EXT));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        // Contents must be durable before the rename makes them visible
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await
    }

    async fn record_checkpoint(&self, id: &str, entry: &[u8]) -> io::Result<CheckpointOutcome> {
        match self.checkpoints {
            CheckpointMode::Off => return Ok(CheckpointOutcome::Disabled),
            CheckpointMode::Log => self.append_history(id, entry).await?,
            CheckpointMode::Git => self.commit(id).await?,
        }
        Ok(CheckpointOutcome::Recorded)
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }
}

// --- In-memory backend ---

/// Backend kept entirely in memory, with switches for simulating failures
#[derive(Default)]
pub struct MemoryBackend {
    snapshots: Mutex<HashMap<String, Vec<u8>>>,
    history: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    fail_snapshots: AtomicBool,
    fail_checkpoints: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent snapshot writes fail
    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent checkpoint writes fail
    pub fn fail_checkpoints(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }

    /// Number of checkpoints recorded for `id`
    pub fn checkpoint_count(&self, id: &str) -> usize {
        self.history.lock().get(id).map_or(0, Vec::len)
    }

    /// Store raw bytes as the snapshot for `id`
    pub fn insert_raw(&self, id: &str, data: impl Into<Vec<u8>>) {
        self.snapshots.lock().insert(id.to_string(), data.into());
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn read(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.snapshots.lock().get(id).cloned())
    }

    async fn write_snapshot(&self, id: &str, data: &[u8]) -> io::Result<()> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(io::Error::other("snapshot write refused"));
        }
        self.snapshots.lock().insert(id.to_string(), data.to_vec());
        Ok(())
    }

    async fn record_checkpoint(&self, id: &str, entry: &[u8]) -> io::Result<CheckpointOutcome> {
        if self.fail_checkpoints.load(Ordering::SeqCst) {
            return Err(io::Error::other("checkpoint log unavailable"));
        }
        self.history
            .lock()
            .entry(id.to_string())
            .or_default()
            .push(entry.to_vec());
        Ok(CheckpointOutcome::Recorded)
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.snapshots.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ai::Turn;

    fn sample(id: &str) -> Conversation {
        Conversation::with_id(id).with_turns(vec![Turn::user("hello"), Turn::assistant("hi")])
    }

    fn memory_store() -> (Arc<MemoryBackend>, TranscriptStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), TranscriptStore::new(backend))
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let (backend, store) = memory_store();
        let conv = sample("20250101000000");

        let outcome = store.persist(&conv).await.unwrap();
        assert_eq!(
            outcome,
            PersistOutcome::Saved {
                checkpoint: CheckpointOutcome::Recorded
            }
        );
        assert_eq!(store.load(&conv.id).await.unwrap(), conv);
        assert_eq!(backend.checkpoint_count(&conv.id), 1);
    }

    #[tokio::test]
    async fn test_each_persist_records_a_checkpoint() {
        let (backend, store) = memory_store();
        let conv = sample("a");
        store.persist(&conv).await.unwrap();
        let mut turns = conv.turns.clone();
        turns.push(Turn::user("more"));
        store.persist(&conv.with_turns(turns)).await.unwrap();

        assert_eq!(backend.checkpoint_count("a"), 2);
        assert_eq!(store.load("a").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_persist_empty_is_noop() {
        let (backend, store) = memory_store();
        let conv = Conversation::with_id("empty");

        assert_eq!(store.persist(&conv).await.unwrap(), PersistOutcome::Empty);
        assert!(matches!(store.load("empty").await, Err(Error::NotFound(_))));
        assert_eq!(backend.checkpoint_count("empty"), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_does_not_fail_persist() {
        let (backend, store) = memory_store();
        backend.fail_checkpoints(true);
        let conv = sample("b");

        let outcome = store.persist(&conv).await.unwrap();
        assert!(matches!(
            outcome,
            PersistOutcome::Saved {
                checkpoint: CheckpointOutcome::Failed(_)
            }
        ));
        assert_eq!(store.load("b").await.unwrap(), conv);
    }

    #[tokio::test]
    async fn test_snapshot_failure_propagates() {
        let (backend, store) = memory_store();
        backend.fail_snapshots(true);

        let err = store.persist(&sample("c")).await.unwrap_err();
        assert!(matches!(err, Error::Persistence { ref id, .. } if id == "c"));
        assert_eq!(backend.checkpoint_count("c"), 0);
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt() {
        let (backend, store) = memory_store();
        assert!(matches!(store.load("nope").await, Err(Error::NotFound(id)) if id == "nope"));

        backend.insert_raw("bad", "{ not json");
        assert!(matches!(store.load("bad").await, Err(Error::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_rejects_ids_outside_the_store() {
        let (backend, store) = memory_store();
        backend.insert_raw("../secret", "{}");

        for id in ["../secret", "a/b", "a\\b", "..", ".hidden", ""] {
            assert!(
                matches!(store.load(id).await, Err(Error::InvalidId(ref got)) if got == id),
                "load accepted {:?}",
                id
            );
            assert!(matches!(store.export(id).await, Err(Error::InvalidId(_))));
        }

        let err = store.persist(&sample("../escape")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidId(ref id) if id == "../escape"));
        assert_eq!(backend.checkpoint_count("../escape"), 0);

        // Ordinary ids with dots are still fine
        store.persist(&sample("2025.01.01")).await.unwrap();
        assert_eq!(store.load("2025.01.01").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fs_backend_does_not_read_outside_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("conversations");
        std::fs::create_dir_all(&dir).unwrap();
        let outside = serde_json::to_vec(&sample("outside")).unwrap();
        std::fs::write(root.path().join("outside.json"), outside).unwrap();

        let store = TranscriptStore::filesystem(&dir, CheckpointMode::Off);
        assert!(matches!(
            store.load("../outside").await,
            Err(Error::InvalidId(_))
        ));

        let err = store.persist(&sample("../written")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidId(_)));
        assert!(!root.path().join("written.json").exists());
    }

    #[tokio::test]
    async fn test_list_sorted_and_skips_corrupt() {
        let (backend, store) = memory_store();
        store.persist(&sample("20250102000000")).await.unwrap();
        store.persist(&sample("20250101000000")).await.unwrap();
        backend.insert_raw("20250103000000", "garbage");

        let infos = store.list().await.unwrap();
        let ids: Vec<_> = infos.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["20250101000000", "20250102000000"]);
        assert_eq!(infos[0].turn_count, 2);
        assert_eq!(infos[0].preview.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_fs_backend_log_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::filesystem(dir.path(), CheckpointMode::Log);
        let conv = sample("20250101000000");

        store.persist(&conv).await.unwrap();
        store.persist(&conv).await.unwrap();

        let snapshot = std::fs::read_to_string(dir.path().join("20250101000000.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(parsed["id"], "20250101000000");
        assert_eq!(parsed["turns"][1]["content"], "hi");

        let history =
            std::fs::read_to_string(dir.path().join("20250101000000.history.jsonl")).unwrap();
        let lines: Vec<_> = history.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert!(entry["savedAt"].is_string());
        assert_eq!(entry["conversation"]["turns"][0]["content"], "hello");

        assert_eq!(store.load("20250101000000").await.unwrap(), conv);
    }

    #[tokio::test]
    async fn test_fs_backend_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::filesystem(dir.path(), CheckpointMode::Off);
        let outcome = store.persist(&sample("x")).await.unwrap();
        assert_eq!(
            outcome,
            PersistOutcome::Saved {
                checkpoint: CheckpointOutcome::Disabled
            }
        );

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.json".to_string()]);
    }

    #[tokio::test]
    async fn test_fs_backend_snapshot_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path(), CheckpointMode::Off);

        backend.write_snapshot("s", b"first").await.unwrap();
        backend.write_snapshot("s", b"second").await.unwrap();

        assert_eq!(backend.read("s").await.unwrap(), Some(b"second".to_vec()));
        assert!(!dir.path().join(".s.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_fs_backend_creates_directory_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("conversations");
        let store = TranscriptStore::filesystem(&nested, CheckpointMode::Log);
        assert!(store.list().await.unwrap().is_empty());

        store.persist(&sample("20250101000000")).await.unwrap();
        let infos = store.list().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "20250101000000");
    }

    #[tokio::test]
    async fn test_fs_backend_git_checkpoint_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::filesystem(dir.path(), CheckpointMode::Git);
        let conv = sample("g");

        // Whether git is installed and configured or not, the snapshot lands
        match store.persist(&conv).await.unwrap() {
            PersistOutcome::Saved { checkpoint } => {
                if checkpoint == CheckpointOutcome::Recorded {
                    assert!(dir.path().join(".git").exists());
                }
            }
            PersistOutcome::Empty => panic!("conversation was not empty"),
        }
        assert_eq!(store.load("g").await.unwrap(), conv);
    }

    #[tokio::test]
    async fn test_export_is_pretty_json() {
        let (_, store) = memory_store();
        store.persist(&sample("e")).await.unwrap();
        let json = store.export("e").await.unwrap();
        assert!(json.contains("\n  \"id\": \"e\""));
    }
}
