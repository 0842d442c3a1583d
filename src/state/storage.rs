//! State storage implementation
//!
//! This module persists the `conversation -> current step` map of a bot.
//! Values are opaque step ids; the flow engine is the only writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::locks::ConversationLocks;
use crate::config::{RedisConfig, Settings, StorageBackend};
use crate::utils::errors::{FlowBotError, Result};

/// Durable `conversation id -> step id` map owned by one bot
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, conversation_id: i64) -> Result<Option<String>>;

    /// Insert or replace the step id of a conversation
    async fn put(&self, conversation_id: i64, step_id: &str) -> Result<()>;

    /// Remove the entry, returning whether it existed
    async fn remove(&self, conversation_id: i64) -> Result<bool>;

    /// Conversations that currently have an active step
    async fn conversations(&self) -> Result<Vec<i64>>;
}

/// Open the configured store for a bot account
pub async fn open_state_store(settings: &Settings, account_id: i64) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match settings.storage.backend {
        StorageBackend::File => {
            let dir = settings.db_dir().join(account_id.to_string());
            Arc::new(FileStateStore::open(dir).await?)
        }
        StorageBackend::Redis => {
            let store = RedisStateStore::new(settings.storage.redis.clone(), account_id).await?;
            store.test_connection().await?;
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!(account_id = account_id, "Using in-memory state store, flow progress will not survive restarts");
            Arc::new(MemoryStateStore::new())
        }
    };
    info!(account_id = account_id, store = ?store, "Conversation state store ready");
    Ok(store)
}

/// Non-durable store for tests and throwaway bots
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<i64, String>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, conversation_id: i64) -> Result<Option<String>> {
        Ok(self.entries.get(&conversation_id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, conversation_id: i64, step_id: &str) -> Result<()> {
        self.entries.insert(conversation_id, step_id.to_string());
        Ok(())
    }

    async fn remove(&self, conversation_id: i64) -> Result<bool> {
        Ok(self.entries.remove(&conversation_id).is_some())
    }

    async fn conversations(&self) -> Result<Vec<i64>> {
        Ok(self.entries.iter().map(|entry| *entry.key()).collect())
    }
}

const FILE_FORMAT_VERSION: u32 = 1;

/// On-disk record of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredStep {
    version: u32,
    step: String,
    updated_at: DateTime<Utc>,
}

/// JSON file store, one directory per bot account and one file per
/// conversation.
///
/// Every change rewrites only the conversation's own file through a temporary
/// sibling and a rename, so a crash leaves either the old or the new record on
/// disk. Writes of one conversation are serialized by a per-conversation
/// lock; different conversations never wait for each other.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    entries: DashMap<i64, StoredStep>,
    locks: ConversationLocks,
}

impl FileStateStore {
    /// Open (or create) the store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let entries = DashMap::new();
        let mut listing = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(conversation_id) = conversation_of(&path) else {
                debug!(path = %path.display(), "Skipping unrelated file in state directory");
                continue;
            };

            let bytes = tokio::fs::read(&path).await?;
            let stored: StoredStep = serde_json::from_slice(&bytes)?;
            if stored.version != FILE_FORMAT_VERSION {
                return Err(FlowBotError::Storage(format!(
                    "Unsupported state file version {} in {}",
                    stored.version,
                    path.display()
                )));
            }
            entries.insert(conversation_id, stored);
        }
        debug!(dir = %dir.display(), entries = entries.len(), "Loaded conversation state");

        Ok(Self {
            dir,
            entries,
            locks: ConversationLocks::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, conversation_id: i64) -> PathBuf {
        self.dir.join(format!("{}.json", conversation_id))
    }

    async fn write_record(&self, conversation_id: i64, stored: &StoredStep) -> Result<()> {
        let path = self.record_path(conversation_id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(stored)?;

        let written = async {
            tokio::fs::write(&tmp, data).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temporary state file");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }
}

/// Conversation id encoded in a record file name such as `-1001.json`
fn conversation_of(path: &Path) -> Option<i64> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, conversation_id: i64) -> Result<Option<String>> {
        Ok(self
            .entries
            .get(&conversation_id)
            .map(|entry| entry.value().step.clone()))
    }

    async fn put(&self, conversation_id: i64, step_id: &str) -> Result<()> {
        let _guard = self.locks.lock(conversation_id).await;
        let stored = StoredStep {
            version: FILE_FORMAT_VERSION,
            step: step_id.to_string(),
            updated_at: Utc::now(),
        };
        // Memory only follows a successful write.
        self.write_record(conversation_id, &stored).await?;
        self.entries.insert(conversation_id, stored);
        Ok(())
    }

    async fn remove(&self, conversation_id: i64) -> Result<bool> {
        let _guard = self.locks.lock(conversation_id).await;
        if !self.entries.contains_key(&conversation_id) {
            return Ok(false);
        }
        match tokio::fs::remove_file(self.record_path(conversation_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.entries.remove(&conversation_id);
        Ok(true)
    }

    async fn conversations(&self) -> Result<Vec<i64>> {
        Ok(self.entries.iter().map(|entry| *entry.key()).collect())
    }
}

/// Redis-based state store
#[derive(Clone)]
pub struct RedisStateStore {
    /// Redis connection manager
    connection_manager: redis::aio::ConnectionManager,
    /// Redis configuration
    config: RedisConfig,
    account_id: i64,
}

impl RedisStateStore {
    /// Create a new Redis store for one bot account
    pub async fn new(config: RedisConfig, account_id: i64) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection_manager = redis::aio::ConnectionManager::new(client).await?;

        Ok(Self {
            connection_manager,
            config,
            account_id,
        })
    }

    /// Get the Redis key for a conversation's step
    fn get_state_key(&self, conversation_id: i64) -> String {
        state_key(&self.config.prefix, self.account_id, conversation_id)
    }

    /// Test Redis connection
    pub async fn test_connection(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStateStore")
            .field("config", &self.config)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, conversation_id: i64) -> Result<Option<String>> {
        let key = self.get_state_key(conversation_id);
        let mut conn = self.connection_manager.clone();
        let step: Option<String> = conn.get(&key).await?;
        debug!(conversation_id = conversation_id, key = %key, found = step.is_some(), "Redis GET state");
        Ok(step)
    }

    async fn put(&self, conversation_id: i64, step_id: &str) -> Result<()> {
        let key = self.get_state_key(conversation_id);
        let mut conn = self.connection_manager.clone();
        conn.set::<_, _, ()>(&key, step_id).await?;
        Ok(())
    }

    async fn remove(&self, conversation_id: i64) -> Result<bool> {
        let key = self.get_state_key(conversation_id);
        let mut conn = self.connection_manager.clone();
        let deleted: u32 = conn.del(&key).await?;
        Ok(deleted > 0)
    }

    async fn conversations(&self) -> Result<Vec<i64>> {
        let prefix = key_prefix(&self.config.prefix, self.account_id);
        let mut conn = self.connection_manager.clone();

        // The cursor borrows the connection, so collect before parsing.
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn.scan_match(format!("{}*", prefix)).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| parse_state_key(&prefix, key))
            .collect())
    }
}

fn key_prefix(prefix: &str, account_id: i64) -> String {
    format!("{}{}:reply_state:", prefix, account_id)
}

fn state_key(prefix: &str, account_id: i64, conversation_id: i64) -> String {
    format!("{}{}", key_prefix(prefix, account_id), conversation_id)
}

/// Conversation id of a key produced by [`state_key`] under `key_prefix`
fn parse_state_key(key_prefix: &str, key: &str) -> Option<i64> {
    key.strip_prefix(key_prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_store_put_get_remove() {
        let store = MemoryStateStore::new();
        assert_eq!(store.get(1).await.unwrap(), None);

        store.put(1, "flow/a").await.unwrap();
        store.put(1, "flow/b").await.unwrap();
        assert_eq!(store.get(1).await.unwrap().as_deref(), Some("flow/b"));

        assert!(store.remove(1).await.unwrap());
        assert!(!store.remove(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/db/1234567890");

        {
            let store = FileStateStore::open(&path).await.unwrap();
            store.put(10, "set_reply/s1").await.unwrap();
            store.put(-20, "greet/ask").await.unwrap();
            store.put(10, "set_reply/s2").await.unwrap();
            assert!(store.remove(-20).await.unwrap());
        }

        let reopened = FileStateStore::open(&path).await.unwrap();
        assert_eq!(reopened.get(10).await.unwrap().as_deref(), Some("set_reply/s2"));
        assert_eq!(reopened.get(-20).await.unwrap(), None);
        assert_eq!(reopened.conversations().await.unwrap(), vec![10]);
        assert!(path.join("10.json").is_file());
        assert!(!path.join("-20.json").exists());
        assert!(!path.join("10.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("7.json"),
            r#"{"version": 99, "step": "a/b", "updated_at": "2024-01-01T00:00:00Z"}"#,
        )
        .await
        .unwrap();

        assert!(matches!(
            FileStateStore::open(dir.path()).await,
            Err(FlowBotError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_ignores_unrelated_entries() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "hi").await.unwrap();
        tokio::fs::write(dir.path().join("3.json.tmp"), "{").await.unwrap();
        tokio::fs::create_dir(dir.path().join("4.json")).await.unwrap();

        let store = FileStateStore::open(dir.path()).await.unwrap();
        assert!(store.conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_conversations_write_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).await.unwrap();

        let _busy = store.locks.lock(1).await;
        let other = tokio::time::timeout(Duration::from_millis(300), store.put(2, "flow/x")).await;
        assert!(other.is_ok());
        assert_eq!(store.get(2).await.unwrap().as_deref(), Some("flow/x"));

        let same = tokio::time::timeout(Duration::from_millis(100), store.put(1, "flow/x")).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).await.unwrap();
        store.put(2, "flow/kept").await.unwrap();

        // A directory in the record's place makes the rename fail.
        tokio::fs::create_dir(dir.path().join("1.json")).await.unwrap();
        assert!(store.put(1, "flow/x").await.is_err());

        assert_eq!(store.get(1).await.unwrap(), None);
        assert_eq!(store.conversations().await.unwrap(), vec![2]);
        assert!(!dir.path().join("1.json.tmp").exists());

        let reopened = FileStateStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(1).await.unwrap(), None);
        assert_eq!(reopened.get(2).await.unwrap().as_deref(), Some("flow/kept"));
    }

    #[tokio::test]
    async fn test_open_state_store_uses_account_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.app.data_root = dir.path().to_path_buf();

        let store = open_state_store(&settings, 42).await.unwrap();
        store.put(1, "flow/step").await.unwrap();

        assert!(dir.path().join("data/db/42/1.json").is_file());
    }

    #[test]
    fn test_redis_keys_are_scoped_per_account() {
        let key = state_key("flowbot:", 42, -1001);
        assert_eq!(key, "flowbot:42:reply_state:-1001");

        let prefix = key_prefix("flowbot:", 42);
        assert_eq!(parse_state_key(&prefix, &key), Some(-1001));
        assert_eq!(parse_state_key(&key_prefix("flowbot:", 43), &key), None);
        assert_eq!(parse_state_key(&prefix, "flowbot:42:reply_state:abc"), None);
    }

    /// Needs a live server; set `FLOWBOT_TEST_REDIS_URL` to run it
    #[tokio::test]
    async fn test_redis_store_round_trip() {
        let Ok(url) = std::env::var("FLOWBOT_TEST_REDIS_URL") else {
            return;
        };
        let config = RedisConfig {
            url,
            prefix: format!("flowbot_test_{}:", std::process::id()),
        };
        let store = RedisStateStore::new(config, 7).await.unwrap();
        store.test_connection().await.unwrap();

        store.put(1, "flow/a").await.unwrap();
        store.put(2, "flow/b").await.unwrap();
        let mut conversations = store.conversations().await.unwrap();
        conversations.sort();
        assert_eq!(conversations, vec![1, 2]);

        assert!(store.remove(1).await.unwrap());
        assert!(store.remove(2).await.unwrap());
        assert!(store.conversations().await.unwrap().is_empty());
    }
}
