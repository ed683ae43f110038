//! Message records and their persistence.
//!
//! Records are serialized as JSON and kept in a [`KeyValueStore`] under
//! `sent.<id>` and `received.<id>`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zmail_core::error::ZmailError;
use zmail_core::traits::KeyValueStore;
use zmail_core::types::MessageType;

/// A message this client dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessageRecord {
    /// Hex BLAKE3 of sender, recipient, timestamp, and content.
    pub id: String,
    pub from: String,
    pub to: String,
    pub message_type: MessageType,
    /// One txid per part, in part order.
    pub txids: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

impl SentMessageRecord {
    /// Txid of the first part.
    pub fn first_txid(&self) -> Option<&str> {
        self.txids.first().map(String::as_str)
    }
}

/// A message assembled from received parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessageRecord {
    /// Txid of the first part.
    pub id: String,
    /// Receiving address.
    pub to: String,
    pub message_type: MessageType,
    pub content: String,
    pub txids: Vec<String>,
    /// Lowest mined height among the parts, if any is mined.
    pub height: Option<u64>,
    /// Sender-side timestamp of the first part.
    pub sent_timestamp: u32,
    pub received_at: DateTime<Utc>,
}

/// Typed access to message records over a [`KeyValueStore`].
#[derive(Clone)]
pub struct MessageStore {
    kv: Arc<dyn KeyValueStore>,
}

impl MessageStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Store backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    pub fn save_sent(&self, record: &SentMessageRecord) -> Result<(), ZmailError> {
        self.put(&sent_key(&record.id), record)
    }

    pub fn sent(&self, id: &str) -> Result<Option<SentMessageRecord>, ZmailError> {
        self.get(&sent_key(id))
    }

    pub fn save_received(&self, record: &ReceivedMessageRecord) -> Result<(), ZmailError> {
        self.put(&received_key(&record.id), record)
    }

    pub fn received(&self, id: &str) -> Result<Option<ReceivedMessageRecord>, ZmailError> {
        self.get(&received_key(id))
    }

    pub fn delete_sent(&self, id: &str) -> Result<(), ZmailError> {
        self.kv.delete(&sent_key(id))
    }

    pub fn delete_received(&self, id: &str) -> Result<(), ZmailError> {
        self.kv.delete(&received_key(id))
    }

    fn put<T: Serialize>(&self, key: &str, record: &T) -> Result<(), ZmailError> {
        let bytes = serde_json::to_vec(record).map_err(|e| ZmailError::Storage(e.to_string()))?;
        self.kv.put(key, &bytes)
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ZmailError> {
        self.kv
            .get(key)?
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| ZmailError::Storage(format!("corrupt record {key}: {e}")))
            })
            .transpose()
    }
}

fn sent_key(id: &str) -> String {
    format!("sent.{id}")
}

fn received_key(id: &str) -> String {
    format!("received.{id}")
}

/// Volatile [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<Vec<u8>>, ZmailError> {
        Ok(self.entries.lock().get(id).cloned())
    }

    fn put(&self, id: &str, value: &[u8]) -> Result<(), ZmailError> {
        self.entries.lock().insert(id.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), ZmailError> {
        self.entries.lock().remove(id);
        Ok(())
    }
}

/// [`KeyValueStore`] keeping one file per id in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ZmailError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            ZmailError::Storage(format!("failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    fn path(&self, id: &str) -> Result<PathBuf, ZmailError> {
        let safe = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !safe {
            return Err(ZmailError::Storage(format!("invalid record id {id:?}")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, id: &str) -> Result<Option<Vec<u8>>, ZmailError> {
        let path = self.path(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ZmailError::Storage(format!("read {}: {e}", path.display()))),
        }
    }

    fn put(&self, id: &str, value: &[u8]) -> Result<(), ZmailError> {
        let path = self.path(id)?;
        // Write-then-rename so readers never see a partial record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| ZmailError::Storage(format!("write {}: {e}", path.display())))
    }

    fn delete(&self, id: &str) -> Result<(), ZmailError> {
        let path = self.path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ZmailError::Storage(format!("delete {}: {e}", path.display()))),
        }
    }
}
