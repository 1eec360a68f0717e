//! Persisted record list
//!
//! The record list is always read and written as a whole. There is no
//! partial update; callers load, transform in memory, and replace.

use crate::error::Result;
use crate::types::Record;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Storage for the ordered record list
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Current records, oldest first. Missing or unreadable state yields an
    /// empty list.
    async fn load(&self) -> Vec<Record>;

    /// Overwrite the whole persisted list
    async fn replace(&self, records: &[Record]) -> Result<()>;
}

/// Records kept as a JSON array in a single file
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write an empty list if no data file exists yet
    pub async fn init(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        if !fs::try_exists(&self.path).await? {
            self.replace(&[]).await?;
            debug!(path = ?self.path, "Created empty data file");
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl MetadataStore for JsonFileStore {
    async fn load(&self) -> Vec<Record> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read data file, treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Corrupt data file, treating as empty");
                Vec::new()
            }
        }
    }

    async fn replace(&self, records: &[Record]) -> Result<()> {
        let json = serde_json::to_vec(records)?;
        let tmp = self.temp_path();

        // Rename over the old file so readers never see a half-written list
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(path = ?self.path, records = records.len(), "Persisted records");
        Ok(())
    }
}

/// Records kept in memory only
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn load(&self) -> Vec<Record> {
        self.records.read().await.clone()
    }

    async fn replace(&self, records: &[Record]) -> Result<()> {
        *self.records.write().await = records.to_vec();
        Ok(())
    }
}
