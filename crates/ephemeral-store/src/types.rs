//! Store types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of characters accepted in an annotation
pub const MAX_COMMENT_CHARS: usize = 100;

/// Metadata for one accepted image
///
/// Serialized as `{filename, comment, timestamp}`, which is both the
/// persisted layout and the listing returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Blob key: `<identifier>.<extension>`
    pub filename: String,
    pub comment: String,
    #[serde(rename = "timestamp")]
    pub accepted_at: DateTime<Utc>,
}

impl Record {
    /// The identifier part of the blob key, without the extension
    pub fn identifier(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map_or(self.filename.as_str(), |(stem, _)| stem)
    }

    /// Whether this record has lived at least `lifetime` as of `now`
    pub fn is_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        match (now - self.accepted_at).to_std() {
            Ok(age) => age >= lifetime,
            // accepted_at lies in the future
            Err(_) => false,
        }
    }
}

/// Configuration for an [`ImageStore`](crate::ImageStore)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the image blobs
    pub blob_dir: PathBuf,
    /// JSON file holding the record list
    pub data_file: PathBuf,
    /// Maximum number of records kept
    pub capacity: usize,
    /// Time after acceptance at which a record expires
    pub lifetime: Duration,
    /// Period of the background reclamation pass
    pub reclaim_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blob_dir: PathBuf::from("./uploads"),
            data_file: PathBuf::from("./data.json"),
            capacity: 10,
            lifetime: Duration::from_secs(15),
            reclaim_interval: Duration::from_secs(1),
        }
    }
}

/// Point-in-time view of the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub images: usize,
    pub capacity: usize,
}
