//! Capacity-bounded image store with time-based expiry
//!
//! Images are stored as files next to a JSON list of their metadata. The
//! store keeps at most a fixed number of the most recent images, and a
//! background reclaimer removes each one a fixed time after it was accepted.
//! All metadata writes pass through a single [`MutationGate`].

mod blobs;
mod clock;
mod error;
mod gate;
mod identifier;
mod ingest;
mod metadata;
mod reclaimer;
mod types;

pub use blobs::{content_type_for, BlobStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FileAbsence, IngestError, Result, StoreError, ValidationError};
pub use gate::MutationGate;
pub use identifier::{format_identifier, IdGenerator};
pub use ingest::{
    validate, Ingestor, Submission, UploadedFile, ValidatedUpload, ALLOWED_EXTENSIONS,
};
pub use metadata::{JsonFileStore, MemoryStore, MetadataStore};
pub use reclaimer::Reclaimer;
pub use types::{Record, StoreConfig, StoreStats, MAX_COMMENT_CHARS};

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// The assembled store: blob files, persisted metadata, ingestion and
/// reclamation sharing one gate
pub struct ImageStore {
    config: StoreConfig,
    gate: Arc<MutationGate>,
    blobs: Arc<BlobStore>,
    clock: Arc<dyn Clock>,
    ingestor: Ingestor,
}

impl ImageStore {
    /// Open the store described by `config` using the wall clock
    ///
    /// Creates the blob directory and an empty data file when missing.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let metadata = JsonFileStore::new(&config.data_file);
        metadata.init().await?;
        Self::with_parts(config, Arc::new(metadata), Arc::new(SystemClock)).await
    }

    /// Assemble a store from an explicit metadata backend and clock
    pub async fn with_parts(
        config: StoreConfig,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let blobs = Arc::new(BlobStore::new(&config.blob_dir));
        blobs.init().await?;

        let gate = Arc::new(MutationGate::new(metadata));
        let existing = gate.snapshot().await;
        let newest = existing.iter().map(|r| r.accepted_at).max();

        let ingestor = Ingestor::new(
            gate.clone(),
            blobs.clone(),
            clock.clone(),
            IdGenerator::seeded(newest),
            config.capacity,
        );

        info!(
            images = existing.len(),
            capacity = config.capacity,
            lifetime_secs = config.lifetime.as_secs_f64(),
            "Image store opened"
        );

        Ok(Self {
            config,
            gate,
            blobs,
            clock,
            ingestor,
        })
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Validate and accept a submission
    pub async fn submit(&self, submission: Submission) -> std::result::Result<Record, IngestError> {
        self.ingestor.submit(submission).await
    }

    /// Current records, oldest first, without waiting on writers
    pub async fn list(&self) -> Vec<Record> {
        self.gate.snapshot().await
    }

    pub async fn stats(&self) -> StoreStats {
        StoreStats {
            images: self.list().await.len(),
            capacity: self.config.capacity,
        }
    }

    /// A reclaimer bound to this store's gate, blobs and clock
    pub fn reclaimer(&self) -> Reclaimer {
        Reclaimer::new(
            self.gate.clone(),
            self.blobs.clone(),
            self.clock.clone(),
            self.config.lifetime,
            self.config.reclaim_interval,
        )
    }

    /// Start the background reclaimer; it stops when `shutdown` becomes true
    pub fn spawn_reclaimer(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.reclaimer().run(shutdown))
    }
}
