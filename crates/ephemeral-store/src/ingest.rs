//! Submission validation and capacity-bounded insertion

use crate::blobs::BlobStore;
use crate::clock::Clock;
use crate::error::{FileAbsence, IngestError, ValidationError};
use crate::gate::MutationGate;
use crate::identifier::{format_identifier, IdGenerator};
use crate::types::{Record, MAX_COMMENT_CHARS};
use image::ImageFormat;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Accepted file extensions, lower case
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Number of leading bytes inspected when sniffing the image format
const SNIFF_LEN: usize = 512;

/// An uploaded file
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// A client submission as received from the transport
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// `None` when the request carried no file field
    pub file: Option<UploadedFile>,
    pub comment: Option<String>,
}

/// A submission that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub extension: String,
    pub comment: String,
}

/// Check a submission, first failure wins
///
/// Order: file presence, comment length, extension, content. Files named
/// `*.webp` are accepted without looking at their content.
pub fn validate(submission: &Submission) -> Result<ValidatedUpload, ValidationError> {
    let file = submission
        .file
        .as_ref()
        .ok_or(ValidationError::MissingFile(FileAbsence::NotInRequest))?;
    if file.filename.is_empty() || file.data.is_empty() {
        return Err(ValidationError::MissingFile(FileAbsence::NothingSelected));
    }

    let comment = submission.comment.as_deref().unwrap_or("").trim();
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(ValidationError::AnnotationTooLong);
    }

    let extension = extension_of(&file.filename);
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedType);
    }

    if extension != "webp" && !is_jpeg_or_png(&file.data) {
        return Err(ValidationError::InvalidImageData);
    }

    Ok(ValidatedUpload {
        extension,
        comment: comment.to_string(),
    })
}

/// Lower-cased text after the last `.`; the whole name if there is none
fn extension_of(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map_or(filename, |(_, ext)| ext)
        .to_ascii_lowercase()
}

fn is_jpeg_or_png(data: &[u8]) -> bool {
    let header = &data[..data.len().min(SNIFF_LEN)];
    matches!(
        image::guess_format(header),
        Ok(ImageFormat::Jpeg | ImageFormat::Png)
    )
}

/// Accepts submissions into the store, evicting the oldest records when
/// capacity is exceeded
pub struct Ingestor {
    gate: Arc<MutationGate>,
    blobs: Arc<BlobStore>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    capacity: usize,
}

impl Ingestor {
    pub fn new(
        gate: Arc<MutationGate>,
        blobs: Arc<BlobStore>,
        clock: Arc<dyn Clock>,
        ids: IdGenerator,
        capacity: usize,
    ) -> Self {
        Self {
            gate,
            blobs,
            clock,
            ids,
            capacity,
        }
    }

    /// Validate and store a submission, returning the new record
    ///
    /// The blob is written before the record is appended, so a failure in
    /// between can leave an unreferenced blob but never a record without one.
    pub async fn submit(&self, submission: Submission) -> Result<Record, IngestError> {
        let upload = validate(&submission)?;
        let data = submission.file.map(|f| f.data).unwrap_or_default();

        let accepted_at = self.ids.next(self.clock.as_ref());
        let record = Record {
            filename: format!("{}.{}", format_identifier(accepted_at), upload.extension),
            comment: upload.comment,
            accepted_at,
        };

        self.blobs.store(&record.filename, &data).await.map_err(|e| {
            error!(filename = %record.filename, error = %e, "Failed to write blob");
            e
        })?;

        let capacity = self.capacity;
        let appended = record.clone();
        let evicted = self
            .gate
            .with_exclusive_access(move |records| {
                // Identifiers are issued outside the gate, so a racing
                // submission may already have appended a later one
                let pos = records.partition_point(|r| r.accepted_at <= appended.accepted_at);
                records.insert(pos, appended);
                let excess = records.len().saturating_sub(capacity);
                records.drain(..excess).collect::<Vec<_>>()
            })
            .await;

        let evicted = match evicted {
            Ok(evicted) => evicted,
            Err(e) => {
                error!(filename = %record.filename, error = %e, "Failed to persist records");
                if let Err(e) = self.blobs.remove(&record.filename).await {
                    warn!(
                        filename = %record.filename,
                        error = %e,
                        "Failed to remove unpersisted blob"
                    );
                }
                return Err(e.into());
            }
        };

        for old in &evicted {
            if let Err(e) = self.blobs.remove(&old.filename).await {
                warn!(filename = %old.filename, error = %e, "Failed to remove evicted blob");
            }
            debug!(filename = %old.filename, "Evicted oldest image");
        }

        info!(
            filename = %record.filename,
            size = data.len(),
            evicted = evicted.len(),
            "Accepted image"
        );
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::metadata::{MemoryStore, MetadataStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    pub(crate) const PNG: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R',
    ];
    pub(crate) const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    pub(crate) fn upload(filename: &str, data: &[u8], comment: &str) -> Submission {
        Submission {
            file: Some(UploadedFile {
                filename: filename.to_string(),
                data: data.to_vec(),
            }),
            comment: Some(comment.to_string()),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<dyn MetadataStore>,
        blobs: Arc<BlobStore>,
        ingestor: Ingestor,
    }

    fn fixture_with(store: Arc<dyn MetadataStore>) -> Fixture {
        let dir = tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()));
        let gate = Arc::new(MutationGate::new(store.clone()));
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_000, 0).unwrap()));
        let ingestor = Ingestor::new(gate, blobs.clone(), clock, IdGenerator::new(), 10);
        Fixture {
            _dir: dir,
            store,
            blobs,
            ingestor,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_missing_file_field() {
        let submission = Submission {
            file: None,
            comment: Some("hi".to_string()),
        };
        assert_eq!(
            validate(&submission),
            Err(ValidationError::MissingFile(FileAbsence::NotInRequest))
        );
    }

    #[test]
    fn test_empty_filename_or_payload() {
        assert_eq!(
            validate(&upload("", PNG, "")),
            Err(ValidationError::MissingFile(FileAbsence::NothingSelected))
        );
        assert_eq!(
            validate(&upload("a.png", b"", "")),
            Err(ValidationError::MissingFile(FileAbsence::NothingSelected))
        );
    }

    #[test]
    fn test_comment_too_long_wins_over_bad_type() {
        let long = "x".repeat(101);
        assert_eq!(
            validate(&upload("a.gif", b"junk", &long)),
            Err(ValidationError::AnnotationTooLong)
        );
        assert_eq!(
            validate(&upload("a.png", PNG, &long)),
            Err(ValidationError::AnnotationTooLong)
        );
    }

    #[test]
    fn test_comment_length_counts_characters_after_trim() {
        let exactly = "ä".repeat(100);
        assert!(validate(&upload("a.png", PNG, &exactly)).is_ok());

        let padded = format!("   {}   ", "x".repeat(100));
        let validated = validate(&upload("a.png", PNG, &padded)).unwrap();
        assert_eq!(validated.comment.len(), 100);
    }

    #[test]
    fn test_unsupported_extension() {
        assert_eq!(
            validate(&upload("a.gif", PNG, "")),
            Err(ValidationError::UnsupportedType)
        );
        assert_eq!(
            validate(&upload("archive.png.zip", PNG, "")),
            Err(ValidationError::UnsupportedType)
        );
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let validated = validate(&upload("Photo.JPG", JPEG, "")).unwrap();
        assert_eq!(validated.extension, "jpg");
    }

    #[test]
    fn test_name_without_dot_is_its_own_extension() {
        assert_eq!(validate(&upload("png", PNG, "")).unwrap().extension, "png");
        assert_eq!(
            validate(&upload("photo", PNG, "")),
            Err(ValidationError::UnsupportedType)
        );
    }

    #[test]
    fn test_content_must_match_jpeg_or_png() {
        assert_eq!(
            validate(&upload("a.png", b"definitely not an image", "")),
            Err(ValidationError::InvalidImageData)
        );
        // A PNG named .jpg is fine, only the family is checked
        assert!(validate(&upload("a.jpg", PNG, "")).is_ok());
        assert!(validate(&upload("a.jpeg", JPEG, "")).is_ok());
    }

    #[test]
    fn test_webp_content_is_not_checked() {
        let validated = validate(&upload("a.webp", b"arbitrary bytes", "")).unwrap();
        assert_eq!(validated.extension, "webp");
    }

    #[tokio::test]
    async fn test_submit_stores_blob_and_record() {
        let f = fixture();

        let record = f
            .ingestor
            .submit(upload("cat.png", PNG, " a cat "))
            .await
            .unwrap();

        assert!(record.filename.ends_with(".png"));
        assert_eq!(record.comment, "a cat");
        assert_eq!(f.store.load().await, vec![record.clone()]);
        assert_eq!(
            f.blobs.read(&record.filename).await.unwrap().as_deref(),
            Some(PNG)
        );
    }

    #[tokio::test]
    async fn test_rejected_submission_leaves_no_trace() {
        let f = fixture();

        let err = f
            .ingestor
            .submit(upload("a.png", b"nope", ""))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Validation(ValidationError::InvalidImageData)
        ));
        assert!(f.store.load().await.is_empty());
        assert!(f.blobs.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_keeps_most_recent() {
        let f = fixture();

        let mut accepted = Vec::new();
        for n in 0..13 {
            let record = f
                .ingestor
                .submit(upload("a.jpg", JPEG, &format!("#{}", n)))
                .await
                .unwrap();
            accepted.push(record);
        }

        let stored = f.store.load().await;
        assert_eq!(stored, accepted[3..].to_vec());

        let mut expected_keys: Vec<_> = accepted[3..].iter().map(|r| r.filename.clone()).collect();
        expected_keys.sort();
        assert_eq!(f.blobs.keys().await.unwrap(), expected_keys);
    }

    #[tokio::test]
    async fn test_over_capacity_store_is_trimmed_to_bound() {
        let preexisting: Vec<Record> = (0..12)
            .map(|n| Record {
                filename: format!("old{}.png", n),
                comment: String::new(),
                accepted_at: Utc.timestamp_opt(n, 0).unwrap(),
            })
            .collect();
        let f = fixture_with(Arc::new(MemoryStore::with_records(preexisting.clone())));
        for record in &preexisting {
            f.blobs.store(&record.filename, PNG).await.unwrap();
        }

        let record = f.ingestor.submit(upload("new.png", PNG, "")).await.unwrap();

        let stored = f.store.load().await;
        assert_eq!(stored.len(), 10);
        assert_eq!(stored[0].filename, "old3.png");
        assert_eq!(stored[9], record);
        assert!(f.blobs.read("old2.png").await.unwrap().is_none());
        assert!(f.blobs.read("old3.png").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_late_identifier_is_inserted_in_acceptance_order() {
        let f = fixture();
        let later = Record {
            filename: "later.png".to_string(),
            comment: String::new(),
            accepted_at: Utc.timestamp_opt(2_000, 0).unwrap(),
        };
        f.store.replace(&[later.clone()]).await.unwrap();
        f.blobs.store("later.png", PNG).await.unwrap();

        let record = f.ingestor.submit(upload("a.png", PNG, "")).await.unwrap();

        assert_eq!(f.store.load().await, vec![record, later]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_respect_capacity() {
        let f = fixture();
        let ingestor = Arc::new(f.ingestor);

        let results = futures::future::join_all((0..25).map(|n| {
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                ingestor
                    .submit(upload("a.png", PNG, &format!("#{}", n)))
                    .await
            })
        }))
        .await;

        for result in results {
            result.unwrap().unwrap();
        }

        let stored = f.store.load().await;
        assert_eq!(stored.len(), 10);
        assert!(stored.windows(2).all(|w| w[0].accepted_at < w[1].accepted_at));

        let mut keys: Vec<_> = stored.iter().map(|r| r.filename.clone()).collect();
        keys.sort();
        assert_eq!(f.blobs.keys().await.unwrap(), keys);
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl MetadataStore for ReadOnlyStore {
        async fn load(&self) -> Vec<Record> {
            Vec::new()
        }

        async fn replace(&self, _records: &[Record]) -> crate::error::Result<()> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported_and_blob_cleaned_up() {
        let f = fixture_with(Arc::new(ReadOnlyStore));

        let err = f
            .ingestor
            .submit(upload("a.png", PNG, ""))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Storage(StoreError::Io(_))));
        assert!(f.blobs.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blob_write_failure_appends_nothing() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        // Blob directory does not exist, so the write fails
        let ingestor = Ingestor::new(
            Arc::new(MutationGate::new(store.clone())),
            Arc::new(BlobStore::new(dir.path().join("missing"))),
            Arc::new(ManualClock::new(Utc.timestamp_opt(1_000, 0).unwrap())),
            IdGenerator::new(),
            10,
        );

        let err = ingestor.submit(upload("a.png", PNG, "")).await.unwrap_err();

        assert!(matches!(err, IngestError::Storage(_)));
        assert!(store.load().await.is_empty());
    }
}
