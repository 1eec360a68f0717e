//! Core types for the gallery service

use ephemeral_store::StoreConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Largest request body accepted by default (5 MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Configuration for the gallery service
#[derive(Debug, Clone)]
pub struct GalleryConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
    pub store: StoreConfig,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            store: StoreConfig::default(),
        }
    }
}

impl GalleryConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from an arbitrary variable source. Unset or
    /// unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let port = lookup("PORT")
            .and_then(|s| s.trim().parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let max_upload_bytes = lookup("MAX_UPLOAD_BYTES")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(defaults.max_upload_bytes);

        let blob_dir = lookup("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.store.blob_dir);

        let data_file = lookup("DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.store.data_file);

        let capacity = lookup("MAX_IMAGES")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.store.capacity);

        let lifetime = parsed("IMAGE_LIFETIME_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.store.lifetime);

        let reclaim_interval = parsed("RECLAIM_INTERVAL_MS")
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.store.reclaim_interval);

        Self {
            port,
            max_upload_bytes,
            store: StoreConfig {
                blob_dir,
                data_file,
                capacity,
                lifetime,
                reclaim_interval,
            },
        }
    }
}

/// Result of `POST /upload`
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub images: usize,
    pub capacity: usize,
}
