//! Background removal of expired records and their blobs

use crate::blobs::BlobStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::gate::MutationGate;
use crate::types::Record;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Periodically expires records older than the configured lifetime
pub struct Reclaimer {
    gate: Arc<MutationGate>,
    blobs: Arc<BlobStore>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
    period: Duration,
}

impl Reclaimer {
    pub fn new(
        gate: Arc<MutationGate>,
        blobs: Arc<BlobStore>,
        clock: Arc<dyn Clock>,
        lifetime: Duration,
        period: Duration,
    ) -> Self {
        Self {
            gate,
            blobs,
            clock,
            lifetime,
            period,
        }
    }

    /// Run passes every period until `shutdown` flips to `true` or its
    /// sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            lifetime_secs = self.lifetime.as_secs_f64(),
            period_ms = self.period.as_millis() as u64,
            "Reclaimer started"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reclaim_once().await {
                        error!(error = %e, "Reclamation pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reclaimer stopped");
    }

    /// One scan; returns the records that were removed
    ///
    /// The scan itself runs without the gate. Only when something looks
    /// expired is the gate taken, and the expired set is recomputed against
    /// the authoritative list before anything is removed.
    pub async fn reclaim_once(&self) -> Result<Vec<Record>> {
        let now = self.clock.now();
        let snapshot = self.gate.snapshot().await;
        if !snapshot
            .iter()
            .any(|record| record.is_expired(now, self.lifetime))
        {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let lifetime = self.lifetime;
        let expired = self
            .gate
            .with_exclusive_access(|records| {
                let (expired, live): (Vec<Record>, Vec<Record>) = records
                    .drain(..)
                    .partition(|record| record.is_expired(now, lifetime));
                *records = live;
                expired
            })
            .await?;

        for record in &expired {
            if let Err(e) = self.blobs.remove(&record.filename).await {
                warn!(filename = %record.filename, error = %e, "Failed to remove expired blob");
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Reclaimed expired images");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metadata::{MemoryStore, MetadataStore};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        blobs: Arc<BlobStore>,
        clock: Arc<ManualClock>,
        reclaimer: Reclaimer,
    }

    async fn fixture(records: Vec<Record>) -> Fixture {
        let dir = tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path()));
        for record in &records {
            blobs.store(&record.filename, b"img").await.unwrap();
        }

        let store = Arc::new(MemoryStore::with_records(records));
        let gate = Arc::new(MutationGate::new(store.clone()));
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_000, 0).unwrap()));
        let reclaimer = Reclaimer::new(
            gate,
            blobs.clone(),
            clock.clone(),
            Duration::from_secs(15),
            Duration::from_millis(20),
        );

        Fixture {
            _dir: dir,
            store,
            blobs,
            clock,
            reclaimer,
        }
    }

    fn record(name: &str, secs: i64) -> Record {
        Record {
            filename: name.to_string(),
            comment: String::new(),
            accepted_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_nothing_expired_is_a_no_op() {
        let f = fixture(vec![record("a.png", 990), record("b.png", 995)]).await;

        let removed = f.reclaimer.reclaim_once().await.unwrap();

        assert!(removed.is_empty());
        assert_eq!(f.store.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_records_and_blobs_are_removed() {
        let f = fixture(vec![
            record("old.png", 980),
            record("edge.png", 985),
            record("new.png", 999),
        ])
        .await;

        let removed = f.reclaimer.reclaim_once().await.unwrap();

        let names: Vec<_> = removed.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["old.png", "edge.png"]);
        assert_eq!(f.store.load().await, vec![record("new.png", 999)]);
        assert_eq!(f.blobs.keys().await.unwrap(), vec!["new.png"]);
    }

    #[tokio::test]
    async fn test_scans_past_live_records() {
        // Out-of-order timestamps: the expired one is not at the front
        let f = fixture(vec![
            record("live.png", 999),
            record("stale.png", 900),
            record("live2.png", 998),
        ])
        .await;

        let removed = f.reclaimer.reclaim_once().await.unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].filename, "stale.png");
        let names: Vec<_> = f
            .store
            .load()
            .await
            .into_iter()
            .map(|r| r.filename)
            .collect();
        assert_eq!(names, vec!["live.png", "live2.png"]);
    }

    #[tokio::test]
    async fn test_missing_blob_does_not_block_cleanup() {
        let f = fixture(vec![record("a.png", 900), record("b.png", 901)]).await;
        f.blobs.remove("a.png").await.unwrap();

        let removed = f.reclaimer.reclaim_once().await.unwrap();

        assert_eq!(removed.len(), 2);
        assert!(f.store.load().await.is_empty());
        assert!(f.blobs.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_expire_as_clock_advances() {
        let f = fixture(vec![record("a.png", 1_000)]).await;

        f.clock.advance(chrono::Duration::seconds(14));
        assert!(f.reclaimer.reclaim_once().await.unwrap().is_empty());

        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.reclaimer.reclaim_once().await.unwrap().len(), 1);
        assert!(f.store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(vec![record("a.png", 900)]).await;
        let store = f.store.clone();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(f.reclaimer.run(rx));

        // The first tick fires immediately
        for _ in 0..100 {
            if store.load().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.load().await.is_empty());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reclaimer did not stop")
            .unwrap();
    }
}
