//! Serialized read-modify-write access to the record list

use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::types::Record;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Gate through which every metadata mutation passes
///
/// Only one mutation runs at a time across the process. Each one sees a
/// freshly loaded list, and what it leaves behind is persisted before the
/// next mutation may start. Readers use [`MutationGate::snapshot`] and
/// never wait on the gate.
pub struct MutationGate {
    store: Arc<dyn MetadataStore>,
    lock: Mutex<()>,
}

impl MutationGate {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Current records without taking the gate
    pub async fn snapshot(&self) -> Vec<Record> {
        self.store.load().await
    }

    /// Run `mutate` on the current records under mutual exclusion and
    /// persist the result
    ///
    /// If persisting fails, the error is returned and the stored list is
    /// left as it was.
    pub async fn with_exclusive_access<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Record>) -> T,
    {
        let _guard = self.lock.lock().await;

        let mut records = self.store.load().await;
        let output = mutate(&mut records);
        self.store.replace(&records).await?;

        Ok(output)
    }
}
