//! In-memory storage for the embedded event log.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a test panic

use plinth_core::event_bus::BusFuture;
use plinth_core::{EventBusError, LogStorage, StoredRecord};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// `BTreeMap`-backed [`LogStorage`] for fast, deterministic tests.
///
/// Clones share the same records, so a test can keep one clone for
/// inspection while the log owns another.
///
/// # Example
///
/// ```
/// use plinth_core::EmbeddedLog;
/// use plinth_testing::InMemoryLogStorage;
/// use std::sync::Arc;
///
/// let storage = InMemoryLogStorage::new();
/// let log = EmbeddedLog::new(Arc::new(storage.clone()));
/// assert!(storage.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLogStorage {
    topics: Arc<RwLock<BTreeMap<String, Vec<StoredRecord>>>>,
    fail_appends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl InMemoryLogStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail with [`EventBusError::Storage`].
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Records stored for a topic, in offset order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<StoredRecord> {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.read().unwrap().values().map(Vec::len).sum()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`LogStorage::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LogStorage for InMemoryLogStorage {
    fn append(&self, record: StoredRecord) -> BusFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(EventBusError::Storage("injected append failure".to_string()));
            }
            let mut topics = self.topics.write().unwrap();
            let records = topics.entry(record.topic.clone()).or_default();
            let expected = i64::try_from(records.len()).unwrap();
            if record.offset != expected {
                return Err(EventBusError::Storage(format!(
                    "offset {} appended to {} at {expected}",
                    record.offset, record.topic
                )));
            }
            records.push(record);
            Ok(())
        })
    }

    fn read_from(&self, topic: &str, from: i64, limit: usize) -> BusFuture<'_, Vec<StoredRecord>> {
        let records = self
            .records(topic)
            .into_iter()
            .filter(|r| r.offset >= from)
            .take(limit)
            .collect();
        Box::pin(async move { Ok(records) })
    }

    fn next_offset(&self, topic: &str) -> BusFuture<'_, i64> {
        let next = i64::try_from(self.records(topic).len()).unwrap();
        Box::pin(async move { Ok(next) })
    }

    fn close(&self) -> BusFuture<'_, ()> {
        self.closed.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
