//! Per-record exclusive locks.
//!
//! Two postprocess jobs for the same record serialize on the same mutex;
//! jobs for different records never contend.

use std::sync::Arc;

use agora_core::{RecordId, RecordKind};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Key = (RecordKind, RecordId);

/// Registry of record locks, shared by every job of a [`Postprocessor`](super::Postprocessor).
#[derive(Clone, Default)]
pub struct RecordLocks {
    inner: Arc<DashMap<Key, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one record; released on drop.
pub struct RecordGuard {
    key: Key,
    locks: Arc<DashMap<Key, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `(kind, id)`.
    pub async fn acquire(&self, kind: RecordKind, id: RecordId) -> RecordGuard {
        let key = (kind, id);
        let mutex = self
            .inner
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        RecordGuard {
            key,
            locks: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// Number of records with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds one reference; anyone else still waiting holds another.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_record_serializes() {
        let locks = RecordLocks::new();
        let id = RecordId::new();

        let first = locks.acquire(RecordKind::ForumPost, id).await;
        let pending = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(RecordKind::ForumPost, id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_records_do_not_contend() {
        let locks = RecordLocks::new();
        let id = RecordId::new();

        let _post = locks.acquire(RecordKind::ForumPost, id).await;
        let other = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(RecordKind::NewsItem, id),
        )
        .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_entries_pruned_after_release() {
        let locks = RecordLocks::new();
        {
            let _g = locks.acquire(RecordKind::ForumUser, RecordId::new()).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
