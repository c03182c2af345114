//! # shoal-locks
//!
//! Named reader/writer locks, one per filename. A file's lock guards both
//! the on-disk bytes and the metadata entry for that file, so handlers
//! update the two as a unit.
//!
//! Locks are created on first use and kept for the life of the process.
//! Never reclaiming them is deliberate: a holder can re-reference its lock
//! without racing a concurrent delete of the map entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

/// Lazily-populated filename → lock table.
#[derive(Debug, Default)]
pub struct LockMap {
    inner: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// The lock for `name`, inserting one on first reference. Infallible;
    /// the returned handle stays valid for the process lifetime.
    pub fn get(&self, name: &str) -> Arc<RwLock<()>> {
        let mut table = self.inner.lock().unwrap();
        if let Some(lock) = table.get(name) {
            return Arc::clone(lock);
        }
        let lock = Arc::new(RwLock::new(()));
        table.insert(name.to_string(), Arc::clone(&lock));
        lock
    }

    /// Number of locks allocated so far.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lazily_creates_and_reuses_locks() {
        let map = LockMap::new();
        assert!(map.is_empty());

        let a1 = map.get("a.txt");
        let a2 = map.get("a.txt");
        let b = map.get("b.txt");

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let map = LockMap::new();
        let lock = map.get("a.txt");

        let guard = lock.write().await;
        assert!(lock.try_read().is_err());
        drop(guard);
        assert!(lock.try_read().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn contended_writer_waits_for_readers() {
        let map = Arc::new(LockMap::new());
        let lock = map.get("a.txt");

        let read_guard = lock.read().await;

        let lock2 = map.get("a.txt");
        let writer = tokio::spawn(async move {
            let _w = lock2.write().await;
        });

        // Writer cannot finish while the read guard is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(read_guard);
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer should acquire after readers release")
            .unwrap();
    }
}
