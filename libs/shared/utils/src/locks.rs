//! Process-wide advisory locks for check-then-insert sequences.
//!
//! Counting existing rows and then inserting is a race when two requests
//! target the same slot or queue. Holding the keyed lock across the read
//! and the write makes the pair an atomic unit within this process;
//! services are constructed per request, so the registry lives behind a
//! process-wide `OnceLock`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

static REGISTRY: OnceLock<KeyedLockRegistry> = OnceLock::new();

#[derive(Default)]
pub struct KeyedLockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared registry used by every service in this process.
    pub fn global() -> &'static KeyedLockRegistry {
        REGISTRY.get_or_init(KeyedLockRegistry::new)
    }

    /// Acquire the lock for `key`, waiting if another request holds it.
    /// The guard releases on drop and evicts the key once no other
    /// request is waiting on it, so the map only holds contended keys.
    pub async fn acquire(&self, key: &str) -> KeyedLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock registry poisoned");
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        debug!("Acquiring advisory lock: {}", key);
        let guard = Arc::clone(&lock).lock_owned().await;
        KeyedLockGuard {
            registry: self,
            key: key.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().expect("lock registry poisoned").len()
    }
}

pub struct KeyedLockGuard<'a> {
    registry: &'a KeyedLockRegistry,
    key: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex before inspecting the refcount.
        self.guard.take();
        let mut locks = self.registry.locks.lock().expect("lock registry poisoned");
        if let Some(entry) = locks.get(&self.key) {
            // Two owners means the map and this guard; anything above
            // that is a waiter still holding a clone.
            if Arc::strong_count(entry) <= 2 && Arc::ptr_eq(entry, &self.lock) {
                locks.remove(&self.key);
            }
        }
    }
}

/// Lock key for one bookable slot.
pub fn slot_lock_key(doctor_id: &uuid::Uuid, date: chrono::NaiveDate, time: chrono::NaiveTime) -> String {
    format!("slot_{}_{}_{}", doctor_id, date, time.format("%H:%M"))
}

/// Lock key for one doctor's queue on one visit date.
pub fn queue_lock_key(doctor_id: &uuid::Uuid, visit_date: chrono::NaiveDate) -> String {
    format!("queue_{}_{}", doctor_id, visit_date)
}

/// Lock key for one doctor's weekly schedule on one weekday.
pub fn schedule_lock_key(doctor_id: &uuid::Uuid, day_of_week: u8) -> String {
    format!("sched_{}_{}", doctor_id, day_of_week)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_serializes_critical_sections() {
        let registry = Arc::new(KeyedLockRegistry::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let in_section = Arc::clone(&in_section);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _guard = registry.acquire("slot_a").await;
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(registry.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn released_keys_are_evicted() {
        let registry = KeyedLockRegistry::new();
        {
            let _guard = registry.acquire("slot_a").await;
            assert_eq!(registry.tracked_keys(), 1);
        }
        assert_eq!(registry.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn contended_keys_survive_until_the_last_holder_releases() {
        let registry = Arc::new(KeyedLockRegistry::new());
        let guard = registry.acquire("slot_a").await;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.acquire("slot_a").await;
            })
        };
        // Let the waiter clone the entry before the first release.
        tokio::task::yield_now().await;

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(registry.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let registry = KeyedLockRegistry::new();
        let _a = registry.acquire("slot_a").await;
        // Would deadlock if keys shared a mutex.
        let _b = registry.acquire("slot_b").await;
    }
}
