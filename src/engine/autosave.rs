// src/engine/autosave.rs

//! Debounced answer writes.
//!
//! Each (attempt, question) pair owns at most one pending slot. Staging a new
//! value replaces the slot and restarts its timer, so rapid edits coalesce into
//! one write of the last value. `drain` empties every slot of an attempt and
//! cancels their timers; submission calls it before closing the attempt.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
};

type SlotKey = (i64, i64);

#[derive(Debug)]
struct PendingWrite {
    value: String,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
pub struct AutosaveBuffer {
    slots: Mutex<HashMap<SlotKey, PendingWrite>>,
    generations: AtomicU64,
}

impl AutosaveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pending value for `(attempt_id, question_id)`.
    ///
    /// `schedule` receives the slot's new generation and returns the timer
    /// task that will later call [`AutosaveBuffer::take`] with it. Any timer
    /// of the replaced value is aborted.
    pub async fn stage<F>(&self, attempt_id: i64, question_id: i64, value: String, schedule: F) -> u64
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let mut slots = self.slots.lock().await;
        let timer = schedule(generation);
        let previous = slots.insert(
            (attempt_id, question_id),
            PendingWrite {
                value,
                generation,
                timer: Some(timer),
            },
        );
        if let Some(timer) = previous.and_then(|p| p.timer) {
            timer.abort();
        }
        generation
    }

    /// Removes the slot if it still holds `generation`. A newer edit or a
    /// drain makes this return `None`.
    pub async fn take(&self, attempt_id: i64, question_id: i64, generation: u64) -> Option<String> {
        let mut slots = self.slots.lock().await;
        let key = (attempt_id, question_id);
        match slots.get(&key) {
            Some(pending) if pending.generation == generation => {
                slots.remove(&key).map(|p| p.value)
            }
            _ => None,
        }
    }

    /// Drops a pending value that an immediate save has superseded.
    pub async fn discard(&self, attempt_id: i64, question_id: i64) {
        let removed = self.slots.lock().await.remove(&(attempt_id, question_id));
        if let Some(timer) = removed.and_then(|p| p.timer) {
            timer.abort();
        }
    }

    /// Empties all slots of an attempt, cancelling their timers.
    /// Returns `(question_id, value)` pairs ordered by question id.
    pub async fn drain(&self, attempt_id: i64) -> Vec<(i64, String)> {
        let mut slots = self.slots.lock().await;
        let keys: Vec<SlotKey> = slots
            .keys()
            .filter(|(a, _)| *a == attempt_id)
            .copied()
            .collect();

        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(mut pending) = slots.remove(&key) {
                if let Some(timer) = pending.timer.take() {
                    timer.abort();
                }
                drained.push((key.1, pending.value));
            }
        }
        drained.sort_by_key(|(question_id, _)| *question_id);
        drained
    }

    /// Pending values of an attempt, without removing them.
    pub async fn pending(&self, attempt_id: i64) -> Vec<(i64, String)> {
        let slots = self.slots.lock().await;
        let mut pending: Vec<(i64, String)> = slots
            .iter()
            .filter(|((a, _), _)| *a == attempt_id)
            .map(|((_, q), p)| (*q, p.value.clone()))
            .collect();
        pending.sort_by_key(|(question_id, _)| *question_id);
        pending
    }
}

/// Per-attempt async mutexes. Holding an attempt's guard serializes the
/// timer-driven and request-driven mutations of that attempt.
#[derive(Debug, Default)]
pub struct AttemptLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AttemptLocks {
    pub async fn acquire(&self, attempt_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(attempt_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drops the entry of an attempt that reached a resting state.
    ///
    /// Must be called while holding that attempt's guard. The entry is kept
    /// while anyone else is queued on the mutex, so a waiter and a later caller
    /// never end up holding two different mutexes for one attempt.
    pub async fn forget(&self, attempt_id: i64) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one in the caller's guard.
        if locks
            .get(&attempt_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&attempt_id);
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> JoinHandle<()> {
        tokio::spawn(async {})
    }

    #[tokio::test]
    async fn staging_replaces_previous_value() {
        let buffer = AutosaveBuffer::new();
        let first = buffer.stage(1, 10, "a".to_string(), |_| idle()).await;
        let second = buffer.stage(1, 10, "ab".to_string(), |_| idle()).await;

        assert!(second > first);
        assert_eq!(buffer.take(1, 10, first).await, None);
        assert_eq!(buffer.take(1, 10, second).await, Some("ab".to_string()));
        assert_eq!(buffer.take(1, 10, second).await, None);
    }

    #[tokio::test]
    async fn drain_only_touches_one_attempt() {
        let buffer = AutosaveBuffer::new();
        buffer.stage(1, 11, "x".to_string(), |_| idle()).await;
        buffer.stage(1, 10, "y".to_string(), |_| idle()).await;
        let other = buffer.stage(2, 10, "z".to_string(), |_| idle()).await;

        let drained = buffer.drain(1).await;
        assert_eq!(
            drained,
            vec![(10, "y".to_string()), (11, "x".to_string())]
        );
        assert!(buffer.pending(1).await.is_empty());
        assert_eq!(buffer.take(2, 10, other).await, Some("z".to_string()));
    }

    #[tokio::test]
    async fn discard_cancels_pending_timer() {
        let buffer = AutosaveBuffer::new();
        let generation = buffer
            .stage(3, 1, "draft".to_string(), |_| {
                tokio::spawn(async {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                })
            })
            .await;
        buffer.discard(3, 1).await;
        assert_eq!(buffer.take(3, 1, generation).await, None);
    }

    #[tokio::test]
    async fn attempt_lock_serializes_holders() {
        let locks = Arc::new(AttemptLocks::default());
        let guard = locks.acquire(9).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(9).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn forget_by_sole_holder_drops_the_entry() {
        let locks = AttemptLocks::default();
        let guard = locks.acquire(4).await;

        locks.forget(4).await;
        drop(guard);

        assert_eq!(locks.tracked().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_keeps_mutex_while_someone_waits() {
        let locks = Arc::new(AttemptLocks::default());
        let first = locks.acquire(7).await;

        let (acquired_tx, acquired_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _held = locks.acquire(7).await;
                let _ = acquired_tx.send(());
                let _ = release_rx.await;
            })
        };
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        locks.forget(7).await;
        drop(first);
        acquired_rx.await.unwrap();

        // The waiter now holds the lock; a newcomer must queue behind it.
        let newcomer =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(7)).await;
        assert!(newcomer.is_err());

        release_tx.send(()).unwrap();
        waiter.await.unwrap();
        let _again = locks.acquire(7).await;
        assert_eq!(locks.tracked().await, 1);
    }
}
