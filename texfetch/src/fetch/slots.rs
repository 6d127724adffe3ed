//! Priority-ordered concurrency gate.
//!
//! Bounds how many workers may run an HTTP request (or a decode) at once.
//! Unlike a plain semaphore, waiters are admitted highest priority first,
//! and a released slot is handed straight to the next waiter so a late,
//! low-priority arrival cannot barge in.
//!
//! ```text
//!   acquire(p) ──► free slot? ──yes──► SlotPermit
//!                      │
//!                      no
//!                      ▼
//!              waiters (max-heap by priority, FIFO within a priority)
//!                      ▲
//!   SlotPermit::drop ──┘ pops the best waiter and sends it the slot
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

struct Waiter {
    priority: f32,
    seq: u64,
    tx: oneshot::Sender<SlotPermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SlotState {
    in_use: usize,
    waiters: BinaryHeap<Waiter>,
    next_seq: u64,
}

struct SlotsInner {
    label: &'static str,
    capacity: usize,
    state: Mutex<SlotState>,
    peak: AtomicUsize,
}

/// Gate admitting at most `capacity` holders at once.
#[derive(Clone)]
pub(crate) struct PrioritySlots {
    inner: Arc<SlotsInner>,
}

/// Held slot; dropping it admits the next waiter.
pub(crate) struct SlotPermit {
    inner: Option<Arc<SlotsInner>>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            release(&inner);
        }
    }
}

fn release(inner: &Arc<SlotsInner>) {
    loop {
        let waiter = {
            let mut state = inner.state.lock();
            match state.waiters.pop() {
                Some(waiter) => waiter,
                None => {
                    state.in_use -= 1;
                    return;
                }
            }
        };

        let permit = SlotPermit {
            inner: Some(Arc::clone(inner)),
        };
        match waiter.tx.send(permit) {
            Ok(()) => return,
            // Waiter gave up; defuse and try the next one.
            Err(mut unclaimed) => unclaimed.inner = None,
        }
    }
}

impl PrioritySlots {
    pub fn new(capacity: usize, label: &'static str) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, label, "created priority slots");
        Self {
            inner: Arc::new(SlotsInner {
                label,
                capacity,
                state: Mutex::new(SlotState {
                    in_use: 0,
                    waiters: BinaryHeap::new(),
                    next_seq: 0,
                }),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a slot. Higher `priority` is admitted first.
    ///
    /// Cancel safe: dropping the future before it resolves gives any slot
    /// already handed to it back to the gate.
    pub async fn acquire(&self, priority: f32) -> SlotPermit {
        loop {
            let rx = {
                let mut state = self.inner.state.lock();
                if state.in_use < self.inner.capacity && state.waiters.is_empty() {
                    state.in_use += 1;
                    self.inner
                        .peak
                        .fetch_max(state.in_use, AtomicOrdering::Relaxed);
                    return SlotPermit {
                        inner: Some(Arc::clone(&self.inner)),
                    };
                }
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiters.push(Waiter { priority, seq, tx });
                rx
            };

            if let Ok(permit) = rx.await {
                return permit;
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use
    }

    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    pub fn peak(&self) -> usize {
        self.inner.peak.load(AtomicOrdering::Relaxed)
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_capacity_respected() {
        let slots = PrioritySlots::new(2, "test");
        let a = slots.acquire(1.0).await;
        let _b = slots.acquire(1.0).await;
        assert_eq!(slots.in_use(), 2);

        let waiting = {
            let slots = slots.clone();
            tokio::spawn(async move { slots.acquire(1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(slots.waiting(), 1);

        drop(a);
        let _c = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slots.in_use(), 2);
        assert_eq!(slots.peak(), 2);
    }

    #[tokio::test]
    async fn test_highest_priority_admitted_first() {
        let slots = PrioritySlots::new(1, "test");
        let held = slots.acquire(0.0).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for priority in [1.0f32, 5.0, 3.0] {
            let slots = slots.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let permit = slots.acquire(priority).await;
                tx.send(priority).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(permit);
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(slots.waiting(), 3);

        drop(held);
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![5.0, 3.0, 1.0]);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_leak_slot() {
        let slots = PrioritySlots::new(1, "test");
        let held = slots.acquire(1.0).await;

        let abandoned = {
            let slots = slots.clone();
            tokio::spawn(async move { slots.acquire(9.0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();
        let _ = abandoned.await;

        drop(held);
        let permit = tokio::time::timeout(Duration::from_secs(1), slots.acquire(1.0))
            .await
            .expect("slot should be free again");
        assert_eq!(slots.in_use(), 1);
        drop(permit);
        assert_eq!(slots.in_use(), 0);
    }
}
