// src/pipeline/gate.rs

//! Counting permit gate that serves waiters by priority.
//!
//! Works like a semaphore, except that a released permit goes to the most
//! urgent waiter (lowest priority value) and, among equals, to the one that
//! has waited longest.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

#[derive(Debug)]
struct Waiter {
    priority: u8,
    seq: u64,
    tx: oneshot::Sender<GatePermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: the smallest (priority, seq) pair sorts highest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct GateState {
    available: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

type SharedState = Arc<Mutex<GateState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, GateState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A permit from a [`PriorityGate`], handed on when dropped.
#[derive(Debug)]
pub struct GatePermit {
    state: Option<SharedState>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        loop {
            let waiter = {
                let mut guard = lock(&state);
                match guard.waiters.pop() {
                    Some(waiter) => waiter,
                    None => {
                        guard.available += 1;
                        return;
                    }
                }
            };
            let permit = GatePermit {
                state: Some(Arc::clone(&state)),
            };
            match waiter.tx.send(permit) {
                Ok(()) => return,
                // Waiter gave up; disarm the bounced permit and try the next.
                Err(mut bounced) => {
                    bounced.state = None;
                }
            }
        }
    }
}

/// Bounded permit pool with priority-ordered waiters.
#[derive(Debug)]
pub struct PriorityGate {
    state: SharedState,
}

impl PriorityGate {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                available: permits,
                ..GateState::default()
            })),
        }
    }

    /// Wait for a permit. `None` only if the gate is torn down meanwhile.
    ///
    /// Dropping the returned future while it waits gives up the place in
    /// line; a permit already handed to it is passed on.
    pub async fn acquire(&self, priority: u8) -> Option<GatePermit> {
        let rx = {
            let mut guard = lock(&self.state);
            if guard.available > 0 && guard.waiters.is_empty() {
                guard.available -= 1;
                return Some(GatePermit {
                    state: Some(Arc::clone(&self.state)),
                });
            }
            let (tx, rx) = oneshot::channel();
            let seq = guard.next_seq;
            guard.next_seq += 1;
            guard.waiters.push(Waiter { priority, seq, tx });
            rx
        };
        rx.await.ok()
    }

    /// Number of callers waiting for a permit.
    pub fn waiting(&self) -> usize {
        lock(&self.state).waiters.len()
    }

    pub fn available(&self) -> usize {
        lock(&self.state).available
    }
}
