//! Subscription hub (spec §4.C): fans the latest diff out to every live
//! subscriber through a bounded, coalescing FIFO. Registration and
//! unregistration flow through the manager's own event loop (spec §9
//! "Single-writer discipline... to avoid locks on the hot path"); the FIFO
//! itself is a small `parking_lot::Mutex<VecDeque<_>>` shared between the
//! hub and the `Subscription` handle so `recv` can be awaited without
//! involving the manager at all, matching "the manager itself must not
//! block waiting on any subscriber" (spec §9).

use parking_lot::Mutex;
use port_manager_core::Diff;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 8;

struct SubscriberState {
    queue: Mutex<VecDeque<Diff>>,
    notify: Notify,
    manager_closed: AtomicBool,
}

/// A live subscription. Dropping it (or calling `close`) unregisters it
/// from the hub; both are idempotent.
pub struct Subscription {
    id: u64,
    state: Arc<SubscriberState>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    closed: bool,
}

impl Subscription {
    /// Awaits the next diff. Returns `None` once the manager has shut down
    /// and every already-queued diff has been delivered.
    pub async fn recv(&mut self) -> Option<Diff> {
        loop {
            let notified = self.state.notify.notified();
            if let Some(diff) = self.state.queue.lock().pop_front() {
                return Some(diff);
            }
            if self.state.manager_closed.load(Ordering::Acquire) {
                return self.state.queue.lock().pop_front();
            }
            notified.await;
        }
    }

    /// Unregisters this subscription. Safe to call more than once; never
    /// blocks the manager (it's a best-effort, non-blocking send).
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.unregister_tx.send(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owned exclusively by the manager's event loop.
pub struct SubscriptionHub {
    capacity: usize,
    subscribers: HashMap<u64, Arc<SubscriberState>>,
    next_id: u64,
    unregister_tx: mpsc::UnboundedSender<u64>,
    pub unregister_rx: mpsc::UnboundedReceiver<u64>,
}

impl SubscriptionHub {
    pub fn new(capacity: usize) -> Self {
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        Self {
            capacity,
            subscribers: HashMap::new(),
            next_id: 0,
            unregister_tx,
            unregister_rx,
        }
    }

    /// Registers a new subscriber with an initial diff (an all-`added`
    /// snapshot of current state, or empty if there is none — spec §4.A
    /// "On registration the subscriber receives an initial Diff consisting
    /// entirely of `added` entries matching the current snapshot").
    pub fn register(&mut self, initial: Diff) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;

        let mut queue = VecDeque::with_capacity(self.capacity);
        if !initial.is_empty() {
            queue.push_back(initial);
        }
        let state = Arc::new(SubscriberState {
            queue: Mutex::new(queue),
            notify: Notify::new(),
            manager_closed: AtomicBool::new(false),
        });
        self.subscribers.insert(id, state.clone());

        Subscription {
            id,
            state,
            unregister_tx: self.unregister_tx.clone(),
            closed: false,
        }
    }

    pub fn unregister(&mut self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deposits `diff` into every live subscriber's FIFO, coalescing the
    /// two oldest pending diffs when a FIFO is already at capacity (spec
    /// §4.C: "the oldest diff is coalesced into the next... rather than
    /// dropped").
    pub fn publish(&self, diff: &Diff) {
        if diff.is_empty() {
            return;
        }
        for state in self.subscribers.values() {
            let mut queue = state.queue.lock();
            queue.push_back(diff.clone());
            if queue.len() > self.capacity {
                let oldest = queue.pop_front().expect("just observed len > capacity >= 1");
                let next = queue.pop_front().expect("just observed len > capacity >= 2");
                queue.push_front(oldest.coalesce(next));
            }
            drop(queue);
            state.notify.notify_one();
        }
    }

    /// Marks every subscriber closed so pending `recv` calls drain their
    /// queue and then return `None`, without the manager having to wait on
    /// them (spec §5 "Cancellation & timeout").
    pub fn close_all(&self) {
        for state in self.subscribers.values() {
            state.manager_closed.store(true, Ordering::Release);
            state.notify.notify_waiters();
        }
    }
}
