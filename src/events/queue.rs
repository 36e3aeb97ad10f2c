//! Delivery queue: runs subscriber callbacks off the emitting thread.
//!
//! Emit hands each [`Delivery`] to a [`DeliveryQueue`] and returns at once.
//! [`WorkerQueue`] is the default implementation: a bounded channel drained
//! by a small pool of named worker threads. Enqueue never blocks; when the
//! queue is full or closed the delivery is dropped, which releases its
//! reference without running the callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::error::{EventError, EventResult};

use super::delivery::{Delivery, DeliveryStatus};

/// Why a delivery could not be queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Every slot is taken
    #[error("delivery queue is full (capacity {capacity})")]
    Full {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The queue was shut down
    #[error("delivery queue is closed")]
    Closed,
}

/// Counters describing what happened to deliveries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Callback ran and consumed the delivery.
    pub delivered: u64,
    /// Callback ran and left the subscription armed.
    pub ignored: u64,
    /// Callback returned an error or panicked.
    pub failed: u64,
    /// Subscription was destroyed before the callback ran.
    pub skipped: u64,
    /// Dropped by `stop_processing` without running.
    pub discarded: u64,
    /// Rejected at enqueue (full or closed).
    pub dropped: u64,
}

/// Destination for deliveries produced by emit.
///
/// An implementation takes ownership of each delivery and must eventually
/// either call [`Delivery::deliver`] or drop/discard it; both release the
/// delivery reference.
pub trait DeliveryQueue: Send + Sync {
    /// Queues a delivery without blocking.
    fn enqueue(&self, delivery: Delivery) -> Result<(), EnqueueError>;

    /// Stops accepting deliveries and finishes the pending ones.
    fn shutdown(&self);

    /// Stops accepting deliveries and discards the pending ones.
    fn stop_processing(&self);

    /// Delivery counters, if the implementation keeps them.
    fn stats(&self) -> QueueStats {
        QueueStats::default()
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    discarded: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Thread-pool delivery queue over a bounded crossbeam channel.
#[derive(Debug)]
pub struct WorkerQueue {
    tx: RwLock<Option<Sender<Delivery>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl WorkerQueue {
    /// Starts `workers` threads draining a queue of `capacity` deliveries.
    pub fn start(workers: usize, capacity: usize) -> EventResult<Self> {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<Delivery>(capacity);

        let queue = Self {
            tx: RwLock::new(Some(tx)),
            workers: Mutex::new(Vec::with_capacity(workers)),
            stopping: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            capacity,
        };

        for idx in 0..workers {
            let rx: Receiver<Delivery> = rx.clone();
            let stopping = Arc::clone(&queue.stopping);
            let counters = Arc::clone(&queue.counters);
            let spawned = thread::Builder::new()
                .name(format!("graphwatch-delivery-{idx}"))
                .spawn(move || worker_loop(&rx, &stopping, &counters));
            match spawned {
                Ok(handle) => queue
                    .workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle),
                Err(e) => {
                    // Dropping `queue` closes the channel and joins what was spawned.
                    return Err(EventError::internal(format!("failed to spawn delivery worker: {e}")));
                }
            }
        }

        debug!(workers, capacity, "delivery queue started");
        Ok(queue)
    }

    /// Maximum number of queued deliveries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Closes the channel and joins workers. Workers drain what is queued.
    fn close_and_join(&self) {
        let tx = self.tx.write().unwrap_or_else(PoisonError::into_inner).take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let me = thread::current().id();
        for handle in handles {
            // A callback tearing the system down must not join its own thread.
            if handle.thread().id() == me {
                continue;
            }
            let _ = handle.join();
        }
        debug!("delivery queue stopped");
    }
}

impl DeliveryQueue for WorkerQueue {
    fn enqueue(&self, delivery: Delivery) -> Result<(), EnqueueError> {
        let tx = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let result = match tx.as_ref() {
            None => Err(EnqueueError::Closed),
            Some(tx) => match tx.try_send(delivery) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(EnqueueError::Full {
                    capacity: self.capacity,
                }),
                Err(TrySendError::Disconnected(_)) => Err(EnqueueError::Closed),
            },
        };
        if result.is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn shutdown(&self) {
        self.close_and_join();
    }

    fn stop_processing(&self) {
        self.stopping.store(true, Ordering::Release);
        self.close_and_join();
    }

    fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

fn worker_loop(rx: &Receiver<Delivery>, stopping: &AtomicBool, counters: &Counters) {
    for delivery in rx.iter() {
        if stopping.load(Ordering::Acquire) {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            delivery.discard();
            continue;
        }

        let subscription = delivery.subscription().id();
        match delivery.deliver() {
            DeliveryStatus::Consumed => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryStatus::Ignored => {
                counters.ignored.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryStatus::Skipped => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryStatus::Failed(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(subscription = %subscription, error = %err, "delivery callback failed");
            }
        }
        trace!(subscription = %subscription, "delivery finished");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::element::{AccessLevels, ChangeKind, ElementId};
    use crate::events::subscription::{Callback, Outcome, Subscription};
    use crate::error::CallbackError;

    fn sub_with(callback: Callback) -> Arc<Subscription> {
        Arc::new(Subscription::new(
            ElementId::new(1),
            ChangeKind::ContentChanged,
            AccessLevels::FULL,
            callback,
            None,
            None,
        ))
    }

    fn delivery(sub: &Arc<Subscription>) -> Delivery {
        Delivery::new(sub.try_acquire().unwrap(), ElementId::new(2), ElementId::new(3))
    }

    #[test]
    fn workers_invoke_callbacks_and_count() {
        let (tx, rx) = unbounded::<ElementId>();
        let ok = sub_with(Callback::simple(move |_, edge| {
            let _ = tx.send(edge);
            Ok(Outcome::Consumed)
        }));
        let bad = sub_with(Callback::simple(|_, _| Err(CallbackError::new("nope"))));

        let queue = WorkerQueue::start(2, 16).unwrap();
        queue.enqueue(delivery(&ok)).unwrap();
        queue.enqueue(delivery(&bad)).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ElementId::new(2));
        queue.shutdown();

        let stats = queue.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(ok.live_references(), 1);
        assert_eq!(bad.live_references(), 1);
    }

    #[test]
    fn enqueue_after_shutdown_is_closed_and_releases() {
        let sub = sub_with(Callback::simple(|_, _| Ok(Outcome::Consumed)));
        let queue = WorkerQueue::start(1, 4).unwrap();
        queue.shutdown();
        queue.shutdown();

        let err = queue.enqueue(delivery(&sub)).unwrap_err();
        assert_eq!(err, EnqueueError::Closed);
        assert_eq!(sub.live_references(), 1);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<()>();
        let blocker = sub_with(Callback::simple(move |_, _| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            Ok(Outcome::Consumed)
        }));

        let queue = WorkerQueue::start(1, 1).unwrap();
        queue.enqueue(delivery(&blocker)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        // Worker is busy; one slot in the channel, then it is full.
        queue.enqueue(delivery(&blocker)).unwrap();
        let err = queue.enqueue(delivery(&blocker)).unwrap_err();
        assert_eq!(err, EnqueueError::Full { capacity: 1 });
        assert_eq!(blocker.live_references(), 3);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        queue.shutdown();
        assert_eq!(blocker.live_references(), 1);
        assert_eq!(queue.stats().delivered, 2);
    }

    #[test]
    fn stop_processing_discards_pending() {
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<()>();
        let blocker = sub_with(Callback::simple(move |_, _| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            Ok(Outcome::Consumed)
        }));

        let queue = Arc::new(WorkerQueue::start(1, 8).unwrap());
        queue.enqueue(delivery(&blocker)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        for _ in 0..3 {
            queue.enqueue(delivery(&blocker)).unwrap();
        }

        let stopper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.stop_processing())
        };
        // Let stop_processing raise the flag before the worker is released.
        thread::sleep(Duration::from_millis(50));
        gate_tx.send(()).unwrap();
        stopper.join().unwrap();

        let stats = queue.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.discarded, 3);
        assert_eq!(blocker.live_references(), 1);
    }
}
