//! Batching mix engine.
//!
//! Peeled messages accumulate in a queue. On every dispatch cycle the whole
//! queue is drained at once, shuffled, and forwarded in the shuffled order,
//! so the order messages leave a mix says nothing about the order they came
//! in.

use crate::error::{MixnetError, Result};
use crate::hop::HopState;
use crate::message::WireMessage;
use crate::types::NodeId;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Sends an already-peeled message on to its next hop.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, next_hop: &NodeId, message: &WireMessage) -> Result<()>;
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub batch_size: usize,
    pub forwarded: usize,
    pub dropped: usize,
}

/// Cumulative engine counters.
#[derive(Debug, Default)]
pub struct MixStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    cycles: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl MixStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Enqueues refused because the engine was closed
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Non-empty cycles only
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct MixQueue {
    messages: Vec<WireMessage>,
    accepting: bool,
}

/// Queue plus dispatch logic owned by one mix node.
pub struct MixEngine {
    node_id: NodeId,
    queue: Mutex<MixQueue>,
    stats: MixStats,
}

impl MixEngine {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            queue: Mutex::new(MixQueue {
                messages: Vec::new(),
                accepting: true,
            }),
            stats: MixStats::default(),
        }
    }

    /// Adds a message to the current batch.
    ///
    /// The queue is unbounded. Fails with `EngineStopped` once the engine has
    /// been closed.
    pub fn enqueue(&self, message: WireMessage) -> Result<()> {
        let mut queue = self.queue.lock();
        if !queue.accepting {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(MixnetError::EngineStopped);
        }
        queue.messages.push(message);
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Current queue depth.
    pub fn pending(&self) -> usize {
        self.queue.lock().messages.len()
    }

    /// Stops accepting messages. Whatever is still queued stays queued.
    pub fn close(&self) {
        self.queue.lock().accepting = false;
        debug!(node = %self.node_id, "Mix engine closed");
    }

    pub fn is_closed(&self) -> bool {
        !self.queue.lock().accepting
    }

    pub fn stats(&self) -> &MixStats {
        &self.stats
    }

    /// Takes the entire queue in one step and lets `order` permute it.
    /// Anything enqueued afterwards waits for the next cycle.
    fn drain_ordered<F>(&self, order: F) -> Vec<WireMessage>
    where
        F: FnOnce(&mut [WireMessage]),
    {
        let mut batch = std::mem::take(&mut self.queue.lock().messages);
        order(&mut batch);
        batch
    }

    /// Runs one cycle: drain, shuffle uniformly, forward each message to the
    /// node at its current hop index. A failed forward drops only that message.
    pub async fn dispatch_cycle(&self, forwarder: &dyn Forwarder) -> CycleReport {
        self.dispatch_cycle_with(forwarder, |batch| batch.shuffle(&mut rand::thread_rng()))
            .await
    }

    /// [`dispatch_cycle`](Self::dispatch_cycle) with the batch permuted by
    /// `order` instead of a random shuffle.
    pub async fn dispatch_cycle_with<F>(&self, forwarder: &dyn Forwarder, order: F) -> CycleReport
    where
        F: FnOnce(&mut [WireMessage]),
    {
        let batch = self.drain_ordered(order);
        if batch.is_empty() {
            return CycleReport::default();
        }

        let mut report = CycleReport {
            batch_size: batch.len(),
            ..CycleReport::default()
        };
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        debug!(node = %self.node_id, batch_size = report.batch_size, "Dispatching batch");

        for message in batch {
            let outcome = match message.current_recipient() {
                Ok(next_hop) => forwarder.forward(next_hop, &message).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    trace!(node = %self.node_id, state = %HopState::Forwarded, "Message left the mix");
                    report.forwarded += 1;
                    self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(node = %self.node_id, state = %HopState::Dropped, error = %e, "Dropping message during dispatch");
                    report.dropped += 1;
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        info!(
            node = %self.node_id,
            batch_size = report.batch_size,
            forwarded = report.forwarded,
            dropped = report.dropped,
            "Dispatch cycle complete"
        );
        report
    }

    /// Starts the periodic dispatcher. The first cycle fires immediately.
    ///
    /// Fails with `Configuration` for a zero interval.
    pub fn spawn(self: &Arc<Self>, forwarder: Arc<dyn Forwarder>, interval: Duration) -> Result<DispatchHandle> {
        if interval.is_zero() {
            return Err(MixnetError::Configuration(
                "dispatch interval must be greater than zero".to_string(),
            ));
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(node = %engine.node_id, interval_ms = interval.as_millis() as u64, "Mix dispatcher started");

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        engine.dispatch_cycle(forwarder.as_ref()).await;
                    }
                }
            }

            info!(node = %engine.node_id, pending = engine.pending(), "Mix dispatcher stopped");
        });

        Ok(DispatchHandle { stop_tx, task })
    }
}

/// Handle to a running dispatcher.
pub struct DispatchHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    /// Signals the dispatcher to stop and waits for an in-flight cycle to
    /// finish, aborting it after `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(timeout, &mut self.task).await.is_err() {
            warn!(timeout_ms = timeout.as_millis() as u64, "Dispatcher did not stop in time, aborting");
            self.task.abort();
        }
    }
}
