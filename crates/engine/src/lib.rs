//! Order-book engine: per-token single-writer workers behind bounded queues.
//!
//! Updates enter through [`Engine::send`] and are routed by token id to a
//! lazily-spawned worker that owns that token's book. Queues drop the newest
//! update on overflow so stream I/O latency never couples to engine
//! processing latency. The snapshot path reads each book under a short read
//! lock and never blocks the owning worker for long.

pub mod orderbook;
pub mod snapshot;

use chrono::{DateTime, Utc};
use common::{Price, Size};
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use orderbook::{InvalidSide, Level, Orderbook, Side};
pub use snapshot::SnapshotWriter;

/// Default bound for the inbound queue and each worker queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A single level change for one token.
#[derive(Clone, Debug)]
pub struct Update {
    pub token_id: String,
    pub price: Price,
    pub size: Size,
    pub side: Side,
    /// Event time from the source; `None` means stamp with the current time.
    pub event_time: Option<DateTime<Utc>>,
    /// true = apply as a signed delta, false = absolute set.
    pub is_delta: bool,
}

/// Top-N depth of one token's book at an instant.
#[derive(Clone, Debug)]
pub struct BookSnapshot {
    pub token_id: String,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

struct Worker {
    book: RwLock<Orderbook>,
    tx: mpsc::Sender<Update>,
}

struct Inner {
    workers: RwLock<HashMap<String, Arc<Worker>>>,
    tx: mpsc::Sender<Update>,
    rx: Mutex<Option<mpsc::Receiver<Update>>>,
    capacity: usize,
}

/// The engine router. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates an engine whose inbound and per-worker queues hold at most
    /// `capacity` in-flight updates.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                workers: RwLock::new(HashMap::new()),
                tx,
                rx: Mutex::new(Some(rx)),
                capacity,
            }),
        }
    }

    /// Queues an update for processing. Returns false if the inbound queue
    /// is full; the update is dropped (drop-newest).
    pub fn send(&self, update: Update) -> bool {
        match self.inner.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(update)) => {
                warn!(token_id = %update.token_id, "engine queue full, dropping update");
                counter!("collector_dropped_updates_total", "queue" => "engine").increment(1);
                false
            }
            Err(TrySendError::Closed(update)) => {
                warn!(token_id = %update.token_id, "engine queue closed, dropping update");
                false
            }
        }
    }

    /// Consumes the inbound queue, routing each update to its token's
    /// worker. Returns when `cancel` fires; queued updates are not drained.
    pub async fn run(&self, cancel: CancellationToken) {
        let rx = self.inner.rx.lock().unwrap().take();
        let Some(mut rx) = rx else {
            warn!("engine router already running");
            return;
        };
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("engine router stopped");
                    return;
                }
                update = rx.recv() => {
                    let Some(update) = update else { return };
                    self.dispatch(update, &cancel);
                }
            }
        }
    }

    fn dispatch(&self, update: Update, cancel: &CancellationToken) {
        let worker = self.worker_for(&update.token_id, cancel);
        if let Err(TrySendError::Full(update)) = worker.tx.try_send(update) {
            warn!(token_id = %update.token_id, "worker queue full, dropping update");
            counter!("collector_dropped_updates_total", "queue" => "worker").increment(1);
        }
    }

    /// Finds or lazily creates the worker for a token id. Double-checked:
    /// shared-read lookup first, then exclusive insert-and-spawn.
    fn worker_for(&self, token_id: &str, cancel: &CancellationToken) -> Arc<Worker> {
        if let Some(worker) = self.inner.workers.read().unwrap().get(token_id) {
            return Arc::clone(worker);
        }

        let mut workers = self.inner.workers.write().unwrap();
        if let Some(worker) = workers.get(token_id) {
            return Arc::clone(worker);
        }

        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let worker = Arc::new(Worker {
            book: RwLock::new(Orderbook::new()),
            tx,
        });
        workers.insert(token_id.to_string(), Arc::clone(&worker));
        tokio::spawn(run_worker(
            Arc::clone(&worker),
            rx,
            cancel.clone(),
            token_id.to_string(),
        ));
        worker
    }

    /// Reads the top-N depth of every known book. Safe to call concurrently
    /// with updates; each book is read under its own read lock so a level
    /// is never observed torn.
    pub fn take_snapshots(&self, depth: usize) -> Vec<BookSnapshot> {
        let workers = self.inner.workers.read().unwrap();
        workers
            .iter()
            .map(|(token_id, worker)| {
                let book = worker.book.read().unwrap();
                BookSnapshot {
                    token_id: token_id.clone(),
                    bids: book.top_n(Side::Bid, depth),
                    asks: book.top_n(Side::Ask, depth),
                }
            })
            .collect()
    }

    /// Number of tokens with a live book.
    pub fn token_count(&self) -> usize {
        self.inner.workers.read().unwrap().len()
    }
}

/// Single-writer loop owning one book. Exits on cancellation without
/// draining its queue.
async fn run_worker(
    worker: Arc<Worker>,
    mut rx: mpsc::Receiver<Update>,
    cancel: CancellationToken,
    token_id: String,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%token_id, "worker stopped");
                return;
            }
            update = rx.recv() => {
                let Some(update) = update else { return };
                let at = update.event_time.unwrap_or_else(Utc::now);
                let mut book = worker.book.write().unwrap();
                if update.is_delta {
                    book.update(update.price, update.size, update.side, at);
                } else {
                    book.set(update.price, update.size, update.side, at);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn update(token: &str, price: &str, size: &str, side: Side) -> Update {
        Update {
            token_id: token.to_string(),
            price: price.parse().unwrap(),
            size: size.parse().unwrap(),
            side,
            event_time: None,
            is_delta: false,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn updates_apply_in_send_order() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        let router = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(cancel).await })
        };

        assert!(engine.send(update("T", "0.40", "100", Side::Bid)));
        assert!(engine.send(update("T", "0.42", "50", Side::Bid)));
        assert!(engine.send(update("T", "0.40", "0", Side::Bid)));
        settle().await;

        let snapshots = engine.take_snapshots(10);
        assert_eq!(snapshots.len(), 1);
        let snap = &snapshots[0];
        assert_eq!(snap.token_id, "T");
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].price, "0.42".parse().unwrap());
        assert_eq!(snap.bids[0].size, "50".parse().unwrap());

        cancel.cancel();
        router.await.unwrap();
    }

    #[tokio::test]
    async fn one_worker_per_token() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        let router = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(cancel).await })
        };

        let mut senders = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            senders.push(tokio::spawn(async move {
                for j in 0..10 {
                    let px = format!("0.{:02}", 10 + (i * 10 + j) % 80);
                    engine.send(update("T", &px, "1", Side::Ask));
                }
            }));
        }
        for s in senders {
            s.await.unwrap();
        }
        settle().await;

        assert_eq!(engine.token_count(), 1);

        cancel.cancel();
        router.await.unwrap();
    }

    #[tokio::test]
    async fn drops_newest_when_queue_full() {
        let engine = Engine::with_capacity(1);

        // Router not running yet, so the single slot fills and the rest drop.
        let mut accepted = 0;
        for i in 0..6 {
            let px = format!("0.4{i}");
            if engine.send(update("T", &px, "10", Side::Bid)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        let cancel = CancellationToken::new();
        let router = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(cancel).await })
        };
        settle().await;

        // Only the first update made it through.
        let snapshots = engine.take_snapshots(10);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].bids.len(), 1);
        assert_eq!(snapshots[0].bids[0].price, "0.40".parse().unwrap());

        // The engine remains operational after the overflow.
        assert!(engine.send(update("T", "0.45", "10", Side::Bid)));
        settle().await;
        assert_eq!(engine.take_snapshots(10)[0].bids.len(), 2);

        cancel.cancel();
        router.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_router_without_draining() {
        let engine = Engine::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // run returns promptly even with queued updates
        engine.send(update("T", "0.50", "10", Side::Bid));
        engine.run(cancel).await;
        assert_eq!(engine.token_count(), 0);
    }
}
