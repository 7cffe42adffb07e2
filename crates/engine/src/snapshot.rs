//! Periodic depth snapshots into the time-series store.

use crate::{BookSnapshot, Engine, Level, Side};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use store::{SnapshotRow, Store};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Captures the top-N depth of every book on a fixed interval and
/// bulk-inserts the rows. A failed insert is logged and the batch is
/// discarded; the next tick persists fresh data instead.
pub struct SnapshotWriter<S> {
    engine: Engine,
    store: Arc<S>,
    interval: Duration,
    depth: usize,
}

impl<S: Store> SnapshotWriter<S> {
    pub fn new(engine: Engine, store: Arc<S>, interval: Duration, depth: usize) -> Self {
        Self {
            engine,
            store,
            interval,
            depth,
        }
    }

    /// Runs until `cancel` fires. A depth of zero disables snapshotting.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.depth == 0 {
            info!("snapshot writer disabled (depth 0)");
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, depth = self.depth, "snapshot writer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("snapshot writer stopped");
                    return;
                }
                _ = ticker.tick() => self.flush().await,
            }
        }
    }

    async fn flush(&self) {
        let snapshots = self.engine.take_snapshots(self.depth);
        if snapshots.is_empty() {
            return;
        }

        let mut rows = Vec::new();
        for snap in &snapshots {
            push_side_rows(&mut rows, snap, Side::Bid, &snap.bids);
            push_side_rows(&mut rows, snap, Side::Ask, &snap.asks);
        }
        if rows.is_empty() {
            return;
        }

        match self.store.insert_order_book_snapshot_batch(&rows).await {
            Ok(count) => {
                debug!(tokens = snapshots.len(), rows = count, "wrote snapshots");
                counter!("collector_snapshot_rows_total").increment(count);
            }
            Err(error) => error!(%error, "failed to write snapshots"),
        }
    }
}

/// One row per level; `level` is the 0-based position in best-first order,
/// so depth can be reconstructed downstream without re-sorting.
fn push_side_rows(rows: &mut Vec<SnapshotRow>, snap: &BookSnapshot, side: Side, levels: &[Level]) {
    for (index, level) in levels.iter().enumerate() {
        rows.push(SnapshotRow {
            time: level.updated_at,
            token_id: snap.token_id.clone(),
            side: side.as_str(),
            level: index as i16,
            price: level.price.0,
            size: level.size.0,
        });
    }
}
