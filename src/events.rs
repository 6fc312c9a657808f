//! Market data event streams.
//!
//! Three broadcast channels feed the edge: per-trade events, BBO changes, and
//! L2 depth snapshots. Sends are best-effort; a send with no subscribers is
//! not an error, and slow subscribers may observe lagged or dropped messages.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::MatchingEngine;
use crate::models::{Bbo, DepthSnapshot, Trade};

pub struct EventBus {
    trades: broadcast::Sender<Trade>,
    bbo: broadcast::Sender<Bbo>,
    depth: broadcast::Sender<DepthSnapshot>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (trades, _) = broadcast::channel(capacity);
        let (bbo, _) = broadcast::channel(capacity);
        let (depth, _) = broadcast::channel(capacity);
        Self { trades, bbo, depth }
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<Trade> {
        self.trades.subscribe()
    }

    pub fn subscribe_bbo(&self) -> broadcast::Receiver<Bbo> {
        self.bbo.subscribe()
    }

    pub fn subscribe_depth(&self) -> broadcast::Receiver<DepthSnapshot> {
        self.depth.subscribe()
    }

    pub fn emit_trade(&self, trade: Trade) {
        let _ = self.trades.send(trade);
    }

    pub fn emit_bbo(&self, bbo: Bbo) {
        let _ = self.bbo.send(bbo);
    }

    pub fn emit_depth(&self, snapshot: DepthSnapshot) {
        let _ = self.depth.send(snapshot);
    }
}

/// Publish L2 snapshots for the given symbols on a fixed interval until the
/// returned handle is aborted. Snapshot depth comes from the engine
/// configuration.
pub fn spawn_depth_broadcaster(
    engine: Arc<MatchingEngine>,
    symbols: Vec<String>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let depth = engine.config().default_depth;
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for symbol in &symbols {
                if engine.publish_depth(symbol, depth).is_some() {
                    debug!(%symbol, "depth snapshot broadcast");
                }
            }
        }
    })
}
