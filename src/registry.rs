//! Feed registry and fanout
//!
//! Holds the venue-to-runner map for one asset, the bounded snapshot
//! channel feeding the aggregator, and the shared shutdown signal.

use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::FeedConfig;
use crate::runner::{read_state, FeedRunner, SharedFeedState};
use crate::types::{Asset, FeedStats, Snapshot, Venue};

pub struct FeedRegistry {
    asset: Asset,
    entries: Vec<(Venue, SharedFeedState)>,
    pending: Vec<FeedRunner>,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    snapshot_rx: Option<mpsc::Receiver<Snapshot>>,
}

impl FeedRegistry {
    /// Build runners for every venue. Fails on an empty or duplicated
    /// venue list; performs no I/O.
    pub fn new(asset: Asset, venues: &[Venue], config: Arc<FeedConfig>) -> Result<Self> {
        if venues.is_empty() {
            bail!("at least one venue is required");
        }

        // Bounded fanout sized for latest-wins coalescing.
        let capacity = (venues.len() * 2).max(16);
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = watch::channel(false);

        let mut entries: Vec<(Venue, SharedFeedState)> = Vec::with_capacity(venues.len());
        let mut pending = Vec::with_capacity(venues.len());
        for &venue in venues {
            if entries.iter().any(|(v, _)| *v == venue) {
                bail!("venue {} listed twice", venue);
            }
            let runner = FeedRunner::new(
                venue,
                asset,
                Arc::clone(&config),
                tx.clone(),
                shutdown_tx.subscribe(),
            );
            entries.push((venue, runner.state_handle()));
            pending.push(runner);
        }

        // The registry keeps no sender of its own: once every runner is
        // gone the channel closes and the aggregator drains out.
        Ok(Self {
            asset,
            entries,
            pending,
            handles: Vec::new(),
            shutdown_tx,
            snapshot_rx: Some(rx),
        })
    }

    /// The aggregator's ingress. Yields once.
    pub fn take_snapshot_rx(&mut self) -> Option<mpsc::Receiver<Snapshot>> {
        self.snapshot_rx.take()
    }

    /// Per-venue state handles, in registration order.
    pub fn states(&self) -> &[(Venue, SharedFeedState)] {
        &self.entries
    }

    /// A fresh receiver of the shared shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Launch every runner concurrently. Idempotent.
    pub fn start_all(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        info!(
            asset = %self.asset,
            venues = self.pending.len(),
            "starting feed runners"
        );
        for runner in self.pending.drain(..) {
            self.handles.push(tokio::spawn(runner.run()));
        }
    }

    /// Signal every runner to stop and wait for termination. Idempotent.
    pub async fn stop_all(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Current per-venue health, in registration order.
    pub fn stats(&self) -> Vec<FeedStats> {
        let now_ms = Utc::now().timestamp_millis();
        self.entries
            .iter()
            .map(|(venue, state)| {
                let st = read_state(state);
                FeedStats {
                    venue: *venue,
                    connected: st.connected,
                    last_price: st.last_snapshot.as_ref().map(|s| s.price),
                    age_ms: st
                        .last_snapshot
                        .as_ref()
                        .map(|s| s.age_ms(now_ms)),
                    message_count: st.message_count,
                    error_count: st.error_count,
                    reconnect_count: st.reconnect_count,
                }
            })
            .collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_venue_list() {
        let config = Arc::new(FeedConfig::default());
        assert!(FeedRegistry::new(Asset::BTC, &[], config).is_err());
    }

    #[test]
    fn rejects_duplicate_venue() {
        let config = Arc::new(FeedConfig::default());
        let venues = [Venue::Kraken, Venue::Kraken];
        assert!(FeedRegistry::new(Asset::BTC, &venues, config).is_err());
    }

    #[test]
    fn registration_order_is_preserved() {
        let config = Arc::new(FeedConfig::default());
        let venues = [Venue::Gemini, Venue::Binance, Venue::Okx];
        let registry = FeedRegistry::new(Asset::BTC, &venues, config).unwrap();
        let order: Vec<Venue> = registry.states().iter().map(|(v, _)| *v).collect();
        assert_eq!(order, venues);
    }
}
