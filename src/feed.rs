//! Public facade
//!
//! One `Feed` per asset: owns the venue runners, the aggregator and the
//! oracle probe, and exposes the read surface trading strategies consume.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::aggregator::{calculate_momentum, Aggregator};
use crate::config::FeedConfig;
use crate::oracle::{oracle_signal, OracleProbe};
use crate::registry::FeedRegistry;
use crate::types::{Asset, FeedStats, OracleSignal, PriceReport, Venue};

pub struct Feed {
    asset: Asset,
    config: Arc<FeedConfig>,
    registry: FeedRegistry,
    report_rx: watch::Receiver<Option<PriceReport>>,
    aggregator: Option<Aggregator>,
    aggregator_handle: Option<JoinHandle<()>>,
    oracle: Option<OracleProbe>,
    window_start_price: Option<f64>,
    started: bool,
}

impl Feed {
    /// Validate the configuration and build every component. Performs no
    /// I/O; a bad config or venue list fails here, before any socket.
    pub fn new(asset: Asset, venues: &[Venue], config: FeedConfig) -> Result<Self> {
        config.validate().context("invalid feed configuration")?;
        let config = Arc::new(config);

        let registry = FeedRegistry::new(asset, venues, Arc::clone(&config))?;
        let (aggregator, report_rx) =
            Aggregator::new(asset, Arc::clone(&config), registry.states().to_vec());
        let oracle = config.oracle_enabled.then(|| OracleProbe::from_env(asset));

        Ok(Self {
            asset,
            config,
            registry,
            report_rx,
            aggregator: Some(aggregator),
            aggregator_handle: None,
            oracle,
            window_start_price: None,
            started: false,
        })
    }

    /// `new` with venue tags, for callers holding strings.
    pub fn from_tags(asset: Asset, tags: &[&str], config: FeedConfig) -> Result<Self> {
        let venues = tags
            .iter()
            .map(|tag| Venue::from_tag(tag).with_context(|| format!("unknown venue tag: {}", tag)))
            .collect::<Result<Vec<Venue>>>()?;
        Self::new(asset, &venues, config)
    }

    /// Launch runners, aggregator and oracle probe. Returns immediately;
    /// connections establish in the background. Idempotent.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let snapshot_rx = self.registry.take_snapshot_rx();
        self.registry.start_all();

        if let (Some(aggregator), Some(rx)) = (self.aggregator.take(), snapshot_rx) {
            let shutdown = self.registry.shutdown_signal();
            self.aggregator_handle = Some(tokio::spawn(aggregator.run(rx, shutdown)));
        }
        if let Some(oracle) = self.oracle.as_mut() {
            oracle.start(self.registry.shutdown_signal());
        }

        info!(asset = %self.asset, "feed started");
    }

    /// Signal every worker to stop, close sockets and wait for
    /// termination. Idempotent.
    pub async fn stop(&mut self) {
        self.registry.stop_all().await;
        if let Some(handle) = self.aggregator_handle.take() {
            let _ = handle.await;
        }
        if let Some(oracle) = self.oracle.as_mut() {
            oracle.stop().await;
        }
        if self.started {
            self.started = false;
            info!(asset = %self.asset, "feed stopped");
        }
    }

    /// Latest report, or `None` before the first successful aggregation
    /// or once the report has gone stale (older than twice the snapshot
    /// staleness bound).
    pub fn get_report(&self) -> Option<PriceReport> {
        let report = self.report_rx.borrow().clone()?;
        let now_ms = Utc::now().timestamp_millis();
        if report.age_ms(now_ms) > 2 * self.config.max_staleness_ms {
            return None;
        }
        Some(report)
    }

    pub fn get_price(&self) -> Option<f64> {
        self.get_report().map(|r| r.price)
    }

    pub fn get_divergence(&self) -> Option<f64> {
        self.get_report().map(|r| r.divergence_pct)
    }

    pub fn get_confidence(&self) -> Option<f64> {
        self.get_report().map(|r| r.confidence)
    }

    pub fn get_usdt_premium(&self) -> Option<f64> {
        self.get_report().map(|r| r.usdt_premium_pct)
    }

    /// Lead-lag signal against the oracle, or `None` when the oracle is
    /// disabled or either side has no price yet.
    pub fn get_oracle_signal(&self) -> Option<OracleSignal> {
        let oracle = self.oracle.as_ref()?;
        let quote = oracle.latest()?;
        let price = self.get_price()?;
        Some(oracle_signal(price, quote.price))
    }

    /// Per-venue health, in registration order.
    pub fn feed_stats(&self) -> Vec<FeedStats> {
        self.registry.stats()
    }

    /// Divergence above the advisory threshold.
    pub fn is_divergence_warning(&self) -> bool {
        self.get_divergence()
            .map(|d| d > self.config.divergence_warning_pct)
            .unwrap_or(false)
    }

    /// Divergence in manipulation territory.
    pub fn is_divergence_critical(&self) -> bool {
        self.get_divergence()
            .map(|d| d > self.config.divergence_critical_pct)
            .unwrap_or(false)
    }

    /// Remember the current price as the start of a momentum window.
    pub fn mark_window_start(&mut self) {
        self.window_start_price = self.get_price();
    }

    /// Percentage change since `mark_window_start`.
    pub fn get_momentum(&self) -> Option<f64> {
        let current = self.get_price()?;
        let start = self.window_start_price?;
        Some(calculate_momentum(current, start))
    }
}
