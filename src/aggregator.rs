//! Price aggregation
//!
//! On every inbound snapshot the engine recomputes the reference price:
//! staleness filtering, USD/USDT segregation with premium normalization,
//! outlier rejection, median reduction, then divergence and confidence
//! statistics. Reports publish through a single-writer watch slot.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::runner::{read_state, SharedFeedState};
use crate::types::{Asset, PriceReport, QuoteUnit, Snapshot, Venue};

/// Aggregation worker: one per asset, sole writer of the report slot.
pub struct Aggregator {
    asset: Asset,
    config: Arc<FeedConfig>,
    feeds: Vec<(Venue, SharedFeedState)>,
    report_tx: watch::Sender<Option<PriceReport>>,
}

impl Aggregator {
    pub fn new(
        asset: Asset,
        config: Arc<FeedConfig>,
        feeds: Vec<(Venue, SharedFeedState)>,
    ) -> (Self, watch::Receiver<Option<PriceReport>>) {
        let (report_tx, report_rx) = watch::channel(None);
        (
            Self {
                asset,
                config,
                feeds,
                report_tx,
            },
            report_rx,
        )
    }

    /// Consume the fanout channel until shutdown. Each arrival is only a
    /// wake-up: the latest per-venue snapshots are read from FeedState.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<Snapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe = rx.recv() => match maybe {
                    Some(_) => self.refresh(),
                    // All runners gone; nothing further can arrive.
                    None => break,
                }
            }
        }
        debug!(asset = %self.asset, "aggregator stopped");
    }

    fn refresh(&self) {
        let snapshots: Vec<Snapshot> = self
            .feeds
            .iter()
            .filter_map(|(_, state)| read_state(state).last_snapshot.clone())
            .collect();

        let now_ms = Utc::now().timestamp_millis();
        if let Some(report) = aggregate(self.asset, &snapshots, now_ms, &self.config) {
            if report.divergence_pct >= self.config.divergence_critical_pct {
                warn!(
                    asset = %self.asset,
                    divergence_pct = report.divergence_pct,
                    "critical cross-venue divergence"
                );
            } else if report.divergence_pct >= self.config.divergence_warning_pct {
                warn!(
                    asset = %self.asset,
                    divergence_pct = report.divergence_pct,
                    "elevated cross-venue divergence"
                );
            }
            let _ = self.report_tx.send(Some(report));
        }
    }
}

/// Deterministic aggregation over one set of snapshots.
///
/// Returns `None` when fewer than `min_sources` venues survive filtering;
/// the previous report stays in the slot in that case.
pub fn aggregate(
    asset: Asset,
    snapshots: &[Snapshot],
    now_ms: i64,
    config: &FeedConfig,
) -> Option<PriceReport> {
    // 1. Staleness filter.
    let fresh: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| {
            s.asset == asset && s.price > 0.0 && s.age_ms(now_ms) <= config.max_staleness_ms
        })
        .collect();
    if fresh.is_empty() {
        return None;
    }

    // 2. Segregate by settlement currency.
    let usd: Vec<f64> = fresh
        .iter()
        .filter(|s| s.quote_unit == QuoteUnit::Usd)
        .map(|s| s.price)
        .collect();
    let usdt: Vec<f64> = fresh
        .iter()
        .filter(|s| s.quote_unit == QuoteUnit::Usdt)
        .map(|s| s.price)
        .collect();

    // 3. USDT premium, derivable only when both sides are present.
    let usdt_premium_pct = if !usd.is_empty() && !usdt.is_empty() {
        let usd_median = median(&usd);
        let usdt_median = median(&usdt);
        (usdt_median - usd_median) / usd_median * 100.0
    } else {
        0.0
    };

    // 4. Normalize USDT quotes back to USD.
    let normalized: Vec<(Venue, f64)> = fresh
        .iter()
        .map(|s| {
            let price = match s.quote_unit {
                QuoteUnit::Usd => s.price,
                QuoteUnit::Usdt => s.price / (1.0 + usdt_premium_pct / 100.0),
            };
            (s.venue, price)
        })
        .collect();

    // 5. Outlier rejection against the pre-reduction median.
    let all_prices: Vec<f64> = normalized.iter().map(|(_, p)| *p).collect();
    let m0 = median(&all_prices);
    let accepted: Vec<(Venue, f64)> = normalized
        .into_iter()
        .filter(|(_, p)| (p - m0).abs() / m0 * 100.0 <= config.max_deviation_pct)
        .collect();

    // 6. Degraded below the minimum: no new report.
    if accepted.len() < config.min_sources {
        return None;
    }

    // 7. Median reduction.
    let prices: Vec<f64> = accepted.iter().map(|(_, p)| *p).collect();
    let price = median(&prices);

    // 8. Statistics.
    let max = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let divergence_pct = (max - min) / price * 100.0;
    let spread_pct = if prices.len() < 2 {
        0.0
    } else {
        sample_stdev(&prices) / price * 100.0
    };
    let confidence = confidence_from_spread(spread_pct, config);

    // 9. Publish.
    let sources_used: Vec<String> = accepted.iter().map(|(v, _)| v.tag().to_string()).collect();
    Some(PriceReport::new(
        asset,
        price,
        sources_used,
        divergence_pct,
        confidence,
        usdt_premium_pct,
        now_ms,
    ))
}

/// Median of a non-empty slice; an even count averages the middle two.
pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Sample standard deviation; 0 below two observations.
fn sample_stdev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

/// Map the relative spread into [0.5, 1.0]: 1.0 at or under the tight
/// band, 0.5 at or over the critical band, linear between.
fn confidence_from_spread(spread_pct: f64, config: &FeedConfig) -> f64 {
    if spread_pct <= config.tight_spread_pct {
        1.0
    } else if spread_pct >= config.divergence_critical_pct {
        0.5
    } else {
        let range = config.divergence_critical_pct - config.tight_spread_pct;
        let excess = spread_pct - config.tight_spread_pct;
        (1.0 - (excess / range) * 0.5).max(0.5)
    }
}

/// Percentage change of `current_price` against a window start.
pub fn calculate_momentum(current_price: f64, start_price: f64) -> f64 {
    if start_price <= 0.0 {
        return 0.0;
    }
    (current_price - start_price) / start_price * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn snap(venue: Venue, price: f64, age_ms: i64) -> Snapshot {
        Snapshot::new(venue, Asset::BTC, price, None, None, NOW_MS - age_ms)
    }

    fn cfg() -> FeedConfig {
        FeedConfig::default()
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[100.0, 100.5, 101.0]), 100.5);
        // Even count averages the middle two.
        assert_eq!(median(&[100.0, 102.0, 101.0, 103.0]), 101.5);
        assert_eq!(median(&[42.0]), 42.0);
    }

    #[test]
    fn stale_snapshots_never_contribute() {
        let stale_age = cfg().max_staleness_ms + 500;
        let snapshots = vec![
            snap(Venue::Coinbase, 97000.0, 0),
            snap(Venue::Kraken, 97010.0, 0),
            snap(Venue::Gemini, 200000.0, stale_age),
        ];
        let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        assert_eq!(report.source_count, 2);
        assert!(!report.sources_used.contains(&"gemini".to_string()));
    }

    #[test]
    fn all_stale_yields_no_report() {
        let stale_age = cfg().max_staleness_ms + 1000;
        let snapshots = vec![
            snap(Venue::Coinbase, 97000.0, stale_age),
            snap(Venue::Kraken, 97010.0, stale_age),
        ];
        assert!(aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).is_none());
    }

    #[test]
    fn below_min_sources_yields_no_report() {
        let snapshots = vec![snap(Venue::Coinbase, 97000.0, 0)];
        assert!(aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).is_none());
    }

    #[test]
    fn outlier_never_reaches_the_median() {
        // Two USD venues agree; the third is 3% out and gets cut. (A lone
        // USDT quote would be pulled onto the USD median by normalization,
        // so the outlier must sit inside one quote unit.)
        let snapshots = vec![
            snap(Venue::Coinbase, 97000.0, 0),
            snap(Venue::Kraken, 97000.0, 0),
            snap(Venue::Gemini, 100000.0, 0),
        ];
        let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        assert!(!report.sources_used.contains(&"gemini".to_string()));
        assert_eq!(report.source_count, 2);
        assert_eq!(report.price, 97000.0);
    }

    #[test]
    fn premium_matches_median_formula() {
        let snapshots = vec![
            snap(Venue::Coinbase, 100.00, 0),
            snap(Venue::Kraken, 100.00, 0),
            snap(Venue::Binance, 100.20, 0),
            snap(Venue::Okx, 100.20, 0),
        ];
        let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        let expected = (100.20 - 100.00) / 100.00 * 100.0;
        assert!((report.usdt_premium_pct - expected).abs() < 1e-9);
    }

    #[test]
    fn premium_zero_without_usd_reference() {
        let snapshots = vec![
            snap(Venue::Binance, 50000.0, 0),
            snap(Venue::Okx, 50100.0, 0),
        ];
        let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        assert_eq!(report.usdt_premium_pct, 0.0);
        // USDT prices are used raw when no USD side exists.
        assert_eq!(report.price, 50050.0);
    }

    #[test]
    fn price_stays_within_accepted_range() {
        let snapshots = vec![
            snap(Venue::Coinbase, 96950.0, 0),
            snap(Venue::Kraken, 97000.0, 0),
            snap(Venue::Gemini, 97050.0, 0),
        ];
        let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        assert!(report.price >= 96950.0 && report.price <= 97050.0);
        assert!(report.confidence >= 0.5 && report.confidence <= 1.0);
    }

    #[test]
    fn exact_agreement_means_full_confidence() {
        let snapshots = vec![
            snap(Venue::Coinbase, 97000.0, 0),
            snap(Venue::Kraken, 97000.0, 0),
            snap(Venue::Gemini, 97000.0, 0),
        ];
        let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        assert_eq!(report.divergence_pct, 0.0);
        assert_eq!(report.confidence, 1.0);
    }

    #[test]
    fn confidence_band_is_linear() {
        let config = cfg();
        assert_eq!(confidence_from_spread(0.05, &config), 1.0);
        assert_eq!(confidence_from_spread(0.10, &config), 1.0);
        // Mid-band: 1.0 - (0.30 - 0.1)/0.4 * 0.5 = 0.75.
        assert!((confidence_from_spread(0.30, &config) - 0.75).abs() < 1e-12);
        assert_eq!(confidence_from_spread(0.50, &config), 0.5);
        assert_eq!(confidence_from_spread(2.0, &config), 0.5);
    }

    #[test]
    fn rerun_is_hash_idempotent() {
        let snapshots = vec![
            snap(Venue::Coinbase, 97000.0, 0),
            snap(Venue::Kraken, 97012.5, 0),
            snap(Venue::Bybit, 97164.9, 0),
        ];
        let a = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        let b = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        assert_eq!(a.integrity_hash, b.integrity_hash);
    }

    #[test]
    fn sources_are_sorted_for_hash_stability() {
        let snapshots = vec![
            snap(Venue::Kraken, 97000.0, 0),
            snap(Venue::Coinbase, 97000.0, 0),
            snap(Venue::Gemini, 97000.0, 0),
        ];
        let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &cfg()).unwrap();
        assert_eq!(report.sources_used, vec!["coinbase", "gemini", "kraken"]);
    }

    #[test]
    fn momentum_signs_and_guards() {
        assert!((calculate_momentum(105.0, 100.0) - 5.0).abs() < 1e-12);
        assert!((calculate_momentum(95.0, 100.0) + 5.0).abs() < 1e-12);
        assert_eq!(calculate_momentum(100.0, 100.0), 0.0);
        assert_eq!(calculate_momentum(100.0, 0.0), 0.0);
        assert_eq!(calculate_momentum(100.0, -1.0), 0.0);
    }

    #[test]
    fn sample_stdev_matches_known_value() {
        // stdev of {2, 4, 4, 4, 5, 5, 7, 9} (sample) = 2.138...
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sample_stdev(&values) - 2.1380899353).abs() < 1e-9);
        assert_eq!(sample_stdev(&[1.0]), 0.0);
    }
}
