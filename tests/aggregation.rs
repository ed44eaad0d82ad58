//! End-to-end aggregation scenarios with literal venue prices.

use pricemesh::aggregator::aggregate;
use pricemesh::{Asset, FeedConfig, Snapshot, Venue};

const NOW_MS: i64 = 1_700_000_000_000;

fn snap(venue: Venue, price: f64, age_ms: i64) -> Snapshot {
    Snapshot::new(venue, Asset::BTC, price, None, None, NOW_MS - age_ms)
}

#[test]
fn happy_median_across_all_eight_venues() {
    // Three USD venues at 97000, five USDT venues at 97164.90.
    let snapshots = vec![
        snap(Venue::Coinbase, 97000.00, 0),
        snap(Venue::Kraken, 97000.00, 0),
        snap(Venue::Gemini, 97000.00, 0),
        snap(Venue::Binance, 97164.90, 0),
        snap(Venue::Okx, 97164.90, 0),
        snap(Venue::Bybit, 97164.90, 0),
        snap(Venue::Kucoin, 97164.90, 0),
        snap(Venue::Gateio, 97164.90, 0),
    ];
    let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &FeedConfig::default()).unwrap();

    let expected_premium = (97164.90 - 97000.00) / 97000.00 * 100.0;
    assert!((report.usdt_premium_pct - expected_premium).abs() < 1e-9);

    // Normalization folds the USDT quotes back onto the USD level.
    assert!((report.price - 97000.00).abs() < 1e-6);
    assert!(report.divergence_pct.abs() < 1e-6);
    assert_eq!(report.confidence, 1.0);
    assert_eq!(report.source_count, 8);
}

#[test]
fn single_outlier_is_rejected() {
    let snapshots = vec![
        snap(Venue::Coinbase, 97000.0, 0),
        snap(Venue::Kraken, 97000.0, 0),
        snap(Venue::Gemini, 97000.0, 0),
        snap(Venue::Okx, 97165.0, 0),
        snap(Venue::Bybit, 97165.0, 0),
        snap(Venue::Kucoin, 97165.0, 0),
        snap(Venue::Gateio, 97165.0, 0),
        snap(Venue::Binance, 100000.0, 0),
    ];
    let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &FeedConfig::default()).unwrap();

    assert!(!report.sources_used.contains(&"binance".to_string()));
    assert_eq!(report.source_count, 7);
    assert!((report.price - 97000.0).abs() < 1e-6);
    assert_eq!(report.confidence, 1.0);
}

#[test]
fn stale_venue_is_dropped() {
    let mut snapshots = vec![
        snap(Venue::Coinbase, 97000.0, 0),
        snap(Venue::Kraken, 97000.0, 0),
        snap(Venue::Gemini, 97000.0, 0),
        snap(Venue::Binance, 97165.0, 0),
        snap(Venue::Okx, 97165.0, 0),
        snap(Venue::Bybit, 97165.0, 0),
        snap(Venue::Kucoin, 97165.0, 0),
    ];
    snapshots.push(snap(Venue::Gateio, 97165.0, 3000));

    let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &FeedConfig::default()).unwrap();
    assert_eq!(report.source_count, 7);
    assert!(!report.sources_used.contains(&"gateio".to_string()));
}

#[test]
fn below_minimum_publishes_nothing() {
    let snapshots = vec![snap(Venue::Kraken, 97000.0, 0)];
    assert!(aggregate(Asset::BTC, &snapshots, NOW_MS, &FeedConfig::default()).is_none());
}

#[test]
fn negative_premium_normalizes_upward() {
    let snapshots = vec![
        snap(Venue::Coinbase, 97000.0, 0),
        snap(Venue::Kraken, 97000.0, 0),
        snap(Venue::Binance, 96900.0, 0),
        snap(Venue::Okx, 96900.0, 0),
        snap(Venue::Bybit, 96900.0, 0),
    ];
    let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &FeedConfig::default()).unwrap();

    let expected_premium = (96900.0 - 97000.0) / 97000.0 * 100.0;
    assert!((report.usdt_premium_pct - expected_premium).abs() < 1e-9);
    assert!(report.usdt_premium_pct < 0.0);
    assert!((report.usdt_premium_pct + 0.1031).abs() < 1e-4);

    assert!((report.price - 97000.0).abs() < 1e-6);
    assert_eq!(report.source_count, 5);
}

#[test]
fn mid_band_spread_maps_to_confidence_three_quarters() {
    // Two USD quotes around 100 engineered so sample stdev / median
    // = 0.30%: for a symmetric pair the stdev is half_gap * sqrt(2).
    let half_gap = 0.3 / 2.0_f64.sqrt();
    let snapshots = vec![
        snap(Venue::Coinbase, 100.0 + half_gap, 0),
        snap(Venue::Kraken, 100.0 - half_gap, 0),
    ];
    let report = aggregate(Asset::BTC, &snapshots, NOW_MS, &FeedConfig::default()).unwrap();

    // confidence = 1.0 - (0.30 - 0.1) / 0.4 * 0.5 = 0.75
    assert!((report.confidence - 0.75).abs() < 1e-9);
    assert!((report.price - 100.0).abs() < 1e-9);
}

#[test]
fn identical_inputs_yield_identical_hashes() {
    let snapshots = vec![
        snap(Venue::Coinbase, 97000.0, 0),
        snap(Venue::Kraken, 97003.0, 0),
        snap(Venue::Bybit, 97164.9, 0),
    ];
    let config = FeedConfig::default();
    let a = aggregate(Asset::BTC, &snapshots, NOW_MS, &config).unwrap();
    let b = aggregate(Asset::BTC, &snapshots, NOW_MS, &config).unwrap();
    assert_eq!(a.integrity_hash, b.integrity_hash);
    assert_eq!(a.generated_at_ms, b.generated_at_ms);
}
