//! Core types used throughout PriceMesh
//!
//! Defines assets, venues, per-tick snapshots and the aggregated report.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Supported assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    SOL,
    XRP,
}

impl Default for Asset {
    fn default() -> Self {
        Asset::BTC
    }
}

impl Asset {
    /// Lowercase base symbol (e.g. "btc")
    pub fn base_symbol(&self) -> &'static str {
        match self {
            Asset::BTC => "btc",
            Asset::ETH => "eth",
            Asset::SOL => "sol",
            Asset::XRP => "xrp",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTC" => Some(Asset::BTC),
            "ETH" => Some(Asset::ETH),
            "SOL" => Some(Asset::SOL),
            "XRP" => Some(Asset::XRP),
            _ => None,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::BTC => write!(f, "BTC"),
            Asset::ETH => write!(f, "ETH"),
            Asset::SOL => write!(f, "SOL"),
            Asset::XRP => write!(f, "XRP"),
        }
    }
}

/// Settlement currency of a venue's pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteUnit {
    /// Real dollars (Coinbase, Kraken, Gemini)
    Usd,
    /// Tether, which can trade at a premium or discount to USD
    Usdt,
}

impl fmt::Display for QuoteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteUnit::Usd => write!(f, "USD"),
            QuoteUnit::Usdt => write!(f, "USDT"),
        }
    }
}

/// Supported exchange venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Binance,
    Coinbase,
    Kraken,
    Okx,
    Bybit,
    Gemini,
    Kucoin,
    Gateio,
}

impl Venue {
    /// All venues, in canonical startup order
    pub const ALL: [Venue; 8] = [
        Venue::Binance,
        Venue::Coinbase,
        Venue::Kraken,
        Venue::Okx,
        Venue::Bybit,
        Venue::Gemini,
        Venue::Kucoin,
        Venue::Gateio,
    ];

    /// Stable lowercase tag used in logs, stats and report hashing
    pub fn tag(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Coinbase => "coinbase",
            Venue::Kraken => "kraken",
            Venue::Okx => "okx",
            Venue::Bybit => "bybit",
            Venue::Gemini => "gemini",
            Venue::Kucoin => "kucoin",
            Venue::Gateio => "gateio",
        }
    }

    /// Settlement currency of this venue's spot pair
    pub fn quote_unit(&self) -> QuoteUnit {
        match self {
            Venue::Coinbase | Venue::Kraken | Venue::Gemini => QuoteUnit::Usd,
            Venue::Binance | Venue::Okx | Venue::Bybit | Venue::Kucoin | Venue::Gateio => {
                QuoteUnit::Usdt
            }
        }
    }

    /// Resolve a venue from its tag
    pub fn from_tag(tag: &str) -> Option<Venue> {
        match tag.to_lowercase().as_str() {
            "binance" => Some(Venue::Binance),
            "coinbase" => Some(Venue::Coinbase),
            "kraken" => Some(Venue::Kraken),
            "okx" => Some(Venue::Okx),
            "bybit" => Some(Venue::Bybit),
            "gemini" => Some(Venue::Gemini),
            "kucoin" => Some(Venue::Kucoin),
            "gateio" | "gate" => Some(Venue::Gateio),
            _ => None,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One tick from one venue, immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub venue: Venue,
    pub asset: Asset,
    pub quote_unit: QuoteUnit,
    /// Last trade price, always positive
    pub price: f64,
    /// Best bid, when the venue publishes one
    pub bid: Option<f64>,
    /// Best ask, when the venue publishes one (never below bid)
    pub ask: Option<f64>,
    /// Wall-clock receipt time in milliseconds
    pub timestamp_ms: i64,
}

impl Snapshot {
    /// Build a snapshot, discarding an inconsistent or non-positive
    /// bid/ask pair rather than propagating it.
    pub fn new(
        venue: Venue,
        asset: Asset,
        price: f64,
        bid: Option<f64>,
        ask: Option<f64>,
        timestamp_ms: i64,
    ) -> Self {
        let bid = bid.filter(|b| *b > 0.0);
        let ask = ask.filter(|a| *a > 0.0);
        let (bid, ask) = match (bid, ask) {
            (Some(b), Some(a)) if b > a => (None, None),
            other => other,
        };
        Self {
            venue,
            asset,
            quote_unit: venue.quote_unit(),
            price,
            bid,
            ask,
            timestamp_ms,
        }
    }

    /// Age of this snapshot relative to `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp_ms
    }
}

/// One aggregation result, immutable after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceReport {
    pub asset: Asset,
    /// Median of accepted, normalized prices
    pub price: f64,
    /// Venue tags that survived filtering, lexicographically sorted
    pub sources_used: Vec<String>,
    pub source_count: usize,
    /// (max - min) / median x 100 over accepted normalized prices
    pub divergence_pct: f64,
    /// Agreement score in [0.5, 1.0]
    pub confidence: f64,
    /// Signed USDT premium over USD; 0 when not derivable
    pub usdt_premium_pct: f64,
    pub generated_at_ms: i64,
    /// Hex SHA-256 over the canonical serialization of the fields above
    pub integrity_hash: String,
}

impl PriceReport {
    pub fn new(
        asset: Asset,
        price: f64,
        mut sources_used: Vec<String>,
        divergence_pct: f64,
        confidence: f64,
        usdt_premium_pct: f64,
        generated_at_ms: i64,
    ) -> Self {
        sources_used.sort();
        let source_count = sources_used.len();
        let integrity_hash = Self::compute_hash(
            asset,
            price,
            &sources_used,
            source_count,
            divergence_pct,
            confidence,
            usdt_premium_pct,
            generated_at_ms,
        );
        Self {
            asset,
            price,
            sources_used,
            source_count,
            divergence_pct,
            confidence,
            usdt_premium_pct,
            generated_at_ms,
            integrity_hash,
        }
    }

    /// Age of this report relative to `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.generated_at_ms
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_hash(
        asset: Asset,
        price: f64,
        sources_used: &[String],
        source_count: usize,
        divergence_pct: f64,
        confidence: f64,
        usdt_premium_pct: f64,
        generated_at_ms: i64,
    ) -> String {
        // Fixed 8-digit decimal formatting keeps the hash byte-stable
        // across platforms.
        let canonical = format!(
            "{}|{:.8}|{}|{}|{:.8}|{:.8}|{:.8}|{}",
            asset,
            price,
            sources_used.join(","),
            source_count,
            divergence_pct,
            confidence,
            usdt_premium_pct,
            generated_at_ms,
        );
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }
}

/// Trading signal label against the oracle reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalLabel {
    Long,
    Short,
    Neutral,
}

impl fmt::Display for SignalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalLabel::Long => write!(f, "LONG"),
            SignalLabel::Short => write!(f, "SHORT"),
            SignalLabel::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Lead-lag signal of the aggregate price against the oracle
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OracleSignal {
    pub label: SignalLabel,
    /// Signal strength in [0, 1], saturating at 50 bps
    pub strength: f64,
    pub divergence_bps: f64,
}

/// Per-venue health snapshot exposed by the facade
#[derive(Debug, Clone, Serialize)]
pub struct FeedStats {
    pub venue: Venue,
    pub connected: bool,
    pub last_price: Option<f64>,
    pub age_ms: Option<i64>,
    pub message_count: u64,
    pub error_count: u64,
    pub reconnect_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_tags_round_trip() {
        for venue in Venue::ALL {
            assert_eq!(Venue::from_tag(venue.tag()), Some(venue));
        }
        assert_eq!(Venue::from_tag("gate"), Some(Venue::Gateio));
        assert_eq!(Venue::from_tag("nyse"), None);
    }

    #[test]
    fn quote_units_split_usd_and_usdt() {
        let usd: Vec<Venue> = Venue::ALL
            .into_iter()
            .filter(|v| v.quote_unit() == QuoteUnit::Usd)
            .collect();
        assert_eq!(usd, vec![Venue::Coinbase, Venue::Kraken, Venue::Gemini]);
    }

    #[test]
    fn snapshot_discards_crossed_book() {
        let snap = Snapshot::new(
            Venue::Coinbase,
            Asset::BTC,
            97000.0,
            Some(97010.0),
            Some(96990.0),
            1,
        );
        assert!(snap.bid.is_none());
        assert!(snap.ask.is_none());
        assert_eq!(snap.quote_unit, QuoteUnit::Usd);
    }

    #[test]
    fn report_hash_is_deterministic() {
        let make = || {
            PriceReport::new(
                Asset::BTC,
                97000.0,
                vec!["kraken".to_string(), "coinbase".to_string()],
                0.01,
                1.0,
                0.17,
                1_700_000_000_000,
            )
        };
        let a = make();
        let b = make();
        assert_eq!(a.integrity_hash, b.integrity_hash);
        assert_eq!(a.integrity_hash.len(), 64);
        // Sources are sorted before hashing regardless of input order.
        assert_eq!(a.sources_used, vec!["coinbase", "kraken"]);
    }

    #[test]
    fn report_hash_tracks_fields() {
        let base = PriceReport::new(Asset::BTC, 97000.0, vec![], 0.0, 1.0, 0.0, 1);
        let moved = PriceReport::new(Asset::BTC, 97000.01, vec![], 0.0, 1.0, 0.0, 1);
        assert_ne!(base.integrity_hash, moved.integrity_hash);
    }
}
