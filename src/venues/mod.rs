//! Venue adapters (Binance, Coinbase, Kraken, OKX, Bybit, Gemini, KuCoin, Gate.io)
//!
//! Each adapter encapsulates one venue's wire protocol: connection URL,
//! subscription dialect and ticker frame layout. The runner drives them all
//! through the same trait.

mod binance;
mod bybit;
mod coinbase;
mod gateio;
mod gemini;
mod kraken;
mod kucoin;
mod okx;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use coinbase::CoinbaseAdapter;
pub use gateio::GateioAdapter;
pub use gemini::GeminiAdapter;
pub use kraken::KrakenAdapter;
pub use kucoin::KucoinAdapter;
pub use okx::OkxAdapter;

use crate::types::{Asset, Venue};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Price fields extracted from one ticker frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

/// Where to connect, plus a venue-mandated keepalive cadence when the
/// handshake negotiates one (KuCoin).
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub ping_interval: Option<Duration>,
}

impl Endpoint {
    pub fn url(url: String) -> Self {
        Self {
            url,
            ping_interval: None,
        }
    }
}

/// Venue-specific wire protocol.
///
/// `parse` returns `Ok(Some(_))` for a usable ticker frame, `Ok(None)` for
/// frames to skip (acks, heartbeats, frames without a price), and `Err`
/// only for malformed JSON or a schema violation. Numeric fields arrive as
/// JSON strings on most venues; adapters accept both forms.
#[async_trait]
pub trait VenueAdapter: Send {
    fn venue(&self) -> Venue;

    /// Pair name in the venue's dialect (e.g. "BTC-USD", "btcusdt")
    fn symbol(&self) -> &str;

    /// Resolve the WebSocket URL. For most venues this is static; KuCoin
    /// performs a REST preflight here and must be re-asked on reconnect.
    async fn endpoint(&mut self) -> Result<Endpoint>;

    /// JSON frame to send right after connecting, if the venue needs one.
    fn subscribe_message(&self) -> Option<String>;

    /// Extract a tick from one text frame.
    fn parse(&mut self, text: &str) -> Result<Option<Tick>>;
}

/// Static venue table: tag to adapter.
pub fn adapter_for(venue: Venue, asset: Asset) -> Box<dyn VenueAdapter> {
    match venue {
        Venue::Binance => Box::new(BinanceAdapter::new(asset)),
        Venue::Coinbase => Box::new(CoinbaseAdapter::new(asset)),
        Venue::Kraken => Box::new(KrakenAdapter::new(asset)),
        Venue::Okx => Box::new(OkxAdapter::new(asset)),
        Venue::Bybit => Box::new(BybitAdapter::new(asset)),
        Venue::Gemini => Box::new(GeminiAdapter::new(asset)),
        Venue::Kucoin => Box::new(KucoinAdapter::new(asset)),
        Venue::Gateio => Box::new(GateioAdapter::new(asset)),
    }
}

/// Read a numeric field that may be either a JSON number or a decimal
/// string (exchanges disagree on this).
pub(crate) fn num_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// `num_f64` applied to `obj[key]`.
pub(crate) fn field_f64(obj: &Value, key: &str) -> Option<f64> {
    obj.get(key).and_then(num_f64)
}
