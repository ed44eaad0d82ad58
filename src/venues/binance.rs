//! Binance ticker adapter
//!
//! Direct stream URL, no subscription frame. Uses the Binance.US endpoint:
//! binance.com answers HTTP 451 to US-hosted clients.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

pub struct BinanceAdapter {
    symbol: String,
}

impl BinanceAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}usdt", asset.base_symbol()),
        }
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        Ok(Endpoint::url(format!(
            "wss://stream.binance.us:9443/ws/{}@ticker",
            self.symbol
        )))
    }

    fn subscribe_message(&self) -> Option<String> {
        None
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("binance: malformed frame")?;

        // 24h ticker payload: "c" last, "b" best bid, "a" best ask.
        let price = match field_f64(&frame, "c") {
            Some(p) => p,
            None => return Ok(None),
        };

        Ok(Some(Tick {
            price,
            bid: field_f64(&frame, "b"),
            ask: field_f64(&frame, "a"),
        }))
    }
}
