//! Gemini marketdata adapter
//!
//! Stream URL embeds the symbol; no subscription frame. The stream mixes
//! trade and change events: only trades carry a price, change events keep
//! the cached best bid/ask current. Gemini lists no XRP pair; the derived
//! symbol simply never streams.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

pub struct GeminiAdapter {
    symbol: String,
    bid: Option<f64>,
    ask: Option<f64>,
}

impl GeminiAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}usd", asset.base_symbol()),
            bid: None,
            ask: None,
        }
    }

    /// Apply one event; returns the trade price if the event was a trade.
    fn apply_event(&mut self, event: &Value) -> Option<f64> {
        match event.get("type").and_then(Value::as_str) {
            Some("trade") => field_f64(event, "price"),
            Some("change") => {
                if let Some(price) = field_f64(event, "price") {
                    match event.get("side").and_then(Value::as_str) {
                        Some("bid") => self.bid = Some(price),
                        Some("ask") => self.ask = Some(price),
                        _ => {}
                    }
                }
                None
            }
            _ => None,
        }
    }
}

#[async_trait]
impl VenueAdapter for GeminiAdapter {
    fn venue(&self) -> Venue {
        Venue::Gemini
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        Ok(Endpoint::url(format!(
            "wss://api.gemini.com/v1/marketdata/{}",
            self.symbol
        )))
    }

    fn subscribe_message(&self) -> Option<String> {
        None
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("gemini: malformed frame")?;

        // Both the initial snapshot and live updates wrap an events array;
        // the last trade in the batch wins.
        let mut last_trade = None;
        if let Some(events) = frame.get("events").and_then(Value::as_array) {
            for event in events {
                if let Some(price) = self.apply_event(event) {
                    last_trade = Some(price);
                }
            }
        } else {
            last_trade = self.apply_event(&frame);
        }

        // Heartbeats and pure book updates yield nothing.
        let price = match last_trade {
            Some(p) => p,
            None => return Ok(None),
        };

        Ok(Some(Tick {
            price,
            bid: self.bid,
            ask: self.ask,
        }))
    }
}
