//! Bybit ticker adapter (v5 public spot stream)
//!
//! Fastest push cadence of the supported venues (~50ms). Spot ticker
//! deltas may omit lastPrice; such frames are skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    op: &'static str,
    args: Vec<String>,
}

pub struct BybitAdapter {
    symbol: String,
}

impl BybitAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}USDT", asset),
        }
    }
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        Ok(Endpoint::url(BYBIT_WS_URL.to_string()))
    }

    fn subscribe_message(&self) -> Option<String> {
        let msg = SubscribeMsg {
            op: "subscribe",
            args: vec![format!("tickers.{}", self.symbol)],
        };
        serde_json::to_string(&msg).ok()
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("bybit: malformed frame")?;

        // Subscription responses carry "success"; pongs carry op="pong".
        match frame.get("topic").and_then(Value::as_str) {
            Some(topic) if topic.starts_with("tickers.") => {}
            _ => return Ok(None),
        }

        let ticker = match frame.get("data") {
            Some(d) if d.is_object() => d,
            _ => return Ok(None),
        };

        let price = match field_f64(ticker, "lastPrice") {
            Some(p) => p,
            None => return Ok(None),
        };

        Ok(Some(Tick {
            price,
            bid: field_f64(ticker, "bid1Price"),
            ask: field_f64(ticker, "ask1Price"),
        }))
    }
}
