//! Kraken ticker adapter (WebSocket API v2)
//!
//! v2 uses standard symbols (BTC/USD, not XBT) and wraps ticker payloads in
//! a data array shared by snapshot and update frames.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    method: &'static str,
    params: SubscribeParams,
}

#[derive(Debug, Serialize)]
struct SubscribeParams {
    channel: &'static str,
    symbol: Vec<String>,
}

pub struct KrakenAdapter {
    symbol: String,
}

impl KrakenAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}/USD", asset),
        }
    }
}

#[async_trait]
impl VenueAdapter for KrakenAdapter {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        Ok(Endpoint::url(KRAKEN_WS_URL.to_string()))
    }

    fn subscribe_message(&self) -> Option<String> {
        let msg = SubscribeMsg {
            method: "subscribe",
            params: SubscribeParams {
                channel: "ticker",
                symbol: vec![self.symbol.clone()],
            },
        };
        serde_json::to_string(&msg).ok()
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("kraken: malformed frame")?;

        // Status, heartbeat and method-ack frames carry no ticker channel.
        if frame.get("channel").and_then(Value::as_str) != Some("ticker") {
            return Ok(None);
        }

        let ticker = match frame.get("data").and_then(Value::as_array).and_then(|d| d.first()) {
            Some(t) => t,
            None => return Ok(None),
        };

        let price = match field_f64(ticker, "last") {
            Some(p) => p,
            None => return Ok(None),
        };

        Ok(Some(Tick {
            price,
            bid: field_f64(ticker, "bid"),
            ask: field_f64(ticker, "ask"),
        }))
    }
}
