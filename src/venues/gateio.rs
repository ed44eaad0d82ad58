//! Gate.io ticker adapter (spot v4)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

const GATEIO_WS_URL: &str = "wss://api.gateio.ws/ws/v4/";

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    time: i64,
    channel: &'static str,
    event: &'static str,
    payload: Vec<String>,
}

pub struct GateioAdapter {
    symbol: String,
}

impl GateioAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}_USDT", asset),
        }
    }
}

#[async_trait]
impl VenueAdapter for GateioAdapter {
    fn venue(&self) -> Venue {
        Venue::Gateio
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        Ok(Endpoint::url(GATEIO_WS_URL.to_string()))
    }

    fn subscribe_message(&self) -> Option<String> {
        let msg = SubscribeMsg {
            time: Utc::now().timestamp(),
            channel: "spot.tickers",
            event: "subscribe",
            payload: vec![self.symbol.clone()],
        };
        serde_json::to_string(&msg).ok()
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("gateio: malformed frame")?;

        // Subscribe acks share the channel with event="subscribe".
        if frame.get("channel").and_then(Value::as_str) != Some("spot.tickers")
            || frame.get("event").and_then(Value::as_str) != Some("update")
        {
            return Ok(None);
        }

        let result = match frame.get("result") {
            Some(r) if r.is_object() => r,
            _ => return Ok(None),
        };

        let price = match field_f64(result, "last") {
            Some(p) => p,
            None => return Ok(None),
        };

        Ok(Some(Tick {
            price,
            bid: field_f64(result, "highest_bid"),
            ask: field_f64(result, "lowest_ask"),
        }))
    }
}
