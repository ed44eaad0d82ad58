//! Coinbase Exchange ticker adapter
//!
//! Subscribes to the public ticker channel after connecting.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    #[serde(rename = "type")]
    msg_type: &'static str,
    channels: Vec<ChannelSub>,
}

#[derive(Debug, Serialize)]
struct ChannelSub {
    name: &'static str,
    product_ids: Vec<String>,
}

pub struct CoinbaseAdapter {
    symbol: String,
}

impl CoinbaseAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}-USD", asset),
        }
    }
}

#[async_trait]
impl VenueAdapter for CoinbaseAdapter {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        Ok(Endpoint::url(COINBASE_WS_URL.to_string()))
    }

    fn subscribe_message(&self) -> Option<String> {
        let msg = SubscribeMsg {
            msg_type: "subscribe",
            channels: vec![ChannelSub {
                name: "ticker",
                product_ids: vec![self.symbol.clone()],
            }],
        };
        serde_json::to_string(&msg).ok()
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("coinbase: malformed frame")?;

        // "subscriptions", "heartbeat" and "error" frames share the channel;
        // only "ticker" carries a price.
        if frame.get("type").and_then(Value::as_str) != Some("ticker") {
            return Ok(None);
        }

        let price = match field_f64(&frame, "price") {
            Some(p) => p,
            None => return Ok(None),
        };

        Ok(Some(Tick {
            price,
            bid: field_f64(&frame, "best_bid"),
            ask: field_f64(&frame, "best_ask"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_frame() {
        let mut adapter = CoinbaseAdapter::new(Asset::BTC);
        let frame = r#"{"type":"ticker","product_id":"BTC-USD","price":"97000.00","best_bid":"96999.99","best_ask":"97000.01"}"#;
        let tick = adapter.parse(frame).unwrap().unwrap();
        assert_eq!(tick.price, 97000.0);
        assert_eq!(tick.bid, Some(96999.99));
    }

    #[test]
    fn skips_subscriptions_ack() {
        let mut adapter = CoinbaseAdapter::new(Asset::BTC);
        let frame = r#"{"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}"#;
        assert!(adapter.parse(frame).unwrap().is_none());
    }

    #[test]
    fn subscribe_targets_ticker_channel() {
        let adapter = CoinbaseAdapter::new(Asset::ETH);
        let msg = adapter.subscribe_message().unwrap();
        assert!(msg.contains(r#""type":"subscribe""#));
        assert!(msg.contains("ETH-USD"));
    }
}
