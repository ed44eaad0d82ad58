//! OKX ticker adapter (v5 public tickers channel)

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    op: &'static str,
    args: Vec<SubscribeArg>,
}

#[derive(Debug, Serialize)]
struct SubscribeArg {
    channel: &'static str,
    #[serde(rename = "instId")]
    inst_id: String,
}

pub struct OkxAdapter {
    symbol: String,
}

impl OkxAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}-USDT", asset),
        }
    }
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        Ok(Endpoint::url(OKX_WS_URL.to_string()))
    }

    fn subscribe_message(&self) -> Option<String> {
        let msg = SubscribeMsg {
            op: "subscribe",
            args: vec![SubscribeArg {
                channel: "tickers",
                inst_id: self.symbol.clone(),
            }],
        };
        serde_json::to_string(&msg).ok()
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("okx: malformed frame")?;

        // Subscribe acks and errors arrive as "event" frames without data.
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
            bid: field_f64(ticker, "bidPx"),
            ask: field_f64(ticker, "askPx"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_frame() {
        let mut adapter = OkxAdapter::new(Asset::BTC);
        let frame = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","last":"97164.9","bidPx":"97164.8","askPx":"97165.0"}]}"#;
        let tick = adapter.parse(frame).unwrap().unwrap();
        assert_eq!(tick.price, 97164.9);
        assert_eq!(tick.bid, Some(97164.8));
    }

    #[test]
    fn skips_subscribe_ack() {
        let mut adapter = OkxAdapter::new(Asset::BTC);
        let frame = r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"}}"#;
        assert!(adapter.parse(frame).unwrap().is_none());
    }
}
