//! KuCoin ticker adapter
//!
//! KuCoin requires a REST preflight to mint a WebSocket token. The
//! bullet-public response also names the endpoint and the ping cadence the
//! server expects; the preflight is re-run on every reconnect because
//! tokens expire.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::types::{Asset, Venue};
use crate::venues::{field_f64, Endpoint, Tick, VenueAdapter};

const KUCOIN_BULLET_URL: &str = "https://api.kucoin.com/api/v1/bullet-public";
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SubscribeMsg {
    id: i64,
    #[serde(rename = "type")]
    msg_type: &'static str,
    topic: String,
    #[serde(rename = "privateChannel")]
    private_channel: bool,
    response: bool,
}

pub struct KucoinAdapter {
    symbol: String,
}

impl KucoinAdapter {
    pub fn new(asset: Asset) -> Self {
        Self {
            symbol: format!("{}-USDT", asset),
        }
    }
}

#[async_trait]
impl VenueAdapter for KucoinAdapter {
    fn venue(&self) -> Venue {
        Venue::Kucoin
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn endpoint(&mut self) -> Result<Endpoint> {
        let client = reqwest::Client::builder()
            .timeout(PREFLIGHT_TIMEOUT)
            .build()
            .context("kucoin: failed to create HTTP client")?;

        let response = client
            .post(KUCOIN_BULLET_URL)
            .send()
            .await
            .context("kucoin: bullet-public request failed")?;

        if !response.status().is_success() {
            bail!("kucoin: bullet-public returned {}", response.status());
        }

        let body: Value = response
            .json()
            .await
            .context("kucoin: bullet-public response was not JSON")?;

        if body.get("code").and_then(Value::as_str) != Some("200000") {
            bail!("kucoin: bullet-public rejected: {}", body);
        }

        let data = &body["data"];
        let token = data
            .get("token")
            .and_then(Value::as_str)
            .context("kucoin: missing token in bullet-public response")?;
        let instance = data
            .get("instanceServers")
            .and_then(Value::as_array)
            .and_then(|servers| servers.first())
            .context("kucoin: no instance servers in bullet-public response")?;
        let ws_endpoint = instance
            .get("endpoint")
            .and_then(Value::as_str)
            .context("kucoin: missing endpoint in instance server")?;
        let ping_interval_ms = instance
            .get("pingInterval")
            .and_then(Value::as_u64)
            .unwrap_or(30000);

        Ok(Endpoint {
            url: format!("{}?token={}", ws_endpoint, token),
            ping_interval: Some(Duration::from_millis(ping_interval_ms)),
        })
    }

    fn subscribe_message(&self) -> Option<String> {
        let msg = SubscribeMsg {
            id: Utc::now().timestamp_millis(),
            msg_type: "subscribe",
            topic: format!("/market/ticker:{}", self.symbol),
            private_channel: false,
            response: true,
        };
        serde_json::to_string(&msg).ok()
    }

    fn parse(&mut self, text: &str) -> Result<Option<Tick>> {
        let frame: Value = serde_json::from_str(text).context("kucoin: malformed frame")?;

        // Welcome, ack and pong frames carry other types.
        if frame.get("type").and_then(Value::as_str) != Some("message")
            || frame.get("subject").and_then(Value::as_str) != Some("trade.ticker")
        {
            return Ok(None);
        }

        let ticker = match frame.get("data") {
            Some(d) if d.is_object() => d,
            _ => return Ok(None),
        };

        let price = match field_f64(ticker, "price") {
            Some(p) => p,
            None => return Ok(None),
        };

        Ok(Some(Tick {
            price,
            bid: field_f64(ticker, "bestBid"),
            ask: field_f64(ticker, "bestAsk"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_message() {
        let mut adapter = KucoinAdapter::new(Asset::BTC);
        let frame = r#"{"type":"message","topic":"/market/ticker:BTC-USDT","subject":"trade.ticker","data":{"price":"97164.9","bestBid":"97164.8","bestAsk":"97165.0","sequence":"1"}}"#;
        let tick = adapter.parse(frame).unwrap().unwrap();
        assert_eq!(tick.price, 97164.9);
        assert_eq!(tick.bid, Some(97164.8));
    }

    #[test]
    fn skips_welcome_frame() {
        let mut adapter = KucoinAdapter::new(Asset::BTC);
        let frame = r#"{"id":"abc","type":"welcome"}"#;
        assert!(adapter.parse(frame).unwrap().is_none());
    }

    #[test]
    fn subscribe_targets_market_ticker_topic() {
        let adapter = KucoinAdapter::new(Asset::XRP);
        let msg = adapter.subscribe_message().unwrap();
        assert!(msg.contains("/market/ticker:XRP-USDT"));
        assert!(msg.contains(r#""response":true"#));
    }
}
