//! Oracle reference probe
//!
//! Supplies the independent reference price the lead-lag signal compares
//! against. With CHAINLINK_API_KEY / CHAINLINK_API_SECRET set, polls the
//! Chainlink Data Streams latest-report endpoint with HMAC-signed
//! requests; without credentials, falls back to Kraken's public REST
//! ticker. Either way the cadence is one second.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::env;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::types::{Asset, OracleSignal, SignalLabel};

/// BTC/USD Data Stream ID (from data.chain.link)
const BTC_USD_STREAM_ID: &str =
    "0x00039d9e45394f473ab1f050a1b963e6b05351e52d71e507509ada0c95ed75b8";

const DATA_STREAMS_API_HOST: &str = "https://api.dataengine.chain.link";
const KRAKEN_TICKER_URL: &str = "https://api.kraken.com/0/public/Ticker";

const POLL_INTERVAL: Duration = Duration::from_millis(1000);

type HmacSha256 = Hmac<Sha256>;

/// One oracle observation.
#[derive(Debug, Clone, Copy)]
pub struct OracleQuote {
    pub price: f64,
    pub timestamp_ms: i64,
}

/// Background worker holding the latest oracle quote.
pub struct OracleProbe {
    asset: Asset,
    credentials: Option<(String, String)>,
    quote: Arc<RwLock<Option<OracleQuote>>>,
    handle: Option<JoinHandle<()>>,
}

impl OracleProbe {
    /// Credentials come from the environment; their absence selects the
    /// public fallback rather than an error.
    pub fn from_env(asset: Asset) -> Self {
        let credentials = match (
            env::var("CHAINLINK_API_KEY"),
            env::var("CHAINLINK_API_SECRET"),
        ) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => Some((key, secret)),
            _ => None,
        };
        Self {
            asset,
            credentials,
            quote: Arc::new(RwLock::new(None)),
            handle: None,
        }
    }

    /// Spawn the polling worker. Idempotent.
    pub fn start(&mut self, shutdown: watch::Receiver<bool>) {
        if self.handle.is_some() {
            return;
        }
        let quote = Arc::clone(&self.quote);
        let asset = self.asset;

        // Chainlink publishes stream IDs per feed; only BTC/USD is wired
        // up here, other assets use the fallback even with keys.
        let chainlink = match (self.credentials.clone(), stream_id_for(asset)) {
            (Some(creds), Some(stream_id)) => {
                info!(asset = %asset, "oracle probe polling Chainlink Data Streams");
                Some((creds, stream_id))
            }
            (Some(_), None) => {
                warn!(asset = %asset, "no data stream id for asset, using public ticker fallback");
                None
            }
            (None, _) => {
                info!(asset = %asset, "oracle probe polling public ticker fallback");
                None
            }
        };
        self.handle = Some(tokio::spawn(run_probe(asset, chainlink, quote, shutdown)));
    }

    /// Wait for the worker to observe the shutdown signal. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn latest(&self) -> Option<OracleQuote> {
        *self
            .quote
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stream_id_for(asset: Asset) -> Option<&'static str> {
    match asset {
        Asset::BTC => Some(BTC_USD_STREAM_ID),
        _ => None,
    }
}

fn store(quote: &RwLock<Option<OracleQuote>>, price: f64) {
    let mut slot = quote.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(OracleQuote {
        price,
        timestamp_ms: Utc::now().timestamp_millis(),
    });
}

/// Kraken REST pair names (BTC keeps its legacy XBT spelling there).
fn kraken_rest_pair(asset: Asset) -> &'static str {
    match asset {
        Asset::BTC => "XBTUSD",
        Asset::ETH => "ETHUSD",
        Asset::SOL => "SOLUSD",
        Asset::XRP => "XRPUSD",
    }
}

async fn run_probe(
    asset: Asset,
    chainlink: Option<((String, String), &'static str)>,
    quote: Arc<RwLock<Option<OracleQuote>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "oracle HTTP client unavailable, probe disabled");
            return;
        }
    };

    let pair = kraken_rest_pair(asset);
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = poll.tick() => {
                let fetched = match &chainlink {
                    Some(((api_key, api_secret), stream_id)) => {
                        fetch_chainlink_report(&client, stream_id, api_key, api_secret).await
                    }
                    None => fetch_kraken_price(&client, pair).await,
                };
                match fetched {
                    Ok(price) => store(&quote, price),
                    Err(e) => debug!(error = %e, "oracle poll failed"),
                }
            }
        }
    }
    debug!("oracle probe stopped");
}

async fn fetch_kraken_price(client: &reqwest::Client, pair: &str) -> Result<f64> {
    let url = format!("{}?pair={}", KRAKEN_TICKER_URL, pair);
    let body: Value = client
        .get(&url)
        .send()
        .await
        .context("ticker request failed")?
        .json()
        .await
        .context("ticker response was not JSON")?;

    // Kraken keys the result by its internal pair alias; take the first.
    let ticker = body
        .get("result")
        .and_then(Value::as_object)
        .and_then(|result| result.values().next())
        .context("no ticker in response")?;

    let price: f64 = ticker["c"][0]
        .as_str()
        .context("missing last price")?
        .parse()
        .context("unparsable last price")?;

    if price <= 0.0 {
        bail!("non-positive price");
    }
    Ok(price)
}

async fn fetch_chainlink_report(
    client: &reqwest::Client,
    stream_id: &str,
    api_key: &str,
    api_secret: &str,
) -> Result<f64> {
    let path = format!("/api/v1/reports/latest?feedID={}", stream_id);
    let timestamp_ms = Utc::now().timestamp_millis();
    let signature = sign_request(api_key, api_secret, "GET", &path, "", timestamp_ms)?;

    let body: Value = client
        .get(format!("{}{}", DATA_STREAMS_API_HOST, path))
        .header("Authorization", api_key)
        .header("X-Authorization-Timestamp", timestamp_ms.to_string())
        .header("X-Authorization-Signature-SHA256", signature)
        .send()
        .await
        .context("report request failed")?
        .error_for_status()
        .context("report request rejected")?
        .json()
        .await
        .context("report response was not JSON")?;

    // Crypto streams quote the benchmark price with 18 decimals.
    let raw = &body["report"]["benchmarkPrice"];
    let scaled: f64 = match raw {
        Value::String(s) => s.parse().context("unparsable benchmarkPrice")?,
        Value::Number(n) => n.as_f64().context("unrepresentable benchmarkPrice")?,
        _ => bail!("missing benchmarkPrice"),
    };
    let price = scaled / 1e18;
    if price <= 0.0 {
        bail!("non-positive oracle price");
    }
    Ok(price)
}

/// HMAC-SHA256 over `METHOD PATH BODY_HASH API_KEY TIMESTAMP`.
fn sign_request(
    api_key: &str,
    api_secret: &str,
    method: &str,
    path: &str,
    body: &str,
    timestamp_ms: i64,
) -> Result<String> {
    let body_hash = if body.is_empty() {
        String::new()
    } else {
        hex::encode(Sha256::digest(body.as_bytes()))
    };
    let payload = format!(
        "{} {} {} {} {}",
        method, path, body_hash, api_key, timestamp_ms
    );
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .context("invalid oracle API secret")?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Lead-lag signal of the aggregate price against the oracle reference.
///
/// LONG above +5 bps, SHORT below -5 bps, NEUTRAL between; strength
/// saturates at 50 bps.
pub fn oracle_signal(price: f64, oracle_price: f64) -> OracleSignal {
    if oracle_price <= 0.0 {
        return OracleSignal {
            label: SignalLabel::Neutral,
            strength: 0.0,
            divergence_bps: 0.0,
        };
    }

    let divergence_bps = (price - oracle_price) / oracle_price * 10000.0;
    let label = if divergence_bps > 5.0 {
        SignalLabel::Long
    } else if divergence_bps < -5.0 {
        SignalLabel::Short
    } else {
        SignalLabel::Neutral
    };
    let strength = (divergence_bps.abs() / 50.0).min(1.0);

    OracleSignal {
        label,
        strength,
        divergence_bps,
    }
}
