//! PriceMesh
//!
//! Multi-exchange reference price feed: aggregates live ticker streams
//! from eight venues into a single median-based quote with confidence and
//! divergence statistics, plus a lead-lag signal against an on-chain
//! oracle reference.
//!
//! ```no_run
//! use pricemesh::{Asset, Feed, FeedConfig, Venue};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut feed = Feed::new(Asset::BTC, &Venue::ALL, FeedConfig::default())?;
//! feed.start();
//!
//! // In the trading loop:
//! if let Some(price) = feed.get_price() {
//!     println!("BTC reference: {price:.2}");
//! }
//!
//! feed.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod oracle;
pub mod registry;
pub mod runner;
pub mod types;
pub mod venues;

pub use config::FeedConfig;
pub use feed::Feed;
pub use types::{
    Asset, FeedStats, OracleSignal, PriceReport, QuoteUnit, SignalLabel, Snapshot, Venue,
};
