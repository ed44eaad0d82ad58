//! Per-venue feed runner
//!
//! Drives one venue adapter through its full lifecycle: connect, subscribe,
//! stream, reconnect with capped exponential backoff. Publishes snapshots
//! into the fanout channel and keeps per-venue health in `FeedState`.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::types::{Asset, Snapshot, Venue};
use crate::venues::{adapter_for, Tick, VenueAdapter};

/// A connection is torn down once this many frames in a row fail to parse.
const MAX_CONSECUTIVE_PARSE_ERRORS: u32 = 10;
/// Two consecutive unanswered pings count as a dead socket.
const MAX_MISSED_PINGS: u32 = 2;

/// Per-venue health, written only by the owning runner.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    pub connected: bool,
    pub last_snapshot: Option<Snapshot>,
    pub last_update_ms: i64,
    pub message_count: u64,
    pub error_count: u64,
    pub reconnect_count: u64,
    pub current_backoff_ms: f64,
}

impl FeedState {
    /// Connected, has streamed at least once, and the data is fresh.
    pub fn is_healthy(&self, now_ms: i64, max_staleness_ms: i64) -> bool {
        self.connected
            && self.last_snapshot.is_some()
            && now_ms - self.last_update_ms < max_staleness_ms
    }
}

pub type SharedFeedState = Arc<RwLock<FeedState>>;

/// Lock helpers that recover from poisoning: a panicked reader must not
/// take the whole feed down with it.
pub(crate) fn read_state(state: &RwLock<FeedState>) -> RwLockReadGuard<'_, FeedState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state(state: &RwLock<FeedState>) -> RwLockWriteGuard<'_, FeedState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Next reconnect delay: multiply and cap. Kept in float milliseconds so
/// the sequence stays exact under repeated multiplication.
pub(crate) fn next_backoff_ms(current_ms: f64, multiplier: f64, max_ms: f64) -> f64 {
    (current_ms * multiplier).min(max_ms)
}

/// One long-lived streaming worker for one venue.
pub struct FeedRunner {
    venue: Venue,
    asset: Asset,
    adapter: Box<dyn VenueAdapter>,
    config: Arc<FeedConfig>,
    state: SharedFeedState,
    tx: mpsc::Sender<Snapshot>,
    shutdown: watch::Receiver<bool>,
}

impl FeedRunner {
    pub fn new(
        venue: Venue,
        asset: Asset,
        config: Arc<FeedConfig>,
        tx: mpsc::Sender<Snapshot>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let state = Arc::new(RwLock::new(FeedState {
            current_backoff_ms: config.reconnect_delay_ms(),
            ..FeedState::default()
        }));
        Self {
            venue,
            asset,
            adapter: adapter_for(venue, asset),
            config,
            state,
            tx,
            shutdown,
        }
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    pub fn state_handle(&self) -> SharedFeedState {
        Arc::clone(&self.state)
    }

    /// Run until the shutdown signal flips. Never panics the process:
    /// every failure mode lands in backoff and another attempt.
    pub async fn run(mut self) {
        info!(venue = %self.venue, asset = %self.asset, "feed runner starting");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.stream_session().await {
                // A clean return means the stop signal was observed inside
                // the session.
                Ok(()) => break,
                Err(e) => {
                    let delay_ms = {
                        let mut st = write_state(&self.state);
                        st.connected = false;
                        st.error_count += 1;
                        st.reconnect_count += 1;
                        let delay = st.current_backoff_ms;
                        st.current_backoff_ms = next_backoff_ms(
                            delay,
                            self.config.reconnect_backoff,
                            self.config.max_reconnect_delay_ms(),
                        );
                        delay
                    };
                    warn!(
                        venue = %self.venue,
                        error = %e,
                        delay_ms = delay_ms,
                        "feed disconnected, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms as u64)) => {}
                        changed = self.shutdown.changed() => {
                            if changed.is_err() || *self.shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        write_state(&self.state).connected = false;
        info!(venue = %self.venue, "feed runner stopped");
    }

    /// One connect-to-disconnect cycle. `Ok(())` only on an observed stop
    /// signal; every other exit is an error that the caller backs off on.
    async fn stream_session(&mut self) -> Result<()> {
        // KuCoin re-runs its REST preflight here; other venues are static.
        let endpoint = self
            .adapter
            .endpoint()
            .await
            .context("endpoint resolution failed")?;

        debug!(venue = %self.venue, url = %endpoint.url, "connecting");
        let handshake = timeout(self.config.connect_timeout(), connect_async(&endpoint.url))
            .await
            .map_err(|_| anyhow!("handshake timed out"))?;
        let (ws_stream, _) = handshake.context("websocket handshake failed")?;
        let (mut write, mut read) = ws_stream.split();

        if let Some(frame) = self.adapter.subscribe_message() {
            write
                .send(Message::Text(frame))
                .await
                .context("subscribe send failed")?;
        }

        write_state(&self.state).connected = true;
        info!(venue = %self.venue, symbol = %self.adapter.symbol(), "connected");

        // The venue may dictate its own keepalive cadence (KuCoin).
        let ping_period = endpoint
            .ping_interval
            .unwrap_or_else(|| self.config.ping_interval());
        let mut ping_timer = interval_at(Instant::now() + ping_period, ping_period);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut missed_pings = 0u32;
        let mut pong_deadline: Option<Instant> = None;
        let mut consecutive_parse_errors = 0u32;
        let mut streamed_snapshot = false;

        loop {
            let pong_wait = pong_deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep_until(pong_wait), if pong_deadline.is_some() => {
                    // One miss is forgiven; the second tears the socket down.
                    missed_pings += 1;
                    if missed_pings >= MAX_MISSED_PINGS {
                        bail!(
                            "{} pings unanswered within {}s each",
                            missed_pings,
                            self.config.ping_timeout_secs
                        );
                    }
                    pong_deadline = Some(Instant::now() + self.config.ping_timeout());
                }
                _ = ping_timer.tick() => {
                    if missed_pings >= MAX_MISSED_PINGS {
                        bail!("no pong after {} pings", missed_pings);
                    }
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .context("ping send failed")?;
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.ping_timeout());
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        // Any inbound frame proves the socket is alive.
                        missed_pings = 0;
                        pong_deadline = None;
                        match self.adapter.parse(&text) {
                            Ok(Some(tick)) if tick.price > 0.0 => {
                                consecutive_parse_errors = 0;
                                if !streamed_snapshot {
                                    streamed_snapshot = true;
                                    write_state(&self.state).current_backoff_ms =
                                        self.config.reconnect_delay_ms();
                                }
                                self.emit(tick);
                            }
                            Ok(_) => {
                                consecutive_parse_errors = 0;
                            }
                            Err(e) => {
                                consecutive_parse_errors += 1;
                                write_state(&self.state).error_count += 1;
                                debug!(venue = %self.venue, error = %e, "dropped unparsable frame");
                                if consecutive_parse_errors > MAX_CONSECUTIVE_PARSE_ERRORS {
                                    bail!(
                                        "{} consecutive unparsable frames",
                                        consecutive_parse_errors
                                    );
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        missed_pings = 0;
                        pong_deadline = None;
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pings = 0;
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        bail!("closed by server: {:?}", frame);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(e).context("websocket read failed");
                    }
                    None => bail!("stream ended"),
                }
            }
        }
    }

    fn emit(&self, tick: Tick) {
        let now_ms = Utc::now().timestamp_millis();
        let snapshot = Snapshot::new(
            self.venue,
            self.asset,
            tick.price,
            tick.bid,
            tick.ask,
            now_ms,
        );

        {
            let mut st = write_state(&self.state);
            st.last_snapshot = Some(snapshot.clone());
            st.last_update_ms = now_ms;
            st.message_count += 1;
        }

        // The channel is only an aggregation wake-up; the latest snapshot
        // lives in FeedState, so a full queue may drop this edge without
        // losing data (latest-wins).
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.tx.try_send(snapshot) {
            debug!(venue = %self.venue, "fanout channel closed, snapshot kept in state only");
        }
    }
}
