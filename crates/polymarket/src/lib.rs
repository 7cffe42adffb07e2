//! Polymarket platform adapter.
//!
//! Wires the venue's streaming feed and REST catalog to the engine and the
//! store: the read loop decodes stream events into engine updates, while a
//! reference-data loop keeps the market/token catalog in sync and
//! subscribes the stream to newly discovered tokens.

pub mod clob;
pub mod error;
pub mod ws;

use crate::clob::ClobClient;
use crate::error::{Error, Result};
use crate::ws::{BookEvent, PriceChangeEvent, StreamClient, StreamControl, StreamEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Platform, Size};
use engine::{Engine, Side, Update};
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::{MarketRecord, Store, TokenRecord};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const PLATFORM_NAME: &str = "polymarket";

#[derive(Clone, Debug)]
pub struct Config {
    /// WebSocket market-feed endpoint.
    pub ws_url: String,
    /// CLOB REST base URL.
    pub clob_url: String,
    /// Interval between catalog re-syncs.
    pub market_sync_interval: Duration,
}

pub struct Polymarket<S> {
    config: Config,
    store: Arc<S>,
    engine: Engine,
    clob: ClobClient,
    control: Mutex<Option<StreamControl>>,
}

impl<S: Store> Polymarket<S> {
    /// Builds the venue sub-clients without opening any connection.
    pub fn new(config: Config, store: Arc<S>, engine: Engine) -> Self {
        let clob = ClobClient::new(config.clob_url.clone());
        Self {
            config,
            store,
            engine,
            clob,
            control: Mutex::new(None),
        }
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(platform = PLATFORM_NAME, "starting");

        let mut stream = StreamClient::connect(&self.config.ws_url).await?;
        info!(url = %self.config.ws_url, "websocket connected");
        *self.control.lock().unwrap() = Some(stream.control());

        let sync = tokio::spawn(sync_loop(
            self.clob.clone(),
            Arc::clone(&self.store),
            stream.control(),
            self.config.market_sync_interval,
            cancel.clone(),
        ));

        let result = self.read_loop(&mut stream, &cancel).await;
        sync.abort();
        result
    }

    async fn read_loop(
        &self,
        stream: &mut StreamClient,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut books = BookTracker::default();
        loop {
            match stream.read_message(cancel).await {
                Ok(event) => self.dispatch(event, &mut books),
                Err(Error::Cancelled) => {
                    info!(platform = PLATFORM_NAME, "stopping");
                    return Ok(());
                }
                Err(e) if e.is_protocol() => {
                    warn!(error = %e, "skipping undecodable message");
                    counter!("collector_decode_errors_total", "platform" => PLATFORM_NAME)
                        .increment(1);
                }
                Err(e) => {
                    error!(error = %e, "stream read failed");
                    return Err(e);
                }
            }
        }
    }

    fn dispatch(&self, event: StreamEvent, books: &mut BookTracker) {
        let updates = match event {
            StreamEvent::Book(book) => books.replace(book),
            StreamEvent::PriceChange(change) => match books.apply_change(change) {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "dropping price change");
                    return;
                }
            },
            StreamEvent::BestBidAsk(_) | StreamEvent::TickSizeChange(_) => return,
            StreamEvent::LastTradePrice(trade) => {
                debug!(token_id = %trade.asset_id, price = %trade.price, "trade");
                return;
            }
            StreamEvent::NewMarket(market) => {
                // picked up by the next catalog sync
                debug!(market_id = %market.market_id, "new market announced");
                return;
            }
            StreamEvent::MarketResolved(market) => {
                debug!(market_id = %market.market_id, "market resolved");
                return;
            }
        };
        for update in updates {
            self.engine.send(update);
        }
    }
}

#[async_trait]
impl<S: Store> Platform for Polymarket<S> {
    fn name(&self) -> &'static str {
        PLATFORM_NAME
    }

    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.run(cancel).await.map_err(Into::into)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let control = self.control.lock().unwrap().take();
        if let Some(control) = control {
            control.close().await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stream event -> engine update mapping
// ---------------------------------------------------------------------------

/// Live price set per token and side, as last told by the venue. A `book`
/// event is the authoritative absolute state for its token, so the tracker
/// diffs against this set and emits `set(price, 0)` for every level the
/// event no longer carries.
#[derive(Default)]
struct BookTracker {
    tokens: HashMap<String, KnownPrices>,
}

#[derive(Default)]
struct KnownPrices {
    bids: HashSet<i64>,
    asks: HashSet<i64>,
}

impl BookTracker {
    fn replace(&mut self, book: BookEvent) -> Vec<Update> {
        let event_time = ws::parse_timestamp_millis(&book.timestamp);
        let known = self.tokens.entry(book.asset_id.clone()).or_default();
        let mut updates =
            Vec::with_capacity(book.buys.len() + book.sells.len() + known.bids.len() + known.asks.len());
        replace_side(
            &book.asset_id,
            Side::Bid,
            &book.buys,
            &mut known.bids,
            event_time,
            &mut updates,
        );
        replace_side(
            &book.asset_id,
            Side::Ask,
            &book.sells,
            &mut known.asks,
            event_time,
            &mut updates,
        );
        updates
    }

    fn apply_change(&mut self, change: PriceChangeEvent) -> Result<Vec<Update>> {
        let side: Side = change.side.parse().map_err(Error::Side)?;
        let event_time = ws::parse_timestamp_millis(&change.timestamp);

        let known = self.tokens.entry(change.asset_id.clone()).or_default();
        let prices = match side {
            Side::Bid => &mut known.bids,
            Side::Ask => &mut known.asks,
        };
        if change.size.0 <= 0 {
            prices.remove(&change.price.0);
        } else {
            prices.insert(change.price.0);
        }

        Ok(vec![Update {
            token_id: change.asset_id,
            price: change.price,
            size: change.size,
            side,
            event_time,
            is_delta: false,
        }])
    }
}

fn replace_side(
    token_id: &str,
    side: Side,
    levels: &[ws::OrderSummary],
    known: &mut HashSet<i64>,
    event_time: Option<DateTime<Utc>>,
    updates: &mut Vec<Update>,
) {
    let fresh: HashSet<i64> = levels.iter().map(|l| l.price.0).collect();

    // clear levels the snapshot no longer carries
    for &stale in known.iter().filter(|p| !fresh.contains(p)) {
        updates.push(Update {
            token_id: token_id.to_string(),
            price: common::Price(stale),
            size: Size(0),
            side,
            event_time,
            is_delta: false,
        });
    }
    for level in levels {
        updates.push(Update {
            token_id: token_id.to_string(),
            price: level.price,
            size: level.size,
            side,
            event_time,
            is_delta: false,
        });
    }
    *known = fresh;
}

// ---------------------------------------------------------------------------
// Reference-data loop
// ---------------------------------------------------------------------------

/// Syncs the catalog once, subscribes to the stored token set, then repeats
/// on the configured interval. Errors are logged and retried next tick; a
/// failed sync never terminates the adapter.
async fn sync_loop<S: Store>(
    clob: ClobClient,
    store: Arc<S>,
    control: StreamControl,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut subscribed: HashSet<String> = HashSet::new();

    if let Err(error) = sync_markets(&clob, store.as_ref()).await {
        error!(%error, "initial market sync failed");
    }
    if let Err(error) = subscribe_new(store.as_ref(), &control, &mut subscribed).await {
        error!(%error, "initial subscription failed");
    }

    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("market sync stopped");
                return;
            }
            _ = ticker.tick() => {
                if let Err(error) = sync_markets(&clob, store.as_ref()).await {
                    error!(%error, "market sync failed");
                    continue;
                }
                if let Err(error) = subscribe_new(store.as_ref(), &control, &mut subscribed).await {
                    error!(%error, "subscription update failed");
                }
            }
        }
    }
}

/// Fetches the full catalog and upserts every market and token. An upsert
/// failure aborts the sync; the next tick retries.
async fn sync_markets<S: Store>(clob: &ClobClient, store: &S) -> Result<()> {
    let markets = clob.get_all_markets().await?;

    for market in &markets {
        let end_date = parse_end_date(&market.condition_id, &market.end_date_iso);
        store
            .upsert_market(&MarketRecord {
                id: market.condition_id.clone(),
                platform: PLATFORM_NAME.to_string(),
                description: market.description.clone(),
                end_date,
            })
            .await?;

        for token in &market.tokens {
            store
                .upsert_token(&TokenRecord {
                    id: token.token_id.clone(),
                    market_id: market.condition_id.clone(),
                    outcome: token.outcome.clone(),
                })
                .await?;
        }
    }

    info!(count = markets.len(), "synced markets");
    Ok(())
}

fn parse_end_date(market_id: &str, raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            warn!(market_id, value = raw, "invalid end_date_iso");
            None
        }
    }
}

/// Subscribes to tokens present in the store but not yet on the stream.
/// Only the new ids are sent; the venue treats subscriptions additively.
async fn subscribe_new<S: Store>(
    store: &S,
    control: &StreamControl,
    subscribed: &mut HashSet<String>,
) -> Result<()> {
    let token_ids = store.get_token_ids_for_platform(PLATFORM_NAME).await?;
    let fresh = new_token_ids(subscribed, token_ids);
    if fresh.is_empty() {
        debug!("no new tokens to subscribe");
        return Ok(());
    }

    control.subscribe(&fresh, true, None).await?;
    info!(count = fresh.len(), "subscribed to new tokens");
    subscribed.extend(fresh);
    Ok(())
}

fn new_token_ids(subscribed: &HashSet<String>, fetched: Vec<String>) -> Vec<String> {
    fetched
        .into_iter()
        .filter(|id| !subscribed.contains(id))
        .collect()
}
