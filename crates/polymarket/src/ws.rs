//! Streaming market-data client for the Polymarket CLOB websocket.
//!
//! The connection is split: a reader task feeds decoded text frames through
//! a single-slot channel (so no mutable buffer crosses tasks), and the
//! write half sits behind a shared handle used by subscribe, keepalive
//! pings, and close. `read_message` is cancellable at any point.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use common::{Price, Size};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const PING_INTERVAL: Duration = Duration::from_secs(50);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Credentials for authenticated market subscriptions.
#[derive(Clone, Debug, Serialize)]
pub struct Auth {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

#[derive(Debug, Serialize)]
struct MarketSubscription<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a Auth>,
    assets_ids: &'a [String],
    #[serde(rename = "type")]
    kind: &'static str,
    initial_dump: bool,
}

fn subscription_frame(
    token_ids: &[String],
    initial_dump: bool,
    auth: Option<&Auth>,
) -> Result<String> {
    Ok(serde_json::to_string(&MarketSubscription {
        auth,
        assets_ids: token_ids,
        kind: "market",
        initial_dump,
    })?)
}

/// Write-side handle, cloneable so the adapter can subscribe and close
/// independently of the read loop.
#[derive(Clone)]
pub struct StreamControl {
    write: Arc<Mutex<WsSink>>,
    keepalive: CancellationToken,
}

impl StreamControl {
    /// Sends a market subscription frame for `token_ids`.
    pub async fn subscribe(
        &self,
        token_ids: &[String],
        initial_dump: bool,
        auth: Option<&Auth>,
    ) -> Result<()> {
        let frame = subscription_frame(token_ids, initial_dump, auth)?;
        let mut write = self.write.lock().await;
        timeout(WRITE_TIMEOUT, write.send(Message::Text(frame)))
            .await
            .map_err(|_| Error::Timeout("subscribe"))??;
        Ok(())
    }

    /// Stops the keepalive and sends a close frame, best-effort.
    pub async fn close(&self) -> Result<()> {
        self.keepalive.cancel();
        let mut write = self.write.lock().await;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        match timeout(CLOSE_TIMEOUT, write.send(Message::Close(Some(frame)))).await {
            Err(_) => warn!("close frame timed out"),
            Ok(Err(error)) => warn!(%error, "failed to send close frame"),
            Ok(Ok(())) => {}
        }
        Ok(())
    }
}

/// A live stream connection.
pub struct StreamClient {
    control: StreamControl,
    frames: mpsc::Receiver<Result<String>>,
    reader: JoinHandle<()>,
}

impl StreamClient {
    /// Opens the connection (handshake bounded by [`HANDSHAKE_TIMEOUT`]) and
    /// starts the keepalive and reader tasks.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, response) = timeout(HANDSHAKE_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| Error::Timeout("websocket handshake"))??;
        debug!(status = ?response.status(), "websocket handshake complete");

        let (sink, source) = stream.split();
        let write = Arc::new(Mutex::new(sink));
        let keepalive = CancellationToken::new();
        tokio::spawn(keepalive_loop(Arc::clone(&write), keepalive.clone()));

        let (frame_tx, frames) = mpsc::channel(1);
        let reader = tokio::spawn(read_loop(source, Arc::clone(&write), frame_tx));

        Ok(Self {
            control: StreamControl { write, keepalive },
            frames,
            reader,
        })
    }

    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    pub async fn subscribe(
        &self,
        token_ids: &[String],
        initial_dump: bool,
        auth: Option<&Auth>,
    ) -> Result<()> {
        self.control.subscribe(token_ids, initial_dump, auth).await
    }

    /// Blocks until the next frame is parsed, the connection fails, or
    /// `cancel` fires.
    pub async fn read_message(&mut self, cancel: &CancellationToken) -> Result<StreamEvent> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            frame = self.frames.recv() => match frame {
                None => Err(Error::ConnectionClosed),
                Some(Ok(raw)) => parse_event(&raw),
                Some(Err(error)) => Err(error),
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.control.close().await
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.control.keepalive.cancel();
        self.reader.abort();
    }
}

async fn keepalive_loop(write: Arc<Mutex<WsSink>>, cancel: CancellationToken) {
    let start = tokio::time::Instant::now() + PING_INTERVAL;
    let mut ticker = tokio::time::interval_at(start, PING_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let mut write = write.lock().await;
                if let Err(error) = write.send(Message::Ping(Vec::new())).await {
                    warn!(%error, "failed to send ping");
                    return;
                }
            }
        }
    }
}

async fn read_loop(
    mut source: WsSource,
    write: Arc<Mutex<WsSink>>,
    tx: mpsc::Sender<Result<String>>,
) {
    while let Some(next) = source.next().await {
        match next {
            Ok(Message::Text(text)) => {
                counter!("collector_stream_frames_total", "platform" => "polymarket")
                    .increment(1);
                if tx.send(Ok(text)).await.is_err() {
                    return;
                }
            }
            Ok(Message::Ping(payload)) => {
                let mut write = write.lock().await;
                let _ = write.send(Message::Pong(payload)).await;
            }
            Ok(Message::Pong(_)) | Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                debug!(?frame, "received close frame");
                let _ = tx.send(Err(Error::ConnectionClosed)).await;
                return;
            }
            Err(error) => {
                let _ = tx.send(Err(Error::WebSocket(error))).await;
                return;
            }
        }
    }
    let _ = tx.send(Err(Error::ConnectionClosed)).await;
}

// ---------------------------------------------------------------------------
// Event taxonomy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct OrderSummary {
    pub price: Price,
    pub size: Size,
}

/// Absolute depth snapshot for one token.
#[derive(Clone, Debug, Deserialize)]
pub struct BookEvent {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub buys: Vec<OrderSummary>,
    #[serde(default)]
    pub sells: Vec<OrderSummary>,
}

/// Absolute set of a single level.
#[derive(Clone, Debug, Deserialize)]
pub struct PriceChangeEvent {
    pub asset_id: String,
    pub price: Price,
    pub size: Size,
    pub side: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub best_bid: String,
    #[serde(default)]
    pub best_ask: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TickSizeChangeEvent {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    pub old_tick_size: Price,
    pub new_tick_size: Price,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BestBidAskEvent {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub best_bid: Price,
    #[serde(default)]
    pub best_ask: Price,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LastTradePriceEvent {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    pub price: Price,
    pub size: Size,
    pub side: String,
    #[serde(default)]
    pub fee_rate_bps: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewMarketEvent {
    #[serde(rename = "id")]
    pub market_id: String,
    #[serde(default, rename = "market")]
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assets_ids: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MarketResolvedEvent {
    #[serde(rename = "id")]
    pub market_id: String,
    #[serde(default, rename = "market")]
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub timestamp: String,
}

/// A parsed stream frame.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Book(BookEvent),
    PriceChange(PriceChangeEvent),
    TickSizeChange(TickSizeChangeEvent),
    BestBidAsk(BestBidAskEvent),
    LastTradePrice(LastTradePriceEvent),
    NewMarket(NewMarketEvent),
    MarketResolved(MarketResolvedEvent),
}

/// Decodes a frame by its `event_type` discriminator. Some venue frames
/// arrive wrapped in a one-element array.
pub fn parse_event(raw: &str) -> Result<StreamEvent> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let value = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    };

    let event_type = value
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match event_type.as_str() {
        "book" => Ok(StreamEvent::Book(serde_json::from_value(value)?)),
        "price_change" => Ok(StreamEvent::PriceChange(serde_json::from_value(value)?)),
        "tick_size_change" => Ok(StreamEvent::TickSizeChange(serde_json::from_value(value)?)),
        "best_bid_ask" => Ok(StreamEvent::BestBidAsk(serde_json::from_value(value)?)),
        "last_trade_price" => Ok(StreamEvent::LastTradePrice(serde_json::from_value(value)?)),
        "new_market" => Ok(StreamEvent::NewMarket(serde_json::from_value(value)?)),
        "market_resolved" => Ok(StreamEvent::MarketResolved(serde_json::from_value(value)?)),
        other => Err(Error::UnknownEvent(other.to_string())),
    }
}

/// Venue timestamps are milliseconds since the epoch, as strings.
pub fn parse_timestamp_millis(s: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = s.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
