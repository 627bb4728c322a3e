//! Real-time trades and quotes over the Alpaca market data websockets.
//!
//! Stocks stream JSON text frames from `/v2/{feed}`; options stream
//! MessagePack binary frames from `/v1beta1/{feed}`. Both follow the same
//! protocol: the server greets with `connected`, the client authenticates,
//! then subscribes once `authenticated` arrives.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use market_core::{OptionQuote, OptionTrade, StockQuote, StockTrade};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::config::AlpacaConfig;
use super::error::{AlpacaError, AlpacaResult};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Which websocket feed to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stocks,
    Options,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stocks => "stocks",
            StreamKind::Options => "options",
        }
    }
}

/// One market event delivered to a handler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    StockTrade { symbol: String, trade: StockTrade },
    StockQuote { symbol: String, quote: StockQuote },
    OptionTrade { symbol: String, trade: OptionTrade },
    OptionQuote { symbol: String, quote: OptionQuote },
}

impl StreamEvent {
    pub fn symbol(&self) -> &str {
        match self {
            StreamEvent::StockTrade { symbol, .. }
            | StreamEvent::StockQuote { symbol, .. }
            | StreamEvent::OptionTrade { symbol, .. }
            | StreamEvent::OptionQuote { symbol, .. } => symbol,
        }
    }

    pub fn is_quote(&self) -> bool {
        matches!(
            self,
            StreamEvent::StockQuote { .. } | StreamEvent::OptionQuote { .. }
        )
    }
}

pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Callbacks for quotes and trades. Only symbols of the channels that have
/// a handler are subscribed.
#[derive(Clone, Default)]
pub struct StreamHandlers {
    pub on_quote: Option<StreamCallback>,
    pub on_trade: Option<StreamCallback>,
}

impl StreamHandlers {
    fn dispatch(&self, event: StreamEvent) {
        let handler = if event.is_quote() {
            &self.on_quote
        } else {
            &self.on_trade
        };
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

// ═══════════════════════════════════════════════════
// WIRE PROTOCOL
// ═══════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    action: &'static str,
    key: &'a str,
    secret: &'a str,
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    action: &'static str,
    trades: &'a [String],
    quotes: &'a [String],
}

/// Trade conditions arrive as a list for stocks and a single code for
/// options. Bars reuse `c` for the close price, which is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Conditions {
    One(String),
    Many(Vec<String>),
    Other(de::IgnoredAny),
}

impl Conditions {
    fn into_vec(self) -> Vec<String> {
        match self {
            Conditions::One(c) => vec![c],
            Conditions::Many(c) => c,
            Conditions::Other(_) => Vec::new(),
        }
    }
}

/// Any message of the feed; which fields are set depends on `T`
#[derive(Debug, Clone, Deserialize)]
struct WireStreamMessage {
    #[serde(rename = "T")]
    kind: String,
    #[serde(rename = "S")]
    symbol: Option<String>,
    #[serde(default, deserialize_with = "stream_timestamp")]
    t: Option<DateTime<Utc>>,
    // trades
    p: Option<f64>,
    s: Option<f64>,
    x: Option<String>,
    i: Option<u64>,
    // quotes
    bp: Option<f64>,
    bs: Option<f64>,
    ap: Option<f64>,
    #[serde(rename = "as")]
    ask_size: Option<f64>,
    bx: Option<String>,
    ax: Option<String>,
    c: Option<Conditions>,
    z: Option<String>,
    // control
    msg: Option<String>,
    code: Option<i64>,
    #[serde(default)]
    trades: Vec<String>,
    #[serde(default)]
    quotes: Vec<String>,
}

/// Decoded feed message
#[derive(Debug, Clone, PartialEq)]
enum StreamMessage {
    Connected,
    Authenticated,
    Subscribed { trades: Vec<String>, quotes: Vec<String> },
    Rejected { code: i64, message: String },
    Event(StreamEvent),
}

impl WireStreamMessage {
    fn into_message(self, kind: StreamKind) -> Option<StreamMessage> {
        match self.kind.as_str() {
            "success" => match self.msg.as_deref() {
                Some("connected") => Some(StreamMessage::Connected),
                Some("authenticated") => Some(StreamMessage::Authenticated),
                _ => None,
            },
            "error" => Some(StreamMessage::Rejected {
                code: self.code.unwrap_or_default(),
                message: self.msg.unwrap_or_default(),
            }),
            "subscription" => Some(StreamMessage::Subscribed {
                trades: self.trades,
                quotes: self.quotes,
            }),
            "t" => self.into_trade(kind).map(StreamMessage::Event),
            "q" => self.into_quote(kind).map(StreamMessage::Event),
            _ => None,
        }
    }

    fn into_trade(self, kind: StreamKind) -> Option<StreamEvent> {
        let symbol = self.symbol?;
        let timestamp = self.t?;
        let price = self.p?;
        let size = self.s?;
        let conditions = self.c.map(Conditions::into_vec).unwrap_or_default();

        Some(match kind {
            StreamKind::Stocks => StreamEvent::StockTrade {
                symbol,
                trade: StockTrade {
                    timestamp,
                    price,
                    size,
                    exchange: self.x,
                    conditions,
                    id: self.i,
                    tape: self.z,
                },
            },
            StreamKind::Options => StreamEvent::OptionTrade {
                symbol,
                trade: OptionTrade {
                    timestamp,
                    price,
                    size,
                    exchange: self.x,
                    condition: conditions.into_iter().next(),
                },
            },
        })
    }

    fn into_quote(self, kind: StreamKind) -> Option<StreamEvent> {
        let symbol = self.symbol?;
        let timestamp = self.t?;
        let bid_price = self.bp?;
        let bid_size = self.bs?;
        let ask_price = self.ap?;
        let ask_size = self.ask_size?;
        let conditions = self.c.map(Conditions::into_vec).unwrap_or_default();

        Some(match kind {
            StreamKind::Stocks => StreamEvent::StockQuote {
                symbol,
                quote: StockQuote {
                    timestamp,
                    bid_price,
                    bid_size,
                    ask_price,
                    ask_size,
                    bid_exchange: self.bx,
                    ask_exchange: self.ax,
                    conditions,
                    tape: self.z,
                },
            },
            StreamKind::Options => StreamEvent::OptionQuote {
                symbol,
                quote: OptionQuote {
                    timestamp,
                    bid_price,
                    bid_size,
                    ask_price,
                    ask_size,
                    bid_exchange: self.bx,
                    ask_exchange: self.ax,
                    condition: conditions.into_iter().next(),
                },
            },
        })
    }
}

/// RFC 3339 string (JSON) or MessagePack timestamp extension (type -1)
fn stream_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(TimestampVisitor)
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = Option<DateTime<Utc>>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an RFC 3339 timestamp or a MessagePack timestamp")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        DateTime::parse_from_rfc3339(v)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(E::custom)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_newtype_struct<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (tag, ExtBytes(bytes)) = <(i8, ExtBytes)>::deserialize(deserializer)?;
        if tag != -1 {
            return Err(de::Error::custom(format!(
                "unexpected MessagePack extension type {}",
                tag
            )));
        }
        decode_msgpack_timestamp(&bytes)
            .map(Some)
            .ok_or_else(|| de::Error::custom("invalid MessagePack timestamp"))
    }
}

struct ExtBytes(Vec<u8>);

impl<'de> Deserialize<'de> for ExtBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = ExtBytes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("extension bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<ExtBytes, E> {
                Ok(ExtBytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<ExtBytes, E> {
                Ok(ExtBytes(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ExtBytes, A::Error> {
                let mut bytes = Vec::new();
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(ExtBytes(bytes))
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}

/// Decode the 32, 64 and 96 bit MessagePack timestamp layouts
fn decode_msgpack_timestamp(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let (secs, nanos) = match bytes.len() {
        4 => (u32::from_be_bytes(bytes.try_into().ok()?) as i64, 0),
        8 => {
            let v = u64::from_be_bytes(bytes.try_into().ok()?);
            ((v & 0x3_ffff_ffff) as i64, (v >> 34) as u32)
        }
        12 => {
            let nanos = u32::from_be_bytes(bytes[..4].try_into().ok()?);
            let secs = i64::from_be_bytes(bytes[4..].try_into().ok()?);
            (secs, nanos)
        }
        _ => return None,
    };
    DateTime::from_timestamp(secs, nanos)
}

// ═══════════════════════════════════════════════════
// CLIENT
// ═══════════════════════════════════════════════════

/// Websocket client for one Alpaca real-time feed
pub struct MarketDataStream {
    kind: StreamKind,
    url: String,
    api_key: String,
    secret_key: String,
}

impl MarketDataStream {
    /// Stock trades and quotes on the configured stock feed
    pub fn stocks(config: &AlpacaConfig) -> Self {
        Self::new(
            StreamKind::Stocks,
            format!("{}/v2/{}", config.stream_url.trim_end_matches('/'), config.stock_feed),
            config,
        )
    }

    /// Option trades and quotes on the configured option feed
    pub fn options(config: &AlpacaConfig) -> Self {
        Self::new(
            StreamKind::Options,
            format!(
                "{}/v1beta1/{}",
                config.stream_url.trim_end_matches('/'),
                config.option_feed
            ),
            config,
        )
    }

    fn new(kind: StreamKind, url: String, config: &AlpacaConfig) -> Self {
        Self {
            kind,
            url,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stream `symbols` into `handlers` until the server closes the
    /// connection or `shutdown` fires. Dropped connections are retried with
    /// exponential backoff; a rejected request (bad credentials, too many
    /// symbols) ends the stream with an error.
    pub async fn run(
        &self,
        symbols: &[String],
        handlers: StreamHandlers,
        mut shutdown: broadcast::Receiver<()>,
    ) -> AlpacaResult<()> {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        let trades = if handlers.on_trade.is_some() {
            symbols.clone()
        } else {
            Vec::new()
        };
        let quotes = if handlers.on_quote.is_some() {
            symbols
        } else {
            Vec::new()
        };

        if trades.is_empty() && quotes.is_empty() {
            return Err(AlpacaError::Config(
                "stream needs symbols and at least one handler".into(),
            ));
        }

        tracing::info!(
            "Streaming {} from {}: {} trade and {} quote subscriptions",
            self.kind.as_str(),
            self.url,
            trades.len(),
            quotes.len()
        );

        let mut attempts = 0;
        let mut delay = INITIAL_RECONNECT_DELAY;

        loop {
            match self
                .connect_and_stream(&trades, &quotes, &handlers, &mut shutdown)
                .await
            {
                Ok(()) => {
                    tracing::info!("{} stream ended", self.kind.as_str());
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempts + 1 < MAX_RECONNECT_ATTEMPTS => {
                    attempts += 1;
                    tracing::warn!(
                        "{} stream dropped (attempt {}/{}), reconnecting in {:?}: {}",
                        self.kind.as_str(),
                        attempts,
                        MAX_RECONNECT_ATTEMPTS,
                        delay,
                        e
                    );

                    tokio::select! {
                        _ = sleep(delay) => {
                            delay = std::cmp::min(delay * 2, MAX_RECONNECT_DELAY);
                        }
                        _ = shutdown.recv() => {
                            tracing::info!("Shutdown signal received during reconnect delay");
                            return Ok(());
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn connect_and_stream(
        &self,
        trades: &[String],
        quotes: &[String],
        handlers: &StreamHandlers,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> AlpacaResult<()> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| AlpacaError::Config(format!("invalid stream URL {}: {}", self.url, e)))?;
        if self.kind == StreamKind::Options {
            request
                .headers_mut()
                .insert("Content-Type", HeaderValue::from_static("application/msgpack"));
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| AlpacaError::WebSocket(format!("Failed to connect to {}: {}", self.url, e)))?;
        tracing::debug!("Connected to {}", self.url);

        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                frame = read.next() => {
                    let messages = match frame {
                        Some(Ok(Message::Text(text))) => self.decode(text.as_bytes())?,
                        Some(Ok(Message::Binary(bytes))) => self.decode(&bytes)?,
                        Some(Ok(Message::Ping(ping))) => {
                            if let Err(e) = write.send(Message::Pong(ping)).await {
                                tracing::warn!("Failed to send pong: {}", e);
                            }
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Stream closed by server");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(AlpacaError::WebSocket(e.to_string())),
                    };

                    for message in messages {
                        match message {
                            StreamMessage::Connected => {
                                let auth = AuthRequest {
                                    action: "auth",
                                    key: &self.api_key,
                                    secret: &self.secret_key,
                                };
                                write.send(self.encode(&auth)?).await.map_err(|e| {
                                    AlpacaError::WebSocket(format!("Failed to authenticate: {}", e))
                                })?;
                            }
                            StreamMessage::Authenticated => {
                                let subscribe = SubscribeRequest {
                                    action: "subscribe",
                                    trades,
                                    quotes,
                                };
                                write.send(self.encode(&subscribe)?).await.map_err(|e| {
                                    AlpacaError::WebSocket(format!("Failed to subscribe: {}", e))
                                })?;
                            }
                            StreamMessage::Subscribed { trades, quotes } => {
                                tracing::info!(
                                    "Subscribed to trades {:?} and quotes {:?}",
                                    trades,
                                    quotes
                                );
                            }
                            StreamMessage::Rejected { code, message } => {
                                return Err(AlpacaError::Stream { code, message });
                            }
                            StreamMessage::Event(event) => handlers.dispatch(event),
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, closing stream");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::warn!("Failed to send close frame: {}", e);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn encode<T: Serialize>(&self, request: &T) -> AlpacaResult<Message> {
        match self.kind {
            StreamKind::Stocks => serde_json::to_string(request)
                .map(Message::Text)
                .map_err(|e| AlpacaError::WebSocket(format!("Failed to encode request: {}", e))),
            StreamKind::Options => rmp_serde::to_vec_named(request)
                .map(Message::Binary)
                .map_err(|e| AlpacaError::WebSocket(format!("Failed to encode request: {}", e))),
        }
    }

    /// Decode one frame (an array of messages), skipping unknown or incomplete ones
    fn decode(&self, frame: &[u8]) -> AlpacaResult<Vec<StreamMessage>> {
        let wire: Vec<WireStreamMessage> = match self.kind {
            StreamKind::Stocks => serde_json::from_slice(frame).map_err(|e| e.to_string()),
            StreamKind::Options => rmp_serde::from_slice(frame).map_err(|e| e.to_string()),
        }
        .map_err(|message| AlpacaError::Decode {
            endpoint: self.url.clone(),
            message,
        })?;

        Ok(wire
            .into_iter()
            .filter_map(|m| m.into_message(self.kind))
            .collect())
    }
}
