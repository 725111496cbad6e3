//! Polymarket CLOB venue client.
//!
//! Market data arrives over a framed JSON websocket: a `book` frame
//! replaces the whole book for one token, a `price_change` frame mutates a
//! single level. Prices are strings in [0, 1]. Order entry goes over REST.
//!
//! For this venue `MarketId` equals the outcome token id: every token has
//! its own book and its own update stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{MarketDataStream, MarketEvent, OrderGateway};
use crate::core::book::{BookSide, LiveBook};
use crate::core::domain::{
    ExecutionLeg, ExecutionResult, FeeKind, FeeSchedule, LegStatus, MarketId, MarketUpdate,
    OrderId, TokenId, Venue,
};
use crate::error::{Error, Result};

/// Polymarket connection settings.
#[derive(Debug, Clone)]
pub struct PolymarketConfig {
    pub ws_url: String,
    pub api_url: String,
    /// Taker fee on notional, as a fraction.
    pub fee_rate: Decimal,
}

/// Subscription request sent on connect.
#[derive(Debug, Serialize)]
struct SubscribeMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
    channel: &'static str,
    market_ids: Vec<String>,
}

impl SubscribeMessage {
    fn new(market_ids: Vec<String>) -> Self {
        Self {
            msg_type: "subscribe",
            channel: "orderbook",
            market_ids,
        }
    }
}

/// Frames received from the orderbook channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "event_type")]
enum WsMessage {
    #[serde(rename = "book")]
    Book(BookMessage),

    #[serde(rename = "price_change")]
    PriceChange(PriceChangeMessage),

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct BookMessage {
    market: String,
    bids: Vec<WsPriceLevel>,
    asks: Vec<WsPriceLevel>,
}

#[derive(Debug, Deserialize)]
struct PriceChangeMessage {
    market: String,
    price: String,
    size: String,
    side: String,
}

/// Price level as received on the wire (strings, not decimals).
#[derive(Debug, Clone, Deserialize)]
struct WsPriceLevel {
    price: String,
    size: String,
}

fn parse_levels(levels: &[WsPriceLevel]) -> Vec<(Decimal, Decimal)> {
    levels
        .iter()
        .filter_map(|pl| Some((pl.price.parse().ok()?, pl.size.parse().ok()?)))
        .collect()
}

/// Streaming market-data session for Polymarket.
pub struct PolymarketStream {
    config: PolymarketConfig,
    fees: FeeSchedule,
    ws: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    books: HashMap<TokenId, LiveBook>,
    sequences: HashMap<TokenId, u64>,
    subscribed: Vec<TokenId>,
    decode_errors: AtomicU64,
}

impl PolymarketStream {
    #[must_use]
    pub fn new(config: PolymarketConfig) -> Self {
        let fees = FeeSchedule::new(
            FeeKind::TakerOnNotional,
            config.fee_rate,
            crate::core::domain::SettlementCurrency::Usdc,
        );
        Self {
            config,
            fees,
            ws: None,
            books: HashMap::new(),
            sequences: HashMap::new(),
            subscribed: Vec::new(),
            decode_errors: AtomicU64::new(0),
        }
    }

    fn drop_frame(&self, raw: &str, reason: &str) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        warn!(reason, raw, "Dropping undecodable frame");
    }

    fn next_sequence(&mut self, token: &TokenId) -> u64 {
        let seq = self.sequences.entry(token.clone()).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Apply a decoded frame, producing the normalized update on success.
    fn apply(&mut self, msg: WsMessage, raw: &str) -> Option<MarketEvent> {
        match msg {
            WsMessage::Book(book_msg) => {
                let token = TokenId::from(book_msg.market.clone());
                let sequence = self.next_sequence(&token);
                let book = self
                    .books
                    .entry(token.clone())
                    .or_insert_with(|| LiveBook::new(token.clone()));
                book.apply_snapshot(
                    parse_levels(&book_msg.bids),
                    parse_levels(&book_msg.asks),
                    sequence,
                );
                self.emit(&token, sequence)
            }
            WsMessage::PriceChange(change) => {
                let token = TokenId::from(change.market.clone());
                let side = match change.side.as_str() {
                    "buy" | "bid" => BookSide::Bid,
                    "sell" | "ask" => BookSide::Ask,
                    other => {
                        self.drop_frame(raw, &format!("unknown side {other}"));
                        return None;
                    }
                };
                let (Ok(price), Ok(size)) = (
                    change.price.parse::<Decimal>(),
                    change.size.parse::<Decimal>(),
                ) else {
                    self.drop_frame(raw, "unparseable price/size");
                    return None;
                };
                let sequence = self.next_sequence(&token);
                let book = self
                    .books
                    .entry(token.clone())
                    .or_insert_with(|| LiveBook::new(token.clone()));
                if !book.apply_delta(side, price, size, sequence) {
                    self.drop_frame(raw, "rejected delta");
                    return None;
                }
                self.emit(&token, sequence)
            }
            WsMessage::Unknown => {
                debug!(raw, "Ignoring unknown frame");
                None
            }
        }
    }

    /// Build the fee-adjusted update from the current book state.
    fn emit(&self, token: &TokenId, sequence: u64) -> Option<MarketEvent> {
        let book = self.books.get(token)?;
        let (bid, bid_size) = book.best_bid().unwrap_or((Decimal::ZERO, Decimal::ZERO));
        let (ask, ask_size) = book.best_ask().unwrap_or((Decimal::ZERO, Decimal::ZERO));

        let update = MarketUpdate::new(
            Venue::Polymarket,
            MarketId::from(token.as_str()),
            self.fees.adjust_bid(bid),
            self.fees.adjust_ask(ask),
            bid_size,
            ask_size,
            self.fees.rate(),
            sequence,
        );
        Some(MarketEvent::Update {
            update,
            book: book.snapshot(),
        })
    }
}

#[async_trait]
impl MarketDataStream for PolymarketStream {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    async fn connect(&mut self) -> Result<()> {
        info!(url = %self.config.ws_url, "Connecting to Polymarket WebSocket");
        let (ws_stream, response) = connect_async(&self.config.ws_url).await?;
        info!(status = %response.status(), "Polymarket WebSocket connected");
        self.ws = Some(ws_stream);
        // A reconnect starts from fresh books; stale state must not leak
        // across sessions.
        self.books.clear();

        if !self.subscribed.is_empty() {
            let tokens = self.subscribed.clone();
            self.subscribe(&tokens).await?;
        }
        Ok(())
    }

    async fn subscribe(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.subscribed = tokens.to_vec();
        let ws = self.ws.as_mut().ok_or_else(|| Error::Transport {
            venue: Venue::Polymarket,
            reason: "subscribe before connect".into(),
        })?;

        let ids: Vec<String> = tokens.iter().map(|t| t.as_str().to_string()).collect();
        let msg = SubscribeMessage::new(ids);
        let json = serde_json::to_string(&msg)?;
        info!(tokens = tokens.len(), "Subscribing to Polymarket orderbooks");
        ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<MarketEvent> {
        loop {
            // The socket borrow ends before decode mutates the books.
            let message = self.ws.as_mut()?.next().await?;
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(msg) => {
                        if let Some(event) = self.apply(msg, &text) {
                            return Some(event);
                        }
                    }
                    Err(e) => {
                        self.drop_frame(&text, &e.to_string());
                    }
                },
                Ok(Message::Ping(data)) => {
                    debug!("Received ping");
                    let Some(ws) = self.ws.as_mut() else {
                        return None;
                    };
                    if ws.send(Message::Pong(data)).await.is_err() {
                        return Some(MarketEvent::Disconnected {
                            reason: "failed to send pong".into(),
                        });
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "Polymarket WebSocket closed by server");
                    return Some(MarketEvent::Disconnected {
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Polymarket WebSocket error");
                    return Some(MarketEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

// --- Order entry -----------------------------------------------------------

#[derive(Debug, Serialize)]
struct PlaceOrderRequest {
    token_id: String,
    side: String,
    price: Decimal,
    size: Decimal,
    time_in_force: &'static str,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    order_id: String,
    status: String,
    #[serde(default)]
    filled_size: Option<Decimal>,
    #[serde(default)]
    avg_price: Option<Decimal>,
}

/// REST order gateway for Polymarket.
pub struct PolymarketGateway {
    config: PolymarketConfig,
    client: reqwest::Client,
    api_key: String,
}

impl PolymarketGateway {
    #[must_use]
    pub fn new(config: PolymarketConfig, api_key: String, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            api_key,
        }
    }
}

#[async_trait]
impl OrderGateway for PolymarketGateway {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn place_order(&self, leg: &ExecutionLeg) -> Result<ExecutionResult> {
        if leg.side.is_on_chain() {
            // Mint/merge legs settle through the RPC broadcast path, not
            // the order book.
            return Err(Error::Execution(
                "mint/merge legs are not order-book orders".into(),
            ));
        }

        let request = PlaceOrderRequest {
            token_id: leg.token_id.as_str().to_string(),
            side: if leg.side.is_cost() { "BUY" } else { "SELL" }.into(),
            price: leg.limit_price,
            size: leg.size,
            time_in_force: "IOC",
        };

        let response = self
            .client
            .post(format!("{}/order", self.config.api_url))
            .header("X-Api-Key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth {
                venue: Venue::Polymarket,
                reason: "order rejected: invalid credentials".into(),
            });
        }

        let body: PlaceOrderResponse = response.error_for_status()?.json().await?;
        let filled = body.filled_size.unwrap_or(Decimal::ZERO);
        let status = match body.status.as_str() {
            "matched" | "filled" => LegStatus::Filled,
            "partial" => LegStatus::Partial,
            "cancelled" => LegStatus::Cancelled,
            _ => LegStatus::Failed,
        };

        Ok(ExecutionResult {
            order_id: Some(OrderId::from(body.order_id)),
            status,
            filled_size: if status == LegStatus::Filled { leg.size } else { filled },
            remaining_size: if status == LegStatus::Filled {
                Decimal::ZERO
            } else {
                leg.size - filled
            },
            executed_price: body.avg_price.or(Some(leg.limit_price)),
            error: None,
        })
    }

    async fn cancel(&self, order_id: &OrderId) -> Result<()> {
        self.client
            .delete(format!("{}/order/{}", self.config.api_url, order_id))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
