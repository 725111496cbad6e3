//! SX exchange client.
//!
//! SX exposes no native streaming; a polling loop over the REST markets
//! endpoint emulates one, emitting one update per polled market per cycle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{MarketDataStream, MarketEvent, OrderGateway};
use crate::core::book::LiveBook;
use crate::core::domain::{
    net_exchange_probability, ExecutionLeg, ExecutionResult, LegStatus, MarketId, MarketUpdate,
    OrderId, TokenId, Venue,
};
use crate::error::{Error, Result};

/// SX connection settings.
#[derive(Debug, Clone)]
pub struct SxConfig {
    pub base_url: String,
    pub api_key: String,
    /// Poll interval for the stream emulation.
    pub poll_interval: Duration,
    /// Commission on net winnings, as a fraction.
    pub commission: Decimal,
}

#[derive(Debug, Deserialize)]
struct SxMarket {
    #[serde(rename = "marketHash")]
    market_hash: String,
    #[serde(rename = "highestBid")]
    highest_bid: Option<Decimal>,
    #[serde(rename = "lowestAsk")]
    lowest_ask: Option<Decimal>,
    #[serde(rename = "bidSize", default)]
    bid_size: Option<Decimal>,
    #[serde(rename = "askSize", default)]
    ask_size: Option<Decimal>,
}

/// Poll-based market-data stream for SX.
pub struct SxStream {
    config: SxConfig,
    client: reqwest::Client,
    subscribed: Vec<TokenId>,
    pending: VecDeque<MarketEvent>,
    sequences: std::collections::HashMap<MarketId, u64>,
    interval: Option<tokio::time::Interval>,
    decode_errors: AtomicU64,
}

impl SxStream {
    #[must_use]
    pub fn new(config: SxConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            subscribed: Vec::new(),
            pending: VecDeque::new(),
            sequences: std::collections::HashMap::new(),
            interval: None,
            decode_errors: AtomicU64::new(0),
        }
    }

    async fn poll_once(&mut self) -> Result<Vec<MarketEvent>> {
        let ids: Vec<&str> = self.subscribed.iter().map(TokenId::as_str).collect();
        let url = format!("{}/markets/{}", self.config.base_url, ids.join(","));
        debug!(url = %url, "Polling SX markets");

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth {
                venue: Venue::Sx,
                reason: "poll rejected: invalid credentials".into(),
            });
        }
        let markets: Vec<SxMarket> = response.error_for_status()?.json().await?;

        let mut events = Vec::with_capacity(markets.len());
        for market in markets {
            match self.to_event(&market) {
                Some(event) => events.push(event),
                None => {
                    self.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(market = %market.market_hash, "Dropping SX market with unusable quote");
                }
            }
        }
        Ok(events)
    }

    fn to_event(&mut self, market: &SxMarket) -> Option<MarketEvent> {
        let bid = market.highest_bid?;
        let ask = market.lowest_ask?;
        if bid <= Decimal::ZERO || ask <= Decimal::ZERO || bid >= Decimal::ONE || ask >= Decimal::ONE
        {
            return None;
        }

        let commission = self.config.commission;
        let market_id = MarketId::from(market.market_hash.clone());
        let seq = self.sequences.entry(market_id.clone()).or_insert(0);
        *seq += 1;
        let sequence = *seq;

        let bid_net = net_exchange_probability(bid, commission);
        let ask_net = net_exchange_probability(ask, commission);
        let bid_size = market.bid_size.unwrap_or(Decimal::ZERO);
        let ask_size = market.ask_size.unwrap_or(Decimal::ZERO);

        let update = MarketUpdate::new(
            Venue::Sx,
            market_id.clone(),
            bid_net,
            ask_net,
            bid_size,
            ask_size,
            commission,
            sequence,
        );

        let mut book = LiveBook::new(TokenId::from(market.market_hash.clone()));
        book.apply_snapshot(vec![(bid_net, bid_size)], vec![(ask_net, ask_size)], sequence);

        Some(MarketEvent::Update {
            update,
            book: book.snapshot(),
        })
    }
}

#[async_trait]
impl MarketDataStream for SxStream {
    fn venue(&self) -> Venue {
        Venue::Sx
    }

    fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    async fn connect(&mut self) -> Result<()> {
        // REST-only venue: connecting just arms the poll timer.
        info!(base_url = %self.config.base_url, "SX polling armed");
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.interval = Some(interval);
        Ok(())
    }

    async fn subscribe(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.subscribed = tokens.to_vec();
        info!(markets = tokens.len(), "SX subscription set");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<MarketEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.subscribed.is_empty() {
                return None;
            }
            self.interval.as_mut()?.tick().await;
            match self.poll_once().await {
                Ok(events) => self.pending.extend(events),
                Err(e) => {
                    return Some(MarketEvent::Disconnected {
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

// --- Order entry -----------------------------------------------------------

#[derive(Debug, Serialize)]
struct SxOrderRequest {
    #[serde(rename = "marketHash")]
    market_hash: String,
    side: String,
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct SxOrderResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    status: String,
    #[serde(rename = "filledSize", default)]
    filled_size: Option<Decimal>,
}

/// REST order gateway for SX.
pub struct SxGateway {
    config: SxConfig,
    client: reqwest::Client,
}

impl SxGateway {
    #[must_use]
    pub fn new(config: SxConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl OrderGateway for SxGateway {
    fn venue(&self) -> Venue {
        Venue::Sx
    }

    async fn place_order(&self, leg: &ExecutionLeg) -> Result<ExecutionResult> {
        let request = SxOrderRequest {
            market_hash: leg.market_id.as_str().to_string(),
            side: if leg.side.is_cost() { "BUY" } else { "SELL" }.into(),
            price: leg.limit_price,
            size: leg.size,
        };

        let response = self
            .client
            .post(format!("{}/orders", self.config.base_url))
            .header("X-Api-Key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth {
                venue: Venue::Sx,
                reason: "order rejected: invalid credentials".into(),
            });
        }

        let body: SxOrderResponse = response.error_for_status()?.json().await?;
        let filled = body.filled_size.unwrap_or(Decimal::ZERO);
        let status = match body.status.as_str() {
            "FILLED" => LegStatus::Filled,
            "PARTIAL" => LegStatus::Partial,
            "CANCELLED" => LegStatus::Cancelled,
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
            executed_price: Some(leg.limit_price),
            error: None,
        })
    }

    async fn cancel(&self, order_id: &OrderId) -> Result<()> {
        self.client
            .delete(format!("{}/orders/{}", self.config.base_url, order_id))
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
