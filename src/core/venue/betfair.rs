//! Betfair exchange stream client.
//!
//! Newline-delimited JSON over a persistent TLS socket. The session
//! authenticates first, waits for the ack, then subscribes with a field
//! filter for the best-offer ladder at depth 1. A heartbeat op goes out
//! every 60 seconds; 70 seconds without any server line is treated as a
//! disconnect.
//!
//! Market change messages (`op: "mcm"`) carry per-runner best-back (`atb`)
//! and best-lay (`atl`) ladders as `[odds, size]` pairs. Odds convert to
//! implied probabilities with the commission on net winnings folded in.
//! In probability space the lay ladder is where we can sell (bid side)
//! and the back ladder is where we can buy (ask side).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::{MarketDataStream, MarketEvent};
use crate::core::book::LiveBook;
use crate::core::domain::{
    implied_probability, net_exchange_probability, MarketId, MarketUpdate, TokenId, Venue,
};
use crate::error::{Error, Result};

/// Seconds between outgoing heartbeat ops.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
/// Max silence from the server before the session is declared dead.
const SILENCE_TIMEOUT: Duration = Duration::from_secs(70);

/// Betfair connection settings.
#[derive(Debug, Clone)]
pub struct BetfairConfig {
    pub host: String,
    pub port: u16,
    pub app_key: String,
    pub session_token: String,
    /// Commission on net winnings, as a fraction.
    pub commission: Decimal,
}

#[derive(Debug, Serialize)]
struct AuthMessage<'a> {
    op: &'static str,
    #[serde(rename = "appKey")]
    app_key: &'a str,
    session: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpEnvelope {
    op: String,
}

#[derive(Debug, Deserialize)]
struct MarketChangeMessage {
    #[serde(default)]
    mc: Vec<MarketChange>,
}

#[derive(Debug, Deserialize)]
struct MarketChange {
    id: String,
    #[serde(default)]
    rc: Vec<RunnerChange>,
}

#[derive(Debug, Deserialize)]
struct RunnerChange {
    #[serde(default)]
    atb: Vec<[f64; 2]>,
    #[serde(default)]
    atl: Vec<[f64; 2]>,
}

type Writer = Arc<Mutex<WriteHalf<TlsStream<TcpStream>>>>;

/// Streaming market-data session for Betfair.
pub struct BetfairStream {
    config: BetfairConfig,
    reader: Option<BufReader<ReadHalf<TlsStream<TcpStream>>>>,
    writer: Option<Writer>,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
    subscribed: Vec<TokenId>,
    sequences: std::collections::HashMap<MarketId, u64>,
    decode_errors: AtomicU64,
}

impl BetfairStream {
    #[must_use]
    pub fn new(config: BetfairConfig) -> Self {
        Self {
            config,
            reader: None,
            writer: None,
            heartbeat: None,
            subscribed: Vec::new(),
            sequences: std::collections::HashMap::new(),
            decode_errors: AtomicU64::new(0),
        }
    }

    async fn open_tls(&self) -> Result<TlsStream<TcpStream>> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let tcp = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        let server_name =
            ServerName::try_from(self.config.host.clone()).map_err(|_| Error::Transport {
                venue: Venue::Betfair,
                reason: format!("invalid server name {}", self.config.host),
            })?;
        Ok(connector.connect(server_name, tcp).await?)
    }

    async fn send_line(writer: &Writer, payload: &str) -> Result<()> {
        let mut guard = writer.lock().await;
        guard.write_all(payload.as_bytes()).await?;
        guard.write_all(b"\r\n").await?;
        guard.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        let reader = self.reader.as_mut().ok_or_else(|| Error::Transport {
            venue: Venue::Betfair,
            reason: "read before connect".into(),
        })?;
        let mut line = String::new();
        let read = tokio::time::timeout(SILENCE_TIMEOUT, reader.read_line(&mut line)).await;
        match read {
            Err(_) => Err(Error::Transport {
                venue: Venue::Betfair,
                reason: "no data within the heartbeat window".into(),
            }),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(line)),
        }
    }

    fn spawn_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        let writer = self.writer.clone();
        self.heartbeat = Some(tokio::spawn(async move {
            let Some(writer) = writer else { return };
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                let payload = json!({"op": "heartbeat"}).to_string();
                if Self::send_line(&writer, &payload).await.is_err() {
                    break;
                }
                debug!("Heartbeat sent");
            }
        }));
    }

    fn next_sequence(&mut self, market: &MarketId) -> u64 {
        let seq = self.sequences.entry(market.clone()).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Decode one `mcm` line into at most one update per market change.
    fn decode_mcm(&mut self, raw: &str) -> Vec<MarketEvent> {
        let parsed: MarketChangeMessage = match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, raw, "Dropping undecodable mcm frame");
                return Vec::new();
            }
        };

        let commission = self.config.commission;
        let mut events = Vec::new();
        for change in parsed.mc {
            let market_id = MarketId::from(change.id.clone());
            for runner in &change.rc {
                let Some(update) = self.runner_update(&market_id, runner, commission) else {
                    continue;
                };
                // Level-1 book mirror so the router can query exchange depth.
                let mut book = LiveBook::new(TokenId::from(change.id.clone()));
                book.apply_snapshot(
                    to_prob_levels(&runner.atl, commission),
                    to_prob_levels(&runner.atb, commission),
                    update.sequence(),
                );
                events.push(MarketEvent::Update {
                    update,
                    book: book.snapshot(),
                });
            }
        }
        events
    }

    fn runner_update(
        &mut self,
        market_id: &MarketId,
        runner: &RunnerChange,
        commission: Decimal,
    ) -> Option<MarketUpdate> {
        let (lay_prob, lay_size) = best_ladder_prob(&runner.atl, commission)?;
        let (back_prob, back_size) = best_ladder_prob(&runner.atb, commission)?;
        let sequence = self.next_sequence(market_id);
        Some(MarketUpdate::new(
            Venue::Betfair,
            market_id.clone(),
            lay_prob,
            back_prob,
            lay_size,
            back_size,
            commission,
            sequence,
        ))
    }
}

/// Convert the best `[odds, size]` ladder entry to a netted probability.
fn best_ladder_prob(ladder: &[[f64; 2]], commission: Decimal) -> Option<(Decimal, Decimal)> {
    let [odds, size] = ladder.first()?;
    let odds = Decimal::try_from(*odds).ok()?;
    let size = Decimal::try_from(*size).ok()?;
    if odds <= Decimal::ONE || size < Decimal::ZERO {
        return None;
    }
    let prob = net_exchange_probability(implied_probability(odds), commission);
    Some((prob, size))
}

fn to_prob_levels(ladder: &[[f64; 2]], commission: Decimal) -> Vec<(Decimal, Decimal)> {
    ladder
        .iter()
        .filter_map(|entry| best_ladder_prob(std::slice::from_ref(entry), commission))
        .collect()
}

#[async_trait]
impl MarketDataStream for BetfairStream {
    fn venue(&self) -> Venue {
        Venue::Betfair
    }

    fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    async fn connect(&mut self) -> Result<()> {
        info!(host = %self.config.host, "Connecting to Betfair stream");
        let tls = self.open_tls().await?;
        let (read_half, write_half) = tokio::io::split(tls);
        self.reader = Some(BufReader::new(read_half));
        let writer: Writer = Arc::new(Mutex::new(write_half));
        self.writer = Some(Arc::clone(&writer));

        let auth = serde_json::to_string(&AuthMessage {
            op: "authentication",
            app_key: &self.config.app_key,
            session: &self.config.session_token,
        })?;
        Self::send_line(&writer, &auth).await?;

        // The ack must precede the market subscription.
        loop {
            let Some(line) = self.read_line().await? else {
                return Err(Error::Transport {
                    venue: Venue::Betfair,
                    reason: "stream closed during authentication".into(),
                });
            };
            match serde_json::from_str::<OpEnvelope>(&line) {
                Ok(envelope) if envelope.op == "authentication" => {
                    info!("Betfair stream authenticated");
                    break;
                }
                Ok(envelope) if envelope.op == "status" => {
                    if line.contains("FAILURE") {
                        return Err(Error::Auth {
                            venue: Venue::Betfair,
                            reason: line.trim().to_string(),
                        });
                    }
                }
                _ => debug!(line = line.trim(), "Pre-auth line ignored"),
            }
        }

        self.spawn_heartbeat();

        if !self.subscribed.is_empty() {
            let markets = self.subscribed.clone();
            self.subscribe(&markets).await?;
        }
        Ok(())
    }

    async fn subscribe(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.subscribed = tokens.to_vec();
        let writer = self.writer.as_ref().ok_or_else(|| Error::Transport {
            venue: Venue::Betfair,
            reason: "subscribe before connect".into(),
        })?;

        let market_ids: Vec<&str> = tokens.iter().map(TokenId::as_str).collect();
        let payload = json!({
            "op": "marketSubscription",
            "marketFilter": {"marketIds": market_ids},
            "marketDataFilter": {"fields": ["EX_BEST_OFFERS_DISP"], "ladderLevels": 1},
        })
        .to_string();
        info!(markets = tokens.len(), "Subscribing to Betfair markets");
        Self::send_line(writer, &payload).await
    }

    async fn next_event(&mut self) -> Option<MarketEvent> {
        let mut pending: Vec<MarketEvent> = Vec::new();
        loop {
            if let Some(event) = pending.pop() {
                return Some(event);
            }
            match self.read_line().await {
                Ok(Some(line)) => {
                    let envelope: OpEnvelope = match serde_json::from_str(&line) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            self.decode_errors.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, line = line.trim(), "Dropping undecodable line");
                            continue;
                        }
                    };
                    match envelope.op.as_str() {
                        "mcm" => pending = self.decode_mcm(&line),
                        "heartbeat" => debug!("Server heartbeat"),
                        other => debug!(op = other, "Ignoring op"),
                    }
                }
                Ok(None) => {
                    return Some(MarketEvent::Disconnected {
                        reason: "stream closed by server".into(),
                    })
                }
                Err(e) => {
                    return Some(MarketEvent::Disconnected {
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

impl Drop for BetfairStream {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

// --- Order entry -----------------------------------------------------------

#[derive(Debug, Serialize)]
struct PlaceInstruction {
    #[serde(rename = "marketId")]
    market_id: String,
    #[serde(rename = "selectionId")]
    selection_id: String,
    side: String,
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct PlaceReport {
    status: String,
    #[serde(rename = "betId", default)]
    bet_id: Option<String>,
    #[serde(rename = "sizeMatched", default)]
    size_matched: Option<Decimal>,
    #[serde(rename = "averagePriceMatched", default)]
    average_price_matched: Option<Decimal>,
}

/// REST order entry settings for Betfair.
#[derive(Debug, Clone)]
pub struct BetfairGatewayConfig {
    pub api_url: String,
    pub app_key: String,
    pub session_token: String,
}

/// REST order gateway for Betfair.
pub struct BetfairGateway {
    config: BetfairGatewayConfig,
    client: reqwest::Client,
}

impl BetfairGateway {
    #[must_use]
    pub fn new(config: BetfairGatewayConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl super::OrderGateway for BetfairGateway {
    fn venue(&self) -> Venue {
        Venue::Betfair
    }

    async fn place_order(
        &self,
        leg: &crate::core::domain::ExecutionLeg,
    ) -> Result<crate::core::domain::ExecutionResult> {
        use crate::core::domain::{ExecutionResult, LegStatus, OrderId};

        let instruction = PlaceInstruction {
            market_id: leg.market_id.as_str().to_string(),
            selection_id: leg.token_id.as_str().to_string(),
            side: if leg.side.is_cost() { "BACK" } else { "LAY" }.into(),
            price: leg.limit_price,
            size: leg.size,
        };

        let response = self
            .client
            .post(format!("{}/placeOrders", self.config.api_url))
            .header("X-Application", &self.config.app_key)
            .header("X-Authentication", &self.config.session_token)
            .json(&instruction)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth {
                venue: Venue::Betfair,
                reason: "order rejected: invalid session".into(),
            });
        }

        let report: PlaceReport = response.error_for_status()?.json().await?;
        let matched = report.size_matched.unwrap_or(Decimal::ZERO);
        let status = if report.status != "SUCCESS" {
            LegStatus::Failed
        } else if matched >= leg.size {
            LegStatus::Filled
        } else if matched > Decimal::ZERO {
            LegStatus::Partial
        } else {
            LegStatus::Failed
        };

        Ok(ExecutionResult {
            order_id: report.bet_id.map(OrderId::from),
            status,
            filled_size: matched.min(leg.size),
            remaining_size: (leg.size - matched).max(Decimal::ZERO),
            executed_price: report.average_price_matched.or(Some(leg.limit_price)),
            error: None,
        })
    }

    async fn cancel(&self, order_id: &crate::core::domain::OrderId) -> Result<()> {
        self.client
            .post(format!("{}/cancelOrders", self.config.api_url))
            .header("X-Application", &self.config.app_key)
            .header("X-Authentication", &self.config.session_token)
            .json(&json!({"betId": order_id.as_str()}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stream() -> BetfairStream {
        BetfairStream::new(BetfairConfig {
            host: "stream.example.invalid".into(),
            port: 443,
            app_key: "key".into(),
            session_token: "session".into(),
            commission: dec!(0.02),
        })
    }

    #[test]
    fn mcm_decodes_into_netted_probabilities() {
        let mut s = stream();
        let raw = r#"{"op":"mcm","mc":[{"id":"1.234","rc":[{"atb":[[2.0,120.0]],"atl":[[2.5,80.0]]}]}]}"#;
        let events = s.decode_mcm(raw);
        assert_eq!(events.len(), 1);

        let MarketEvent::Update { update, .. } = &events[0] else {
            panic!("expected update");
        };
        assert_eq!(update.venue(), Venue::Betfair);
        assert_eq!(update.market_id().as_str(), "1.234");
        // Lay odds 2.5 (sell side): q = 0.4, netted = 1 - 0.6 * 0.98 = 0.412
        assert_eq!(update.best_bid(), dec!(0.412));
        // Back odds 2.0 (buy side): q = 0.5, netted = 1 - 0.5 * 0.98 = 0.51
        assert_eq!(update.best_ask(), dec!(0.51));
        assert_eq!(update.bid_size(), dec!(80));
        assert_eq!(update.ask_size(), dec!(120));
        assert!(update.best_bid() < update.best_ask());
    }

    #[test]
    fn sequences_increase_per_market() {
        let mut s = stream();
        let raw = r#"{"op":"mcm","mc":[{"id":"1.234","rc":[{"atb":[[2.0,10.0]],"atl":[[2.5,10.0]]}]}]}"#;
        let first = s.decode_mcm(raw);
        let second = s.decode_mcm(raw);

        let seq = |events: &[MarketEvent]| match &events[0] {
            MarketEvent::Update { update, .. } => update.sequence(),
            _ => panic!("expected update"),
        };
        assert_eq!(seq(&first), 1);
        assert_eq!(seq(&second), 2);
    }

    #[test]
    fn empty_ladders_produce_no_update() {
        let mut s = stream();
        let raw = r#"{"op":"mcm","mc":[{"id":"1.234","rc":[{"atb":[],"atl":[[2.5,10.0]]}]}]}"#;
        assert!(s.decode_mcm(raw).is_empty());
    }

    #[test]
    fn garbage_lines_count_as_decode_errors() {
        let mut s = stream();
        assert!(s.decode_mcm("{not json").is_empty());
        assert_eq!(s.decode_errors(), 1);
    }

    #[test]
    fn degenerate_odds_are_rejected() {
        assert!(best_ladder_prob(&[[1.0, 10.0]], dec!(0.02)).is_none());
        assert!(best_ladder_prob(&[[2.0, -5.0]], dec!(0.02)).is_none());
        assert!(best_ladder_prob(&[], dec!(0.02)).is_none());
    }
}
