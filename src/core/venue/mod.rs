//! Venue integration ports and shared connection machinery.
//!
//! Each venue client owns its transport and decode loop, normalizes wire
//! frames into [`MarketUpdate`]s, and exposes order entry behind
//! [`OrderGateway`]. Reconnection with jittered backoff and the per-venue
//! circuit breaker are shared across variants.

mod backoff;
mod betfair;
mod breaker;
mod polymarket;
mod sx;

pub use backoff::{Backoff, BackoffConfig};
pub use betfair::{BetfairConfig, BetfairGateway, BetfairGatewayConfig, BetfairStream};
pub use breaker::{BreakerConfig, BreakerSet, BreakerState, CircuitBreaker};
pub use polymarket::{PolymarketConfig, PolymarketGateway, PolymarketStream};
pub use sx::{SxConfig, SxGateway, SxStream};

use async_trait::async_trait;

use crate::core::domain::{
    ExecutionLeg, ExecutionResult, MarketUpdate, OrderBook, OrderId, TokenId, Venue,
};
use crate::error::Result;

/// Connection lifecycle and data events produced by a market stream.
#[derive(Debug)]
pub enum MarketEvent {
    /// Transport established.
    Connected,
    /// Credentials accepted (streaming exchanges only).
    Authenticated,
    /// A normalized update together with the refreshed book snapshot.
    Update {
        update: MarketUpdate,
        book: OrderBook,
    },
    /// Transport lost; the caller decides whether to reconnect.
    Disconnected { reason: String },
}

/// A durable streaming session to one venue's market data.
#[async_trait]
pub trait MarketDataStream: Send {
    /// The venue this stream serves.
    fn venue(&self) -> Venue;

    /// Establish the transport (and authenticate where required).
    async fn connect(&mut self) -> Result<()>;

    /// Subscribe to the given token set. Must be callable again after a
    /// reconnect to replay the subscription atomically.
    async fn subscribe(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Next event from the stream. `None` means the stream is exhausted
    /// and will never produce again.
    async fn next_event(&mut self) -> Option<MarketEvent>;

    /// Total frames dropped by this session's decoder.
    fn decode_errors(&self) -> u64 {
        0
    }
}

/// Order entry for one venue.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// The venue this gateway serves.
    fn venue(&self) -> Venue;

    /// Place one leg. Implementations do not retry; the router and
    /// recovery handler own retry policy.
    async fn place_order(&self, leg: &ExecutionLeg) -> Result<ExecutionResult>;

    /// Cancel an open order, used to reconcile post-timeout fills.
    async fn cancel(&self, order_id: &OrderId) -> Result<()>;
}

/// External signing capability for on-chain legs.
///
/// The engine never sees the private key: transaction bytes go out,
/// signed bytes come back.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, tx_bytes: &[u8]) -> Result<Vec<u8>>;
}
