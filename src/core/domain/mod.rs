//! Core domain types for polyarb.
//!
//! ## Market Types
//!
//! - [`Venue`] - Integrated trading venues with their fee schedules
//! - [`MarketPair`] - A YES/NO token pair on the CLOB venue
//! - [`MarketMapping`] / [`MappingTable`] - Cross-venue market links
//!
//! ## Price Types
//!
//! - [`MarketUpdate`] - Normalized, fee-adjusted top-of-book event
//! - [`OrderBook`] / [`PriceLevel`] - Immutable book snapshots
//!
//! ## Opportunity & Execution Types
//!
//! - [`Opportunity`] / [`Direction`] - Detected arbitrage with leg hints
//! - [`ExecutionLeg`] / [`ExecutionResult`] - Order routing units
//!
//! ## Constraint Types
//!
//! - [`ConstraintGraph`] - Logical constraints between correlated markets
//!
//! ## Identifier Types
//!
//! - [`MarketId`] - Unique market identifier
//! - [`TokenId`] - Unique token/outcome identifier
//! - [`OrderId`] - Venue-assigned order identifier

mod constraint;
mod execution;
mod id;
mod mapping;
mod market;
mod money;
mod odds;
mod opportunity;
mod order_book;
mod update;
mod venue;

pub use constraint::{ConstraintGraph, ConstraintKind, MarketConstraint};
pub use execution::{ExecutionLeg, ExecutionResult, LegSide, LegStatus};
pub use id::{MarketId, OrderId, TokenId};
pub use mapping::{ExchangeSide, MappingTable, MarketMapping, MarketType};
pub use market::MarketPair;
pub use money::{Price, Volume};
pub use odds::{
    implied_probability, net_exchange_probability, raw_exchange_probability, to_decimal_odds,
};
pub use opportunity::{Direction, LegHint, Opportunity};
pub use order_book::{OrderBook, PriceLevel};
pub use update::MarketUpdate;
pub use venue::{FeeKind, FeeSchedule, SettlementCurrency, Venue};
