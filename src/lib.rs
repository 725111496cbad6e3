//! polyarb - Multi-venue prediction market arbitrage engine.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/             # Reusable library components
//! │   ├── domain/       # Pure domain types
//! │   ├── book/         # Live order books + shared cache
//! │   ├── bus/          # Fan-in market update queue
//! │   ├── venue/        # Venue clients (streams, gateways, breakers)
//! │   ├── detect/       # Cross-venue and atomic detectors
//! │   ├── projector/    # Barrier Frank-Wolfe projection + vertex oracle
//! │   ├── exec/         # VWAP, Kelly, smart router, recovery
//! │   ├── risk/         # Kill-switch risk guardian
//! │   └── service/      # Metrics, audit log, paper ledger
//! └── app/              # Configuration and orchestration
//! ```

pub mod app;
pub mod cli;
pub mod core;
pub mod error;
