//! # tabletkv
//!
//! The cluster coordinator of a distributed in-memory key-value store.
//! The coordinator admits storage servers into the cluster, owns the
//! authoritative mapping from tables to tablets to serving masters, detects
//! server departures, and drives recovery of a failed master from the
//! replicas held on backups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Coordinator                  │
//! │  ServerList ── TabletMap ── Wills ── Tables  │
//! │       │                                      │
//! │  UpdateDispatcher (membership broadcasts)    │
//! └───────┬───────────────┬──────────────────────┘
//!         │ framed RPC    │ framed RPC
//!   ┌─────▼─────┐   ┌─────▼─────┐   ┌───────────┐
//!   │ Master 1  │   │ Master 2  │   │ Backup 1  │
//!   │ (tablets) │   │ (tablets) │   │ (replicas)│
//!   └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! Masters serve tablets (contiguous key ranges of tables); backups hold
//! the replicas that make a master recoverable. When a master is reported
//! down, the coordinator marks its tablets recovering, hands the master's
//! pre-computed recovery plan (its "will") to the recovery engine, and
//! reassigns tablets to the surviving masters as they report partitions
//! recovered.
//!
//! ## Usage
//!
//! ```bash
//! tabletkv-coord serve --bind 0.0.0.0:7070
//! ```

pub mod common;
pub mod coordinator;
pub mod proto;
pub mod rpc;
pub mod transport;

pub use common::{CoordinatorConfig, Error, Result, ServerId, ServerStatus, ServiceMask};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
