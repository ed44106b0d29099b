//! Peer-to-peer bet matching for Wagerline
//!
//! Bets on opposing sides of an event are paired FIFO in whole coins,
//! cancelled bets refund their unmatched remainder through the user
//! ledger, and a read-only monitor reports queue depth, volume, alerts and
//! system health.
//!
//! # Modules
//!
//! - [`engine`] - FIFO matching with per-event guards and compare-and-swap fills
//! - [`cancellation`] - cancellation and refund coordination
//! - [`placement`] / [`validation`] - placement boundary (limits, daily stakes cap)
//! - [`monitor`] - queue, volume and health snapshots
//! - [`store`] - bet store trait with in-memory and Redis adapters
//! - [`ledger`] - user ledger trait with in-memory and HTTP adapters
//! - [`log`] - notification sink and in-memory event journal
//! - [`api`] - admin HTTP surface (feature `api`)

pub mod alert;
pub mod cancellation;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event;
pub mod guard;
pub mod ledger;
pub mod log;
pub mod metrics;
pub mod monitor;
pub mod placement;
pub mod store;
pub mod validation;

#[cfg(feature = "api")]
pub mod api;

pub use alert::{AlertKind, AlertSeverity, RecordedAlert, RiskAlert};
pub use cancellation::{BatchFailure, BatchReport, CancelReceipt, CancellationCoordinator};
pub use domain::{Bet, BetSide, BetStatus, Match, NewBet, Refund};
pub use engine::{EngineSettings, MatchingEngine};
pub use error::{CancelError, MatchError, PlacementError};
pub use event::EngineEvent;
pub use ledger::{create_ledger, InMemoryLedger, LedgerError, UserLedger};
pub use log::{EventJournal, NotificationSink};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use monitor::{matching_score, HealthStatus, MonitorSnapshot, QueueEntry, QueueMonitor};
pub use placement::BetPlacement;
pub use store::{create_store, BetQuery, BetStore, InMemoryBetStore, StoreError};
pub use validation::{BetValidator, ValidationError};
