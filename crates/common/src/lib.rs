//! Common types and utilities for Wagerline
//!
//! This crate provides shared identifiers and small domain types used
//! across all Wagerline crates.
//!
//! # Modules
//!
//! - [`error`] - Errors for malformed external input
//! - [`types`] - Shared identifiers (BetId, EventId, ...) and coin kinds

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
