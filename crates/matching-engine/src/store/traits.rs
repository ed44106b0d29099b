//! Store traits for the Matching Engine
//!
//! This module defines the trait that all bet store implementations must satisfy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BetId, CoinKind, EventId, UserId};

use crate::domain::{Bet, BetStatus, Match, Refund};

/// Errors that can occur in the store
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or the call exceeded its deadline
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A compare-and-swap precondition no longer held
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bet not found: {0}")]
    NotFound(BetId),

    #[error("Bet already exists: {0}")]
    AlreadyExists(BetId),

    #[error("Invalid status transition for {bet_id}: {from} -> {to}")]
    InvalidTransition {
        bet_id: BetId,
        from: BetStatus,
        to: BetStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Transient failures that are safe to retry after re-reading state
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for [`BetStore::query_bets`]
///
/// Unset fields do not constrain the result; an empty `statuses` list
/// accepts any status.
#[derive(Debug, Clone, Default)]
pub struct BetQuery {
    pub event_id: Option<EventId>,
    pub reference_side: Option<bool>,
    pub statuses: Vec<BetStatus>,
    pub coin_kind: Option<CoinKind>,
    pub user_id: Option<UserId>,
    pub created_after: Option<DateTime<Utc>>,
}

impl BetQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, event_id: &EventId) -> Self {
        self.event_id = Some(event_id.clone());
        self
    }

    pub fn side(mut self, reference: bool) -> Self {
        self.reference_side = Some(reference);
        self
    }

    pub fn statuses(mut self, statuses: &[BetStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    /// Pending or partially matched bets only
    pub fn open(self) -> Self {
        self.statuses(&BetStatus::OPEN)
    }

    pub fn coin_kind(mut self, kind: CoinKind) -> Self {
        self.coin_kind = Some(kind);
        self
    }

    pub fn user(mut self, user_id: &UserId) -> Self {
        self.user_id = Some(user_id.clone());
        self
    }

    /// Bets created at or after `at`
    pub fn created_since(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn matches(&self, bet: &Bet) -> bool {
        self.event_id.as_ref().map_or(true, |e| *e == bet.event_id)
            && self.reference_side.map_or(true, |r| r == bet.side.reference)
            && (self.statuses.is_empty() || self.statuses.contains(&bet.status))
            && self.coin_kind.map_or(true, |k| k == bet.coin_kind)
            && self.user_id.as_ref().map_or(true, |u| *u == bet.user_id)
            && self.created_after.map_or(true, |t| bet.created_at >= t)
    }
}

/// Persistent store of bets, matches and refunds
///
/// Implementations are the single source of truth for fill state; the
/// engine keeps nothing in memory between calls. Every mutation that the
/// engine relies on for correctness is a compare-and-swap.
#[async_trait]
pub trait BetStore: Send + Sync {
    // ------------------------------------------------------------------------
    // Bets
    // ------------------------------------------------------------------------

    async fn insert_bet(&self, bet: &Bet) -> StoreResult<()>;

    async fn get_bet(&self, bet_id: BetId) -> StoreResult<Bet>;

    async fn query_bets(&self, query: &BetQuery) -> StoreResult<Vec<Bet>>;

    /// Apply `new_match` to both bets as one atomic group
    ///
    /// Succeeds only if both bets still carry the matched totals of the
    /// given snapshots and are still open; otherwise returns
    /// [`StoreError::Conflict`] and changes nothing. On success both
    /// matched totals grow by `new_match.amount` and the match is recorded.
    async fn atomic_apply_match(&self, bet_a: &Bet, bet_b: &Bet, new_match: &Match) -> StoreResult<()>;

    /// Persist a status transition, rejecting transitions the lifecycle forbids
    async fn update_status(&self, bet_id: BetId, new_status: BetStatus) -> StoreResult<Bet>;

    /// Mark an open bet cancelled if its matched total is still `expected_matched`
    async fn cancel_bet(&self, bet_id: BetId, expected_matched: u32) -> StoreResult<Bet>;

    async fn update_current_spread(&self, bet_id: BetId, spread: f64) -> StoreResult<Bet>;

    // ------------------------------------------------------------------------
    // Matches and refunds
    // ------------------------------------------------------------------------

    async fn matches_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Match>>;

    async fn record_refund(&self, refund: &Refund) -> StoreResult<()>;

    async fn refunds_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Refund>>;

    // ------------------------------------------------------------------------
    // Event lock signal
    // ------------------------------------------------------------------------

    async fn lock_event(&self, event_id: &EventId) -> StoreResult<()>;

    async fn unlock_event(&self, event_id: &EventId) -> StoreResult<()>;

    async fn is_event_locked(&self, event_id: &EventId) -> StoreResult<bool>;
}
