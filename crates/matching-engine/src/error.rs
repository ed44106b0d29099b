//! Matching engine error types

use common::{BetId, EventId};
use thiserror::Error;

use crate::domain::BetStatus;
use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::validation::ValidationError;

/// Errors that can occur while matching a bet
#[derive(Error, Debug, Clone)]
pub enum MatchError {
    /// The store could not be reached or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The bet was not pending or partially matched on entry
    #[error("Bet {bet_id} is {status} and cannot be matched")]
    AlreadyTerminal { bet_id: BetId, status: BetStatus },

    /// Matching is suspended for the event
    #[error("Event {0} is locked")]
    EventLocked(EventId),

    #[error("Bet not found: {0}")]
    BetNotFound(BetId),

    /// Compare-and-swap kept colliding after the configured retries
    #[error("Conflict matching {bet_id} against {candidate_id} after {attempts} attempts")]
    Conflict {
        bet_id: BetId,
        candidate_id: BetId,
        attempts: u32,
    },

    /// The atomic match group failed for a reason other than a conflict
    #[error("Failed to persist match for {bet_id}: {reason}")]
    MatchPersistFailed { bet_id: BetId, reason: String },
}

impl MatchError {
    /// Store outage, exhausted conflicts and persist failures may be retried
    /// by the caller with backoff; misuse and locked events may not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MatchError::StoreUnavailable(_)
                | MatchError::Conflict { .. }
                | MatchError::MatchPersistFailed { .. }
        )
    }

    /// Map a store failure outside the atomic match group
    pub(crate) fn from_store(bet_id: BetId, err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => MatchError::StoreUnavailable(msg),
            StoreError::NotFound(id) => MatchError::BetNotFound(id),
            other => MatchError::MatchPersistFailed {
                bet_id,
                reason: other.to_string(),
            },
        }
    }
}

/// Errors that can occur while cancelling a bet
#[derive(Error, Debug, Clone)]
pub enum CancelError {
    #[error("Bet {bet_id} is {status} and cannot be cancelled")]
    NotCancellable { bet_id: BetId, status: BetStatus },

    #[error("Bet not found: {0}")]
    BetNotFound(BetId),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Conflict cancelling {bet_id} after {attempts} attempts")]
    Conflict { bet_id: BetId, attempts: u32 },

    /// The bet is cancelled but its refund was not delivered
    #[error("Refund for cancelled bet {bet_id} failed: {source}")]
    Ledger {
        bet_id: BetId,
        #[source]
        source: LedgerError,
    },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl CancelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CancelError::StoreUnavailable(_) | CancelError::Conflict { .. }
        )
    }

    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => CancelError::StoreUnavailable(msg),
            StoreError::NotFound(id) => CancelError::BetNotFound(id),
            StoreError::InvalidTransition { bet_id, from, .. } => CancelError::NotCancellable {
                bet_id,
                status: from,
            },
            other => CancelError::Store(other),
        }
    }
}

/// Errors that can occur while placing a new bet
#[derive(Error, Debug, Clone)]
pub enum PlacementError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Event {0} is locked")]
    EventLocked(EventId),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    /// The bet was stored as pending but the immediate match failed
    #[error("Bet {bet_id} placed but matching failed: {source}")]
    Match {
        bet_id: BetId,
        #[source]
        source: MatchError,
    },
}

impl PlacementError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PlacementError::StoreUnavailable(_) => true,
            PlacementError::Validation(e) => e.is_retryable(),
            PlacementError::Match { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<StoreError> for PlacementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => PlacementError::StoreUnavailable(msg),
            other => PlacementError::Store(other),
        }
    }
}
