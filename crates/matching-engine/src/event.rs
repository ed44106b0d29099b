//! Event types for the matching engine
//!
//! Every state change the engine or the coordinator commits is published
//! as one of these events to the notification sink.

use common::{BetId, CoinKind, EventId, UserId};
use serde::{Deserialize, Serialize};

use crate::domain::{BetStatus, Match, Refund};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A match was persisted
    BetMatched {
        #[serde(rename = "match")]
        record: Match,
    },

    BetStatusChanged {
        bet_id: BetId,
        event_id: EventId,
        from: BetStatus,
        to: BetStatus,
    },

    BetCancelled {
        bet_id: BetId,
        event_id: EventId,
        user_id: UserId,
        /// Unmatched coins released by the cancellation
        remaining: u32,
    },

    RefundIssued {
        refund: Refund,
    },

    /// The ledger did not accept a refund; the bet stays cancelled
    RefundFailed {
        bet_id: BetId,
        user_id: UserId,
        amount: u32,
        coin_kind: CoinKind,
        reason: String,
    },

    EventLocked {
        event_id: EventId,
    },

    EventUnlocked {
        event_id: EventId,
    },
}

impl EngineEvent {
    /// Event (game) this notification concerns, when known
    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            EngineEvent::BetMatched { record } => Some(&record.event_id),
            EngineEvent::BetStatusChanged { event_id, .. }
            | EngineEvent::BetCancelled { event_id, .. }
            | EngineEvent::EventLocked { event_id }
            | EngineEvent::EventUnlocked { event_id } => Some(event_id),
            EngineEvent::RefundIssued { .. } | EngineEvent::RefundFailed { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::BetMatched { .. } => "bet_matched",
            EngineEvent::BetStatusChanged { .. } => "bet_status_changed",
            EngineEvent::BetCancelled { .. } => "bet_cancelled",
            EngineEvent::RefundIssued { .. } => "refund_issued",
            EngineEvent::RefundFailed { .. } => "refund_failed",
            EngineEvent::EventLocked { .. } => "event_locked",
            EngineEvent::EventUnlocked { .. } => "event_unlocked",
        }
    }
}
