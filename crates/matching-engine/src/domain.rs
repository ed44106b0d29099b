//! Domain types for the Matching Engine
//!
//! Bets, matches and refunds as they are persisted by the bet store. Every
//! derived quantity (remaining amount, payout, drift, fill status) is a pure
//! function over these persisted fields.

use chrono::{DateTime, Utc};
use common::{BetId, CoinKind, EventId, MatchId, UserId};
use serde::{Deserialize, Serialize};

/// Payout multiplier for symmetric -110 odds, in thousandths
pub const PAYOUT_PER_MILLE: u32 = 909;

// ============================================================================
// Bet Side
// ============================================================================

/// Side of an event a bet is placed on
///
/// Every event has exactly two sides. `reference` marks which of the two
/// this is; the label is carried for display only and never compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BetSide {
    /// True for the event's reference side
    pub reference: bool,
    /// Team or outcome label
    pub label: String,
}

impl BetSide {
    pub fn new(reference: bool, label: impl Into<String>) -> Self {
        Self {
            reference,
            label: label.into(),
        }
    }

    /// Returns true if `other` is the opposing side of the same event
    pub fn opposes(&self, other: &BetSide) -> bool {
        self.reference != other.reference
    }
}

// ============================================================================
// Bet Status
// ============================================================================

/// Lifecycle state of a bet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    /// No matches yet
    Pending,
    /// Some, but not all, of the amount is matched
    PartiallyMatched,
    /// The whole amount is matched
    #[serde(alias = "active")]
    FullyMatched,
    /// Withdrawn before reaching a full match
    Cancelled,
    /// Settled in the bettor's favor
    Won,
    /// Settled against the bettor
    Lost,
}

impl BetStatus {
    pub const OPEN: [BetStatus; 2] = [BetStatus::Pending, BetStatus::PartiallyMatched];

    /// Bets in an open status may still be matched or cancelled
    pub fn is_open(&self) -> bool {
        matches!(self, BetStatus::Pending | BetStatus::PartiallyMatched)
    }

    /// Status implied by a matched total
    ///
    /// Only meaningful for bets that have not been cancelled or settled.
    pub fn for_fill(matched_amount: u32, amount: u32) -> BetStatus {
        if matched_amount == 0 {
            BetStatus::Pending
        } else if matched_amount >= amount {
            BetStatus::FullyMatched
        } else {
            BetStatus::PartiallyMatched
        }
    }

    pub fn can_transition_to(&self, next: BetStatus) -> bool {
        use BetStatus::*;
        matches!(
            (self, next),
            (Pending, PartiallyMatched)
                | (Pending, FullyMatched)
                | (Pending, Cancelled)
                | (PartiallyMatched, FullyMatched)
                | (PartiallyMatched, Cancelled)
                | (FullyMatched, Won)
                | (FullyMatched, Lost)
        )
    }

    /// Statuses from which `self` may be entered
    pub fn predecessors(&self) -> &'static [BetStatus] {
        use BetStatus::*;
        match self {
            Pending => &[],
            PartiallyMatched => &[Pending],
            FullyMatched => &[Pending, PartiallyMatched],
            Cancelled => &[Pending, PartiallyMatched],
            Won | Lost => &[FullyMatched],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::PartiallyMatched => "partially_matched",
            BetStatus::FullyMatched => "fully_matched",
            BetStatus::Cancelled => "cancelled",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BetStatus::Pending),
            "partially_matched" => Some(BetStatus::PartiallyMatched),
            "fully_matched" | "active" => Some(BetStatus::FullyMatched),
            "cancelled" => Some(BetStatus::Cancelled),
            "won" => Some(BetStatus::Won),
            "lost" => Some(BetStatus::Lost),
            _ => None,
        }
    }
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Bet
// ============================================================================

/// A wager submitted for placement, before it is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBet {
    pub user_id: UserId,
    pub event_id: EventId,
    pub side: BetSide,
    pub amount: u32,
    pub coin_kind: CoinKind,
    /// Spread quoted to the user when the bet was made
    pub spread: f64,
}

impl NewBet {
    /// Build the pending bet that gets persisted
    pub fn into_bet(self, now: DateTime<Utc>) -> Bet {
        Bet {
            bet_id: BetId::new(),
            user_id: self.user_id,
            event_id: self.event_id,
            side: self.side,
            amount: self.amount,
            coin_kind: self.coin_kind,
            initial_spread: self.spread,
            current_spread: self.spread,
            matched_amount: 0,
            status: BetStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted wager with its fill state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub bet_id: BetId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub side: BetSide,
    /// Wagered coins
    pub amount: u32,
    pub coin_kind: CoinKind,
    /// Spread captured at creation
    pub initial_spread: f64,
    /// Live spread, updated as odds move
    pub current_spread: f64,
    /// Sum of all match amounts referencing this bet
    pub matched_amount: u32,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bet {
    /// Coins still available for matching (or refund on cancellation)
    pub fn remaining_amount(&self) -> u32 {
        self.amount.saturating_sub(self.matched_amount)
    }

    /// Payout at the standard -110 odds, truncated to whole coins
    pub fn potential_payout(&self) -> u32 {
        self.potential_payout_at(PAYOUT_PER_MILLE)
    }

    pub fn potential_payout_at(&self, per_mille: u32) -> u32 {
        ((u64::from(self.amount) * u64::from(per_mille)) / 1_000) as u32
    }

    pub fn spread_drift(&self) -> f64 {
        (self.current_spread - self.initial_spread).abs()
    }

    /// True once the live spread has moved strictly more than `threshold`
    /// points away from the spread the bet was made at
    pub fn should_cancel_due_to_spread_change(&self, threshold: f64) -> bool {
        self.spread_drift() > threshold
    }

    /// Bet-level eligibility: only untouched bets qualify.
    ///
    /// The cancellation coordinator is more lenient and also accepts
    /// partially matched bets, refunding just the remainder.
    pub fn is_cancellation_eligible(&self) -> bool {
        self.status == BetStatus::Pending
    }

    /// Status this bet should carry given its matched total
    pub fn fill_status(&self) -> BetStatus {
        if self.status.is_open() {
            BetStatus::for_fill(self.matched_amount, self.amount)
        } else {
            self.status
        }
    }

    /// Apply a persisted fill to this in-memory copy
    pub(crate) fn apply_fill(&mut self, amount: u32, at: DateTime<Utc>) {
        self.matched_amount += amount;
        self.updated_at = at;
    }
}

// ============================================================================
// Match
// ============================================================================

/// Immutable pairing of two opposing bets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    /// The bet being matched (taker)
    pub bet_a: BetId,
    /// The resting opposing bet (maker)
    pub bet_b: BetId,
    pub event_id: EventId,
    pub amount: u32,
    pub coin_kind: CoinKind,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn new(taker: &Bet, maker: &Bet, amount: u32, now: DateTime<Utc>) -> Self {
        Self {
            match_id: MatchId::new(),
            bet_a: taker.bet_id,
            bet_b: maker.bet_id,
            event_id: taker.event_id.clone(),
            amount,
            coin_kind: taker.coin_kind,
            created_at: now,
        }
    }

    /// The other bet in this match
    pub fn counterparty(&self, bet_id: BetId) -> Option<BetId> {
        if self.bet_a == bet_id {
            Some(self.bet_b)
        } else if self.bet_b == bet_id {
            Some(self.bet_a)
        } else {
            None
        }
    }
}

// ============================================================================
// Refund
// ============================================================================

/// Record of an unmatched remainder credited back to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub bet_id: BetId,
    pub user_id: UserId,
    pub amount: u32,
    pub coin_kind: CoinKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
