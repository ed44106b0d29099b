//! Bet placement: validate, persist as pending, then match
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Bet, NewBet};
use crate::engine::MatchingEngine;
use crate::error::PlacementError;
use crate::guard::UserGuards;
use crate::store::{bounded, BetStore};
use crate::validation::BetValidator;

pub struct BetPlacement {
    validator: BetValidator,
    engine: Arc<MatchingEngine>,
    store: Arc<dyn BetStore>,
    // Serializes a user's cap check with the insert that consumes it.
    users: UserGuards,
}

impl BetPlacement {
    pub fn new(validator: BetValidator, engine: Arc<MatchingEngine>) -> Self {
        Self {
            validator,
            store: engine.store(),
            engine,
            users: UserGuards::new(),
        }
    }

    pub fn validator(&self) -> &BetValidator {
        &self.validator
    }

    /// Validate and store `new_bet` as pending, without matching it
    pub async fn submit(&self, new_bet: NewBet) -> Result<Bet, PlacementError> {
        let timeout = self.engine.settings().store_timeout;
        let _user = self.users.acquire(&new_bet.user_id).await;

        let now = Utc::now();
        self.validator.validate(&new_bet, now).await?;

        let locked = bounded(timeout, "is_event_locked", self.store.is_event_locked(&new_bet.event_id)).await?;
        if locked {
            return Err(PlacementError::EventLocked(new_bet.event_id));
        }

        let bet = new_bet.into_bet(now);
        bounded(timeout, "insert_bet", self.store.insert_bet(&bet)).await?;
        info!(
            bet_id = %bet.bet_id,
            event_id = %bet.event_id,
            user_id = %bet.user_id,
            amount = bet.amount,
            coin_kind = %bet.coin_kind,
            "Bet placed"
        );
        Ok(bet)
    }

    /// Validate, store and immediately try to fill `new_bet`
    ///
    /// If matching fails the bet stays stored as pending and the error
    /// carries its id so the caller can retry the match.
    pub async fn place(&self, new_bet: NewBet) -> Result<Bet, PlacementError> {
        let bet = self.submit(new_bet).await?;
        self.engine.attempt_match(&bet).await.map_err(|source| {
            warn!(bet_id = %bet.bet_id, error = %source, "Placed bet could not be matched");
            PlacementError::Match {
                bet_id: bet.bet_id,
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BetSide, BetStatus};
    use crate::engine::tests::Harness;
    use crate::validation::ValidationError;
    use assert_matches::assert_matches;
    use common::{CoinKind, EventId, UserId};
    use std::time::Duration;

    fn placement(h: &Harness) -> (Arc<MatchingEngine>, BetPlacement) {
        let engine = Arc::new(MatchingEngine::new(
            h.store.clone(),
            h.journal.clone(),
            Default::default(),
        ));
        let validator = BetValidator::new(
            h.store.clone(),
            config::BetLimitsConfig::default(),
            Duration::from_secs(2),
        );
        (engine.clone(), BetPlacement::new(validator, engine))
    }

    fn wager(user: &str, reference: bool, amount: u32) -> NewBet {
        NewBet {
            user_id: UserId::new(user),
            event_id: EventId::new("game-1"),
            side: BetSide::new(reference, if reference { "Home" } else { "Away" }),
            amount,
            coin_kind: CoinKind::Stakes,
            spread: -3.5,
        }
    }

    #[tokio::test]
    async fn test_place_matches_against_resting_bet() {
        let h = Harness::new();
        let (_, placement) = placement(&h);

        let resting = placement.place(wager("bob", false, 40)).await.unwrap();
        assert_eq!(resting.status, BetStatus::Pending);

        let bet = placement.place(wager("alice", true, 100)).await.unwrap();
        assert_eq!(bet.status, BetStatus::PartiallyMatched);
        assert_eq!(bet.remaining_amount(), 60);
    }

    #[tokio::test]
    async fn test_cap_violation_is_rejected_before_storing() {
        let h = Harness::new();
        let (_, placement) = placement(&h);

        placement.place(wager("alice", true, 50)).await.unwrap();
        let err = placement.place(wager("alice", true, 60)).await.unwrap_err();
        assert_matches!(
            err,
            PlacementError::Validation(ValidationError::DailyStakesCapExceeded { used: 50, .. })
        );
        assert_eq!(h.store.bet_count(), 1);
    }

    #[tokio::test]
    async fn test_locked_event_rejects_placement() {
        let h = Harness::new();
        let (engine, placement) = placement(&h);
        engine.lock_event(&EventId::new("game-1")).await.unwrap();

        assert_matches!(
            placement.submit(wager("alice", true, 10)).await,
            Err(PlacementError::EventLocked(_))
        );
        assert_eq!(h.store.bet_count(), 0);
    }
}
