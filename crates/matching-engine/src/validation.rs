//! Bet validation at placement
//!
//! Amount limits and the daily stakes cap are checked before a bet is
//! stored, so nothing that reaches the matching engine can violate them.

use chrono::{DateTime, TimeZone, Utc};
use common::{CoinKind, UserId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Bet, BetStatus, NewBet};
use crate::store::{bounded, BetQuery, BetStore, StoreError};

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Wager of {amount} is outside [{min}, {max}]")]
    AmountOutOfRange { amount: u32, min: u32, max: u32 },

    #[error("Daily stakes cap exceeded: {used} used today, {requested} requested, cap {cap}")]
    DailyStakesCapExceeded { used: u32, requested: u32, cap: u32 },

    #[error("Spread must be a finite number")]
    InvalidSpread,

    #[error("Side label must not be empty")]
    MissingSideLabel,

    #[error("Could not check stakes usage: {0}")]
    Store(StoreError),
}

impl ValidationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ValidationError::Store(e) if e.is_retryable())
    }
}

/// Stakes coins a bet holds against its owner's daily cap
///
/// A cancelled bet keeps only its matched part; the refunded remainder
/// is released.
pub fn committed_stakes(bet: &Bet) -> u32 {
    match bet.status {
        BetStatus::Cancelled => bet.matched_amount,
        _ => bet.amount,
    }
}

/// Start of the UTC day containing `now`
pub fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}

pub struct BetValidator {
    store: Arc<dyn BetStore>,
    limits: config::BetLimitsConfig,
    store_timeout: Duration,
}

impl BetValidator {
    pub fn new(
        store: Arc<dyn BetStore>,
        limits: config::BetLimitsConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            limits,
            store_timeout,
        }
    }

    pub fn limits(&self) -> &config::BetLimitsConfig {
        &self.limits
    }

    /// Stakes coins `user_id` has committed since the start of the UTC day
    pub async fn daily_stakes_used(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<u32, ValidationError> {
        let query = BetQuery::new()
            .user(user_id)
            .coin_kind(CoinKind::Stakes)
            .created_since(utc_day_start(now));
        let bets = bounded(self.store_timeout, "query_bets", self.store.query_bets(&query))
            .await
            .map_err(ValidationError::Store)?;
        Ok(bets.iter().map(committed_stakes).sum())
    }

    pub async fn validate(&self, bet: &NewBet, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if bet.amount < self.limits.min_wager || bet.amount > self.limits.max_wager {
            return Err(ValidationError::AmountOutOfRange {
                amount: bet.amount,
                min: self.limits.min_wager,
                max: self.limits.max_wager,
            });
        }
        if !bet.spread.is_finite() {
            return Err(ValidationError::InvalidSpread);
        }
        if bet.side.label.trim().is_empty() {
            return Err(ValidationError::MissingSideLabel);
        }

        if bet.coin_kind.is_capped() {
            let used = self.daily_stakes_used(&bet.user_id, now).await?;
            if used.saturating_add(bet.amount) > self.limits.daily_stakes_cap {
                return Err(ValidationError::DailyStakesCapExceeded {
                    used,
                    requested: bet.amount,
                    cap: self.limits.daily_stakes_cap,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BetSide;
    use crate::store::InMemoryBetStore;
    use assert_matches::assert_matches;
    use chrono::Duration as ChronoDuration;
    use common::EventId;

    fn new_bet(amount: u32, coin_kind: CoinKind) -> NewBet {
        NewBet {
            user_id: UserId::new("alice"),
            event_id: EventId::new("game-1"),
            side: BetSide::new(true, "Home"),
            amount,
            coin_kind,
            spread: -3.5,
        }
    }

    fn validator(store: Arc<InMemoryBetStore>) -> BetValidator {
        BetValidator::new(store, config::BetLimitsConfig::default(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_amount_limits() {
        let v = validator(Arc::new(InMemoryBetStore::new()));
        let now = Utc::now();

        assert_matches!(
            v.validate(&new_bet(0, CoinKind::Play), now).await,
            Err(ValidationError::AmountOutOfRange { amount: 0, .. })
        );
        assert_matches!(
            v.validate(&new_bet(101, CoinKind::Play), now).await,
            Err(ValidationError::AmountOutOfRange { amount: 101, .. })
        );
        assert!(v.validate(&new_bet(1, CoinKind::Play), now).await.is_ok());
        assert!(v.validate(&new_bet(100, CoinKind::Stakes), now).await.is_ok());
    }

    #[tokio::test]
    async fn test_stakes_cap_rejects_sixty_after_fifty() {
        let store = Arc::new(InMemoryBetStore::new());
        let now = Utc::now();
        store
            .insert_bet(&new_bet(50, CoinKind::Stakes).into_bet(now))
            .await
            .unwrap();

        let v = validator(store);
        assert_matches!(
            v.validate(&new_bet(60, CoinKind::Stakes), now).await,
            Err(ValidationError::DailyStakesCapExceeded { used: 50, requested: 60, cap: 100 })
        );
        assert!(v.validate(&new_bet(50, CoinKind::Stakes), now).await.is_ok());
        // Play coins are not capped.
        assert!(v.validate(&new_bet(60, CoinKind::Play), now).await.is_ok());
    }

    #[tokio::test]
    async fn test_yesterday_and_refunded_stakes_do_not_count() {
        let store = Arc::new(InMemoryBetStore::new());
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();

        store
            .insert_bet(&new_bet(90, CoinKind::Stakes).into_bet(now - ChronoDuration::hours(13)))
            .await
            .unwrap();

        let mut cancelled = new_bet(80, CoinKind::Stakes).into_bet(now - ChronoDuration::hours(1));
        cancelled.matched_amount = 30;
        cancelled.status = BetStatus::Cancelled;
        store.insert_bet(&cancelled).await.unwrap();

        let v = validator(store);
        assert_eq!(v.daily_stakes_used(&UserId::new("alice"), now).await.unwrap(), 30);
        assert!(v.validate(&new_bet(70, CoinKind::Stakes), now).await.is_ok());
    }

    #[tokio::test]
    async fn test_bad_spread_and_label() {
        let v = validator(Arc::new(InMemoryBetStore::new()));
        let mut bet = new_bet(10, CoinKind::Play);
        bet.spread = f64::NAN;
        assert_matches!(v.validate(&bet, Utc::now()).await, Err(ValidationError::InvalidSpread));

        let mut bet = new_bet(10, CoinKind::Play);
        bet.side.label = "  ".into();
        assert_matches!(v.validate(&bet, Utc::now()).await, Err(ValidationError::MissingSideLabel));
    }

    #[test]
    fn test_utc_day_start() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 23, 59, 59).unwrap();
        assert_eq!(utc_day_start(now), Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap());
    }
}
