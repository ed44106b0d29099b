//! Cancellation and refund coordinator
//!
//! Cancelling a bet releases its unmatched remainder back to the owner's
//! ledger balance. The matched part is never touched. Cancellation takes
//! the same per-event guard as matching and is a compare-and-swap on the
//! matched total, so a bet is never both filled and refunded for the same
//! coins.

use chrono::Utc;
use common::{BetId, EventId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::alert::{AlertKind, AlertSeverity, RiskAlert};
use crate::domain::{Bet, Refund};
use crate::engine::{EngineSettings, MatchingEngine};
use crate::error::CancelError;
use crate::event::EngineEvent;
use crate::guard::EventGuards;
use crate::ledger::UserLedger;
use crate::log::NotificationSink;
use crate::metrics::EngineMetrics;
use crate::store::{bounded, BetQuery, BetStore, StoreError, StoreResult};

/// Ledger reason attached to cancellation refunds
pub const REFUND_REASON: &str = "bet_cancelled";

/// Outcome of a successful cancellation
#[derive(Debug, Clone, Serialize)]
pub struct CancelReceipt {
    pub bet: Bet,
    /// Present when an unmatched remainder was credited back
    pub refund: Option<Refund>,
}

impl CancelReceipt {
    pub fn refunded(&self) -> u32 {
        self.refund.as_ref().map_or(0, |r| r.amount)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub bet_id: BetId,
    pub error: String,
    /// The bet ended up cancelled even though the step after failed
    pub cancelled: bool,
}

/// Per-bet results of cancelling every open bet of an event
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub event_id: EventId,
    pub cancelled: Vec<BetId>,
    pub refunded_total: u64,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            cancelled: Vec::new(),
            refunded_total: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct CancellationCoordinator {
    store: Arc<dyn BetStore>,
    ledger: Arc<dyn UserLedger>,
    sink: Arc<dyn NotificationSink>,
    guards: Arc<EventGuards>,
    metrics: Arc<EngineMetrics>,
    settings: EngineSettings,
    drift_threshold: f64,
}

impl CancellationCoordinator {
    /// Build a coordinator sharing the engine's store, guards and metrics
    pub fn new(
        engine: &MatchingEngine,
        ledger: Arc<dyn UserLedger>,
        sink: Arc<dyn NotificationSink>,
        config: &config::CancellationConfig,
    ) -> Self {
        let settings = EngineSettings {
            conflict_attempts: config.conflict_retry_attempts.max(1),
            ..engine.settings().clone()
        };
        Self {
            store: engine.store(),
            ledger,
            sink,
            guards: engine.guards(),
            metrics: engine.metrics(),
            settings,
            drift_threshold: config.spread_drift_threshold,
        }
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        bounded(self.settings.store_timeout, op, fut).await
    }

    /// Cancel an open bet and refund its unmatched remainder
    ///
    /// If the ledger credit fails the bet stays cancelled, the failure is
    /// raised as an unresolved-refund alert and `CancelError::Ledger` is
    /// returned.
    #[instrument(skip(self, bet), fields(bet_id = %bet.bet_id, event_id = %bet.event_id))]
    pub async fn cancel_bet(&self, bet: &Bet) -> Result<CancelReceipt, CancelError> {
        let _guard = self.guards.acquire(&bet.event_id).await;
        self.cancel_locked(bet.bet_id).await
    }

    /// Cancel every pending or partially matched bet of an event
    ///
    /// Only the initial lookup can fail the whole call; per-bet failures
    /// are collected in the report.
    #[instrument(skip(self))]
    pub async fn cancel_all_pending_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<BatchReport, CancelError> {
        let _guard = self.guards.acquire(event_id).await;

        let query = BetQuery::new().event(event_id).open();
        let open = self
            .call("query_bets", self.store.query_bets(&query))
            .await
            .map_err(CancelError::from_store)?;

        let mut report = BatchReport::new(event_id.clone());
        for bet in open {
            match self.cancel_locked(bet.bet_id).await {
                Ok(receipt) => {
                    report.refunded_total += u64::from(receipt.refunded());
                    report.cancelled.push(bet.bet_id);
                }
                // Filled or cancelled since the lookup; nothing left to do.
                Err(CancelError::NotCancellable { .. }) => {}
                Err(e) => {
                    warn!(bet_id = %bet.bet_id, error = %e, "Batch cancellation step failed");
                    report.failures.push(BatchFailure {
                        bet_id: bet.bet_id,
                        cancelled: matches!(e, CancelError::Ledger { .. }),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            event_id = %event_id,
            cancelled = report.cancelled.len(),
            failed = report.failures.len(),
            refunded = report.refunded_total,
            "Batch cancellation finished"
        );
        Ok(report)
    }

    async fn cancel_locked(&self, bet_id: BetId) -> Result<CancelReceipt, CancelError> {
        let cancelled = self.compare_and_cancel(bet_id).await?;
        self.metrics.record_cancellation();

        let remaining = cancelled.remaining_amount();
        info!(
            bet_id = %bet_id,
            event_id = %cancelled.event_id,
            user_id = %cancelled.user_id,
            matched = cancelled.matched_amount,
            remaining,
            "Bet cancelled"
        );
        self.sink
            .publish(EngineEvent::BetCancelled {
                bet_id,
                event_id: cancelled.event_id.clone(),
                user_id: cancelled.user_id.clone(),
                remaining,
            })
            .await;

        if remaining == 0 {
            return Ok(CancelReceipt {
                bet: cancelled,
                refund: None,
            });
        }

        let refund = self.refund(&cancelled, remaining).await?;
        Ok(CancelReceipt {
            bet: cancelled,
            refund: Some(refund),
        })
    }

    async fn compare_and_cancel(&self, bet_id: BetId) -> Result<Bet, CancelError> {
        let mut attempts = 0;
        loop {
            let current = self
                .call("get_bet", self.store.get_bet(bet_id))
                .await
                .map_err(CancelError::from_store)?;

            // A stale open status on a bet with nothing left counts as filled.
            let status = current.fill_status();
            if !status.is_open() {
                return Err(CancelError::NotCancellable { bet_id, status });
            }

            let result = self
                .call(
                    "cancel_bet",
                    self.store.cancel_bet(bet_id, current.matched_amount),
                )
                .await;
            match result {
                Ok(bet) => return Ok(bet),
                Err(StoreError::Conflict(reason)) => {
                    attempts += 1;
                    self.metrics.record_conflict();
                    if attempts >= self.settings.conflict_attempts {
                        warn!(bet_id = %bet_id, attempts, %reason, "Giving up cancellation after repeated conflicts");
                        return Err(CancelError::Conflict { bet_id, attempts });
                    }
                    debug!(bet_id = %bet_id, attempts, %reason, "Cancellation conflict, re-reading");
                    tokio::time::sleep(self.settings.backoff(attempts)).await;
                }
                Err(e) => return Err(CancelError::from_store(e)),
            }
        }
    }

    async fn refund(&self, bet: &Bet, amount: u32) -> Result<Refund, CancelError> {
        if let Err(source) = self
            .ledger
            .credit(&bet.user_id, amount, bet.coin_kind, REFUND_REASON)
            .await
        {
            error!(
                bet_id = %bet.bet_id,
                event_id = %bet.event_id,
                user_id = %bet.user_id,
                amount,
                error = %source,
                "Refund credit failed"
            );
            self.metrics.record_refund_failure();
            self.sink
                .publish(EngineEvent::RefundFailed {
                    bet_id: bet.bet_id,
                    user_id: bet.user_id.clone(),
                    amount,
                    coin_kind: bet.coin_kind,
                    reason: source.to_string(),
                })
                .await;
            self.sink
                .raise_alert(
                    RiskAlert::unresolved_refund(bet.bet_id, &bet.user_id, amount, &source.to_string())
                        .with_event(&bet.event_id),
                )
                .await;
            return Err(CancelError::Ledger {
                bet_id: bet.bet_id,
                source,
            });
        }

        let refund = Refund {
            bet_id: bet.bet_id,
            user_id: bet.user_id.clone(),
            amount,
            coin_kind: bet.coin_kind,
            reason: REFUND_REASON.to_string(),
            created_at: Utc::now(),
        };
        self.metrics.record_refund(amount);

        // The credit already went through; a missing record is escalated, not retried.
        if let Err(e) = self.call("record_refund", self.store.record_refund(&refund)).await {
            error!(bet_id = %bet.bet_id, error = %e, "Refund credited but not recorded");
            self.sink
                .raise_alert(
                    RiskAlert::new(
                        AlertKind::UnresolvedRefund,
                        AlertSeverity::Warning,
                        format!("refund of {} coins for bet {} credited but not recorded: {}", amount, bet.bet_id, e),
                    )
                    .with_user(&bet.user_id)
                    .with_event(&bet.event_id),
                )
                .await;
        }

        self.sink
            .publish(EngineEvent::RefundIssued {
                refund: refund.clone(),
            })
            .await;
        Ok(refund)
    }

    /// Open bets of an event whose live spread drifted past the threshold
    ///
    /// Nothing is cancelled here; callers decide what to offer the owner.
    pub async fn drifted_bets(&self, event_id: &EventId) -> Result<Vec<Bet>, CancelError> {
        let query = BetQuery::new().event(event_id).open();
        let bets = self
            .call("query_bets", self.store.query_bets(&query))
            .await
            .map_err(CancelError::from_store)?;
        Ok(bets
            .into_iter()
            .filter(|b| b.should_cancel_due_to_spread_change(self.drift_threshold))
            .collect())
    }

    /// Record a new live spread for a bet
    pub async fn update_spread(&self, bet_id: BetId, spread: f64) -> Result<Bet, CancelError> {
        let bet = self
            .call("update_current_spread", self.store.update_current_spread(bet_id, spread))
            .await
            .map_err(CancelError::from_store)?;
        if bet.should_cancel_due_to_spread_change(self.drift_threshold) {
            debug!(bet_id = %bet_id, drift = bet.spread_drift(), "Spread drift past threshold");
        }
        Ok(bet)
    }

    pub fn drift_threshold(&self) -> f64 {
        self.drift_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BetStatus;
    use crate::engine::tests::Harness;
    use crate::ledger::{InMemoryLedger, LedgerError, MockUserLedger};
    use assert_matches::assert_matches;
    use common::{CoinKind, UserId};

    fn coordinator(h: &Harness, ledger: Arc<dyn UserLedger>) -> CancellationCoordinator {
        CancellationCoordinator::new(
            &h.engine,
            ledger,
            h.journal.clone(),
            &config::CancellationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_pending_cancel_refunds_exactly_once() {
        let h = Harness::new();
        let bet = h.place("alice", true, 100, 0).await;

        let mut ledger = MockUserLedger::new();
        ledger
            .expect_credit()
            .withf(|user, amount, kind, reason| {
                user == &UserId::new("alice")
                    && *amount == 100
                    && *kind == CoinKind::Stakes
                    && reason == REFUND_REASON
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let coordinator = coordinator(&h, Arc::new(ledger));

        let receipt = coordinator.cancel_bet(&bet).await.unwrap();
        assert_eq!(receipt.bet.status, BetStatus::Cancelled);
        assert_eq!(receipt.refunded(), 100);
        assert_eq!(h.store.refunds_for_bet(bet.bet_id).await.unwrap().len(), 1);

        // Second cancel must not reach the ledger again.
        assert_matches!(
            coordinator.cancel_bet(&bet).await,
            Err(CancelError::NotCancellable { status: BetStatus::Cancelled, .. })
        );
    }

    #[tokio::test]
    async fn test_partially_matched_cancel_refunds_remainder() {
        let h = Harness::new();
        let resting = h.place("bob", false, 40, 0).await;
        let bet = h.place("alice", true, 100, 1).await;
        h.engine.attempt_match(&bet).await.unwrap();

        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = coordinator(&h, ledger.clone());

        let receipt = coordinator.cancel_bet(&bet).await.unwrap();
        assert_eq!(receipt.bet.matched_amount, 40);
        assert_eq!(receipt.refunded(), 60);
        assert_eq!(ledger.balance(&UserId::new("alice"), CoinKind::Stakes), 60);

        // The matched side is untouched.
        let resting = h.get(&resting).await;
        assert_eq!(resting.status, BetStatus::FullyMatched);
        assert_eq!(h.store.matches_for_bet(bet.bet_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fully_matched_bet_is_not_cancellable() {
        let h = Harness::new();
        let resting = h.place("bob", false, 50, 0).await;
        let bet = h.place("alice", true, 50, 1).await;
        h.engine.attempt_match(&bet).await.unwrap();

        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = coordinator(&h, ledger.clone());
        assert_matches!(
            coordinator.cancel_bet(&resting).await,
            Err(CancelError::NotCancellable { status: BetStatus::FullyMatched, .. })
        );
        assert!(ledger.credits().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_failure_keeps_bet_cancelled_and_alerts() {
        let h = Harness::new();
        let bet = h.place("alice", true, 30, 0).await;

        let mut ledger = MockUserLedger::new();
        ledger
            .expect_credit()
            .times(1)
            .returning(|_, _, _, _| Err(LedgerError::Unavailable("connection refused".into())));
        let coordinator = coordinator(&h, Arc::new(ledger));

        let err = coordinator.cancel_bet(&bet).await.unwrap_err();
        assert_matches!(err, CancelError::Ledger { .. });
        assert_eq!(h.get(&bet).await.status, BetStatus::Cancelled);
        assert!(h.store.refunds_for_bet(bet.bet_id).await.unwrap().is_empty());

        let alerts = h.journal.recent_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert.kind, AlertKind::UnresolvedRefund);
        assert_eq!(alerts[0].alert.bet_id, Some(bet.bet_id));
        assert_eq!(h.engine.metrics().refund_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_cancel_uses_stored_matched_total() {
        let h = Harness::new();
        let bet = h.place("alice", true, 30, 0).await;
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = coordinator(&h, ledger.clone());

        // The caller's copy is stale: someone matched 10 coins meanwhile.
        let other = h.place("bob", false, 10, 1).await;
        h.engine.attempt_match(&other).await.unwrap();

        let receipt = coordinator.cancel_bet(&bet).await.unwrap();
        assert_eq!(receipt.refunded(), 20);
        assert_eq!(ledger.balance(&UserId::new("alice"), CoinKind::Stakes), 20);
    }

    #[tokio::test]
    async fn test_batch_cancel_reports_per_bet() {
        let h = Harness::new();
        h.place("bob", false, 40, 0).await;
        let partial = h.place("alice", true, 100, 1).await;
        h.engine.attempt_match(&partial).await.unwrap();
        let pending = h.place("carol", true, 25, 2).await;

        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = coordinator(&h, ledger.clone());
        let report = coordinator
            .cancel_all_pending_for_event(&EventId::new("game-1"))
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.cancelled.len(), 2);
        assert!(report.cancelled.contains(&partial.bet_id));
        assert!(report.cancelled.contains(&pending.bet_id));
        assert_eq!(report.refunded_total, 60 + 25);
        assert_eq!(ledger.credits().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_collects_ledger_failures() {
        let h = Harness::new();
        h.place("alice", true, 10, 0).await;
        h.place("carol", true, 20, 1).await;

        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_failing(true);
        let coordinator = coordinator(&h, ledger);
        let report = coordinator
            .cancel_all_pending_for_event(&EventId::new("game-1"))
            .await
            .unwrap();

        assert!(report.cancelled.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.cancelled));
        assert_eq!(h.journal.recent_alerts().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_batch_lookup() {
        let h = Harness::new();
        h.store.set_unavailable(true);
        let coordinator = coordinator(&h, Arc::new(InMemoryLedger::new()));
        assert_matches!(
            coordinator
                .cancel_all_pending_for_event(&EventId::new("game-1"))
                .await,
            Err(CancelError::StoreUnavailable(_))
        );
    }

    /// Race a cancel of `resting` against a match that targets it and check
    /// that its coins end up either matched or refunded, never both
    async fn race_cancel_and_match(taker_amount: u32, shared_guards: bool) {
        let h = Arc::new(Harness::new());
        let resting = h.place("bob", false, 50, 0).await;
        let taker = h.place("alice", true, taker_amount, 1).await;

        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = if shared_guards {
            coordinator(&h, ledger.clone())
        } else {
            // Its own engine and guards, like a coordinator in another process.
            let other = MatchingEngine::new(
                h.store.clone(),
                h.journal.clone(),
                EngineSettings::default(),
            );
            CancellationCoordinator::new(
                &other,
                ledger.clone(),
                h.journal.clone(),
                &config::CancellationConfig::default(),
            )
        };
        let coordinator = Arc::new(coordinator);

        let cancel = {
            let coordinator = Arc::clone(&coordinator);
            let resting = resting.clone();
            tokio::spawn(async move { coordinator.cancel_bet(&resting).await })
        };
        let matching = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.engine.attempt_match(&taker).await })
        };
        let cancelled = match cancel.await.unwrap() {
            Ok(receipt) => Some(receipt),
            Err(CancelError::NotCancellable { status, .. }) => {
                assert_eq!(status, BetStatus::FullyMatched);
                None
            }
            Err(e) => panic!("unexpected cancel error: {e}"),
        };
        matching.await.unwrap().unwrap();

        let stored = h.get(&resting).await;
        let refunded: u32 = ledger.credits().iter().map(|c| c.amount).sum();
        assert!(ledger.credits().len() <= 1);
        assert_eq!(
            stored.matched_amount,
            h.store
                .matches_for_bet(resting.bet_id)
                .await
                .unwrap()
                .iter()
                .map(|m| m.amount)
                .sum::<u32>()
        );

        match cancelled {
            Some(receipt) => {
                assert_eq!(stored.status, BetStatus::Cancelled);
                assert_eq!(receipt.refunded(), refunded);
                assert_eq!(refunded + stored.matched_amount, stored.amount);
            }
            None => {
                assert_eq!(refunded, 0);
                assert_eq!(stored.matched_amount, stored.amount);
                assert_eq!(stored.status, BetStatus::FullyMatched);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_racing_match_never_refunds_matched_coins() {
        for round in 0..40u32 {
            let taker_amount = [30, 50, 80][round as usize % 3];
            race_cancel_and_match(taker_amount, round % 2 == 0).await;
        }
    }

    #[tokio::test]
    async fn test_drifted_bets_flagged_but_not_cancelled() {
        let h = Harness::new();
        let moved = h.place("alice", true, 10, 0).await;
        let edge = h.place("bob", true, 10, 1).await;
        let coordinator = coordinator(&h, Arc::new(InMemoryLedger::new()));

        // -3.5 -> -5.0 drifts 1.5 points; -3.5 -> -4.5 is exactly one.
        coordinator.update_spread(moved.bet_id, -5.0).await.unwrap();
        coordinator.update_spread(edge.bet_id, -4.5).await.unwrap();

        let drifted = coordinator.drifted_bets(&EventId::new("game-1")).await.unwrap();
        assert_eq!(drifted.len(), 1);
        assert_eq!(drifted[0].bet_id, moved.bet_id);
        assert_eq!(h.get(&moved).await.status, BetStatus::Pending);
    }
}
