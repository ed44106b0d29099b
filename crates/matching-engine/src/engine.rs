//! Bet matching
//!
//! A new bet is filled FIFO against resting opposing bets of the same
//! event and coin kind. Attempts on one event are serialized in-process by
//! the event guard; every fill is additionally a compare-and-swap at the
//! store, so engines in different processes can never double-spend a
//! candidate.

use chrono::Utc;
use common::{BetId, EventId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Bet, Match};
use crate::error::MatchError;
use crate::event::EngineEvent;
use crate::guard::EventGuards;
use crate::log::NotificationSink;
use crate::metrics::EngineMetrics;
use crate::store::{bounded, BetQuery, BetStore, StoreError, StoreResult};

/// Tuning for store access
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Deadline for every store call
    pub store_timeout: Duration,
    /// Compare-and-swap attempts per candidate before giving up
    pub conflict_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl EngineSettings {
    /// Delay before the retry following the `attempt`-th conflict
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&config::EngineConfig::default())
    }
}

impl From<&config::EngineConfig> for EngineSettings {
    fn from(config: &config::EngineConfig) -> Self {
        Self {
            store_timeout: Duration::from_millis(config.store_timeout_ms),
            conflict_attempts: config.conflict_retry_attempts.max(1),
            backoff_base: Duration::from_millis(config.conflict_backoff_base_ms),
            backoff_max: Duration::from_millis(config.conflict_backoff_max_ms),
        }
    }
}

/// Result of trying to fill the taker against one candidate
enum Fill {
    /// Candidate was matched, or found exhausted; its status may need persisting
    Touched(Bet),
    Skipped,
    /// The taker was closed by someone else mid-walk
    TakerClosed,
}

pub struct MatchingEngine {
    store: Arc<dyn BetStore>,
    sink: Arc<dyn NotificationSink>,
    guards: Arc<EventGuards>,
    metrics: Arc<EngineMetrics>,
    settings: EngineSettings,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn BetStore>,
        sink: Arc<dyn NotificationSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            sink,
            guards: Arc::new(EventGuards::new()),
            metrics: Arc::new(EngineMetrics::new()),
            settings,
        }
    }

    /// Share guards and metrics with other components (the coordinator)
    pub fn with_shared(mut self, guards: Arc<EventGuards>, metrics: Arc<EngineMetrics>) -> Self {
        self.guards = guards;
        self.metrics = metrics;
        self
    }

    pub fn guards(&self) -> Arc<EventGuards> {
        Arc::clone(&self.guards)
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn store(&self) -> Arc<dyn BetStore> {
        Arc::clone(&self.store)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        bounded(self.settings.store_timeout, op, fut).await
    }

    async fn read_bet(&self, bet_id: BetId) -> Result<Bet, MatchError> {
        self.call("get_bet", self.store.get_bet(bet_id))
            .await
            .map_err(|e| MatchError::from_store(bet_id, e))
    }

    /// Open opposing bets on the same event and coin kind, oldest first
    ///
    /// Bets owned by the same user are never candidates.
    pub async fn find_opposing_candidates(&self, bet: &Bet) -> StoreResult<Vec<Bet>> {
        let query = BetQuery::new()
            .event(&bet.event_id)
            .side(!bet.side.reference)
            .open()
            .coin_kind(bet.coin_kind);

        let mut candidates = self.call("query_bets", self.store.query_bets(&query)).await?;
        candidates.retain(|c| c.user_id != bet.user_id && c.bet_id != bet.bet_id);
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.bet_id.cmp(&b.bet_id))
        });
        Ok(candidates)
    }

    /// Fill `bet` against the opposing queue and return its updated state
    ///
    /// No opposing bets is not an error: the bet comes back still pending.
    #[instrument(skip(self, bet), fields(bet_id = %bet.bet_id, event_id = %bet.event_id))]
    pub async fn attempt_match(&self, bet: &Bet) -> Result<Bet, MatchError> {
        let started = Instant::now();
        self.metrics.record_attempt();

        let result = self.match_under_guard(bet).await;

        let failed = matches!(&result, Err(e) if e.is_retryable());
        self.metrics.record_outcome(started.elapsed(), failed);
        match &result {
            Ok(updated) => debug!(
                status = %updated.status,
                remaining = updated.remaining_amount(),
                "Match attempt finished"
            ),
            Err(e) if failed => warn!(error = %e, "Match attempt failed"),
            Err(e) => debug!(error = %e, "Match attempt rejected"),
        }
        result
    }

    async fn match_under_guard(&self, bet: &Bet) -> Result<Bet, MatchError> {
        let _guard = self.guards.acquire(&bet.event_id).await;

        let mut taker = self.read_bet(bet.bet_id).await?;
        if !taker.status.is_open() {
            return Err(MatchError::AlreadyTerminal {
                bet_id: taker.bet_id,
                status: taker.status,
            });
        }

        let locked = self
            .call("is_event_locked", self.store.is_event_locked(&taker.event_id))
            .await
            .map_err(|e| MatchError::from_store(taker.bet_id, e))?;
        if locked {
            return Err(MatchError::EventLocked(taker.event_id.clone()));
        }

        let candidates = self
            .find_opposing_candidates(&taker)
            .await
            .map_err(|e| MatchError::from_store(taker.bet_id, e))?;
        debug!(candidates = candidates.len(), "Opposing candidates loaded");

        // Fills already committed keep their statuses in step even when a
        // later candidate aborts the walk.
        let walked = self.walk_candidates(&mut taker, candidates).await;
        let persisted = self.persist_fill_status(&taker).await;
        match walked {
            Ok(()) => persisted,
            Err(e) => {
                if let Err(persist_err) = persisted {
                    warn!(error = %persist_err, "Taker status not persisted after aborted walk");
                }
                Err(e)
            }
        }
    }

    /// Fill the taker candidate by candidate, persisting each touched
    /// candidate's status right after its fill commits
    async fn walk_candidates(&self, taker: &mut Bet, candidates: Vec<Bet>) -> Result<(), MatchError> {
        for candidate in candidates {
            if taker.remaining_amount() == 0 {
                break;
            }
            match self.fill_against(taker, candidate).await? {
                Fill::Touched(candidate) => {
                    self.persist_fill_status(&candidate).await?;
                }
                Fill::Skipped => {}
                Fill::TakerClosed => break,
            }
        }
        Ok(())
    }

    async fn fill_against(&self, taker: &mut Bet, candidate: Bet) -> Result<Fill, MatchError> {
        let mut candidate = candidate;
        let mut attempts = 0;

        loop {
            if !taker.status.is_open() {
                return Ok(Fill::TakerClosed);
            }
            if !candidate.status.is_open() {
                return Ok(Fill::Skipped);
            }
            if candidate.remaining_amount() == 0 {
                debug!(candidate_id = %candidate.bet_id, "Skipping exhausted candidate");
                return Ok(Fill::Touched(candidate));
            }
            let fill = taker.remaining_amount().min(candidate.remaining_amount());
            if fill == 0 {
                return Ok(Fill::Skipped);
            }

            let record = Match::new(taker, &candidate, fill, Utc::now());
            let applied = self
                .call(
                    "atomic_apply_match",
                    self.store.atomic_apply_match(taker, &candidate, &record),
                )
                .await;

            match applied {
                Ok(()) => {
                    taker.apply_fill(fill, record.created_at);
                    candidate.apply_fill(fill, record.created_at);
                    self.metrics.record_match(fill);
                    info!(
                        match_id = %record.match_id,
                        bet_id = %taker.bet_id,
                        candidate_id = %candidate.bet_id,
                        amount = fill,
                        "Bets matched"
                    );
                    self.sink.publish(EngineEvent::BetMatched { record }).await;
                    return Ok(Fill::Touched(candidate));
                }
                Err(StoreError::Conflict(reason)) => {
                    attempts += 1;
                    self.metrics.record_conflict();
                    if attempts >= self.settings.conflict_attempts {
                        warn!(
                            bet_id = %taker.bet_id,
                            candidate_id = %candidate.bet_id,
                            attempts,
                            %reason,
                            "Giving up on candidate after repeated conflicts"
                        );
                        return Err(MatchError::Conflict {
                            bet_id: taker.bet_id,
                            candidate_id: candidate.bet_id,
                            attempts,
                        });
                    }
                    debug!(candidate_id = %candidate.bet_id, attempts, %reason, "Match conflict, re-reading");
                    tokio::time::sleep(self.settings.backoff(attempts)).await;
                    *taker = self.read_bet(taker.bet_id).await?;
                    candidate = self.read_bet(candidate.bet_id).await?;
                }
                Err(StoreError::Unavailable(msg)) => {
                    return Err(MatchError::StoreUnavailable(msg));
                }
                Err(other) => {
                    error!(
                        bet_id = %taker.bet_id,
                        event_id = %taker.event_id,
                        candidate_id = %candidate.bet_id,
                        error = %other,
                        "Atomic match group failed"
                    );
                    return Err(MatchError::MatchPersistFailed {
                        bet_id: taker.bet_id,
                        reason: format!("candidate {}: {}", candidate.bet_id, other),
                    });
                }
            }
        }
    }

    /// Bring the stored status in line with the matched total
    ///
    /// Another process may have moved the status on already; a rejected
    /// transition re-reads the bet and recomputes from the stored total.
    async fn persist_fill_status(&self, bet: &Bet) -> Result<Bet, MatchError> {
        let mut current = bet.clone();
        let mut attempts = 0;

        loop {
            let target = current.fill_status();
            if target == current.status {
                return Ok(current);
            }

            let result = self
                .call("update_status", self.store.update_status(current.bet_id, target))
                .await;
            match result {
                Ok(updated) => {
                    self.sink
                        .publish(EngineEvent::BetStatusChanged {
                            bet_id: current.bet_id,
                            event_id: current.event_id.clone(),
                            from: current.status,
                            to: target,
                        })
                        .await;
                    return Ok(updated);
                }
                Err(StoreError::InvalidTransition { .. }) if attempts < self.settings.conflict_attempts => {
                    attempts += 1;
                    current = self.read_bet(current.bet_id).await?;
                }
                Err(e) => return Err(MatchError::from_store(current.bet_id, e)),
            }
        }
    }

    /// Suspend matching for an event
    ///
    /// Taken under the event guard: an attempt already in flight finishes
    /// on its candidate set, every later attempt fails with `EventLocked`.
    pub async fn lock_event(&self, event_id: &EventId) -> Result<(), MatchError> {
        let _guard = self.guards.acquire(event_id).await;
        self.call("lock_event", self.store.lock_event(event_id))
            .await
            .map_err(|e| match e {
                StoreError::Unavailable(msg) => MatchError::StoreUnavailable(msg),
                other => MatchError::StoreUnavailable(other.to_string()),
            })?;
        info!(event_id = %event_id, "Event locked");
        self.sink
            .publish(EngineEvent::EventLocked {
                event_id: event_id.clone(),
            })
            .await;
        Ok(())
    }

    pub async fn unlock_event(&self, event_id: &EventId) -> Result<(), MatchError> {
        let _guard = self.guards.acquire(event_id).await;
        self.call("unlock_event", self.store.unlock_event(event_id))
            .await
            .map_err(|e| MatchError::StoreUnavailable(e.to_string()))?;
        info!(event_id = %event_id, "Event unlocked");
        self.sink
            .publish(EngineEvent::EventUnlocked {
                event_id: event_id.clone(),
            })
            .await;
        Ok(())
    }

    pub async fn is_event_locked(&self, event_id: &EventId) -> StoreResult<bool> {
        self.call("is_event_locked", self.store.is_event_locked(event_id)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{BetSide, BetStatus, NewBet};
    use crate::log::EventJournal;
    use crate::store::InMemoryBetStore;
    use assert_matches::assert_matches;
    use chrono::{DateTime, Duration as ChronoDuration};
    use common::{CoinKind, UserId};
    use proptest::prelude::*;

    pub(crate) struct Harness {
        pub store: Arc<InMemoryBetStore>,
        pub journal: Arc<EventJournal>,
        pub engine: MatchingEngine,
        pub epoch: DateTime<Utc>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_settings(EngineSettings::default())
        }

        pub fn with_settings(settings: EngineSettings) -> Self {
            let store = Arc::new(InMemoryBetStore::new());
            let journal = Arc::new(EventJournal::default());
            let engine = MatchingEngine::new(store.clone(), journal.clone(), settings);
            Self {
                store,
                journal,
                engine,
                epoch: Utc::now() - ChronoDuration::minutes(30),
            }
        }

        /// Insert a pending bet created `seq` seconds after the epoch
        pub async fn place(&self, user: &str, reference: bool, amount: u32, seq: i64) -> Bet {
            self.place_kind(user, reference, amount, CoinKind::Stakes, seq).await
        }

        pub async fn place_kind(
            &self,
            user: &str,
            reference: bool,
            amount: u32,
            coin_kind: CoinKind,
            seq: i64,
        ) -> Bet {
            let bet = NewBet {
                user_id: UserId::new(user),
                event_id: EventId::new("game-1"),
                side: BetSide::new(reference, if reference { "Home" } else { "Away" }),
                amount,
                coin_kind,
                spread: -3.5,
            }
            .into_bet(self.epoch + ChronoDuration::seconds(seq));
            self.store.insert_bet(&bet).await.unwrap();
            bet
        }

        pub async fn get(&self, bet: &Bet) -> Bet {
            self.store.get_bet(bet.bet_id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_no_opposition_stays_pending() {
        let h = Harness::new();
        let bet = h.place("alice", true, 100, 0).await;

        let result = h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(result.status, BetStatus::Pending);
        assert_eq!(result.remaining_amount(), 100);
    }

    #[tokio::test]
    async fn test_partial_fill_of_new_bet() {
        let h = Harness::new();
        let resting = h.place("bob", false, 40, 0).await;
        let bet = h.place("alice", true, 100, 1).await;

        let result = h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(result.status, BetStatus::PartiallyMatched);
        assert_eq!(result.remaining_amount(), 60);

        let resting = h.get(&resting).await;
        assert_eq!(resting.status, BetStatus::FullyMatched);
        let matches = h.store.matches_for_bet(bet.bet_id).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].amount, 40);
        assert_eq!(matches[0].bet_b, resting.bet_id);
    }

    #[tokio::test]
    async fn test_walks_queue_in_fifo_order() {
        let h = Harness::new();
        let c1 = h.place("bob", false, 30, 0).await;
        let c2 = h.place("carol", false, 30, 1).await;
        let c3 = h.place("dave", false, 30, 2).await;
        let bet = h.place("alice", true, 70, 3).await;

        let result = h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(result.status, BetStatus::FullyMatched);

        let amounts: Vec<u32> = h
            .store
            .matches_for_bet(bet.bet_id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.amount)
            .collect();
        assert_eq!(amounts, vec![30, 30, 10]);

        assert_eq!(h.get(&c1).await.status, BetStatus::FullyMatched);
        assert_eq!(h.get(&c2).await.status, BetStatus::FullyMatched);
        let c3 = h.get(&c3).await;
        assert_eq!(c3.status, BetStatus::PartiallyMatched);
        assert_eq!(c3.remaining_amount(), 20);
    }

    #[tokio::test]
    async fn test_small_bet_goes_entirely_to_oldest() {
        let h = Harness::new();
        // Inserted out of order: c1 is older despite being stored second.
        let c2 = h.place("carol", false, 50, 5).await;
        let c1 = h.place("bob", false, 50, 1).await;
        let bet = h.place("alice", true, 20, 9).await;

        h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(h.get(&c1).await.matched_amount, 20);
        assert_eq!(h.get(&c2).await.matched_amount, 0);
    }

    #[tokio::test]
    async fn test_never_matches_own_bets_or_other_coin_kind() {
        let h = Harness::new();
        let own = h.place("alice", false, 50, 0).await;
        let play = h.place_kind("bob", false, 50, CoinKind::Play, 1).await;
        let bet = h.place("alice", true, 50, 2).await;

        let candidates = h.engine.find_opposing_candidates(&bet).await.unwrap();
        assert!(candidates.is_empty());

        let result = h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(result.status, BetStatus::Pending);
        assert_eq!(h.get(&own).await.matched_amount, 0);
        assert_eq!(h.get(&play).await.matched_amount, 0);
    }

    #[tokio::test]
    async fn test_same_side_is_not_a_candidate() {
        let h = Harness::new();
        h.place("bob", true, 50, 0).await;
        let bet = h.place("alice", true, 50, 1).await;
        assert!(h.engine.find_opposing_candidates(&bet).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_bet_is_rejected() {
        let h = Harness::new();
        let bet = h.place("alice", true, 50, 0).await;
        h.store.cancel_bet(bet.bet_id, 0).await.unwrap();

        assert_matches!(
            h.engine.attempt_match(&bet).await,
            Err(MatchError::AlreadyTerminal { status: BetStatus::Cancelled, .. })
        );
    }

    #[tokio::test]
    async fn test_locked_event_rejects_attempts_until_unlocked() {
        let h = Harness::new();
        h.place("bob", false, 50, 0).await;
        let bet = h.place("alice", true, 50, 1).await;

        h.engine.lock_event(&bet.event_id).await.unwrap();
        let err = h.engine.attempt_match(&bet).await.unwrap_err();
        assert_matches!(err, MatchError::EventLocked(_));
        assert!(!err.is_retryable());

        h.engine.unlock_event(&bet.event_id).await.unwrap();
        let result = h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(result.status, BetStatus::FullyMatched);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_after_reread() {
        let h = Harness::new();
        let resting = h.place("bob", false, 50, 0).await;
        let bet = h.place("alice", true, 50, 1).await;

        h.store.inject_conflicts(1);
        let result = h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(result.status, BetStatus::FullyMatched);
        assert_eq!(h.get(&resting).await.matched_amount, 50);
        assert_eq!(h.engine.metrics().conflicts.get(), 1);
        assert_eq!(h.store.matches_for_bet(bet.bet_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_retries_are_bounded() {
        let h = Harness::new();
        h.place("bob", false, 50, 0).await;
        let bet = h.place("alice", true, 50, 1).await;

        h.store.inject_conflicts(100);
        let err = h.engine.attempt_match(&bet).await.unwrap_err();
        assert_matches!(err, MatchError::Conflict { attempts: 3, .. });
        assert!(err.is_retryable());
        assert_eq!(h.get(&bet).await.matched_amount, 0);
    }

    #[tokio::test]
    async fn test_aborted_walk_keeps_committed_statuses() {
        let h = Harness::new();
        let c1 = h.place("bob", false, 30, 0).await;
        let c2 = h.place("carol", false, 30, 1).await;
        let bet = h.place("alice", true, 70, 2).await;

        h.store.fail_matches_after(Some(1));
        let err = h.engine.attempt_match(&bet).await.unwrap_err();
        assert_matches!(err, MatchError::MatchPersistFailed { .. });

        let c1 = h.get(&c1).await;
        assert_eq!(c1.matched_amount, 30);
        assert_eq!(c1.status, BetStatus::FullyMatched);
        let taker = h.get(&bet).await;
        assert_eq!(taker.matched_amount, 30);
        assert_eq!(taker.status, BetStatus::PartiallyMatched);
        assert_eq!(h.get(&c2).await.status, BetStatus::Pending);

        // A retry picks up where the aborted walk stopped.
        h.store.fail_matches_after(None);
        let result = h.engine.attempt_match(&bet).await.unwrap();
        assert_eq!(result.status, BetStatus::FullyMatched);
        assert_eq!(h.get(&c2).await.remaining_amount(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_surfaces_as_unavailable() {
        let h = Harness::new();
        let bet = h.place("alice", true, 50, 0).await;

        h.store.set_latency(Some(Duration::from_secs(30)));
        let err = h.engine.attempt_match(&bet).await.unwrap_err();
        assert_matches!(err, MatchError::StoreUnavailable(ref msg) if msg.contains("timed out"));
        assert_eq!(h.engine.metrics().match_failures.get(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let h = Harness::new();
        let bet = h.place("alice", true, 50, 0).await;
        h.store.set_unavailable(true);
        assert_matches!(
            h.engine.attempt_match(&bet).await,
            Err(MatchError::StoreUnavailable(_))
        );
    }

    #[tokio::test]
    async fn test_events_published_for_matches_and_transitions() {
        let h = Harness::new();
        h.place("bob", false, 40, 0).await;
        let bet = h.place("alice", true, 100, 1).await;
        h.engine.attempt_match(&bet).await.unwrap();

        let kinds: Vec<&str> = h
            .journal
            .events_from(0)
            .iter()
            .map(|e| e.event.kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["bet_matched", "bet_status_changed", "bet_status_changed"]
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let settings = EngineSettings::default();
        assert_eq!(settings.backoff(1), Duration::from_millis(10));
        assert_eq!(settings.backoff(2), Duration::from_millis(20));
        assert_eq!(settings.backoff(30), Duration::from_millis(200));
    }

    async fn assert_fill_invariants(store: &InMemoryBetStore, bets: &[Bet]) {
        let mut reference_matched = 0u64;
        let mut other_matched = 0u64;
        for bet in bets {
            let stored = store.get_bet(bet.bet_id).await.unwrap();
            let matches = store.matches_for_bet(bet.bet_id).await.unwrap();
            let total: u32 = matches.iter().map(|m| m.amount).sum();

            assert!(stored.matched_amount <= stored.amount);
            assert_eq!(stored.matched_amount, total);
            for m in &matches {
                let other_id = m.counterparty(bet.bet_id).unwrap();
                let other = store.get_bet(other_id).await.unwrap();
                assert_ne!(other.user_id, stored.user_id);
                assert!(other.side.opposes(&stored.side));
            }
            if stored.side.reference {
                reference_matched += u64::from(stored.matched_amount);
            } else {
                other_matched += u64::from(stored.matched_amount);
            }
        }
        assert_eq!(reference_matched, other_matched);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_concurrent_attempts_never_overfill(
            wagers in prop::collection::vec((any::<bool>(), 1u32..=100, 0usize..4), 2..24)
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let h = Arc::new(Harness::new());
                let mut bets = Vec::new();
                for (i, (reference, amount, user)) in wagers.iter().enumerate() {
                    let user = format!("user-{}", user);
                    bets.push(h.place(&user, *reference, *amount, i as i64).await);
                }

                let tasks: Vec<_> = bets
                    .iter()
                    .cloned()
                    .map(|bet| {
                        let h = Arc::clone(&h);
                        tokio::spawn(async move { h.engine.attempt_match(&bet).await })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap().unwrap();
                }

                assert_fill_invariants(&h.store, &bets).await;

                // Every bet ran an attempt after all were stored, so no two
                // opposing open bets of different users can both have coins left.
                let open: Vec<Bet> = h
                    .store
                    .query_bets(&BetQuery::new().open())
                    .await
                    .unwrap()
                    .into_iter()
                    .filter(|b| b.remaining_amount() > 0)
                    .collect();
                for a in &open {
                    for b in &open {
                        assert!(
                            !(a.side.opposes(&b.side) && a.user_id != b.user_id),
                            "{} and {} were left unmatched",
                            a.bet_id,
                            b.bet_id
                        );
                    }
                }
                for bet in &bets {
                    let stored = h.get(bet).await;
                    assert_eq!(
                        stored.status,
                        BetStatus::for_fill(stored.matched_amount, stored.amount)
                    );
                }
            });
        }

        #[test]
        fn prop_engines_without_shared_guards_stay_consistent(
            wagers in prop::collection::vec((any::<bool>(), 1u32..=100, 0usize..4), 2..16)
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let settings = EngineSettings {
                    conflict_attempts: 8,
                    backoff_base: Duration::from_millis(1),
                    backoff_max: Duration::from_millis(5),
                    ..EngineSettings::default()
                };
                let h = Arc::new(Harness::with_settings(settings.clone()));
                // A second engine over the same store stands in for another process.
                let other = Arc::new(MatchingEngine::new(
                    h.store.clone(),
                    h.journal.clone(),
                    settings,
                ));

                let mut bets = Vec::new();
                for (i, (reference, amount, user)) in wagers.iter().enumerate() {
                    let user = format!("user-{}", user);
                    bets.push(h.place(&user, *reference, *amount, i as i64).await);
                }

                let tasks: Vec<_> = bets
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(i, bet)| {
                        let h = Arc::clone(&h);
                        let other = Arc::clone(&other);
                        tokio::spawn(async move {
                            if i % 2 == 0 {
                                h.engine.attempt_match(&bet).await
                            } else {
                                other.attempt_match(&bet).await
                            }
                        })
                    })
                    .collect();
                for task in tasks {
                    match task.await.unwrap() {
                        Ok(_) | Err(MatchError::Conflict { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }

                assert_fill_invariants(&h.store, &bets).await;
            });
        }
    }
}
