//! In-memory store implementation for the Matching Engine

use async_trait::async_trait;
use chrono::Utc;
use common::{BetId, EventId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::domain::{Bet, BetStatus, Match, Refund};
use crate::store::traits::{BetQuery, BetStore, StoreError, StoreResult};

#[derive(Default)]
struct State {
    bets: HashMap<BetId, Bet>,
    matches: HashMap<BetId, Vec<Match>>,
    refunds: HashMap<BetId, Vec<Refund>>,
    locked_events: HashSet<EventId>,
}

/// In-memory bet store
///
/// All state sits behind one lock, so each compare-and-swap is trivially
/// atomic. Non-persistent: data is lost on restart. The fault hooks
/// (`set_unavailable`, `inject_conflicts`, `fail_matches_after`,
/// `set_latency`) exist so tests can exercise the engine's error paths.
#[derive(Default)]
pub struct InMemoryBetStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
    forced_conflicts: AtomicU32,
    match_failure: Mutex<Option<u32>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryBetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `atomic_apply_match` with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Let `successes` more match groups through, then fail every later one
    /// with [`StoreError::Backend`]. `None` clears the hook.
    pub fn fail_matches_after(&self, successes: Option<u32>) {
        *self.match_failure.lock() = successes;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn bet_count(&self) -> usize {
        self.state.read().bets.len()
    }

    async fn enter(&self) -> StoreResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_match_failure(&self) -> bool {
        let mut countdown = self.match_failure.lock();
        match countdown.as_mut() {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl BetStore for InMemoryBetStore {
    async fn insert_bet(&self, bet: &Bet) -> StoreResult<()> {
        self.enter().await?;
        let mut state = self.state.write();
        if state.bets.contains_key(&bet.bet_id) {
            return Err(StoreError::AlreadyExists(bet.bet_id));
        }
        state.bets.insert(bet.bet_id, bet.clone());
        debug!(bet_id = %bet.bet_id, event_id = %bet.event_id, "Bet inserted");
        Ok(())
    }

    async fn get_bet(&self, bet_id: BetId) -> StoreResult<Bet> {
        self.enter().await?;
        self.state
            .read()
            .bets
            .get(&bet_id)
            .cloned()
            .ok_or(StoreError::NotFound(bet_id))
    }

    async fn query_bets(&self, query: &BetQuery) -> StoreResult<Vec<Bet>> {
        self.enter().await?;
        let state = self.state.read();
        Ok(state
            .bets
            .values()
            .filter(|b| query.matches(b))
            .cloned()
            .collect())
    }

    async fn atomic_apply_match(&self, bet_a: &Bet, bet_b: &Bet, new_match: &Match) -> StoreResult<()> {
        self.enter().await?;
        if self.take_forced_conflict() {
            return Err(StoreError::Conflict("injected conflict".into()));
        }
        if self.take_match_failure() {
            return Err(StoreError::Backend("injected match failure".into()));
        }

        let mut state = self.state.write();
        for snapshot in [bet_a, bet_b] {
            let current = state
                .bets
                .get(&snapshot.bet_id)
                .ok_or(StoreError::NotFound(snapshot.bet_id))?;
            if current.matched_amount != snapshot.matched_amount || !current.status.is_open() {
                return Err(StoreError::Conflict(format!(
                    "bet {} changed (matched {} -> {}, status {})",
                    snapshot.bet_id, snapshot.matched_amount, current.matched_amount, current.status
                )));
            }
            if current.remaining_amount() < new_match.amount {
                return Err(StoreError::Backend(format!(
                    "match of {} exceeds remaining {} of bet {}",
                    new_match.amount,
                    current.remaining_amount(),
                    snapshot.bet_id
                )));
            }
        }

        for bet_id in [bet_a.bet_id, bet_b.bet_id] {
            if let Some(bet) = state.bets.get_mut(&bet_id) {
                bet.apply_fill(new_match.amount, new_match.created_at);
            }
            state.matches.entry(bet_id).or_default().push(new_match.clone());
        }
        Ok(())
    }

    async fn update_status(&self, bet_id: BetId, new_status: BetStatus) -> StoreResult<Bet> {
        self.enter().await?;
        let mut state = self.state.write();
        let bet = state.bets.get_mut(&bet_id).ok_or(StoreError::NotFound(bet_id))?;
        if !bet.status.can_transition_to(new_status) {
            return Err(StoreError::InvalidTransition {
                bet_id,
                from: bet.status,
                to: new_status,
            });
        }
        bet.status = new_status;
        bet.updated_at = Utc::now();
        Ok(bet.clone())
    }

    async fn cancel_bet(&self, bet_id: BetId, expected_matched: u32) -> StoreResult<Bet> {
        self.enter().await?;
        let mut state = self.state.write();
        let bet = state.bets.get_mut(&bet_id).ok_or(StoreError::NotFound(bet_id))?;
        if !bet.status.is_open() {
            return Err(StoreError::InvalidTransition {
                bet_id,
                from: bet.status,
                to: BetStatus::Cancelled,
            });
        }
        if bet.matched_amount != expected_matched {
            return Err(StoreError::Conflict(format!(
                "bet {} matched total moved from {} to {}",
                bet_id, expected_matched, bet.matched_amount
            )));
        }
        bet.status = BetStatus::Cancelled;
        bet.updated_at = Utc::now();
        Ok(bet.clone())
    }

    async fn update_current_spread(&self, bet_id: BetId, spread: f64) -> StoreResult<Bet> {
        self.enter().await?;
        let mut state = self.state.write();
        let bet = state.bets.get_mut(&bet_id).ok_or(StoreError::NotFound(bet_id))?;
        bet.current_spread = spread;
        bet.updated_at = Utc::now();
        Ok(bet.clone())
    }

    async fn matches_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Match>> {
        self.enter().await?;
        Ok(self.state.read().matches.get(&bet_id).cloned().unwrap_or_default())
    }

    async fn record_refund(&self, refund: &Refund) -> StoreResult<()> {
        self.enter().await?;
        self.state
            .write()
            .refunds
            .entry(refund.bet_id)
            .or_default()
            .push(refund.clone());
        Ok(())
    }

    async fn refunds_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Refund>> {
        self.enter().await?;
        Ok(self.state.read().refunds.get(&bet_id).cloned().unwrap_or_default())
    }

    async fn lock_event(&self, event_id: &EventId) -> StoreResult<()> {
        self.enter().await?;
        self.state.write().locked_events.insert(event_id.clone());
        Ok(())
    }

    async fn unlock_event(&self, event_id: &EventId) -> StoreResult<()> {
        self.enter().await?;
        self.state.write().locked_events.remove(event_id);
        Ok(())
    }

    async fn is_event_locked(&self, event_id: &EventId) -> StoreResult<bool> {
        self.enter().await?;
        Ok(self.state.read().locked_events.contains(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BetSide, NewBet};
    use assert_matches::assert_matches;
    use common::{CoinKind, UserId};

    fn new_bet(user: &str, reference: bool, amount: u32) -> Bet {
        NewBet {
            user_id: UserId::new(user),
            event_id: EventId::new("game-1"),
            side: BetSide::new(reference, if reference { "Home" } else { "Away" }),
            amount,
            coin_kind: CoinKind::Play,
            spread: 0.0,
        }
        .into_bet(Utc::now())
    }

    #[tokio::test]
    async fn test_apply_match_updates_both_bets() {
        let store = InMemoryBetStore::new();
        let a = new_bet("alice", true, 50);
        let b = new_bet("bob", false, 30);
        store.insert_bet(&a).await.unwrap();
        store.insert_bet(&b).await.unwrap();

        let m = Match::new(&a, &b, 30, Utc::now());
        store.atomic_apply_match(&a, &b, &m).await.unwrap();

        assert_eq!(store.get_bet(a.bet_id).await.unwrap().matched_amount, 30);
        assert_eq!(store.get_bet(b.bet_id).await.unwrap().remaining_amount(), 0);
        assert_eq!(store.matches_for_bet(a.bet_id).await.unwrap(), vec![m.clone()]);
        assert_eq!(store.matches_for_bet(b.bet_id).await.unwrap(), vec![m]);
    }

    #[tokio::test]
    async fn test_apply_match_with_stale_snapshot_conflicts() {
        let store = InMemoryBetStore::new();
        let a = new_bet("alice", true, 50);
        let b = new_bet("bob", false, 30);
        let c = new_bet("carol", false, 30);
        for bet in [&a, &b, &c] {
            store.insert_bet(bet).await.unwrap();
        }

        store
            .atomic_apply_match(&a, &b, &Match::new(&a, &b, 30, Utc::now()))
            .await
            .unwrap();

        // `a` is stale now: its stored matched total is 30, not 0.
        let result = store
            .atomic_apply_match(&a, &c, &Match::new(&a, &c, 20, Utc::now()))
            .await;
        assert_matches!(result, Err(StoreError::Conflict(_)));
        assert_eq!(store.get_bet(c.bet_id).await.unwrap().matched_amount, 0);
        assert!(store.matches_for_bet(c.bet_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_is_compare_and_swap() {
        let store = InMemoryBetStore::new();
        let a = new_bet("alice", true, 50);
        store.insert_bet(&a).await.unwrap();

        assert_matches!(store.cancel_bet(a.bet_id, 10).await, Err(StoreError::Conflict(_)));

        let cancelled = store.cancel_bet(a.bet_id, 0).await.unwrap();
        assert_eq!(cancelled.status, BetStatus::Cancelled);

        assert_matches!(
            store.cancel_bet(a.bet_id, 0).await,
            Err(StoreError::InvalidTransition { from: BetStatus::Cancelled, .. })
        );
    }

    #[tokio::test]
    async fn test_update_status_rejects_invalid_transition() {
        let store = InMemoryBetStore::new();
        let a = new_bet("alice", true, 50);
        store.insert_bet(&a).await.unwrap();

        assert_matches!(
            store.update_status(a.bet_id, BetStatus::Won).await,
            Err(StoreError::InvalidTransition { .. })
        );
        let updated = store.update_status(a.bet_id, BetStatus::PartiallyMatched).await.unwrap();
        assert_eq!(updated.status, BetStatus::PartiallyMatched);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = InMemoryBetStore::new();
        let home = new_bet("alice", true, 10);
        let away = new_bet("bob", false, 10);
        store.insert_bet(&home).await.unwrap();
        store.insert_bet(&away).await.unwrap();

        let query = BetQuery::new()
            .event(&EventId::new("game-1"))
            .side(false)
            .open()
            .coin_kind(CoinKind::Play);
        let found = store.query_bets(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bet_id, away.bet_id);

        let none = store
            .query_bets(&BetQuery::new().event(&EventId::new("game-2")))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_and_faults() {
        let store = InMemoryBetStore::new();
        let a = new_bet("alice", true, 10);
        store.insert_bet(&a).await.unwrap();
        assert_matches!(store.insert_bet(&a).await, Err(StoreError::AlreadyExists(_)));

        store.set_unavailable(true);
        let err = store.get_bet(a.bet_id).await.unwrap_err();
        assert!(err.is_retryable());
        store.set_unavailable(false);

        let locked = EventId::new("game-1");
        store.lock_event(&locked).await.unwrap();
        assert!(store.is_event_locked(&locked).await.unwrap());
        store.unlock_event(&locked).await.unwrap();
        assert!(!store.is_event_locked(&locked).await.unwrap());
    }
}
