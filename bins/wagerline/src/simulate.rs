//! Scripted matching sessions against in-memory adapters

use anyhow::Result;
use cli::Scenario;
use common::{CoinKind, EventId, UserId};
use config::MasterConfig;
use matching_engine::{Bet, BetSide, BetStore, MonitorSnapshot, NewBet};
use serde_json::json;

use crate::services::Services;

const EVENT: &str = "sim-game";

pub struct SimulationOutcome {
    pub bets: Vec<Bet>,
    pub refunded: u32,
    pub snapshot: MonitorSnapshot,
}

fn wager(user: &str, reference: bool, amount: u32) -> NewBet {
    NewBet {
        user_id: UserId::new(user),
        event_id: EventId::new(EVENT),
        side: BetSide::new(reference, if reference { "Home" } else { "Away" }),
        amount,
        coin_kind: CoinKind::Stakes,
        spread: -3.5,
    }
}

/// Replay `scenario` and return final bet states and a monitor snapshot
pub async fn run(config: &MasterConfig, scenario: Scenario) -> Result<SimulationOutcome> {
    let services = Services::in_memory(config);
    let place = |bet: NewBet| services.placement.place(bet);

    let mut placed = Vec::new();
    let mut refunded = 0;
    match scenario {
        Scenario::Exact => {
            placed.push(place(wager("bob", false, 50)).await?);
            placed.push(place(wager("alice", true, 50)).await?);
        }
        Scenario::Split => {
            placed.push(place(wager("bob", false, 30)).await?);
            placed.push(place(wager("carol", false, 30)).await?);
            placed.push(place(wager("dave", false, 30)).await?);
            placed.push(place(wager("alice", true, 70)).await?);
        }
        Scenario::Cancel => {
            placed.push(place(wager("bob", false, 40)).await?);
            let taker = place(wager("alice", true, 100)).await?;
            let receipt = services.cancellation.cancel_bet(&taker).await?;
            refunded = receipt.refunded();
            placed.push(taker);
        }
    }

    let store = services.engine.store();
    let mut bets = Vec::with_capacity(placed.len());
    for bet in &placed {
        bets.push(store.get_bet(bet.bet_id).await?);
    }
    let snapshot = services.monitor.refresh().await?;

    Ok(SimulationOutcome {
        bets,
        refunded,
        snapshot: MonitorSnapshot::clone(&snapshot),
    })
}

pub fn render(scenario: Scenario, outcome: &SimulationOutcome) -> Result<String> {
    let bets: Vec<_> = outcome
        .bets
        .iter()
        .map(|b| {
            json!({
                "user_id": b.user_id,
                "side": b.side.label,
                "amount": b.amount,
                "matched": b.matched_amount,
                "remaining": b.remaining_amount(),
                "status": b.status,
            })
        })
        .collect();
    let report = json!({
        "scenario": scenario.as_str(),
        "bets": bets,
        "refunded": outcome.refunded,
        "snapshot": outcome.snapshot,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matching_engine::BetStatus;

    fn test_config() -> MasterConfig {
        let mut config = config::generate_default_config();
        config.store.store_type = "memory".into();
        config.ledger.ledger_type = "memory".into();
        config
    }

    #[tokio::test]
    async fn test_exact_scenario_fills_both() {
        let outcome = run(&test_config(), Scenario::Exact).await.unwrap();
        assert!(outcome
            .bets
            .iter()
            .all(|b| b.status == BetStatus::FullyMatched));
        assert_eq!(outcome.snapshot.metrics.matches_created, 1);
    }

    #[tokio::test]
    async fn test_split_scenario_walks_fifo() {
        let outcome = run(&test_config(), Scenario::Split).await.unwrap();
        let matched: Vec<u32> = outcome.bets.iter().map(|b| b.matched_amount).collect();
        assert_eq!(matched, vec![30, 30, 10, 70]);
        assert_eq!(outcome.bets[2].status, BetStatus::PartiallyMatched);
        assert_eq!(outcome.bets[3].status, BetStatus::FullyMatched);

        let queue = outcome.snapshot.queue(&EventId::new(EVENT)).unwrap();
        assert_eq!(queue.open_bets, 1);
        assert_eq!(queue.depth_coins, 20);
    }

    #[tokio::test]
    async fn test_cancel_scenario_refunds_remainder() {
        let outcome = run(&test_config(), Scenario::Cancel).await.unwrap();
        assert_eq!(outcome.refunded, 60);
        assert_eq!(outcome.bets[1].status, BetStatus::Cancelled);
        assert_eq!(outcome.bets[0].status, BetStatus::FullyMatched);

        let rendered = render(Scenario::Cancel, &outcome).unwrap();
        assert!(rendered.contains("\"refunded\": 60"));
    }
}
