//! Service wiring
//!
//! Builds the store, ledger, engine, coordinator, placement boundary and
//! monitor from configuration, sharing one journal, one set of event
//! guards and one metrics registry between them.

use anyhow::{Context, Result};
use config::MasterConfig;
use matching_engine::api::ApiState;
use matching_engine::{
    create_ledger, create_store, BetPlacement, BetStore, BetValidator, CancellationCoordinator,
    EngineSettings, EventJournal, InMemoryBetStore, InMemoryLedger, MatchingEngine, QueueMonitor,
    UserLedger,
};
use std::sync::Arc;
use tracing::info;

/// Event journal capacity
const JOURNAL_CAPACITY: usize = 10_000;

pub struct Services {
    pub engine: Arc<MatchingEngine>,
    pub placement: Arc<BetPlacement>,
    pub cancellation: Arc<CancellationCoordinator>,
    pub monitor: Arc<QueueMonitor>,
    pub journal: Arc<EventJournal>,
}

impl Services {
    /// Connect to the configured store and ledger
    pub async fn connect(config: &MasterConfig) -> Result<Self> {
        let store = create_store(&config.store)
            .await
            .context("Failed to create bet store")?;
        let ledger = create_ledger(&config.ledger).context("Failed to create user ledger")?;
        info!(
            store = %config.store.store_type,
            ledger = %config.ledger.ledger_type,
            "Adapters ready"
        );
        Ok(Self::assemble(config, store, ledger))
    }

    /// Wire everything against in-memory adapters
    pub fn in_memory(config: &MasterConfig) -> Self {
        Self::assemble(
            config,
            Arc::new(InMemoryBetStore::new()),
            Arc::new(InMemoryLedger::new()),
        )
    }

    fn assemble(config: &MasterConfig, store: Arc<dyn BetStore>, ledger: Arc<dyn UserLedger>) -> Self {
        let settings = EngineSettings::from(&config.engine);
        let journal = Arc::new(EventJournal::new(JOURNAL_CAPACITY, config.monitor.alert_retention));

        let engine = Arc::new(MatchingEngine::new(store.clone(), journal.clone(), settings.clone()));
        let cancellation = CancellationCoordinator::new(
            &engine,
            ledger,
            journal.clone(),
            &config.cancellation,
        );
        let validator = BetValidator::new(store.clone(), config.limits.clone(), settings.store_timeout);
        let placement = BetPlacement::new(validator, engine.clone());

        let mut monitor = QueueMonitor::new(
            store,
            engine.metrics(),
            journal.clone(),
            config.monitor.clone(),
            settings.store_timeout,
        );
        if config.metrics.enabled {
            monitor = monitor.with_gauges(observability::MonitorGauges::new(&config.service.name));
        }

        Self {
            engine,
            placement: Arc::new(placement),
            cancellation: Arc::new(cancellation),
            monitor: Arc::new(monitor),
            journal,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            engine: self.engine.clone(),
            placement: self.placement.clone(),
            cancellation: self.cancellation.clone(),
            monitor: self.monitor.clone(),
        }
    }
}
