//! Queue and risk monitor
//!
//! Read-only view over the bet store, the engine metrics and the alert
//! journal. A snapshot is recomputed on a fixed interval (or on demand)
//! and kept for readers; nothing here ever mutates bet or match state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::EventId;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::{RecordedAlert, RiskAlert};
use crate::domain::Bet;
use crate::log::{EventJournal, NotificationSink};
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot};
use crate::store::{bounded, BetQuery, BetStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    /// Classify from average match latency and error rate
    ///
    /// The worse of the two signals wins.
    pub fn evaluate(
        avg_latency: Duration,
        error_rate: f64,
        thresholds: &config::HealthThresholdsConfig,
    ) -> Self {
        let latency_ms = avg_latency.as_millis() as u64;
        if latency_ms >= thresholds.latency_critical_ms || error_rate >= thresholds.error_rate_critical {
            HealthStatus::Critical
        } else if latency_ms >= thresholds.latency_degraded_ms
            || error_rate >= thresholds.error_rate_degraded
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Classify from the recent (exponentially weighted) engine figures
    pub fn from_metrics(
        metrics: &EngineMetricsSnapshot,
        thresholds: &config::HealthThresholdsConfig,
    ) -> Self {
        Self::evaluate(
            Duration::from_micros(metrics.recent_latency_us),
            metrics.recent_error_rate,
            thresholds,
        )
    }

    /// Gauge value: 0 healthy, 1 degraded, 2 critical
    pub fn level(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Critical => 2,
        }
    }
}

/// Open bets and unmatched coins waiting on one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventQueueStats {
    pub event_id: EventId,
    pub open_bets: usize,
    pub depth_coins: u64,
    /// Unmatched coins on the reference side
    pub reference_depth: u64,
    /// Unmatched coins on the other side
    pub opposing_depth: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeRollup {
    pub window_seconds: u64,
    /// Coins wagered on bets created inside the window
    pub last_window: u64,
    pub all_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub computed_at: DateTime<Utc>,
    pub queues: Vec<EventQueueStats>,
    pub volume: VolumeRollup,
    pub alerts: Vec<RecordedAlert>,
    pub health: HealthStatus,
    pub metrics: EngineMetricsSnapshot,
}

impl MonitorSnapshot {
    pub fn queue(&self, event_id: &EventId) -> Option<&EventQueueStats> {
        self.queues.iter().find(|q| &q.event_id == event_id)
    }
}

/// An open bet with its display priority
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub bet: Bet,
    pub candidate_count: usize,
    pub score: f64,
}

/// Display-only priority in `[0, 1]` for an open bet
///
/// Weighted sum of time in queue, wager size and the number of opposing
/// candidates, each normalised against its cap and clamped to `[0, 1]`.
pub fn matching_score(
    bet: &Bet,
    now: DateTime<Utc>,
    candidate_count: usize,
    config: &config::ScoreConfig,
) -> f64 {
    let waited = (now - bet.created_at).num_milliseconds().max(0) as f64 / 1_000.0;
    let time = ratio(waited, config.time_in_queue_cap_seconds as f64);
    let size = ratio(f64::from(bet.amount), f64::from(config.wager_size_cap));
    let candidates = ratio(candidate_count as f64, f64::from(config.candidate_count_cap));

    config.time_weight * time + config.size_weight * size + config.candidate_weight * candidates
}

fn ratio(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    (value / cap).clamp(0.0, 1.0)
}

/// Open opposing bets of other users with the same coin kind
fn candidate_count(bet: &Bet, open: &[Bet]) -> usize {
    open.iter()
        .filter(|c| {
            c.side.opposes(&bet.side)
                && c.user_id != bet.user_id
                && c.coin_kind == bet.coin_kind
                && c.remaining_amount() > 0
        })
        .count()
}

pub struct QueueMonitor {
    store: Arc<dyn BetStore>,
    metrics: Arc<EngineMetrics>,
    journal: Arc<EventJournal>,
    config: config::MonitorConfig,
    store_timeout: Duration,
    latest: RwLock<Option<Arc<MonitorSnapshot>>>,
    gauges: Option<observability::MonitorGauges>,
}

impl QueueMonitor {
    pub fn new(
        store: Arc<dyn BetStore>,
        metrics: Arc<EngineMetrics>,
        journal: Arc<EventJournal>,
        config: config::MonitorConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            journal,
            config,
            store_timeout,
            latest: RwLock::new(None),
            gauges: None,
        }
    }

    /// Mirror every snapshot into Prometheus gauges
    pub fn with_gauges(mut self, gauges: observability::MonitorGauges) -> Self {
        self.gauges = Some(gauges);
        self
    }

    pub fn config(&self) -> &config::MonitorConfig {
        &self.config
    }

    /// Most recently computed snapshot, if any
    pub fn latest(&self) -> Option<Arc<MonitorSnapshot>> {
        self.latest.read().clone()
    }

    /// Accept an alert from an upstream detector
    ///
    /// The journal stamps it on receipt; it shows up in the next snapshot.
    pub async fn report_alert(&self, alert: RiskAlert) {
        self.journal.raise_alert(alert).await;
    }

    /// Current health from the engine metrics alone
    pub fn health(&self) -> HealthStatus {
        HealthStatus::from_metrics(&self.metrics.snapshot(), &self.config.health)
    }

    /// Recompute the snapshot now and keep it as the latest
    pub async fn refresh(&self) -> StoreResult<Arc<MonitorSnapshot>> {
        let started = Instant::now();
        let now = Utc::now();

        let open_query = BetQuery::new().open();
        let all_query = BetQuery::new();
        let (open, all) = futures::try_join!(
            bounded(self.store_timeout, "query_bets", self.store.query_bets(&open_query)),
            bounded(self.store_timeout, "query_bets", self.store.query_bets(&all_query)),
        )?;

        let queues = queue_stats(&open);
        let volume = self.volume(&all, now);
        let metrics = self.metrics.snapshot();
        let health = HealthStatus::from_metrics(&metrics, &self.config.health);

        let snapshot = Arc::new(MonitorSnapshot {
            computed_at: now,
            queues,
            volume,
            alerts: self.journal.recent_alerts(),
            health,
            metrics,
        });

        let previous = self.latest.write().replace(Arc::clone(&snapshot));
        if let Some(previous) = previous {
            if previous.health != health {
                warn!(from = ?previous.health, to = ?health, "System health changed");
            }
        }

        let elapsed = started.elapsed();
        self.publish_gauges(&snapshot, elapsed);
        debug!(
            events = snapshot.queues.len(),
            open_bets = open.len(),
            ?health,
            elapsed_ms = elapsed.as_millis() as u64,
            "Monitor snapshot refreshed"
        );
        Ok(snapshot)
    }

    fn volume(&self, bets: &[Bet], now: DateTime<Utc>) -> VolumeRollup {
        let window_start = now - ChronoDuration::seconds(self.config.volume_window_seconds as i64);
        let mut rollup = VolumeRollup {
            window_seconds: self.config.volume_window_seconds,
            last_window: 0,
            all_time: 0,
        };
        for bet in bets {
            rollup.all_time += u64::from(bet.amount);
            if bet.created_at >= window_start {
                rollup.last_window += u64::from(bet.amount);
            }
        }
        rollup
    }

    fn publish_gauges(&self, snapshot: &MonitorSnapshot, elapsed: Duration) {
        let Some(gauges) = &self.gauges else {
            return;
        };
        let drained = gauges.publish_queues(
            snapshot
                .queues
                .iter()
                .map(|q| (q.event_id.as_str(), q.open_bets as u64, q.depth_coins)),
        );
        if !drained.is_empty() {
            debug!(events = ?drained, "Queue gauges reset for drained events");
        }
        gauges.set_volume(snapshot.volume.last_window, snapshot.volume.all_time);
        gauges.set_health(snapshot.health.level());
        gauges.record_refresh(elapsed);
    }

    /// Open bets of an event with their matching score, highest first
    pub async fn queue_entries(&self, event_id: &EventId) -> StoreResult<Vec<QueueEntry>> {
        let open = bounded(
            self.store_timeout,
            "query_bets",
            self.store.query_bets(&BetQuery::new().event(event_id).open()),
        )
        .await?;

        let now = Utc::now();
        let mut entries: Vec<QueueEntry> = open
            .iter()
            .map(|bet| {
                let candidates = candidate_count(bet, &open);
                QueueEntry {
                    score: matching_score(bet, now, candidates, &self.config.score),
                    candidate_count: candidates,
                    bet: bet.clone(),
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.bet.created_at.cmp(&b.bet.created_at))
        });
        Ok(entries)
    }

    /// Refresh on a fixed interval until `shutdown` is cancelled
    ///
    /// A failed refresh is logged and the previous snapshot stays in place.
    pub fn spawn_refresh_loop(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Monitor refresh loop started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            warn!(error = %e, "Monitor refresh failed");
                        }
                    }
                }
            }
            info!("Monitor refresh loop stopped");
        })
    }
}

fn queue_stats(open: &[Bet]) -> Vec<EventQueueStats> {
    let mut by_event: BTreeMap<&str, EventQueueStats> = BTreeMap::new();
    for bet in open {
        let stats = by_event
            .entry(bet.event_id.as_str())
            .or_insert_with(|| EventQueueStats {
                event_id: bet.event_id.clone(),
                open_bets: 0,
                depth_coins: 0,
                reference_depth: 0,
                opposing_depth: 0,
            });
        let remaining = u64::from(bet.remaining_amount());
        stats.open_bets += 1;
        stats.depth_coins += remaining;
        if bet.side.reference {
            stats.reference_depth += remaining;
        } else {
            stats.opposing_depth += remaining;
        }
    }
    by_event.into_values().collect()
}
