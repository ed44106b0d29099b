//! Prometheus metrics
//!
//! The exporter serves `/metrics` on its own listener. `MonitorGauges`
//! mirrors the queue monitor's snapshot into gauges so dashboards can
//! read queue depth, volume and health without calling the admin API.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Install the Prometheus exporter on `0.0.0.0:<port>`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Gauges published after every monitor refresh
///
/// * `wager_queue_depth_coins{event}` - unmatched coins waiting per event
/// * `wager_queue_bets{event}` - open bets per event
/// * `wager_volume_coins{window}` - wagered coins (`hour`, `all_time`)
/// * `wager_system_health` - 0 healthy, 1 degraded, 2 critical
/// * `wager_monitor_refresh_seconds` - time spent computing a snapshot
///
/// Per-event gauges of an event whose queue has drained are set back to
/// zero on the next [`MonitorGauges::publish_queues`].
#[derive(Clone, Debug)]
pub struct MonitorGauges {
    service: String,
    published_events: Arc<Mutex<BTreeSet<String>>>,
}

impl MonitorGauges {
    /// Create gauges labelled with the service name
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            published_events: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Publish every event's queue and zero the events missing this round
    ///
    /// Returns the events that were zeroed.
    pub fn publish_queues<'a, I>(&self, queues: I) -> Vec<String>
    where
        I: IntoIterator<Item = (&'a str, u64, u64)>,
    {
        let mut current = BTreeSet::new();
        for (event_id, open_bets, depth_coins) in queues {
            self.set_queue(event_id, open_bets, depth_coins);
            current.insert(event_id.to_string());
        }

        let mut published = self.published_events.lock();
        let drained: Vec<String> = published.difference(&current).cloned().collect();
        for event_id in &drained {
            self.set_queue(event_id, 0, 0);
        }
        *published = current;
        drained
    }

    /// Publish queue depth for one event
    pub fn set_queue(&self, event_id: &str, open_bets: u64, depth_coins: u64) {
        gauge!("wager_queue_bets", "service" => self.service.clone(), "event" => event_id.to_string())
            .set(open_bets as f64);
        gauge!("wager_queue_depth_coins", "service" => self.service.clone(), "event" => event_id.to_string())
            .set(depth_coins as f64);
    }

    /// Publish the hourly and all-time volume rollups
    pub fn set_volume(&self, last_hour: u64, all_time: u64) {
        gauge!("wager_volume_coins", "service" => self.service.clone(), "window" => "hour")
            .set(last_hour as f64);
        gauge!("wager_volume_coins", "service" => self.service.clone(), "window" => "all_time")
            .set(all_time as f64);
    }

    /// Publish the health level (0 healthy, 1 degraded, 2 critical)
    pub fn set_health(&self, level: u8) {
        gauge!("wager_system_health", "service" => self.service.clone()).set(f64::from(level));
    }

    /// Record how long a monitor refresh took
    pub fn record_refresh(&self, elapsed: Duration) {
        counter!("wager_monitor_refreshes_total", "service" => self.service.clone()).increment(1);
        histogram!("wager_monitor_refresh_seconds", "service" => self.service.clone())
            .record(elapsed.as_secs_f64());
    }

    /// Service label used on every gauge
    pub fn service(&self) -> &str {
        &self.service
    }
}
