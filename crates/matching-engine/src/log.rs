//! Event journal and notification sink
//!
//! The journal records every published engine event in sequence order and
//! keeps the most recent risk alerts for the queue monitor to surface.
//! Both buffers are bounded; the oldest entries are evicted first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error, warn};

use crate::alert::{AlertSeverity, RecordedAlert, RiskAlert};
use crate::event::EngineEvent;

/// Destination for engine events and risk alerts
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: EngineEvent);

    async fn raise_alert(&self, alert: RiskAlert);
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: EngineEvent,
}

struct JournalInner {
    events: VecDeque<JournalEntry>,
    alerts: VecDeque<RecordedAlert>,
    sequence: u64,
}

/// In-memory, sequence-numbered journal
pub struct EventJournal {
    inner: Mutex<JournalInner>,
    event_capacity: usize,
    alert_capacity: usize,
}

impl EventJournal {
    pub fn new(event_capacity: usize, alert_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(JournalInner {
                events: VecDeque::new(),
                alerts: VecDeque::new(),
                sequence: 0,
            }),
            event_capacity,
            alert_capacity,
        }
    }

    /// Events with a sequence number at or above `from_sequence`
    pub fn events_from(&self, from_sequence: u64) -> Vec<JournalEntry> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.sequence >= from_sequence)
            .cloned()
            .collect()
    }

    /// Retained alerts, newest first
    pub fn recent_alerts(&self) -> Vec<RecordedAlert> {
        self.inner.lock().alerts.iter().rev().cloned().collect()
    }

    pub fn sequence(&self) -> u64 {
        self.inner.lock().sequence
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new(10_000, config::default_alert_retention())
    }
}

#[async_trait]
impl NotificationSink for EventJournal {
    async fn publish(&self, event: EngineEvent) {
        let mut inner = self.inner.lock();
        inner.sequence += 1;
        let sequence = inner.sequence;
        debug!(sequence, kind = event.kind(), "Engine event recorded");
        inner.events.push_back(JournalEntry {
            sequence,
            recorded_at: Utc::now(),
            event,
        });
        while inner.events.len() > self.event_capacity {
            inner.events.pop_front();
        }
    }

    async fn raise_alert(&self, alert: RiskAlert) {
        match alert.severity {
            AlertSeverity::Critical => error!(
                alert_id = %alert.alert_id,
                kind = ?alert.kind,
                message = %alert.message,
                "Risk alert raised"
            ),
            _ => warn!(
                alert_id = %alert.alert_id,
                kind = ?alert.kind,
                message = %alert.message,
                "Risk alert raised"
            ),
        }

        let mut inner = self.inner.lock();
        inner.sequence += 1;
        let sequence = inner.sequence;
        inner.alerts.push_back(RecordedAlert {
            sequence,
            recorded_at: Utc::now(),
            alert,
        });
        while inner.alerts.len() > self.alert_capacity {
            inner.alerts.pop_front();
        }
    }
}
