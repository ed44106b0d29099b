//! Risk alerts
//!
//! Rapid-cancellation, unusual-volume and suspicious-pattern alerts come
//! from upstream detectors. Unresolved-refund alerts are raised by the
//! cancellation coordinator when the ledger rejects a refund.

use chrono::{DateTime, Utc};
use common::{BetId, EventId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RapidCancellation,
    UnusualVolume,
    SuspiciousPattern,
    UnresolvedRefund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub alert_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub bet_id: Option<BetId>,
    /// When the upstream detector observed the condition
    #[serde(default)]
    pub detected_at: Option<DateTime<Utc>>,
}

impl RiskAlert {
    pub fn new(kind: AlertKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            user_id: None,
            event_id: None,
            bet_id: None,
            detected_at: None,
        }
    }

    /// Refund for a cancelled bet could not be delivered
    pub fn unresolved_refund(bet_id: BetId, user_id: &UserId, amount: u32, cause: &str) -> Self {
        Self {
            user_id: Some(user_id.clone()),
            bet_id: Some(bet_id),
            ..Self::new(
                AlertKind::UnresolvedRefund,
                AlertSeverity::Critical,
                format!("refund of {} coins for bet {} not delivered: {}", amount, bet_id, cause),
            )
        }
    }

    pub fn with_user(mut self, user_id: &UserId) -> Self {
        self.user_id = Some(user_id.clone());
        self
    }

    pub fn with_event(mut self, event_id: &EventId) -> Self {
        self.event_id = Some(event_id.clone());
        self
    }

    pub fn detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = Some(at);
        self
    }
}

/// An alert as surfaced by the journal, stamped on receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAlert {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub alert: RiskAlert,
}
