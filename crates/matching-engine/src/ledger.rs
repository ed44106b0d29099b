//! User ledger client - trait and implementations
//!
//! The ledger owns coin balances. The engine only ever credits it, to
//! return the unmatched remainder of a cancelled bet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CoinKind, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger rejected credit: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Client trait for the user ledger - protocol agnostic
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserLedger: Send + Sync {
    /// Credit `amount` coins of `coin_kind` to `user_id`
    async fn credit(
        &self,
        user_id: &UserId,
        amount: u32,
        coin_kind: CoinKind,
        reason: &str,
    ) -> Result<(), LedgerError>;
}

/// A credit as seen by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCredit {
    pub user_id: UserId,
    pub amount: u32,
    pub coin_kind: CoinKind,
    pub reason: String,
    pub credited_at: DateTime<Utc>,
}

// ==================== In-memory Implementation ====================

/// In-memory ledger keeping balances and a journal of credits
#[derive(Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<(UserId, CoinKind), u64>>,
    credits: Mutex<Vec<LedgerCredit>>,
    failing: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent credits fail with [`LedgerError::Unavailable`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn balance(&self, user_id: &UserId, coin_kind: CoinKind) -> u64 {
        self.balances
            .lock()
            .get(&(user_id.clone(), coin_kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn credits(&self) -> Vec<LedgerCredit> {
        self.credits.lock().clone()
    }
}

#[async_trait]
impl UserLedger for InMemoryLedger {
    async fn credit(
        &self,
        user_id: &UserId,
        amount: u32,
        coin_kind: CoinKind,
        reason: &str,
    ) -> Result<(), LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("in-memory ledger marked failing".into()));
        }

        *self
            .balances
            .lock()
            .entry((user_id.clone(), coin_kind))
            .or_insert(0) += u64::from(amount);
        self.credits.lock().push(LedgerCredit {
            user_id: user_id.clone(),
            amount,
            coin_kind,
            reason: reason.to_string(),
            credited_at: Utc::now(),
        });
        Ok(())
    }
}

/// Create a ledger client based on configuration
pub fn create_ledger(
    config: &config::LedgerConfig,
) -> Result<std::sync::Arc<dyn UserLedger>, LedgerError> {
    match config.ledger_type.to_lowercase().as_str() {
        "inmemory" | "in_memory" | "memory" => Ok(std::sync::Arc::new(InMemoryLedger::new())),
        #[cfg(feature = "client")]
        "http" => {
            let http = config
                .http
                .as_ref()
                .ok_or_else(|| LedgerError::Rejected("ledger.http config is required".into()))?;
            Ok(std::sync::Arc::new(http::HttpLedgerClient::new(http)?))
        }
        other => Err(LedgerError::Rejected(format!(
            "ledger type '{}' is not available in this build",
            other
        ))),
    }
}

// ==================== HTTP Implementation ====================

#[cfg(feature = "client")]
pub mod http {
    use super::{LedgerError, UserLedger};
    use async_trait::async_trait;
    use common::{CoinKind, UserId};
    use config::HttpLedgerConfig;
    use reqwest::Client;
    use std::time::Duration;
    use tracing::debug;

    /// HTTP-based ledger client
    pub struct HttpLedgerClient {
        client: Client,
        base_url: String,
        api_key: Option<String>,
    }

    impl HttpLedgerClient {
        pub fn new(config: &HttpLedgerConfig) -> Result<Self, LedgerError> {
            let client = Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            Ok(Self {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: config.api_key.clone(),
            })
        }
    }

    #[async_trait]
    impl UserLedger for HttpLedgerClient {
        async fn credit(
            &self,
            user_id: &UserId,
            amount: u32,
            coin_kind: CoinKind,
            reason: &str,
        ) -> Result<(), LedgerError> {
            let url = format!("{}/api/v1/ledger/credits", self.base_url);

            let mut request = self.client.post(&url).json(&serde_json::json!({
                "user_id": user_id,
                "amount": amount,
                "coin_kind": coin_kind,
                "reason": reason,
            }));
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(LedgerError::Unavailable(format!("{}: {}", status, body)));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LedgerError::Rejected(format!("{}: {}", status, body)));
            }

            debug!(user_id = %user_id, amount, %coin_kind, "Ledger credit accepted");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_credit_accumulates() {
        let ledger = InMemoryLedger::new();
        let alice = UserId::new("alice");

        ledger.credit(&alice, 30, CoinKind::Stakes, "refund").await.unwrap();
        ledger.credit(&alice, 5, CoinKind::Stakes, "refund").await.unwrap();
        ledger.credit(&alice, 7, CoinKind::Play, "refund").await.unwrap();

        assert_eq!(ledger.balance(&alice, CoinKind::Stakes), 35);
        assert_eq!(ledger.balance(&alice, CoinKind::Play), 7);
        assert_eq!(ledger.credits().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_ledger_records_nothing() {
        let ledger = InMemoryLedger::new();
        ledger.set_failing(true);

        let err = ledger
            .credit(&UserId::new("bob"), 10, CoinKind::Play, "refund")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(ledger.credits().is_empty());
    }

    #[test]
    fn test_create_in_memory_ledger() {
        assert!(create_ledger(&config::LedgerConfig::default()).is_ok());

        let unknown = config::LedgerConfig {
            ledger_type: "carrier-pigeon".into(),
            http: None,
        };
        assert!(create_ledger(&unknown).is_err());
    }
}
