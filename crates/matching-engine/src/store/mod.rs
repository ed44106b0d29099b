//! Store module for the Matching Engine
//!
//! This module provides the bet store trait and implementations.

mod memory;
mod redis;
mod traits;

pub use memory::InMemoryBetStore;
pub use redis::RedisBetStore;
pub use traits::*;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Store type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// In-memory store (fast, non-persistent)
    InMemory,
    /// Redis store (persistent)
    Redis,
}

impl StoreType {
    /// Parse store type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inmemory" | "in_memory" | "memory" => Some(StoreType::InMemory),
            "redis" => Some(StoreType::Redis),
            _ => None,
        }
    }
}

/// Create a store based on configuration
pub async fn create_store(config: &config::StoreConfig) -> StoreResult<Arc<dyn BetStore>> {
    let store_type = StoreType::parse(&config.store_type).ok_or_else(|| {
        StoreError::Backend(format!("unknown store type '{}'", config.store_type))
    })?;

    match store_type {
        StoreType::InMemory => {
            info!("Creating in-memory bet store");
            Ok(Arc::new(InMemoryBetStore::new()))
        }
        StoreType::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| StoreError::Backend("Redis config required for Redis store".into()))?;
            info!("Creating Redis bet store");
            Ok(Arc::new(RedisBetStore::new(redis).await?))
        }
    }
}

/// Run a store call under a deadline
///
/// A call that does not finish in time surfaces as
/// [`StoreError::Unavailable`]; the underlying operation is dropped.
pub async fn bounded<T, F>(timeout: Duration, op: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "{} timed out after {}ms",
            op,
            timeout.as_millis()
        ))),
    }
}
