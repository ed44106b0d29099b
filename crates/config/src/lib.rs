use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root of `wagerline.yaml`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub limits: BetLimitsConfig,
    #[serde(default)]
    pub cancellation: CancellationConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub description: String,
    pub version: String,
}

/// Matching engine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Upper bound on every bet store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Compare-and-swap attempts per candidate before a conflict is surfaced
    #[serde(default = "default_conflict_retry_attempts")]
    pub conflict_retry_attempts: u32,
    #[serde(default = "default_conflict_backoff_base_ms")]
    pub conflict_backoff_base_ms: u64,
    #[serde(default = "default_conflict_backoff_max_ms")]
    pub conflict_backoff_max_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            conflict_retry_attempts: default_conflict_retry_attempts(),
            conflict_backoff_base_ms: default_conflict_backoff_base_ms(),
            conflict_backoff_max_ms: default_conflict_backoff_max_ms(),
        }
    }
}

/// Wager validation limits applied at placement
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BetLimitsConfig {
    #[serde(default = "default_min_wager")]
    pub min_wager: u32,
    #[serde(default = "default_max_wager")]
    pub max_wager: u32,
    /// Max stakes coins a user may wager per UTC day
    #[serde(default = "default_daily_stakes_cap")]
    pub daily_stakes_cap: u32,
    #[serde(default = "default_payout_per_mille")]
    pub payout_per_mille: u32,
}

impl Default for BetLimitsConfig {
    fn default() -> Self {
        Self {
            min_wager: default_min_wager(),
            max_wager: default_max_wager(),
            daily_stakes_cap: default_daily_stakes_cap(),
            payout_per_mille: default_payout_per_mille(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancellationConfig {
    /// Spread drift (in points) beyond which callers should offer cancellation
    #[serde(default = "default_spread_drift_threshold")]
    pub spread_drift_threshold: f64,
    #[serde(default = "default_conflict_retry_attempts")]
    pub conflict_retry_attempts: u32,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            spread_drift_threshold: default_spread_drift_threshold(),
            conflict_retry_attempts: default_conflict_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
    #[serde(default)]
    pub score: ScoreConfig,
    #[serde(default)]
    pub health: HealthThresholdsConfig,
    /// Alerts kept in memory for the monitor to surface
    #[serde(default = "default_alert_retention")]
    pub alert_retention: usize,
    #[serde(default = "default_volume_window_seconds")]
    pub volume_window_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval_seconds(),
            score: ScoreConfig::default(),
            health: HealthThresholdsConfig::default(),
            alert_retention: default_alert_retention(),
            volume_window_seconds: default_volume_window_seconds(),
        }
    }
}

/// Matching score normalization caps and weights
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoreConfig {
    #[serde(default = "default_time_in_queue_cap_seconds")]
    pub time_in_queue_cap_seconds: u64,
    #[serde(default = "default_wager_size_cap")]
    pub wager_size_cap: u32,
    #[serde(default = "default_candidate_count_cap")]
    pub candidate_count_cap: u32,
    #[serde(default = "default_time_weight")]
    pub time_weight: f64,
    #[serde(default = "default_size_weight")]
    pub size_weight: f64,
    #[serde(default = "default_candidate_weight")]
    pub candidate_weight: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            time_in_queue_cap_seconds: default_time_in_queue_cap_seconds(),
            wager_size_cap: default_wager_size_cap(),
            candidate_count_cap: default_candidate_count_cap(),
            time_weight: default_time_weight(),
            size_weight: default_size_weight(),
            candidate_weight: default_candidate_weight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthThresholdsConfig {
    #[serde(default = "default_latency_degraded_ms")]
    pub latency_degraded_ms: u64,
    #[serde(default = "default_latency_critical_ms")]
    pub latency_critical_ms: u64,
    #[serde(default = "default_error_rate_degraded")]
    pub error_rate_degraded: f64,
    #[serde(default = "default_error_rate_critical")]
    pub error_rate_critical: f64,
}

impl Default for HealthThresholdsConfig {
    fn default() -> Self {
        Self {
            latency_degraded_ms: default_latency_degraded_ms(),
            latency_critical_ms: default_latency_critical_ms(),
            error_rate_degraded: default_error_rate_degraded(),
            error_rate_critical: default_error_rate_critical(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// `inmemory` or `redis`
    #[serde(rename = "type")]
    #[serde(default = "default_store_type")]
    pub store_type: String,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_index: u8,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// `inmemory` or `http`
    #[serde(rename = "type")]
    #[serde(default = "default_ledger_type")]
    pub ledger_type: String,
    #[serde(default)]
    pub http: Option<HttpLedgerConfig>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_type: default_ledger_type(),
            http: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpLedgerConfig {
    pub base_url: String,
    #[serde(default = "default_ledger_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `pretty`, `json` or `compact`
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}
