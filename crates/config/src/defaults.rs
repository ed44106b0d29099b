// Engine

pub fn default_store_timeout_ms() -> u64 {
    2_000
}

pub fn default_conflict_retry_attempts() -> u32 {
    3
}

pub fn default_conflict_backoff_base_ms() -> u64 {
    10
}

pub fn default_conflict_backoff_max_ms() -> u64 {
    200
}

// Bet limits

pub fn default_min_wager() -> u32 {
    1
}

pub fn default_max_wager() -> u32 {
    100
}

pub fn default_daily_stakes_cap() -> u32 {
    100
}

/// Payout per 1000 coins wagered at symmetric -110 odds
pub fn default_payout_per_mille() -> u32 {
    909
}

// Cancellation

pub fn default_spread_drift_threshold() -> f64 {
    1.0
}

// Monitor

pub fn default_refresh_interval_seconds() -> u64 {
    5
}

pub fn default_time_in_queue_cap_seconds() -> u64 {
    3_600
}

pub fn default_wager_size_cap() -> u32 {
    100
}

pub fn default_candidate_count_cap() -> u32 {
    5
}

pub fn default_time_weight() -> f64 {
    0.4
}

pub fn default_size_weight() -> f64 {
    0.3
}

pub fn default_candidate_weight() -> f64 {
    0.3
}

pub fn default_latency_degraded_ms() -> u64 {
    250
}

pub fn default_latency_critical_ms() -> u64 {
    1_000
}

pub fn default_error_rate_degraded() -> f64 {
    0.05
}

pub fn default_error_rate_critical() -> f64 {
    0.20
}

pub fn default_alert_retention() -> usize {
    500
}

pub fn default_volume_window_seconds() -> u64 {
    3_600
}

// Store / ledger

pub fn default_store_type() -> String {
    "inmemory".to_string()
}

pub fn default_ledger_type() -> String {
    "inmemory".to_string()
}

pub fn default_redis_port() -> u16 {
    6379
}

pub fn default_redis_key_prefix() -> String {
    "wager".to_string()
}

pub fn default_ledger_timeout_ms() -> u64 {
    3_000
}

// API / logging / metrics

pub fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_api_port() -> u16 {
    8080
}

pub fn default_enabled() -> bool {
    true
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_metrics_port() -> u16 {
    9100
}
