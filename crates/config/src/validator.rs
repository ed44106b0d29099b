use crate::*;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Service name is required")]
    MissingServiceName,

    #[error("Invalid version format: {0}. Must be in format X.Y.Z (e.g., 1.0.0)")]
    InvalidVersionFormat(String),

    #[error("Wager limits: {message}")]
    InvalidLimits { message: String },

    #[error("Engine: {message}")]
    InvalidEngine { message: String },

    #[error("Cancellation: {message}")]
    InvalidCancellation { message: String },

    #[error("Monitor: {message}")]
    InvalidMonitor { message: String },

    #[error("Store: {message}")]
    InvalidStore { message: String },

    #[error("Ledger: {message}")]
    InvalidLedger { message: String },

    #[error("Invalid log format '{0}'. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_service(&config.service, &mut report);
    validate_engine(&config.engine, &mut report);
    validate_limits(&config.limits, &mut report);
    validate_cancellation(&config.cancellation, &mut report);
    validate_monitor(&config.monitor, &mut report);
    validate_store(&config.store, &mut report);
    validate_ledger(&config.ledger, &mut report);
    validate_logging(&config.logging, &mut report);

    if config.metrics.enabled && config.api.enabled && config.metrics.port == config.api.port {
        report.add_warning(
            "metrics.port",
            "metrics exporter and admin API share a port; one of them will fail to bind",
        );
    }

    report
}

fn validate_service(service: &ServiceConfig, report: &mut ValidationReport) {
    if service.name.trim().is_empty() {
        report.add_error(ValidationError::MissingServiceName);
    }

    let version_ok = Regex::new(r"^\d+\.\d+\.\d+$")
        .map(|re| re.is_match(&service.version))
        .unwrap_or(false);
    if !version_ok {
        report.add_error(ValidationError::InvalidVersionFormat(service.version.clone()));
    }
}

fn validate_engine(engine: &EngineConfig, report: &mut ValidationReport) {
    if engine.store_timeout_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "engine.store_timeout_ms".to_string(),
        });
    }
    if engine.conflict_retry_attempts == 0 {
        report.add_error(ValidationError::InvalidEngine {
            message: "conflict_retry_attempts must allow at least one attempt".to_string(),
        });
    }
    if engine.conflict_backoff_base_ms > engine.conflict_backoff_max_ms {
        report.add_error(ValidationError::InvalidEngine {
            message: format!(
                "conflict_backoff_base_ms ({}) exceeds conflict_backoff_max_ms ({})",
                engine.conflict_backoff_base_ms, engine.conflict_backoff_max_ms
            ),
        });
    }
    if engine.store_timeout_ms > 30_000 {
        report.add_warning(
            "engine.store_timeout_ms",
            "store timeouts above 30s let callers hang well past the expected bound",
        );
    }
}

fn validate_limits(limits: &BetLimitsConfig, report: &mut ValidationReport) {
    if limits.min_wager == 0 {
        report.add_error(ValidationError::InvalidLimits {
            message: "min_wager must be at least 1".to_string(),
        });
    }
    if limits.min_wager > limits.max_wager {
        report.add_error(ValidationError::InvalidLimits {
            message: format!(
                "min_wager ({}) exceeds max_wager ({})",
                limits.min_wager, limits.max_wager
            ),
        });
    }
    if limits.daily_stakes_cap < limits.min_wager {
        report.add_error(ValidationError::InvalidLimits {
            message: "daily_stakes_cap is below min_wager; no stakes bet could ever be placed"
                .to_string(),
        });
    }
    if limits.payout_per_mille == 0 || limits.payout_per_mille > 1_000 {
        report.add_error(ValidationError::InvalidLimits {
            message: format!(
                "payout_per_mille must be in 1..=1000, got {}",
                limits.payout_per_mille
            ),
        });
    }
    if limits.payout_per_mille != default_payout_per_mille() {
        report.add_warning(
            "limits.payout_per_mille",
            "payout multiplier differs from symmetric -110 odds (909)",
        );
    }
}

fn validate_cancellation(cancellation: &CancellationConfig, report: &mut ValidationReport) {
    if !cancellation.spread_drift_threshold.is_finite() || cancellation.spread_drift_threshold <= 0.0 {
        report.add_error(ValidationError::InvalidCancellation {
            message: format!(
                "spread_drift_threshold must be a positive number, got {}",
                cancellation.spread_drift_threshold
            ),
        });
    }
    if cancellation.conflict_retry_attempts == 0 {
        report.add_error(ValidationError::InvalidCancellation {
            message: "conflict_retry_attempts must allow at least one attempt".to_string(),
        });
    }
}

fn validate_monitor(monitor: &MonitorConfig, report: &mut ValidationReport) {
    if monitor.refresh_interval_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "monitor.refresh_interval_seconds".to_string(),
        });
    }
    if monitor.volume_window_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "monitor.volume_window_seconds".to_string(),
        });
    }

    let score = &monitor.score;
    if score.time_in_queue_cap_seconds == 0 || score.wager_size_cap == 0 || score.candidate_count_cap == 0 {
        report.add_error(ValidationError::InvalidMonitor {
            message: "score normalization caps must be positive".to_string(),
        });
    }
    let weights = [score.time_weight, score.size_weight, score.candidate_weight];
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        report.add_error(ValidationError::InvalidMonitor {
            message: "score weights must be non-negative".to_string(),
        });
    } else if (weights.iter().sum::<f64>() - 1.0).abs() > 1e-6 {
        report.add_warning(
            "monitor.score",
            "score weights do not sum to 1.0; scores will leave the [0,1] range",
        );
    }

    let health = &monitor.health;
    if health.latency_degraded_ms > health.latency_critical_ms {
        report.add_error(ValidationError::InvalidMonitor {
            message: "health.latency_degraded_ms exceeds latency_critical_ms".to_string(),
        });
    }
    if health.error_rate_degraded > health.error_rate_critical
        || !(0.0..=1.0).contains(&health.error_rate_critical)
    {
        report.add_error(ValidationError::InvalidMonitor {
            message: "health error rates must satisfy 0 <= degraded <= critical <= 1".to_string(),
        });
    }
    if monitor.alert_retention == 0 {
        report.add_warning("monitor.alert_retention", "alerts will not be retained");
    }
}

fn validate_store(store: &StoreConfig, report: &mut ValidationReport) {
    match store.store_type.to_lowercase().as_str() {
        "inmemory" | "in_memory" | "memory" => {
            report.add_warning(
                "store.type",
                "in-memory bet store is not durable and is not shared between processes",
            );
        }
        "redis" => match &store.redis {
            None => report.add_error(ValidationError::InvalidStore {
                message: "store.type is redis but store.redis is missing".to_string(),
            }),
            Some(redis) => {
                if redis.host.trim().is_empty() {
                    report.add_error(ValidationError::InvalidStore {
                        message: "redis.host is required".to_string(),
                    });
                }
                if has_unresolved_env_vars(&redis.host) || has_unresolved_env_vars(&redis.password) {
                    report.add_error(ValidationError::InvalidStore {
                        message: "redis settings reference unset environment variables".to_string(),
                    });
                }
                if redis.key_prefix.is_empty() {
                    report.add_default("store.redis.key_prefix", &default_redis_key_prefix());
                }
            }
        },
        other => report.add_error(ValidationError::InvalidStore {
            message: format!("unknown store type '{}'. Must be one of: inmemory, redis", other),
        }),
    }
}

fn validate_ledger(ledger: &LedgerConfig, report: &mut ValidationReport) {
    match ledger.ledger_type.to_lowercase().as_str() {
        "inmemory" | "in_memory" | "memory" => {
            report.add_warning(
                "ledger.type",
                "in-memory ledger: refunds are not delivered to real balances",
            );
        }
        "http" => match &ledger.http {
            None => report.add_error(ValidationError::InvalidLedger {
                message: "ledger.type is http but ledger.http is missing".to_string(),
            }),
            Some(http) => {
                if has_unresolved_env_vars(&http.base_url) {
                    report.add_error(ValidationError::InvalidLedger {
                        message: format!("base_url '{}' has unresolved variables", http.base_url),
                    });
                } else if let Err(e) = url::Url::parse(&http.base_url) {
                    report.add_error(ValidationError::InvalidLedger {
                        message: format!("invalid base_url '{}': {}", http.base_url, e),
                    });
                }
                if http.timeout_ms == 0 {
                    report.add_error(ValidationError::InvalidPositiveInteger {
                        field: "ledger.http.timeout_ms".to_string(),
                    });
                }
            }
        },
        other => report.add_error(ValidationError::InvalidLedger {
            message: format!("unknown ledger type '{}'. Must be one of: inmemory, http", other),
        }),
    }
}

fn validate_logging(logging: &LoggingConfig, report: &mut ValidationReport) {
    if !matches!(
        logging.format.to_lowercase().as_str(),
        "pretty" | "json" | "compact"
    ) {
        report.add_error(ValidationError::InvalidLogFormat(logging.format.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_config() -> MasterConfig {
        let mut config = generate_default_config();
        config.store = StoreConfig::default();
        config.ledger = LedgerConfig::default();
        config
    }

    #[test]
    fn test_in_memory_config_is_valid_with_warnings() {
        let report = validate_config(&in_memory_config());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.iter().any(|w| w.field == "store.type"));
        assert!(report.warnings.iter().any(|w| w.field == "ledger.type"));
    }

    #[test]
    fn test_unresolved_env_vars_are_errors() {
        // The generated config points at ${WAGER_*} placeholders.
        let report = validate_config(&generate_default_config());
        assert!(!report.is_valid());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidLedger { .. })));
    }

    #[test]
    fn test_inverted_wager_limits() {
        let mut config = in_memory_config();
        config.limits.min_wager = 50;
        config.limits.max_wager = 10;

        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidLimits { .. })));
    }

    #[test]
    fn test_health_thresholds_must_be_ordered() {
        let mut config = in_memory_config();
        config.monitor.health.latency_degraded_ms = 5_000;

        let report = validate_config(&config);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_unknown_store_type() {
        let mut config = in_memory_config();
        config.store.store_type = "postgres".to_string();

        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidStore { .. })));
    }

    #[test]
    fn test_bad_log_format() {
        let mut config = in_memory_config();
        config.logging.format = "xml".to_string();
        assert!(!validate_config(&config).is_valid());
    }
}
