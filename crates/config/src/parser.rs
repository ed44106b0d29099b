use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    let substituted = substitution::substitute_env_vars(&content)?;

    let config: MasterConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(service = %config.service.name, "Configuration loaded");
    Ok(config)
}

/// Configuration written by `wagerline init`
#[instrument]
pub fn generate_default_config() -> MasterConfig {
    MasterConfig {
        service: ServiceConfig {
            name: "Wagerline".to_string(),
            description: "Peer-to-peer bet matching engine".to_string(),
            version: "0.1.0".to_string(),
        },
        engine: EngineConfig::default(),
        limits: BetLimitsConfig::default(),
        cancellation: CancellationConfig::default(),
        monitor: MonitorConfig::default(),
        store: StoreConfig {
            store_type: "redis".to_string(),
            redis: Some(RedisConfig {
                host: "${WAGER_REDIS_HOST}".to_string(),
                port: default_redis_port(),
                password: "${WAGER_REDIS_PASSWORD}".to_string(),
                db_index: 0,
                key_prefix: default_redis_key_prefix(),
            }),
        },
        ledger: LedgerConfig {
            ledger_type: "http".to_string(),
            http: Some(HttpLedgerConfig {
                base_url: "${WAGER_LEDGER_URL}".to_string(),
                timeout_ms: default_ledger_timeout_ms(),
                api_key: None,
            }),
        },
        api: ApiConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MasterConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved");
    Ok(())
}
