//! Wagerline CLI and Server Binary
//!
//! Entry point for initializing and validating configuration, serving the
//! matching engine with its admin API, and replaying scripted sessions.

mod services;
mod shutdown;
mod simulate;

use anyhow::{Context, Result};
use cli::{Cli, Commands, Scenario};
use config::{generate_default_config, load_config, save_config, validate_config, MasterConfig};
use observability::{init_logging, init_metrics, LogFormat};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use services::Services;
use shutdown::ShutdownController;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Serve {
            config,
            http,
            metrics,
        } => serve_command(config, http, metrics).await,
        Commands::Validate { config } => {
            init_logging("wagerline", LogFormat::Pretty, "info")?;
            info!("Executing 'validate' command");
            validate_command(config).await
        }
        Commands::Init { output } => {
            init_logging("wagerline", LogFormat::Pretty, "info")?;
            info!("Executing 'init' command");
            init_command(output).await
        }
        Commands::Simulate { config, scenario } => {
            init_logging("wagerline", LogFormat::Compact, "warn")?;
            simulate_command(config, scenario).await
        }
    }
}

/// Load and validate, logging warnings and failing on errors
fn load_checked(config_path: &Path) -> Result<MasterConfig> {
    let config = load_config(config_path)?;
    let report = validate_config(&config);

    if !report.warnings.is_empty() {
        warn!("Configuration warnings:");
        for warning in &report.warnings {
            warn!(field = %warning.field, message = %warning.message);
        }
    }

    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start due to configuration errors");
    }
    Ok(config)
}

async fn serve_command(
    config_path: PathBuf,
    http_override: Option<u16>,
    metrics_override: Option<u16>,
) -> Result<()> {
    // Logging settings live in the config, so it is read before logging starts.
    let mut config = load_config(&config_path)?;
    let format = LogFormat::parse(&config.logging.format).unwrap_or_default();
    init_logging(&config.service.name, format, &config.logging.level)?;
    config = load_checked(&config_path)?;

    if let Some(port) = http_override {
        debug!(port, "Overriding admin API port");
        config.api.port = port;
    }
    if let Some(port) = metrics_override {
        debug!(port, "Overriding metrics port");
        config.metrics.port = port;
        config.metrics.enabled = true;
    }

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let services = Services::connect(&config).await?;
    let shutdown = ShutdownController::with_ctrl_c();

    let refresh = Duration::from_secs(config.monitor.refresh_interval_seconds.max(1));
    let monitor_task = services
        .monitor
        .clone()
        .spawn_refresh_loop(refresh, shutdown.child_token());

    info!(
        service = %config.service.name,
        version = %config.service.version,
        api = config.api.enabled,
        metrics = config.metrics.enabled,
        "Wagerline started"
    );

    if config.api.enabled {
        let addr = format!("{}:{}", config.api.host, config.api.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind admin API on {}", addr))?;
        info!(%addr, "Admin API listening");

        let router = matching_engine::api::create_router(services.api_state());
        let token = shutdown.child_token();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("Admin API server failed")?;
    } else {
        shutdown.wait_for_shutdown().await;
    }

    // The API may stop on its own error; make sure the monitor loop follows.
    shutdown.shutdown();
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "Monitor loop did not stop cleanly");
    }

    info!(events = services.journal.sequence(), "Wagerline stopped");
    Ok(())
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {}", config.service.name);
    println!("Version: {}", config.service.version);
    println!("Store: {}", config.store.store_type);
    println!("Ledger: {}", config.ledger.ledger_type);
    println!(
        "Wager limits: {}-{} coins, {} stakes coins per day",
        config.limits.min_wager, config.limits.max_wager, config.limits.daily_stakes_cap
    );

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Set WAGER_REDIS_HOST, WAGER_REDIS_PASSWORD and WAGER_LEDGER_URL");
    println!(
        "  2. Run 'wagerline validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  3. Run 'wagerline serve --config {:?}' to start the engine",
        output_path
    );

    Ok(())
}

async fn simulate_command(config_path: Option<PathBuf>, scenario: Scenario) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => generate_default_config(),
    };

    let outcome = simulate::run(&config, scenario).await?;
    println!("{}", simulate::render(scenario, &outcome)?);
    Ok(())
}
