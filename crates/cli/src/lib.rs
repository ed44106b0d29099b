use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wagerline")]
#[command(about = "Wagerline - peer-to-peer bet matching engine")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the matching engine, queue monitor and admin API
    Serve {
        /// Path to the configuration file
        #[arg(short, long, default_value = "master_config/wagerline.yaml")]
        config: PathBuf,

        /// Override admin API port
        #[arg(long)]
        http: Option<u16>,

        /// Override metrics exporter port
        #[arg(long)]
        metrics: Option<u16>,
    },

    /// Validate configuration without starting the engine
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "master_config/wagerline.yaml")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "wagerline.yaml")]
        output: PathBuf,
    },

    /// Run a scripted matching session against in-memory adapters
    Simulate {
        /// Optional configuration file; limits and scoring are taken from it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Scenario to replay
        #[arg(short, long, value_enum, default_value = "split")]
        scenario: Scenario,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// Two equal opposing bets fill each other
    Exact,
    /// One large bet is filled by two smaller ones in FIFO order
    Split,
    /// Partial fill followed by cancellation and refund
    Cancel,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Exact => "exact",
            Scenario::Split => "split",
            Scenario::Cancel => "cancel",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_overrides() {
        let cli = Cli::parse_from(["wagerline", "serve", "--http", "9000"]);
        match cli.command {
            Commands::Serve { config, http, metrics } => {
                assert_eq!(config, PathBuf::from("master_config/wagerline.yaml"));
                assert_eq!(http, Some(9000));
                assert_eq!(metrics, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn simulate_defaults_to_split() {
        let cli = Cli::parse_from(["wagerline", "simulate"]);
        match cli.command {
            Commands::Simulate { config, scenario } => {
                assert!(config.is_none());
                assert_eq!(scenario, Scenario::Split);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
