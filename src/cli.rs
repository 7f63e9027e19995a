//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Campus Breaker - adaptive circuit breaker tooling
#[derive(Parser, Debug)]
#[command(name = "campus-breaker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CAMPUS_BREAKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CAMPUS_BREAKER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CAMPUS_BREAKER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive a breaker with simulated traffic against a flaky dependency
    Simulate(SimulateArgs),

    /// Validate the configuration
    Check,

    /// Print the effective configuration as YAML
    Config,
}

/// Options for `simulate`
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Breaker name (selects a configured override)
    #[arg(long, default_value = "activity-rpc")]
    pub name: String,

    /// Concurrent callers
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Fraction of dependency calls that fail, in [0, 1]
    #[arg(long, default_value_t = 0.6)]
    pub failure_ratio: f64,

    /// Dependency becomes healthy after this long (e.g. "20s")
    #[arg(long, value_parser = humantime_parse)]
    pub recover_after: Option<std::time::Duration>,

    /// Total run time (e.g. "30s")
    #[arg(long, default_value = "30s", value_parser = humantime_parse)]
    pub duration: std::time::Duration,

    /// Pause between calls of one worker (e.g. "10ms")
    #[arg(long, default_value = "10ms", value_parser = humantime_parse)]
    pub interval: std::time::Duration,

    /// How often breaker state is reported (e.g. "1s")
    #[arg(long, default_value = "1s", value_parser = humantime_parse)]
    pub report_every: std::time::Duration,

    /// Output format for the final report (text, json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

fn humantime_parse(s: &str) -> Result<std::time::Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
