//! Campus Breaker - circuit breaker tooling for the campus activity services

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use campus_breaker::{
    cli::{Cli, Command, SimulateArgs},
    config::Config,
    failsafe::{BreakerRegistry, Context},
    setup_tracing,
    simulate::{SimulationSettings, run_simulation},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Check => {
            println!(
                "Configuration OK ({} override(s))",
                config.breakers.overrides.len()
            );
            ExitCode::SUCCESS
        }
        Command::Config => match serde_yaml::to_string(&config) {
            Ok(yaml) => {
                print!("{yaml}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize configuration: {e}");
                ExitCode::FAILURE
            }
        },
        Command::Simulate(args) => match run_simulate(&config, &args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Simulation failed: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Run the `simulate` subcommand
async fn run_simulate(config: &Config, args: &SimulateArgs) -> anyhow::Result<()> {
    let registry = BreakerRegistry::new(&config.breakers);
    let breaker = registry.get_or_create(&args.name)?;

    let root = Context::background();
    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping simulation");
            interrupt.cancel();
        }
    });

    let report = run_simulation(breaker, &SimulationSettings::from(args), &root).await?;
    registry.shutdown();

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
