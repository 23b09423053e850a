use clap::Parser;
use mids_trigger::cli::{Cli, Commands};
use mids_trigger::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    match cli.command {
        Commands::Run(args) => {
            mids_trigger::telemetry::init_telemetry(&config.telemetry)?;
            tracing::info!(
                environment = %config.feed.environment,
                symbols = ?config.feed.symbols,
                "Starting mids-trigger"
            );
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
