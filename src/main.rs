use clap::Parser;
use stop_guard::cli::{Cli, Commands};
use stop_guard::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration; only a missing file falls back to defaults
    let config = Config::load_or_default(&cli.config)?;

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    // Initialize telemetry
    let _telemetry = stop_guard::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting stop monitoring");
            args.execute(config).await?;
        }
        Commands::Check(args) => {
            args.execute(config).await?;
        }
        Commands::Config => {}
    }

    Ok(())
}
