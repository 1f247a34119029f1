//! Tolk CLI entry point.

use anyhow::Result;
use clap::Parser;
use tolk::cli::{commands, Cli, Commands};
use tolk::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(Settings::expand_path)
        .unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load_from(Some(&config_path))?;

    // Initialize logging
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("tolk={}", log_level)),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Generate {
            input,
            output,
            target_language,
            start_stage,
            stop_after,
            mock_dir,
            quiet,
        } => {
            let options = commands::GenerateOptions {
                output,
                target_language,
                start_stage,
                stop_after,
                mock_dir,
                quiet,
            };
            commands::run_generate(&input, options, settings).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings, &config_path)?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, settings, &config_path)?;
        }
    }

    Ok(())
}
