use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;
mod command;

use cli::{Cli, Commands};
use command::RunOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = cli.provider_config()?;

    match cli.command {
        Some(Commands::Run {
            workers,
            views,
            warmup_ms,
            debuggable,
            command_line_file,
            trigger,
            fail,
        }) => {
            if let Some(warmup_ms) = warmup_ms {
                config.warmup_ms = warmup_ms;
            }
            if command_line_file.is_some() {
                config.command_line_file = command_line_file;
            }
            config.debuggable |= debuggable;

            command::run_engine(
                config,
                RunOptions {
                    workers,
                    views,
                    trigger,
                    fail,
                },
            )
            .await?;
        }
        Some(Commands::Status) => {
            command::run_status(&config).await?;
        }
        Some(Commands::Reset { yes }) => {
            command::run_reset(&config, yes).await?;
        }
        None => {
            // No command specified, show help
            eprintln!("No command specified. Use --help for usage information.");
            eprintln!("Use 'engine-startup run' to start a simulated engine.");
        }
    }

    Ok(())
}
