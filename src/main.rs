mod analysis;
mod cli;
mod config;
mod error;
mod export;
mod extract;
mod llm;
mod models;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::commands::analyze::AnalyzeArgs;
use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing - only show warnings by default, use RUST_LOG=info for more detail
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cli::commands::init::run(force).await?;
        }
        Commands::Providers => {
            cli::commands::providers::run().await?;
        }
        Commands::Analyze {
            question,
            context,
            backend,
            output,
            timeout,
            deadline,
            check_urls,
        } => {
            cli::commands::analyze::run(AnalyzeArgs {
                question,
                context,
                backends: backend,
                output,
                timeout,
                deadline,
                check_urls,
            })
            .await?;
        }
    }

    Ok(())
}
