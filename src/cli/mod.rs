pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::llm::BackendKind;

#[derive(Parser)]
#[command(name = "sourcelens")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ask several LLMs the same question and map the sources, brands and sentiment they agree on", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long, default_value = "false")]
        force: bool,
    },

    /// List configured backends, their models and availability
    #[command(long_about = "List configured backends, their models and availability.\n\n\
        Hosted backends read their API keys from the config file, which may\n\
        reference environment variables (${OPENAI_API_KEY}, ${ANTHROPIC_API_KEY},\n\
        ${GOOGLE_API_KEY}). Ollama is only used when it has a config section.\n\n\
        The config file lives at ~/.config/sourcelens/config.toml.")]
    Providers,

    /// Query every available backend and consolidate sources, brands and sentiment
    Analyze {
        /// The question to ask every backend
        #[arg(required = true)]
        question: String,

        /// Optional context appended to the question (market, country, audience)
        #[arg(short, long, default_value = "")]
        context: String,

        /// Restrict the run to these backends (repeatable)
        #[arg(short, long, value_enum)]
        backend: Vec<BackendKind>,

        /// Write the full report as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Per-call timeout in seconds
        #[arg(long, env = "SOURCELENS_TIMEOUT")]
        timeout: Option<u64>,

        /// Overall pipeline deadline in seconds (0 disables it)
        #[arg(long, env = "SOURCELENS_DEADLINE")]
        deadline: Option<u64>,

        /// Send a HEAD request to every extracted URL
        #[arg(long, default_value = "false")]
        check_urls: bool,
    },
}
