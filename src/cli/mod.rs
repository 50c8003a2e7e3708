//! Command line for inspecting the provider data set.
//!
//! Builds a handler from the config, waits for the full load and prints what
//! the launcher would see.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::handler::DataHandler;
use crate::search::Searcher;
use crate::store::HistoryMode;

#[derive(Parser)]
#[command(name = "nova-data")]
#[command(about = "Inspect Nova's providers, search results and history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/nova/data.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// How long to wait for every provider to load
    #[arg(long, global = true, default_value_t = 10_000, value_name = "MS")]
    pub timeout_ms: u64,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search every loaded provider
    Query {
        text: String,

        /// Maximum results to print
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show ranked history
    History {
        /// Number of entries (default from config)
        #[arg(long)]
        count: Option<usize>,

        /// recency, frequency, frecency or adaptive
        #[arg(long)]
        mode: Option<String>,

        /// Sort the entries by name
        #[arg(long)]
        alpha: bool,
    },

    /// List registered providers and their load state
    Providers,
}

/// Parse arguments and run the command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    crate::logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let history_settings = config.history.clone();
    let max_results = config.search.max_results;

    let handler = DataHandler::new(config).context("failed to start data handler")?;
    let timeout = Duration::from_millis(cli.timeout_ms);
    match tokio::time::timeout(timeout, handler.wait_for_full_load()).await {
        Ok(result) => result.context("load was interrupted")?,
        Err(_) => tracing::warn!(timeout_ms = cli.timeout_ms, "not every provider loaded in time"),
    }

    match cli.command {
        Commands::Query { text, limit } => {
            let searcher = Searcher::new(limit.unwrap_or(max_results));
            handler.request_results(&text, &searcher);
            for entry in searcher.ranked_results() {
                match &entry.description {
                    Some(description) => println!("{}\t{}\t{}", entry.id, entry.name, description),
                    None => println!("{}\t{}", entry.id, entry.name),
                }
            }
        }
        Commands::History { count, mode, alpha } => {
            let exclude: HashSet<String> = history_settings.excluded.into_iter().collect();
            let mode = mode
                .as_deref()
                .map(HistoryMode::from_name)
                .unwrap_or(history_settings.mode);
            let entries = handler.get_history(
                count.unwrap_or(history_settings.item_count),
                mode,
                alpha || history_settings.sort_alphabetically,
                &exclude,
            );
            for entry in entries {
                println!("{}\t{}", entry.id, entry.name);
            }
        }
        Commands::Providers => {
            for slot in handler.registry().snapshot() {
                let state = match &slot.provider {
                    None => "pending".to_string(),
                    Some(provider) if provider.is_loaded() => format!("loaded ({})", provider.load_step()),
                    Some(provider) => format!("loading ({})", provider.load_step()),
                };
                println!("{:<12} {}", slot.name, state);
            }
        }
    }

    handler.shutdown().await?;
    Ok(())
}
