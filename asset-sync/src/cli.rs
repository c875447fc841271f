/// # asset-sync CLI Interface (Module)
///
/// This module implements the CLI interface for asset-sync: command parsing,
/// wiring of the concrete store and fetcher, and the async entrypoint.
///
/// All pipeline logic (chunking, batch sessions, retry, orchestration) lives in
/// the [`asset-sync-core`] crate. This module is strictly CLI glue.
///
/// ## How To Use
/// - For command-line users: use the installed `asset-sync` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`asset-sync-core`]: ../../asset-sync-core/
use crate::load_config::{load_config, CliConfig};
use crate::store_client::HttpAssetStore;
use anyhow::{Context, Result};
use asset_sync_core::contract::{AssetStore, TokioSleeper};
use asset_sync_core::fetch::{DedupFetcher, HttpFetcher};
use asset_sync_core::synchronise::{CancellationFlag, Synchroniser};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for asset-sync: copy media into a batch-oriented asset store.
#[derive(Parser)]
#[clap(
    name = "asset-sync",
    version,
    about = "Copy content-addressed media into a batch-oriented asset store, in chunks"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload every configured asset that the store does not hold yet
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// List the assets currently held by the configured store
    List {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn connect(config: &CliConfig) -> Result<HttpAssetStore> {
    HttpAssetStore::new_from_env(&config.store.url)
        .map_err(|e| anyhow::anyhow!("Failed to construct asset store client: {e}"))
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", "Starting synchronisation process");
            let session_config = config
                .sync
                .validate()
                .context("Invalid sync settings")?;
            let descriptors = config.descriptors()?;
            let store = connect(&config)?;
            let fetcher = DedupFetcher::new(
                HttpFetcher::new(&config.sync.fetch).context("Failed to construct fetcher")?,
            );

            let cancel = CancellationFlag::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling after the current step");
                    on_interrupt.cancel();
                }
            });

            let synchroniser =
                Synchroniser::new(&store, &fetcher, &session_config).with_cancellation(&cancel);
            let present = synchroniser.snapshot().await?;
            match synchroniser.run(&descriptors, &present).await {
                Ok(report) => {
                    tracing::info!(
                        command = "sync",
                        run_id = %report.run_id,
                        uploaded = report.uploaded.len(),
                        skipped = report.skipped.len(),
                        "Synchronisation complete"
                    );
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, item = ?e.item(), "Synchronisation failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::List { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "list", "Listing assets");
            let session_config = config
                .sync
                .validate()
                .context("Invalid sync settings")?;
            let store = connect(&config)?;
            let entries = session_config
                .retry
                .run("list", &TokioSleeper, || store.list())
                .await
                .map_err(|e| anyhow::anyhow!("Listing assets failed: {e}"))?;
            for entry in entries {
                println!("{}\t{}", entry.key, entry.content_type);
            }
            Ok(())
        }
    }
}
