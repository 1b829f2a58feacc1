// receipt-backup - manage remote receipt backups from the command line

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use receipt_backup::app::AppState;
use receipt_backup::error::AppError;
use receipt_backup::remote::RemoteBackupMetadata;
use receipt_backup::services::{ProviderSignIn, SyncProvider};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "receipt-backup",
    version,
    about = "Export, restore and delete remote receipt backups"
)]
struct Cli {
    /// Local data directory (database, receipts, settings, exports)
    #[arg(long, global = true, default_value = "receipt-data")]
    data_dir: PathBuf,
    /// Folder acting as the remote backup store
    #[arg(long, global = true, default_value = "receipt-remote")]
    remote: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List remote backups
    List,
    /// Export a backup as a ZIP archive grouped by trip
    Export {
        /// Device id or device name of the backup
        device: String,
    },
    /// Export a backup as a flat diagnostic ZIP archive
    DebugExport {
        /// Device id or device name of the backup
        device: String,
    },
    /// Restore a backup into the local database
    Import {
        /// Device id or device name of the backup
        device: String,
        /// Replace local rows that conflict with the backup
        #[arg(long)]
        overwrite: bool,
    },
    /// Delete a remote backup
    Delete {
        /// Device id or device name of the backup
        device: String,
    },
    /// Select the sync provider: none, google_drive, local_directory
    Provider { name: SyncProvider },
    /// Only back up on Wi-Fi: on or off
    WifiOnly {
        #[arg(value_parser = parse_switch)]
        enabled: bool,
    },
}

fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got '{}'", other)),
    }
}

/// Browser sign-in cannot run from a terminal
struct TerminalSignIn;

#[async_trait::async_trait]
impl ProviderSignIn for TerminalSignIn {
    async fn sign_in(&self, provider: SyncProvider) -> receipt_backup::error::Result<()> {
        Err(AppError::Generic(format!(
            "Sign-in for {:?} is not available from the command line",
            provider
        )))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "receipt_backup=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let state = AppState::initialize(cli.data_dir, cli.remote).await?;
    let result = dispatch(&state, cli.command).await;
    state.shutdown().await;
    result
}

async fn dispatch(state: &AppState, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            let snapshots = state.backups.list().await?;
            if snapshots.is_empty() {
                println!("No remote backups");
            }
            for snapshot in &snapshots {
                let marker = if state.backups.is_current_device(snapshot) {
                    " (this device)"
                } else {
                    ""
                };
                println!(
                    "{}  {}  {}{}",
                    snapshot.sync_device_id,
                    snapshot.sync_device_name,
                    snapshot.created_at.format("%Y-%m-%d %H:%M"),
                    marker
                );
            }
        }
        Commands::Export { device } => {
            let snapshot = snapshot(state, &device).await?;
            let path = state.backups.export_zip(&snapshot).await?;
            println!("Exported to {}", path.display());
        }
        Commands::DebugExport { device } => {
            let snapshot = snapshot(state, &device).await?;
            let path = state.backups.debug_export_zip(&snapshot).await?;
            println!("Exported to {}", path.display());
        }
        Commands::Import { device, overwrite } => {
            let snapshot = snapshot(state, &device).await?;
            let report = state.backups.import(&snapshot, overwrite).await?;
            println!(
                "Imported {} trips, {} receipts and {} files",
                report.trips_imported, report.receipts_imported, report.files_restored
            );
        }
        Commands::Delete { device } => {
            let snapshot = snapshot(state, &device).await?;
            state.backups.delete(&snapshot).await?;
            println!("Deleted backup of {}", snapshot.sync_device_name);
        }
        Commands::Provider { name } => {
            let selected = state
                .settings
                .save_current_provider(name, &TerminalSignIn)
                .await?;
            println!("Sync provider: {:?}", selected);
        }
        Commands::WifiOnly { enabled } => {
            state.settings.set_wifi_only(enabled).await?;
            println!("Wi-Fi only: {}", if enabled { "on" } else { "off" });
        }
    }

    Ok(())
}

async fn snapshot(state: &AppState, device: &str) -> Result<RemoteBackupMetadata> {
    state
        .find_snapshot(device)
        .await?
        .ok_or_else(|| anyhow!("No remote backup for '{}'", device))
}
