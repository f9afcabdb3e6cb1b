use clap::{Parser, Subcommand};
use mailsync_rs::auth;
use mailsync_rs::config::Config;
use mailsync_rs::gmail::GmailClient;
use mailsync_rs::storage::MessageStore;
use mailsync_rs::sync::{SyncEngine, SyncReport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// How many per-item errors the summary prints; the rest are in the log.
const SUMMARY_ERROR_LIMIT: usize = 5;

#[derive(Parser)]
#[command(
    name = "mailsync",
    version,
    about = "Sync a Gmail mailbox into a local SQLite store"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Account name (defaults to the first configured account)
    #[arg(long, short, global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync all messages (incremental by default)
    Sync {
        /// Force a full sync, including deleted-message detection
        #[arg(long)]
        full: bool,

        /// Number of concurrent fetch workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Sync a single message by id
    SyncMessage {
        /// The remote id of the message to sync
        #[arg(long)]
        message_id: String,
    },
    /// Detect and mark messages deleted on the remote
    SyncDeleted,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;
    init_logging(&config.log_level);

    let account = config.account(cli.account.as_deref())?.clone();
    if cli.account.is_none() && config.accounts.len() > 1 {
        info!(
            account = %account.name,
            available = ?config.account_names(),
            "no account specified, using the first configured"
        );
    }

    std::fs::create_dir_all(&account.data_dir)?;

    // Credentials are a precondition: fail here before any sync state is
    // touched.
    let credentials = auth::get_credentials(&account).await?;

    let store = MessageStore::open(&account.data_dir).await?;
    let client = Arc::new(GmailClient::new(&credentials)?);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut settings = config.sync.clone();

    match cli.command {
        Command::Sync { full, workers } => {
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            let engine = SyncEngine::new(client, store, settings, cancel);
            match engine.sync(full).await {
                Ok(report) => print_report(&report),
                Err(err) => {
                    error!(error = %err, "sync failed");
                    std::process::exit(1);
                }
            }
        }
        Command::SyncMessage { message_id } => {
            let engine = SyncEngine::new(client, store, settings, cancel);
            match engine.sync_one(&message_id).await {
                Ok(_) => println!("Message {} synced successfully", message_id),
                Err(err) => {
                    error!(error = %err, message_id, "message sync failed");
                    std::process::exit(1);
                }
            }
        }
        Command::SyncDeleted => {
            let engine = SyncEngine::new(client, store, settings, cancel);
            match engine.sync_deleted().await {
                Ok(count) => println!("Marked {} messages as deleted", count),
                Err(err) => {
                    error!(error = %err, "deleted-message sync failed");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let level = level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// First Ctrl-C requests a graceful drain; a second one forces the process
/// down without a final commit (the next incremental run recovers).
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("shutdown requested, waiting for in-flight work (Ctrl-C again to force)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        error!("forced shutdown, exiting immediately");
        std::process::exit(1);
    });
}

fn print_report(report: &SyncReport) {
    println!(
        "Sync completed ({:?}, {}) in {:.1}s",
        report.mode,
        report.status.as_str(),
        report.elapsed.as_secs_f64()
    );
    println!("  fetched:   {}", report.fetched);
    println!("  inserted:  {}", report.inserted);
    println!("  updated:   {}", report.updated);
    println!("  unchanged: {}", report.unchanged);
    println!("  failed:    {}", report.failed);
    println!("  deleted:   {}", report.deleted_detected);

    if !report.errors.is_empty() {
        println!("First errors:");
        for item in report.errors.iter().take(SUMMARY_ERROR_LIMIT) {
            println!("  {}: {}", item.message_id, item.cause);
        }
    }
}
