//! Composition root for the lookout dashboard CLI.
mod dashboard;
mod logging;

use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use sync_logging::{sync_info, sync_warn};
use tokio::sync::mpsc;

use lookout_core::SessionStore;
use lookout_sync::{
    ChannelNotificationSink, ConnectionManager, MessageRouter, NotificationSink, OutboundFrame,
    RecoveryService, ResumeOutcome, SyncNotification, SyncSettings, WsTransport,
};

#[derive(Parser)]
#[command(name = "lookout", about = "Observe and recover server-side crawl jobs")]
struct Cli {
    /// Base URL for request/response endpoints.
    #[arg(long, default_value = "http://127.0.0.1:8080/api")]
    rest_base: String,
    /// Base URL for the persistent channel.
    #[arg(long, default_value = "ws://127.0.0.1:8080")]
    channel_base: String,
    /// Also write logs to ./lookout.log.
    #[arg(long)]
    log_file: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List jobs that were interrupted without a live connection.
    List,
    /// Resume an interrupted job and watch its progress.
    Resume { session_id: String },
    /// Attach to a running job and watch its progress.
    Watch { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(if cli.log_file {
        logging::LogDestination::Both
    } else {
        logging::LogDestination::Terminal
    });

    let settings = SyncSettings {
        rest_base: cli.rest_base,
        channel_base: cli.channel_base,
        ..SyncSettings::default()
    };
    let store = Arc::new(Mutex::new(SessionStore::new()));

    match cli.command {
        Command::List => {
            let recovery = RecoveryService::new(settings, store);
            let sessions = recovery.list_interrupted().await?;
            if sessions.is_empty() {
                println!("No interrupted sessions.");
                return Ok(());
            }
            for session in &sessions {
                println!(
                    "{}  {}  {} pages, {} urls  (updated {})",
                    session.id,
                    session.domain,
                    session.checkpoint.pages_scraped,
                    session.checkpoint.urls_found,
                    session.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Resume { session_id } => {
            let (manager, notifications) = spawn_sync(&settings, &store);
            let recovery = RecoveryService::new(settings, store.clone());

            // The interrupted listing carries the config the backend needs
            // re-submitted once the channel is back up.
            let interrupted = recovery.list_interrupted().await?;
            let Some(entry) = interrupted.into_iter().find(|s| s.id == session_id) else {
                anyhow::bail!("session {session_id} is not in the interrupted list");
            };

            match recovery.resume(&session_id, &manager).await {
                ResumeOutcome::Resumed => sync_info!("session {} resumed", session_id),
                ResumeOutcome::ResumedConnectPending => {
                    sync_warn!(
                        "session {} resumed; still waiting for the live channel",
                        session_id
                    );
                }
                ResumeOutcome::AlreadyResuming => {
                    sync_warn!("a resume for {} is already in flight", session_id);
                    return Ok(());
                }
                ResumeOutcome::Failed(err) => return Err(err.into()),
            }

            store
                .lock()
                .expect("lock session store")
                .set_submission_pending(&session_id, true);
            manager.send(&OutboundFrame::StartScrape {
                session_id: session_id.clone(),
                config: entry.config,
            });

            dashboard::observe(&session_id, &store, notifications, &manager).await;
            manager.disconnect();
        }
        Command::Watch { session_id } => {
            let (manager, notifications) = spawn_sync(&settings, &store);
            manager.connect(&session_id);
            dashboard::observe(&session_id, &store, notifications, &manager).await;
            manager.disconnect();
        }
    }
    Ok(())
}

fn spawn_sync(
    settings: &SyncSettings,
    store: &Arc<Mutex<SessionStore>>,
) -> (ConnectionManager, mpsc::UnboundedReceiver<SyncNotification>) {
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn NotificationSink> = Arc::new(ChannelNotificationSink::new(notify_tx));
    let router = MessageRouter::new(store.clone(), sink.clone());
    let manager = ConnectionManager::spawn(
        settings.clone(),
        Arc::new(WsTransport::new()),
        router,
        sink,
    );
    (manager, notify_rx)
}
