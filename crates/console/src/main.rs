//! CrewDeck Console
//!
//! Operator console core for a multi-agent automation platform: folds the
//! backend event stream into transcript and agent-status state, surfaces
//! backend-issued commands for approval, and tracks background jobs.
//! Views attach through snapshots and update subscriptions; this binary
//! wires the core to a line-delimited stdio transport.

mod chunks;
mod clock;
mod console;
mod dispatch;
mod jobs;
mod logging;
mod paths;
mod persistence;
mod reconcile;
mod session;
mod store;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::console::Console;
use crate::persistence::{create_persistence_channel, PersistenceWriter};
use crate::session::SessionManager;

#[derive(Parser)]
#[command(
    name = "crewdeck",
    about = "Operator console core for a multi-agent automation platform"
)]
struct Args {
    /// Data directory (default: ~/.crewdeck)
    #[arg(long, env = "CREWDECK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log format: json or pretty
    #[arg(long)]
    log_format: Option<String>,

    /// Start in this session instead of resuming the cached one
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    paths::init_data_dir(args.data_dir.as_deref());
    paths::ensure_dirs()?;
    let logging = logging::init_logging(args.log_format.as_deref())?;

    info!(
        component = "main",
        event = "console.starting",
        run_id = %logging.run_id,
        data_dir = %paths::data_dir().display(),
    );

    // Persistence writer
    let (persist_tx, persist_rx) = create_persistence_channel();
    tokio::spawn(PersistenceWriter::new(persist_rx, paths::db_path()).run());

    // Cached projects and session map
    let persisted = persistence::load_state(paths::db_path()).await;
    let mut sessions = SessionManager::new(persisted, persist_tx);
    if let Some(session_id) = args.session {
        sessions.switch(session_id);
    }

    info!(
        component = "main",
        event = "console.session.resumed",
        session_id = %sessions.active_session(),
    );

    // Backend stream over stdin/stdout
    let (transport, transport_rx) = crewdeck_transport::stdio::spawn(256);
    let _console = Console::spawn(sessions, transport, transport_rx);

    tokio::signal::ctrl_c().await?;
    info!(component = "main", event = "console.shutdown");

    Ok(())
}
