//! Billboard - slot booking with live contention resolution
//!
//! `serve` runs the ledger; the other commands log in as a roster member
//! and act on it.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use billboard_core::{Database, Roster, SlotId};
use billboard_net::LedgerServer;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod config;
mod coordinator;
mod import;
mod ledger;
mod session;
mod status;
mod sync;
mod ticker;

use config::AppConfig;
use session::{lock, Session};

#[derive(Parser, Debug)]
#[command(name = "billboard")]
#[command(about = "Book one slot of a shared grid during a timed window")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "BILLBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger host
    #[arg(long, env = "BILLBOARD_SERVER")]
    server: Option<String>,

    /// Ledger port
    #[arg(short, long, env = "BILLBOARD_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Login {
    #[arg(long, env = "BILLBOARD_VENUE")]
    venue: String,

    #[arg(long, env = "BILLBOARD_EMAIL")]
    email: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ledger server
    Serve {
        #[arg(long)]
        database: Option<PathBuf>,
        #[arg(long)]
        roster: Option<PathBuf>,
    },
    /// Load the song catalog into the ledger database
    Import {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Book one slot
    Book {
        #[command(flatten)]
        login: Login,
        /// Slot as row-col, e.g. 3-4
        #[arg(long)]
        slot: SlotId,
        #[arg(long)]
        label: Option<String>,
    },
    /// Release the claim on a slot (admin)
    Release {
        #[command(flatten)]
        login: Login,
        #[arg(long)]
        slot: SlotId,
    },
    /// Control the booking window (admin)
    Window {
        #[command(flatten)]
        login: Login,
        #[command(subcommand)]
        action: WindowAction,
    },
    /// Follow the ledger and clock live
    Watch {
        #[command(flatten)]
        login: Login,
    },
}

#[derive(Subcommand, Debug)]
enum WindowAction {
    /// Open after the configured countdown
    Start,
    /// Close now
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server_addr = server;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    match cli.command {
        Command::Serve { database, roster } => {
            if let Some(database) = database {
                config.database_path = database;
            }
            if let Some(roster) = roster {
                config.roster_path = roster;
            }
            serve(&config).await
        }
        Command::Import { catalog, database } => {
            if let Some(database) = database {
                config.database_path = database;
            }
            let db = open_database(&config)?;
            let written = import::import_catalog(&db, &catalog)?;
            println!("Imported {} songs", written);
            Ok(())
        }
        Command::Book { login, slot, label } => {
            let session = login_session(&config, &login, None).await?;
            let result = session.coordinator().book_slot(slot, label).await;
            session.logout().await;
            match result {
                Ok(claim) => {
                    println!("Booked {} as \"{}\"", claim.slot, claim.label);
                    Ok(())
                }
                Err(rejection) => bail!("booking rejected: {}", rejection),
            }
        }
        Command::Release { login, slot } => {
            let session = login_session(&config, &login, None).await?;
            let result = session.admin().release_slot(slot).await;
            session.logout().await;
            match result {
                Ok(Some(claim)) => {
                    println!("Released {} (held by {})", claim.slot, claim.claimant_email);
                    Ok(())
                }
                Ok(None) => {
                    println!("Slot {} was not claimed", slot);
                    Ok(())
                }
                Err(rejection) => bail!("release rejected: {}", rejection),
            }
        }
        Command::Window { login, action } => {
            let session = login_session(&config, &login, None).await?;
            let admin = session.admin();
            let result = match action {
                WindowAction::Start => admin.start_countdown().await,
                WindowAction::Stop => admin.stop().await,
            };
            session.logout().await;
            let window = result.map_err(|rejection| anyhow::anyhow!("window update rejected: {}", rejection))?;
            println!(
                "Window opens {} / closes {}",
                window.opens_at.map_or("never".to_string(), |t| t.to_rfc3339()),
                window.closes_at.map_or("never".to_string(), |t| t.to_rfc3339()),
            );
            Ok(())
        }
        Command::Watch { login } => watch(&config, &login).await,
    }
}

fn open_database(config: &AppConfig) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("cannot open {}", config.database_path.display()))
}

async fn serve(config: &AppConfig) -> Result<()> {
    let db = open_database(config)?;
    let roster = Roster::load(&config.roster_path)
        .with_context(|| format!("cannot load roster {}", config.roster_path.display()))?;
    if roster.is_empty() {
        bail!("roster {} has no members", config.roster_path.display());
    }

    let bind = config.socket_addr()?;
    let server = LedgerServer::start(bind, db, roster).await?;
    info!(addr = %server.addr(), "Serving ledger; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    server.shutdown();
    Ok(())
}

async fn login_session(
    config: &AppConfig,
    login: &Login,
    alerts: Option<mpsc::Sender<u64>>,
) -> Result<Session> {
    let addr: SocketAddr = config.socket_addr()?;
    Session::login(config, addr, &login.venue, &login.email, alerts)
        .await
        .with_context(|| format!("login to {} failed", addr))
}

async fn watch(config: &AppConfig, login: &Login) -> Result<()> {
    let (alert_tx, mut alerts) = mpsc::channel(4);
    let session = login_session(config, login, Some(alert_tx)).await?;
    let mut readings = session.clock();

    loop {
        tokio::select! {
            changed = readings.changed() => {
                if changed.is_err() {
                    break;
                }
                let reading = *readings.borrow_and_update();
                let line = {
                    let state = lock(session.state());
                    let phase = state.window().phase(Utc::now());
                    status::render(phase, &reading, &state.stats(), state.is_synced())
                };
                println!("{}", line);
            }
            Some(seconds) = alerts.recv() => {
                println!("\x07Opening in {}...", seconds);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.logout().await;
    Ok(())
}
