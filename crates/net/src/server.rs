//! TCP server fronting the claim ledger
//!
//! One blocking task owns the database and applies commands in arrival
//! order. After every commit it publishes the change on a broadcast
//! channel, so every subscriber observes changes in commit order. Each
//! connection answers its own requests and forwards published changes on
//! the same socket, which keeps a snapshot reply ordered against the
//! changes that follow it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use billboard_core::{
    BookingWindow, CatalogRepository, ChangeEvent, Claim, ClaimRepository, ConflictKind,
    Database, Error as CoreError, Identity, Roster, SlotId, WindowRepository,
};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ClientMessage, LedgerFault, ReleaseTarget, RequestId, ServerMessage};

/// Published changes buffered per subscriber before it is cut off
const EVENT_BUFFER: usize = 1024;

/// Queued ledger commands
const COMMAND_BUFFER: usize = 256;

/// Queued requests per connection
const REQUEST_BUFFER: usize = 32;

/// Time allowed between accept and Hello
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Something the ledger committed
#[derive(Debug, Clone)]
enum LedgerEvent {
    Change(ChangeEvent),
    Window(BookingWindow),
}

type Reply<T> = oneshot::Sender<std::result::Result<T, LedgerFault>>;

enum LedgerCommand {
    List {
        reply: Reply<Vec<Claim>>,
    },
    Submit {
        claimant: Identity,
        slot: SlotId,
        label: Option<String>,
        reply: Reply<Claim>,
    },
    Release {
        actor: Identity,
        target: ReleaseTarget,
        reply: Reply<Claim>,
    },
    GetWindow {
        reply: Reply<BookingWindow>,
    },
    SetWindow {
        actor: Identity,
        window: BookingWindow,
        reply: Reply<BookingWindow>,
    },
}

/// State shared by every connection task
struct ServerContext {
    roster: Roster,
    commands: mpsc::Sender<LedgerCommand>,
    events: broadcast::Sender<LedgerEvent>,
}

/// Ledger server handle
pub struct LedgerServer {
    addr: SocketAddr,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LedgerServer {
    /// Bind and start serving the given database to roster members
    pub async fn start(bind: SocketAddr, db: Database, roster: Roster) -> Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;

        info!(addr = %addr, members = roster.len(), "Ledger server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let ledger_events = events.clone();
        tokio::task::spawn_blocking(move || ledger_loop(db, command_rx, ledger_events));

        let context = Arc::new(ServerContext {
            roster,
            commands,
            events,
        });

        tokio::spawn(accept_loop(listener, context.clone(), shutdown_tx.clone()));

        Ok(LedgerServer {
            addr,
            context,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections currently following the change stream
    pub fn subscriber_count(&self) -> usize {
        self.context.events.receiver_count()
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Owns the database; runs until every command sender is gone
fn ledger_loop(
    db: Database,
    mut commands: mpsc::Receiver<LedgerCommand>,
    events: broadcast::Sender<LedgerEvent>,
) {
    while let Some(command) = commands.blocking_recv() {
        handle_command(&db, command, &events);
    }
    debug!("Ledger task stopped");
}

fn handle_command(db: &Database, command: LedgerCommand, events: &broadcast::Sender<LedgerEvent>) {
    match command {
        LedgerCommand::List { reply } => {
            let _ = reply.send(db.list_claims().map_err(fault_from));
        }
        LedgerCommand::Submit {
            claimant,
            slot,
            label,
            reply,
        } => {
            let result = submit(db, &claimant, slot, label);
            if let Ok(claim) = &result {
                publish(events, LedgerEvent::Change(ChangeEvent::insert(claim.clone())));
            }
            let _ = reply.send(result);
        }
        LedgerCommand::Release {
            actor,
            target,
            reply,
        } => {
            let result = release(db, &actor, target);
            if let Ok(claim) = &result {
                publish(events, LedgerEvent::Change(ChangeEvent::delete(claim.clone())));
            }
            let _ = reply.send(result);
        }
        LedgerCommand::GetWindow { reply } => {
            let _ = reply.send(db.window().map_err(fault_from));
        }
        LedgerCommand::SetWindow {
            actor,
            window,
            reply,
        } => {
            let result = set_window(db, &actor, window);
            if let Ok(window) = &result {
                publish(events, LedgerEvent::Window(*window));
            }
            let _ = reply.send(result);
        }
    }
}

fn submit(
    db: &Database,
    claimant: &Identity,
    slot: SlotId,
    label: Option<String>,
) -> std::result::Result<Claim, LedgerFault> {
    let label = match label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
    {
        Some(label) => label,
        None => db.label_for_slot(slot).map_err(fault_from)?,
    };

    let claim = Claim::new(slot, claimant, label);
    db.insert_claim(&claim, claimant.quota_key().as_deref())
        .map_err(fault_from)?;

    info!(slot = %slot, claimant = %claimant.email, "Claim committed");
    Ok(claim)
}

fn release(
    db: &Database,
    actor: &Identity,
    target: ReleaseTarget,
) -> std::result::Result<Claim, LedgerFault> {
    if !actor.is_privileged() {
        warn!(actor = %actor.email, "Release refused");
        return Err(LedgerFault::NotAuthorized);
    }

    let claim = match target {
        ReleaseTarget::Slot(slot) => db.delete_claim_for_slot(slot),
        ReleaseTarget::Claim(id) => db.delete_claim(id),
    }
    .map_err(fault_from)?;

    info!(slot = %claim.slot, actor = %actor.email, "Claim released");
    Ok(claim)
}

fn set_window(
    db: &Database,
    actor: &Identity,
    window: BookingWindow,
) -> std::result::Result<BookingWindow, LedgerFault> {
    if !actor.is_privileged() {
        warn!(actor = %actor.email, "Window change refused");
        return Err(LedgerFault::NotAuthorized);
    }

    db.set_window(&window).map_err(fault_from)?;
    info!(opens_at = ?window.opens_at, closes_at = ?window.closes_at, "Booking window updated");
    Ok(window)
}

fn publish(events: &broadcast::Sender<LedgerEvent>, event: LedgerEvent) {
    if events.send(event).is_err() {
        debug!("No subscribers for ledger event");
    }
}

fn fault_from(err: CoreError) -> LedgerFault {
    match err {
        CoreError::Conflict(ConflictKind::Slot) => LedgerFault::SlotTaken,
        CoreError::Conflict(ConflictKind::Claimant) => LedgerFault::QuotaTaken,
        CoreError::NotFound(_) => LedgerFault::NotFound,
        other => {
            error!(error = %other, "Ledger operation failed");
            LedgerFault::Unavailable {
                detail: other.to_string(),
            }
        }
    }
}

fn ledger_stopped() -> LedgerFault {
    LedgerFault::Unavailable {
        detail: "ledger stopped".into(),
    }
}

/// Send a command to the ledger task and wait for its answer
async fn ask<T>(
    commands: &mpsc::Sender<LedgerCommand>,
    build: impl FnOnce(Reply<T>) -> LedgerCommand,
) -> std::result::Result<T, LedgerFault> {
    let (reply, rx) = oneshot::channel();
    commands
        .send(build(reply))
        .await
        .map_err(|_| ledger_stopped())?;
    rx.await.map_err(|_| ledger_stopped())?
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            context.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let identity = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        handle_hello(&mut reader, &context.roster),
    )
    .await
    {
        Ok(Ok(identity)) => identity,
        Ok(Err(e)) => {
            warn!(addr = %addr, error = %e, "Hello failed");
            if let Error::Rejected(reason) = e {
                let _ = write_frame(&mut writer, &ServerMessage::HelloRejected { reason }).await;
            }
            return;
        }
        Err(_) => {
            warn!(addr = %addr, "Hello timed out");
            return;
        }
    };

    // Subscribe before reading the window so nothing committed in between is missed
    let mut changes = context.events.subscribe();

    let window = match ask(&context.commands, |reply| LedgerCommand::GetWindow { reply }).await {
        Ok(window) => window,
        Err(fault) => {
            let reason = fault.to_string();
            let _ = write_frame(&mut writer, &ServerMessage::HelloRejected { reason }).await;
            return;
        }
    };

    let welcome = ServerMessage::Welcome {
        identity: identity.clone(),
        window,
    };
    if let Err(e) = write_frame(&mut writer, &welcome).await {
        debug!(addr = %addr, error = %e, "Welcome failed");
        return;
    }

    info!(addr = %addr, email = %identity.email, role = ?identity.role, "Client joined");

    let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
    let reader_handle = tokio::spawn(reader_task(reader, request_tx));

    let result = serve_client(
        &mut writer,
        &identity,
        &context,
        request_rx,
        &mut changes,
        &mut shutdown_rx,
    )
    .await;

    reader_handle.abort();
    if let Err(e) = result {
        debug!(email = %identity.email, error = %e, "Write failed");
    }

    info!(email = %identity.email, "Client disconnected");
}

/// Answer requests and forward changes until either side goes away
async fn serve_client(
    writer: &mut WriteHalf<TcpStream>,
    identity: &Identity,
    context: &ServerContext,
    mut requests: mpsc::Receiver<ClientMessage>,
    changes: &mut broadcast::Receiver<LedgerEvent>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    return Ok(());
                };
                if let Some(reply) = handle_request(request, identity, &context.commands).await {
                    write_frame(writer, &reply).await?;
                }
            }
            event = changes.recv() => {
                let msg = match event {
                    Ok(LedgerEvent::Change(change)) => ServerMessage::Change(change),
                    Ok(LedgerEvent::Window(window)) => ServerMessage::WindowChanged { window },
                    Err(RecvError::Lagged(skipped)) => {
                        // The client can no longer rebuild state from the stream; it resyncs on reconnect
                        warn!(email = %identity.email, skipped, "Subscriber fell behind");
                        return Ok(());
                    }
                    Err(RecvError::Closed) => return Ok(()),
                };
                write_frame(writer, &msg).await?;
            }
            _ = shutdown_rx.recv() => {
                let _ = write_frame(writer, &ServerMessage::ServerShutdown).await;
                return Ok(());
            }
        }
    }
}

/// Validate the Hello against the roster
async fn handle_hello(reader: &mut ReadHalf<TcpStream>, roster: &Roster) -> Result<Identity> {
    match read_frame(reader).await? {
        ClientMessage::Hello { venue, email } => roster
            .resolve(&venue, &email)
            .ok_or_else(|| Error::Rejected("Not on the roster".into())),
        _ => Err(Error::Protocol("Expected Hello".into())),
    }
}

/// Reader task - forwards requests to the connection task
async fn reader_task(mut reader: ReadHalf<TcpStream>, tx: mpsc::Sender<ClientMessage>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!("Connection closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }
}

fn respond<T>(
    request_id: RequestId,
    result: std::result::Result<T, LedgerFault>,
    ok: impl FnOnce(T) -> ServerMessage,
) -> ServerMessage {
    match result {
        Ok(value) => ok(value),
        Err(fault) => ServerMessage::Failed { request_id, fault },
    }
}

/// Handle an incoming request
async fn handle_request(
    msg: ClientMessage,
    identity: &Identity,
    commands: &mpsc::Sender<LedgerCommand>,
) -> Option<ServerMessage> {
    let reply = match msg {
        ClientMessage::Hello { .. } => {
            debug!("Ignoring repeated Hello");
            return None;
        }
        ClientMessage::Ping { request_id } => ServerMessage::Pong { request_id },
        ClientMessage::ListClaims { request_id } => respond(
            request_id,
            ask(commands, |reply| LedgerCommand::List { reply }).await,
            |claims| ServerMessage::Snapshot { request_id, claims },
        ),
        ClientMessage::SubmitClaim {
            request_id,
            slot,
            label,
        } => {
            let claimant = identity.clone();
            respond(
                request_id,
                ask(commands, |reply| LedgerCommand::Submit {
                    claimant,
                    slot,
                    label,
                    reply,
                })
                .await,
                |claim| ServerMessage::Submitted { request_id, claim },
            )
        }
        ClientMessage::ReleaseClaim { request_id, target } => {
            let actor = identity.clone();
            respond(
                request_id,
                ask(commands, |reply| LedgerCommand::Release {
                    actor,
                    target,
                    reply,
                })
                .await,
                |claim| ServerMessage::Released { request_id, claim },
            )
        }
        ClientMessage::GetWindow { request_id } => respond(
            request_id,
            ask(commands, |reply| LedgerCommand::GetWindow { reply }).await,
            |window| ServerMessage::WindowState { request_id, window },
        ),
        ClientMessage::SetWindow { request_id, window } => {
            let actor = identity.clone();
            respond(
                request_id,
                ask(commands, |reply| LedgerCommand::SetWindow {
                    actor,
                    window,
                    reply,
                })
                .await,
                |window| ServerMessage::WindowState { request_id, window },
            )
        }
    };
    Some(reply)
}
