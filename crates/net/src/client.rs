//! TCP client for the ledger server

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use billboard_core::{BookingWindow, ChangeEvent, Claim, Identity, SlotId};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ClientMessage, ReleaseTarget, RequestId, ServerMessage};

/// Default time to wait for a reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pushed events held for a slow consumer before the connection is dropped
const EVENT_BUFFER: usize = 1024;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Event pushed by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A committed ledger change
    Change(ChangeEvent),
    /// The booking window was rewritten
    WindowChanged(BookingWindow),
    /// Server is shutting down
    ServerShutdown,
    /// Connection lost
    Disconnected,
}

enum ClientCommand {
    Request {
        message: ClientMessage,
        reply: oneshot::Sender<ServerMessage>,
    },
    Disconnect,
}

/// Client handle for ledger requests; clones share one connection
#[derive(Clone)]
pub struct Client {
    identity: Identity,
    state: Arc<RwLock<ConnectionState>>,
    cmd_tx: mpsc::Sender<ClientCommand>,
    next_request: Arc<AtomicU64>,
    request_timeout: Duration,
}

/// A freshly established connection
pub struct Connection {
    pub client: Client,
    /// Window as of the handshake
    pub window: BookingWindow,
    pub events: mpsc::Receiver<ServerEvent>,
}

impl Client {
    /// Connect and introduce ourselves; the server resolves our identity
    pub async fn connect(addr: SocketAddr, venue: &str, email: &str) -> Result<Connection> {
        info!(addr = %addr, venue = %venue, "Connecting to ledger");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let hello = ClientMessage::Hello {
            venue: venue.to_string(),
            email: email.to_string(),
        };
        write_frame(&mut writer, &hello).await?;

        let (identity, window) = match tokio::time::timeout(
            DEFAULT_REQUEST_TIMEOUT,
            read_frame::<_, ServerMessage>(&mut reader),
        )
        .await
        .map_err(|_| Error::Timeout)??
        {
            ServerMessage::Welcome { identity, window } => (identity, window),
            ServerMessage::HelloRejected { reason } => {
                warn!(reason = %reason, "Hello rejected");
                return Err(Error::Rejected(reason));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Expected Welcome, got {:?}",
                    other
                )))
            }
        };

        info!(email = %identity.email, role = ?identity.role, "Connected to ledger");

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            reader,
            writer,
            state.clone(),
            event_tx,
            cmd_rx,
        ));

        Ok(Connection {
            client: Client {
                identity,
                state,
                cmd_tx,
                next_request: Arc::new(AtomicU64::new(1)),
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            window,
            events: event_rx,
        })
    }

    /// Override how long to wait for replies
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Identity resolved by the server at handshake
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Full ledger snapshot in commit order
    pub async fn list_claims(&self) -> Result<Vec<Claim>> {
        match self
            .request(|request_id| ClientMessage::ListClaims { request_id })
            .await?
        {
            ServerMessage::Snapshot { claims, .. } => Ok(claims),
            other => Err(unexpected(other)),
        }
    }

    /// Claim a slot; `None` asks the server for the catalog label
    pub async fn submit_claim(&self, slot: SlotId, label: Option<String>) -> Result<Claim> {
        match self
            .request(|request_id| ClientMessage::SubmitClaim {
                request_id,
                slot,
                label,
            })
            .await?
        {
            ServerMessage::Submitted { claim, .. } => Ok(claim),
            other => Err(unexpected(other)),
        }
    }

    /// Release a claim (admin only)
    pub async fn release(&self, target: ReleaseTarget) -> Result<Claim> {
        match self
            .request(|request_id| ClientMessage::ReleaseClaim { request_id, target })
            .await?
        {
            ServerMessage::Released { claim, .. } => Ok(claim),
            other => Err(unexpected(other)),
        }
    }

    /// Release by claim id (admin only)
    pub async fn release_claim(&self, id: Uuid) -> Result<Claim> {
        self.release(ReleaseTarget::Claim(id)).await
    }

    /// Read the booking window
    pub async fn window(&self) -> Result<BookingWindow> {
        match self
            .request(|request_id| ClientMessage::GetWindow { request_id })
            .await?
        {
            ServerMessage::WindowState { window, .. } => Ok(window),
            other => Err(unexpected(other)),
        }
    }

    /// Overwrite the booking window (admin only)
    pub async fn set_window(&self, window: BookingWindow) -> Result<BookingWindow> {
        match self
            .request(|request_id| ClientMessage::SetWindow { request_id, window })
            .await?
        {
            ServerMessage::WindowState { window, .. } => Ok(window),
            other => Err(unexpected(other)),
        }
    }

    /// Round-trip a ping
    pub async fn ping(&self) -> Result<()> {
        match self
            .request(|request_id| ClientMessage::Ping { request_id })
            .await?
        {
            ServerMessage::Pong { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    async fn request(
        &self,
        build: impl FnOnce(RequestId) -> ClientMessage,
    ) -> Result<ServerMessage> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        self.cmd_tx
            .send(ClientCommand::Request {
                message: build(request_id),
                reply,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        let response = tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::ConnectionClosed)?;

        match response {
            ServerMessage::Failed { fault, .. } => Err(Error::Ledger(fault)),
            other => Ok(other),
        }
    }
}

fn unexpected(msg: ServerMessage) -> Error {
    Error::Protocol(format!("Unexpected reply: {:?}", msg))
}

/// Reader task - forwards server messages to the connection task
async fn reader_task(mut reader: ReadHalf<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!("Server closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }
}

/// Main connection task
async fn connection_task(
    reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<ServerEvent>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let (incoming_tx, mut incoming) = mpsc::channel(256);
    let reader_handle = tokio::spawn(reader_task(reader, incoming_tx));
    let mut pending: HashMap<RequestId, oneshot::Sender<ServerMessage>> = HashMap::new();

    loop {
        tokio::select! {
            // Incoming message from server
            msg = incoming.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                if let Some(request_id) = msg.request_id() {
                    match pending.remove(&request_id) {
                        Some(reply) => {
                            let _ = reply.send(msg);
                        }
                        None => debug!(request_id, "Reply for unknown request"),
                    }
                    continue;
                }
                let kept_up = match msg {
                    ServerMessage::Change(change) => {
                        push_event(&event_tx, ServerEvent::Change(change))
                    }
                    ServerMessage::WindowChanged { window } => {
                        push_event(&event_tx, ServerEvent::WindowChanged(window))
                    }
                    ServerMessage::ServerShutdown => {
                        info!("Server shutting down");
                        push_event(&event_tx, ServerEvent::ServerShutdown);
                        break;
                    }
                    other => {
                        debug!(msg = ?other, "Ignoring unexpected message");
                        true
                    }
                };
                if !kept_up {
                    break;
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Request { message, reply }) => {
                        if let Some(request_id) = message.request_id() {
                            pending.insert(request_id, reply);
                        }
                        if let Err(e) = write_frame(&mut writer, &message).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }
        }
    }

    reader_handle.abort();
    *state.write().await = ConnectionState::Disconnected;
    // Dropping pending replies fails every outstanding request
    drop(pending);
    push_event(&event_tx, ServerEvent::Disconnected);
    info!("Disconnected from ledger");
}

/// Queue a pushed event without waiting on the consumer.
/// Returns false when the consumer has fallen a full buffer behind; it must
/// then resync from a snapshot, so the connection is dropped.
fn push_event(event_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) -> bool {
    match event_tx.try_send(event) {
        Ok(()) | Err(TrySendError::Closed(_)) => true,
        Err(TrySendError::Full(_)) => {
            warn!(buffer = EVENT_BUFFER, "Event consumer lagging, dropping connection");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LedgerFault;
    use crate::server::LedgerServer;
    use billboard_core::{ChangeKind, Database, Role, Roster, RosterEntry};
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test]
    async fn test_full_event_buffer_drops_connection() {
        let (event_tx, mut events) = mpsc::channel(1);
        assert!(push_event(&event_tx, ServerEvent::ServerShutdown));
        assert!(!push_event(&event_tx, ServerEvent::Disconnected));

        assert!(matches!(events.recv().await, Some(ServerEvent::ServerShutdown)));
        drop(events);
        // Nobody listening is not a reason to stop serving requests
        assert!(push_event(&event_tx, ServerEvent::Disconnected));
    }

    fn member(venue: &str, email: &str, role: Role) -> RosterEntry {
        RosterEntry {
            venue: venue.into(),
            email: email.into(),
            role,
        }
    }

    async fn start_server() -> LedgerServer {
        let roster = Roster::from_entries(vec![
            member("ADMIN", "admin@thh.com", Role::Admin),
            member("Venue A", "a@venue.org", Role::User),
            member("Venue B", "b@venue.org", Role::User),
        ])
        .unwrap();
        LedgerServer::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Database::open_in_memory().unwrap(),
            roster,
        )
        .await
        .unwrap()
    }

    fn slot(s: &str) -> SlotId {
        s.parse().unwrap()
    }

    async fn next_change(events: &mut mpsc::Receiver<ServerEvent>) -> ChangeEvent {
        loop {
            match events.recv().await {
                Some(ServerEvent::Change(change)) => return change,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    }

    #[tokio::test]
    async fn test_client_connect() {
        let server = start_server().await;

        let conn = Client::connect(server.addr(), "Venue A", "A@Venue.org ")
            .await
            .unwrap();
        assert_eq!(conn.client.identity().role, Role::User);
        assert_eq!(conn.window, BookingWindow::default());
        assert_eq!(
            conn.client.connection_state().await,
            ConnectionState::Connected
        );
        conn.client.ping().await.unwrap();

        conn.client.disconnect().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_venue_rejected() {
        let server = start_server().await;
        let result = Client::connect(server.addr(), "Venue B", "a@venue.org").await;
        assert!(matches!(result, Err(Error::Rejected(_))));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_submit_broadcasts_insert() {
        let server = start_server().await;
        let alice = Client::connect(server.addr(), "Venue A", "a@venue.org")
            .await
            .unwrap();
        let mut bob = Client::connect(server.addr(), "Venue B", "b@venue.org")
            .await
            .unwrap();

        let claim = alice.client.submit_claim(slot("2-3"), None).await.unwrap();
        assert_eq!(claim.label, "Song 24");

        let change = next_change(&mut bob.events).await;
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.record.id, claim.id);

        let snapshot = bob.client.list_claims().await.unwrap();
        assert_eq!(snapshot, vec![claim]);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_submits_single_winner() {
        let server = start_server().await;
        let alice = Client::connect(server.addr(), "Venue A", "a@venue.org")
            .await
            .unwrap();
        let bob = Client::connect(server.addr(), "Venue B", "b@venue.org")
            .await
            .unwrap();

        let target = slot("5-5");
        let (a, b) = tokio::join!(
            alice.client.submit_claim(target, None),
            bob.client.submit_claim(target, None)
        );

        let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(Error::Ledger(LedgerFault::SlotTaken))));

        let snapshot = alice.client.list_claims().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_quota_enforced_by_ledger() {
        let server = start_server().await;
        let alice = Client::connect(server.addr(), "Venue A", "a@venue.org")
            .await
            .unwrap();

        alice.client.submit_claim(slot("0-0"), None).await.unwrap();
        let second = alice.client.submit_claim(slot("0-1"), None).await;
        assert!(matches!(second, Err(Error::Ledger(LedgerFault::QuotaTaken))));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_release_requires_admin() {
        let server = start_server().await;
        let alice = Client::connect(server.addr(), "Venue A", "a@venue.org")
            .await
            .unwrap();
        let mut admin = Client::connect(server.addr(), "ADMIN", "admin@thh.com")
            .await
            .unwrap();

        let claim = alice.client.submit_claim(slot("1-1"), None).await.unwrap();
        let _ = next_change(&mut admin.events).await;

        let refused = alice.client.release_claim(claim.id).await;
        assert!(matches!(refused, Err(Error::Ledger(LedgerFault::NotAuthorized))));

        let released = admin
            .client
            .release(ReleaseTarget::Slot(slot("1-1")))
            .await
            .unwrap();
        assert_eq!(released.id, claim.id);

        let change = next_change(&mut admin.events).await;
        assert_eq!(change.kind, ChangeKind::Delete);

        let again = admin.client.release_claim(claim.id).await;
        assert!(matches!(again, Err(Error::Ledger(LedgerFault::NotFound))));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_window_changes_pushed() {
        let server = start_server().await;
        let admin = Client::connect(server.addr(), "ADMIN", "admin@thh.com")
            .await
            .unwrap();
        let mut alice = Client::connect(server.addr(), "Venue A", "a@venue.org")
            .await
            .unwrap();

        let window = BookingWindow::opening_in(Utc::now(), ChronoDuration::seconds(15));
        admin.client.set_window(window).await.unwrap();

        loop {
            match alice.events.recv().await {
                Some(ServerEvent::WindowChanged(pushed)) => {
                    assert_eq!(pushed, window);
                    break;
                }
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }

        let refused = alice.client.set_window(BookingWindow::default()).await;
        assert!(matches!(refused, Err(Error::Ledger(LedgerFault::NotAuthorized))));
        assert_eq!(alice.client.window().await.unwrap(), window);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_reaches_clients() {
        let server = start_server().await;
        let mut alice = Client::connect(server.addr(), "Venue A", "a@venue.org")
            .await
            .unwrap();

        server.shutdown();

        let mut saw_shutdown = false;
        while let Some(event) = alice.events.recv().await {
            match event {
                ServerEvent::ServerShutdown => saw_shutdown = true,
                ServerEvent::Disconnected => break,
                _ => {}
            }
        }
        assert!(saw_shutdown);
        assert!(alice.client.list_claims().await.is_err());
    }
}
