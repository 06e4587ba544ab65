//! Ledger sync task
//!
//! Keeps the session's ledger view converging on the ledger: full snapshot
//! on every (re)connect, then the ordered change stream. Events missed while
//! disconnected are never replayed; the next snapshot replaces the view.

use std::net::SocketAddr;
use std::time::Duration;

use billboard_net::{Client, Connection, ServerEvent};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ledger::ClaimLedger;
use crate::session::{lock, SharedSession};

/// Backoff delays for reconnect: 1s, 2s, 5s, 10s, 30s (capped)
const RECONNECT_DELAYS_MS: &[u64] = &[1000, 2000, 5000, 10000, 30000];

/// Where and as whom to reconnect
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub addr: SocketAddr,
    pub venue: String,
    pub email: String,
    pub request_timeout: Duration,
}

pub enum SyncRequest {
    /// Re-fetch the snapshot; answers whether one was applied
    Resync { done: oneshot::Sender<bool> },
}

/// Asks the sync task for a fresh snapshot
#[derive(Clone)]
pub struct Resyncer {
    requests: mpsc::Sender<SyncRequest>,
}

impl Resyncer {
    pub fn new(requests: mpsc::Sender<SyncRequest>) -> Self {
        Self { requests }
    }

    /// Request a snapshot and wait until it is applied or the attempt fails
    pub async fn resync(&self) -> bool {
        let (done, rx) = oneshot::channel();
        if self
            .requests
            .send(SyncRequest::Resync { done })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// Sync task handle; the task stops when the handle is dropped
pub struct SyncHandle {
    requests: mpsc::Sender<SyncRequest>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn requester(&self) -> Resyncer {
        Resyncer::new(self.requests.clone())
    }

    pub async fn resync(&self) -> bool {
        self.requester().resync().await
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start syncing; `first` is used before any reconnect is attempted
pub fn spawn_sync(
    target: SyncTarget,
    session: SharedSession,
    link: crate::ledger::LedgerLink,
    first: Option<Connection>,
) -> SyncHandle {
    let (requests, request_rx) = mpsc::channel(16);
    let task = tokio::spawn(sync_task(target, session, link, first, request_rx));
    SyncHandle { requests, task }
}

async fn sync_task(
    target: SyncTarget,
    session: SharedSession,
    link: crate::ledger::LedgerLink,
    mut first: Option<Connection>,
    mut requests: mpsc::Receiver<SyncRequest>,
) {
    let mut attempt = 0;

    loop {
        let connection = match first.take() {
            Some(connection) => connection,
            None => match Client::connect(target.addr, &target.venue, &target.email).await {
                Ok(mut connection) => {
                    connection.client = connection
                        .client
                        .with_request_timeout(target.request_timeout);
                    info!(attempt = attempt + 1, "Reconnect successful");
                    connection
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt + 1, "Reconnect failed");
                    if !backoff(attempt, &mut requests).await {
                        return;
                    }
                    attempt += 1;
                    continue;
                }
            },
        };
        attempt = 0;

        let Connection {
            client,
            window,
            mut events,
        } = connection;

        lock(&session).set_window(window);
        link.set(Some(client.clone()));

        let end = follow(&client, &mut events, &mut requests, &session).await;

        link.set(None);
        lock(&session).mark_stale();
        client.disconnect().await;

        match end {
            FollowEnd::Closed => {
                debug!("Sync task stopped");
                return;
            }
            FollowEnd::Lost => {
                warn!("Ledger connection lost; view is stale until reconnect");
            }
        }
    }
}

/// Wait out one backoff step, answering resync requests as failed meanwhile.
/// Returns false once the session has gone away.
async fn backoff(attempt: usize, requests: &mut mpsc::Receiver<SyncRequest>) -> bool {
    let delay = backoff_delay(attempt);
    info!(delay_ms = delay.as_millis() as u64, "Reconnect backoff");

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            request = requests.recv() => match request {
                Some(SyncRequest::Resync { done }) => {
                    let _ = done.send(false);
                }
                None => return false,
            }
        }
    }
}

/// Delay before reconnect attempt `attempt` (0-based), with up to 10% jitter
pub(crate) fn backoff_delay(attempt: usize) -> Duration {
    let base = RECONNECT_DELAYS_MS[attempt.min(RECONNECT_DELAYS_MS.len() - 1)];
    let jitter = rand::thread_rng().gen_range(0..=base / 10);
    Duration::from_millis(base + jitter)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FollowEnd {
    /// The connection is gone; reconnect
    Lost,
    /// The session is gone; stop
    Closed,
}

/// Fetch a snapshot, then apply changes until the stream ends
pub(crate) async fn follow<L: ClaimLedger>(
    ledger: &L,
    events: &mut mpsc::Receiver<ServerEvent>,
    requests: &mut mpsc::Receiver<SyncRequest>,
    session: &SharedSession,
) -> FollowEnd {
    if !refresh(ledger, session).await {
        return FollowEnd::Lost;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ServerEvent::Change(change)) => {
                    let changed = lock(session).apply_change(&change);
                    debug!(kind = ?change.kind, slot = %change.record.slot, changed, "Change applied");
                }
                Some(ServerEvent::WindowChanged(window)) => {
                    lock(session).set_window(window);
                    info!(opens_at = ?window.opens_at, closes_at = ?window.closes_at, "Window changed");
                }
                Some(ServerEvent::ServerShutdown) | Some(ServerEvent::Disconnected) | None => {
                    return FollowEnd::Lost;
                }
            },
            request = requests.recv() => match request {
                Some(SyncRequest::Resync { done }) => {
                    let applied = refresh(ledger, session).await;
                    let _ = done.send(applied);
                    if !applied {
                        return FollowEnd::Lost;
                    }
                }
                None => return FollowEnd::Closed,
            }
        }
    }
}

async fn refresh<L: ClaimLedger>(ledger: &L, session: &SharedSession) -> bool {
    match ledger.list_claims().await {
        Ok(claims) => {
            let count = claims.len();
            lock(session).apply_snapshot(claims);
            debug!(count, "Snapshot applied");
            true
        }
        Err(e) => {
            warn!(error = %e, "Snapshot failed");
            lock(session).mark_stale();
            false
        }
    }
}
