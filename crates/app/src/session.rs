//! Per-client session
//!
//! A session is created at login, once the ledger has resolved our
//! identity, and destroyed at logout. It owns the local ledger view, the
//! current selection, and the background sync and clock tasks.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::bail;
use billboard_core::{
    selection_size_label, BookingWindow, ChangeEvent, Claim, ClockReading, Identity, LedgerView,
    SlotId,
};
use billboard_net::Client;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::admin::AdminControls;
use crate::config::AppConfig;
use crate::coordinator::BookingCoordinator;
use crate::ledger::LedgerLink;
use crate::sync::{spawn_sync, Resyncer, SyncHandle, SyncTarget};
use crate::ticker::{spawn_clock, ClockHandle};

/// Where the current claim attempt is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    Idle,
    Validating,
    Submitting,
}

/// Figures derived from the local view and selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub booked: usize,
    pub remaining: usize,
    pub capacity_percent: u32,
    pub my_claims: usize,
    pub selection_label: String,
}

/// Mutable state of one logged-in client
#[derive(Debug)]
pub struct SessionState {
    identity: Identity,
    selection: Vec<SlotId>,
    view: LedgerView,
    window: BookingWindow,
    synced: bool,
    phase: BookingPhase,
}

pub type SharedSession = Arc<Mutex<SessionState>>;

/// Lock the session, recovering from a panicked holder
pub fn lock(session: &SharedSession) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionState {
    pub fn new(identity: Identity, window: BookingWindow) -> Self {
        Self {
            identity,
            selection: Vec::new(),
            view: LedgerView::new(),
            window,
            synced: false,
            phase: BookingPhase::Idle,
        }
    }

    pub fn shared(identity: Identity, window: BookingWindow) -> SharedSession {
        Arc::new(Mutex::new(Self::new(identity, window)))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn view(&self) -> &LedgerView {
        &self.view
    }

    pub fn window(&self) -> BookingWindow {
        self.window
    }

    pub fn set_window(&mut self, window: BookingWindow) {
        self.window = window;
    }

    pub fn phase(&self) -> BookingPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: BookingPhase) {
        self.phase = phase;
    }

    /// Whether the view reflects a snapshot from the current connection
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub(crate) fn mark_stale(&mut self) {
        self.synced = false;
    }

    /// Replace the view with a fresh snapshot
    pub(crate) fn apply_snapshot(&mut self, claims: Vec<Claim>) {
        self.view.replace(claims);
        self.synced = true;
    }

    pub(crate) fn apply_change(&mut self, change: &ChangeEvent) -> bool {
        self.view.apply(change)
    }

    pub fn selection(&self) -> &[SlotId] {
        &self.selection
    }

    /// Select exactly one slot
    pub fn select(&mut self, slot: SlotId) {
        self.selection = vec![slot];
    }

    /// Add or remove one slot from the selection
    pub fn toggle(&mut self, slot: SlotId) {
        match self.selection.iter().position(|s| *s == slot) {
            Some(pos) => {
                self.selection.remove(pos);
            }
            None => self.selection.push(slot),
        }
    }

    /// Select the rectangle spanned by two corners
    pub fn select_range(&mut self, from: SlotId, to: SlotId) {
        let (r0, r1) = (from.row().min(to.row()), from.row().max(to.row()));
        let (c0, c1) = (from.col().min(to.col()), from.col().max(to.col()));
        self.selection = SlotId::all()
            .filter(|s| (r0..=r1).contains(&s.row()) && (c0..=c1).contains(&s.col()))
            .collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            booked: self.view.booked_count(),
            remaining: self.view.remaining(),
            capacity_percent: self.view.capacity_percent(),
            my_claims: self.view.count_for(&self.identity.email),
            selection_label: selection_size_label(&self.selection),
        }
    }
}

/// A logged-in client with its background tasks
pub struct Session {
    state: SharedSession,
    link: LedgerLink,
    sync: SyncHandle,
    clock: ClockHandle,
    open_countdown: chrono::Duration,
}

impl Session {
    /// Connect, resolve identity, and wait for the first snapshot
    pub async fn login(
        config: &AppConfig,
        addr: SocketAddr,
        venue: &str,
        email: &str,
        alerts: Option<mpsc::Sender<u64>>,
    ) -> anyhow::Result<Self> {
        let mut connection = Client::connect(addr, venue, email).await?;
        connection.client = connection
            .client
            .with_request_timeout(config.request_timeout());

        let identity = connection.client.identity().clone();
        let state = SessionState::shared(identity.clone(), connection.window);
        let link = LedgerLink::new();

        let target = SyncTarget {
            addr,
            venue: venue.to_string(),
            email: email.to_string(),
            request_timeout: config.request_timeout(),
        };
        let sync = spawn_sync(target, state.clone(), link.clone(), Some(connection));
        await_first_snapshot(&sync.requester()).await?;

        let clock = spawn_clock(state.clone(), alerts);

        info!(email = %identity.email, venue = %identity.venue, "Logged in");

        Ok(Self {
            state,
            link,
            sync,
            clock,
            open_countdown: config.open_countdown(),
        })
    }

    pub fn state(&self) -> &SharedSession {
        &self.state
    }

    pub fn identity(&self) -> Identity {
        lock(&self.state).identity().clone()
    }

    pub fn coordinator(&self) -> BookingCoordinator<LedgerLink> {
        BookingCoordinator::new(self.link.clone(), self.state.clone(), self.sync.requester())
    }

    pub fn admin(&self) -> AdminControls<LedgerLink> {
        AdminControls::new(
            self.link.clone(),
            self.state.clone(),
            self.sync.requester(),
            self.open_countdown,
        )
    }

    /// Latest clock readings
    pub fn clock(&self) -> watch::Receiver<ClockReading> {
        self.clock.readings()
    }

    /// Tear down background tasks and drop the connection
    pub async fn logout(self) {
        let email = self.identity().email;
        self.sync.shutdown().await;
        drop(self.clock);
        self.link.set(None);
        info!(email = %email, "Logged out");
    }
}

/// Fails unless the sync task has applied a snapshot
async fn await_first_snapshot(resync: &Resyncer) -> anyhow::Result<()> {
    if resync.resync().await {
        Ok(())
    } else {
        bail!("initial ledger snapshot failed")
    }
}
