//! Booking coordinator
//!
//! The only path that submits claims. Each attempt runs the local policy
//! checks, then commits at the ledger, and turns every outcome into a
//! [`Rejection`] or the new claim. The ledger's uniqueness constraints
//! decide races; local checks only save a round trip.

use billboard_core::{
    validate, BookingRequest, ChangeEvent, Claim, ConflictKind, Rejection, SlotId,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::ledger::{ClaimLedger, LedgerError};
use crate::session::{lock, BookingPhase, SharedSession};
use crate::sync::Resyncer;

pub struct BookingCoordinator<L> {
    ledger: L,
    session: SharedSession,
    resync: Resyncer,
}

impl<L: ClaimLedger> BookingCoordinator<L> {
    pub fn new(ledger: L, session: SharedSession, resync: Resyncer) -> Self {
        Self {
            ledger,
            session,
            resync,
        }
    }

    pub fn phase(&self) -> BookingPhase {
        lock(&self.session).phase()
    }

    /// Select `slot` and book it
    pub async fn book_slot(&self, slot: SlotId, label: Option<String>) -> Result<Claim, Rejection> {
        {
            let mut state = lock(&self.session);
            if state.phase() != BookingPhase::Idle {
                return Err(Rejection::RequestInProgress);
            }
            state.select(slot);
        }
        self.book(label).await
    }

    /// Attempt to claim the current selection
    pub async fn book(&self, label: Option<String>) -> Result<Claim, Rejection> {
        let slot = self.begin()?;

        let result = self.ledger.submit_claim(slot, label).await;

        match result {
            Ok(claim) => {
                let mut state = lock(&self.session);
                state.apply_change(&ChangeEvent::insert(claim.clone()));
                state.clear_selection();
                state.set_phase(BookingPhase::Idle);
                info!(slot = %slot, id = %claim.id, "Booking succeeded");
                Ok(claim)
            }
            Err(err) => {
                let rejection = rejection_for(&err);
                lock(&self.session).set_phase(BookingPhase::Idle);
                warn!(slot = %slot, error = %err, reason = %rejection, "Booking rejected by ledger");
                if !self.resync.resync().await {
                    warn!("Resync after rejection failed; view is stale");
                }
                Err(rejection)
            }
        }
    }

    /// Validate under the session lock and move to Submitting
    fn begin(&self) -> Result<SlotId, Rejection> {
        let mut state = lock(&self.session);
        if state.phase() != BookingPhase::Idle {
            return Err(Rejection::RequestInProgress);
        }
        state.set_phase(BookingPhase::Validating);

        let verdict = validate(&BookingRequest {
            claimant: state.identity(),
            window: &state.window(),
            view: state.view(),
            selection: state.selection(),
            now: Utc::now(),
        });

        match verdict {
            Ok(slot) => {
                state.set_phase(BookingPhase::Submitting);
                Ok(slot)
            }
            Err(rejection) => {
                state.set_phase(BookingPhase::Idle);
                info!(reason = %rejection, "Booking rejected locally");
                Err(rejection)
            }
        }
    }
}

fn rejection_for(err: &LedgerError) -> Rejection {
    match err {
        LedgerError::Conflict(ConflictKind::Slot) => Rejection::LostRace,
        LedgerError::Conflict(ConflictKind::Claimant) => Rejection::QuotaExceeded,
        LedgerError::NotAuthorized => Rejection::NotAuthorized,
        LedgerError::NotFound | LedgerError::Transient(_) => Rejection::TransientFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::ledger::{LedgerLink, LedgerResult};
    use crate::session::SessionState;
    use crate::sync::{spawn_sync, SyncHandle, SyncRequest, SyncTarget};
    use billboard_core::{BookingWindow, Database, Identity, Role, Roster, RosterEntry};
    use billboard_net::{Client, LedgerServer};
    use tokio::sync::{mpsc, Notify};
    use uuid::Uuid;

    fn slot(s: &str) -> SlotId {
        s.parse().unwrap()
    }

    fn user() -> Identity {
        Identity::new("a@venue.org", "Venue A", Role::User)
    }

    fn admin() -> Identity {
        Identity::new("admin@thh.com", "ADMIN", Role::Admin)
    }

    fn live() -> BookingWindow {
        BookingWindow::reopened(Utc::now() - chrono::Duration::seconds(1))
    }

    /// Counts submits; optionally holds each one until released
    #[derive(Clone, Default)]
    struct ScriptedLedger {
        submits: Arc<AtomicUsize>,
        gate: Option<Arc<Notify>>,
        fail_with: Option<LedgerError>,
    }

    impl ClaimLedger for ScriptedLedger {
        async fn list_claims(&self) -> LedgerResult<Vec<Claim>> {
            Ok(Vec::new())
        }

        async fn submit_claim(&self, slot: SlotId, label: Option<String>) -> LedgerResult<Claim> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(Claim::new(slot, &user(), label.unwrap_or_default())),
            }
        }

        async fn release_claim(&self, _: Uuid) -> LedgerResult<Claim> {
            Err(LedgerError::NotFound)
        }

        async fn set_window(&self, window: BookingWindow) -> LedgerResult<BookingWindow> {
            Ok(window)
        }
    }

    /// Resyncer whose requests are answered immediately and counted
    fn counting_resyncer() -> (Resyncer, Arc<AtomicUsize>) {
        let (tx, mut rx) = mpsc::channel(8);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        tokio::spawn(async move {
            while let Some(SyncRequest::Resync { done }) = rx.recv().await {
                seen.fetch_add(1, Ordering::SeqCst);
                let _ = done.send(true);
            }
        });
        (Resyncer::new(tx), count)
    }

    fn coordinator(
        who: Identity,
        window: BookingWindow,
        ledger: ScriptedLedger,
    ) -> (BookingCoordinator<ScriptedLedger>, SharedSession, Arc<AtomicUsize>) {
        let session = SessionState::shared(who, window);
        let (resync, resyncs) = counting_resyncer();
        (
            BookingCoordinator::new(ledger, session.clone(), resync),
            session,
            resyncs,
        )
    }

    #[tokio::test]
    async fn test_closed_window_never_reaches_ledger() {
        let ledger = ScriptedLedger::default();
        let window = live().closed_at(Utc::now() - chrono::Duration::seconds(1));
        let (coord, _, resyncs) = coordinator(user(), window, ledger.clone());

        assert_eq!(coord.book_slot(slot("4-4"), None).await, Err(Rejection::Closed));
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 0);
        assert_eq!(resyncs.load(Ordering::SeqCst), 0);
        assert_eq!(coord.phase(), BookingPhase::Idle);
    }

    #[tokio::test]
    async fn test_multi_slot_selection_rejected() {
        let ledger = ScriptedLedger::default();
        let (coord, session, _) = coordinator(user(), live(), ledger.clone());

        lock(&session).select_range(slot("0-0"), slot("1-1"));
        assert_eq!(coord.book(None).await, Err(Rejection::InvalidSelectionSize));

        lock(&session).clear_selection();
        assert_eq!(coord.book(None).await, Err(Rejection::InvalidSelectionSize));
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_quota_rejected_locally_but_admin_passes() {
        let ledger = ScriptedLedger::default();
        let (coord, _, _) = coordinator(user(), live(), ledger.clone());
        coord.book_slot(slot("0-0"), None).await.unwrap();
        assert_eq!(
            coord.book_slot(slot("0-1"), None).await,
            Err(Rejection::QuotaExceeded)
        );
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 1);

        let ledger = ScriptedLedger::default();
        let (coord, session, _) = coordinator(admin(), live(), ledger.clone());
        let mine = Claim::new(slot("0-0"), &admin(), "Song 1".into());
        lock(&session).apply_snapshot(vec![mine]);
        assert!(coord.book_slot(slot("0-1"), None).await.is_ok());
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_clears_selection_and_updates_view() {
        let (coord, session, _) = coordinator(user(), live(), ScriptedLedger::default());

        let claim = coord.book_slot(slot("3-4"), Some("Song 35".into())).await.unwrap();

        let state = lock(&session);
        assert!(state.selection().is_empty());
        assert_eq!(state.view().claim_for_slot(slot("3-4")), Some(&claim));
        assert_eq!(state.phase(), BookingPhase::Idle);
    }

    #[tokio::test]
    async fn test_transient_failure_resyncs_and_returns_idle() {
        let ledger = ScriptedLedger {
            fail_with: Some(LedgerError::Transient("timed out".into())),
            ..Default::default()
        };
        let (coord, session, resyncs) = coordinator(user(), live(), ledger);

        assert_eq!(
            coord.book_slot(slot("2-2"), None).await,
            Err(Rejection::TransientFailure)
        );
        assert_eq!(resyncs.load(Ordering::SeqCst), 1);
        assert_eq!(coord.phase(), BookingPhase::Idle);
        assert_eq!(lock(&session).selection(), &[slot("2-2")]);
    }

    #[tokio::test]
    async fn test_second_submit_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let ledger = ScriptedLedger {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let (coord, _, _) = coordinator(user(), live(), ledger.clone());

        let first = coord.book_slot(slot("1-1"), None);
        let second = async {
            let result = coord.book_slot(slot("1-2"), None).await;
            gate.notify_one();
            result
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok());
        assert_eq!(second, Err(Rejection::RequestInProgress));
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 1);
    }

    struct Harness {
        server: LedgerServer,
    }

    impl Harness {
        async fn start() -> Self {
            let roster = Roster::from_entries(vec![
                RosterEntry {
                    venue: "ADMIN".into(),
                    email: "admin@thh.com".into(),
                    role: Role::Admin,
                },
                RosterEntry {
                    venue: "Venue A".into(),
                    email: "a@venue.org".into(),
                    role: Role::User,
                },
                RosterEntry {
                    venue: "Venue B".into(),
                    email: "b@venue.org".into(),
                    role: Role::User,
                },
            ])
            .unwrap();
            let server = LedgerServer::start(
                SocketAddr::from(([127, 0, 0, 1], 0)),
                Database::open_in_memory().unwrap(),
                roster,
            )
            .await
            .unwrap();
            Self { server }
        }

        async fn login(
            &self,
            venue: &str,
            email: &str,
        ) -> (BookingCoordinator<LedgerLink>, SharedSession, SyncHandle) {
            let connection = Client::connect(self.server.addr(), venue, email)
                .await
                .unwrap();
            let session =
                SessionState::shared(connection.client.identity().clone(), connection.window);
            let link = LedgerLink::new();
            let target = SyncTarget {
                addr: self.server.addr(),
                venue: venue.into(),
                email: email.into(),
                request_timeout: Duration::from_secs(5),
            };
            let sync = spawn_sync(target, session.clone(), link.clone(), Some(connection));
            assert!(sync.resync().await);
            let coord = BookingCoordinator::new(link, session.clone(), sync.requester());
            (coord, session, sync)
        }

        async fn set_window(&self, window: BookingWindow) {
            let admin = Client::connect(self.server.addr(), "ADMIN", "admin@thh.com")
                .await
                .unwrap();
            admin.client.set_window(window).await.unwrap();
            admin.client.disconnect().await;
        }
    }

    #[tokio::test]
    async fn test_too_early_then_open() {
        let harness = Harness::start().await;
        harness
            .set_window(BookingWindow::opening_in(Utc::now(), chrono::Duration::seconds(15)))
            .await;
        let (coord, session, _sync) = harness.login("Venue A", "a@venue.org").await;

        assert_eq!(coord.book_slot(slot("3-4"), None).await, Err(Rejection::TooEarly));

        // Rewind the opening instead of sleeping past it
        harness
            .set_window(BookingWindow::reopened(Utc::now() - chrono::Duration::seconds(1)))
            .await;
        tokio::time::timeout(Duration::from_secs(3), async {
            while !lock(&session).window().is_live(Utc::now()) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let claim = coord.book_slot(slot("3-4"), None).await.unwrap();
        assert_eq!(claim.label, "Song 35");
        harness.server.shutdown();
    }

    #[tokio::test]
    async fn test_lost_race_resyncs_to_winner() {
        let harness = Harness::start().await;
        harness.set_window(live()).await;
        let (alice, alice_session, _alice_sync) = harness.login("Venue A", "a@venue.org").await;
        let (bob, bob_session, _bob_sync) = harness.login("Venue B", "b@venue.org").await;

        // Both validate against an empty view before either commit lands
        let (a, b) = tokio::join!(
            alice.book_slot(slot("0-0"), None),
            bob.book_slot(slot("0-0"), None)
        );

        let (winner, loser, loser_session) = match (a, b) {
            (Ok(claim), Err(rejection)) => (claim, rejection, bob_session),
            (Err(rejection), Ok(claim)) => (claim, rejection, alice_session),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        assert_eq!(loser, Rejection::LostRace);

        let state = lock(&loser_session);
        assert_eq!(state.view().claim_for_slot(slot("0-0")), Some(&winner));
        assert_eq!(state.phase(), BookingPhase::Idle);
        drop(state);
        harness.server.shutdown();
    }
}
