//! Admin controls: claim release and the booking window

use billboard_core::{BookingWindow, ChangeEvent, Claim, Rejection, SlotId};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::ledger::{ClaimLedger, LedgerError};
use crate::session::{lock, SharedSession};
use crate::sync::Resyncer;

pub struct AdminControls<L> {
    ledger: L,
    session: SharedSession,
    resync: Resyncer,
    open_countdown: chrono::Duration,
}

impl<L: ClaimLedger> AdminControls<L> {
    pub fn new(
        ledger: L,
        session: SharedSession,
        resync: Resyncer,
        open_countdown: chrono::Duration,
    ) -> Self {
        Self {
            ledger,
            session,
            resync,
            open_countdown,
        }
    }

    fn authorize(&self) -> Result<(), Rejection> {
        let state = lock(&self.session);
        if state.identity().is_privileged() {
            Ok(())
        } else {
            warn!(email = %state.identity().email, "Admin action refused");
            Err(Rejection::NotAuthorized)
        }
    }

    /// Release whatever claim holds `slot`.
    ///
    /// Returns `Ok(None)` when the local view has no claim there, or when
    /// the ledger had already dropped it.
    pub async fn release_slot(&self, slot: SlotId) -> Result<Option<Claim>, Rejection> {
        self.authorize()?;

        let Some(claim) = lock(&self.session).view().claim_for_slot(slot).cloned() else {
            debug!(slot = %slot, "Nothing to release");
            return Ok(None);
        };

        match self.ledger.release_claim(claim.id).await {
            Ok(released) => {
                lock(&self.session).apply_change(&ChangeEvent::delete(released.clone()));
                info!(slot = %slot, id = %released.id, "Claim released");
                Ok(Some(released))
            }
            Err(LedgerError::NotFound) => {
                lock(&self.session).apply_change(&ChangeEvent::delete(claim));
                debug!(slot = %slot, "Claim already gone");
                Ok(None)
            }
            Err(err) => {
                warn!(slot = %slot, error = %err, "Release failed");
                self.resync.resync().await;
                Err(match err {
                    LedgerError::NotAuthorized => Rejection::NotAuthorized,
                    _ => Rejection::TransientFailure,
                })
            }
        }
    }

    /// Open the window after the configured countdown, clearing any close time
    pub async fn start_countdown(&self) -> Result<BookingWindow, Rejection> {
        self.authorize()?;
        let window = BookingWindow::opening_in(Utc::now(), self.open_countdown);
        self.write_window(window).await
    }

    /// Close the window now
    pub async fn stop(&self) -> Result<BookingWindow, Rejection> {
        self.authorize()?;
        let window = lock(&self.session).window().closed_at(Utc::now());
        self.write_window(window).await
    }

    async fn write_window(&self, window: BookingWindow) -> Result<BookingWindow, Rejection> {
        match self.ledger.set_window(window).await {
            Ok(window) => {
                lock(&self.session).set_window(window);
                info!(opens_at = ?window.opens_at, closes_at = ?window.closes_at, "Window written");
                Ok(window)
            }
            Err(LedgerError::NotAuthorized) => Err(Rejection::NotAuthorized),
            Err(err) => {
                warn!(error = %err, "Window update failed");
                Err(Rejection::TransientFailure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::ledger::LedgerResult;
    use crate::session::SessionState;
    use billboard_core::{Identity, Role};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// In-memory ledger holding claims by id
    #[derive(Clone, Default)]
    struct MemoryLedger {
        claims: Arc<Mutex<Vec<Claim>>>,
        releases: Arc<AtomicUsize>,
    }

    impl ClaimLedger for MemoryLedger {
        async fn list_claims(&self) -> LedgerResult<Vec<Claim>> {
            Ok(self.claims.lock().unwrap().clone())
        }

        async fn submit_claim(&self, _: SlotId, _: Option<String>) -> LedgerResult<Claim> {
            Err(LedgerError::Transient("unused".into()))
        }

        async fn release_claim(&self, id: Uuid) -> LedgerResult<Claim> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            let mut claims = self.claims.lock().unwrap();
            let pos = claims
                .iter()
                .position(|c| c.id == id)
                .ok_or(LedgerError::NotFound)?;
            Ok(claims.remove(pos))
        }

        async fn set_window(&self, window: BookingWindow) -> LedgerResult<BookingWindow> {
            Ok(window)
        }
    }

    fn slot(s: &str) -> SlotId {
        s.parse().unwrap()
    }

    fn controls(who: Identity, ledger: MemoryLedger) -> (AdminControls<MemoryLedger>, SharedSession) {
        let session = SessionState::shared(who, BookingWindow::default());
        let snapshot = ledger.claims.lock().unwrap().clone();
        lock(&session).apply_snapshot(snapshot);
        let (tx, _rx) = mpsc::channel(1);
        (
            AdminControls::new(
                ledger,
                session.clone(),
                Resyncer::new(tx),
                chrono::Duration::seconds(15),
            ),
            session,
        )
    }

    fn admin() -> Identity {
        Identity::new("admin@thh.com", "ADMIN", Role::Admin)
    }

    fn ledger_with(slot_id: &str) -> MemoryLedger {
        let holder = Identity::new("a@venue.org", "Venue", Role::User);
        let ledger = MemoryLedger::default();
        ledger
            .claims
            .lock()
            .unwrap()
            .push(Claim::new(slot(slot_id), &holder, "Song 56".into()));
        ledger
    }

    #[tokio::test]
    async fn test_release_then_noop() {
        let ledger = ledger_with("5-5");
        let (admin, session) = controls(admin(), ledger.clone());

        let released = admin.release_slot(slot("5-5")).await.unwrap();
        assert!(released.is_some());
        assert!(!lock(&session).view().is_booked(slot("5-5")));

        assert_eq!(admin.release_slot(slot("5-5")).await, Ok(None));
        assert_eq!(ledger.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_user_cannot_release() {
        let ledger = ledger_with("5-5");
        let user = Identity::new("a@venue.org", "Venue", Role::User);
        let (controls, session) = controls(user, ledger.clone());

        assert_eq!(
            controls.release_slot(slot("5-5")).await,
            Err(Rejection::NotAuthorized)
        );
        assert_eq!(controls.start_countdown().await, Err(Rejection::NotAuthorized));
        assert_eq!(ledger.releases.load(Ordering::SeqCst), 0);
        assert!(lock(&session).view().is_booked(slot("5-5")));
    }

    #[tokio::test]
    async fn test_stale_view_release_is_noop() {
        let ledger = ledger_with("5-5");
        let (admin, session) = controls(admin(), ledger.clone());
        ledger.claims.lock().unwrap().clear();

        assert_eq!(admin.release_slot(slot("5-5")).await, Ok(None));
        assert!(!lock(&session).view().is_booked(slot("5-5")));
    }

    #[tokio::test]
    async fn test_countdown_then_stop() {
        let (admin, session) = controls(admin(), MemoryLedger::default());

        let before = Utc::now();
        let opened = admin.start_countdown().await.unwrap();
        let opens_at = opened.opens_at.unwrap();
        assert!(opens_at >= before + chrono::Duration::seconds(15));
        assert_eq!(opened.closes_at, None);

        let stopped = admin.stop().await.unwrap();
        assert_eq!(stopped.opens_at, Some(opens_at));
        assert!(stopped.closes_at.is_some());
        assert_eq!(lock(&session).window(), stopped);
    }
}
