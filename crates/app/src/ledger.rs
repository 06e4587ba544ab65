//! Client-side access to the claim ledger
//!
//! The coordinator and admin flows talk to the ledger through
//! [`ClaimLedger`] so they can run against the live connection or a test
//! double.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use billboard_core::{BookingWindow, Claim, ConflictKind, SlotId};
use billboard_net::{Client, Error as NetError, LedgerFault, ReleaseTarget};
use uuid::Uuid;

/// What a ledger call can report back
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("uniqueness conflict: {0}")]
    Conflict(ConflictKind),

    #[error("no matching claim")]
    NotFound,

    #[error("not authorized")]
    NotAuthorized,

    #[error("ledger unavailable: {0}")]
    Transient(String),
}

impl From<NetError> for LedgerError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Ledger(LedgerFault::SlotTaken) => LedgerError::Conflict(ConflictKind::Slot),
            NetError::Ledger(LedgerFault::QuotaTaken) => {
                LedgerError::Conflict(ConflictKind::Claimant)
            }
            NetError::Ledger(LedgerFault::NotFound) => LedgerError::NotFound,
            NetError::Ledger(LedgerFault::NotAuthorized) => LedgerError::NotAuthorized,
            other => LedgerError::Transient(other.to_string()),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Remote ledger operations
pub trait ClaimLedger: Send + Sync {
    fn list_claims(&self) -> impl Future<Output = LedgerResult<Vec<Claim>>> + Send;

    fn submit_claim(
        &self,
        slot: SlotId,
        label: Option<String>,
    ) -> impl Future<Output = LedgerResult<Claim>> + Send;

    fn release_claim(&self, id: Uuid) -> impl Future<Output = LedgerResult<Claim>> + Send;

    fn set_window(
        &self,
        window: BookingWindow,
    ) -> impl Future<Output = LedgerResult<BookingWindow>> + Send;
}

impl ClaimLedger for Client {
    async fn list_claims(&self) -> LedgerResult<Vec<Claim>> {
        Ok(Client::list_claims(self).await?)
    }

    async fn submit_claim(&self, slot: SlotId, label: Option<String>) -> LedgerResult<Claim> {
        Ok(Client::submit_claim(self, slot, label).await?)
    }

    async fn release_claim(&self, id: Uuid) -> LedgerResult<Claim> {
        Ok(Client::release(self, ReleaseTarget::Claim(id)).await?)
    }

    async fn set_window(&self, window: BookingWindow) -> LedgerResult<BookingWindow> {
        Ok(Client::set_window(self, window).await?)
    }
}

/// The connection the sync task currently holds, if any
#[derive(Clone, Default)]
pub struct LedgerLink {
    current: Arc<RwLock<Option<Client>>>,
}

impl LedgerLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, client: Option<Client>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn client(&self) -> LedgerResult<Client> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| LedgerError::Transient("not connected".into()))
    }
}

impl ClaimLedger for LedgerLink {
    async fn list_claims(&self) -> LedgerResult<Vec<Claim>> {
        let client = self.client()?;
        ClaimLedger::list_claims(&client).await
    }

    async fn submit_claim(&self, slot: SlotId, label: Option<String>) -> LedgerResult<Claim> {
        let client = self.client()?;
        ClaimLedger::submit_claim(&client, slot, label).await
    }

    async fn release_claim(&self, id: Uuid) -> LedgerResult<Claim> {
        let client = self.client()?;
        ClaimLedger::release_claim(&client, id).await
    }

    async fn set_window(&self, window: BookingWindow) -> LedgerResult<BookingWindow> {
        let client = self.client()?;
        ClaimLedger::set_window(&client, window).await
    }
}
