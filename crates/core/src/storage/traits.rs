//! Storage repository traits
//!
//! These traits define the ledger's storage interface, allowing for
//! different implementations (SQLite, mock).

use uuid::Uuid;

use crate::error::Result;
use crate::models::{BookingWindow, Claim, SlotId, Song};

/// Claim ledger operations
pub trait ClaimRepository {
    /// Commit a claim; conflicts surface as `Error::Conflict`
    fn insert_claim(&self, claim: &Claim, quota_key: Option<&str>) -> Result<()>;

    /// Remove a claim by ID, returning it
    fn delete_claim(&self, id: Uuid) -> Result<Claim>;

    /// Remove the claim on a slot, returning it
    fn delete_claim_for_slot(&self, slot: SlotId) -> Result<Claim>;

    /// Full snapshot in commit order
    fn list_claims(&self) -> Result<Vec<Claim>>;

    /// Find the claim on a slot
    fn find_claim_by_slot(&self, slot: SlotId) -> Result<Option<Claim>>;
}

/// Booking window operations
pub trait WindowRepository {
    /// Read the singleton window
    fn window(&self) -> Result<BookingWindow>;

    /// Overwrite the singleton window
    fn set_window(&self, window: &BookingWindow) -> Result<()>;
}

/// Catalog operations
pub trait CatalogRepository {
    /// Idempotent bulk upsert keyed by external id
    fn upsert_songs(&self, songs: &[Song]) -> Result<usize>;

    /// All songs by track index
    fn list_songs(&self) -> Result<Vec<Song>>;

    /// Default claim label for a slot
    fn label_for_slot(&self, slot: SlotId) -> Result<String>;
}

/// Combined storage interface
///
/// Provides access to all repository operations.
pub trait Storage: ClaimRepository + WindowRepository + CatalogRepository {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where T: ClaimRepository + WindowRepository + CatalogRepository {}
