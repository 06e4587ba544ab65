//! SQLite storage layer for Billboard

mod catalog;
mod claims;
mod migrations;
mod parse;
mod traits;
mod window;

use rusqlite::Connection;
use std::path::Path;
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{BookingWindow, Claim, SlotId, Song};

pub use catalog::CatalogStore;
pub use claims::ClaimStore;
pub use traits::{CatalogRepository, ClaimRepository, Storage, WindowRepository};
pub use window::WindowStore;

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    /// Get claim store
    pub fn claims(&self) -> ClaimStore<'_> {
        ClaimStore::new(&self.conn)
    }

    /// Get booking window store
    pub fn window_store(&self) -> WindowStore<'_> {
        WindowStore::new(&self.conn)
    }

    /// Get catalog store
    pub fn catalog(&self) -> CatalogStore<'_> {
        CatalogStore::new(&self.conn)
    }
}

// Implement repository traits for Database
// This enables using Database through the trait interface

impl ClaimRepository for Database {
    fn insert_claim(&self, claim: &Claim, quota_key: Option<&str>) -> Result<()> {
        self.claims().insert(claim, quota_key)
    }

    fn delete_claim(&self, id: Uuid) -> Result<Claim> {
        self.claims().delete(id)
    }

    fn delete_claim_for_slot(&self, slot: SlotId) -> Result<Claim> {
        self.claims().delete_for_slot(slot)
    }

    fn list_claims(&self) -> Result<Vec<Claim>> {
        self.claims().list()
    }

    fn find_claim_by_slot(&self, slot: SlotId) -> Result<Option<Claim>> {
        self.claims().find_by_slot(slot)
    }
}

impl WindowRepository for Database {
    fn window(&self) -> Result<BookingWindow> {
        self.window_store().get()
    }

    fn set_window(&self, window: &BookingWindow) -> Result<()> {
        self.window_store().set(window)
    }
}

impl CatalogRepository for Database {
    fn upsert_songs(&self, songs: &[Song]) -> Result<usize> {
        self.catalog().upsert_all(songs)
    }

    fn list_songs(&self) -> Result<Vec<Song>> {
        self.catalog().list()
    }

    fn label_for_slot(&self, slot: SlotId) -> Result<String> {
        self.catalog().label_for_slot(slot)
    }
}
