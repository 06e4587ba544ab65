//! Billboard Core Library
//!
//! Models, identity roster, window clock, local ledger view, booking policy,
//! and the SQLite-backed claim ledger.

pub mod clock;
pub mod error;
pub mod invariants;
pub mod models;
pub mod policy;
pub mod roster;
pub mod storage;
pub mod view;

pub use clock::ClockReading;
pub use error::{ConflictKind, Error, Result};
pub use models::*;
pub use policy::{validate, BookingRequest, Rejection};
pub use roster::{Roster, RosterEntry, RosterError};
pub use storage::{CatalogRepository, ClaimRepository, Database, Storage, WindowRepository};
pub use view::LedgerView;
