//! Billboard Network Library
//!
//! TCP transport between booking clients and the claim ledger.
//!
//! # Architecture
//!
//! - **Server**: Owns the ledger database, answers requests, and pushes
//!   committed changes to every connection in commit order
//! - **Client**: Connects with a venue and email, issues requests, and
//!   receives pushed changes
//! - **Protocol**: Length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! // Serve the ledger
//! let server = LedgerServer::start(addr, Database::open(path)?, roster).await?;
//!
//! // Connect and follow changes
//! let mut conn = Client::connect(server.addr(), "Venue", "me@venue.org").await?;
//! let snapshot = conn.client.list_claims().await?;
//! while let Some(event) = conn.events.recv().await {
//!     match event {
//!         ServerEvent::Change(change) => { /* apply */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::{Client, Connection, ConnectionState, ServerEvent, DEFAULT_REQUEST_TIMEOUT};
pub use error::{Error, Result};
pub use protocol::{ClientMessage, LedgerFault, ReleaseTarget, RequestId, ServerMessage};
pub use server::LedgerServer;

/// Default port for ledger servers
pub const DEFAULT_PORT: u16 = 7341;
