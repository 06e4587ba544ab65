//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.
//! Requests carry a `request_id` that the server echoes on the matching
//! reply; pushed messages (`Change`, `WindowChanged`, `ServerShutdown`)
//! carry none.

use std::fmt;

use billboard_core::{BookingWindow, ChangeEvent, Claim, Identity, SlotId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlates a reply with its request on one connection
pub type RequestId = u64;

/// What a release request points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTarget {
    Slot(SlotId),
    Claim(Uuid),
}

/// Why the ledger refused a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum LedgerFault {
    /// Another claim already holds the slot
    SlotTaken,
    /// The claimant already holds their quota
    QuotaTaken,
    /// No claim matched the release target
    NotFound,
    /// The caller's role does not allow the operation
    NotAuthorized,
    /// Storage failed; the request may be retried
    Unavailable { detail: String },
}

impl fmt::Display for LedgerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerFault::SlotTaken => write!(f, "slot already claimed"),
            LedgerFault::QuotaTaken => write!(f, "claimant already holds a claim"),
            LedgerFault::NotFound => write!(f, "no matching claim"),
            LedgerFault::NotAuthorized => write!(f, "not authorized"),
            LedgerFault::Unavailable { detail } => write!(f, "ledger unavailable: {}", detail),
        }
    }
}

/// Messages sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message on every connection
    Hello { venue: String, email: String },

    /// Request a full snapshot of the ledger
    ListClaims { request_id: RequestId },

    /// Claim a slot; the server fills in the catalog label when absent
    SubmitClaim {
        request_id: RequestId,
        slot: SlotId,
        label: Option<String>,
    },

    /// Admin only
    ReleaseClaim {
        request_id: RequestId,
        target: ReleaseTarget,
    },

    GetWindow { request_id: RequestId },

    /// Admin only
    SetWindow {
        request_id: RequestId,
        window: BookingWindow,
    },

    Ping { request_id: RequestId },
}

impl ClientMessage {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ClientMessage::Hello { .. } => None,
            ClientMessage::ListClaims { request_id }
            | ClientMessage::SubmitClaim { request_id, .. }
            | ClientMessage::ReleaseClaim { request_id, .. }
            | ClientMessage::GetWindow { request_id }
            | ClientMessage::SetWindow { request_id, .. }
            | ClientMessage::Ping { request_id } => Some(*request_id),
        }
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake accepted; identity is resolved from the roster
    Welcome {
        identity: Identity,
        window: BookingWindow,
    },

    /// Handshake refused; the connection is closed after this
    HelloRejected { reason: String },

    Snapshot {
        request_id: RequestId,
        claims: Vec<Claim>,
    },

    Submitted { request_id: RequestId, claim: Claim },

    Released { request_id: RequestId, claim: Claim },

    WindowState {
        request_id: RequestId,
        window: BookingWindow,
    },

    Failed {
        request_id: RequestId,
        fault: LedgerFault,
    },

    /// A committed ledger change, pushed in commit order
    Change(ChangeEvent),

    /// The booking window was rewritten
    WindowChanged { window: BookingWindow },

    Pong { request_id: RequestId },

    /// Server is shutting down
    ServerShutdown,
}

impl ServerMessage {
    /// The request this message answers, if it is a reply
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ServerMessage::Snapshot { request_id, .. }
            | ServerMessage::Submitted { request_id, .. }
            | ServerMessage::Released { request_id, .. }
            | ServerMessage::WindowState { request_id, .. }
            | ServerMessage::Failed { request_id, .. }
            | ServerMessage::Pong { request_id } => Some(*request_id),
            ServerMessage::Welcome { .. }
            | ServerMessage::HelloRejected { .. }
            | ServerMessage::Change(_)
            | ServerMessage::WindowChanged { .. }
            | ServerMessage::ServerShutdown => None,
        }
    }
}
