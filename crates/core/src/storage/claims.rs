//! Claim storage operations
//!
//! Inserts never pre-check for an existing claim. The UNIQUE constraints on
//! `slot_id` and `quota_key` decide every race at commit time.

use rusqlite::{params, Connection, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse::{claim_conflict, parse_datetime, parse_slot, parse_uuid, OptionalExt};
use crate::error::{Error, Result};
use crate::models::{Claim, SlotId};

const CLAIM_COLUMNS: &str =
    "id, slot_id, claimant_email, claimant_group, label, created_at";

pub struct ClaimStore<'a> {
    conn: &'a Connection,
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<Claim> {
    Ok(Claim {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        slot: parse_slot(&row.get::<_, String>(1)?)?,
        claimant_email: row.get(2)?,
        claimant_group: row.get(3)?,
        label: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}

impl<'a> ClaimStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Commit a claim.
    ///
    /// `quota_key` is `None` for claimants exempt from the per-claimant cap.
    /// Fails with [`Error::Conflict`] when either uniqueness constraint fires.
    #[instrument(skip(self, claim), fields(slot = %claim.slot, claimant = %claim.claimant_email))]
    pub fn insert(&self, claim: &Claim, quota_key: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO claims (id, slot_id, claimant_email, claimant_group, label, created_at, quota_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    claim.id.to_string(),
                    claim.slot.to_string(),
                    claim.claimant_email,
                    claim.claimant_group,
                    claim.label,
                    claim.created_at.to_rfc3339(),
                    quota_key,
                ],
            )
            .map_err(claim_conflict)?;
        debug!("Claim committed");
        Ok(())
    }

    /// Find claim by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Claim>> {
        let claim = self
            .conn
            .query_row(
                &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE id = ?1"),
                params![id.to_string()],
                claim_from_row,
            )
            .optional()?;
        Ok(claim)
    }

    /// Find the claim on a slot
    #[instrument(skip(self))]
    pub fn find_by_slot(&self, slot: SlotId) -> Result<Option<Claim>> {
        let claim = self
            .conn
            .query_row(
                &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE slot_id = ?1"),
                params![slot.to_string()],
                claim_from_row,
            )
            .optional()?;
        Ok(claim)
    }

    /// All claims in commit order
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Claim>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CLAIM_COLUMNS} FROM claims ORDER BY rowid"))?;
        let claims = stmt
            .query_map([], claim_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(claims)
    }

    /// Delete a claim by ID, returning the removed record
    #[instrument(skip(self))]
    pub fn delete(&self, id: Uuid) -> Result<Claim> {
        let claim = self
            .find_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("claim {}", id)))?;
        self.conn
            .execute("DELETE FROM claims WHERE id = ?1", params![id.to_string()])?;
        Ok(claim)
    }

    /// Delete whatever claim sits on a slot, returning the removed record
    #[instrument(skip(self))]
    pub fn delete_for_slot(&self, slot: SlotId) -> Result<Claim> {
        let claim = self
            .find_by_slot(slot)?
            .ok_or_else(|| Error::NotFound(format!("claim on slot {}", slot)))?;
        self.delete(claim.id)
    }
}
