//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        sql: r#"
            -- One row per committed claim. slot_id uniqueness is the
            -- concurrency-control primitive for the whole system.
            CREATE TABLE IF NOT EXISTS claims (
                id TEXT PRIMARY KEY,
                slot_id TEXT NOT NULL UNIQUE,
                claimant_email TEXT NOT NULL,
                claimant_group TEXT NOT NULL,
                label TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Singleton booking window
            CREATE TABLE IF NOT EXISTS booking_window (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                opens_at TEXT,
                closes_at TEXT
            );

            INSERT OR IGNORE INTO booking_window (id, opens_at, closes_at) VALUES (1, NULL, NULL);
        "#,
    },
    Migration {
        version: 2,
        description: "Add songs catalog",
        sql: r#"
            CREATE TABLE IF NOT EXISTS songs (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                cover_url TEXT NOT NULL DEFAULT '',
                preview_url TEXT,
                track_index INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_songs_track ON songs(track_index);
        "#,
    },
    Migration {
        version: 3,
        description: "Enforce per-claimant cap at the ledger",
        sql: r#"
            -- NULL for privileged claimants; SQLite allows any number of NULLs
            ALTER TABLE claims ADD COLUMN quota_key TEXT;

            CREATE UNIQUE INDEX IF NOT EXISTS idx_claims_quota ON claims(quota_key);
            CREATE INDEX IF NOT EXISTS idx_claims_email ON claims(claimant_email);
        "#,
    },
];

/// Initialize the migrations table
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Get the current schema version
fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row(
            "SELECT MAX(version) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let current = get_current_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );

        conn.execute_batch(migration.sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
    }

    Ok(())
}

/// Latest known schema version
#[cfg(test)]
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
