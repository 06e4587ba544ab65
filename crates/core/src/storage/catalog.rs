//! Song catalog storage operations

use rusqlite::{params, Connection};
use tracing::{info, instrument};

use super::parse::{parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{fallback_label, SlotId, Song};

pub struct CatalogStore<'a> {
    conn: &'a Connection,
}

impl<'a> CatalogStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or update songs keyed by `external_id`, all in one transaction.
    ///
    /// Re-running with the same input leaves the table unchanged; existing
    /// rows keep their `id`.
    #[instrument(skip(self, songs), fields(count = songs.len()))]
    pub fn upsert_all(&self, songs: &[Song]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO songs (id, external_id, title, artist, cover_url, preview_url, track_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(external_id) DO UPDATE SET
                    title = excluded.title,
                    artist = excluded.artist,
                    cover_url = excluded.cover_url,
                    preview_url = excluded.preview_url,
                    track_index = excluded.track_index",
            )?;
            for song in songs {
                stmt.execute(params![
                    song.id.to_string(),
                    song.external_id,
                    song.title,
                    song.artist,
                    song.cover_url,
                    song.preview_url,
                    song.track_index,
                ])?;
            }
        }
        tx.commit()?;
        info!(count = songs.len(), "Catalog upserted");
        Ok(songs.len())
    }

    /// All songs by track index
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Song>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, external_id, title, artist, cover_url, preview_url, track_index
             FROM songs ORDER BY track_index, external_id",
        )?;
        let songs = stmt
            .query_map([], |row| {
                Ok(Song {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    external_id: row.get(1)?,
                    title: row.get(2)?,
                    artist: row.get(3)?,
                    cover_url: row.get(4)?,
                    preview_url: row.get(5)?,
                    track_index: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(songs)
    }

    /// Claim label for a slot: the song title at its index, or a numbered fallback
    #[instrument(skip(self))]
    pub fn label_for_slot(&self, slot: SlotId) -> Result<String> {
        let title: Option<String> = self
            .conn
            .query_row(
                "SELECT title FROM songs WHERE track_index = ?1 ORDER BY external_id LIMIT 1",
                params![slot.index() as u32],
                |row| row.get(0),
            )
            .optional()?;
        Ok(title.unwrap_or_else(|| fallback_label(slot.index())))
    }
}
