//! Catalog import
//!
//! Loads the bookable song list from a JSON array and upserts it keyed by
//! external id, so re-running an import updates rows instead of
//! duplicating them.

use std::path::Path;

use anyhow::{bail, Context};
use billboard_core::{CatalogRepository, Song, TOTAL_SLOTS};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(alias = "spotify_id")]
    external_id: String,
    title: String,
    artist: String,
    track_index: u32,
    #[serde(default)]
    cover_url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
}

impl From<CatalogEntry> for Song {
    fn from(entry: CatalogEntry) -> Self {
        let mut song = Song::new(entry.external_id, entry.title, entry.artist, entry.track_index);
        song.cover_url = entry.cover_url.unwrap_or_default();
        song.preview_url = entry.preview_url;
        song
    }
}

/// Parse a catalog document; an empty list is refused
pub fn parse_catalog(json: &str) -> anyhow::Result<Vec<Song>> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(json).context("invalid catalog JSON")?;
    if entries.is_empty() {
        bail!("catalog is empty");
    }

    for entry in entries.iter().filter(|e| e.track_index as usize >= TOTAL_SLOTS) {
        warn!(
            external_id = %entry.external_id,
            track_index = entry.track_index,
            "Song is outside the grid and will never label a slot"
        );
    }

    Ok(entries.into_iter().map(Song::from).collect())
}

/// Import a catalog file into the store, returning the number of rows written
pub fn import_catalog(store: &impl CatalogRepository, path: &Path) -> anyhow::Result<usize> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    let songs = parse_catalog(&json)?;
    let written = store.upsert_songs(&songs)?;
    info!(path = %path.display(), songs = written, "Catalog imported");
    Ok(written)
}
