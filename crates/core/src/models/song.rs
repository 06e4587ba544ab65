//! Catalog entry shown on a slot

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bookable catalog item; `track_index` is the row-major slot index it sits on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub preview_url: Option<String>,
    pub track_index: u32,
}

impl Song {
    pub fn new(external_id: String, title: String, artist: String, track_index: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id,
            title,
            artist,
            cover_url: String::new(),
            preview_url: None,
            track_index,
        }
    }
}

/// Label used when the catalog has no entry for a slot index
pub fn fallback_label(index: usize) -> String {
    format!("Song {}", index + 1)
}
