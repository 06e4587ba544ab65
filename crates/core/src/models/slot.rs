//! Slot identity within the fixed booking grid

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Number of rows in the grid
pub const GRID_ROWS: u8 = 10;

/// Number of columns in the grid
pub const GRID_COLS: u8 = 10;

/// Total number of bookable slots
pub const TOTAL_SLOTS: usize = GRID_ROWS as usize * GRID_COLS as usize;

/// A single cell of the grid, written `"row-col"` on the wire and in storage.
///
/// Construction always goes through [`SlotId::new`] or parsing, so a value
/// of this type is always inside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    row: u8,
    col: u8,
}

impl SlotId {
    pub fn new(row: u8, col: u8) -> Result<Self, Error> {
        if row >= GRID_ROWS || col >= GRID_COLS {
            return Err(Error::InvalidSlot(format!(
                "{}-{} is outside the {}x{} grid",
                row, col, GRID_ROWS, GRID_COLS
            )));
        }
        Ok(Self { row, col })
    }

    pub fn row(self) -> u8 {
        self.row
    }

    pub fn col(self) -> u8 {
        self.col
    }

    /// Row-major position, 0..TOTAL_SLOTS
    pub fn index(self) -> usize {
        self.row as usize * GRID_COLS as usize + self.col as usize
    }

    pub fn from_index(index: usize) -> Result<Self, Error> {
        if index >= TOTAL_SLOTS {
            return Err(Error::InvalidSlot(format!("index {} out of range", index)));
        }
        let cols = GRID_COLS as usize;
        Self::new((index / cols) as u8, (index % cols) as u8)
    }

    /// Every slot in row-major order
    pub fn all() -> impl Iterator<Item = SlotId> {
        (0..GRID_ROWS).flat_map(|row| (0..GRID_COLS).map(move |col| SlotId { row, col }))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.row, self.col)
    }
}

impl FromStr for SlotId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (row, col) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| Error::InvalidSlot(format!("'{}' is not in row-col form", s)))?;
        let row = row
            .parse::<u8>()
            .map_err(|_| Error::InvalidSlot(format!("bad row in '{}'", s)))?;
        let col = col
            .parse::<u8>()
            .map_err(|_| Error::InvalidSlot(format!("bad column in '{}'", s)))?;
        Self::new(row, col)
    }
}

impl Serialize for SlotId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Bounding-box label for a selection, `"W × H"`, empty when nothing is selected
pub fn selection_size_label(selection: &[SlotId]) -> String {
    let (Some(min_r), Some(max_r)) = (
        selection.iter().map(|s| s.row).min(),
        selection.iter().map(|s| s.row).max(),
    ) else {
        return String::new();
    };
    let min_c = selection.iter().map(|s| s.col).min().unwrap_or(0);
    let max_c = selection.iter().map(|s| s.col).max().unwrap_or(0);
    format!("{} × {}", max_c - min_c + 1, max_r - min_r + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let slot: SlotId = "3-4".parse().unwrap();
        assert_eq!(slot.row(), 3);
        assert_eq!(slot.col(), 4);
        assert_eq!(slot.to_string(), "3-4");
        assert_eq!(slot.index(), 34);
    }

    #[test]
    fn test_out_of_grid_rejected() {
        assert!("10-0".parse::<SlotId>().is_err());
        assert!("0-10".parse::<SlotId>().is_err());
        assert!("a-1".parse::<SlotId>().is_err());
        assert!("12".parse::<SlotId>().is_err());
        assert!(SlotId::from_index(TOTAL_SLOTS).is_err());
    }

    #[test]
    fn test_all_slots() {
        let all: Vec<SlotId> = SlotId::all().collect();
        assert_eq!(all.len(), TOTAL_SLOTS);
        assert_eq!(all[0].to_string(), "0-0");
        assert_eq!(all[99].to_string(), "9-9");
        assert_eq!(SlotId::from_index(57).unwrap().to_string(), "5-7");
    }

    #[test]
    fn test_serde_as_string() {
        let slot = SlotId::new(5, 5).unwrap();
        assert_eq!(serde_json::to_string(&slot).unwrap(), "\"5-5\"");
        assert!(serde_json::from_str::<SlotId>("\"11-1\"").is_err());
    }

    #[test]
    fn test_selection_size_label() {
        assert_eq!(selection_size_label(&[]), "");
        let one = SlotId::new(2, 2).unwrap();
        assert_eq!(selection_size_label(&[one]), "1 × 1");
        let other = SlotId::new(3, 5).unwrap();
        assert_eq!(selection_size_label(&[one, other]), "4 × 2");
    }
}
