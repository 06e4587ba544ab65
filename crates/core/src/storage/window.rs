//! Booking window storage operations

use rusqlite::{params, Connection};
use tracing::instrument;

use super::parse::parse_datetime_opt;
use crate::error::Result;
use crate::invariants::assert_window_invariants;
use crate::models::{BookingWindow, WINDOW_ID};

pub struct WindowStore<'a> {
    conn: &'a Connection,
}

impl<'a> WindowStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Read the singleton window
    #[instrument(skip(self))]
    pub fn get(&self) -> Result<BookingWindow> {
        let window = self.conn.query_row(
            "SELECT opens_at, closes_at FROM booking_window WHERE id = ?1",
            params![WINDOW_ID],
            |row| {
                Ok(BookingWindow {
                    opens_at: parse_datetime_opt(row.get::<_, Option<String>>(0)?)?,
                    closes_at: parse_datetime_opt(row.get::<_, Option<String>>(1)?)?,
                })
            },
        )?;
        Ok(window)
    }

    /// Overwrite the singleton window
    #[instrument(skip(self))]
    pub fn set(&self, window: &BookingWindow) -> Result<()> {
        assert_window_invariants(window);
        self.conn.execute(
            "UPDATE booking_window SET opens_at = ?1, closes_at = ?2 WHERE id = ?3",
            params![
                window.opens_at.map(|t| t.to_rfc3339()),
                window.closes_at.map(|t| t.to_rfc3339()),
                WINDOW_ID,
            ],
        )?;
        Ok(())
    }
}
