//! Booking window clock task
//!
//! Recomputes the clock reading once a second from the session's window and
//! the wall clock. Readings are published on a watch channel; near-open
//! alerts are best effort.

use std::time::Duration;

use billboard_core::ClockReading;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::session::{lock, SharedSession};

const TICK: Duration = Duration::from_secs(1);

/// Clock task handle; the task stops when the handle is dropped
pub struct ClockHandle {
    readings: watch::Receiver<ClockReading>,
    task: JoinHandle<()>,
}

impl ClockHandle {
    pub fn readings(&self) -> watch::Receiver<ClockReading> {
        self.readings.clone()
    }

    pub fn current(&self) -> ClockReading {
        *self.readings.borrow()
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start ticking; `alerts` receives the seconds remaining on near-open ticks
pub fn spawn_clock(session: SharedSession, alerts: Option<mpsc::Sender<u64>>) -> ClockHandle {
    let initial = ClockReading::at(&lock(&session).window(), Utc::now());
    let (tx, readings) = watch::channel(initial);
    let task = tokio::spawn(clock_task(session, tx, alerts));
    ClockHandle { readings, task }
}

async fn clock_task(
    session: SharedSession,
    tx: watch::Sender<ClockReading>,
    alerts: Option<mpsc::Sender<u64>>,
) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let window = lock(&session).window();
        let reading = ClockReading::at(&window, Utc::now());

        if reading.near_open() {
            if let Some(alerts) = &alerts {
                if alerts.try_send(reading.seconds_remaining).is_err() {
                    debug!(seconds = reading.seconds_remaining, "Near-open alert dropped");
                }
            }
        }

        if tx.send(reading).is_err() {
            break;
        }
    }
}
