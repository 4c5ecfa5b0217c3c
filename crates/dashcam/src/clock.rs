//! Wall time for recording names

use chrono::{Local, NaiveDateTime};
use tokio::time::Instant;

/// Local wall time anchored once and advanced by the tokio clock.
///
/// Readings never go backwards, even when the system clock is stepped by a
/// late NTP sync.
#[derive(Debug, Clone)]
pub struct WallClock {
    anchor_wall: NaiveDateTime,
    anchor: Instant,
}

impl WallClock {
    /// Anchor at the current local time
    pub fn starting_now() -> Self {
        Self::anchored_at(Local::now().naive_local())
    }

    /// Anchor at an explicit local time
    pub fn anchored_at(wall: NaiveDateTime) -> Self {
        Self {
            anchor_wall: wall,
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}

/// `MM-DD-YYYY_HH-MM-SS.<ext>` for a session started at `start`
pub fn session_file_name(start: NaiveDateTime, ext: &str) -> String {
    format!("{}.{}", start.format("%m-%d-%Y_%H-%M-%S"), ext)
}
