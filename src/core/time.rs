//! Time representation for synchronized playback.
//! Media positions are reported by the platform in seconds (f64), so that is
//! the unit used throughout the coordinator. Timers use `std::time::Duration`.

use std::time::Duration;

/// Position or length on a media timeline, in seconds.
pub type Seconds = f64;

/// Time constants for conversions
pub mod constants {
    pub const MILLIS_PER_SECOND: f64 = 1_000.0;
    pub const SECONDS_PER_MINUTE: u64 = 60;
    pub const SECONDS_PER_HOUR: u64 = 3_600;
}

/// Timeline start
pub const ZERO: Seconds = 0.0;

/// Convert a `Duration` to seconds
#[inline]
pub fn from_duration(duration: Duration) -> Seconds {
    duration.as_secs_f64()
}

/// Format a position as HH:MM:SS.mmm for log output
pub fn format_time(seconds: Seconds) -> String {
    let total_millis = (seconds.max(0.0) * constants::MILLIS_PER_SECOND).round() as u64;
    let millis = total_millis % 1_000;
    let total_seconds = total_millis / 1_000;
    let hours = total_seconds / constants::SECONDS_PER_HOUR;
    let minutes = (total_seconds % constants::SECONDS_PER_HOUR) / constants::SECONDS_PER_MINUTE;
    let secs = total_seconds % constants::SECONDS_PER_MINUTE;

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}
