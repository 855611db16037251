//! Drift correction between a media and the shared clock.
//!
//! Small offsets are absorbed by nudging the playback rate, large ones by a
//! hard seek. The bands are empirically tuned and must stay as they are.

use crate::core::time::Seconds;

/// Offsets below this are considered in sync
pub const IN_SYNC: Seconds = 0.5;

/// Offsets beyond this are corrected by seeking
pub const RESYNC: Seconds = 1.5;

/// What to do with a media given its offset from the clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Back to the base rate
    Normalize,
    /// Reset the rate and seek to the clock position
    Resync,
    /// Play at this multiple of the base rate
    Nudge(f64),
}

/// Offset of a media from the clock; positive when the media is ahead
#[inline]
pub fn offset(media_time: Seconds, clock_position: Seconds) -> Seconds {
    media_time - clock_position
}

/// Pick a correction for `diff = media_time - clock_position`
pub fn correction(diff: Seconds) -> Correction {
    if diff.abs() < IN_SYNC {
        Correction::Normalize
    } else if diff.abs() > RESYNC {
        Correction::Resync
    } else if diff >= IN_SYNC {
        let factor = if diff < 0.75 {
            0.9
        } else if diff < 0.9 {
            0.8
        } else if diff < 1.2 {
            0.75
        } else {
            0.7
        };
        Correction::Nudge(factor)
    } else {
        let factor = if diff < -1.2 {
            1.3
        } else if diff < -0.9 {
            1.25
        } else if diff < -0.75 {
            1.2
        } else {
            1.1
        };
        Correction::Nudge(factor)
    }
}
