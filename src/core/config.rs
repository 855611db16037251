//! Tunables for the coordinator and its adapters.

use std::time::Duration;
use crate::core::time::Seconds;

/// Coordinator and adapter settings.
///
/// The defaults are empirically chosen values that keep seeks inaudible and
/// catch platform auto-pauses on mobile browsers.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// How long an adapter keeps audio muted after a seek, loop restart or play
    pub volume_restore_delay: Duration,
    /// How long a video adapter watches for a forced pause after the volume is restored
    pub video_forced_pause_window: Duration,
    /// How long a volumetric adapter watches for a forced pause after the volume is restored
    pub volumetric_forced_pause_window: Duration,
    /// Clock position below which ticks neither correct drift nor emit time updates
    pub drift_check_after: Seconds,
}

impl SyncConfig {
    /// Create a config with explicit adapter timings
    pub fn new(
        volume_restore_delay: Duration,
        video_forced_pause_window: Duration,
        volumetric_forced_pause_window: Duration,
    ) -> Self {
        Self {
            volume_restore_delay,
            video_forced_pause_window,
            volumetric_forced_pause_window,
            ..Self::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            volume_restore_delay: Duration::from_millis(250),
            video_forced_pause_window: Duration::from_millis(1000),
            volumetric_forced_pause_window: Duration::from_millis(250),
            drift_check_after: 0.5,
        }
    }
}
