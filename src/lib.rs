//! Keeps independently buffering media playing in lockstep.
//!
//! A `PlaybackCoordinator` owns a group of media (plain video elements,
//! volumetric video objects, or any `SynchronizableMedia`), steers them toward
//! one shared timing object, and reconciles user and library play/pause
//! requests into a single playback state.

pub mod clock;
pub mod core;
pub mod media;
pub mod playback;

#[cfg(test)]
mod testing;

pub use crate::clock::{IntervalClock, TimingObject, TimingSource, TimingVector};
pub use crate::core::{MediaError, Seconds, SyncConfig, SyncError};
pub use crate::media::{
    MediaEvent, MediaEventKind, MediaId, MediaSource, SynchronizableMedia, VideoAdapter,
    VideoElement, VolumetricAdapter, VolumetricSource,
};
pub use crate::playback::{Bucket, Intent, PlaybackCoordinator, TimelineEvent, TimelineEventKind};
