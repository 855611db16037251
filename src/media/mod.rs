//! Media adapters.
//!
//! Everything the coordinator drives goes through `SynchronizableMedia`.
//! Two adapters ship with the crate: one for plain video elements and one
//! for volumetric video objects.

pub mod adapter;
pub mod listeners;
pub mod video;
pub mod volumetric;

pub use adapter::{
    MediaCallback, MediaEvent, MediaEventKind, MediaId, MediaSource, SynchronizableMedia,
};
pub use listeners::{Callback, ListenerId, Listeners};
pub use video::{ElementCallback, ElementEvent, ReadyState, VideoAdapter, VideoElement};
pub use volumetric::{VolumetricAdapter, VolumetricEvent, VolumetricSource};
