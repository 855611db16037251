//! Uniform capability contract over heterogeneous media sources.
//!
//! The coordinator only talks to `SynchronizableMedia`. Plain video elements and
//! volumetric sources are wrapped by `VideoAdapter` and `VolumetricAdapter`;
//! callers with their own media type implement the trait directly.

use std::sync::Arc;
use async_trait::async_trait;

use crate::core::config::SyncConfig;
use crate::core::error::MediaError;
use crate::core::time::Seconds;
use crate::media::listeners::{Callback, ListenerId};
use crate::media::video::{VideoAdapter, VideoElement};
use crate::media::volumetric::{VolumetricAdapter, VolumetricSource};

/// Identifier of a media registered with a coordinator
pub type MediaId = u64;

/// Kind of event an adapter can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaEventKind {
    /// First data is buffered and playback can start
    Ready,
    Buffering,
    Buffered,
    Ended,
    TimeUpdate,
    /// Platform-initiated pause the coordinator did not request
    ForcedPause,
    /// Underlying media was disposed
    Destroyed,
    Error,
}

/// Event reported by an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Ready,
    Buffering,
    Buffered,
    Ended,
    TimeUpdate(Seconds),
    ForcedPause,
    Destroyed,
    Error(MediaError),
}

impl MediaEvent {
    pub fn kind(&self) -> MediaEventKind {
        match self {
            MediaEvent::Ready => MediaEventKind::Ready,
            MediaEvent::Buffering => MediaEventKind::Buffering,
            MediaEvent::Buffered => MediaEventKind::Buffered,
            MediaEvent::Ended => MediaEventKind::Ended,
            MediaEvent::TimeUpdate(_) => MediaEventKind::TimeUpdate,
            MediaEvent::ForcedPause => MediaEventKind::ForcedPause,
            MediaEvent::Destroyed => MediaEventKind::Destroyed,
            MediaEvent::Error(_) => MediaEventKind::Error,
        }
    }
}

/// Callback attached to an adapter event
pub type MediaCallback = Callback<MediaEvent>;

/// Contract every synchronized media fulfils.
///
/// Async methods resolve once the underlying media has responded. The adapter
/// never owns the platform resource it wraps; `detach` only removes the
/// adapter's own hooks.
#[async_trait]
pub trait SynchronizableMedia: Send + Sync {
    async fn play(&self) -> Result<(), MediaError>;

    async fn pause(&self) -> Result<(), MediaError>;

    /// Pause and rewind to 0
    async fn stop(&self) -> Result<(), MediaError>;

    /// Resolves once metadata is known; `None` if it never will be
    async fn duration(&self) -> Option<Seconds>;

    /// Request an absolute position. Audio is muted around the seek.
    fn jump_at(&self, timestamp: Seconds);

    /// Re-align the media as part of a group seek and wait for it to land.
    async fn seek_group(&self, timestamp: Seconds) -> Result<(), MediaError> {
        self.jump_at(timestamp);
        Ok(())
    }

    fn current_time(&self) -> Seconds;

    /// Whether the media already has enough data to start playing
    fn is_ready(&self) -> bool;

    /// Start loading a media that is not ready yet
    async fn preload(&self) -> Result<(), MediaError> {
        Ok(())
    }

    /// Play again from the start (used for loop rollover)
    fn restart(&self);

    fn set_volume(&self, level: f64);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&self, rate: f64);

    fn is_looping(&self) -> bool;

    /// Toggle the adapter-level "restart on end" behaviour
    fn set_looping(&self, looping: bool);

    /// Escape hatch to the platform element, if there is one
    fn media_element(&self) -> Option<Arc<dyn VideoElement>> {
        None
    }

    fn subscribe(&self, kind: MediaEventKind, callback: MediaCallback) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId) -> bool;

    /// Remove every hook the adapter installed on the platform media
    fn detach(&self) {}
}

/// Anything that can be registered with a coordinator
#[derive(Clone)]
pub enum MediaSource {
    /// Plain platform video element, wrapped in a `VideoAdapter`
    Video(Arc<dyn VideoElement>),
    /// Volumetric video object, wrapped in a `VolumetricAdapter`
    Volumetric(Arc<dyn VolumetricSource>),
    /// Ready-made adapter supplied by the caller
    Custom(Arc<dyn SynchronizableMedia>),
}

impl MediaSource {
    /// Identity of the underlying object, used to detect double registration
    pub(crate) fn identity(&self) -> usize {
        match self {
            MediaSource::Video(element) => Arc::as_ptr(element) as *const () as usize,
            MediaSource::Volumetric(source) => Arc::as_ptr(source) as *const () as usize,
            MediaSource::Custom(media) => Arc::as_ptr(media) as *const () as usize,
        }
    }

    /// Wrap the source. The flag tells whether the adapter was created here
    /// (and must therefore be detached when the media is removed).
    pub(crate) fn into_adapter(self, config: &SyncConfig) -> (Arc<dyn SynchronizableMedia>, bool) {
        match self {
            MediaSource::Video(element) => (VideoAdapter::new(element, config), true),
            MediaSource::Volumetric(source) => (VolumetricAdapter::new(source, config), true),
            MediaSource::Custom(media) => (media, false),
        }
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Video(_) => write!(f, "MediaSource::Video({:#x})", self.identity()),
            MediaSource::Volumetric(_) => write!(f, "MediaSource::Volumetric({:#x})", self.identity()),
            MediaSource::Custom(_) => write!(f, "MediaSource::Custom({:#x})", self.identity()),
        }
    }
}

impl From<Arc<dyn SynchronizableMedia>> for MediaSource {
    fn from(media: Arc<dyn SynchronizableMedia>) -> Self {
        MediaSource::Custom(media)
    }
}

impl From<Arc<dyn VideoElement>> for MediaSource {
    fn from(element: Arc<dyn VideoElement>) -> Self {
        MediaSource::Video(element)
    }
}

impl From<Arc<dyn VolumetricSource>> for MediaSource {
    fn from(source: Arc<dyn VolumetricSource>) -> Self {
        MediaSource::Volumetric(source)
    }
}
