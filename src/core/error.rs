//! Error types shared by the adapters and the coordinator.

use crate::media::adapter::{MediaEventKind, MediaId};

/// Failure reported by a media source or its adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("Play request rejected: {0}")]
    PlayRejected(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Media has been detached")]
    Detached,
}

/// Error type for the playback coordinator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Media {0} hasn't been added to this coordinator (or it was already removed)")]
    UnknownMedia(MediaId),
    #[error("Attempt to attach a second {kind:?} listener to media {media}")]
    DuplicateListener { media: MediaId, kind: MediaEventKind },
    #[error("Duration of media {0} could not be resolved")]
    DurationUnavailable(MediaId),
    #[error("Media {media} failed: {source}")]
    Media {
        media: MediaId,
        #[source]
        source: MediaError,
    },
    #[error("Coordinator has been finished")]
    Finished,
}

impl SyncError {
    /// Wrap an adapter failure with the id of the media that produced it
    pub fn media(media: MediaId, source: MediaError) -> Self {
        SyncError::Media { media, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SyncError::UnknownMedia(7);
        assert!(err.to_string().contains("Media 7"));

        let err = SyncError::media(3, MediaError::PlayRejected("autoplay".into()));
        assert_eq!(err.to_string(), "Media 3 failed: Play request rejected: autoplay");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;

        let err = SyncError::media(1, MediaError::Detached);
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Media has been detached"));
    }
}
