//! Timeline events published by the coordinator.

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::core::error::MediaError;
use crate::core::time::Seconds;
use crate::media::adapter::MediaId;
use crate::media::listeners::{Callback, ListenerId, Listeners};

/// Event on the shared timeline
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    /// Shared position, periodically while playing
    TimeUpdate(Seconds),
    /// Timeline length changed
    DurationChange(Seconds),
    /// A media was paused by the platform; the group was paused with it
    ForcedPause(MediaId),
    MediaError { media: MediaId, error: MediaError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineEventKind {
    TimeUpdate,
    DurationChange,
    ForcedPause,
    MediaError,
}

impl TimelineEvent {
    pub fn kind(&self) -> TimelineEventKind {
        match self {
            TimelineEvent::TimeUpdate(_) => TimelineEventKind::TimeUpdate,
            TimelineEvent::DurationChange(_) => TimelineEventKind::DurationChange,
            TimelineEvent::ForcedPause(_) => TimelineEventKind::ForcedPause,
            TimelineEvent::MediaError { .. } => TimelineEventKind::MediaError,
        }
    }
}

pub type TimelineCallback = Callback<TimelineEvent>;

/// Callback registry plus channel subscribers
#[derive(Default)]
pub struct TimelineEvents {
    callbacks: Listeners<TimelineEventKind, TimelineEvent>,
    subscribers: Mutex<Vec<Sender<TimelineEvent>>>,
}

impl TimelineEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: TimelineEventKind, callback: TimelineCallback) -> ListenerId {
        self.callbacks.add(kind, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.callbacks.remove(id)
    }

    /// New channel receiving every event from now on
    pub fn subscribe(&self) -> Receiver<TimelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: TimelineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
        self.callbacks.emit(event.kind(), &event);
    }

    /// Drop every callback and subscriber
    pub fn clear(&self) {
        self.callbacks.clear();
        self.subscribers.lock().clear();
    }
}
