//! Negotiation between user and library play/pause requests.
//!
//! Media only play when neither the user nor the library wants them paused.
//! Each side holds a three-valued `Intent`; every play request goes through
//! one transition table, and at most one group play operation is in flight,
//! shared by every caller that asks for playback while it runs.

use futures::future::{BoxFuture, Shared};

use crate::core::error::SyncError;

/// What one side wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    WantPause,
    /// Asked to play, waiting for the other side or an in-flight play
    Transitioning,
    WantPlay,
}

/// Origin of a play/pause request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Explicit `play`/`pause` calls from the embedding application
    User,
    /// Requests the coordinator makes itself (buffering, seeks, loops)
    Library,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::User => Side::Library,
            Side::Library => Side::User,
        }
    }
}

/// Outcome of a play request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayDecision {
    /// A group play is already running; await it
    JoinInFlight,
    /// Start a new group play
    StartPlayback,
    /// The other side wants pause; only the intent was recorded
    Defer,
}

/// Group play operation every concurrent caller awaits
pub type PlayOperation = Shared<BoxFuture<'static, Result<(), SyncError>>>;

/// Both intents plus the in-flight play slot
pub struct IntentArbiter {
    user: Intent,
    library: Intent,
    in_flight: Option<(u64, PlayOperation)>,
    next_generation: u64,
}

impl IntentArbiter {
    /// Initial state: the user has not asked for playback, the library is
    /// waiting for its media to become ready.
    pub fn new() -> Self {
        Self {
            user: Intent::WantPause,
            library: Intent::Transitioning,
            in_flight: None,
            next_generation: 1,
        }
    }

    pub fn intent(&self, side: Side) -> Intent {
        match side {
            Side::User => self.user,
            Side::Library => self.library,
        }
    }

    fn set(&mut self, side: Side, intent: Intent) {
        match side {
            Side::User => self.user = intent,
            Side::Library => self.library = intent,
        }
    }

    pub fn user(&self) -> Intent {
        self.user
    }

    pub fn library(&self) -> Intent {
        self.library
    }

    /// Both sides settled on play
    pub fn is_playing(&self) -> bool {
        self.user == Intent::WantPlay && self.library == Intent::WantPlay
    }

    /// Neither side wants pause
    pub fn allows_playback(&self) -> bool {
        self.user != Intent::WantPause && self.library != Intent::WantPause
    }

    /// Record a play request from `side` and decide what to do with it
    pub fn request_play(&mut self, side: Side) -> PlayDecision {
        if self.in_flight.is_some() {
            self.set(side, Intent::Transitioning);
            PlayDecision::JoinInFlight
        } else if self.intent(side.other()) == Intent::WantPause {
            self.set(side, Intent::Transitioning);
            PlayDecision::Defer
        } else if self.intent(side) == Intent::WantPause {
            self.set(side, Intent::Transitioning);
            PlayDecision::StartPlayback
        } else {
            self.user = Intent::WantPlay;
            self.library = Intent::WantPlay;
            PlayDecision::StartPlayback
        }
    }

    /// Current in-flight operation, if any
    pub fn in_flight(&self) -> Option<PlayOperation> {
        self.in_flight.as_ref().map(|(_, operation)| operation.clone())
    }

    /// Store a freshly started play operation. Returns its generation.
    pub fn begin(&mut self, operation: PlayOperation) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.in_flight = Some((generation, operation));
        generation
    }

    /// Record the outcome of a play operation awaited on behalf of `side`
    pub fn settle(&mut self, generation: u64, side: Side, succeeded: bool) {
        if matches!(self.in_flight, Some((current, _)) if current == generation) {
            self.in_flight = None;
        }
        if !succeeded {
            self.set(side, Intent::WantPause);
        } else if self.allows_playback() {
            self.user = Intent::WantPlay;
            self.library = Intent::WantPlay;
        }
    }

    /// Generation of the in-flight operation
    pub fn in_flight_generation(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|(generation, _)| *generation)
    }

    /// Record a pause request. Returns the play operation the pause must
    /// wait for before touching the media.
    pub fn request_pause(&mut self, side: Side) -> Option<(u64, PlayOperation)> {
        self.set(side, Intent::WantPause);
        self.in_flight.clone()
    }

    /// Forget an in-flight operation a pause waited for
    pub fn clear_in_flight(&mut self, generation: u64) {
        if matches!(self.in_flight, Some((current, _)) if current == generation) {
            self.in_flight = None;
        }
    }

    /// Both sides back to pause, nothing in flight
    pub fn reset(&mut self) {
        self.user = Intent::WantPause;
        self.library = Intent::WantPause;
        self.in_flight = None;
    }
}

impl Default for IntentArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IntentArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentArbiter")
            .field("user", &self.user)
            .field("library", &self.library)
            .field("in_flight", &self.in_flight_generation())
            .finish()
    }
}
