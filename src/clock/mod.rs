//! Shared timing source the coordinator steers every media toward.
//!
//! A timing object is a continuously advancing `(position, velocity)` vector.
//! The coordinator re-anchors it on seeks and resumes, queries it for drift
//! correction, and listens to its periodic tick. The cadence of the tick is
//! owned by the implementation.

pub mod interval;

use std::sync::Arc;

use crate::core::time::Seconds;
use crate::media::listeners::{Callback, ListenerId};

pub use interval::IntervalClock;

/// Position and velocity of a timing object at some instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingVector {
    pub position: Seconds,
    /// Seconds of timeline per wall-clock second
    pub velocity: f64,
}

impl TimingVector {
    pub fn new(position: Seconds, velocity: f64) -> Self {
        Self { position, velocity }
    }
}

/// Callback fired on every tick with the vector at that instant
pub type TickCallback = Callback<TimingVector>;

/// Externally driven clock shared by all media of a coordinator
pub trait TimingObject: Send + Sync {
    /// Current interpolated vector
    fn query(&self) -> TimingVector;

    /// Re-anchor the clock
    fn update(&self, vector: TimingVector);

    fn on_timeupdate(&self, callback: TickCallback) -> ListenerId;

    fn off_timeupdate(&self, id: ListenerId);
}

/// Factory for timing objects, handed to the coordinator at construction
pub trait TimingSource: Send + Sync {
    fn create(&self, initial: TimingVector) -> Arc<dyn TimingObject>;
}

impl<F> TimingSource for F
where
    F: Fn(TimingVector) -> Arc<dyn TimingObject> + Send + Sync,
{
    fn create(&self, initial: TimingVector) -> Arc<dyn TimingObject> {
        self(initial)
    }
}
