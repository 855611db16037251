//! Local timing object driven by the tokio timer.

use std::sync::{Arc, Weak};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::{TickCallback, TimingObject, TimingSource, TimingVector};
use crate::core::time::{from_duration, Seconds};
use crate::media::listeners::{ListenerId, Listeners};

struct Anchor {
    position: Seconds,
    velocity: f64,
    at: Instant,
}

/// Clock that interpolates from its last anchor and ticks on a fixed period
pub struct IntervalClock {
    anchor: Mutex<Anchor>,
    listeners: Listeners<(), TimingVector>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalClock {
    /// Tick period used by `IntervalClock::default_source`
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

    /// Start a clock at `initial`. Must be called inside a tokio runtime.
    pub fn new(initial: TimingVector, period: Duration) -> Arc<Self> {
        let clock = Arc::new(Self {
            anchor: Mutex::new(Anchor {
                position: initial.position,
                velocity: initial.velocity,
                at: Instant::now(),
            }),
            listeners: Listeners::new(),
            ticker: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run(Arc::downgrade(&clock), period));
        *clock.ticker.lock() = Some(handle);
        clock
    }

    /// Factory producing interval clocks with the given period
    pub fn source(period: Duration) -> Arc<dyn TimingSource> {
        Arc::new(move |initial: TimingVector| -> Arc<dyn TimingObject> {
            let clock: Arc<dyn TimingObject> = IntervalClock::new(initial, period);
            clock
        })
    }

    pub fn default_source() -> Arc<dyn TimingSource> {
        Self::source(Self::DEFAULT_PERIOD)
    }

    async fn run(clock: Weak<IntervalClock>, period: Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            let Some(clock) = clock.upgrade() else { break };
            let vector = clock.query();
            clock.listeners.emit((), &vector);
        }
    }
}

impl TimingObject for IntervalClock {
    fn query(&self) -> TimingVector {
        let anchor = self.anchor.lock();
        let elapsed = from_duration(anchor.at.elapsed());
        TimingVector::new(anchor.position + anchor.velocity * elapsed, anchor.velocity)
    }

    fn update(&self, vector: TimingVector) {
        let mut anchor = self.anchor.lock();
        anchor.position = vector.position;
        anchor.velocity = vector.velocity;
        anchor.at = Instant::now();
    }

    fn on_timeupdate(&self, callback: TickCallback) -> ListenerId {
        self.listeners.add((), callback)
    }

    fn off_timeupdate(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

impl Drop for IntervalClock {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_query_interpolates() {
        let clock = IntervalClock::new(TimingVector::new(2.0, 1.0), IntervalClock::DEFAULT_PERIOD);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!((clock.query().position - 3.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_reanchors() {
        let clock = IntervalClock::new(TimingVector::new(0.0, 1.0), IntervalClock::DEFAULT_PERIOD);
        tokio::time::advance(Duration::from_secs(3)).await;

        clock.update(TimingVector::new(10.0, 2.0));
        tokio::time::advance(Duration::from_secs(1)).await;
        let vector = clock.query();
        assert!((vector.position - 12.0).abs() < 1e-9);
        assert_eq!(vector.velocity, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_velocity_holds_position() {
        let clock = IntervalClock::new(TimingVector::new(4.0, 0.0), IntervalClock::DEFAULT_PERIOD);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.query().position, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_period() {
        let clock = IntervalClock::new(TimingVector::new(0.0, 1.0), IntervalClock::DEFAULT_PERIOD);
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        let id = clock.on_timeupdate(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(1250)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        clock.off_timeupdate(id);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_creates_independent_clocks() {
        let source = IntervalClock::source(Duration::from_millis(100));
        let first = source.create(TimingVector::new(1.0, 1.0));
        let second = source.create(TimingVector::new(5.0, 0.0));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!((first.query().position - 2.0).abs() < 1e-9);
        assert_eq!(second.query().position, 5.0);
    }
}
