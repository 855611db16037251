//! Test doubles for media, platform elements and clocks.

use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::clock::{TickCallback, TimingObject, TimingSource, TimingVector};
use crate::core::error::MediaError;
use crate::core::time::Seconds;
use crate::media::adapter::{MediaCallback, MediaEvent, MediaEventKind, SynchronizableMedia};
use crate::media::listeners::{ListenerId, Listeners};
use crate::media::video::{ElementCallback, ElementEvent, ReadyState, VideoElement};
use crate::media::volumetric::{VolumetricEvent, VolumetricSource};

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Record every event of `kind` an adapter reports
pub fn record_events(
    adapter: &dyn SynchronizableMedia,
    kind: MediaEventKind,
) -> (Arc<Mutex<Vec<MediaEvent>>>, ListenerId) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = adapter.subscribe(kind, Arc::new(move |event| sink.lock().push(event.clone())));
    (seen, id)
}

const ELEMENT_EVENTS: [ElementEvent; 8] = [
    ElementEvent::LoadedMetadata,
    ElementEvent::CanPlay,
    ElementEvent::Waiting,
    ElementEvent::Playing,
    ElementEvent::Pause,
    ElementEvent::Ended,
    ElementEvent::TimeUpdate,
    ElementEvent::Error,
];

const VOLUMETRIC_EVENTS: [VolumetricEvent; 8] = [
    VolumetricEvent::Buffering,
    VolumetricEvent::Buffered,
    VolumetricEvent::DataBuffered,
    VolumetricEvent::VideoEnded,
    VolumetricEvent::VideoPause,
    VolumetricEvent::VideoTimeUpdate,
    VolumetricEvent::Disposed,
    VolumetricEvent::Error,
];

// ---- SynchronizableMedia ----

struct MockMediaState {
    current_time: Seconds,
    rate: f64,
    ready: bool,
    looping: bool,
    volume: Option<f64>,
    play_calls: usize,
    pause_calls: usize,
    stop_calls: usize,
    restart_calls: usize,
    preload_calls: usize,
    jumps: Vec<Seconds>,
    group_seeks: Vec<Seconds>,
    play_error: Option<MediaError>,
    detached: bool,
}

/// Scriptable `SynchronizableMedia`
pub struct MockMedia {
    duration: Option<Seconds>,
    state: Mutex<MockMediaState>,
    play_gate: watch::Sender<bool>,
    listeners: Listeners<MediaEventKind, MediaEvent>,
}

impl MockMedia {
    /// Ready media with a known duration
    pub fn new(duration: Seconds) -> Arc<Self> {
        Self::build(Some(duration), true)
    }

    /// Media that still has to buffer its first data
    pub fn pending(duration: Seconds) -> Arc<Self> {
        Self::build(Some(duration), false)
    }

    /// Media whose duration never resolves
    pub fn without_duration() -> Arc<Self> {
        Self::build(None, true)
    }

    fn build(duration: Option<Seconds>, ready: bool) -> Arc<Self> {
        let (play_gate, _) = watch::channel(true);
        Arc::new(Self {
            duration,
            state: Mutex::new(MockMediaState {
                current_time: 0.0,
                rate: 1.0,
                ready,
                looping: false,
                volume: None,
                play_calls: 0,
                pause_calls: 0,
                stop_calls: 0,
                restart_calls: 0,
                preload_calls: 0,
                jumps: Vec::new(),
                group_seeks: Vec::new(),
                play_error: None,
                detached: false,
            }),
            play_gate,
            listeners: Listeners::new(),
        })
    }

    /// Deliver an event to the subscribed listeners
    pub fn fire(&self, event: MediaEvent) {
        self.listeners.emit(event.kind(), &event);
    }

    /// Make `play` block until `release_play`
    pub fn hold_play(&self) {
        self.play_gate.send_replace(false);
    }

    pub fn release_play(&self) {
        self.play_gate.send_replace(true);
    }

    pub fn fail_play(&self, error: Option<MediaError>) {
        self.state.lock().play_error = error;
    }

    pub fn set_current_time(&self, timestamp: Seconds) {
        self.state.lock().current_time = timestamp;
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    pub fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.state.lock().pause_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    pub fn restart_calls(&self) -> usize {
        self.state.lock().restart_calls
    }

    pub fn preload_calls(&self) -> usize {
        self.state.lock().preload_calls
    }

    pub fn jumps(&self) -> Vec<Seconds> {
        self.state.lock().jumps.clone()
    }

    pub fn group_seeks(&self) -> Vec<Seconds> {
        self.state.lock().group_seeks.clone()
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    pub fn volume(&self) -> Option<f64> {
        self.state.lock().volume
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }

    pub fn listener_count(&self, kind: MediaEventKind) -> usize {
        self.listeners.count(kind)
    }
}

#[async_trait]
impl SynchronizableMedia for MockMedia {
    async fn play(&self) -> Result<(), MediaError> {
        self.state.lock().play_calls += 1;
        let mut gate = self.play_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        match self.state.lock().play_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn pause(&self) -> Result<(), MediaError> {
        self.state.lock().pause_calls += 1;
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        let mut st = self.state.lock();
        st.stop_calls += 1;
        st.current_time = 0.0;
        Ok(())
    }

    async fn duration(&self) -> Option<Seconds> {
        self.duration
    }

    fn jump_at(&self, timestamp: Seconds) {
        let mut st = self.state.lock();
        st.jumps.push(timestamp);
        st.current_time = timestamp;
    }

    async fn seek_group(&self, timestamp: Seconds) -> Result<(), MediaError> {
        let mut st = self.state.lock();
        st.group_seeks.push(timestamp);
        st.current_time = timestamp;
        Ok(())
    }

    fn current_time(&self) -> Seconds {
        self.state.lock().current_time
    }

    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    async fn preload(&self) -> Result<(), MediaError> {
        self.state.lock().preload_calls += 1;
        Ok(())
    }

    fn restart(&self) {
        let mut st = self.state.lock();
        st.restart_calls += 1;
        st.current_time = 0.0;
    }

    fn set_volume(&self, level: f64) {
        self.state.lock().volume = Some(level);
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn set_playback_rate(&self, rate: f64) {
        self.state.lock().rate = rate;
    }

    fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    fn set_looping(&self, looping: bool) {
        self.state.lock().looping = looping;
    }

    fn subscribe(&self, kind: MediaEventKind, callback: MediaCallback) -> ListenerId {
        self.listeners.add(kind, callback)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn detach(&self) {
        self.state.lock().detached = true;
    }
}

// ---- VideoElement ----

struct ElementState {
    position: Seconds,
    duration: Option<Seconds>,
    ready_state: ReadyState,
    volume: f64,
    muted: bool,
    rate: f64,
    play_calls: usize,
    pause_calls: usize,
    seeks: Vec<Seconds>,
}

/// In-memory `VideoElement`
pub struct MockElement {
    state: Mutex<ElementState>,
    listeners: Listeners<ElementEvent, ()>,
}

impl MockElement {
    pub fn new(duration: Option<Seconds>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ElementState {
                position: 0.0,
                duration,
                ready_state: ReadyState::HaveMetadata,
                volume: 1.0,
                muted: false,
                rate: 1.0,
                play_calls: 0,
                pause_calls: 0,
                seeks: Vec::new(),
            }),
            listeners: Listeners::new(),
        })
    }

    pub fn fire(&self, event: ElementEvent) {
        self.listeners.emit(event, &());
    }

    pub fn load_metadata(&self, duration: Seconds) {
        self.state.lock().duration = Some(duration);
        self.fire(ElementEvent::LoadedMetadata);
    }

    /// Move the playhead without recording a seek
    pub fn set_position(&self, position: Seconds) {
        self.state.lock().position = position;
    }

    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.state.lock().ready_state = ready_state;
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    pub fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.state.lock().pause_calls
    }

    pub fn seeks(&self) -> Vec<Seconds> {
        self.state.lock().seeks.clone()
    }

    pub fn listener_count(&self) -> usize {
        ELEMENT_EVENTS
            .iter()
            .map(|event| self.listeners.count(*event))
            .sum()
    }
}

#[async_trait]
impl VideoElement for MockElement {
    async fn play(&self) -> Result<(), MediaError> {
        self.state.lock().play_calls += 1;
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().pause_calls += 1;
    }

    fn current_time(&self) -> Seconds {
        self.state.lock().position
    }

    fn set_current_time(&self, timestamp: Seconds) {
        let mut st = self.state.lock();
        st.position = timestamp;
        st.seeks.push(timestamp);
    }

    fn duration(&self) -> Option<Seconds> {
        self.state.lock().duration
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn set_volume(&self, level: f64) {
        self.state.lock().volume = level;
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn set_playback_rate(&self, rate: f64) {
        self.state.lock().rate = rate;
    }

    fn add_event_listener(&self, event: ElementEvent, callback: ElementCallback) -> ListenerId {
        self.listeners.add(event, Arc::new(move |_| callback()))
    }

    fn remove_event_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

// ---- VolumetricSource ----

struct VolumetricState {
    duration: Seconds,
    volume: f64,
    native_loop: Option<bool>,
    buffered_once: bool,
    play_calls: usize,
    pause_calls: usize,
    stop_calls: usize,
    jumps: Vec<Seconds>,
    error: Option<MediaError>,
}

/// In-memory `VolumetricSource` without a backing video element
pub struct MockVolumetric {
    state: Mutex<VolumetricState>,
    listeners: Listeners<VolumetricEvent, ()>,
}

impl MockVolumetric {
    pub fn new(duration: Seconds) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(VolumetricState {
                duration,
                volume: 1.0,
                native_loop: None,
                buffered_once: false,
                play_calls: 0,
                pause_calls: 0,
                stop_calls: 0,
                jumps: Vec::new(),
                error: None,
            }),
            listeners: Listeners::new(),
        })
    }

    pub fn fire(&self, event: VolumetricEvent) {
        self.listeners.emit(event, &());
    }

    /// Record an error and report it
    pub fn fail(&self, error: MediaError) {
        self.state.lock().error = Some(error);
        self.fire(VolumetricEvent::Error);
    }

    pub fn set_buffered_once(&self, buffered: bool) {
        self.state.lock().buffered_once = buffered;
    }

    pub fn native_loop(&self) -> Option<bool> {
        self.state.lock().native_loop
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    pub fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.state.lock().pause_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.state.lock().stop_calls
    }

    pub fn jumps(&self) -> Vec<Seconds> {
        self.state.lock().jumps.clone()
    }

    pub fn listener_count(&self) -> usize {
        VOLUMETRIC_EVENTS
            .iter()
            .map(|event| self.listeners.count(*event))
            .sum()
    }
}

#[async_trait]
impl VolumetricSource for MockVolumetric {
    async fn play(&self) -> Result<(), MediaError> {
        self.state.lock().play_calls += 1;
        Ok(())
    }

    async fn pause(&self) -> Result<(), MediaError> {
        self.state.lock().pause_calls += 1;
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.state.lock().stop_calls += 1;
        Ok(())
    }

    async fn jump_at(&self, timestamp: Seconds) -> Result<(), MediaError> {
        self.state.lock().jumps.push(timestamp);
        Ok(())
    }

    async fn duration(&self) -> Option<Seconds> {
        Some(self.state.lock().duration)
    }

    fn set_volume(&self, level: f64) {
        self.state.lock().volume = level;
    }

    fn set_native_loop(&self, looping: bool) {
        self.state.lock().native_loop = Some(looping);
    }

    fn has_buffered_once(&self) -> bool {
        self.state.lock().buffered_once
    }

    fn video_element(&self) -> Option<Arc<dyn VideoElement>> {
        None
    }

    fn last_error(&self) -> Option<MediaError> {
        self.state.lock().error.clone()
    }

    fn on(&self, event: VolumetricEvent, callback: ElementCallback) -> ListenerId {
        self.listeners.add(event, Arc::new(move |_| callback()))
    }

    fn off(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

// ---- clock ----

/// Clock whose position only moves when told to
pub struct ManualClock {
    vector: Mutex<TimingVector>,
    updates: Mutex<Vec<TimingVector>>,
    listeners: Listeners<(), TimingVector>,
}

impl ManualClock {
    pub fn new(initial: TimingVector) -> Arc<Self> {
        Arc::new(Self {
            vector: Mutex::new(initial),
            updates: Mutex::new(Vec::new()),
            listeners: Listeners::new(),
        })
    }

    pub fn set_position(&self, position: Seconds) {
        self.vector.lock().position = position;
    }

    /// Fire one tick at the current position
    pub fn tick(&self) {
        let vector = *self.vector.lock();
        self.listeners.emit((), &vector);
    }

    /// Every `update` call received
    pub fn updates(&self) -> Vec<TimingVector> {
        self.updates.lock().clone()
    }

    pub fn tick_listeners(&self) -> usize {
        self.listeners.count(())
    }
}

impl TimingObject for ManualClock {
    fn query(&self) -> TimingVector {
        *self.vector.lock()
    }

    fn update(&self, vector: TimingVector) {
        *self.vector.lock() = vector;
        self.updates.lock().push(vector);
    }

    fn on_timeupdate(&self, callback: TickCallback) -> ListenerId {
        self.listeners.add((), callback)
    }

    fn off_timeupdate(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

/// Factory handing out `ManualClock`s and remembering them
#[derive(Default)]
pub struct ManualClockSource {
    clocks: Mutex<Vec<Arc<ManualClock>>>,
}

impl ManualClockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.clocks.lock().len()
    }

    pub fn latest(&self) -> Option<Arc<ManualClock>> {
        self.clocks.lock().last().cloned()
    }
}

impl TimingSource for ManualClockSource {
    fn create(&self, initial: TimingVector) -> Arc<dyn TimingObject> {
        let clock = ManualClock::new(initial);
        self.clocks.lock().push(Arc::clone(&clock));
        clock
    }
}
