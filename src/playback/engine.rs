//! Playback coordinator keeping a group of media in lockstep.
//!
//! Adapter events and clock ticks are forwarded into a channel and handled one
//! at a time by a driver task, so nothing re-enters the coordinator from a
//! callback. State lives behind a `parking_lot::Mutex` that is never held
//! across an `.await`; timeline events are emitted after it is released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use futures::future::{join_all, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::{TimingObject, TimingSource, TimingVector};
use crate::core::config::SyncConfig;
use crate::core::error::SyncError;
use crate::core::time::{format_time, Seconds, ZERO};
use crate::media::adapter::{MediaEvent, MediaEventKind, MediaId, MediaSource, SynchronizableMedia};
use crate::media::listeners::ListenerId;
use crate::playback::drift::{self, Correction};
use crate::playback::events::{TimelineCallback, TimelineEvent, TimelineEventKind, TimelineEvents};
use crate::playback::intent::{Intent, IntentArbiter, PlayDecision, Side};
use crate::playback::state::{Bucket, Classification};

/// Work item for the driver task
#[derive(Debug, Clone)]
enum Signal {
    Media(MediaId, MediaEvent),
    Tick,
}

/// A registered media
struct MediaHandle {
    adapter: Arc<dyn SynchronizableMedia>,
    identity: usize,
    /// Adapter was created by the coordinator and is detached on removal
    owned: bool,
    listeners: HashMap<MediaEventKind, ListenerId>,
}

struct ClockSlot {
    clock: Arc<dyn TimingObject>,
    tick: Option<ListenerId>,
}

struct CoordinatorState {
    next_id: MediaId,
    sources: HashMap<usize, MediaId>,
    media: BTreeMap<MediaId, MediaHandle>,
    classes: Classification,
    looping: BTreeSet<MediaId>,
    clock: Option<ClockSlot>,
    current_timestamp: Seconds,
    /// Clock position cached by a group pause until the next group play
    paused_timestamp: Option<Seconds>,
    longest: Option<MediaId>,
    full_duration: Seconds,
    /// Nothing has started yet; the autoplay gate is still armed
    first_start: bool,
    autostart: bool,
    autostart_after: Option<usize>,
    first_buffered: usize,
    paused: bool,
    playback_rate: f64,
    volume: Option<f64>,
    intents: IntentArbiter,
    finished: bool,
    /// Media whose end triggered the running loop rollover or auto-stop
    rollover: Option<MediaId>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            next_id: 1,
            sources: HashMap::new(),
            media: BTreeMap::new(),
            classes: Classification::new(),
            looping: BTreeSet::new(),
            clock: None,
            current_timestamp: 0.0,
            paused_timestamp: None,
            longest: None,
            full_duration: 0.0,
            first_start: true,
            autostart: false,
            autostart_after: None,
            first_buffered: 0,
            paused: true,
            playback_rate: 1.0,
            volume: None,
            intents: IntentArbiter::new(),
            finished: false,
            rollover: None,
        }
    }

    fn adapter(&self, id: MediaId) -> Option<Arc<dyn SynchronizableMedia>> {
        self.media.get(&id).map(|handle| Arc::clone(&handle.adapter))
    }

    fn adapters_in(&self, buckets: &[Bucket]) -> Vec<(MediaId, Arc<dyn SynchronizableMedia>)> {
        buckets
            .iter()
            .flat_map(|bucket| self.classes.ids_in(*bucket))
            .filter_map(|id| self.adapter(id).map(|adapter| (id, adapter)))
            .collect()
    }

    fn attach_tick(&mut self, signals: &mpsc::UnboundedSender<Signal>) {
        if let Some(slot) = self.clock.as_mut() {
            if slot.tick.is_none() {
                let tx = signals.clone();
                slot.tick = Some(slot.clock.on_timeupdate(Arc::new(move |_| {
                    let _ = tx.send(Signal::Tick);
                })));
            }
        }
    }

    fn detach_tick(&mut self) {
        if let Some(slot) = self.clock.as_mut() {
            if let Some(id) = slot.tick.take() {
                slot.clock.off_timeupdate(id);
            }
        }
    }

    /// Detach and forget the clock. Returns whether there was one.
    fn drop_clock(&mut self) -> bool {
        self.detach_tick();
        self.clock.take().is_some()
    }

    fn reanchor(&self, position: Seconds) {
        if let Some(slot) = &self.clock {
            slot.clock.update(TimingVector::new(position, self.playback_rate));
        }
    }

    /// Make `found` the timeline reference. Returns the new duration if it
    /// is a different media.
    fn switch_reference(&mut self, found: Option<(MediaId, Seconds)>) -> Option<Seconds> {
        let (id, duration) = found?;
        if self.longest == Some(id) {
            return None;
        }
        self.longest = Some(id);
        self.full_duration = duration;
        Some(duration)
    }

    fn reset_position(&mut self) {
        self.current_timestamp = ZERO;
        self.paused_timestamp = None;
    }

    /// `id` was the last syncing media to end. Bring back what will play
    /// again after the rollover and mark it as running.
    fn begin_rollover(&mut self, id: MediaId) {
        for buffering in self.classes.ids_in(Bucket::Buffering) {
            self.classes.move_to(buffering, Bucket::Syncing);
        }
        let none_loop = self.looping.is_empty();
        for ended in self.classes.ids_in(Bucket::Ended) {
            if none_loop || self.looping.contains(&ended) {
                self.classes.move_to(ended, Bucket::Syncing);
            }
        }
        self.rollover = Some(id);
    }

    /// Bucket for a media whose data just arrived
    fn bucket_at_current(&self, duration: Seconds) -> Bucket {
        if self.current_timestamp > duration {
            Bucket::Ended
        } else {
            Bucket::Syncing
        }
    }
}

struct Inner {
    state: Mutex<CoordinatorState>,
    timing: Arc<dyn TimingSource>,
    config: SyncConfig,
    events: TimelineEvents,
    signals: mpsc::UnboundedSender<Signal>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.lock().take() {
            handle.abort();
        }
    }
}

/// What to do once a newly registered media is classified
enum AfterRegister {
    CheckAutoplay,
    Pause,
    Play,
}

/// Keeps a set of media playing in lockstep against one shared clock.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    /// Create a coordinator with default settings. Must be called inside a
    /// tokio runtime.
    pub fn new(timing: Arc<dyn TimingSource>) -> Self {
        Self::with_config(timing, SyncConfig::default())
    }

    pub fn with_config(timing: Arc<dyn TimingSource>, config: SyncConfig) -> Self {
        let (signals, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            state: Mutex::new(CoordinatorState::new()),
            timing,
            config,
            events: TimelineEvents::new(),
            signals,
            driver: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::drive(Arc::downgrade(&inner), rx));
        *inner.driver.lock() = Some(handle);
        Self { inner }
    }

    async fn drive(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = rx.recv().await {
            let Some(inner) = inner.upgrade() else { break };
            PlaybackCoordinator { inner }.dispatch(signal);
        }
    }

    /// Handle one adapter event or clock tick
    fn dispatch(&self, signal: Signal) {
        match signal {
            Signal::Tick => self.on_tick(),
            Signal::Media(id, event) => match event {
                MediaEvent::Ready => self.on_ready(id),
                MediaEvent::Buffering => self.on_buffering(id),
                MediaEvent::Buffered => self.on_buffered(id),
                MediaEvent::Ended => self.on_ended(id),
                MediaEvent::ForcedPause => {
                    tracing::info!(media = id, "Media was paused by the platform, pausing the group");
                    let this = self.clone();
                    tokio::spawn(async move { this.pause().await });
                    self.inner.events.emit(TimelineEvent::ForcedPause(id));
                }
                MediaEvent::Destroyed => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.remove_media(id).await {
                            tracing::debug!(media = id, error = %err, "Destroyed media was already removed");
                        }
                    });
                }
                MediaEvent::Error(error) => {
                    tracing::warn!(media = id, error = %error, "Media reported an error");
                    self.inner.events.emit(TimelineEvent::MediaError { media: id, error });
                }
                MediaEvent::TimeUpdate(_) => {}
            },
        }
    }

    fn emit_all(&self, events: Vec<TimelineEvent>) {
        for event in events {
            self.inner.events.emit(event);
        }
    }

    // ---- registration ----

    /// Register a media and return its id. Adding a source that is already
    /// registered returns the existing id.
    ///
    /// The first registration arms the autoplay gate for one media. If the
    /// group is playing and the new media refuses to play, it stays registered
    /// and the refusal is published as `TimelineEvent::MediaError`.
    pub async fn add_media(&self, source: impl Into<MediaSource>) -> Result<MediaId, SyncError> {
        let arm = {
            let st = self.inner.state.lock();
            st.first_start && st.autostart_after.is_none() && !st.finished
        };
        if arm {
            self.autoplay_after(1);
        }
        self.register(source.into()).await
    }

    /// Register several media concurrently. The first batch arms the
    /// autoplay gate for its size.
    pub async fn add_media_batch(&self, sources: Vec<MediaSource>) -> Result<Vec<MediaId>, SyncError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let arm = {
            let st = self.inner.state.lock();
            st.first_start && st.autostart_after.is_none() && !st.finished
        };
        if arm {
            self.autoplay_after(sources.len());
        }
        join_all(sources.into_iter().map(|source| self.register(source)))
            .await
            .into_iter()
            .collect()
    }

    async fn register(&self, source: MediaSource) -> Result<MediaId, SyncError> {
        let identity = source.identity();
        let (id, adapter) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.finished {
                return Err(SyncError::Finished);
            }
            if let Some(id) = st.sources.get(&identity) {
                return Ok(*id);
            }

            let (adapter, owned) = source.into_adapter(&self.inner.config);
            let id = st.next_id;
            st.next_id += 1;

            // looping is driven by the coordinator, not the adapter
            if adapter.is_looping() {
                st.looping.insert(id);
            }
            adapter.set_looping(false);

            st.sources.insert(identity, id);
            st.media.insert(
                id,
                MediaHandle {
                    adapter: Arc::clone(&adapter),
                    identity,
                    owned,
                    listeners: HashMap::new(),
                },
            );
            (id, adapter)
        };

        let Some(duration) = adapter.duration().await else {
            tracing::warn!(media = id, "Duration never resolved, dropping media");
            self.forget(id);
            return Err(SyncError::DurationUnavailable(id));
        };

        let mut events = Vec::new();
        let mut preload = false;
        let after = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if !st.media.contains_key(&id) {
                return Err(SyncError::UnknownMedia(id));
            }

            let bucket = if !st.first_start {
                Bucket::Syncing
            } else if adapter.is_ready() {
                st.first_buffered += 1;
                Bucket::Syncing
            } else {
                preload = true;
                Bucket::Buffering
            };
            st.classes.insert(id, bucket, duration);
            tracing::debug!(media = id, duration, ?bucket, "Media registered");

            let mut kinds = vec![];
            if preload {
                kinds.push(MediaEventKind::Ready);
            }
            kinds.extend([
                MediaEventKind::Buffering,
                MediaEventKind::Buffered,
                MediaEventKind::Ended,
                MediaEventKind::ForcedPause,
                MediaEventKind::Destroyed,
                MediaEventKind::Error,
            ]);
            for kind in kinds {
                self.listen(st, id, kind)?;
            }

            let timestamp = st.current_timestamp;
            if st.full_duration < duration {
                st.full_duration = duration;
                st.longest = Some(id);
                if adapter.current_time() != timestamp {
                    adapter.jump_at(timestamp);
                }
                events.push(TimelineEvent::DurationChange(duration));
            } else if timestamp <= duration {
                if adapter.current_time() != timestamp {
                    adapter.jump_at(timestamp);
                }
            } else {
                tracing::debug!(media = id, position = %format_time(timestamp), "New media already ended");
                st.classes.move_to(id, Bucket::Ended);
            }

            if let Some(volume) = st.volume {
                adapter.set_volume(volume);
            }

            if st.first_start {
                AfterRegister::CheckAutoplay
            } else if st.paused {
                AfterRegister::Pause
            } else {
                AfterRegister::Play
            }
        };
        self.emit_all(events);

        if preload {
            let loading = Arc::clone(&adapter);
            tokio::spawn(async move {
                if let Err(err) = loading.preload().await {
                    tracing::warn!(media = id, error = %err, "Preload failed");
                }
            });
        }

        match after {
            AfterRegister::CheckAutoplay => self.check_autoplay(),
            AfterRegister::Pause => {
                if let Err(err) = adapter.pause().await {
                    tracing::debug!(media = id, error = %err, "Pause of new media failed");
                }
            }
            AfterRegister::Play => {
                // the media stays registered; the failure is reported like any adapter error
                if let Err(error) = adapter.play().await {
                    tracing::warn!(media = id, error = %error, "Play of new media failed");
                    self.inner.events.emit(TimelineEvent::MediaError { media: id, error });
                }
            }
        }
        Ok(id)
    }

    /// Subscribe the coordinator to one kind of adapter event
    fn listen(&self, st: &mut CoordinatorState, id: MediaId, kind: MediaEventKind) -> Result<(), SyncError> {
        let handle = st.media.get_mut(&id).ok_or(SyncError::UnknownMedia(id))?;
        if handle.listeners.contains_key(&kind) {
            return Err(SyncError::DuplicateListener { media: id, kind });
        }
        let tx = self.inner.signals.clone();
        let listener = handle.adapter.subscribe(
            kind,
            Arc::new(move |event| {
                let _ = tx.send(Signal::Media(id, event.clone()));
            }),
        );
        handle.listeners.insert(kind, listener);
        Ok(())
    }

    /// Drop a media whose registration failed
    fn forget(&self, id: MediaId) {
        let mut st = self.inner.state.lock();
        if let Some(handle) = st.media.remove(&id) {
            st.sources.remove(&handle.identity);
            st.looping.remove(&id);
            if handle.owned {
                handle.adapter.detach();
            }
        }
    }

    /// Unregister a media, detaching every hook the coordinator installed
    pub async fn remove_media(&self, id: MediaId) -> Result<(), SyncError> {
        let mut events = Vec::new();
        let mut ended_reference = None;
        let mut resume = false;
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let handle = st.media.remove(&id).ok_or(SyncError::UnknownMedia(id))?;
            st.sources.remove(&handle.identity);
            if let Some(count) = st.autostart_after.as_mut() {
                *count = count.saturating_sub(1);
            }

            let was_buffering = st.classes.bucket_of(id) == Some(Bucket::Buffering);
            for listener in handle.listeners.values() {
                handle.adapter.unsubscribe(*listener);
            }
            if st.looping.remove(&id) {
                handle.adapter.set_looping(true);
            }
            if handle.owned {
                handle.adapter.detach();
            }
            st.classes.remove(id);
            tracing::debug!(media = id, "Media removed");

            if st.longest == Some(id) {
                st.longest = None;
                if let Some((longest, duration)) = st.classes.longest() {
                    st.longest = Some(longest);
                    st.full_duration = duration;
                    if st.current_timestamp > duration {
                        st.begin_rollover(longest);
                        ended_reference = Some(longest);
                    }
                    events.push(TimelineEvent::DurationChange(duration));
                }
            }

            if st.classes.is_empty() {
                st.drop_clock();
                st.reset_position();
                st.longest = None;
                st.full_duration = 0.0;
                events.push(TimelineEvent::DurationChange(0.0));
            } else if was_buffering
                && st.classes.count(Bucket::Buffering) == 0
                && st.classes.count(Bucket::Syncing) > 0
            {
                resume = true;
            }
        }
        self.emit_all(events);

        if let Some(longest) = ended_reference {
            self.last_video_has_ended(longest).await;
        }
        if resume {
            if let Err(err) = self.play_lib().await {
                tracing::warn!(error = %err, "Resuming after removal failed");
            }
        }
        Ok(())
    }

    pub async fn remove_media_batch(&self, ids: &[MediaId]) -> Result<(), SyncError> {
        let mut first_error = None;
        for id in ids {
            if let Err(err) = self.remove_media(*id).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Detach everything and refuse further registrations
    pub fn finish(&self) {
        let (handles, looping) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            st.drop_clock();
            st.finished = true;
            st.sources.clear();
            st.classes = Classification::new();
            st.longest = None;
            st.full_duration = 0.0;
            st.reset_position();
            st.intents.reset();
            (std::mem::take(&mut st.media), std::mem::take(&mut st.looping))
        };

        for (id, handle) in handles {
            for listener in handle.listeners.values() {
                handle.adapter.unsubscribe(*listener);
            }
            if looping.contains(&id) {
                handle.adapter.set_looping(true);
            }
            if handle.owned {
                handle.adapter.detach();
            }
        }
        self.inner.events.clear();
        tracing::info!("Coordinator finished");
    }

    // ---- configuration ----

    /// Let the group loop through this media
    pub fn set_loop(&self, id: MediaId, looping: bool) -> Result<(), SyncError> {
        self.set_loop_many(&[id], looping)
    }

    /// Like `set_loop`, all or nothing
    pub fn set_loop_many(&self, ids: &[MediaId], looping: bool) -> Result<(), SyncError> {
        let mut st = self.inner.state.lock();
        if let Some(unknown) = ids.iter().find(|id| !st.media.contains_key(*id)) {
            return Err(SyncError::UnknownMedia(*unknown));
        }
        for id in ids {
            if let Some(handle) = st.media.get(id) {
                handle.adapter.set_looping(false);
            }
            if looping {
                st.looping.insert(*id);
            } else {
                st.looping.remove(id);
            }
        }
        tracing::debug!(?ids, looping, "Loop flag changed");
        Ok(())
    }

    /// Start playback once `count` media have reported ready. If that many
    /// are already registered, start now.
    pub fn autoplay_after(&self, count: usize) {
        let start = {
            let mut st = self.inner.state.lock();
            st.autostart = true;
            if !st.first_start {
                false
            } else if count <= st.classes.len() {
                st.first_start = false;
                true
            } else {
                st.autostart_after = Some(count);
                false
            }
        };
        tracing::debug!(count, start, "Autoplay gate armed");
        if start {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.play().await {
                    tracing::warn!(error = %err, "Autoplay failed");
                }
            });
        }
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        let check = {
            let mut st = self.inner.state.lock();
            if autoplay && !st.autostart && st.first_start {
                st.paused = false;
                st.autostart = true;
                true
            } else {
                st.autostart = autoplay;
                false
            }
        };
        if check {
            self.check_autoplay();
        }
    }

    /// Volume for every media, including ones added later
    pub fn set_volume(&self, level: f64) {
        let mut st = self.inner.state.lock();
        st.volume = Some(level);
        for handle in st.media.values() {
            handle.adapter.set_volume(level);
        }
    }

    /// Base playback rate of the group
    pub fn set_playback_rate(&self, rate: f64) {
        let mut st = self.inner.state.lock();
        st.playback_rate = rate;
        if let Some(slot) = &st.clock {
            let position = slot.clock.query().position;
            slot.clock.update(TimingVector::new(position, rate));
        }
        for (_, adapter) in st.adapters_in(&[Bucket::Syncing]) {
            adapter.set_playback_rate(rate);
        }
        tracing::debug!(rate, "Playback rate changed");
    }

    fn check_autoplay(&self) {
        let start = {
            let mut st = self.inner.state.lock();
            let ready = st.autostart
                && st.first_start
                && st.autostart_after == Some(st.first_buffered);
            if ready {
                st.first_start = false;
            }
            ready.then_some(!st.paused)
        };
        if let Some(user) = start {
            tracing::info!(user, "Autoplay gate reached");
            self.spawn_play(Side::Library);
            if user {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = this.play().await {
                        tracing::warn!(error = %err, "Autoplay failed");
                    }
                });
            }
        }
    }

    // ---- transport ----

    /// User play
    pub async fn play(&self) -> Result<(), SyncError> {
        self.inner.state.lock().first_start = false;
        self.request_play(Side::User).await?;
        self.inner.state.lock().paused = false;
        Ok(())
    }

    /// User pause
    pub async fn pause(&self) {
        self.request_pause(Side::User).await;
        self.inner.state.lock().paused = true;
    }

    /// Move the whole group to `timestamp`
    pub async fn jump_at(&self, timestamp: Seconds) -> Result<(), SyncError> {
        tracing::debug!(position = %format_time(timestamp), "Jumping");
        self.pause_lib().await;
        self.inner.events.emit(TimelineEvent::TimeUpdate(timestamp));

        let seeks = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            st.current_timestamp = timestamp;

            for id in st.classes.ids_in(Bucket::Ended) {
                if st.classes.duration_of(id).is_some_and(|duration| duration >= timestamp) {
                    st.classes.move_to(id, Bucket::Syncing);
                }
            }
            for id in st.classes.ids_in(Bucket::Buffering) {
                let reachable = st.classes.duration_of(id).is_some_and(|duration| duration >= timestamp);
                st.classes.move_to(id, if reachable { Bucket::Syncing } else { Bucket::Ended });
            }

            let mut seeks = Vec::new();
            for (id, adapter) in st.adapters_in(&[Bucket::Syncing]) {
                if adapter.playback_rate() != st.playback_rate {
                    adapter.set_playback_rate(st.playback_rate);
                }
                if st.classes.duration_of(id).is_some_and(|duration| duration >= timestamp) {
                    seeks.push((id, adapter));
                } else {
                    st.classes.move_to(id, Bucket::Ended);
                }
            }
            tracing::debug!(
                syncing = seeks.len(),
                ended = st.classes.count(Bucket::Ended),
                "Media reclassified after jump"
            );
            seeks
        };

        let results = join_all(seeks.iter().map(|(_, adapter)| adapter.seek_group(timestamp))).await;
        for ((id, _), result) in seeks.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(media = *id, error = %err, "Group seek failed");
            }
        }

        let mut events = Vec::new();
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.paused_timestamp.is_some() {
                st.paused_timestamp = Some(timestamp);
            }
            if let Some((id, duration)) = st.classes.longest_in(&[Bucket::Syncing]) {
                st.longest = Some(id);
                st.full_duration = duration;
                events.push(TimelineEvent::DurationChange(duration));
            }
            st.reanchor(timestamp);
        }
        self.emit_all(events);

        self.play_lib().await
    }

    /// Pause, rewind everything to 0 and reset both intents
    pub async fn stop(&self) -> Result<(), SyncError> {
        self.pause().await;

        let mut events = Vec::new();
        let targets = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.drop_clock() {
                events.push(TimelineEvent::TimeUpdate(0.0));
            }
            st.reset_position();
            for id in st.classes.ids_in(Bucket::Ended) {
                st.classes.move_to(id, Bucket::Syncing);
            }
            for id in st.classes.ids_in(Bucket::Buffering) {
                st.classes.move_to(id, Bucket::Syncing);
            }
            let longest = st.classes.longest();
            if let Some(duration) = st.switch_reference(longest) {
                events.push(TimelineEvent::DurationChange(duration));
            }
            st.intents.reset();
            st.adapters_in(&[Bucket::Syncing])
        };
        self.emit_all(events);
        tracing::info!(media = targets.len(), "Stopped");

        let results = join_all(targets.iter().map(|(_, adapter)| adapter.stop())).await;
        for ((id, _), result) in targets.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(media = *id, error = %err, "Stop failed");
            }
        }
        self.play_lib().await
    }

    // ---- intents ----

    async fn play_lib(&self) -> Result<(), SyncError> {
        self.request_play(Side::Library).await
    }

    async fn pause_lib(&self) {
        self.request_pause(Side::Library).await
    }

    fn spawn_play(&self, side: Side) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.request_play(side).await {
                tracing::warn!(?side, error = %err, "Play request failed");
            }
        });
    }

    fn spawn_pause(&self, side: Side) {
        let this = self.clone();
        tokio::spawn(async move { this.request_pause(side).await });
    }

    async fn request_play(&self, side: Side) -> Result<(), SyncError> {
        let (decision, pending) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let decision = st.intents.request_play(side);
            let pending = match decision {
                PlayDecision::Defer => None,
                PlayDecision::JoinInFlight => st
                    .intents
                    .in_flight_generation()
                    .zip(st.intents.in_flight()),
                PlayDecision::StartPlayback => {
                    let weak = Arc::downgrade(&self.inner);
                    let operation = async move {
                        match weak.upgrade() {
                            Some(inner) => PlaybackCoordinator { inner }.play_all().await,
                            None => Ok(()),
                        }
                    }
                    .boxed()
                    .shared();
                    let generation = st.intents.begin(operation.clone());
                    Some((generation, operation))
                }
            };
            tracing::debug!(
                ?side,
                ?decision,
                user = ?st.intents.user(),
                library = ?st.intents.library(),
                "Play requested"
            );
            (decision, pending)
        };

        let Some((generation, operation)) = pending else {
            return Ok(());
        };
        let result = operation.await;
        self.inner
            .state
            .lock()
            .intents
            .settle(generation, side, result.is_ok());
        if let Err(err) = &result {
            tracing::warn!(?side, ?decision, error = %err, "Group play failed");
        }
        result
    }

    async fn request_pause(&self, side: Side) {
        let waiting = self.inner.state.lock().intents.request_pause(side);
        tracing::debug!(?side, waiting = waiting.is_some(), "Pause requested");

        match waiting {
            None => self.pause_all().await,
            Some((generation, operation)) => {
                let settled = operation.await;
                let still_paused = {
                    let mut st = self.inner.state.lock();
                    st.intents.clear_in_flight(generation);
                    st.intents.intent(side) == Intent::WantPause
                };
                // a failed play left nothing playing
                if settled.is_ok() && still_paused {
                    self.pause_all().await;
                }
            }
        }
    }

    async fn play_all(&self) -> Result<(), SyncError> {
        let targets = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let targets = st.adapters_in(&[Bucket::Syncing]);
            if targets.is_empty() {
                return Ok(());
            }

            if st.clock.is_none() {
                let vector = TimingVector::new(st.current_timestamp, st.playback_rate);
                st.clock = Some(ClockSlot {
                    clock: self.inner.timing.create(vector),
                    tick: None,
                });
                st.paused_timestamp = None;
                tracing::debug!(position = %format_time(st.current_timestamp), "Clock started");
            } else if let Some(position) = st.paused_timestamp.take() {
                st.reanchor(position);
            }
            st.attach_tick(&self.inner.signals);
            targets
        };

        tracing::debug!(media = targets.len(), "Playing all");
        let results = join_all(targets.iter().map(|(_, adapter)| adapter.play())).await;
        targets
            .iter()
            .zip(results)
            .try_for_each(|((id, _), result)| result.map_err(|err| SyncError::media(*id, err)))
    }

    async fn pause_all(&self) {
        let targets = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            if st.paused_timestamp.is_none() {
                let position = st.clock.as_ref().map(|slot| slot.clock.query().position);
                if position.is_some() {
                    st.paused_timestamp = position;
                    st.detach_tick();
                }
            }
            st.adapters_in(&[Bucket::Syncing, Bucket::Ended])
        };

        tracing::debug!(media = targets.len(), "Pausing all");
        let results = join_all(targets.iter().map(|(_, adapter)| adapter.pause())).await;
        for ((id, _), result) in targets.iter().zip(results) {
            if let Err(err) = result {
                tracing::debug!(media = *id, error = %err, "Pause failed");
            }
        }
    }

    // ---- adapter events ----

    fn on_tick(&self) {
        let position = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let Some(slot) = &st.clock else { return };
            if st.paused || !st.intents.is_playing() {
                return;
            }
            let position = slot.clock.query().position;
            st.current_timestamp = position;
            if position < self.inner.config.drift_check_after {
                return;
            }

            let base = st.playback_rate;
            for (id, adapter) in st.adapters_in(&[Bucket::Syncing]) {
                if !st.classes.duration_of(id).is_some_and(|duration| duration >= position) {
                    continue;
                }
                let diff = drift::offset(adapter.current_time(), position);
                match drift::correction(diff) {
                    Correction::Normalize => {
                        if adapter.playback_rate() != base {
                            adapter.set_playback_rate(base);
                        }
                    }
                    Correction::Resync => {
                        tracing::debug!(media = id, diff, "Media drifted, resyncing");
                        if adapter.playback_rate() != base {
                            adapter.set_playback_rate(base);
                        }
                        adapter.jump_at(position);
                    }
                    Correction::Nudge(factor) => adapter.set_playback_rate(factor * base),
                }
            }
            position
        };
        self.inner.events.emit(TimelineEvent::TimeUpdate(position));
    }

    fn on_ready(&self, id: MediaId) {
        let (adapter, resume) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let Some(handle) = st.media.get_mut(&id) else { return };
            let Some(listener) = handle.listeners.remove(&MediaEventKind::Ready) else { return };
            handle.adapter.unsubscribe(listener);
            let adapter = Arc::clone(&handle.adapter);

            let Some(duration) = st.classes.duration_of(id) else { return };
            let bucket = st.bucket_at_current(duration);
            st.classes.move_to(id, bucket);
            tracing::debug!(media = id, ?bucket, "First data buffered");

            let resume = if st.first_start {
                st.first_buffered += 1;
                None
            } else if st.classes.count(Bucket::Buffering) == 0 {
                Some(!st.paused)
            } else {
                None
            };
            (adapter, resume)
        };

        if let Some(user) = resume {
            self.spawn_play(Side::Library);
            if user {
                self.spawn_play(Side::User);
            }
        }
        self.check_autoplay();

        if self.inner.state.lock().first_start {
            tokio::spawn(async move {
                if let Err(err) = adapter.pause().await {
                    tracing::debug!(media = id, error = %err, "Pause after first buffering failed");
                }
            });
        }
    }

    fn on_buffering(&self, id: MediaId) {
        {
            let mut st = self.inner.state.lock();
            if st.first_start {
                return;
            }
            match st.classes.bucket_of(id) {
                None | Some(Bucket::Ended) => return,
                Some(_) => {
                    st.classes.move_to(id, Bucket::Buffering);
                }
            }
            tracing::debug!(media = id, buffering = st.classes.count(Bucket::Buffering), "Media buffering");
        }
        self.spawn_pause(Side::Library);
    }

    fn on_buffered(&self, id: MediaId) {
        enum Next {
            Resume { user: bool },
            PauseMedia(Arc<dyn SynchronizableMedia>),
            Wait,
        }

        let next = {
            let mut st = self.inner.state.lock();
            if st.first_start || st.classes.bucket_of(id) != Some(Bucket::Buffering) {
                return;
            }
            let Some(duration) = st.classes.duration_of(id) else { return };
            let bucket = st.bucket_at_current(duration);
            st.classes.move_to(id, bucket);
            tracing::debug!(media = id, ?bucket, "Media buffered");

            if st.classes.count(Bucket::Buffering) == 0 {
                Next::Resume { user: !st.paused }
            } else if !st.intents.allows_playback() {
                match st.adapter(id) {
                    Some(adapter) => Next::PauseMedia(adapter),
                    None => Next::Wait,
                }
            } else {
                Next::Wait
            }
        };

        match next {
            Next::Resume { user } => {
                self.spawn_play(Side::Library);
                if user {
                    self.spawn_play(Side::User);
                }
            }
            Next::PauseMedia(adapter) => {
                tokio::spawn(async move {
                    if let Err(err) = adapter.pause().await {
                        tracing::debug!(media = id, error = %err, "Pause of buffered media failed");
                    }
                });
            }
            Next::Wait => {}
        }
    }

    fn on_ended(&self, id: MediaId) {
        let last = {
            let mut st = self.inner.state.lock();
            if st.rollover == Some(id) {
                tracing::debug!(media = id, "Duplicate end during rollover ignored");
                return;
            }
            match st.classes.bucket_of(id) {
                None => return,
                Some(Bucket::Syncing) if st.classes.count(Bucket::Syncing) == 1 => {
                    st.begin_rollover(id);
                    true
                }
                Some(_) => {
                    st.classes.move_to(id, Bucket::Ended);
                    tracing::debug!(media = id, "Media ended");
                    false
                }
            }
        };
        if last {
            let this = self.clone();
            tokio::spawn(async move { this.last_video_has_ended(id).await });
        }
    }

    /// The last syncing media ended: loop what loops, or stop the group
    async fn last_video_has_ended(&self, id: MediaId) {
        self.pause_lib().await;

        let mut events = Vec::new();
        let stop_group = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            st.reset_position();
            for looping in st.looping.iter() {
                if let Some(adapter) = st.adapter(*looping) {
                    if adapter.playback_rate() != st.playback_rate {
                        adapter.set_playback_rate(st.playback_rate);
                    }
                    adapter.restart();
                }
            }
            events.push(TimelineEvent::TimeUpdate(0.0));
            tracing::info!(media = id, looping = st.looping.len(), "Last media ended");

            if st.looping.contains(&id) {
                st.reanchor(0.0);
                st.attach_tick(&self.inner.signals);
                false
            } else if !st.looping.is_empty() {
                st.classes.move_to(id, Bucket::Ended);
                let longest = st
                    .looping
                    .iter()
                    .filter(|looping| st.classes.bucket_of(**looping) == Some(Bucket::Syncing))
                    .filter_map(|looping| st.classes.duration_of(*looping).map(|d| (*looping, d)))
                    .fold(None, |best: Option<(MediaId, Seconds)>, (looping, duration)| match best {
                        Some((_, best_duration)) if best_duration >= duration => best,
                        _ => Some((looping, duration)),
                    });
                if let Some(duration) = st.switch_reference(longest) {
                    events.push(TimelineEvent::DurationChange(duration));
                }
                st.reanchor(0.0);
                st.attach_tick(&self.inner.signals);
                false
            } else {
                st.drop_clock();
                true
            }
        };
        self.emit_all(events);

        if stop_group {
            self.pause().await;
        }
        let resumed = self.play_lib().await;
        {
            let mut st = self.inner.state.lock();
            if st.rollover == Some(id) {
                st.rollover = None;
            }
        }
        if let Err(err) = resumed {
            tracing::warn!(error = %err, "Resuming after loop failed");
        }
    }

    // ---- introspection ----

    /// Length of the timeline reference, 0 when empty
    pub fn duration(&self) -> Seconds {
        self.inner.state.lock().full_duration
    }

    /// Whether the user paused the group
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn is_autoplay(&self) -> bool {
        self.inner.state.lock().autostart
    }

    /// Registered media, in registration order
    pub fn media(&self) -> Vec<MediaId> {
        self.inner.state.lock().media.keys().copied().collect()
    }

    pub fn adapter(&self, id: MediaId) -> Option<Arc<dyn SynchronizableMedia>> {
        self.inner.state.lock().adapter(id)
    }

    pub fn bucket_of(&self, id: MediaId) -> Option<Bucket> {
        self.inner.state.lock().classes.bucket_of(id)
    }

    /// Media whose duration defines the timeline
    pub fn timeline_reference(&self) -> Option<MediaId> {
        self.inner.state.lock().longest
    }

    pub fn current_timestamp(&self) -> Seconds {
        self.inner.state.lock().current_timestamp
    }

    /// `(user, library)` intents
    pub fn intents(&self) -> (Intent, Intent) {
        let st = self.inner.state.lock();
        (st.intents.user(), st.intents.library())
    }

    pub fn playback_rate(&self) -> f64 {
        self.inner.state.lock().playback_rate
    }

    // ---- events ----

    pub fn on(&self, kind: TimelineEventKind, callback: TimelineCallback) -> ListenerId {
        self.inner.events.on(kind, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Channel receiving every timeline event from now on
    pub fn subscribe(&self) -> crossbeam::channel::Receiver<TimelineEvent> {
        self.inner.events.subscribe()
    }
}
