//! Adapter for plain platform video elements.
//!
//! The element itself is an external collaborator described by `VideoElement`.
//! `VideoAdapter` turns its native events into `MediaEvent`s, mutes audio
//! around seeks, and implements looping by restarting on `Ended` instead of
//! relying on the element's native loop, which double-fires `ended` on some
//! platforms when several media play at once.

use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::core::config::SyncConfig;
use crate::core::error::MediaError;
use crate::core::time::Seconds;
use crate::media::adapter::{MediaCallback, MediaEvent, MediaEventKind, SynchronizableMedia};
use crate::media::listeners::{ListenerId, Listeners};

/// How much data a video element has, ordered from least to most
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// Native events of a video element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementEvent {
    LoadedMetadata,
    CanPlay,
    Waiting,
    Playing,
    Pause,
    Ended,
    TimeUpdate,
    Error,
}

/// Callback attached to a native element or volumetric event
pub type ElementCallback = Arc<dyn Fn() + Send + Sync>;

/// Platform video element driven by a `VideoAdapter`
#[async_trait]
pub trait VideoElement: Send + Sync {
    /// Resolves when the platform accepted the play request
    async fn play(&self) -> Result<(), MediaError>;

    fn pause(&self);

    fn current_time(&self) -> Seconds;

    fn set_current_time(&self, timestamp: Seconds);

    /// Imprecise but cheaper seek where the platform offers one
    fn fast_seek(&self, timestamp: Seconds) {
        self.set_current_time(timestamp);
    }

    /// `None` until metadata is loaded
    fn duration(&self) -> Option<Seconds>;

    fn ready_state(&self) -> ReadyState;

    fn set_volume(&self, level: f64);

    fn set_muted(&self, muted: bool);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&self, rate: f64);

    /// Last error reported through `ElementEvent::Error`
    fn error(&self) -> Option<MediaError> {
        None
    }

    fn add_event_listener(&self, event: ElementEvent, callback: ElementCallback) -> ListenerId;

    fn remove_event_listener(&self, id: ListenerId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Paused,
    Playing,
}

type PendingPlay = Shared<BoxFuture<'static, Result<(), MediaError>>>;

struct VideoState {
    volume: f64,
    status: Status,
    looping: bool,
    loop_listener: Option<ListenerId>,
    pause_watch: Option<ListenerId>,
    play_in_flight: Option<PendingPlay>,
    bridged: Vec<ListenerId>,
    detached: bool,
}

/// `SynchronizableMedia` over a `VideoElement`
pub struct VideoAdapter {
    element: Arc<dyn VideoElement>,
    this: Weak<VideoAdapter>,
    restore_delay: Duration,
    watch_window: Duration,
    duration_tx: watch::Sender<Option<Seconds>>,
    state: Mutex<VideoState>,
    listeners: Listeners<MediaEventKind, MediaEvent>,
}

impl VideoAdapter {
    /// Wrap an element. Must be called inside a tokio runtime.
    pub fn new(element: Arc<dyn VideoElement>, config: &SyncConfig) -> Arc<Self> {
        let (duration_tx, _) = watch::channel(element.duration());
        let adapter = Arc::new_cyclic(|this| Self {
            element,
            this: this.clone(),
            restore_delay: config.volume_restore_delay,
            watch_window: config.video_forced_pause_window,
            duration_tx,
            state: Mutex::new(VideoState {
                volume: 1.0,
                status: Status::Paused,
                looping: false,
                loop_listener: None,
                pause_watch: None,
                play_in_flight: None,
                bridged: Vec::new(),
                detached: false,
            }),
            listeners: Listeners::new(),
        });
        adapter.bridge_events();
        adapter
    }

    /// The wrapped element
    pub fn element(&self) -> &Arc<dyn VideoElement> {
        &self.element
    }

    fn bridge_events(&self) {
        let bridged = vec![
            self.on_element(ElementEvent::LoadedMetadata, |adapter| {
                if let Some(duration) = adapter.element.duration() {
                    tracing::debug!(duration, "Video metadata loaded");
                    adapter.duration_tx.send_replace(Some(duration));
                }
            }),
            self.on_element(ElementEvent::Waiting, |adapter| {
                adapter.listeners.emit(MediaEventKind::Buffering, &MediaEvent::Buffering);
            }),
            self.on_element(ElementEvent::CanPlay, |adapter| {
                adapter.listeners.emit(MediaEventKind::Ready, &MediaEvent::Ready);
                adapter.listeners.emit(MediaEventKind::Buffered, &MediaEvent::Buffered);
            }),
            self.on_element(ElementEvent::Ended, |adapter| {
                adapter.listeners.emit(MediaEventKind::Ended, &MediaEvent::Ended);
            }),
            self.on_element(ElementEvent::TimeUpdate, |adapter| {
                let event = MediaEvent::TimeUpdate(adapter.element.current_time());
                adapter.listeners.emit(MediaEventKind::TimeUpdate, &event);
            }),
            self.on_element(ElementEvent::Error, |adapter| {
                let error = adapter
                    .element
                    .error()
                    .unwrap_or_else(|| MediaError::Decode("video element error".into()));
                adapter.listeners.emit(MediaEventKind::Error, &MediaEvent::Error(error));
            }),
        ];
        self.state.lock().bridged = bridged;
    }

    /// Attach a native listener that holds only a weak reference to the adapter
    fn on_element<F>(&self, event: ElementEvent, handler: F) -> ListenerId
    where
        F: Fn(&VideoAdapter) + Send + Sync + 'static,
    {
        let this = self.this.clone();
        self.element.add_event_listener(
            event,
            Arc::new(move || {
                if let Some(adapter) = this.upgrade() {
                    handler(&adapter);
                }
            }),
        )
    }

    fn mute(&self) {
        self.element.set_volume(0.0);
        self.element.set_muted(true);
    }

    /// After a short delay, restore the volume and watch for a platform pause
    /// for a while.
    fn schedule_restore(&self) {
        let this = self.this.clone();
        let delay = self.restore_delay;
        let window = self.watch_window;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let watch_id = {
                let Some(adapter) = this.upgrade() else { return };
                let watch_id = adapter.on_element(ElementEvent::Pause, |a| a.check_forced_pause());
                let (volume, replaced, detached) = {
                    let mut st = adapter.state.lock();
                    let replaced = st.pause_watch.replace(watch_id);
                    (st.volume, replaced, st.detached)
                };
                if let Some(old) = replaced {
                    adapter.element.remove_event_listener(old);
                }
                if detached {
                    adapter.clear_pause_watch(watch_id);
                    return;
                }
                adapter.element.set_volume(volume);
                adapter.element.set_muted(volume <= 0.0);
                watch_id
            };

            tokio::time::sleep(window).await;
            if let Some(adapter) = this.upgrade() {
                adapter.clear_pause_watch(watch_id);
            }
        });
    }

    fn clear_pause_watch(&self, watch_id: ListenerId) {
        let removed = {
            let mut st = self.state.lock();
            if st.pause_watch == Some(watch_id) {
                st.pause_watch.take()
            } else {
                None
            }
        };
        if let Some(id) = removed {
            self.element.remove_event_listener(id);
        }
    }

    fn check_forced_pause(&self) {
        let watch = {
            let mut st = self.state.lock();
            if st.status != Status::Playing {
                return;
            }
            st.pause_watch.take()
        };
        if let Some(id) = watch {
            self.element.remove_event_listener(id);
        }
        tracing::debug!("Video was paused by the platform");
        self.listeners.emit(MediaEventKind::ForcedPause, &MediaEvent::ForcedPause);
    }
}

#[async_trait]
impl SynchronizableMedia for VideoAdapter {
    async fn play(&self) -> Result<(), MediaError> {
        self.state.lock().status = Status::Playing;
        let _ = self.duration().await;

        let pending = {
            let mut st = self.state.lock();
            if st.detached {
                return Err(MediaError::Detached);
            }
            if st.status != Status::Playing {
                return Ok(());
            }
            match &st.play_in_flight {
                Some(pending) => pending.clone(),
                None => {
                    self.mute();
                    let element = Arc::clone(&self.element);
                    let pending = async move { element.play().await }.boxed().shared();
                    st.play_in_flight = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.await;
        self.state.lock().play_in_flight = None;
        self.schedule_restore();
        result
    }

    async fn pause(&self) -> Result<(), MediaError> {
        let pending = {
            let mut st = self.state.lock();
            if st.status != Status::Playing {
                return Ok(());
            }
            st.status = Status::Paused;
            st.play_in_flight.clone()
        };
        if let Some(pending) = pending {
            let _ = pending.await;
        }
        // a play request may have arrived while the pending play settled
        if self.state.lock().status == Status::Paused {
            self.element.pause();
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.state.lock().status = Status::Paused;
        self.element.pause();
        self.element.set_current_time(0.0);
        Ok(())
    }

    async fn duration(&self) -> Option<Seconds> {
        let mut rx = self.duration_tx.subscribe();
        let resolved = rx.wait_for(|duration| duration.is_some()).await;
        match resolved {
            Ok(duration) => *duration,
            Err(_) => None,
        }
    }

    fn jump_at(&self, timestamp: Seconds) {
        self.mute();
        self.element.set_current_time(timestamp);
        self.schedule_restore();
    }

    async fn seek_group(&self, timestamp: Seconds) -> Result<(), MediaError> {
        if timestamp > 0.0 {
            self.element.fast_seek(timestamp);
            return Ok(());
        }

        // Setting the time of an ended element makes some platforms fire
        // `ended` twice, so an ended element is replayed instead.
        let ended = self
            .element
            .duration()
            .map(|duration| self.element.current_time() >= duration)
            .unwrap_or(false);
        if !ended {
            self.element.set_current_time(0.0);
        }
        let result = self.element.play().await;
        if self.state.lock().status == Status::Paused {
            self.element.pause();
        }
        result
    }

    fn current_time(&self) -> Seconds {
        self.element.current_time()
    }

    fn is_ready(&self) -> bool {
        self.element.ready_state() >= ReadyState::HaveCurrentData
    }

    async fn preload(&self) -> Result<(), MediaError> {
        self.play().await
    }

    fn restart(&self) {
        self.state.lock().status = Status::Playing;
        self.mute();
        let this = self.this.clone();
        let element = Arc::clone(&self.element);
        tokio::spawn(async move {
            if let Err(err) = element.play().await {
                tracing::warn!(error = %err, "Loop restart of video failed");
            }
            if let Some(adapter) = this.upgrade() {
                adapter.schedule_restore();
            }
        });
    }

    fn set_volume(&self, level: f64) {
        let changed = {
            let mut st = self.state.lock();
            let changed = st.volume != level;
            st.volume = level;
            changed
        };
        if changed {
            self.element.set_volume(level);
            self.element.set_muted(level <= 0.0);
        }
    }

    fn playback_rate(&self) -> f64 {
        self.element.playback_rate()
    }

    fn set_playback_rate(&self, rate: f64) {
        self.element.set_playback_rate(rate);
    }

    fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    fn set_looping(&self, looping: bool) {
        let attach = {
            let mut st = self.state.lock();
            st.looping = looping;
            looping && st.loop_listener.is_none()
        };
        if attach {
            let id = self.on_element(ElementEvent::Ended, |adapter| adapter.restart());
            self.state.lock().loop_listener = Some(id);
        } else if !looping {
            let removed = self.state.lock().loop_listener.take();
            if let Some(id) = removed {
                self.element.remove_event_listener(id);
            }
        }
    }

    fn media_element(&self) -> Option<Arc<dyn VideoElement>> {
        Some(Arc::clone(&self.element))
    }

    fn subscribe(&self, kind: MediaEventKind, callback: MediaCallback) -> ListenerId {
        self.listeners.add(kind, callback)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn detach(&self) {
        let hooks: Vec<ListenerId> = {
            let mut st = self.state.lock();
            st.detached = true;
            let mut hooks = std::mem::take(&mut st.bridged);
            hooks.extend(st.loop_listener.take());
            hooks.extend(st.pause_watch.take());
            hooks
        };
        for id in hooks {
            self.element.remove_event_listener(id);
        }
        self.listeners.emit(MediaEventKind::Destroyed, &MediaEvent::Destroyed);
        self.listeners.clear();
    }
}
