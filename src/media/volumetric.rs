//! Adapter for volumetric video objects.
//!
//! A volumetric source streams a texture video plus per-frame mesh data and
//! reports its own buffering lifecycle. Mesh construction and decoding stay
//! inside the source; the adapter only drives transport and maps its events.

use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::config::SyncConfig;
use crate::core::error::MediaError;
use crate::core::time::Seconds;
use crate::media::adapter::{MediaCallback, MediaEvent, MediaEventKind, SynchronizableMedia};
use crate::media::listeners::{ListenerId, Listeners};
use crate::media::video::{ElementCallback, VideoElement};

/// Native events of a volumetric source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumetricEvent {
    Buffering,
    Buffered,
    /// First chunk of mesh and texture data is available
    DataBuffered,
    VideoEnded,
    VideoPause,
    VideoTimeUpdate,
    Disposed,
    Error,
}

/// Volumetric video object driven by a `VolumetricAdapter`
#[async_trait]
pub trait VolumetricSource: Send + Sync {
    async fn play(&self) -> Result<(), MediaError>;

    async fn pause(&self) -> Result<(), MediaError>;

    async fn stop(&self) -> Result<(), MediaError>;

    async fn jump_at(&self, timestamp: Seconds) -> Result<(), MediaError>;

    async fn duration(&self) -> Option<Seconds>;

    fn set_volume(&self, level: f64);

    fn set_native_loop(&self, looping: bool);

    /// True once the first buffering cycle has completed
    fn has_buffered_once(&self) -> bool;

    /// Texture video backing the volumetric stream
    fn video_element(&self) -> Option<Arc<dyn VideoElement>>;

    fn last_error(&self) -> Option<MediaError> {
        None
    }

    fn on(&self, event: VolumetricEvent, callback: ElementCallback) -> ListenerId;

    fn off(&self, id: ListenerId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Paused,
    ForcedPause,
    Buffering,
    Playing,
}

struct VolumetricState {
    status: Status,
    volume: f64,
    looping: bool,
    loop_listener: Option<ListenerId>,
    pause_watch: Option<ListenerId>,
    bridged: Vec<ListenerId>,
    failed: Option<MediaError>,
    detached: bool,
}

/// `SynchronizableMedia` over a `VolumetricSource`
pub struct VolumetricAdapter {
    source: Arc<dyn VolumetricSource>,
    this: Weak<VolumetricAdapter>,
    restore_delay: Duration,
    watch_window: Duration,
    state: Mutex<VolumetricState>,
    listeners: Listeners<MediaEventKind, MediaEvent>,
}

impl VolumetricAdapter {
    /// Wrap a source and disable its native loop. Must be called inside a tokio runtime.
    pub fn new(source: Arc<dyn VolumetricSource>, config: &SyncConfig) -> Arc<Self> {
        source.set_native_loop(false);
        let adapter = Arc::new_cyclic(|this| Self {
            source,
            this: this.clone(),
            restore_delay: config.volume_restore_delay,
            watch_window: config.volumetric_forced_pause_window,
            state: Mutex::new(VolumetricState {
                status: Status::Paused,
                volume: 1.0,
                looping: false,
                loop_listener: None,
                pause_watch: None,
                bridged: Vec::new(),
                failed: None,
                detached: false,
            }),
            listeners: Listeners::new(),
        });
        adapter.bridge_events();
        adapter
    }

    /// The wrapped source
    pub fn source(&self) -> &Arc<dyn VolumetricSource> {
        &self.source
    }

    /// Error reported by the source, if it failed
    pub fn failure(&self) -> Option<MediaError> {
        self.state.lock().failed.clone()
    }

    fn bridge_events(&self) {
        let bridged = vec![
            self.on_source(VolumetricEvent::Error, |adapter| {
                let error = adapter
                    .source
                    .last_error()
                    .unwrap_or_else(|| MediaError::Decode("volumetric source error".into()));
                tracing::warn!(error = %error, "Volumetric source failed");
                adapter.state.lock().failed = Some(error.clone());
                adapter.listeners.emit(MediaEventKind::Error, &MediaEvent::Error(error));
            }),
            self.on_source(VolumetricEvent::Buffering, |adapter| {
                adapter.state.lock().status = Status::Buffering;
                adapter.listeners.emit(MediaEventKind::Buffering, &MediaEvent::Buffering);
            }),
            self.on_source(VolumetricEvent::Buffered, |adapter| {
                {
                    let mut st = adapter.state.lock();
                    if !matches!(st.status, Status::Paused | Status::ForcedPause) {
                        st.status = Status::Playing;
                    }
                }
                adapter.listeners.emit(MediaEventKind::Buffered, &MediaEvent::Buffered);
            }),
            self.on_source(VolumetricEvent::DataBuffered, |adapter| {
                adapter.listeners.emit(MediaEventKind::Ready, &MediaEvent::Ready);
            }),
            self.on_source(VolumetricEvent::VideoEnded, |adapter| {
                adapter.listeners.emit(MediaEventKind::Ended, &MediaEvent::Ended);
            }),
            self.on_source(VolumetricEvent::VideoTimeUpdate, |adapter| {
                let event = MediaEvent::TimeUpdate(adapter.current_time());
                adapter.listeners.emit(MediaEventKind::TimeUpdate, &event);
            }),
            self.on_source(VolumetricEvent::Disposed, |adapter| {
                adapter.listeners.emit(MediaEventKind::Destroyed, &MediaEvent::Destroyed);
            }),
        ];
        self.state.lock().bridged = bridged;
    }

    fn on_source<F>(&self, event: VolumetricEvent, handler: F) -> ListenerId
    where
        F: Fn(&VolumetricAdapter) + Send + Sync + 'static,
    {
        let this = self.this.clone();
        self.source.on(
            event,
            Arc::new(move || {
                if let Some(adapter) = this.upgrade() {
                    handler(&adapter);
                }
            }),
        )
    }

    fn schedule_restore(&self) {
        let this = self.this.clone();
        let delay = self.restore_delay;
        let window = self.watch_window;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let watch_id = {
                let Some(adapter) = this.upgrade() else { return };
                let (volume, detached) = {
                    let st = adapter.state.lock();
                    (st.volume, st.detached)
                };
                if detached {
                    return;
                }
                let watch_id = adapter.on_source(VolumetricEvent::VideoPause, |a| a.check_forced_pause());
                let replaced = adapter.state.lock().pause_watch.replace(watch_id);
                if let Some(old) = replaced {
                    adapter.source.off(old);
                }
                adapter.source.set_volume(volume);
                watch_id
            };

            tokio::time::sleep(window).await;
            if let Some(adapter) = this.upgrade() {
                let removed = {
                    let mut st = adapter.state.lock();
                    if st.pause_watch == Some(watch_id) {
                        st.pause_watch.take()
                    } else {
                        None
                    }
                };
                if let Some(id) = removed {
                    adapter.source.off(id);
                }
            }
        });
    }

    fn check_forced_pause(&self) {
        let watch = {
            let mut st = self.state.lock();
            if st.status != Status::Playing {
                return;
            }
            st.status = Status::ForcedPause;
            st.pause_watch.take()
        };
        if let Some(id) = watch {
            self.source.off(id);
        }
        tracing::debug!("Volumetric video was paused by the platform");
        self.listeners.emit(MediaEventKind::ForcedPause, &MediaEvent::ForcedPause);
    }

    fn ensure_attached(&self) -> Result<(), MediaError> {
        if self.state.lock().detached {
            Err(MediaError::Detached)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SynchronizableMedia for VolumetricAdapter {
    async fn play(&self) -> Result<(), MediaError> {
        self.ensure_attached()?;
        self.state.lock().status = Status::Playing;
        self.source.set_volume(0.0);
        self.source.play().await?;
        self.schedule_restore();
        Ok(())
    }

    async fn pause(&self) -> Result<(), MediaError> {
        self.ensure_attached()?;
        self.state.lock().status = Status::Paused;
        self.source.pause().await
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.ensure_attached()?;
        self.state.lock().status = Status::Paused;
        self.source.stop().await
    }

    async fn duration(&self) -> Option<Seconds> {
        self.source.duration().await
    }

    fn jump_at(&self, timestamp: Seconds) {
        if self.state.lock().detached {
            return;
        }
        self.source.set_volume(0.0);
        let this = self.this.clone();
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            if let Err(err) = source.jump_at(timestamp).await {
                tracing::warn!(error = %err, timestamp, "Volumetric seek failed");
            }
            if let Some(adapter) = this.upgrade() {
                adapter.schedule_restore();
            }
        });
    }

    async fn seek_group(&self, timestamp: Seconds) -> Result<(), MediaError> {
        self.ensure_attached()?;
        self.source.jump_at(timestamp).await
    }

    fn current_time(&self) -> Seconds {
        self.source
            .video_element()
            .map(|element| element.current_time())
            .unwrap_or(0.0)
    }

    fn is_ready(&self) -> bool {
        self.source.has_buffered_once()
    }

    fn restart(&self) {
        if self.state.lock().detached {
            return;
        }
        self.state.lock().status = Status::Playing;
        self.source.set_volume(0.0);
        let this = self.this.clone();
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            if let Err(err) = source.play().await {
                tracing::warn!(error = %err, "Loop restart of volumetric video failed");
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
            self.source.set_volume(level);
        }
    }

    fn playback_rate(&self) -> f64 {
        self.source
            .video_element()
            .map(|element| element.playback_rate())
            .unwrap_or(1.0)
    }

    fn set_playback_rate(&self, rate: f64) {
        if let Some(element) = self.source.video_element() {
            element.set_playback_rate(rate);
        }
    }

    fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    fn set_looping(&self, looping: bool) {
        let attach = {
            let mut st = self.state.lock();
            if st.detached {
                return;
            }
            st.looping = looping;
            looping && st.loop_listener.is_none()
        };
        if attach {
            let id = self.on_source(VolumetricEvent::VideoEnded, |adapter| adapter.restart());
            self.state.lock().loop_listener = Some(id);
        } else if !looping {
            let removed = self.state.lock().loop_listener.take();
            if let Some(id) = removed {
                self.source.off(id);
            }
        }
    }

    fn media_element(&self) -> Option<Arc<dyn VideoElement>> {
        self.source.video_element()
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
            if st.detached {
                return;
            }
            st.detached = true;
            st.status = Status::Paused;
            let mut hooks = std::mem::take(&mut st.bridged);
            hooks.extend(st.loop_listener.take());
            hooks.extend(st.pause_watch.take());
            hooks
        };
        for id in hooks {
            self.source.off(id);
        }
        self.listeners.clear();

        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            if let Err(err) = source.pause().await {
                tracing::debug!(error = %err, "Pause of detached volumetric source failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record_events, settle, MockVolumetric};

    fn adapter_for(source: &Arc<MockVolumetric>) -> Arc<VolumetricAdapter> {
        VolumetricAdapter::new(source.clone(), &SyncConfig::default())
    }

    #[tokio::test]
    async fn test_native_loop_disabled() {
        let source = MockVolumetric::new(10.0);
        let _adapter = adapter_for(&source);
        assert_eq!(source.native_loop(), Some(false));
    }

    #[tokio::test]
    async fn test_events_are_bridged() {
        let source = MockVolumetric::new(10.0);
        let adapter = adapter_for(&source);
        let (ready, _) = record_events(adapter.as_ref(), MediaEventKind::Ready);
        let (ended, _) = record_events(adapter.as_ref(), MediaEventKind::Ended);
        let (destroyed, _) = record_events(adapter.as_ref(), MediaEventKind::Destroyed);

        source.fire(VolumetricEvent::DataBuffered);
        source.fire(VolumetricEvent::VideoEnded);
        source.fire(VolumetricEvent::Disposed);
        assert_eq!(ready.lock().len(), 1);
        assert_eq!(ended.lock().len(), 1);
        assert_eq!(destroyed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_error_is_kept_and_forwarded() {
        let source = MockVolumetric::new(10.0);
        let adapter = adapter_for(&source);
        let (errors, _) = record_events(adapter.as_ref(), MediaEventKind::Error);

        source.fail(MediaError::Network("connection reset".into()));
        assert_eq!(
            adapter.failure(),
            Some(MediaError::Network("connection reset".into()))
        );
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_mutes_then_restores() {
        let source = MockVolumetric::new(10.0);
        let adapter = adapter_for(&source);
        adapter.set_volume(0.6);

        adapter.play().await.unwrap();
        assert_eq!(source.volume(), 0.0);
        assert_eq!(source.play_calls(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(source.volume(), 0.6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_pause_while_playing() {
        let source = MockVolumetric::new(10.0);
        let adapter = adapter_for(&source);
        let (forced, _) = record_events(adapter.as_ref(), MediaEventKind::ForcedPause);

        adapter.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        source.fire(VolumetricEvent::VideoPause);
        assert_eq!(forced.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jump_at_waits_for_source() {
        let source = MockVolumetric::new(10.0);
        let adapter = adapter_for(&source);

        adapter.jump_at(4.0);
        assert_eq!(source.volume(), 0.0);
        settle().await;
        assert_eq!(source.jumps(), vec![4.0]);
    }

    #[tokio::test]
    async fn test_loop_restarts_on_video_end() {
        let source = MockVolumetric::new(10.0);
        let adapter = adapter_for(&source);

        adapter.set_looping(true);
        assert!(adapter.is_looping());
        source.fire(VolumetricEvent::VideoEnded);
        settle().await;
        assert_eq!(source.play_calls(), 1);
    }

    #[tokio::test]
    async fn test_detach() {
        let source = MockVolumetric::new(10.0);
        let adapter = adapter_for(&source);

        adapter.detach();
        settle().await;
        assert_eq!(source.listener_count(), 0);
        assert_eq!(source.pause_calls(), 1);
        assert!(matches!(adapter.play().await, Err(MediaError::Detached)));
    }
}
