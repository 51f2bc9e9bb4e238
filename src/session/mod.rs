//! Playback lifecycle state machine.
//!
//! Initialisation: `Uninitialized -> Initializing -> Ready`, polled once per tick until the
//! service reports ready. Playback: started/stopped x paused/playing, plus a switching
//! condition that holds while `requested_media_id != current_media_id`. Readiness of a
//! switch is detected by comparing the service's current id against the latest request,
//! so a newer request silently supersedes one still in flight.

pub mod errors;
pub mod events;

use std::path::PathBuf;

use crate::core::timer::EveryNTicks;
use crate::error::{PlayerError, Result};
use crate::service::{DecoderService, MediaKind};
use crate::view_job::push_default_jobs;

pub use errors::ErrorMailbox;
pub use events::{EventBus, RenderData, SessionEvent, SessionObserver, SubscriptionId};

/// Reserved out-of-range id meaning "stopped / no media"
pub const INVALID_MEDIA_ID: i32 = 255;

/// Unsuccessful readiness polls between two "still waiting" warnings
pub const READY_POLL_WARN_INTERVAL: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
}

pub struct MediaSession {
    init_state: InitState,
    is_started: bool,
    is_paused: bool,
    is_media_ready: bool,
    current_media_id: i32,
    requested_media_id: i32,
    media_kind: Option<MediaKind>,
    media_name: String,
    config_path: Option<PathBuf>,
    pending_start: Option<i32>,
    errors: ErrorMailbox,
    ready_polls: u64,
    poll_warning: EveryNTicks,
}

impl MediaSession {
    pub fn new() -> Self {
        Self {
            init_state: InitState::Uninitialized,
            is_started: false,
            is_paused: false,
            is_media_ready: false,
            current_media_id: INVALID_MEDIA_ID,
            requested_media_id: INVALID_MEDIA_ID,
            media_kind: None,
            media_name: String::new(),
            config_path: None,
            pending_start: None,
            errors: ErrorMailbox::new(),
            ready_polls: 0,
            poll_warning: EveryNTicks::new(READY_POLL_WARN_INTERVAL),
        }
    }

    pub fn init_state(&self) -> InitState {
        self.init_state
    }

    pub fn is_initialized(&self) -> bool {
        self.init_state == InitState::Ready
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_media_ready(&self) -> bool {
        self.is_media_ready
    }

    pub fn is_switching(&self) -> bool {
        self.requested_media_id != self.current_media_id
    }

    /// True when the bound stage is allowed to trigger the service's composite call
    pub fn can_render(&self) -> bool {
        self.is_initialized() && self.is_started && self.is_media_ready
    }

    pub fn current_media_id(&self) -> i32 {
        self.current_media_id
    }

    pub fn requested_media_id(&self) -> i32 {
        self.requested_media_id
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        self.media_kind
    }

    pub fn media_name(&self) -> &str {
        &self.media_name
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    /// Mailbox the service's error callback writes into
    pub fn error_mailbox(&self) -> &ErrorMailbox {
        &self.errors
    }

    pub fn ready_polls(&self) -> u64 {
        self.ready_polls
    }

    /// Issue the one-time `create` call and begin polling for readiness.
    ///
    /// Fails fast when no camera/output target is bound. There is no timeout: polling
    /// continues on every tick until the service reports ready.
    pub fn initialize(
        &mut self,
        service: &mut dyn DecoderService,
        config_path: PathBuf,
        output_bound: bool,
    ) -> Result<()> {
        if !output_bound {
            log::error!("No camera/output target bound, aborting initialisation");
            return Err(PlayerError::NoOutputTarget);
        }
        if self.init_state != InitState::Uninitialized {
            log::debug!("initialize called twice, ignoring");
            return Ok(());
        }

        log::info!("Creating decoder with config {}", config_path.display());
        service.create(&config_path);
        service.set_error_callback(self.errors.callback());

        self.config_path = Some(config_path);
        self.ready_polls = 0;
        self.poll_warning.reset();
        self.init_state = InitState::Initializing;
        Ok(())
    }

    /// Start `media_id` as soon as initialisation completes
    pub fn start_when_ready(&mut self, media_id: i32) {
        self.pending_start = Some(media_id);
    }

    /// One update of the state machine; runs before any presenter hook in the frame
    pub fn tick(&mut self, service: &mut dyn DecoderService, observer: &mut dyn SessionObserver) {
        if self.init_state == InitState::Initializing {
            self.poll_ready(service, observer);
        }

        if self.is_initialized() {
            if let Some(media_id) = self.pending_start.take() {
                // Rejection is logged by start()
                let _ = self.start(service, media_id);
            }
        }

        if self.is_initialized() && self.is_started {
            self.reconcile(service, observer);
        }

        if let Some(error) = self.errors.take() {
            log::warn!("Decoder reported {}", error);
            observer.on_event(&SessionEvent::Error(error), service);
        }
    }

    fn poll_ready(&mut self, service: &mut dyn DecoderService, observer: &mut dyn SessionObserver) {
        let ready = service.is_ready();
        self.ready_polls += 1;
        log::trace!("Is decoder ready? {}", ready);

        if !ready {
            if self.poll_warning.tick() {
                log::warn!(
                    "Decoder still not ready after {} polls (no timeout configured)",
                    self.ready_polls
                );
            }
            return;
        }

        push_default_jobs(service);
        self.init_state = InitState::Ready;
        log::info!("Decoder ready after {} polls", self.ready_polls);

        if let Some(path) = self.config_path.clone() {
            observer.on_event(&SessionEvent::Init(path), service);
        }
    }

    /// Detect the media-ready transition for the latest request
    fn reconcile(&mut self, service: &mut dyn DecoderService, observer: &mut dyn SessionObserver) {
        if self.requested_media_id == self.current_media_id {
            return;
        }

        let reported = service.current_media_id();
        self.is_media_ready = reported == self.requested_media_id;
        if !self.is_media_ready {
            return;
        }

        self.current_media_id = self.requested_media_id;
        let kind = service.media_kind();
        self.media_kind = Some(kind);
        self.media_name = u32::try_from(self.current_media_id)
            .map(|id| service.media_name(id))
            .unwrap_or_default();

        let data = RenderData {
            media_id: self.current_media_id,
            media_kind: kind,
            media_name: self.media_name.clone(),
        };

        observer.on_event(&SessionEvent::PreMediaReady(data.clone()), service);
        observer.on_event(&SessionEvent::MediaReady(data.clone()), service);
        observer.on_event(&SessionEvent::PostMediaReady(data), service);

        self.pause(service, observer, false);

        log::info!(
            "Media {} ({}) ready, kind {:?}",
            self.current_media_id,
            self.media_name,
            kind
        );
    }

    fn check_media_id(&self, service: &dyn DecoderService, media_id: i32) -> Result<()> {
        let available = service.media_count();
        if media_id >= 0 && (media_id as u32) < available {
            Ok(())
        } else {
            log::warn!(
                "Invalid media request {}, {} media available",
                media_id,
                available
            );
            Err(PlayerError::InvalidMediaId {
                requested: media_id,
                available,
            })
        }
    }

    pub fn start(&mut self, service: &mut dyn DecoderService, media_id: i32) -> Result<()> {
        if !self.is_initialized() {
            log::warn!("Start({}) requested before the decoder is ready", media_id);
            return Err(PlayerError::NotInitialized);
        }
        self.check_media_id(service, media_id)?;

        service.start(media_id as u32);
        self.requested_media_id = media_id;
        self.is_started = true;
        log::info!("Playback started on media {}", media_id);
        Ok(())
    }

    /// Switch to `media_id`. Fires `MediaRequest` immediately so presenters can hide stale
    /// frames; the ready events follow on the tick where the service reports the new id.
    pub fn change_media(
        &mut self,
        service: &mut dyn DecoderService,
        observer: &mut dyn SessionObserver,
        media_id: i32,
    ) -> Result<()> {
        log::debug!(
            "Change media: request = {}, current = {}",
            media_id,
            self.current_media_id
        );
        if !(self.is_initialized() && self.is_started) {
            return self.start(service, media_id);
        }

        self.check_media_id(service, media_id)?;
        if media_id == self.current_media_id {
            log::warn!("Media {} is already playing", media_id);
            return Err(PlayerError::SameMedia(media_id));
        }

        self.requested_media_id = media_id;
        self.is_media_ready = false;
        service.request_media(media_id as u32);
        observer.on_event(&SessionEvent::MediaRequest, service);
        Ok(())
    }

    pub fn pause(
        &mut self,
        service: &mut dyn DecoderService,
        observer: &mut dyn SessionObserver,
        paused: bool,
    ) {
        service.pause(paused);
        self.is_paused = paused;
        observer.on_event(&SessionEvent::Pause(paused), service);
    }

    pub fn toggle_play_pause(
        &mut self,
        service: &mut dyn DecoderService,
        observer: &mut dyn SessionObserver,
    ) {
        let paused = !self.is_paused;
        self.pause(service, observer, paused);
    }

    /// Stop decoding by requesting the invalid media id. The service is not released.
    pub fn stop(&mut self, service: &mut dyn DecoderService, observer: &mut dyn SessionObserver) {
        self.current_media_id = INVALID_MEDIA_ID;
        self.requested_media_id = INVALID_MEDIA_ID;
        self.is_media_ready = false;
        observer.on_event(&SessionEvent::MediaRequest, service);
        service.request_media(INVALID_MEDIA_ID as u32);
        self.is_started = false;
        log::info!("Playback stopped");
    }

    /// Application teardown: stop and release the service
    pub fn shutdown(&mut self, service: &mut dyn DecoderService) {
        if self.init_state == InitState::Uninitialized {
            return;
        }
        service.stop();
        service.destroy();
        self.init_state = InitState::Uninitialized;
        self.is_started = false;
        self.is_media_ready = false;
        self.current_media_id = INVALID_MEDIA_ID;
        self.requested_media_id = INVALID_MEDIA_ID;
        self.pending_start = None;
        log::info!("Decoder released");
    }
}

impl Default for MediaSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceCall, SimulatedService};

    fn ready_session(service: &mut SimulatedService) -> MediaSession {
        let mut session = MediaSession::new();
        let mut events = Vec::new();
        session
            .initialize(service, PathBuf::from("config.json"), true)
            .unwrap();
        session.tick(service, &mut events);
        assert!(session.is_initialized());
        session
    }

    #[test]
    fn test_initialize_requires_output() {
        let mut service = SimulatedService::with_media_count(1);
        let mut session = MediaSession::new();

        let result = session.initialize(&mut service, PathBuf::from("config.json"), false);
        assert_eq!(result, Err(PlayerError::NoOutputTarget));
        assert!(service.calls().is_empty());
        assert_eq!(session.init_state(), InitState::Uninitialized);
    }

    #[test]
    fn test_init_polls_until_ready() {
        let mut service = SimulatedService::with_media_count(1).init_latency(3);
        let mut session = MediaSession::new();
        let mut events = Vec::new();

        session
            .initialize(&mut service, PathBuf::from("/data/config.json"), true)
            .unwrap();
        for _ in 0..3 {
            session.tick(&mut service, &mut events);
            assert_eq!(session.init_state(), InitState::Initializing);
        }
        session.tick(&mut service, &mut events);

        assert!(session.is_initialized());
        assert_eq!(session.ready_polls(), 4);
        assert_eq!(events, vec![SessionEvent::Init(PathBuf::from("/data/config.json"))]);
        assert!(service.calls().contains(&ServiceCall::SetJobCount(1)));
    }

    #[test]
    fn test_start_rejects_before_ready() {
        let mut service = SimulatedService::with_media_count(2);
        let mut session = MediaSession::new();
        assert_eq!(session.start(&mut service, 0), Err(PlayerError::NotInitialized));
        assert!(service.lifecycle_calls().is_empty());
    }

    #[test]
    fn test_pending_start_issued_when_ready() {
        let mut service = SimulatedService::with_media_count(2).init_latency(1);
        let mut session = MediaSession::new();
        let mut events = Vec::new();

        session
            .initialize(&mut service, PathBuf::from("config.json"), true)
            .unwrap();
        session.start_when_ready(1);
        session.tick(&mut service, &mut events);
        assert!(!session.is_started());

        session.tick(&mut service, &mut events);
        assert!(session.is_started());
        assert_eq!(session.requested_media_id(), 1);
    }

    #[test]
    fn test_toggle_play_pause() {
        let mut service = SimulatedService::with_media_count(1);
        let mut session = ready_session(&mut service);
        let mut events = Vec::new();

        session.toggle_play_pause(&mut service, &mut events);
        assert!(session.is_paused());
        session.toggle_play_pause(&mut service, &mut events);
        assert!(!session.is_paused());
        assert_eq!(events, vec![SessionEvent::Pause(true), SessionEvent::Pause(false)]);
    }

    #[test]
    fn test_errors_forwarded_once() {
        let mut service = SimulatedService::with_media_count(1);
        let mut session = ready_session(&mut service);
        let mut events = Vec::new();

        service.raise_error(crate::error::ErrorLevel::Error, 7);
        session.tick(&mut service, &mut events);
        session.tick(&mut service, &mut events);

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Error(e) if e.code == 7));
    }

    #[test]
    fn test_shutdown_releases_service() {
        let mut service = SimulatedService::with_media_count(1);
        let mut session = ready_session(&mut service);
        service.clear_calls();

        session.shutdown(&mut service);
        assert_eq!(service.calls(), &[ServiceCall::Stop, ServiceCall::Destroy]);
        assert_eq!(session.init_state(), InitState::Uninitialized);
    }
}
