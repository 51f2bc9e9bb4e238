//! Haptic playback driven by the decoder's haptic track.
//!
//! The decoder calls back from its own thread with a vibration request; the request is parked
//! behind a mutex and picked up by [`HapticController::tick`] on the main loop, which ramps the
//! intensity linearly over the requested duration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::timer::Countdown;
use crate::service::{DecoderService, HapticCallback};

pub const MIN_DURATION_MS: u32 = 150;
pub const MAX_DURATION_MS: u32 = 10_000;
pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 255;

/// Platform vibration motor
pub trait VibrationDevice {
    fn vibrate(&mut self, duration_ms: u32, amplitude: u8);
    fn cancel(&mut self);
}

/// Device that only logs, for platforms without a motor
#[derive(Debug, Default)]
pub struct LogVibrationDevice;

impl VibrationDevice for LogVibrationDevice {
    fn vibrate(&mut self, duration_ms: u32, amplitude: u8) {
        log::trace!("vibrate {} ms at {}", duration_ms, amplitude);
    }

    fn cancel(&mut self) {}
}

/// A clamped vibration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HapticRequest {
    pub channel: u32,
    pub duration_ms: u32,
    pub start_intensity: u8,
    pub end_intensity: u8,
}

impl HapticRequest {
    /// Clamp raw decoder values: duration to 150..=10000 ms, intensities from `[0, 1]` to 1..=255
    pub fn clamped(channel: u32, duration_ms: u32, start: f32, end: f32) -> Self {
        Self {
            channel,
            duration_ms: duration_ms.clamp(MIN_DURATION_MS, MAX_DURATION_MS),
            start_intensity: to_amplitude(start),
            end_intensity: to_amplitude(end),
        }
    }

    /// Intensity at `progress` in `[0, 1]` of the ramp
    pub fn intensity_at(&self, progress: f32) -> u8 {
        let start = self.start_intensity as f32;
        let end = self.end_intensity as f32;
        let value = start + (end - start) * progress.clamp(0.0, 1.0);
        (value.round() as u8).max(MIN_INTENSITY)
    }
}

fn to_amplitude(intensity: f32) -> u8 {
    let amplitude = (intensity * MAX_INTENSITY as f32) as i32;
    amplitude.clamp(MIN_INTENSITY as i32, MAX_INTENSITY as i32) as u8
}

struct Ramp {
    request: HapticRequest,
    countdown: Countdown,
}

pub struct HapticController {
    device: Box<dyn VibrationDevice>,
    pending: Arc<Mutex<Option<HapticRequest>>>,
    ramp: Option<Ramp>,
    config_path: Option<PathBuf>,
}

impl HapticController {
    pub fn new(device: Box<dyn VibrationDevice>) -> Self {
        Self {
            device,
            pending: Arc::new(Mutex::new(None)),
            ramp: None,
            config_path: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.config_path.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.ramp.is_some()
    }

    /// One-time setup on decoder init: register the haptic callback
    pub fn bind(&mut self, config_path: &Path, service: &mut dyn DecoderService) {
        if self.is_bound() {
            return;
        }
        log::info!("Haptics bound to {}", config_path.display());
        service.set_haptic_callback(self.callback());
        self.config_path = Some(config_path.to_path_buf());
    }

    /// Callback handed to the decoder; only touches the pending slot
    pub fn callback(&self) -> HapticCallback {
        let pending = self.pending.clone();
        Box::new(move |channel, duration_ms, start, end| {
            let request = HapticRequest::clamped(channel, duration_ms, start, end);
            *pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(request);
        })
    }

    /// Advance the ramp by `delta` seconds
    pub fn tick(&mut self, delta: f32) {
        let incoming = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(request) = incoming {
            log::debug!(
                "Haptic request on channel {}: {} ms, {} -> {}",
                request.channel,
                request.duration_ms,
                request.start_intensity,
                request.end_intensity
            );
            self.ramp = Some(Ramp {
                request,
                countdown: Countdown::started(request.duration_ms as f32 / 1000.0),
            });
            self.device.cancel();
            self.device.vibrate(request.duration_ms, request.start_intensity);
            return;
        }

        let Some(ramp) = &mut self.ramp else {
            return;
        };
        if ramp.countdown.tick(delta) {
            self.device.cancel();
            self.ramp = None;
            return;
        }

        let intensity = ramp.request.intensity_at(ramp.countdown.progress());
        let remaining_ms = (ramp.countdown.remaining() * 1000.0).ceil() as u32;
        self.device.cancel();
        self.device.vibrate(remaining_ms, intensity);
    }

    pub fn stop(&mut self) {
        if self.ramp.take().is_some() {
            self.device.cancel();
        }
    }
}
