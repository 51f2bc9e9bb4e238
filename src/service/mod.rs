//! Boundary to the external decoding/synthesis service.
//!
//! The service runs on its own threads and GPU queue. The player only reaches it through
//! the narrow set of calls below and never blocks on it: readiness and media switches are
//! observed by polling once per frame.

pub mod simulated;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::view_job::{Extrinsics, Intrinsics, Viewport};

pub use simulated::{ServiceCall, SimulatedService};

/// Content category; selects which presenter is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    MultiViewDepth,
    PointCloud,
}

impl MediaKind {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Video),
            1 => Some(Self::MultiViewDepth),
            2 => Some(Self::PointCloud),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionKind {
    Equirectangular,
    Perspective,
    Orthographic,
}

/// Decoder quality preset; `None` leaves the decoder's own choice in place
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityProfile {
    #[default]
    None,
    Low,
    Medium,
    High,
}

/// Pixel format of a frame buffer shared with the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Rgba8,
    Rgba32Float,
}

impl TargetFormat {
    pub fn wgpu_format(&self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            Self::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba32Float => 16,
        }
    }
}

/// Opaque identity of a GPU resource handed across the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetHandle(pub u64);

impl TargetHandle {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// An image the service writes into
#[derive(Debug, Clone)]
pub struct FrameTarget {
    pub handle: TargetHandle,
    pub width: u32,
    pub height: u32,
    pub format: TargetFormat,
    /// Backing texture when running on a GPU; `None` for headless sessions
    pub texture: Option<wgpu::Texture>,
}

/// The indirect draw argument buffer the service fills with the point vertex count
#[derive(Debug, Clone)]
pub struct IndirectArgsTarget {
    pub handle: TargetHandle,
    pub buffer: Option<wgpu::Buffer>,
}

/// Near/far clip distances of the content's reference camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRange {
    pub near: f32,
    pub far: f32,
}

/// Capture camera the content was authored for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceCamera {
    pub projection: ProjectionKind,
    /// Vertical field of view in radians
    pub vertical_fov: f32,
    pub aspect_ratio: f32,
    pub clip: ClipRange,
}

impl Default for ReferenceCamera {
    fn default() -> Self {
        Self {
            projection: ProjectionKind::Perspective,
            vertical_fov: 60f32.to_radians(),
            aspect_ratio: 16.0 / 9.0,
            clip: ClipRange { near: 1.0, far: 100.0 },
        }
    }
}

/// Invoked from the service's own execution context
pub type ErrorCallback = Box<dyn Fn(ServiceError) + Send + Sync>;

/// `(channel, duration_ms, start_intensity, end_intensity)`, intensities in `[0, 1]`.
/// Invoked from the service's own execution context.
pub type HapticCallback = Box<dyn Fn(u32, u32, f32, f32) + Send + Sync>;

/// Calls consumed by the player
pub trait DecoderService {
    // Lifecycle
    fn create(&mut self, config_path: &Path);
    fn destroy(&mut self);
    fn start(&mut self, media_id: u32);
    fn request_media(&mut self, media_id: u32);
    fn pause(&mut self, paused: bool);
    fn stop(&mut self);
    fn set_error_callback(&mut self, callback: ErrorCallback);

    // Readiness and queries
    fn is_ready(&self) -> bool;
    fn media_count(&self) -> u32;
    fn current_media_id(&mut self) -> i32;
    fn media_kind(&self) -> MediaKind;
    fn media_name(&self, media_id: u32) -> String;
    /// Size of the decoded atlas frame; zero while unknown
    fn content_dimensions(&self) -> (u32, u32);
    fn reference_camera(&self) -> ReferenceCamera;
    fn viewing_space_contains(&self, position: Vec3) -> bool;
    /// 0 = fully outside the viewing space, 1 = fully inside
    fn viewing_space_inclusion(&self, job: u32) -> f32;

    // Per-view configuration
    fn set_job_count(&mut self, count: u32);
    fn set_viewport(&mut self, job: u32, viewport: Viewport);
    fn set_projection(&mut self, job: u32, projection: ProjectionKind);
    fn set_resolution(&mut self, job: u32, width: u32, height: u32);
    fn set_intrinsics(&mut self, job: u32, intrinsics: Intrinsics);
    fn set_extrinsics(&mut self, job: u32, extrinsics: Extrinsics);

    // Frame buffer bindings
    fn bind_color_target(&mut self, target: &FrameTarget);
    fn bind_position_target(&mut self, target: &FrameTarget);
    fn bind_shadow_target(&mut self, target: &FrameTarget);
    fn bind_indirect_args(&mut self, target: &IndirectArgsTarget);

    // Point-cloud synthesis settings
    fn set_vertices_per_point(&mut self, count: u32);
    fn set_model_view_projection(&mut self, mvp: Mat4);
    fn set_decimation_level(&mut self, level: u32);
    fn set_dynamic_decimation(&mut self, enabled: bool);
    fn set_decimation_ranges(&mut self, r1: f32, r2: f32, viewport_cull: f32);
    fn set_max_bbox(&mut self, size: f32);

    /// Composite the current frame into the bound targets
    fn render(&mut self);

    fn set_quality_profile(&mut self, _profile: QualityProfile) {}

    /// Services without haptic tracks ignore the registration
    fn set_haptic_callback(&mut self, _callback: HapticCallback) {}

    fn decoder_fps(&self) -> f64 {
        0.0
    }
}
