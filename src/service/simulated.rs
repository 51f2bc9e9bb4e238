use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{Mat4, Vec3};

use super::{
    ClipRange, DecoderService, ErrorCallback, FrameTarget, HapticCallback, IndirectArgsTarget,
    MediaKind, ProjectionKind, QualityProfile, ReferenceCamera,
};
use crate::core::gpu_context::GpuContext;
use crate::error::{ErrorLevel, ServiceError};
use crate::sort::DrawIndirectArgs;
use crate::view_job::{Extrinsics, Intrinsics, Viewport};

const SIMULATED_FPS: f64 = 30.0;

/// Calls kept in the log; the oldest half is dropped when it fills up
pub const CALL_LOG_CAPACITY: usize = 4096;

/// One entry of the simulated media catalog
#[derive(Debug, Clone)]
pub struct SimulatedMedia {
    pub name: String,
    pub kind: MediaKind,
    pub dimensions: (u32, u32),
    pub point_count: u32,
}

impl SimulatedMedia {
    pub fn new(name: &str, kind: MediaKind) -> Self {
        let dimensions = match kind {
            MediaKind::PointCloud => (512, 256),
            _ => (1920, 1080),
        };
        Self {
            name: name.to_string(),
            kind,
            dimensions,
            point_count: dimensions.0 * dimensions.1 / 2,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = (width, height);
        self.point_count = self.point_count.min(width * height);
        self
    }

    pub fn with_point_count(mut self, count: u32) -> Self {
        self.point_count = count;
        self
    }
}

/// Every call the player made into the service, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Create(PathBuf),
    Destroy,
    Start(u32),
    RequestMedia(u32),
    Pause(bool),
    Stop,
    SetErrorCallback,
    SetJobCount(u32),
    SetViewport(u32, Viewport),
    SetProjection(u32, ProjectionKind),
    SetResolution(u32, u32, u32),
    SetIntrinsics(u32, Intrinsics),
    SetExtrinsics(u32, Extrinsics),
    BindColor { width: u32, height: u32 },
    BindPosition { width: u32, height: u32 },
    BindShadow { width: u32, height: u32 },
    BindIndirectArgs,
    SetVerticesPerPoint(u32),
    SetModelViewProjection,
    SetDecimationLevel(u32),
    SetDynamicDecimation(bool),
    SetDecimationRanges,
    SetMaxBbox(f32),
    SetQualityProfile(QualityProfile),
    Render,
}

impl ServiceCall {
    /// Calls that change the service's lifecycle state
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Create(_)
                | Self::Destroy
                | Self::Start(_)
                | Self::RequestMedia(_)
                | Self::Pause(_)
                | Self::Stop
        )
    }
}

/// In-process stand-in for the decoding service.
///
/// Readiness and media switches complete after a configurable number of polls, which
/// makes the asynchronous handshake deterministic. When a GPU is attached, synthetic
/// content is written into the bound frame buffers so the presenters have something to show.
pub struct SimulatedService {
    catalog: Vec<SimulatedMedia>,
    init_latency: u32,
    switch_latency: u32,
    ready_polls: Cell<u32>,
    created: bool,
    reported_id: i32,
    pending: Option<(i32, u32)>,
    paused: bool,
    calls: Vec<ServiceCall>,
    error_callback: Option<Arc<ErrorCallback>>,
    haptic_callback: Option<Arc<HapticCallback>>,
    job_positions: Vec<Vec3>,
    reference: ReferenceCamera,
    viewing_space_radius: f32,
    gpu: Option<Arc<GpuContext>>,
    color: Option<FrameTarget>,
    position: Option<FrameTarget>,
    indirect: Option<IndirectArgsTarget>,
    vertices_per_point: u32,
    content_dirty: bool,
    frames_rendered: u64,
}

impl SimulatedService {
    pub fn new(catalog: Vec<SimulatedMedia>) -> Self {
        Self {
            catalog,
            init_latency: 0,
            switch_latency: 0,
            ready_polls: Cell::new(0),
            created: false,
            reported_id: -1,
            pending: None,
            paused: false,
            calls: Vec::new(),
            error_callback: None,
            haptic_callback: None,
            job_positions: Vec::new(),
            reference: ReferenceCamera {
                projection: ProjectionKind::Perspective,
                vertical_fov: 60f32.to_radians(),
                aspect_ratio: 16.0 / 9.0,
                clip: ClipRange { near: 1.5, far: 50.0 },
            },
            viewing_space_radius: 1.0,
            gpu: None,
            color: None,
            position: None,
            indirect: None,
            vertices_per_point: 1,
            content_dirty: true,
            frames_rendered: 0,
        }
    }

    /// Catalog of `count` media cycling through video, multi-view and point cloud
    pub fn with_media_count(count: u32) -> Self {
        let kinds = [MediaKind::Video, MediaKind::MultiViewDepth, MediaKind::PointCloud];
        Self::new(
            (0..count)
                .map(|i| SimulatedMedia::new(&format!("media_{}", i), kinds[i as usize % 3]))
                .collect(),
        )
    }

    /// Number of `is_ready` polls answered `false` after `create`
    pub fn init_latency(mut self, polls: u32) -> Self {
        self.init_latency = polls;
        self
    }

    /// Number of `current_media_id` polls that still report the previous media after a request
    pub fn switch_latency(mut self, polls: u32) -> Self {
        self.switch_latency = polls;
        self
    }

    pub fn reference_camera_override(mut self, reference: ReferenceCamera) -> Self {
        self.reference = reference;
        self
    }

    pub fn viewing_space_radius(mut self, radius: f32) -> Self {
        self.viewing_space_radius = radius;
        self
    }

    pub fn attach_gpu(mut self, gpu: Arc<GpuContext>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn set_switch_latency(&mut self, polls: u32) {
        self.switch_latency = polls;
    }

    pub fn catalog_mut(&mut self) -> &mut Vec<SimulatedMedia> {
        &mut self.catalog
    }

    pub fn calls(&self) -> &[ServiceCall] {
        &self.calls
    }

    pub fn lifecycle_calls(&self) -> Vec<ServiceCall> {
        self.calls.iter().filter(|c| c.is_lifecycle()).cloned().collect()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    fn record(&mut self, call: ServiceCall) {
        if self.calls.len() >= CALL_LOG_CAPACITY {
            self.calls.drain(..CALL_LOG_CAPACITY / 2);
        }
        self.calls.push(call);
    }

    /// Force the reported media id, e.g. to simulate a late report of a stale request
    pub fn force_reported_id(&mut self, id: i32) {
        self.reported_id = id;
        self.pending = None;
    }

    /// Deliver an error through the registered callback, as the service would from its own thread
    pub fn raise_error(&self, level: ErrorLevel, code: u32) {
        if let Some(callback) = &self.error_callback {
            callback(ServiceError::new(level, code));
        }
    }

    pub fn has_haptic_callback(&self) -> bool {
        self.haptic_callback.is_some()
    }

    /// Emit a haptic event from a separate thread, as the decoder's haptic track would
    pub fn trigger_haptic(
        &self,
        channel: u32,
        duration_ms: u32,
        start: f32,
        end: f32,
    ) -> Option<std::thread::JoinHandle<()>> {
        let callback = self.haptic_callback.clone()?;
        Some(std::thread::spawn(move || callback(channel, duration_ms, start, end)))
    }

    /// Same as `raise_error` but from a separate thread
    pub fn raise_error_from_thread(
        &self,
        level: ErrorLevel,
        code: u32,
    ) -> Option<std::thread::JoinHandle<()>> {
        let callback = self.error_callback.clone()?;
        Some(std::thread::spawn(move || callback(ServiceError::new(level, code))))
    }

    fn current_media(&self) -> Option<&SimulatedMedia> {
        usize::try_from(self.reported_id)
            .ok()
            .and_then(|id| self.catalog.get(id))
    }

    fn begin_switch(&mut self, media_id: u32) {
        let id = media_id as i32;
        if (media_id as usize) >= self.catalog.len() {
            // Out-of-range requests stop decoding
            self.reported_id = id;
            self.pending = None;
            return;
        }
        if self.switch_latency == 0 {
            self.reported_id = id;
            self.pending = None;
        } else {
            self.pending = Some((id, self.switch_latency));
        }
        self.content_dirty = true;
    }

    fn upload_content(&mut self) {
        let (Some(gpu), Some(media)) = (self.gpu.clone(), self.current_media().cloned()) else {
            return;
        };
        match media.kind {
            MediaKind::PointCloud => self.upload_point_cloud(&gpu, &media),
            _ => self.upload_picture(&gpu, &media),
        }
    }

    fn upload_point_cloud(&self, gpu: &GpuContext, media: &SimulatedMedia) {
        let (Some(position), Some(color)) = (&self.position, &self.color) else {
            return;
        };
        let (Some(pos_tex), Some(col_tex)) = (&position.texture, &color.texture) else {
            return;
        };
        let capacity = position.width * position.height;
        let count = media.point_count.min(capacity);

        let mut positions = vec![0.0f32; (capacity * 4) as usize];
        let mut colors = vec![0.0f32; (capacity * 4) as usize];
        for (i, p) in fibonacci_sphere(count).into_iter().enumerate() {
            let base = i * 4;
            positions[base..base + 4].copy_from_slice(&[p.x, p.y, p.z, 1.0]);
            let c = p * 0.5 + Vec3::splat(0.5);
            colors[base..base + 4].copy_from_slice(&[c.x, c.y, c.z, 1.0]);
        }

        write_rgba32f(gpu, pos_tex, position.width, position.height, &positions);
        write_rgba32f(gpu, col_tex, color.width, color.height, &colors);

        if let Some(buffer) = self.indirect.as_ref().and_then(|i| i.buffer.as_ref()) {
            let args = DrawIndirectArgs::new(count * self.vertices_per_point, 1);
            gpu.queue().write_buffer(buffer, 0, bytemuck::bytes_of(&args));
        }
    }

    fn upload_picture(&self, gpu: &GpuContext, media: &SimulatedMedia) {
        let Some(color) = &self.color else {
            return;
        };
        let Some(texture) = &color.texture else {
            return;
        };
        let seed = (media.name.len() as u32).wrapping_mul(37);
        let pixels: Vec<u8> = (0..color.height)
            .flat_map(|y| {
                (0..color.width).flat_map(move |x| {
                    [
                        (x * 255 / color.width.max(1)) as u8,
                        (y * 255 / color.height.max(1)) as u8,
                        (seed % 255) as u8,
                        255,
                    ]
                })
            })
            .collect();
        gpu.queue().write_texture(
            texture.as_image_copy(),
            &pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * color.width),
                rows_per_image: Some(color.height),
            },
            wgpu::Extent3d {
                width: color.width,
                height: color.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl DecoderService for SimulatedService {
    fn create(&mut self, config_path: &Path) {
        self.record(ServiceCall::Create(config_path.to_path_buf()));
        self.created = true;
        self.ready_polls.set(0);
    }

    fn destroy(&mut self) {
        self.record(ServiceCall::Destroy);
        self.created = false;
        self.reported_id = -1;
        self.pending = None;
    }

    fn start(&mut self, media_id: u32) {
        self.record(ServiceCall::Start(media_id));
        self.begin_switch(media_id);
    }

    fn request_media(&mut self, media_id: u32) {
        self.record(ServiceCall::RequestMedia(media_id));
        self.begin_switch(media_id);
    }

    fn pause(&mut self, paused: bool) {
        self.record(ServiceCall::Pause(paused));
        self.paused = paused;
    }

    fn stop(&mut self) {
        self.record(ServiceCall::Stop);
        self.reported_id = -1;
        self.pending = None;
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.record(ServiceCall::SetErrorCallback);
        self.error_callback = Some(Arc::new(callback));
    }

    fn is_ready(&self) -> bool {
        if !self.created {
            return false;
        }
        let polls = self.ready_polls.get();
        self.ready_polls.set(polls.saturating_add(1));
        polls >= self.init_latency
    }

    fn media_count(&self) -> u32 {
        self.catalog.len() as u32
    }

    fn current_media_id(&mut self) -> i32 {
        if let Some((id, remaining)) = self.pending {
            if remaining == 0 {
                self.reported_id = id;
                self.pending = None;
            } else {
                self.pending = Some((id, remaining - 1));
            }
        }
        self.reported_id
    }

    fn media_kind(&self) -> MediaKind {
        self.current_media().map(|m| m.kind).unwrap_or(MediaKind::Video)
    }

    fn media_name(&self, media_id: u32) -> String {
        self.catalog
            .get(media_id as usize)
            .map(|m| m.name.clone())
            .unwrap_or_default()
    }

    fn content_dimensions(&self) -> (u32, u32) {
        self.current_media().map(|m| m.dimensions).unwrap_or((0, 0))
    }

    fn reference_camera(&self) -> ReferenceCamera {
        self.reference
    }

    fn viewing_space_contains(&self, position: Vec3) -> bool {
        position.length() <= self.viewing_space_radius
    }

    /// Fully included inside the radius, fading out linearly to zero at twice the radius
    fn viewing_space_inclusion(&self, job: u32) -> f32 {
        let Some(position) = self.job_positions.get(job as usize) else {
            return 1.0;
        };
        let radius = self.viewing_space_radius.max(f32::EPSILON);
        (2.0 - position.length() / radius).clamp(0.0, 1.0)
    }

    fn set_job_count(&mut self, count: u32) {
        self.record(ServiceCall::SetJobCount(count));
    }

    fn set_viewport(&mut self, job: u32, viewport: Viewport) {
        self.record(ServiceCall::SetViewport(job, viewport));
    }

    fn set_projection(&mut self, job: u32, projection: ProjectionKind) {
        self.record(ServiceCall::SetProjection(job, projection));
    }

    fn set_resolution(&mut self, job: u32, width: u32, height: u32) {
        self.record(ServiceCall::SetResolution(job, width, height));
    }

    fn set_intrinsics(&mut self, job: u32, intrinsics: Intrinsics) {
        self.record(ServiceCall::SetIntrinsics(job, intrinsics));
    }

    fn set_extrinsics(&mut self, job: u32, extrinsics: Extrinsics) {
        self.record(ServiceCall::SetExtrinsics(job, extrinsics));
        let index = job as usize;
        if self.job_positions.len() <= index {
            self.job_positions.resize(index + 1, Vec3::ZERO);
        }
        self.job_positions[index] = extrinsics.translation;
    }

    fn bind_color_target(&mut self, target: &FrameTarget) {
        self.record(ServiceCall::BindColor {
            width: target.width,
            height: target.height,
        });
        self.color = Some(target.clone());
        self.content_dirty = true;
    }

    fn bind_position_target(&mut self, target: &FrameTarget) {
        self.record(ServiceCall::BindPosition {
            width: target.width,
            height: target.height,
        });
        self.position = Some(target.clone());
        self.content_dirty = true;
    }

    fn bind_shadow_target(&mut self, target: &FrameTarget) {
        self.record(ServiceCall::BindShadow {
            width: target.width,
            height: target.height,
        });
    }

    fn bind_indirect_args(&mut self, target: &IndirectArgsTarget) {
        self.record(ServiceCall::BindIndirectArgs);
        self.indirect = Some(target.clone());
        self.content_dirty = true;
    }

    fn set_vertices_per_point(&mut self, count: u32) {
        self.record(ServiceCall::SetVerticesPerPoint(count));
        if count != self.vertices_per_point {
            self.vertices_per_point = count;
            self.content_dirty = true;
        }
    }

    fn set_model_view_projection(&mut self, _mvp: Mat4) {
        self.record(ServiceCall::SetModelViewProjection);
    }

    fn set_decimation_level(&mut self, level: u32) {
        self.record(ServiceCall::SetDecimationLevel(level));
    }

    fn set_dynamic_decimation(&mut self, enabled: bool) {
        self.record(ServiceCall::SetDynamicDecimation(enabled));
    }

    fn set_decimation_ranges(&mut self, _r1: f32, _r2: f32, _viewport_cull: f32) {
        self.record(ServiceCall::SetDecimationRanges);
    }

    fn set_max_bbox(&mut self, size: f32) {
        self.record(ServiceCall::SetMaxBbox(size));
    }

    fn set_haptic_callback(&mut self, callback: HapticCallback) {
        self.haptic_callback = Some(Arc::new(callback));
    }

    fn set_quality_profile(&mut self, profile: QualityProfile) {
        self.record(ServiceCall::SetQualityProfile(profile));
    }

    /// Catalog media play at a nominal 30 fps; nothing decodes while paused or stopped
    fn decoder_fps(&self) -> f64 {
        if self.paused || self.current_media().is_none() {
            0.0
        } else {
            SIMULATED_FPS
        }
    }

    fn render(&mut self) {
        self.record(ServiceCall::Render);
        if self.content_dirty {
            self.upload_content();
            self.content_dirty = false;
        }
        self.frames_rendered += 1;
    }
}

/// Evenly distributed points on the unit sphere
pub fn fibonacci_sphere(count: u32) -> Vec<Vec3> {
    let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    (0..count)
        .map(|i| {
            let y = 1.0 - (i as f32 + 0.5) / count as f32 * 2.0;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden * i as f32;
            Vec3::new(theta.cos() * r, y, theta.sin() * r)
        })
        .collect()
}

fn write_rgba32f(gpu: &GpuContext, texture: &wgpu::Texture, width: u32, height: u32, data: &[f32]) {
    gpu.queue().write_texture(
        texture.as_image_copy(),
        bytemuck::cast_slice(data),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(16 * width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_after_latency() {
        let mut service = SimulatedService::with_media_count(1).init_latency(2);
        assert!(!service.is_ready());
        service.create(Path::new("config.json"));
        assert!(!service.is_ready());
        assert!(!service.is_ready());
        assert!(service.is_ready());
    }

    #[test]
    fn test_switch_latency() {
        let mut service = SimulatedService::with_media_count(3).switch_latency(2);
        service.start(1);
        assert_eq!(service.current_media_id(), -1);
        assert_eq!(service.current_media_id(), -1);
        assert_eq!(service.current_media_id(), 1);
    }

    #[test]
    fn test_catalog_kinds_cycle() {
        let mut service = SimulatedService::with_media_count(3);
        service.start(2);
        assert_eq!(service.current_media_id(), 2);
        assert_eq!(service.media_kind(), MediaKind::PointCloud);
        assert_eq!(service.media_name(2), "media_2");
    }

    #[test]
    fn test_out_of_range_request_stops() {
        let mut service = SimulatedService::with_media_count(2);
        service.start(0);
        service.request_media(255);
        assert_eq!(service.current_media_id(), 255);
        assert_eq!(service.content_dimensions(), (0, 0));
    }

    #[test]
    fn test_inclusion_follows_extrinsics() {
        let mut service = SimulatedService::with_media_count(1).viewing_space_radius(1.0);
        assert_eq!(service.viewing_space_inclusion(0), 1.0);

        service.set_extrinsics(0, Extrinsics::from_translation(Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(service.viewing_space_inclusion(0), 1.0);

        service.set_extrinsics(0, Extrinsics::from_translation(Vec3::new(1.5, 0.0, 0.0)));
        assert!((service.viewing_space_inclusion(0) - 0.5).abs() < 1e-6);

        service.set_extrinsics(0, Extrinsics::from_translation(Vec3::new(3.0, 0.0, 0.0)));
        assert_eq!(service.viewing_space_inclusion(0), 0.0);
    }

    #[test]
    fn test_call_log_stays_bounded() {
        let mut service = SimulatedService::with_media_count(1);
        service.start(0);
        for frame in 0..(CALL_LOG_CAPACITY * 3) as u32 {
            service.set_job_count(1);
            service.set_intrinsics(0, Intrinsics::default());
            service.render();
            assert!(service.calls().len() <= CALL_LOG_CAPACITY, "frame {}", frame);
        }
        assert_eq!(service.calls().last(), Some(&ServiceCall::Render));
        assert!(service.calls().len() >= CALL_LOG_CAPACITY / 2);
        assert_eq!(service.frames_rendered(), (CALL_LOG_CAPACITY * 3) as u64);
    }

    #[test]
    fn test_fibonacci_sphere_on_unit_sphere() {
        for p in fibonacci_sphere(100) {
            assert!((p.length() - 1.0).abs() < 1e-4);
        }
    }
}
