//! Multi-view-plus-depth presenter.
//!
//! Two ways to look at the synthesized views:
//! - `Fullscreen`: the camera adopts the content's reference field of view and every job
//!   follows the camera pose (one job per eye).
//! - `Window`: a virtual window quad is placed at the reference near plane. Each frame the
//!   camera offset is measured in the window's unscaled local frame and turned into an
//!   off-axis pinhole, so the content appears behind the window.

use glam::Vec3;

use crate::camera::{Camera, TargetTransform};
use crate::config::{ImmersiveConfig, ImmersiveTarget, MotionPolicy};
use crate::error::{PlayerError, Result};
use crate::service::{MediaKind, ProjectionKind, ReferenceCamera, TargetFormat};
use crate::session::RenderData;
use crate::view_job::{Extrinsics, Intrinsics, ViewJobSet};

use super::blit::{BlitParams, Blitter, NdcRect};
use super::frame_buffers::FrameBufferSet;
use super::presenter::Presenter;
use super::stage::RenderStage;
use super::{FrameEncoder, PresenterContext, RenderDevice};

/// Physical size of the virtual window and its distance from the viewer at rest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowGeometry {
    pub width: f32,
    pub height: f32,
    pub distance: f32,
}

impl WindowGeometry {
    /// Window that exactly fills the reference camera's frustum at its near plane
    pub fn from_reference(reference: &ReferenceCamera) -> Self {
        let distance = reference.clip.near;
        let height = 2.0 * distance * (reference.vertical_fov * 0.5).tan();
        Self {
            width: height * reference.aspect_ratio,
            height,
            distance,
        }
    }

    /// Place the window `distance` in front of `camera`, facing it
    pub fn place(&self, camera: &Camera) -> TargetTransform {
        TargetTransform {
            position: camera.position + camera.forward() * self.distance,
            rotation: camera.rotation,
            scale: Vec3::new(self.width, self.height, 1.0),
        }
    }
}

/// Off-axis pinhole for an eye at `eye` looking through `window`.
///
/// The eye offset is measured in the window's unscaled local frame. With the eye at its rest
/// position (on the window axis at `geometry.distance`) this yields centred intrinsics and
/// zero extrinsics.
pub fn window_view(
    window: &TargetTransform,
    geometry: &WindowGeometry,
    eye: Vec3,
    texture_size: (u32, u32),
) -> (Intrinsics, Extrinsics) {
    let local = window.world_to_local_unscaled().transform_point3(eye);
    let offset = Vec3::new(-local.x, -local.y, local.z);

    let pixels_per_meter = texture_size.0 as f32 / geometry.width;
    let focal = offset.z * pixels_per_meter;
    let cx = (0.5 * geometry.width - offset.x) * pixels_per_meter;
    let cy = (0.5 * geometry.height + offset.y) * pixels_per_meter;

    let translation = Vec3::new(-offset.x, -offset.y, geometry.distance - offset.z);
    (
        Intrinsics::new(focal, focal, cx, cy),
        Extrinsics::from_translation(translation),
    )
}

/// Result of applying the motion policy for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    pub alpha: f32,
    pub rolled_back: bool,
}

/// Restrict the camera to the viewing space according to `policy`.
///
/// `last_good` is the most recent camera position found inside the viewing space.
pub fn apply_motion_policy(
    policy: MotionPolicy,
    camera: &mut Camera,
    last_good: &mut Vec3,
    inside: bool,
    inclusion: f32,
) -> MotionState {
    match policy {
        MotionPolicy::Freeze => {
            if inside {
                *last_good = camera.position;
                MotionState {
                    alpha: 1.0,
                    rolled_back: false,
                }
            } else {
                camera.position = *last_good;
                MotionState {
                    alpha: 1.0,
                    rolled_back: true,
                }
            }
        }
        MotionPolicy::FadeOut => {
            if inclusion > 0.0 {
                *last_good = camera.position;
            }
            MotionState {
                alpha: inclusion.clamp(0.0, 1.0),
                rolled_back: false,
            }
        }
        MotionPolicy::Free => MotionState {
            alpha: 1.0,
            rolled_back: false,
        },
    }
}

pub struct ImmersivePresenter {
    config: ImmersiveConfig,
    buffers: FrameBufferSet,
    jobs: ViewJobSet,
    blitter: Option<Blitter>,
    view_size: (u32, u32),
    window: TargetTransform,
    geometry: Option<WindowGeometry>,
    base_fov: Option<f32>,
    last_good_position: Vec3,
    alpha: f32,
    active: bool,
    visible: bool,
}

impl ImmersivePresenter {
    pub fn new(config: ImmersiveConfig, device: Option<&RenderDevice>) -> Self {
        Self {
            config,
            buffers: FrameBufferSet::new(),
            jobs: ViewJobSet::new(),
            blitter: device.map(|d| Blitter::new(d.gpu.clone(), d.output_format)),
            view_size: (0, 0),
            window: TargetTransform::default(),
            geometry: None,
            base_fov: None,
            last_good_position: Vec3::ZERO,
            alpha: 1.0,
            active: false,
            visible: false,
        }
    }

    pub fn motion_policy(&self) -> MotionPolicy {
        self.config.motion
    }

    pub fn set_motion_policy(&mut self, policy: MotionPolicy) {
        self.config.motion = policy;
        self.alpha = 1.0;
    }

    /// Freeze -> FadeOut -> Free -> Freeze
    pub fn cycle_motion(&mut self) -> MotionPolicy {
        let next = self.config.motion.next();
        log::info!("Motion policy: {:?}", next);
        self.set_motion_policy(next);
        next
    }

    pub fn jobs(&self) -> &ViewJobSet {
        &self.jobs
    }

    pub fn buffers(&self) -> &FrameBufferSet {
        &self.buffers
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn window(&self) -> Option<(&TargetTransform, &WindowGeometry)> {
        self.geometry.as_ref().map(|g| (&self.window, g))
    }

    fn view_count(&self) -> u32 {
        self.config.view_count.clamp(1, 2)
    }

    /// Per-view texture size: screen height, width from the content aspect in window mode
    fn view_size_for(&self, camera: &Camera, reference: &ReferenceCamera) -> (u32, u32) {
        let height = camera.pixel_height.max(1);
        let width = match self.config.target {
            ImmersiveTarget::Fullscreen => camera.pixel_width.max(1),
            ImmersiveTarget::Window => {
                ((height as f32 * reference.aspect_ratio).round() as u32).max(1)
            }
        };
        (width, height)
    }

    fn update_jobs(&mut self, camera: &Camera) {
        let views = self.view_count();
        let separation = self.config.eye_separation;
        for job in self.jobs.jobs_mut() {
            let eye = camera.eye_position(job.index, views, separation);
            match (self.config.target, &self.geometry) {
                (ImmersiveTarget::Window, Some(geometry)) => {
                    let (intrinsics, extrinsics) =
                        window_view(&self.window, geometry, eye, self.view_size);
                    job.intrinsics = intrinsics;
                    job.extrinsics = extrinsics;
                }
                _ => {
                    job.intrinsics = Intrinsics::from_vertical_fov(
                        camera.fov_y,
                        self.view_size.0,
                        self.view_size.1,
                    );
                    job.extrinsics = Extrinsics::new(eye, camera.rotation);
                }
            }
        }
    }

    fn restore_fov(&mut self, camera: &mut Camera) {
        if let Some(fov) = self.base_fov.take() {
            camera.fov_y = fov;
        }
    }
}

impl Presenter for ImmersivePresenter {
    fn kind(&self) -> MediaKind {
        MediaKind::MultiViewDepth
    }

    fn stage(&self) -> RenderStage {
        RenderStage::PreRender
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn on_media_request(&mut self, _ctx: &mut PresenterContext<'_>) {
        self.visible = false;
    }

    fn on_media_ready(
        &mut self,
        data: &RenderData,
        ctx: &mut PresenterContext<'_>,
    ) -> Result<bool> {
        if data.media_kind != MediaKind::MultiViewDepth {
            return Ok(false);
        }

        let (content_w, content_h) = ctx.service.content_dimensions();
        if content_w == 0 || content_h == 0 {
            log::warn!("Immersive media '{}' reports zero content size, waiting", data.media_name);
            return Err(PlayerError::ZeroContentSize);
        }

        let reference = ctx.service.reference_camera();
        let views = self.view_count();
        self.view_size = self.view_size_for(ctx.camera, &reference);
        let (width, height) = self.view_size;

        if self.buffers.ensure_color(ctx.gpu(), width * views, height, TargetFormat::Rgba8) {
            log::info!(
                "Immersive buffer allocated at {}x{} ({} views)",
                width * views,
                height,
                views
            );
        }
        if let Some(color) = self.buffers.color() {
            ctx.service.bind_color_target(color);
            if let (Some(blitter), Some(texture)) = (&mut self.blitter, &color.texture) {
                blitter.set_source(&texture.create_view(&wgpu::TextureViewDescriptor::default()));
            }
        }

        match self.config.target {
            ImmersiveTarget::Fullscreen => {
                if self.base_fov.is_none() {
                    self.base_fov = Some(ctx.camera.fov_y);
                }
                ctx.camera.fov_y = reference.vertical_fov;
                self.geometry = None;
            }
            ImmersiveTarget::Window => {
                let geometry = WindowGeometry::from_reference(&reference);
                self.window = geometry.place(ctx.camera);
                self.geometry = Some(geometry);
            }
        }

        self.jobs = ViewJobSet::side_by_side(views, width, height, ProjectionKind::Perspective);
        self.jobs.configure(ctx.service);
        self.last_good_position = ctx.camera.position;
        self.alpha = 1.0;
        self.update_jobs(ctx.camera);
        self.jobs.update_poses(ctx.service);

        log::info!(
            "Immersive presenter active: {:?}, {} view(s) of {}x{}",
            self.config.target,
            views,
            width,
            height
        );
        self.active = true;
        self.visible = true;
        Ok(true)
    }

    fn before_composite(
        &mut self,
        ctx: &mut PresenterContext<'_>,
        _frame: Option<&mut FrameEncoder<'_>>,
    ) {
        if !self.active {
            return;
        }

        let inside = ctx.service.viewing_space_contains(ctx.camera.position);
        let inclusion = ctx.service.viewing_space_inclusion(0);
        let state = apply_motion_policy(
            self.config.motion,
            ctx.camera,
            &mut self.last_good_position,
            inside,
            inclusion,
        );
        if state.rolled_back {
            log::trace!("Camera left the viewing space, rolled back");
        }
        self.alpha = state.alpha;

        self.update_jobs(ctx.camera);
        self.jobs.update_poses(ctx.service);
    }

    fn after_composite(
        &mut self,
        ctx: &mut PresenterContext<'_>,
        frame: Option<&mut FrameEncoder<'_>>,
    ) {
        let (Some(frame), Some(blitter)) = (frame, &self.blitter) else {
            return;
        };
        if !self.visible || self.alpha <= 0.0 {
            return;
        }

        let rect = match self.config.target {
            ImmersiveTarget::Fullscreen => NdcRect::FULL,
            ImmersiveTarget::Window => match NdcRect::of_quad(ctx.camera, &self.window) {
                Some(rect) => rect,
                None => return,
            },
        };
        blitter.draw(
            frame,
            BlitParams {
                rect,
                column: (0, self.view_count()),
                alpha: self.alpha,
                ..Default::default()
            },
        );
    }

    fn teardown(&mut self, ctx: &mut PresenterContext<'_>) {
        self.restore_fov(ctx.camera);
        self.buffers.release();
        if let Some(blitter) = &mut self.blitter {
            blitter.clear_source();
        }
        self.jobs = ViewJobSet::new();
        self.geometry = None;
        self.active = false;
        self.visible = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ClipRange;
    use glam::Vec2;

    /// Pixel position of the window centre in the synthesized image
    fn principal_point_offset(intrinsics: &Intrinsics, texture_size: (u32, u32)) -> Vec2 {
        Vec2::new(
            intrinsics.cx - texture_size.0 as f32 * 0.5,
            intrinsics.cy - texture_size.1 as f32 * 0.5,
        )
    }

    fn reference() -> ReferenceCamera {
        ReferenceCamera {
            projection: ProjectionKind::Perspective,
            vertical_fov: 90f32.to_radians(),
            aspect_ratio: 2.0,
            clip: ClipRange { near: 1.0, far: 10.0 },
        }
    }

    #[test]
    fn test_window_from_reference() {
        let geometry = WindowGeometry::from_reference(&reference());
        assert!((geometry.height - 2.0).abs() < 1e-5);
        assert!((geometry.width - 4.0).abs() < 1e-5);
        assert_eq!(geometry.distance, 1.0);
    }

    #[test]
    fn test_window_view_at_rest() {
        let camera = Camera::new(800, 400);
        let geometry = WindowGeometry::from_reference(&reference());
        let window = geometry.place(&camera);

        let (k, e) = window_view(&window, &geometry, camera.position, (800, 400));
        assert!((k.fx - 200.0).abs() < 1e-3);
        assert!((k.cx - 400.0).abs() < 1e-3);
        assert!((k.cy - 200.0).abs() < 1e-3);
        assert!(e.translation.length() < 1e-5);
    }

    #[test]
    fn test_window_view_ignores_window_scale() {
        let camera = Camera::new(800, 400);
        let geometry = WindowGeometry::from_reference(&reference());
        let mut window = geometry.place(&camera);
        let eye = Vec3::new(0.25, 0.0, 0.0);

        let (k1, e1) = window_view(&window, &geometry, eye, (800, 400));
        window.scale *= 3.0;
        let (k2, e2) = window_view(&window, &geometry, eye, (800, 400));

        assert_eq!(k1, k2);
        assert_eq!(e1, e2);
        // Eye moved right: principal point moves right, translation follows the eye
        assert!(principal_point_offset(&k1, (800, 400)).x > 0.0);
        assert!((e1.translation.x - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_freeze_rolls_back() {
        let mut camera = Camera::default();
        let mut last_good = Vec3::ZERO;

        camera.position = Vec3::new(0.5, 0.0, 0.0);
        let state = apply_motion_policy(
            MotionPolicy::Freeze,
            &mut camera,
            &mut last_good,
            true,
            1.0,
        );
        assert!(!state.rolled_back);
        assert_eq!(last_good, Vec3::new(0.5, 0.0, 0.0));

        camera.position = Vec3::new(5.0, 0.0, 0.0);
        let state = apply_motion_policy(
            MotionPolicy::Freeze,
            &mut camera,
            &mut last_good,
            false,
            0.0,
        );
        assert!(state.rolled_back);
        assert_eq!(camera.position, Vec3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn test_fade_and_free() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(5.0, 0.0, 0.0);
        let mut last_good = Vec3::ZERO;

        let state = apply_motion_policy(

            MotionPolicy::FadeOut,

            &mut camera,

            &mut last_good,

            false,

            0.25,

        );
        assert_eq!(state.alpha, 0.25);
        assert_eq!(camera.position.x, 5.0);

        let state = apply_motion_policy(

            MotionPolicy::Free,

            &mut camera,

            &mut last_good,

            false,

            0.0,

        );
        assert_eq!(state.alpha, 1.0);
    }
}
