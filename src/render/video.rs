use glam::{Quat, Vec3};

use crate::camera::{Camera, TargetTransform};
use crate::config::{VideoConfig, VideoTarget};
use crate::error::{PlayerError, Result};
use crate::service::{MediaKind, ProjectionKind, TargetFormat};
use crate::session::RenderData;
use crate::view_job::{Extrinsics, Intrinsics, ViewJob, ViewJobSet};

use super::blit::{BlitMode, BlitParams, Blitter, NdcRect};
use super::frame_buffers::FrameBufferSet;
use super::presenter::Presenter;
use super::stage::RenderStage;
use super::{FrameEncoder, PresenterContext, RenderDevice};

pub const FLAT_RESOLUTION: (u32, u32) = (1920, 1080);
pub const SPHERE_RESOLUTION: (u32, u32) = (2048, 1024);

/// Plain and 360° video
pub struct VideoPresenter {
    config: VideoConfig,
    buffers: FrameBufferSet,
    jobs: ViewJobSet,
    blitter: Option<Blitter>,
    quad: TargetTransform,
    target: VideoTarget,
    active: bool,
    visible: bool,
}

impl VideoPresenter {
    pub fn new(config: VideoConfig, device: Option<&RenderDevice>) -> Self {
        Self {
            target: config.target,
            config,
            buffers: FrameBufferSet::new(),
            jobs: ViewJobSet::new(),
            blitter: device.map(|d| Blitter::new(d.gpu.clone(), d.output_format)),
            quad: TargetTransform::default(),
            active: false,
            visible: false,
        }
    }

    /// Target actually in use: 360° media always go on the sphere
    pub fn target(&self) -> VideoTarget {
        self.target
    }

    pub fn jobs(&self) -> &ViewJobSet {
        &self.jobs
    }

    pub fn buffers(&self) -> &FrameBufferSet {
        &self.buffers
    }

    pub fn quad(&self) -> &TargetTransform {
        &self.quad
    }

    fn resolve_target(&self) -> VideoTarget {
        if self.config.immersive_360 {
            VideoTarget::Sphere
        } else {
            self.config.target
        }
    }

    /// Quad in front of the camera, as tall as configured and as wide as the aspect ratio says
    fn place_quad(&mut self, camera: &Camera) {
        let height = self.config.quad_height;
        let width = height * self.config.aspect_ratio;
        self.quad = TargetTransform {
            position: camera.position + camera.forward() * self.config.quad_distance,
            rotation: camera.rotation,
            scale: Vec3::new(width, height, 1.0),
        };
    }
}

impl Presenter for VideoPresenter {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
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
        if data.media_kind != MediaKind::Video {
            return Ok(false);
        }

        let (content_w, content_h) = ctx.service.content_dimensions();
        if content_w == 0 || content_h == 0 {
            log::warn!("Video '{}' reports zero content size, waiting", data.media_name);
            return Err(PlayerError::ZeroContentSize);
        }

        self.target = self.resolve_target();
        let ((width, height), projection) = match self.target {
            VideoTarget::Sphere => (SPHERE_RESOLUTION, ProjectionKind::Equirectangular),
            VideoTarget::Fullscreen | VideoTarget::Quad => {
                (FLAT_RESOLUTION, ProjectionKind::Perspective)
            }
        };

        if self.buffers.ensure_color(ctx.gpu(), width, height, TargetFormat::Rgba8) {
            log::info!("Video buffer allocated at {}x{}", width, height);
        }
        if let Some(color) = self.buffers.color() {
            ctx.service.bind_color_target(color);
            if let (Some(blitter), Some(texture)) = (&mut self.blitter, &color.texture) {
                blitter.set_source(&texture.create_view(&wgpu::TextureViewDescriptor::default()));
            }
        }

        let reference = ctx.service.reference_camera();
        let mut job = ViewJob::new(0, width, height, projection);
        job.intrinsics = Intrinsics::from_vertical_fov(reference.vertical_fov, width, height);
        self.jobs = ViewJobSet::single(job);
        self.jobs.configure(ctx.service);
        self.jobs.update_poses(ctx.service);

        if self.target == VideoTarget::Quad {
            self.place_quad(ctx.camera);
        }

        log::info!("Video presenter active on {:?} ({}x{})", self.target, width, height);
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
        let rotation = match self.target {
            VideoTarget::Sphere => ctx.camera.rotation,
            _ => Quat::IDENTITY,
        };
        for job in self.jobs.jobs_mut() {
            job.extrinsics = Extrinsics::new(Vec3::ZERO, rotation);
        }
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
        if !self.visible {
            return;
        }

        let params = match self.target {
            VideoTarget::Fullscreen => BlitParams::default(),
            VideoTarget::Quad => match NdcRect::of_quad(ctx.camera, &self.quad) {
                Some(rect) => BlitParams {
                    rect,
                    ..Default::default()
                },
                None => return,
            },
            VideoTarget::Sphere => BlitParams {
                mode: BlitMode::Equirectangular,
                inv_view_proj: ctx.camera.view_projection().inverse(),
                ..Default::default()
            },
        };
        blitter.draw(frame, params);
    }

    fn teardown(&mut self, _ctx: &mut PresenterContext<'_>) {
        self.buffers.release();
        if let Some(blitter) = &mut self.blitter {
            blitter.clear_source();
        }
        self.jobs = ViewJobSet::new();
        self.active = false;
        self.visible = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::simulated::ServiceCall;
    use crate::service::{DecoderService, SimulatedService};

    fn ready_data() -> RenderData {
        RenderData {
            media_id: 0,
            media_kind: MediaKind::Video,
            media_name: "media_0".into(),
        }
    }

    #[test]
    fn test_sphere_for_360_media() {
        let mut service = SimulatedService::with_media_count(1);
        service.start(0);
        service.current_media_id();
        let mut camera = Camera::default();
        let mut presenter = VideoPresenter::new(
            VideoConfig {
                immersive_360: true,
                ..Default::default()
            },
            None,
        );

        let mut ctx = PresenterContext {
            service: &mut service,
            camera: &mut camera,
            device: None,
        };
        assert!(presenter.on_media_ready(&ready_data(), &mut ctx).unwrap());
        assert_eq!(presenter.target(), VideoTarget::Sphere);
        assert_eq!(presenter.jobs().jobs()[0].projection, ProjectionKind::Equirectangular);
        assert_eq!(presenter.buffers().color().unwrap().width, 2048);
        assert!(service
            .calls()
            .contains(&ServiceCall::BindColor { width: 2048, height: 1024 }));
    }

    #[test]
    fn test_quad_width_from_aspect() {
        let mut service = SimulatedService::with_media_count(1);
        service.start(0);
        service.current_media_id();
        let mut camera = Camera::default();
        let mut presenter = VideoPresenter::new(
            VideoConfig {
                target: VideoTarget::Quad,
                quad_height: 1.5,
                aspect_ratio: 2.0,
                ..Default::default()
            },
            None,
        );

        let mut ctx = PresenterContext {
            service: &mut service,
            camera: &mut camera,
            device: None,
        };
        presenter.on_media_ready(&ready_data(), &mut ctx).unwrap();
        assert_eq!(presenter.quad().scale, Vec3::new(3.0, 1.5, 1.0));
        assert!(presenter.quad().position.z < 0.0);
    }

    #[test]
    fn test_zero_size_is_retryable() {
        let mut service = SimulatedService::with_media_count(1);
        let mut camera = Camera::default();
        let mut presenter = VideoPresenter::new(VideoConfig::default(), None);

        let mut ctx = PresenterContext {
            service: &mut service,
            camera: &mut camera,
            device: None,
        };
        let result = presenter.on_media_ready(&ready_data(), &mut ctx);
        assert_eq!(result, Err(PlayerError::ZeroContentSize));
        assert!(!presenter.is_active());
    }
}
