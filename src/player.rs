//! Composition root: session, presenters, stage dispatcher and haptics driven once per frame.
//!
//! Frame order:
//! 1. session tick (readiness polling, pending start, media reconciliation, error drain);
//!    lifecycle events reach the presenters synchronously
//! 2. haptic ramp
//! 3. output cleared, then the three camera stages in order; at the bound stage the armed
//!    presenter's `before_composite`, the service's `render` and `after_composite` run
//! 4. submit

use crate::camera::Camera;
use crate::config::{MotionPolicy, PlayerConfig, RenderMode};
use crate::error::Result;
use crate::frame::FrameInfo;
use crate::haptics::{HapticController, LogVibrationDevice, VibrationDevice};
use crate::render::{
    CameraStageHooks, FrameEncoder, ImmersivePresenter, PointCloudPresenter, Presenter,
    PresenterContext, RenderDevice, RenderStage, StageDispatcher, VideoPresenter, OUTPUT_FORMAT,
};
use crate::service::{DecoderService, MediaKind, QualityProfile};
use crate::session::{EventBus, MediaSession, SessionEvent, SessionObserver, INVALID_MEDIA_ID};

/// One presenter per media kind
pub struct Presenters {
    pub video: VideoPresenter,
    pub immersive: ImmersivePresenter,
    pub point_cloud: PointCloudPresenter,
}

impl Presenters {
    pub fn new(config: &PlayerConfig, device: Option<&RenderDevice>) -> Self {
        Self {
            video: VideoPresenter::new(config.video.clone(), device),
            immersive: ImmersivePresenter::new(config.immersive.clone(), device),
            point_cloud: PointCloudPresenter::new(config.point_cloud.clone(), device),
        }
    }

    pub fn get_mut(&mut self, kind: MediaKind) -> &mut dyn Presenter {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::MultiViewDepth => &mut self.immersive,
            MediaKind::PointCloud => &mut self.point_cloud,
        }
    }

    pub fn all_mut(&mut self) -> [&mut dyn Presenter; 3] {
        [&mut self.video, &mut self.immersive, &mut self.point_cloud]
    }

    /// Kinds whose presenter is currently active
    pub fn active_kinds(&mut self) -> Vec<MediaKind> {
        self.all_mut()
            .into_iter()
            .filter(|p| p.is_active())
            .map(|p| p.kind())
            .collect()
    }
}

/// Routes session events to the presenters and the dispatcher, then to bus subscribers
struct EventRouter<'a> {
    presenters: &'a mut Presenters,
    dispatcher: &'a mut StageDispatcher,
    events: &'a mut EventBus,
    haptics: &'a mut HapticController,
    camera: &'a mut Camera,
    device: Option<&'a RenderDevice>,
    quality: QualityProfile,
}

impl SessionObserver for EventRouter<'_> {
    fn on_event(&mut self, event: &SessionEvent, service: &mut dyn DecoderService) {
        let mut ctx = PresenterContext {
            service,
            camera: &mut *self.camera,
            device: self.device,
        };

        match event {
            SessionEvent::Init(config_path) => {
                if self.quality != QualityProfile::None {
                    ctx.service.set_quality_profile(self.quality);
                }
                self.haptics.bind(config_path, ctx.service);
            }
            SessionEvent::MediaRequest => {
                for presenter in self.presenters.all_mut() {
                    presenter.on_media_request(&mut ctx);
                }
            }
            SessionEvent::PreMediaReady(data) => {
                for presenter in self.presenters.all_mut() {
                    presenter.on_pre_media_ready(data, &mut ctx);
                }
                self.dispatcher.disarm();
            }
            SessionEvent::MediaReady(data) => {
                for presenter in self.presenters.all_mut() {
                    match presenter.on_media_ready(data, &mut ctx) {
                        Ok(true) => self.dispatcher.arm(presenter.stage(), presenter.kind()),
                        Ok(false) => {}
                        Err(e) => log::warn!(
                            "{:?} presenter not armed for media {}: {}",
                            presenter.kind(),
                            data.media_id,
                            e
                        ),
                    }
                }
            }
            SessionEvent::PostMediaReady(data) => {
                for presenter in self.presenters.all_mut() {
                    presenter.on_post_media_ready(data, &mut ctx);
                }
            }
            SessionEvent::Pause(paused) => {
                for presenter in self.presenters.all_mut() {
                    presenter.on_pause(*paused);
                }
            }
            SessionEvent::Error(error) => {
                log::debug!("Forwarding {} to subscribers", error);
            }
        }

        self.events.publish(event);
    }
}

/// Fires the composite call at the bound stage
struct StageRunner<'a> {
    can_render: bool,
    dispatcher: &'a StageDispatcher,
    presenters: &'a mut Presenters,
    service: &'a mut dyn DecoderService,
    camera: &'a mut Camera,
    device: Option<&'a RenderDevice>,
    composites: u32,
}

impl StageRunner<'_> {
    fn fire(&mut self, stage: RenderStage, frame: &mut Option<FrameEncoder<'_>>) {
        if !self.dispatcher.fires_at(stage, self.can_render) {
            return;
        }
        let Some(kind) = self.dispatcher.owner() else {
            return;
        };

        let presenter = self.presenters.get_mut(kind);
        let mut ctx = PresenterContext {
            service: &mut *self.service,
            camera: &mut *self.camera,
            device: self.device,
        };
        presenter.before_composite(&mut ctx, frame.as_mut());
        ctx.service.render();
        presenter.after_composite(&mut ctx, frame.as_mut());
        self.composites += 1;
    }
}

impl CameraStageHooks for StageRunner<'_> {
    type Frame<'f> = Option<FrameEncoder<'f>>;

    fn pre_cull(&mut self, frame: &mut Option<FrameEncoder<'_>>) {
        self.fire(RenderStage::PreCull, frame);
    }

    fn pre_render(&mut self, frame: &mut Option<FrameEncoder<'_>>) {
        self.fire(RenderStage::PreRender, frame);
    }

    fn post_render(&mut self, frame: &mut Option<FrameEncoder<'_>>) {
        self.fire(RenderStage::PostRender, frame);
    }
}

/// Offscreen image every frame is drawn into
struct OutputTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl OutputTarget {
    fn new(device: &RenderDevice, width: u32, height: u32) -> Self {
        let texture = device.gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("Player Output"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OUTPUT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            size: (width.max(1), height.max(1)),
        }
    }
}

pub struct Player<S: DecoderService> {
    config: PlayerConfig,
    session: MediaSession,
    service: S,
    camera: Camera,
    presenters: Presenters,
    dispatcher: StageDispatcher,
    events: EventBus,
    haptics: HapticController,
    device: Option<RenderDevice>,
    output: Option<OutputTarget>,
    composites: u64,
}

impl<S: DecoderService> Player<S> {
    /// Headless when `device` is `None`: the lifecycle and the service configuration run
    /// as usual, only GPU work is skipped
    pub fn new(config: PlayerConfig, service: S, device: Option<RenderDevice>) -> Self {
        Self::with_vibration(config, service, device, Box::new(LogVibrationDevice))
    }

    pub fn with_vibration(
        config: PlayerConfig,
        service: S,
        device: Option<RenderDevice>,
        vibration: Box<dyn VibrationDevice>,
    ) -> Self {
        let mut camera = Camera::new(config.window_width, config.window_height);
        camera.fov_y = config.reference_fov_deg.to_radians();
        let output = device
            .as_ref()
            .map(|d| OutputTarget::new(d, config.window_width, config.window_height));

        Self {
            presenters: Presenters::new(&config, device.as_ref()),
            session: MediaSession::new(),
            service,
            camera,
            dispatcher: StageDispatcher::new(),
            events: EventBus::new(),
            haptics: HapticController::new(vibration),
            device,
            output,
            composites: 0,
            config,
        }
    }

    /// Create the decoder and begin polling for readiness; queues the configured start
    /// media when auto-start is on
    pub fn initialize(&mut self) -> Result<()> {
        let output_bound = self.camera.pixel_width > 0 && self.camera.pixel_height > 0;
        self.session
            .initialize(&mut self.service, self.config.decoder_config_path(), output_bound)?;
        if self.config.auto_start {
            self.session.start_when_ready(self.config.start_media_id);
        }
        Ok(())
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn session(&self) -> &MediaSession {
        &self.session
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn presenters(&self) -> &Presenters {
        &self.presenters
    }

    pub fn presenters_mut(&mut self) -> &mut Presenters {
        &mut self.presenters
    }

    pub fn dispatcher(&self) -> &StageDispatcher {
        &self.dispatcher
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn haptics_mut(&mut self) -> &mut HapticController {
        &mut self.haptics
    }

    /// Number of composite calls issued so far
    pub fn composites(&self) -> u64 {
        self.composites
    }

    pub fn output_texture(&self) -> Option<&wgpu::Texture> {
        self.output.as_ref().map(|o| &o.texture)
    }

    pub fn output_view(&self) -> Option<&wgpu::TextureView> {
        self.output.as_ref().map(|o| &o.view)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.camera.resize(width, height);
        if let Some(device) = &self.device {
            self.output = Some(OutputTarget::new(device, width, height));
        }
    }

    fn router(&mut self) -> (&mut MediaSession, &mut S, EventRouter<'_>) {
        (
            &mut self.session,
            &mut self.service,
            EventRouter {
                presenters: &mut self.presenters,
                dispatcher: &mut self.dispatcher,
                events: &mut self.events,
                haptics: &mut self.haptics,
                camera: &mut self.camera,
                device: self.device.as_ref(),
                quality: self.config.quality,
            },
        )
    }

    /// Frame rate the decoder reports for the current media
    pub fn decoder_fps(&self) -> f64 {
        self.service.decoder_fps()
    }

    pub fn start(&mut self, media_id: i32) -> Result<()> {
        self.session.start(&mut self.service, media_id)
    }

    pub fn change_media(&mut self, media_id: i32) -> Result<()> {
        let (session, service, mut router) = self.router();
        session.change_media(service, &mut router, media_id)
    }

    /// Next media in the catalog, wrapping around; starts from 0 when stopped
    pub fn next_media(&mut self) -> Result<()> {
        let count = self.service.media_count().max(1) as i32;
        let requested = self.session.requested_media_id();
        let next = if requested == INVALID_MEDIA_ID {
            0
        } else {
            (requested + 1) % count
        };
        self.change_media(next)
    }

    pub fn pause(&mut self, paused: bool) {
        let (session, service, mut router) = self.router();
        session.pause(service, &mut router, paused);
    }

    pub fn toggle_play_pause(&mut self) {
        let (session, service, mut router) = self.router();
        session.toggle_play_pause(service, &mut router);
    }

    pub fn stop(&mut self) {
        let (session, service, mut router) = self.router();
        session.stop(service, &mut router);
    }

    pub fn cycle_motion(&mut self) -> MotionPolicy {
        self.presenters.immersive.cycle_motion()
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.presenters.point_cloud.set_render_mode(mode);
    }

    pub fn set_sort_range(&mut self, range: u32) {
        self.presenters.point_cloud.set_sort_range(range);
    }

    /// Release presenter buffers, stop and destroy the decoder
    pub fn shutdown(&mut self) {
        let mut ctx = PresenterContext {
            service: &mut self.service,
            camera: &mut self.camera,
            device: self.device.as_ref(),
        };
        for presenter in self.presenters.all_mut() {
            if presenter.is_active() {
                presenter.teardown(&mut ctx);
            }
        }
        self.dispatcher.disarm();
        self.haptics.stop();
        self.session.shutdown(&mut self.service);
    }

    /// Run one frame
    pub fn frame(&mut self, info: &FrameInfo) {
        {
            let (session, service, mut router) = self.router();
            session.tick(service, &mut router);
        }
        self.haptics.tick(info.delta);

        let can_render = self.session.can_render();
        let mut runner = StageRunner {
            can_render,
            dispatcher: &self.dispatcher,
            presenters: &mut self.presenters,
            service: &mut self.service,
            camera: &mut self.camera,
            device: self.device.as_ref(),
            composites: 0,
        };

        match (self.device.as_ref(), self.output.as_ref()) {
            (Some(device), Some(output)) => {
                let gpu = &device.gpu;
                let mut encoder = gpu
                    .device()
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("Player Frame Encoder"),
                    });
                clear_output(&mut encoder, &output.view);

                let mut frame = Some(FrameEncoder {
                    encoder: &mut encoder,
                    target: &output.view,
                    size: output.size,
                });
                runner.run_all_stages(&mut frame);
                drop(frame);

                gpu.queue().submit(Some(encoder.finish()));
            }
            _ => runner.run_all_stages(&mut None),
        }

        self.composites += runner.composites as u64;
    }
}

fn clear_output(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Clear Output Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}
