pub mod blit;
pub mod frame_buffers;
pub mod immersive;
pub mod point_cloud;
pub mod presenter;
pub mod stage;
pub mod video;

use std::sync::Arc;

use crate::camera::Camera;
use crate::core::gpu_context::GpuContext;
use crate::service::DecoderService;

pub use blit::{BlitMode, BlitParams, Blitter, NdcRect};
pub use frame_buffers::FrameBufferSet;
pub use immersive::ImmersivePresenter;
pub use point_cloud::PointCloudPresenter;
pub use presenter::Presenter;
pub use stage::{CameraStageHooks, RenderStage, StageDispatcher};
pub use video::VideoPresenter;

/// Output format of the offscreen target presenters draw into
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// GPU handles shared by the presenters
#[derive(Clone)]
pub struct RenderDevice {
    pub gpu: Arc<GpuContext>,
    pub output_format: wgpu::TextureFormat,
}

impl RenderDevice {
    pub fn new(gpu: Arc<GpuContext>) -> Self {
        Self {
            gpu,
            output_format: OUTPUT_FORMAT,
        }
    }
}

/// Command encoder and output view for the frame being recorded
pub struct FrameEncoder<'a> {
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub target: &'a wgpu::TextureView,
    pub size: (u32, u32),
}

/// What a presenter may touch while reacting to an event or a frame
pub struct PresenterContext<'a> {
    pub service: &'a mut dyn DecoderService,
    pub camera: &'a mut Camera,
    pub device: Option<&'a RenderDevice>,
}

impl PresenterContext<'_> {
    pub fn gpu(&self) -> Option<&GpuContext> {
        self.device.map(|d| d.gpu.as_ref())
    }
}
