use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use wgpu::{BindGroup, BindGroupLayout, Buffer, Device, RenderPipeline, Sampler, TextureView};

use crate::camera::{Camera, TargetTransform};
use crate::core::gpu_context::GpuContext;

use super::FrameEncoder;

/// How the source texture is mapped onto the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitMode {
    /// Straight copy into a screen rectangle
    Flat,
    /// 360° equirectangular image looked up by view direction
    Equirectangular,
}

/// Rectangle in normalized device coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdcRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl NdcRect {
    pub const FULL: NdcRect = NdcRect {
        min: Vec2::new(-1.0, -1.0),
        max: Vec2::new(1.0, 1.0),
    };

    /// Screen-space bounds of a unit quad (local XY in [-0.5, 0.5]) placed by `transform`.
    /// `None` when any corner is behind the camera.
    pub fn of_quad(camera: &Camera, transform: &TargetTransform) -> Option<Self> {
        let mvp = camera.view_projection() * transform.local_to_world();
        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(f32::MIN);
        for corner in [
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
            Vec3::new(-0.5, 0.5, 0.0),
            Vec3::new(0.5, 0.5, 0.0),
        ] {
            let clip = mvp * corner.extend(1.0);
            if clip.w <= 0.0 {
                return None;
            }
            let ndc = clip.truncate().truncate() / clip.w;
            min = min.min(ndc);
            max = max.max(ndc);
        }
        Some(Self { min, max })
    }

    fn to_vec4(self) -> Vec4 {
        Vec4::new(self.min.x, self.min.y, self.max.x, self.max.y)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitUniform {
    inv_view_proj: [[f32; 4]; 4],
    rect: [f32; 4],
    uv_transform: [f32; 4],
    alpha: f32,
    mode: u32,
    _pad: [u32; 2],
}

/// Parameters of one blit
#[derive(Debug, Clone, Copy)]
pub struct BlitParams {
    pub mode: BlitMode,
    pub rect: NdcRect,
    /// Horizontal slice of the source to show: `(index, count)`
    pub column: (u32, u32),
    pub alpha: f32,
    pub inv_view_proj: Mat4,
}

impl Default for BlitParams {
    fn default() -> Self {
        Self {
            mode: BlitMode::Flat,
            rect: NdcRect::FULL,
            column: (0, 1),
            alpha: 1.0,
            inv_view_proj: Mat4::IDENTITY,
        }
    }
}

/// Draws a presenter's color buffer onto the output target
pub struct Blitter {
    gpu: Arc<GpuContext>,
    pipeline: RenderPipeline,
    layout: BindGroupLayout,
    sampler: Sampler,
    uniform: Buffer,
    bind_group: Option<BindGroup>,
}

impl Blitter {
    pub fn new(gpu: Arc<GpuContext>, output_format: wgpu::TextureFormat) -> Self {
        let device = gpu.device();
        let layout = Self::create_layout(device);
        let pipeline = Self::create_pipeline(device, &layout, output_format);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Blit Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Blit Uniform"),
            size: std::mem::size_of::<BlitUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            gpu,
            pipeline,
            layout,
            sampler,
            uniform,
            bind_group: None,
        }
    }

    /// Point the blitter at a new source image
    pub fn set_source(&mut self, source: &TextureView) {
        self.bind_group = Some(self.gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        }));
    }

    pub fn clear_source(&mut self) {
        self.bind_group = None;
    }

    pub fn has_source(&self) -> bool {
        self.bind_group.is_some()
    }

    /// Record the blit into the frame's encoder; does nothing without a source
    pub fn draw(&self, frame: &mut FrameEncoder<'_>, params: BlitParams) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };

        let (index, count) = (params.column.0, params.column.1.max(1));
        let uniform = BlitUniform {
            inv_view_proj: params.inv_view_proj.to_cols_array_2d(),
            rect: params.rect.to_vec4().to_array(),
            uv_transform: [1.0 / count as f32, 1.0, index as f32 / count as f32, 0.0],
            alpha: params.alpha.clamp(0.0, 1.0),
            mode: match params.mode {
                BlitMode::Flat => 0,
                BlitMode::Equirectangular => 1,
            },
            _pad: [0; 2],
        };
        self.gpu
            .queue()
            .write_buffer(&self.uniform, 0, bytemuck::bytes_of(&uniform));

        let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blit Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: frame.target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..6, 0..1);
    }

    fn create_layout(device: &Device) -> BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        })
    }

    fn create_pipeline(
        device: &Device,
        layout: &BindGroupLayout,
        output_format: wgpu::TextureFormat,
    ) -> RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blit Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}
