//! Point-cloud presenter.
//!
//! Bound to the pre-cull stage: the service composites positions and colors into the
//! point buffers and writes the vertex count into the indirect argument buffer, then the
//! sort is recorded and the points are drawn indirectly, so the count never reaches the CPU.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec2, Vec3};
use wgpu::{BindGroup, BindGroupLayout, Buffer, Device, RenderPipeline, TextureView};

use crate::camera::{Camera, TargetTransform};
use crate::config::{PointCloudConfig, RenderMode};
use crate::core::gpu_context::GpuContext;
use crate::error::{PlayerError, Result};
use crate::service::{DecoderService, MediaKind, ProjectionKind};
use crate::session::RenderData;
use crate::sort::{PointCloudSorter, SortCamera};
use crate::view_job::{Extrinsics, Intrinsics, ViewJob, ViewJobSet};

use super::blit::{BlitParams, Blitter, NdcRect};
use super::frame_buffers::FrameBufferSet;
use super::presenter::Presenter;
use super::stage::RenderStage;
use super::{FrameEncoder, PresenterContext, RenderDevice};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SplatUniform {
    view_proj: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
    viewport: [f32; 2],
    point_size: f32,
    alpha_falloff: f32,
    width: u32,
    height: u32,
    verts_per_point: u32,
    sorted: u32,
}

/// Draws the point buffers with either pipeline, vertex count taken from the indirect buffer
struct SplatRenderer {
    gpu: Arc<GpuContext>,
    layout: BindGroupLayout,
    points_pipeline: RenderPipeline,
    splat_pipeline: RenderPipeline,
    uniform: Buffer,
    bind_group: Option<BindGroup>,
}

impl SplatRenderer {
    fn new(gpu: Arc<GpuContext>, output_format: wgpu::TextureFormat) -> Self {
        let device = gpu.device();
        let layout = Self::create_layout(device);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Point Splat Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/point_splat.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Point Splat Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let points_pipeline = Self::create_pipeline(
            device,
            &pipeline_layout,
            &shader,
            output_format,
            ("vs_points", "fs_points"),
            wgpu::PrimitiveTopology::PointList,
            wgpu::BlendState::REPLACE,
        );
        let splat_pipeline = Self::create_pipeline(
            device,
            &pipeline_layout,
            &shader,
            output_format,
            ("vs_splat", "fs_splat"),
            wgpu::PrimitiveTopology::TriangleList,
            wgpu::BlendState::ALPHA_BLENDING,
        );

        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Point Splat Uniform"),
            size: std::mem::size_of::<SplatUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            gpu,
            layout,
            points_pipeline,
            splat_pipeline,
            uniform,
            bind_group: None,
        }
    }

    fn bind(&mut self, positions: &TextureView, colors: &TextureView, order_map: &TextureView) {
        self.bind_group = Some(self.gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Point Splat Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(positions),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(colors),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(order_map),
                },
            ],
        }));
    }

    fn unbind(&mut self) {
        self.bind_group = None;
    }

    fn draw(
        &self,
        frame: &mut FrameEncoder<'_>,
        uniform: &SplatUniform,
        mode: RenderMode,
        indirect: &Buffer,
    ) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };
        self.gpu
            .queue()
            .write_buffer(&self.uniform, 0, bytemuck::bytes_of(uniform));

        let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Point Cloud Pass"),
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

        render_pass.set_pipeline(match mode {
            RenderMode::Points => &self.points_pipeline,
            RenderMode::SortedBlend => &self.splat_pipeline,
        });
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw_indirect(indirect, 0);
    }

    fn create_layout(device: &Device) -> BindGroupLayout {
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Point Splat Bind Group Layout"),
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
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
            ],
        })
    }

    fn create_pipeline(
        device: &Device,
        layout: &wgpu::PipelineLayout,
        shader: &wgpu::ShaderModule,
        output_format: wgpu::TextureFormat,
        (vs_entry, fs_entry): (&str, &str),
        topology: wgpu::PrimitiveTopology,
        blend: wgpu::BlendState,
    ) -> RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(vs_entry),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some(vs_entry),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some(fs_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

/// Full texture view
fn view_of(texture: &wgpu::Texture) -> TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

pub struct PointCloudPresenter {
    config: PointCloudConfig,
    device: Option<RenderDevice>,
    buffers: FrameBufferSet,
    jobs: ViewJobSet,
    sorter: Option<PointCloudSorter>,
    splats: Option<SplatRenderer>,
    shadow: Option<Blitter>,
    model: TargetTransform,
    active: bool,
    visible: bool,
}

impl PointCloudPresenter {
    pub fn new(config: PointCloudConfig, device: Option<&RenderDevice>) -> Self {
        Self {
            config,
            device: device.cloned(),
            buffers: FrameBufferSet::new(),
            jobs: ViewJobSet::new(),
            sorter: None,
            splats: device.map(|d| SplatRenderer::new(d.gpu.clone(), d.output_format)),
            shadow: device.map(|d| Blitter::new(d.gpu.clone(), d.output_format)),
            model: TargetTransform::default(),
            active: false,
            visible: false,
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        self.config.render_mode
    }

    /// Switch between plain points and sorted splats; the service picks up the new vertex
    /// count per point on the next frame
    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.config.render_mode = mode;
        if let Some(sorter) = &mut self.sorter {
            sorter.set_vertices_per_point(mode.vertices_per_point());
        }
        log::info!("Point render mode: {:?}", mode);
    }

    pub fn sort_range(&self) -> u32 {
        self.config.sort_range
    }

    /// Number of depth buckets; reallocates the sort histogram when changed
    pub fn set_sort_range(&mut self, range: u32) {
        self.config.sort_range = range.max(1);
        if let Some(sorter) = &mut self.sorter {
            sorter.set_range(self.config.sort_range);
        }
    }

    pub fn sorter(&self) -> Option<&PointCloudSorter> {
        self.sorter.as_ref()
    }

    pub fn buffers(&self) -> &FrameBufferSet {
        &self.buffers
    }

    pub fn jobs(&self) -> &ViewJobSet {
        &self.jobs
    }

    pub fn model(&self) -> &TargetTransform {
        &self.model
    }

    pub fn set_model(&mut self, model: TargetTransform) {
        self.model = model;
    }

    pub fn model_view_projection(&self, camera: &Camera) -> Mat4 {
        camera.view_projection() * self.model.local_to_world()
    }

    fn point_size(&self) -> f32 {
        match self.config.render_mode {
            RenderMode::Points => self.config.point_size,
            RenderMode::SortedBlend => self.config.sorted_point_size,
        }
    }

    /// Grow the point buffers to `width` x `height`; rebind them to the service when they
    /// were reallocated or `rebind` is set
    fn ensure_capacity(
        &mut self,
        service: &mut dyn DecoderService,
        width: u32,
        height: u32,
        rebind: bool,
    ) -> Result<()> {
        let gpu = self.device.as_ref().map(|d| d.gpu.as_ref());
        if !self.buffers.grow_point_buffers(gpu, width, height) && !rebind {
            return Ok(());
        }
        if let (Some(color), Some(position)) = (self.buffers.color(), self.buffers.position()) {
            service.bind_color_target(color);
            service.bind_position_target(position);
        }
        self.prepare_gpu()
    }

    /// Create the sorter on first use, otherwise point it at the current buffers, then rebind
    /// the splat renderer
    fn prepare_gpu(&mut self) -> Result<()> {
        let Some(device) = &self.device else {
            return Ok(());
        };
        let (Some(position), Some(color), Some(indirect)) =
            (self.buffers.position(), self.buffers.color(), self.buffers.indirect())
        else {
            return Ok(());
        };
        let (Some(position_texture), Some(color_texture), Some(indirect_buffer)) =
            (&position.texture, &color.texture, &indirect.buffer)
        else {
            return Ok(());
        };

        let vertices_per_point = self.config.render_mode.vertices_per_point();
        match &mut self.sorter {
            Some(sorter) => {
                sorter.reinit(view_of(position_texture), position.width, position.height)?;
                sorter.set_indirect_args(indirect_buffer.clone());
                sorter.set_vertices_per_point(vertices_per_point);
                sorter.set_range(self.config.sort_range);
            }
            None => {
                self.sorter = Some(PointCloudSorter::new(
                    device.gpu.clone(),
                    view_of(position_texture),
                    position.width,
                    position.height,
                    indirect_buffer.clone(),
                    self.config.sort_range,
                    vertices_per_point,
                )?);
            }
        }

        if let (Some(splats), Some(sorter)) = (&mut self.splats, &self.sorter) {
            splats.bind(
                &view_of(position_texture),
                &view_of(color_texture),
                sorter.order_map_view(),
            );
        }
        Ok(())
    }

    /// Per-frame synthesis settings and camera job
    fn push_settings(&mut self, service: &mut dyn DecoderService, camera: &Camera) {
        let config = &self.config;
        service.set_vertices_per_point(config.render_mode.vertices_per_point());
        service.set_decimation_level(config.decimation.level());
        service.set_max_bbox(config.max_bbox);
        service.set_dynamic_decimation(config.dynamic_decimation);
        service.set_decimation_ranges(
            config.decimation_r1 / config.max_bbox,
            config.decimation_r2 / config.max_bbox,
            config.viewport_cull_threshold,
        );
        service.set_model_view_projection(self.model_view_projection(camera));

        for job in self.jobs.jobs_mut() {
            job.intrinsics =
                Intrinsics::from_vertical_fov(camera.fov_y, job.resolution.0, job.resolution.1);
            job.extrinsics = Extrinsics::new(camera.position, camera.rotation);
        }
        self.jobs.update_poses(service);
    }

    /// Ground quad under the model where the service's shadow image is shown
    fn shadow_transform(&self) -> TargetTransform {
        let size = self.model.scale.x;
        TargetTransform {
            position: self.model.position - Vec3::Y * size,
            rotation: Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2),
            scale: Vec3::new(2.0 * size, 2.0 * size, 1.0),
        }
    }
}

impl Presenter for PointCloudPresenter {
    fn kind(&self) -> MediaKind {
        MediaKind::PointCloud
    }

    fn stage(&self) -> RenderStage {
        RenderStage::PreCull
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
        if data.media_kind != MediaKind::PointCloud {
            return Ok(false);
        }

        let (width, height) = ctx.service.content_dimensions();
        if width == 0 || height == 0 {
            log::warn!("Point cloud '{}' reports zero content size, waiting", data.media_name);
            return Err(PlayerError::ZeroContentSize);
        }

        let gpu = self.device.as_ref().map(|d| d.gpu.clone());
        let indirect = self.buffers.ensure_indirect(gpu.as_deref()).clone();
        ctx.service.bind_indirect_args(&indirect);

        if self.config.show_shadow {
            self.buffers.ensure_shadow(gpu.as_deref(), self.config.shadow_resolution);
            if let Some(shadow) = self.buffers.shadow() {
                ctx.service.bind_shadow_target(shadow);
                if let (Some(blitter), Some(texture)) = (&mut self.shadow, &shadow.texture) {
                    blitter.set_source(&view_of(texture));
                }
            }
        }

        self.ensure_capacity(ctx.service, width, height, true)?;

        let camera = &*ctx.camera;
        self.jobs = ViewJobSet::single(ViewJob::new(
            0,
            camera.pixel_width,
            camera.pixel_height,
            ProjectionKind::Perspective,
        ));
        self.jobs.configure(ctx.service);

        self.model = TargetTransform {
            position: camera.position + camera.forward() * self.config.model_distance,
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(self.config.model_scale),
        };
        let camera = *ctx.camera;
        self.push_settings(ctx.service, &camera);

        log::info!(
            "Point cloud presenter active: {}x{} buffers, {:?}, sort range {}",
            width,
            height,
            self.config.render_mode,
            self.config.sort_range
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
        let (width, height) = ctx.service.content_dimensions();
        if width > 0 && height > 0 {
            if let Err(e) = self.ensure_capacity(ctx.service, width, height, false) {
                log::warn!("Failed to grow point buffers: {}", e);
            }
        }
        let camera = *ctx.camera;
        self.push_settings(ctx.service, &camera);
    }

    fn after_composite(
        &mut self,
        ctx: &mut PresenterContext<'_>,
        frame: Option<&mut FrameEncoder<'_>>,
    ) {
        let Some(frame) = frame else {
            return;
        };
        if !self.visible {
            return;
        }
        let (Some(sorter), Some(splats)) = (&self.sorter, &self.splats) else {
            return;
        };
        let Some(indirect) = self.buffers.indirect().and_then(|i| i.buffer.as_ref()) else {
            return;
        };

        let camera = &*ctx.camera;
        let mode = self.config.render_mode;
        if mode.uses_sort() {
            let model = self.model.local_to_world();
            sorter.encode(
                frame.encoder,
                SortCamera::in_model_space(model, camera.position, camera.forward()),
            );
        }

        let (width, height) = sorter.dimensions();
        let uniform = SplatUniform {
            view_proj: camera.view_projection().to_cols_array_2d(),
            model: self.model.local_to_world().to_cols_array_2d(),
            viewport: Vec2::new(frame.size.0.max(1) as f32, frame.size.1.max(1) as f32).to_array(),
            point_size: self.point_size(),
            alpha_falloff: self.config.alpha_falloff,
            width,
            height,
            verts_per_point: mode.vertices_per_point(),
            sorted: mode.uses_sort() as u32,
        };
        splats.draw(frame, &uniform, mode, indirect);

        if self.config.show_shadow {
            if let (Some(blitter), Some(rect)) =
                (&self.shadow, NdcRect::of_quad(camera, &self.shadow_transform()))
            {
                blitter.draw(
                    frame,
                    BlitParams {
                        rect,
                        alpha: 0.6,
                        ..Default::default()
                    },
                );
            }
        }
    }

    fn teardown(&mut self, _ctx: &mut PresenterContext<'_>) {
        self.buffers.release();
        self.sorter = None;
        if let Some(splats) = &mut self.splats {
            splats.unbind();
        }
        if let Some(shadow) = &mut self.shadow {
            shadow.clear_source();
        }
        self.jobs = ViewJobSet::new();
        self.active = false;
        self.visible = false;
    }
}
