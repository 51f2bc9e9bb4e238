//! GPU depth ordering for point clouds.
//!
//! Five compute stages recorded every frame from pipelines and bind groups built once on
//! activation:
//!
//! 1. dispatch size: `vertex_count / vertices_per_point` -> point count + workgroup count
//! 2. range: atomic min/max of camera depth
//! 3. histogram: bucket per point, `R + 1` counters
//! 4. accumulate: reverse exclusive scan (farthest bucket first)
//! 5. scatter: source UV of every point into its slot of the order map
//!
//! The point count never reaches the CPU; stages 2, 3 and 5 are launched indirectly.

pub mod reference;

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::core::gpu_context::GpuContext;
use crate::error::{PlayerError, Result};

pub const WORKGROUP_SIZE: u32 = 256;
pub const MAX_WORKGROUPS: u32 = 65535;
pub const DEFAULT_SORT_RANGE: u32 = 256;

const ORDER_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const MODEL_INFO_SIZE: u64 = 3 * 4;

/// Layout of a non-indexed indirect draw
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    pub fn new(vertex_count: u32, instance_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Uniform shared by all five stages
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SortParams {
    cam_pos: [f32; 4],
    cam_dir: [f32; 4],
    width: u32,
    height: u32,
    range: u32,
    verts_per_point: u32,
    inv_width: f32,
    inv_height: f32,
    _pad: [u32; 2],
}

/// `{count, min depth, max depth}` as produced by the range stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInfo {
    pub count: u32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl ModelInfo {
    /// Decode the raw `[count, min key, max key]` words. Depths are zero for an empty cloud.
    pub fn from_raw(raw: [u32; 3]) -> Self {
        if raw[0] == 0 {
            return Self {
                count: 0,
                min_depth: 0.0,
                max_depth: 0.0,
            };
        }
        Self {
            count: raw[0],
            min_depth: reference::decode_depth(raw[1]),
            max_depth: reference::decode_depth(raw[2]),
        }
    }
}

/// Camera expressed in the point cloud's local space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortCamera {
    pub position: Vec3,
    pub direction: Vec3,
}

impl SortCamera {
    pub fn new(position: Vec3, direction: Vec3) -> Self {
        Self {
            position,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Bring a world-space camera into the space of a model placed by `model`
    pub fn in_model_space(model: Mat4, position: Vec3, forward: Vec3) -> Self {
        let to_local = model.inverse();
        Self::new(
            to_local.transform_point3(position),
            to_local.transform_vector3(forward),
        )
    }
}

/// Per-frame buffers, sized by the range parameter and the position texture
struct SortWorkspace {
    model_info: wgpu::Buffer,
    histogram: wgpu::Buffer,
    key_count: wgpu::Buffer,
    keys: wgpu::Buffer,
    order_map: wgpu::Texture,
    order_map_view: wgpu::TextureView,
}

impl SortWorkspace {
    fn new(device: &wgpu::Device, range: u32, width: u32, height: u32) -> Self {
        let (histogram, key_count) = Self::create_bucket_buffers(device, range);
        let (keys, order_map) = Self::create_point_resources(device, width, height);
        let order_map_view = order_map.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            model_info: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Sort Model Info"),
                size: MODEL_INFO_SIZE,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            histogram,
            key_count,
            keys,
            order_map,
            order_map_view,
        }
    }

    fn create_bucket_buffers(device: &wgpu::Device, range: u32) -> (wgpu::Buffer, wgpu::Buffer) {
        let size = (range as u64 + 1) * 4;
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;
        let histogram = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sort Histogram"),
            size,
            usage,
            mapped_at_creation: false,
        });
        let key_count = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sort Key Count"),
            size,
            usage,
            mapped_at_creation: false,
        });
        (histogram, key_count)
    }

    fn create_point_resources(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Buffer, wgpu::Texture) {
        let keys = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sort Keys"),
            size: (width as u64 * height as u64).max(1) * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let order_map = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Sort Order Map"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ORDER_MAP_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        (keys, order_map)
    }
}

struct SortPipelines {
    dispatch_size: wgpu::ComputePipeline,
    range: wgpu::ComputePipeline,
    histogram: wgpu::ComputePipeline,
    accumulate: wgpu::ComputePipeline,
    scatter: wgpu::ComputePipeline,
}

/// GPU counting sort over the point-cloud position texture
pub struct PointCloudSorter {
    gpu: Arc<GpuContext>,
    range: u32,
    width: u32,
    height: u32,
    vertices_per_point: u32,
    params: wgpu::Buffer,
    dispatch: wgpu::Buffer,
    indirect_args: wgpu::Buffer,
    positions: wgpu::TextureView,
    workspace: SortWorkspace,
    shared_layout: wgpu::BindGroupLayout,
    indirect_layout: wgpu::BindGroupLayout,
    shared_group: wgpu::BindGroup,
    indirect_group: wgpu::BindGroup,
    pipelines: SortPipelines,
}

impl PointCloudSorter {
    /// Build pipelines, workspace and bind groups for a `width` x `height` position texture
    pub fn new(
        gpu: Arc<GpuContext>,
        positions: wgpu::TextureView,
        width: u32,
        height: u32,
        indirect_args: wgpu::Buffer,
        range: u32,
        vertices_per_point: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PlayerError::ZeroContentSize);
        }
        let range = range.max(1);
        let device = gpu.device();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Counting Sort Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("counting_sort.wgsl").into()),
        });

        let shared_layout = Self::create_shared_layout(device);
        let indirect_layout = Self::create_indirect_layout(device);
        let pipelines = Self::create_pipelines(device, &shader, &shared_layout, &indirect_layout);

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sort Params"),
            size: std::mem::size_of::<SortParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let dispatch = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sort Dispatch Size"),
            size: 3 * 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let workspace = SortWorkspace::new(device, range, width, height);
        let shared_group =
            Self::create_shared_group(device, &shared_layout, &params, &workspace, &positions);
        let indirect_group =
            Self::create_indirect_group(device, &indirect_layout, &indirect_args, &dispatch);

        log::info!(
            "Point sorter ready: {}x{} positions, range {}, {} vertices per point",
            width,
            height,
            range,
            vertices_per_point
        );

        Ok(Self {
            gpu,
            range,
            width,
            height,
            vertices_per_point: vertices_per_point.max(1),
            params,
            dispatch,
            indirect_args,
            positions,
            workspace,
            shared_layout,
            indirect_layout,
            shared_group,
            indirect_group,
            pipelines,
        })
    }

    pub fn range(&self) -> u32 {
        self.range
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn vertices_per_point(&self) -> u32 {
        self.vertices_per_point
    }

    pub fn set_vertices_per_point(&mut self, count: u32) {
        self.vertices_per_point = count.max(1);
    }

    pub fn indirect_args(&self) -> &wgpu::Buffer {
        &self.indirect_args
    }

    /// Sorted source UV per draw index
    pub fn order_map(&self) -> &wgpu::Texture {
        &self.workspace.order_map
    }

    pub fn order_map_view(&self) -> &wgpu::TextureView {
        &self.workspace.order_map_view
    }

    /// Change the number of depth buckets; reallocates the histogram and offsets
    pub fn set_range(&mut self, range: u32) {
        let range = range.max(1);
        if range == self.range {
            return;
        }
        let (histogram, key_count) =
            SortWorkspace::create_bucket_buffers(self.gpu.device(), range);
        self.workspace.histogram = histogram;
        self.workspace.key_count = key_count;
        self.range = range;
        self.rebuild_shared_group();
        log::info!("Sort range set to {}", range);
    }

    /// Rebind to a new position texture, reallocating keys and order map when its size changed
    pub fn reinit(&mut self, positions: wgpu::TextureView, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PlayerError::ZeroContentSize);
        }
        if (width, height) != (self.width, self.height) {
            let (keys, order_map) =
                SortWorkspace::create_point_resources(self.gpu.device(), width, height);
            self.workspace.order_map_view =
                order_map.create_view(&wgpu::TextureViewDescriptor::default());
            self.workspace.keys = keys;
            self.workspace.order_map = order_map;
            self.width = width;
            self.height = height;
        }
        self.positions = positions;
        self.rebuild_shared_group();
        log::info!("Point sorter reinitialised at {}x{}", width, height);
        Ok(())
    }

    /// Rebind to a different indirect argument buffer
    pub fn set_indirect_args(&mut self, indirect_args: wgpu::Buffer) {
        self.indirect_group = Self::create_indirect_group(
            self.gpu.device(),
            &self.indirect_layout,
            &indirect_args,
            &self.dispatch,
        );
        self.indirect_args = indirect_args;
    }

    /// Record the five stages. Uniforms and the model info seed are uploaded through the queue,
    /// so they land before the commands of the next submission.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, camera: SortCamera) {
        let queue = self.gpu.queue();
        let params = SortParams {
            cam_pos: camera.position.extend(1.0).to_array(),
            cam_dir: camera.direction.extend(0.0).to_array(),
            width: self.width,
            height: self.height,
            range: self.range,
            verts_per_point: self.vertices_per_point,
            inv_width: 1.0 / self.width as f32,
            inv_height: 1.0 / self.height as f32,
            _pad: [0; 2],
        };
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(
            &self.workspace.model_info,
            0,
            bytemuck::cast_slice(&[0u32, u32::MAX, 0u32]),
        );

        encoder.clear_buffer(&self.workspace.histogram, 0, None);
        encoder.clear_buffer(&self.workspace.key_count, 0, None);
        self.clear_order_map(encoder);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Sort Dispatch Size Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.dispatch_size);
            pass.set_bind_group(0, &self.shared_group, &[]);
            pass.set_bind_group(1, &self.indirect_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Sort Pass"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &self.shared_group, &[]);

        pass.set_pipeline(&self.pipelines.range);
        pass.dispatch_workgroups_indirect(&self.dispatch, 0);

        pass.set_pipeline(&self.pipelines.histogram);
        pass.dispatch_workgroups_indirect(&self.dispatch, 0);

        pass.set_pipeline(&self.pipelines.accumulate);
        pass.dispatch_workgroups(1, 1, 1);

        pass.set_pipeline(&self.pipelines.scatter);
        pass.dispatch_workgroups_indirect(&self.dispatch, 0);
    }

    /// Zero every slot so slots past this frame's count never hold a stale point
    fn clear_order_map(&self, encoder: &mut wgpu::CommandEncoder) {
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Sort Order Map Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.workspace.order_map_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    /// Blocking readback of `{count, min, max}` for debugging and tests
    pub fn read_model_info(&self) -> Result<ModelInfo> {
        let bytes = self
            .gpu
            .copy_and_read_buffer(&self.workspace.model_info, MODEL_INFO_SIZE)?;
        let words: &[u32] = bytemuck::cast_slice(&bytes);
        Ok(ModelInfo::from_raw([words[0], words[1], words[2]]))
    }

    /// Blocking readback of the per-point bucket keys
    pub fn read_keys(&self) -> Result<Vec<u32>> {
        let size = self.width as u64 * self.height as u64 * 4;
        let bytes = self.gpu.copy_and_read_buffer(&self.workspace.keys, size)?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }

    /// Blocking readback of the histogram (`range + 1` counters)
    pub fn read_histogram(&self) -> Result<Vec<u32>> {
        let size = (self.range as u64 + 1) * 4;
        let bytes = self.gpu.copy_and_read_buffer(&self.workspace.histogram, size)?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }

    /// Blocking readback of the first `count` order-map slots, decoded to point indices
    pub fn read_order(&self, count: u32) -> Result<Vec<u32>> {
        let bytes = self.gpu.read_texture_sync(
            &self.workspace.order_map,
            self.width,
            self.height,
            16,
        )?;
        let texels: &[[f32; 4]] = bytemuck::cast_slice(&bytes);
        Ok(texels
            .iter()
            .take(count as usize)
            .map(|t| {
                let x = (t[0] * self.width as f32).floor() as u32;
                let y = (t[1] * self.height as f32).floor() as u32;
                y * self.width + x
            })
            .collect())
    }

    /// Blocking readback of every order-map slot as `(u, v, 0, 1)`, or zeros when unwritten
    pub fn read_order_slots(&self) -> Result<Vec<[f32; 4]>> {
        let bytes = self.gpu.read_texture_sync(
            &self.workspace.order_map,
            self.width,
            self.height,
            16,
        )?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }

    fn rebuild_shared_group(&mut self) {
        self.shared_group = Self::create_shared_group(
            self.gpu.device(),
            &self.shared_layout,
            &self.params,
            &self.workspace,
            &self.positions,
        );
    }

    fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    fn create_shared_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sort Shared Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                Self::storage_entry(1, false),
                Self::storage_entry(2, false),
                Self::storage_entry(3, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                Self::storage_entry(5, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: ORDER_MAP_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        })
    }

    fn create_indirect_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sort Indirect Layout"),
            entries: &[Self::storage_entry(0, true), Self::storage_entry(1, false)],
        })
    }

    fn create_shared_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params: &wgpu::Buffer,
        workspace: &SortWorkspace,
        positions: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sort Shared Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: workspace.model_info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: workspace.histogram.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: workspace.key_count.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(positions),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: workspace.keys.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(&workspace.order_map_view),
                },
            ],
        })
    }

    fn create_indirect_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        indirect_args: &wgpu::Buffer,
        dispatch: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sort Indirect Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: indirect_args.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dispatch.as_entire_binding(),
                },
            ],
        })
    }

    fn create_pipelines(
        device: &wgpu::Device,
        shader: &wgpu::ShaderModule,
        shared_layout: &wgpu::BindGroupLayout,
        indirect_layout: &wgpu::BindGroupLayout,
    ) -> SortPipelines {
        let dispatch_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sort Dispatch Size Layout"),
            bind_group_layouts: &[shared_layout, indirect_layout],
            push_constant_ranges: &[],
        });
        let stage_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sort Stage Layout"),
            bind_group_layouts: &[shared_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, layout: &wgpu::PipelineLayout, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                module: shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        SortPipelines {
            dispatch_size: pipeline(
                "Sort Dispatch Size Pipeline",
                &dispatch_layout,
                "compute_dispatch_size",
            ),
            range: pipeline("Sort Range Pipeline", &stage_layout, "compute_range"),
            histogram: pipeline("Sort Histogram Pipeline", &stage_layout, "compute_histogram"),
            accumulate: pipeline("Sort Accumulate Pipeline", &stage_layout, "accumulate"),
            scatter: pipeline("Sort Scatter Pipeline", &stage_layout, "scatter"),
        }
    }
}
