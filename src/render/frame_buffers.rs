use crate::core::gpu_context::GpuContext;
use crate::service::{FrameTarget, IndirectArgsTarget, TargetFormat, TargetHandle};
use crate::sort::DrawIndirectArgs;

/// GPU images written by the service and consumed by one presenter.
///
/// Without a GPU (headless sessions) the targets still carry handles and sizes so the
/// service can be configured, but hold no texture.
#[derive(Default)]
pub struct FrameBufferSet {
    color: Option<FrameTarget>,
    position: Option<FrameTarget>,
    shadow: Option<FrameTarget>,
    indirect: Option<IndirectArgsTarget>,
}

impl FrameBufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(&self) -> Option<&FrameTarget> {
        self.color.as_ref()
    }

    pub fn position(&self) -> Option<&FrameTarget> {
        self.position.as_ref()
    }

    pub fn shadow(&self) -> Option<&FrameTarget> {
        self.shadow.as_ref()
    }

    pub fn indirect(&self) -> Option<&IndirectArgsTarget> {
        self.indirect.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.color.is_some()
    }

    /// Color image of exactly `width` x `height`; returns true when (re)allocated
    pub fn ensure_color(
        &mut self,
        gpu: Option<&GpuContext>,
        width: u32,
        height: u32,
        format: TargetFormat,
    ) -> bool {
        ensure_exact(&mut self.color, gpu, width, height, format, "Color Frame Buffer")
    }

    /// Color and position images that only ever grow; returns true when reallocated
    pub fn grow_point_buffers(
        &mut self,
        gpu: Option<&GpuContext>,
        width: u32,
        height: u32,
    ) -> bool {
        let fits = |target: &Option<FrameTarget>| {
            target
                .as_ref()
                .is_some_and(|t| t.width >= width && t.height >= height)
        };
        if fits(&self.color) && fits(&self.position) {
            return false;
        }
        let format = TargetFormat::Rgba32Float;
        self.color = Some(create_target(gpu, width, height, format, "Point Color Buffer"));
        self.position = Some(create_target(gpu, width, height, format, "Point Position Buffer"));
        log::info!("Point buffers allocated at {}x{}", width, height);
        true
    }

    /// Fixed-size square shadow image
    pub fn ensure_shadow(&mut self, gpu: Option<&GpuContext>, resolution: u32) -> bool {
        ensure_exact(
            &mut self.shadow,
            gpu,
            resolution,
            resolution,
            TargetFormat::Rgba8,
            "Shadow Frame Buffer",
        )
    }

    /// Indirect draw arguments seeded with `{vertex_count: 0, instance_count: 1}`
    pub fn ensure_indirect(&mut self, gpu: Option<&GpuContext>) -> &IndirectArgsTarget {
        self.indirect.get_or_insert_with(|| {
            let buffer = gpu.map(|gpu| {
                let buffer = gpu.device().create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Point Indirect Args"),
                    size: std::mem::size_of::<DrawIndirectArgs>() as u64,
                    usage: wgpu::BufferUsages::INDIRECT
                        | wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });
                gpu.queue()
                    .write_buffer(&buffer, 0, bytemuck::bytes_of(&DrawIndirectArgs::new(0, 1)));
                buffer
            });
            IndirectArgsTarget {
                handle: TargetHandle::next(),
                buffer,
            }
        })
    }

    /// Drop every image; the next activation allocates from scratch
    pub fn release(&mut self) {
        if self.is_allocated() || self.shadow.is_some() || self.indirect.is_some() {
            log::debug!("Releasing frame buffers");
        }
        // GPU memory is freed once the service drops its clones too
        self.color = None;
        self.position = None;
        self.shadow = None;
        self.indirect = None;
    }
}

fn ensure_exact(
    slot: &mut Option<FrameTarget>,
    gpu: Option<&GpuContext>,
    width: u32,
    height: u32,
    format: TargetFormat,
    label: &str,
) -> bool {
    let matches = slot
        .as_ref()
        .is_some_and(|t| t.width == width && t.height == height && t.format == format);
    if matches {
        return false;
    }
    *slot = Some(create_target(gpu, width, height, format, label));
    true
}

fn create_target(
    gpu: Option<&GpuContext>,
    width: u32,
    height: u32,
    format: TargetFormat,
    label: &str,
) -> FrameTarget {
    let texture = gpu.map(|gpu| {
        gpu.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.wgpu_format(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    });
    FrameTarget {
        handle: TargetHandle::next(),
        width,
        height,
        format,
        texture,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_reallocates_on_size_change() {
        let mut buffers = FrameBufferSet::new();
        assert!(buffers.ensure_color(None, 1920, 1080, TargetFormat::Rgba8));
        let first = buffers.color().unwrap().handle;

        assert!(!buffers.ensure_color(None, 1920, 1080, TargetFormat::Rgba8));
        assert_eq!(buffers.color().unwrap().handle, first);

        assert!(buffers.ensure_color(None, 2048, 1024, TargetFormat::Rgba8));
        assert_ne!(buffers.color().unwrap().handle, first);
    }

    #[test]
    fn test_point_buffers_only_grow() {
        let mut buffers = FrameBufferSet::new();
        assert!(buffers.grow_point_buffers(None, 512, 256));
        assert!(!buffers.grow_point_buffers(None, 256, 128));
        assert!(buffers.grow_point_buffers(None, 1024, 256));
        assert_eq!(buffers.position().unwrap().width, 1024);
        assert_eq!(buffers.color().unwrap().format, TargetFormat::Rgba32Float);
    }

    #[test]
    fn test_release_clears_everything() {
        let mut buffers = FrameBufferSet::new();
        buffers.grow_point_buffers(None, 4, 4);
        buffers.ensure_shadow(None, 512);
        buffers.ensure_indirect(None);

        buffers.release();
        assert!(!buffers.is_allocated());
        assert!(buffers.position().is_none());
        assert!(buffers.shadow().is_none());
        assert!(buffers.indirect().is_none());
    }
}
