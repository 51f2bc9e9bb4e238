use std::sync::Arc;
use wgpu::{Adapter, Buffer, Device, DeviceDescriptor, Features, Instance, Limits, Queue, Surface};

use crate::error::{PlayerError, Result};

/// Row pitch required for texture <-> buffer copies
const COPY_ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Shared GPU context for the presenters, the sorter and the decoding service
///
/// Device and Queue are reference counted so every owner can hold a cheap clone.
#[derive(Clone)]
pub struct GpuContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl GpuContext {
    /// Create a context without a surface (headless playback, GPU tests)
    pub async fn new() -> Result<Self> {
        Self::with_backends(wgpu::Backends::PRIMARY, false).await
    }

    /// Software adapter on any backend, for machines without a hardware driver
    pub async fn new_fallback() -> Result<Self> {
        Self::with_backends(wgpu::Backends::all(), true).await
    }

    async fn with_backends(backends: wgpu::Backends, force_fallback: bool) -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = Self::request_adapter(&instance, None, force_fallback).await?;
        Self::from_adapter(&adapter).await
    }

    /// Create a context whose adapter can present to `surface`; the adapter is handed back
    /// for surface configuration
    pub async fn new_with_surface(
        instance: &Instance,
        surface: &Surface<'_>,
    ) -> Result<(Self, Adapter)> {
        let adapter = Self::request_adapter(instance, Some(surface), false).await?;
        let gpu = Self::from_adapter(&adapter).await?;
        Ok((gpu, adapter))
    }

    /// Blocking helper used by tests: hardware adapter, then a software one, `None` when
    /// neither exists
    pub fn headless() -> Option<Self> {
        let hardware = match pollster::block_on(Self::new()) {
            Ok(gpu) => return Some(gpu),
            Err(e) => e,
        };
        match pollster::block_on(Self::new_fallback()) {
            Ok(gpu) => {
                log::info!("No hardware adapter ({}), using the fallback adapter", hardware);
                Some(gpu)
            }
            Err(e) => {
                log::warn!("No GPU available: {}; fallback: {}", hardware, e);
                None
            }
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Map a MAP_READ buffer and copy its contents out.
    ///
    /// Blocks the calling thread until the GPU is idle; only meant for debug readback and tests.
    pub fn read_buffer_sync(&self, buffer: &Buffer) -> Result<Vec<u8>> {
        let buffer_slice = buffer.slice(..);

        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });

        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| PlayerError::Gpu(format!("Device poll failed: {:?}", e)))?;

        match receiver.recv() {
            Ok(Ok(())) => {
                let data = buffer_slice.get_mapped_range();
                let result = data.to_vec();
                drop(data);
                buffer.unmap();
                Ok(result)
            }
            Ok(Err(e)) => Err(PlayerError::Gpu(format!("Buffer mapping failed: {:?}", e))),
            Err(_) => Err(PlayerError::Gpu("Channel closed before receiving result".into())),
        }
    }

    /// Copy `size` bytes of a storage buffer into a staging buffer and read them back
    pub fn copy_and_read_buffer(&self, source: &Buffer, size: u64) -> Result<Vec<u8>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Buffer Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        self.read_buffer_sync(&staging)
    }

    /// Read back a 2D texture, returning tightly packed rows
    pub fn read_texture_sync(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Vec<u8>> {
        let unpadded = width * bytes_per_pixel;
        let padded = padded_bytes_per_row(unpadded);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback Buffer"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let raw = self.read_buffer_sync(&staging)?;
        Ok(raw
            .chunks(padded as usize)
            .flat_map(|row| row[..unpadded as usize].iter().copied())
            .collect())
    }

    async fn request_adapter(
        instance: &Instance,
        surface: Option<&Surface<'_>>,
        force_fallback_adapter: bool,
    ) -> Result<Adapter> {
        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: surface,
                force_fallback_adapter,
            })
            .await
            .map_err(|e| PlayerError::Gpu(format!("Failed to find appropriate adapter: {:?}", e)))
    }

    async fn from_adapter(adapter: &Adapter) -> Result<Self> {
        let (device, queue) = Self::request_device(adapter).await?;
        log::info!("Using adapter {}", adapter.get_info().name);
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    async fn request_device(adapter: &Adapter) -> Result<(Device, Queue)> {
        let supported_features = adapter.features();
        let mut requested_features = Features::empty();

        // Timestamp queries are only used for optional profiling
        if supported_features.contains(Features::TIMESTAMP_QUERY) {
            requested_features |= Features::TIMESTAMP_QUERY;
        }

        // Large point clouds need the adapter's full storage binding size
        let supported = adapter.limits();
        let wanted = Limits {
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..Default::default()
        };
        // Software and downlevel adapters fall short of the defaults
        let limits = if wanted.check_limits(&supported) {
            wanted
        } else {
            supported
        };

        adapter
            .request_device(&DeviceDescriptor {
                label: Some("Player Device"),
                required_features: requested_features,
                required_limits: limits,
                memory_hints: Default::default(),
                experimental_features: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| PlayerError::Gpu(format!("Failed to create device: {:?}", e)))
    }
}

/// Round a row size up to the copy alignment
pub fn padded_bytes_per_row(unpadded: u32) -> u32 {
    unpadded.div_ceil(COPY_ROW_ALIGNMENT) * COPY_ROW_ALIGNMENT
}
