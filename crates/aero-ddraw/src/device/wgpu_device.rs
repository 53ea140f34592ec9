//! [`GpuDevice`] on top of wgpu.
//!
//! Locks are emulated with CPU staging buffers: a read lock copies the subresource into a
//! mappable buffer and waits for it, a write lock hands out zeroed staging memory that is
//! written back with `Queue::write_texture` on unlock. Uncompressed staging rows use wgpu's
//! 256-byte copy alignment, so the pitch a lock reports rarely matches the legacy pitch.
//!
//! The swap chain is headless: back buffers are ordinary render-attachment textures.

use futures_intrusive::channel::shared::oneshot_channel;
use hashbrown::HashMap;
use tracing::debug;

use super::{
    level_extent, GpuDevice, LockAccess, LockedRect, Placement, ResourceDesc, ResourceId,
    ResourceType, ResourceUsage, Subresource,
};
use crate::error::DeviceError;
use crate::format::D3DFormat;

/// Headless swap chain description.
#[derive(Debug, Clone, Copy)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: D3DFormat,
    pub buffer_count: u32,
}

impl Default for SwapChainDesc {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: D3DFormat::X8R8G8B8,
            buffer_count: 1,
        }
    }
}

#[derive(Debug)]
struct WgpuResource {
    desc: ResourceDesc,
    texture: wgpu::Texture,
}

#[derive(Debug)]
struct Staging {
    access: LockAccess,
    pitch: u32,
    rows: u32,
    bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bc_supported: bool,
    next_id: u64,
    resources: HashMap<ResourceId, WgpuResource>,
    back_buffers: Vec<ResourceId>,
    locks: HashMap<(ResourceId, Subresource), Staging>,
}

impl WgpuDevice {
    /// Creates a device on the first available adapter (falling back to a software adapter)
    /// together with a headless swap chain.
    pub async fn new_headless(swap_chain: SwapChainDesc) -> Result<Self, DeviceError> {
        ensure_xdg_runtime_dir();

        // Prefer GL on Linux CI to avoid crashes in some Vulkan software adapters.
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: if cfg!(target_os = "linux") {
                wgpu::Backends::GL
            } else {
                wgpu::Backends::all()
            },
            ..Default::default()
        });
        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Some(adapter) => adapter,
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .ok_or(DeviceError::AdapterNotFound)?,
        };

        let backend_is_gl = adapter.get_info().backend == wgpu::Backend::Gl;
        let bc_supported = !backend_is_gl
            && adapter
                .features()
                .contains(wgpu::Features::TEXTURE_COMPRESSION_BC);
        let required_features = if bc_supported {
            wgpu::Features::TEXTURE_COMPRESSION_BC
        } else {
            wgpu::Features::empty()
        };
        let required_limits = if cfg!(target_os = "linux") {
            wgpu::Limits::downlevel_defaults()
        } else {
            wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("aero-ddraw-device"),
                    required_features,
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        debug!(backend_is_gl, bc_supported, "aero-ddraw created wgpu device");

        let mut this = Self {
            device,
            queue,
            bc_supported,
            next_id: 1,
            resources: HashMap::new(),
            back_buffers: Vec::new(),
            locks: HashMap::new(),
        };
        for _ in 0..swap_chain.buffer_count {
            let id = this.create(ResourceDesc {
                ty: ResourceType::BackBuffer,
                width: swap_chain.width,
                height: swap_chain.height,
                levels: 1,
                format: swap_chain.format,
                placement: Placement::Local,
                usage: ResourceUsage::RENDER_TARGET,
                lockable: true,
            })?;
            this.back_buffers.push(id);
        }
        Ok(this)
    }

    pub fn texture(&self, resource: ResourceId) -> Option<&wgpu::Texture> {
        self.resources.get(&resource).map(|res| &res.texture)
    }

    fn map_format(&self, format: D3DFormat) -> Result<wgpu::TextureFormat, DeviceError> {
        use wgpu::TextureFormat as T;
        Ok(match format {
            D3DFormat::A8R8G8B8 | D3DFormat::X8R8G8B8 => T::Bgra8Unorm,
            D3DFormat::A8B8G8R8 | D3DFormat::X8B8G8R8 => T::Rgba8Unorm,
            D3DFormat::L8 | D3DFormat::A8 | D3DFormat::P8 => T::R8Unorm,
            D3DFormat::A8L8 => T::Rg8Unorm,
            D3DFormat::V8U8 => T::Rg8Snorm,
            D3DFormat::Dxt1 if self.bc_supported => T::Bc1RgbaUnorm,
            D3DFormat::Dxt2 | D3DFormat::Dxt3 if self.bc_supported => T::Bc2RgbaUnorm,
            D3DFormat::Dxt4 | D3DFormat::Dxt5 if self.bc_supported => T::Bc3RgbaUnorm,
            D3DFormat::D16 | D3DFormat::D16Lockable => T::Depth16Unorm,
            D3DFormat::D24S8 | D3DFormat::D15S1 | D3DFormat::D24X4S4 => T::Depth24PlusStencil8,
            D3DFormat::D24X8 => T::Depth24Plus,
            D3DFormat::D32 => T::Depth32Float,
            other => return Err(DeviceError::UnsupportedFormat(other)),
        })
    }

    fn create(&mut self, desc: ResourceDesc) -> Result<ResourceId, DeviceError> {
        if desc.width == 0 || desc.height == 0 || desc.levels == 0 {
            return Err(DeviceError::InvalidCall(format!(
                "zero-sized resource {}x{} with {} levels",
                desc.width, desc.height, desc.levels
            )));
        }
        let format = self.map_format(desc.format)?;
        let (width, height) = physical_extent(desc.format, desc.width, desc.height);
        let layers = if desc.ty == ResourceType::CubeTexture { 6 } else { 1 };

        let mut usage = wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::TEXTURE_BINDING;
        if desc
            .usage
            .intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_STENCIL)
        {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        // Snorm, block-compressed and depth formats each drop some of these.
        usage &= format
            .guaranteed_format_features(self.device.features())
            .allowed_usages;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("aero-ddraw-surface"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: layers,
            },
            mip_level_count: desc.levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if oom.is_some() {
            return Err(DeviceError::OutOfVideoMemory);
        }
        if let Some(err) = validation {
            return Err(DeviceError::InvalidCall(err.to_string()));
        }

        let id = ResourceId(self.next_id);
        self.next_id += 1;
        debug!(%id, ty = ?desc.ty, width, height, ?format, levels = desc.levels, "created texture");
        self.resources.insert(id, WgpuResource { desc, texture });
        Ok(id)
    }

    fn check_subresource(res: &WgpuResource, sub: Subresource) -> Result<(), DeviceError> {
        let cube = res.desc.ty == ResourceType::CubeTexture;
        if sub.level >= res.desc.levels || cube != sub.face.is_some() {
            return Err(DeviceError::InvalidCall(format!(
                "no subresource {sub:?} in {:?} with {} levels",
                res.desc.ty, res.desc.levels
            )));
        }
        Ok(())
    }

    fn read_back(&self, res: &WgpuResource, sub: Subresource) -> Result<Staging, DeviceError> {
        let format = res.desc.format;
        let (width, height) = level_copy_extent(&res.desc, sub.level);
        let row_bytes = format.row_bytes(width);
        let rows = format.row_count(height);
        let padded = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aero-ddraw-lock-readback"),
            size: padded as u64 * rows as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("aero-ddraw-lock-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            image_copy(&res.texture, sub),
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rows),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit([encoder.finish()]);

        let slice = readback.slice(..);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result.map_err(|e| e.to_string()));
        });

        #[cfg(not(target_arch = "wasm32"))]
        self.device.poll(wgpu::Maintain::Wait);

        #[cfg(target_arch = "wasm32")]
        self.device.poll(wgpu::Maintain::Poll);

        pollster::block_on(receiver.receive())
            .ok_or_else(|| DeviceError::Backend("map_async callback dropped".into()))?
            .map_err(DeviceError::Backend)?;

        let data = slice.get_mapped_range();
        // Block-compressed locks are contiguous; drop the copy padding.
        let staging = if format.is_block_compressed() {
            let mut bytes = vec![0u8; row_bytes as usize * rows as usize];
            for (row, chunk) in bytes.chunks_exact_mut(row_bytes as usize).enumerate() {
                let src = row * padded as usize;
                chunk.copy_from_slice(&data[src..src + row_bytes as usize]);
            }
            Staging {
                access: LockAccess::Read,
                pitch: row_bytes,
                rows,
                bytes,
            }
        } else {
            Staging {
                access: LockAccess::Read,
                pitch: padded,
                rows,
                bytes: data.to_vec(),
            }
        };
        drop(data);
        readback.unmap();
        Ok(staging)
    }

    fn write_back(&self, res: &WgpuResource, sub: Subresource, staging: &Staging) {
        let (width, height) = level_copy_extent(&res.desc, sub.level);
        self.queue.write_texture(
            image_copy(&res.texture, sub),
            &staging.bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(staging.pitch),
                rows_per_image: Some(staging.rows),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl GpuDevice for WgpuDevice {
    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: D3DFormat,
        lockable: bool,
    ) -> Result<ResourceId, DeviceError> {
        self.create(ResourceDesc {
            ty: ResourceType::RenderTarget,
            width,
            height,
            levels: 1,
            format,
            placement: Placement::Local,
            usage: ResourceUsage::RENDER_TARGET,
            lockable,
        })
    }

    fn create_depth_stencil(
        &mut self,
        width: u32,
        height: u32,
        format: D3DFormat,
    ) -> Result<ResourceId, DeviceError> {
        if !format.is_depth() {
            return Err(DeviceError::UnsupportedFormat(format));
        }
        self.create(ResourceDesc {
            ty: ResourceType::DepthStencil,
            width,
            height,
            levels: 1,
            format,
            placement: Placement::Local,
            usage: ResourceUsage::DEPTH_STENCIL,
            lockable: false,
        })
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        levels: u32,
        usage: ResourceUsage,
        format: D3DFormat,
        placement: Placement,
    ) -> Result<ResourceId, DeviceError> {
        self.create(ResourceDesc {
            ty: ResourceType::Texture,
            width,
            height,
            levels,
            format,
            placement,
            usage,
            lockable: true,
        })
    }

    fn create_cube_texture(
        &mut self,
        edge: u32,
        levels: u32,
        usage: ResourceUsage,
        format: D3DFormat,
        placement: Placement,
    ) -> Result<ResourceId, DeviceError> {
        self.create(ResourceDesc {
            ty: ResourceType::CubeTexture,
            width: edge,
            height: edge,
            levels,
            format,
            placement,
            usage,
            lockable: true,
        })
    }

    fn create_offscreen_plain(
        &mut self,
        width: u32,
        height: u32,
        format: D3DFormat,
        placement: Placement,
    ) -> Result<ResourceId, DeviceError> {
        self.create(ResourceDesc {
            ty: ResourceType::OffscreenPlain,
            width,
            height,
            levels: 1,
            format,
            placement,
            usage: ResourceUsage::empty(),
            lockable: true,
        })
    }

    fn release(&mut self, resource: ResourceId) {
        if self.back_buffers.contains(&resource) {
            return;
        }
        if let Some(res) = self.resources.remove(&resource) {
            self.locks.retain(|(id, _), _| *id != resource);
            res.texture.destroy();
        }
    }

    fn resource_desc(&self, resource: ResourceId) -> Option<ResourceDesc> {
        self.resources.get(&resource).map(|res| res.desc)
    }

    fn lock(
        &mut self,
        resource: ResourceId,
        sub: Subresource,
        access: LockAccess,
    ) -> Result<LockedRect<'_>, DeviceError> {
        let res = self
            .resources
            .get(&resource)
            .ok_or(DeviceError::UnknownResource(resource.0))?;
        if !res.desc.lockable || res.desc.format.is_depth() {
            return Err(DeviceError::NotLockable);
        }
        Self::check_subresource(res, sub)?;
        if self.locks.contains_key(&(resource, sub)) {
            return Err(DeviceError::AlreadyLocked);
        }

        let staging = match access {
            LockAccess::Read => self.read_back(res, sub)?,
            LockAccess::Write => {
                let format = res.desc.format;
                let (width, height) = level_copy_extent(&res.desc, sub.level);
                let row_bytes = format.row_bytes(width);
                let pitch = if format.is_block_compressed() {
                    row_bytes
                } else {
                    align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
                };
                let rows = format.row_count(height);
                Staging {
                    access,
                    pitch,
                    rows,
                    bytes: vec![0u8; pitch as usize * rows as usize],
                }
            }
        };

        let staging = self.locks.entry((resource, sub)).or_insert(staging);
        Ok(LockedRect {
            pitch: staging.pitch,
            bytes: &mut staging.bytes,
        })
    }

    fn unlock(&mut self, resource: ResourceId, sub: Subresource) -> Result<(), DeviceError> {
        let staging = self.locks.remove(&(resource, sub)).ok_or_else(|| {
            DeviceError::InvalidCall(format!("{sub:?} of {resource} is not locked"))
        })?;
        let res = self
            .resources
            .get(&resource)
            .ok_or(DeviceError::UnknownResource(resource.0))?;
        if staging.access == LockAccess::Write {
            self.write_back(res, sub, &staging);
        }
        Ok(())
    }

    fn back_buffer_count(&self) -> u32 {
        self.back_buffers.len() as u32
    }

    fn back_buffer(&mut self, index: u32) -> Result<ResourceId, DeviceError> {
        self.back_buffers
            .get(index as usize)
            .copied()
            .ok_or(DeviceError::BackBufferOutOfRange {
                index,
                count: self.back_buffers.len() as u32,
            })
    }
}

fn image_copy(texture: &wgpu::Texture, sub: Subresource) -> wgpu::ImageCopyTexture<'_> {
    wgpu::ImageCopyTexture {
        texture,
        mip_level: sub.level,
        origin: wgpu::Origin3d {
            x: 0,
            y: 0,
            z: sub.face.map_or(0, |face| face.index()),
        },
        aspect: wgpu::TextureAspect::All,
    }
}

/// Texture extent as allocated: block-compressed textures are padded to whole blocks.
fn physical_extent(format: D3DFormat, width: u32, height: u32) -> (u32, u32) {
    if format.is_block_compressed() {
        (align_to(width, 4), align_to(height, 4))
    } else {
        (width, height)
    }
}

/// Copy extent of one mip level, in texels; whole blocks for block-compressed formats.
fn level_copy_extent(desc: &ResourceDesc, level: u32) -> (u32, u32) {
    let (width, height) = physical_extent(desc.format, desc.width, desc.height);
    let (w, h) = level_extent(width, height, level);
    physical_extent(desc.format, w, h)
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(all(unix, not(target_arch = "wasm32")))]
fn ensure_xdg_runtime_dir() {
    use std::os::unix::fs::PermissionsExt;

    let needs_runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .ok()
        .map(|v| v.is_empty())
        .unwrap_or(true);
    if needs_runtime_dir {
        let dir = std::env::temp_dir().join(format!(
            "aero-ddraw-xdg-runtime-{}",
            std::process::id()
        ));
        let _ = std::fs::create_dir_all(&dir);
        let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
        std::env::set_var("XDG_RUNTIME_DIR", &dir);
    }
}

#[cfg(not(all(unix, not(target_arch = "wasm32"))))]
fn ensure_xdg_runtime_dir() {}
