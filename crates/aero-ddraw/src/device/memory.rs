//! Deterministic in-memory [`GpuDevice`].
//!
//! Resources are plain byte buffers laid out with a configurable row-pitch alignment, which
//! makes CPU/GPU pitch mismatches reproducible without a GPU. Allocation and lock failures can
//! be injected, and the counters are shared so a test can keep observing them after handing the
//! device to a runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use super::{
    level_extent, GpuDevice, LockAccess, LockedRect, Placement, ResourceDesc, ResourceId,
    ResourceType, ResourceUsage, Subresource,
};
use crate::caps::CubeFace;
use crate::error::DeviceError;
use crate::format::D3DFormat;

#[derive(Debug, Clone, Copy)]
pub struct MemoryDeviceConfig {
    /// Row pitch alignment for uncompressed formats, in bytes.
    pub pitch_alignment: u32,
    pub back_buffer_count: u32,
    pub back_buffer_width: u32,
    pub back_buffer_height: u32,
    pub back_buffer_format: D3DFormat,
    /// Formats every allocation rejects with [`DeviceError::UnsupportedFormat`], the way a
    /// backend without native support for them would.
    pub unsupported_formats: &'static [D3DFormat],
}

impl Default for MemoryDeviceConfig {
    fn default() -> Self {
        Self {
            pitch_alignment: 4,
            back_buffer_count: 1,
            back_buffer_width: 640,
            back_buffer_height: 480,
            back_buffer_format: D3DFormat::X8R8G8B8,
            unsupported_formats: &[],
        }
    }
}

/// Counters for a [`MemoryDevice`].
#[derive(Debug, Default)]
pub struct MemoryDeviceCounters {
    allocations: AtomicU64,
    releases: AtomicU64,
    locks: AtomicU64,
    unlocks: AtomicU64,
}

impl MemoryDeviceCounters {
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    pub fn locks(&self) -> u64 {
        self.locks.load(Ordering::Relaxed)
    }

    pub fn unlocks(&self) -> u64 {
        self.unlocks.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Plane {
    pitch: u32,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct MemoryResource {
    desc: ResourceDesc,
    planes: HashMap<Subresource, Plane>,
    locked: HashSet<Subresource>,
}

#[derive(Debug)]
pub struct MemoryDevice {
    config: MemoryDeviceConfig,
    next_id: u64,
    resources: HashMap<ResourceId, MemoryResource>,
    back_buffers: Vec<ResourceId>,
    counters: Arc<MemoryDeviceCounters>,
    fail_allocations: u32,
    fail_locks: u32,
}

impl MemoryDevice {
    pub fn new(config: MemoryDeviceConfig) -> Self {
        let mut device = Self {
            config,
            next_id: 1,
            resources: HashMap::new(),
            back_buffers: Vec::new(),
            counters: Arc::new(MemoryDeviceCounters::default()),
            fail_allocations: 0,
            fail_locks: 0,
        };
        for _ in 0..config.back_buffer_count {
            let id = device.insert(ResourceDesc {
                ty: ResourceType::BackBuffer,
                width: config.back_buffer_width,
                height: config.back_buffer_height,
                levels: 1,
                format: config.back_buffer_format,
                placement: Placement::Local,
                usage: ResourceUsage::RENDER_TARGET,
                lockable: true,
            });
            device.back_buffers.push(id);
        }
        device
    }

    pub fn counters(&self) -> Arc<MemoryDeviceCounters> {
        Arc::clone(&self.counters)
    }

    /// Makes the next `count` allocations fail with [`DeviceError::OutOfVideoMemory`].
    pub fn fail_next_allocations(&mut self, count: u32) {
        self.fail_allocations = count;
    }

    /// Makes the next `count` lock calls fail.
    pub fn fail_next_locks(&mut self, count: u32) {
        self.fail_locks = count;
    }

    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    /// Raw bytes and pitch of a subresource, bypassing lock bookkeeping.
    pub fn subresource_bytes(
        &self,
        resource: ResourceId,
        sub: Subresource,
    ) -> Option<(u32, &[u8])> {
        let plane = self.resources.get(&resource)?.planes.get(&sub)?;
        Some((plane.pitch, &plane.bytes))
    }

    fn pitch_for(&self, format: D3DFormat, width: u32) -> u32 {
        let row = format.row_bytes(width);
        if format.is_block_compressed() {
            return row;
        }
        let align = self.config.pitch_alignment.max(1);
        row.div_ceil(align) * align
    }

    fn insert(&mut self, desc: ResourceDesc) -> ResourceId {
        let faces: Vec<Option<CubeFace>> = if desc.ty == ResourceType::CubeTexture {
            CubeFace::ALL.into_iter().map(Some).collect()
        } else {
            vec![None]
        };

        let mut planes = HashMap::new();
        for face in faces {
            for level in 0..desc.levels {
                let (w, h) = desc.level_extent(level);
                let pitch = self.pitch_for(desc.format, w);
                let rows = desc.format.row_count(h);
                planes.insert(
                    Subresource { level, face },
                    Plane {
                        pitch,
                        bytes: vec![0u8; pitch as usize * rows as usize],
                    },
                );
            }
        }

        let id = ResourceId(self.next_id);
        self.next_id += 1;
        self.resources.insert(
            id,
            MemoryResource {
                desc,
                planes,
                locked: HashSet::new(),
            },
        );
        id
    }

    fn allocate(&mut self, desc: ResourceDesc) -> Result<ResourceId, DeviceError> {
        if self.fail_allocations > 0 {
            self.fail_allocations -= 1;
            return Err(DeviceError::OutOfVideoMemory);
        }
        if desc.width == 0 || desc.height == 0 || desc.levels == 0 {
            return Err(DeviceError::InvalidCall(format!(
                "zero-sized resource {}x{} with {} levels",
                desc.width, desc.height, desc.levels
            )));
        }
        if desc.format == D3DFormat::Unknown
            || self.config.unsupported_formats.contains(&desc.format)
        {
            return Err(DeviceError::UnsupportedFormat(desc.format));
        }
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(self.insert(desc))
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new(MemoryDeviceConfig::default())
    }
}

impl GpuDevice for MemoryDevice {
    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: D3DFormat,
        lockable: bool,
    ) -> Result<ResourceId, DeviceError> {
        self.allocate(ResourceDesc {
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
        self.allocate(ResourceDesc {
            ty: ResourceType::DepthStencil,
            width,
            height,
            levels: 1,
            format,
            placement: Placement::Local,
            usage: ResourceUsage::DEPTH_STENCIL,
            lockable: format == D3DFormat::D16Lockable,
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
        self.allocate(ResourceDesc {
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
        self.allocate(ResourceDesc {
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
        self.allocate(ResourceDesc {
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
        if self.resources.remove(&resource).is_some() {
            self.counters.releases.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn resource_desc(&self, resource: ResourceId) -> Option<ResourceDesc> {
        self.resources.get(&resource).map(|res| res.desc)
    }

    fn lock(
        &mut self,
        resource: ResourceId,
        sub: Subresource,
        _access: LockAccess,
    ) -> Result<LockedRect<'_>, DeviceError> {
        if self.fail_locks > 0 {
            self.fail_locks -= 1;
            return Err(DeviceError::Backend("injected lock failure".into()));
        }
        let res = self
            .resources
            .get_mut(&resource)
            .ok_or(DeviceError::UnknownResource(resource.0))?;
        if !res.desc.lockable {
            return Err(DeviceError::NotLockable);
        }
        if res.locked.contains(&sub) {
            return Err(DeviceError::AlreadyLocked);
        }
        let plane = res.planes.get_mut(&sub).ok_or_else(|| {
            DeviceError::InvalidCall(format!("no subresource {sub:?} in {resource}"))
        })?;
        res.locked.insert(sub);
        self.counters.locks.fetch_add(1, Ordering::Relaxed);
        Ok(LockedRect {
            pitch: plane.pitch,
            bytes: &mut plane.bytes,
        })
    }

    fn unlock(&mut self, resource: ResourceId, sub: Subresource) -> Result<(), DeviceError> {
        let res = self
            .resources
            .get_mut(&resource)
            .ok_or(DeviceError::UnknownResource(resource.0))?;
        if !res.locked.remove(&sub) {
            return Err(DeviceError::InvalidCall(format!(
                "{sub:?} of {resource} is not locked"
            )));
        }
        self.counters.unlocks.fetch_add(1, Ordering::Relaxed);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_is_aligned_for_linear_formats_only() {
        let mut device = MemoryDevice::new(MemoryDeviceConfig {
            pitch_alignment: 256,
            ..MemoryDeviceConfig::default()
        });
        let tex = device
            .create_texture(
                255,
                4,
                1,
                ResourceUsage::empty(),
                D3DFormat::A8R8G8B8,
                Placement::Managed,
            )
            .unwrap();
        let rect = device.lock(tex, Subresource::BASE, LockAccess::Write).unwrap();
        assert_eq!(rect.pitch, 1024);
        device.unlock(tex, Subresource::BASE).unwrap();

        let dxt = device
            .create_texture(
                8,
                8,
                1,
                ResourceUsage::empty(),
                D3DFormat::Dxt1,
                Placement::Managed,
            )
            .unwrap();
        let rect = device.lock(dxt, Subresource::BASE, LockAccess::Write).unwrap();
        assert_eq!(rect.pitch, 16);
        assert_eq!(rect.bytes.len(), 32);
    }

    #[test]
    fn double_lock_is_rejected() {
        let mut device = MemoryDevice::default();
        let rt = device
            .create_render_target(4, 4, D3DFormat::X8R8G8B8, true)
            .unwrap();
        device.lock(rt, Subresource::BASE, LockAccess::Read).unwrap();
        assert_eq!(
            device.lock(rt, Subresource::BASE, LockAccess::Read).unwrap_err(),
            DeviceError::AlreadyLocked
        );
        device.unlock(rt, Subresource::BASE).unwrap();
        assert!(device.unlock(rt, Subresource::BASE).is_err());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut device = MemoryDevice::default();
        let counters = device.counters();
        device.fail_next_allocations(1);
        assert_eq!(
            device.create_offscreen_plain(4, 4, D3DFormat::R5G6B5, Placement::System),
            Err(DeviceError::OutOfVideoMemory)
        );
        assert!(device
            .create_offscreen_plain(4, 4, D3DFormat::R5G6B5, Placement::System)
            .is_ok());
        assert_eq!(counters.allocations(), 1);
    }

    #[test]
    fn configured_formats_are_rejected() {
        let mut device = MemoryDevice::new(MemoryDeviceConfig {
            unsupported_formats: &[D3DFormat::R5G6B5],
            ..MemoryDeviceConfig::default()
        });
        assert_eq!(
            device.create_offscreen_plain(4, 4, D3DFormat::R5G6B5, Placement::System),
            Err(DeviceError::UnsupportedFormat(D3DFormat::R5G6B5))
        );
        assert_eq!(device.counters().allocations(), 0);
        assert!(device
            .create_offscreen_plain(4, 4, D3DFormat::X8R8G8B8, Placement::System)
            .is_ok());
    }

    #[test]
    fn back_buffers_survive_release() {
        let mut device = MemoryDevice::new(MemoryDeviceConfig {
            back_buffer_count: 2,
            ..MemoryDeviceConfig::default()
        });
        let bb = device.back_buffer(1).unwrap();
        device.release(bb);
        assert!(device.resource_desc(bb).is_some());
        assert!(matches!(
            device.back_buffer(2),
            Err(DeviceError::BackBufferOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn cube_textures_have_six_faces_per_level() {
        let mut device = MemoryDevice::default();
        let cube = device
            .create_cube_texture(
                16,
                3,
                ResourceUsage::empty(),
                D3DFormat::A8R8G8B8,
                Placement::Local,
            )
            .unwrap();
        for face in CubeFace::ALL {
            for level in 0..3 {
                assert!(device
                    .subresource_bytes(cube, Subresource::cube(face, level))
                    .is_some());
            }
        }
        assert!(device
            .subresource_bytes(cube, Subresource::level(0))
            .is_none());
    }
}
