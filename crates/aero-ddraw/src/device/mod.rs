//! The modern-device interface consumed by the binding engine.
//!
//! [`GpuDevice`] mirrors the small slice of a D3D9-class device the engine needs: typed resource
//! creation, lock/unlock by mip level (and cube face), and swap-chain back-buffer queries.

use core::fmt;

use bitflags::bitflags;

use crate::caps::CubeFace;
use crate::error::DeviceError;
use crate::format::D3DFormat;

pub mod memory;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_device;

/// Opaque handle to a device resource. Only meaningful to the device that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    RenderTarget,
    DepthStencil,
    Texture,
    CubeTexture,
    OffscreenPlain,
    BackBuffer,
}

/// Requested memory locality for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Fast device-local memory (`D3DPOOL_DEFAULT`).
    Local,
    /// CPU-visible shared/system memory (`D3DPOOL_SYSTEMMEM`).
    System,
    /// Driver-managed residency (`D3DPOOL_MANAGED`).
    Managed,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceUsage: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const DYNAMIC = 1 << 2;
    }
}

/// What a device reports about a resource it created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDesc {
    pub ty: ResourceType,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub format: D3DFormat,
    pub placement: Placement,
    pub usage: ResourceUsage,
    pub lockable: bool,
}

impl ResourceDesc {
    pub fn level_extent(&self, level: u32) -> (u32, u32) {
        level_extent(self.width, self.height, level)
    }
}

/// One lockable slice of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subresource {
    pub level: u32,
    pub face: Option<CubeFace>,
}

impl Subresource {
    pub const BASE: Subresource = Subresource {
        level: 0,
        face: None,
    };

    pub fn level(level: u32) -> Self {
        Self { level, face: None }
    }

    pub fn cube(face: CubeFace, level: u32) -> Self {
        Self {
            level,
            face: Some(face),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockAccess {
    Read,
    Write,
}

/// CPU view of a locked subresource. `pitch` is the distance between rows (block rows for
/// BC formats) in `bytes`.
#[derive(Debug)]
pub struct LockedRect<'a> {
    pub pitch: u32,
    pub bytes: &'a mut [u8],
}

pub trait GpuDevice {
    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: D3DFormat,
        lockable: bool,
    ) -> Result<ResourceId, DeviceError>;

    fn create_depth_stencil(
        &mut self,
        width: u32,
        height: u32,
        format: D3DFormat,
    ) -> Result<ResourceId, DeviceError>;

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        levels: u32,
        usage: ResourceUsage,
        format: D3DFormat,
        placement: Placement,
    ) -> Result<ResourceId, DeviceError>;

    fn create_cube_texture(
        &mut self,
        edge: u32,
        levels: u32,
        usage: ResourceUsage,
        format: D3DFormat,
        placement: Placement,
    ) -> Result<ResourceId, DeviceError>;

    fn create_offscreen_plain(
        &mut self,
        width: u32,
        height: u32,
        format: D3DFormat,
        placement: Placement,
    ) -> Result<ResourceId, DeviceError>;

    /// Destroys a resource created by this device. Unknown handles are ignored.
    fn release(&mut self, resource: ResourceId);

    fn resource_desc(&self, resource: ResourceId) -> Option<ResourceDesc>;

    fn lock(
        &mut self,
        resource: ResourceId,
        sub: Subresource,
        access: LockAccess,
    ) -> Result<LockedRect<'_>, DeviceError>;

    fn unlock(&mut self, resource: ResourceId, sub: Subresource) -> Result<(), DeviceError>;

    fn back_buffer_count(&self) -> u32;

    fn back_buffer(&mut self, index: u32) -> Result<ResourceId, DeviceError>;
}

/// Extent of mip `level` of a `width` x `height` resource.
pub fn level_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    let shift = level.min(31);
    ((width >> shift).max(1), (height >> shift).max(1))
}

/// Number of levels in a full mip chain for the given extent.
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    32 - largest.leading_zeros()
}
