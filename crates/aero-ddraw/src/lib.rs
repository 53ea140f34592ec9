//! `aero-ddraw` binds legacy DirectDraw/Direct3D surfaces to resources on a modern GPU device.
//!
//! Currently this crate provides:
//! - Pixel-format translation and capability classification (see [`format`], [`caps`]).
//! - Pixel conversion for resources created in a format other than the surface's
//!   (see [`convert`]).
//! - The surface arena with complex-surface expansion (flip chains, mip chains, cube faces).
//! - Lazy backing-resource creation, CPU/GPU synchronization and device-reset handling
//!   (see [`DdrawRuntime`]).
//! - A deterministic in-memory device for tests and a wgpu-backed device
//!   (see [`device::memory::MemoryDevice`], `device::wgpu_device::WgpuDevice`).

mod binder;
mod context;
mod error;
mod runtime;

pub mod blit;
pub mod caps;
pub mod config;
pub mod convert;
pub mod device;
pub mod flip;
pub mod format;
pub mod mip;
pub mod rebind;
pub mod stats;
pub mod surface;

pub use binder::{resolve_placement, resolve_usage, BindOutcome, UploadOutcome};
pub use caps::{SurfaceCaps, SurfaceCaps2, SurfaceKind};
pub use config::CompatOptions;
pub use context::{DeviceContext, LegacyDeviceType};
pub use device::{GpuDevice, ResourceId};
pub use error::{BindError, BlitError, DeviceError, SurfaceError};
pub use format::{D3DFormat, PixelFormat};
pub use rebind::DeviceGeneration;
pub use runtime::{DdrawRuntime, LockFlags, LockedSurface, RuntimeLock};
pub use stats::{BindingStats, BindingStatsSnapshot};
pub use surface::{BackingResource, SurfaceDesc, SurfaceId};
