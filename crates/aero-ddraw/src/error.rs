use thiserror::Error;

use crate::caps::SurfaceKind;
use crate::format::D3DFormat;
use crate::surface::SurfaceId;

/// Errors reported by a [`crate::device::GpuDevice`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("wgpu adapter not found")]
    AdapterNotFound,
    #[error("out of video memory")]
    OutOfVideoMemory,
    #[error("invalid call: {0}")]
    InvalidCall(String),
    #[error("format {0:?} is not supported by the device")]
    UnsupportedFormat(D3DFormat),
    #[error("resource is not lockable")]
    NotLockable,
    #[error("subresource is already locked")]
    AlreadyLocked,
    #[error("unknown resource {0}")]
    UnknownResource(u64),
    #[error("back buffer {index} out of range (swap chain has {count})")]
    BackBufferOutOfRange { index: u32, count: u32 },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors returned by the binding engine.
///
/// Deferred binds (no device yet) and zero-extent surfaces are not errors; they are reported
/// through [`crate::BindOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),
    #[error("failed to allocate backing resource for {kind:?} surface: {source}")]
    AllocationFailed {
        kind: SurfaceKind,
        #[source]
        source: DeviceError,
    },
    #[error("swap chain back buffer unavailable: {0}")]
    BackBufferUnavailable(#[source] DeviceError),
}

/// Errors raised while copying between CPU and GPU memory.
///
/// The runtime never propagates these to callers: a failed transfer is reported as skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlitError {
    #[error("lock failed: {0}")]
    LockFailed(#[source] DeviceError),
    #[error("no conversion from {from:?} to {to:?}")]
    Unconvertible { from: D3DFormat, to: D3DFormat },
}

/// Errors from surface-level operations (creation, attachment, CPU access).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),
    #[error("invalid surface descriptor: {0}")]
    InvalidDescriptor(&'static str),
    #[error("surface {0} is already attached to a parent")]
    AlreadyAttached(SurfaceId),
    #[error("surface {child} is not attached to {parent}")]
    NotAttached { parent: SurfaceId, child: SurfaceId },
    #[error("a surface cannot be attached to itself")]
    CannotAttachToSelf,
    #[error("no color key flag given")]
    NoColorKeyFlag,
    #[error(transparent)]
    Bind(#[from] BindError),
}
