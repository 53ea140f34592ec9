//! Copies between a surface's CPU memory and a locked device subresource.
//!
//! The legacy row pitch and the device row pitch rarely agree (devices round rows up to their
//! own alignment), so uncompressed copies go row by row whenever they differ. Block-compressed
//! payloads are opaque: the whole locked span is copied in one go. When the resource was
//! created in a different format than the CPU layout, pixels are converted per row.

use tracing::{trace, warn};

use crate::convert::{self, Conversion};
use crate::device::{GpuDevice, LockAccess, LockedRect, ResourceId, Subresource};
use crate::error::BlitError;
use crate::format::D3DFormat;
use crate::surface::SurfaceMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyPath {
    Contiguous,
    RowByRow,
    Converted,
}

/// Pixel extent of the level being transferred.
#[derive(Debug, Clone, Copy)]
struct Extent {
    width: u32,
    height: u32,
    rows: u32,
}

impl Extent {
    fn of(memory: &SurfaceMemory) -> Self {
        Self {
            width: memory.width(),
            height: memory.height(),
            rows: memory.rows(),
        }
    }
}

/// Conversion between CPU memory in `memory_format` and `resource`, in the direction of
/// `access`. A resource the device does not know is treated as matching; the lock that follows
/// reports it.
fn plan<D: GpuDevice + ?Sized>(
    device: &D,
    resource: ResourceId,
    memory_format: D3DFormat,
    access: LockAccess,
) -> Result<Conversion, BlitError> {
    let resource_format = device
        .resource_desc(resource)
        .map_or(memory_format, |desc| desc.format);
    let (from, to) = match access {
        LockAccess::Write => (memory_format, resource_format),
        LockAccess::Read => (resource_format, memory_format),
    };
    convert::plan(from, to).ok_or(BlitError::Unconvertible { from, to })
}

fn transfer(
    conversion: Conversion,
    extent: Extent,
    block_compressed: bool,
    dst: &mut [u8],
    dst_pitch: u32,
    src: &[u8],
    src_pitch: u32,
) -> CopyPath {
    match conversion {
        Conversion::Direct => {
            copy_rows(dst, dst_pitch, src, src_pitch, extent.rows, block_compressed)
        }
        Conversion::Repack { from, to } => {
            convert::repack_rows(
                &from,
                &to,
                dst,
                dst_pitch,
                src,
                src_pitch,
                extent.width,
                extent.height,
            );
            CopyPath::Converted
        }
        Conversion::Decompress { from, to } => {
            convert::decompress(from, &to, dst, dst_pitch, src, extent.width, extent.height);
            CopyPath::Converted
        }
    }
}

/// Copies `rows` rows from `src` to `dst`. Never reads or writes past either slice.
pub fn copy_rows(
    dst: &mut [u8],
    dst_pitch: u32,
    src: &[u8],
    src_pitch: u32,
    rows: u32,
    block_compressed: bool,
) -> CopyPath {
    if block_compressed {
        let len = dst.len().min(src.len());
        dst[..len].copy_from_slice(&src[..len]);
        return CopyPath::Contiguous;
    }

    if dst_pitch == src_pitch {
        let len = (rows as usize * src_pitch as usize)
            .min(dst.len())
            .min(src.len());
        dst[..len].copy_from_slice(&src[..len]);
        return CopyPath::Contiguous;
    }

    let width = dst_pitch.min(src_pitch) as usize;
    let (dst_pitch, src_pitch) = (dst_pitch as usize, src_pitch as usize);
    for row in 0..rows as usize {
        let src_off = row * src_pitch;
        let dst_off = row * dst_pitch;
        let (Some(src_row), Some(dst_row)) = (
            src.get(src_off..src_off + width),
            dst.get_mut(dst_off..dst_off + width),
        ) else {
            break;
        };
        dst_row.copy_from_slice(src_row);
    }
    CopyPath::RowByRow
}

/// Locks `sub`, hands the mapping to `f` and unlocks again whatever `f` did.
pub fn with_lock<D, R>(
    device: &mut D,
    resource: ResourceId,
    sub: Subresource,
    access: LockAccess,
    f: impl FnOnce(LockedRect<'_>) -> R,
) -> Result<R, BlitError>
where
    D: GpuDevice + ?Sized,
{
    let rect = device
        .lock(resource, sub, access)
        .map_err(BlitError::LockFailed)?;
    let out = f(rect);
    if let Err(err) = device.unlock(resource, sub) {
        warn!(%resource, ?sub, %err, "unlock failed");
    }
    Ok(out)
}

/// Pushes CPU memory laid out as `format` into one level (and face) of `resource`.
pub fn upload_level<D: GpuDevice + ?Sized>(
    device: &mut D,
    resource: ResourceId,
    sub: Subresource,
    memory: &SurfaceMemory,
    format: D3DFormat,
) -> Result<CopyPath, BlitError> {
    let conversion = plan(device, resource, format, LockAccess::Write)?;
    let path = with_lock(device, resource, sub, LockAccess::Write, |rect| {
        transfer(
            conversion,
            Extent::of(memory),
            format.is_block_compressed(),
            rect.bytes,
            rect.pitch,
            memory.bytes(),
            memory.pitch(),
        )
    })?;
    trace!(%resource, level = sub.level, face = ?sub.face, ?path, "uploaded level");
    Ok(path)
}

/// Pulls one level (and face) of `resource` back into CPU memory laid out as `format`.
pub fn download_level<D: GpuDevice + ?Sized>(
    device: &mut D,
    resource: ResourceId,
    sub: Subresource,
    memory: &mut SurfaceMemory,
    format: D3DFormat,
) -> Result<CopyPath, BlitError> {
    let conversion = plan(device, resource, format, LockAccess::Read)?;
    let extent = Extent::of(memory);
    let pitch = memory.pitch();
    let path = with_lock(device, resource, sub, LockAccess::Read, |rect| {
        transfer(
            conversion,
            extent,
            format.is_block_compressed(),
            memory.bytes_mut(),
            pitch,
            rect.bytes,
            rect.pitch,
        )
    })?;
    trace!(%resource, level = sub.level, face = ?sub.face, ?path, "downloaded level");
    Ok(path)
}
