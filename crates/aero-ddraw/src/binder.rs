//! Lazily creates and refreshes the device resource behind a surface.
//!
//! A surface is bound through the top of its chain: mip sublevels and non-primary cube faces
//! share the resource allocated for the top-level surface and only record which
//! level/face they map to. The top-level surface owns the resource.

use tracing::{debug, warn};

use crate::blit;
use crate::caps::{is_mip_sublevel, CubeFace, SurfaceCaps, SurfaceCaps2, SurfaceKind};
use crate::config::CompatOptions;
use crate::context::{DeviceContext, LegacyDeviceType};
use crate::device::{GpuDevice, Placement, ResourceUsage, Subresource};
use crate::convert;
use crate::error::{BindError, DeviceError};
use crate::format::{D3DFormat, FALLBACK_DEPTH_FORMAT, FALLBACK_FORMAT};
use crate::mip::{self, MAX_MIP_SUBLEVELS};
use crate::rebind::{self, DeviceGeneration};
use crate::runtime::RuntimeState;
use crate::stats::BindingStats;
use crate::surface::{BackingResource, Binding, SurfaceArena, SurfaceId};

/// Result of [`crate::DdrawRuntime::ensure_bound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// No device yet; the surface binds on first use after one is created.
    Deferred,
    /// Zero-sized surface; nothing to allocate.
    ZeroExtent,
    Bound {
        /// Whether a new backing resource was created (or aliased) by this call.
        allocated: bool,
        upload: UploadOutcome,
    },
}

/// Result of pushing CPU content to the device (or pulling it back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { levels: u32 },
    /// Nothing was dirty.
    Clean,
    /// A lock failed; the affected surfaces stay dirty.
    Skipped,
    NotBound,
    /// The surface kind never transfers CPU content in this direction.
    NotApplicable,
}

/// Memory placement for a surface's backing resource. First match wins.
pub fn resolve_placement(
    caps: SurfaceCaps,
    caps2: SurfaceCaps2,
    kind: SurfaceKind,
    options: &CompatOptions,
    device_type: LegacyDeviceType,
) -> Placement {
    if caps.contains(SurfaceCaps::VIDEOMEMORY)
        || kind.is_render_target_eligible()
        || matches!(kind, SurfaceKind::CubeMap | SurfaceKind::Overlay)
    {
        Placement::Local
    } else if caps.contains(SurfaceCaps::SYSTEMMEMORY) {
        Placement::System
    } else if caps.contains(SurfaceCaps::NONLOCALVIDMEM)
        || caps2.intersects(SurfaceCaps2::TEXTUREMANAGE | SurfaceCaps2::D3DTEXTUREMANAGE)
    {
        if options.managed_textures_local_on_tnl && device_type == LegacyDeviceType::TnlHal {
            Placement::Local
        } else {
            Placement::Managed
        }
    } else {
        Placement::Local
    }
}

pub fn resolve_usage(caps: SurfaceCaps, kind: SurfaceKind, placement: Placement) -> ResourceUsage {
    let mut usage = ResourceUsage::empty();
    if kind.is_render_target_eligible() || caps.contains(SurfaceCaps::THREE_D_DEVICE) {
        usage |= ResourceUsage::RENDER_TARGET;
    }
    if kind == SurfaceKind::DepthStencil {
        usage |= ResourceUsage::DEPTH_STENCIL;
    }
    if kind.is_textured() && placement == Placement::Local {
        usage |= ResourceUsage::DYNAMIC;
    }
    usage
}

/// The surface whose binding `id` shares: the top of its mip chain, then the primary face of
/// its cube.
pub(crate) fn binding_root(arena: &SurfaceArena, id: SurfaceId) -> SurfaceId {
    let mut cur = id;
    // Bounded by the deepest legal chain: sublevels plus one hop from a sibling face.
    for _ in 0..=MAX_MIP_SUBLEVELS + 1 {
        let Some(surface) = arena.get(cur) else {
            break;
        };
        let Some((parent_id, parent)) = surface
            .parent
            .and_then(|p| arena.get(p).map(|parent| (p, parent)))
        else {
            break;
        };
        let sublevel = parent.kind.is_textured()
            && is_mip_sublevel(parent.caps_pair(), surface.caps_pair());
        let sibling_face =
            parent.kind == SurfaceKind::CubeMap && surface.kind == SurfaceKind::CubeMap;
        if !(sublevel || sibling_face) {
            break;
        }
        cur = parent_id;
    }
    cur
}

/// The primary face of a cube followed by the sibling faces attached to it.
fn cube_faces(arena: &SurfaceArena, root: SurfaceId) -> Vec<SurfaceId> {
    let mut faces = vec![root];
    let Some(surface) = arena.get(root) else {
        return faces;
    };
    faces.extend(surface.attachments.iter().map(|a| a.surface).filter(|&id| {
        arena.get(id).is_some_and(|child| {
            child.kind == SurfaceKind::CubeMap
                && !is_mip_sublevel(surface.caps_pair(), child.caps_pair())
        })
    }));
    faces
}

/// Every surface sharing `root`'s resource, paired with the subresource it maps to.
pub(crate) fn chain_targets(
    arena: &SurfaceArena,
    root: SurfaceId,
    kind: SurfaceKind,
) -> Vec<(SurfaceId, Subresource)> {
    match kind {
        SurfaceKind::Texture => {
            let count = mip::level_count(arena, root) as usize;
            mip::levels(arena, root)
                .take(count)
                .map(|(level, id)| (id, Subresource::level(level)))
                .collect()
        }
        SurfaceKind::CubeMap => {
            let count = mip::level_count(arena, root) as usize;
            let mut targets = Vec::new();
            for face_root in cube_faces(arena, root) {
                let face = arena
                    .get(face_root)
                    .and_then(|s| s.cube_face())
                    .unwrap_or(CubeFace::PositiveX);
                targets.extend(
                    mip::levels(arena, face_root)
                        .take(count)
                        .map(|(level, id)| (id, Subresource::cube(face, level))),
                );
            }
            targets
        }
        _ => vec![(root, Subresource::BASE)],
    }
}

fn binding_matches(kind: SurfaceKind, resource: &BackingResource) -> bool {
    use BackingResource as B;
    match (kind, resource) {
        (_, B::None) => false,
        (SurfaceKind::FrontBuffer | SurfaceKind::BackBuffer, B::RenderTarget(_)) => true,
        (SurfaceKind::DepthStencil, B::DepthStencil(_)) => true,
        (SurfaceKind::CubeMap, B::CubeTexture { .. }) => true,
        (SurfaceKind::Texture, B::Texture { .. }) => true,
        (SurfaceKind::RenderTarget, B::RenderTarget(_)) => true,
        (SurfaceKind::OffscreenPlain | SurfaceKind::Overlay, B::Surface(_)) => true,
        (SurfaceKind::Unknown, B::Surface(_) | B::RenderTarget(_)) => true,
        _ => false,
    }
}

pub(crate) fn refresh_surface(
    arena: &mut SurfaceArena,
    generation: Option<DeviceGeneration>,
    stats: &BindingStats,
    id: SurfaceId,
) -> Result<bool, BindError> {
    let surface = arena.get_mut(id).ok_or(BindError::UnknownSurface(id))?;
    let invalidated = rebind::refresh_binding(surface, generation);
    if invalidated {
        stats.inc_invalidations();
    }
    Ok(invalidated)
}

/// Releases the resource owned by `root` (if any) and clears every binding sharing it.
pub(crate) fn drop_binding<D: GpuDevice>(
    arena: &mut SurfaceArena,
    device: &mut D,
    stats: &BindingStats,
    root: SurfaceId,
) {
    let Some(surface) = arena.get(root) else {
        return;
    };
    let binding = surface.binding;
    let kind = surface.kind;
    if binding.owned {
        if let Some(resource) = binding.resource.resource() {
            debug!(surface = %root, %resource, "releasing backing resource");
            device.release(resource);
            stats.inc_releases();
        }
    }
    for (id, _) in chain_targets(arena, root, kind) {
        if let Some(s) = arena.get_mut(id) {
            s.binding = Binding::NONE;
        }
    }
    if let Some(s) = arena.get_mut(root) {
        s.binding = Binding::NONE;
    }
}

/// Points every non-root member of `root`'s chain at the matching slice of `resource`.
fn assign_chain(
    arena: &mut SurfaceArena,
    generation: DeviceGeneration,
    root: SurfaceId,
    kind: SurfaceKind,
    resource: BackingResource,
) {
    for (id, sub) in chain_targets(arena, root, kind) {
        if id == root {
            continue;
        }
        let aliased = match resource {
            BackingResource::Texture { resource, .. } => BackingResource::Texture {
                resource,
                level: sub.level,
            },
            BackingResource::CubeTexture { resource, .. } => BackingResource::CubeTexture {
                resource,
                face: sub.face.unwrap_or(CubeFace::PositiveX),
                level: sub.level,
            },
            other => other,
        };
        if let Some(surface) = arena.get_mut(id) {
            surface.binding = Binding::alias(aliased);
            surface.bound_generation = Some(generation);
        }
    }
}

/// Format to allocate `root` with, and whether it is a fallback for an unusable descriptor.
fn resolve_format<D: GpuDevice>(
    arena: &SurfaceArena,
    ctx: &DeviceContext<D>,
    root: SurfaceId,
    kind: SurfaceKind,
) -> Option<(D3DFormat, bool)> {
    let surface = arena.get(root)?;
    Some(match surface.format {
        Some(format) if kind != SurfaceKind::DepthStencil || format.is_depth() => (format, false),
        _ if kind == SurfaceKind::DepthStencil => (FALLBACK_DEPTH_FORMAT, true),
        _ => (ctx.back_buffer_format().unwrap_or(FALLBACK_FORMAT), true),
    })
}

/// Format to retry with after the device rejected `rejected`. `None` when nothing wider is
/// available or no transfer path reaches it.
fn device_fallback(
    kind: SurfaceKind,
    rejected: D3DFormat,
    back_buffer: Option<D3DFormat>,
) -> Option<D3DFormat> {
    if kind == SurfaceKind::DepthStencil {
        return (rejected != FALLBACK_DEPTH_FORMAT).then_some(FALLBACK_DEPTH_FORMAT);
    }
    let fallback = if rejected.has_alpha() {
        D3DFormat::A8R8G8B8
    } else {
        match back_buffer {
            Some(format @ (D3DFormat::A8R8G8B8 | D3DFormat::X8R8G8B8)) => format,
            _ => FALLBACK_FORMAT,
        }
    };
    (fallback != rejected && convert::plan(rejected, fallback).is_some()).then_some(fallback)
}

/// Everything but the format needed to create an owned resource.
struct ResourceRequest {
    kind: SurfaceKind,
    width: u32,
    height: u32,
    levels: u32,
    face: Option<CubeFace>,
    usage: ResourceUsage,
    placement: Placement,
}

impl ResourceRequest {
    fn create<D: GpuDevice>(
        &self,
        device: &mut D,
        format: D3DFormat,
    ) -> Result<BackingResource, DeviceError> {
        let Self {
            kind,
            width,
            height,
            levels,
            face,
            usage,
            placement,
        } = *self;
        Ok(match kind {
            SurfaceKind::DepthStencil => {
                BackingResource::DepthStencil(device.create_depth_stencil(width, height, format)?)
            }
            SurfaceKind::CubeMap => BackingResource::CubeTexture {
                resource: device.create_cube_texture(width, levels, usage, format, placement)?,
                face: face.unwrap_or(CubeFace::PositiveX),
                level: 0,
            },
            SurfaceKind::Texture => BackingResource::Texture {
                resource: device.create_texture(width, height, levels, usage, format, placement)?,
                level: 0,
            },
            SurfaceKind::RenderTarget | SurfaceKind::FrontBuffer | SurfaceKind::BackBuffer => {
                BackingResource::RenderTarget(
                    device.create_render_target(width, height, format, true)?,
                )
            }
            SurfaceKind::OffscreenPlain | SurfaceKind::Overlay | SurfaceKind::Unknown => {
                BackingResource::Surface(
                    device.create_offscreen_plain(width, height, format, placement)?,
                )
            }
        })
    }
}

fn allocate<D: GpuDevice>(
    arena: &mut SurfaceArena,
    ctx: &mut DeviceContext<D>,
    options: &CompatOptions,
    stats: &BindingStats,
    root: SurfaceId,
) -> Result<(), BindError> {
    drop_binding(arena, ctx.device_mut(), stats, root);

    let (kind, caps, caps2, (width, height), face, requested) = {
        let surface = arena.get(root).ok_or(BindError::UnknownSurface(root))?;
        (
            surface.kind,
            surface.desc.caps,
            surface.desc.caps2,
            surface.extent(),
            surface.cube_face(),
            surface.format,
        )
    };

    let (format, fell_back) =
        resolve_format(arena, ctx, root, kind).ok_or(BindError::UnknownSurface(root))?;
    let placement = resolve_placement(caps, caps2, kind, options, ctx.device_type());
    let usage = resolve_usage(caps, kind, placement);
    let failed = |source| BindError::AllocationFailed { kind, source };

    let alias = kind.is_swap_chain_alias()
        || (kind == SurfaceKind::Unknown && ctx.render_target() == Some(root));
    let (binding, created) = if alias {
        let resource = ctx
            .back_buffer_for(root)
            .map_err(BindError::BackBufferUnavailable)?;
        (Binding::alias(BackingResource::RenderTarget(resource)), format)
    } else {
        let request = ResourceRequest {
            kind,
            width,
            height,
            levels: mip::level_count(arena, root),
            face,
            usage,
            placement,
        };
        match request.create(ctx.device_mut(), format) {
            Ok(resource) => (Binding::owned(resource), format),
            Err(DeviceError::UnsupportedFormat(rejected)) => {
                let fallback = device_fallback(kind, rejected, ctx.back_buffer_format())
                    .ok_or_else(|| failed(DeviceError::UnsupportedFormat(rejected)))?;
                warn!(
                    surface = %root,
                    ?kind,
                    ?rejected,
                    ?fallback,
                    "device rejected format, retrying"
                );
                let resource = request
                    .create(ctx.device_mut(), fallback)
                    .map_err(failed)?;
                stats.inc_format_fallbacks();
                (Binding::owned(resource), fallback)
            }
            Err(err) => return Err(failed(err)),
        }
    };

    if fell_back {
        warn!(
            surface = %root,
            ?kind,
            ?requested,
            fallback = ?format,
            "pixel format unusable, falling back"
        );
        stats.inc_format_fallbacks();
    }
    for (id, _) in chain_targets(arena, root, kind) {
        if let Some(surface) = arena.get_mut(id) {
            if surface.format != Some(format) {
                surface.adopt_format(format);
            }
        }
    }

    if binding.owned {
        stats.inc_allocations();
    }
    debug!(
        surface = %root,
        ?kind,
        width,
        height,
        ?format,
        ?created,
        ?placement,
        resource = ?binding.resource,
        owned = binding.owned,
        "bound surface"
    );

    let generation = ctx.generation();
    if let Some(surface) = arena.get_mut(root) {
        surface.binding = binding;
        surface.bound_generation = Some(generation);
    }
    assign_chain(arena, generation, root, kind, binding.resource);
    Ok(())
}

/// Pushes dirty levels (all levels when `force`) of `root`'s chain to the device.
fn upload_chain<D: GpuDevice>(
    arena: &mut SurfaceArena,
    ctx: &mut DeviceContext<D>,
    stats: &BindingStats,
    root: SurfaceId,
    force: bool,
) -> UploadOutcome {
    let Some((kind, Some(resource))) = arena
        .get(root)
        .map(|s| (s.kind, s.binding.resource.resource()))
    else {
        return UploadOutcome::NotBound;
    };

    let targets = chain_targets(arena, root, kind);
    let mut uploaded = 0;
    for (index, &(id, sub)) in targets.iter().enumerate() {
        let Some(surface) = arena.get_mut(id) else {
            continue;
        };
        if !force && !surface.dirty {
            continue;
        }
        let format = surface.memory_format();
        match blit::upload_level(ctx.device_mut(), resource, sub, &surface.memory, format) {
            Ok(path) => {
                stats.record_copy(path);
                stats.inc_uploads();
                surface.dirty = false;
                uploaded += 1;
            }
            Err(err) => {
                warn!(surface = %id, %resource, level = sub.level, %err, "upload skipped");
                stats.inc_skipped_uploads();
                surface.dirty = true;
                if force {
                    for &(rest, _) in &targets[index..] {
                        if let Some(s) = arena.get_mut(rest) {
                            s.dirty = true;
                        }
                    }
                }
                return UploadOutcome::Skipped;
            }
        }
    }

    if uploaded == 0 {
        UploadOutcome::Clean
    } else {
        UploadOutcome::Uploaded { levels: uploaded }
    }
}

fn download_chain<D: GpuDevice>(
    arena: &mut SurfaceArena,
    ctx: &mut DeviceContext<D>,
    stats: &BindingStats,
    root: SurfaceId,
) -> UploadOutcome {
    let Some((kind, Some(resource))) = arena
        .get(root)
        .map(|s| (s.kind, s.binding.resource.resource()))
    else {
        return UploadOutcome::NotBound;
    };

    let mut downloaded = 0;
    for (id, sub) in chain_targets(arena, root, kind) {
        let Some(surface) = arena.get_mut(id) else {
            continue;
        };
        let format = surface.memory_format();
        match blit::download_level(ctx.device_mut(), resource, sub, &mut surface.memory, format) {
            Ok(path) => {
                stats.record_copy(path);
                stats.inc_downloads();
                surface.dirty = false;
                downloaded += 1;
            }
            Err(err) => {
                warn!(surface = %id, %resource, level = sub.level, %err, "download skipped");
                stats.inc_skipped_uploads();
                return UploadOutcome::Skipped;
            }
        }
    }
    UploadOutcome::Uploaded { levels: downloaded }
}

impl<D: GpuDevice> RuntimeState<D> {
    fn generation(&self) -> Option<DeviceGeneration> {
        self.context.as_ref().map(DeviceContext::generation)
    }

    pub(crate) fn refresh(&mut self, id: SurfaceId) -> Result<bool, BindError> {
        let generation = self.generation();
        refresh_surface(&mut self.arena, generation, &self.stats, id)
    }

    /// Refreshes `id` and the root of its chain, returning the root.
    fn refresh_chain(&mut self, id: SurfaceId) -> Result<SurfaceId, BindError> {
        self.refresh(id)?;
        let root = binding_root(&self.arena, id);
        if root != id {
            self.refresh(root)?;
        }
        Ok(root)
    }

    pub(crate) fn ensure_bound(&mut self, id: SurfaceId) -> Result<BindOutcome, BindError> {
        if !self.arena.contains(id) {
            return Err(BindError::UnknownSurface(id));
        }
        if self.context.is_none() {
            debug!(surface = %id, "no device yet, deferring bind");
            return Ok(BindOutcome::Deferred);
        }
        let root = self.refresh_chain(id)?;

        let RuntimeState {
            arena,
            context,
            options,
            stats,
            ..
        } = self;
        let Some(ctx) = context.as_mut() else {
            return Ok(BindOutcome::Deferred);
        };

        let (kind, (width, height), resource) = {
            let surface = arena.get(root).ok_or(BindError::UnknownSurface(root))?;
            (surface.kind, surface.extent(), surface.binding.resource)
        };
        if (width == 0 || height == 0) && !kind.is_swap_chain_alias() {
            debug!(surface = %root, ?kind, "zero extent, nothing to bind");
            return Ok(BindOutcome::ZeroExtent);
        }

        let allocated = if binding_matches(kind, &resource) {
            assign_chain(arena, ctx.generation(), root, kind, resource);
            false
        } else {
            allocate(arena, ctx, options, stats, root)?;
            true
        };

        // Aliased swap-chain buffers only push pending writes; a fresh alias must not clobber
        // the back buffer with untouched CPU memory.
        let owned = arena.get(root).is_some_and(|s| s.binding.owned);
        let upload = if kind.skips_upload() {
            UploadOutcome::NotApplicable
        } else {
            upload_chain(arena, ctx, stats, root, allocated && owned)
        };
        Ok(BindOutcome::Bound { allocated, upload })
    }

    pub(crate) fn upload(&mut self, id: SurfaceId) -> Result<UploadOutcome, BindError> {
        if !self.arena.contains(id) {
            return Err(BindError::UnknownSurface(id));
        }
        if self.context.is_none() {
            return Ok(UploadOutcome::NotBound);
        }
        let root = self.refresh_chain(id)?;
        let RuntimeState {
            arena,
            context,
            stats,
            ..
        } = self;
        let Some(ctx) = context.as_mut() else {
            return Ok(UploadOutcome::NotBound);
        };
        if arena.get(root).is_some_and(|s| s.kind.skips_upload()) {
            return Ok(UploadOutcome::NotApplicable);
        }
        Ok(upload_chain(arena, ctx, stats, root, false))
    }

    pub(crate) fn download(&mut self, id: SurfaceId) -> Result<UploadOutcome, BindError> {
        if !self.arena.contains(id) {
            return Err(BindError::UnknownSurface(id));
        }
        if self.context.is_none() {
            return Ok(UploadOutcome::NotBound);
        }
        let root = self.refresh_chain(id)?;
        let RuntimeState {
            arena,
            context,
            stats,
            ..
        } = self;
        let Some(ctx) = context.as_mut() else {
            return Ok(UploadOutcome::NotBound);
        };
        if arena
            .get(root)
            .is_some_and(|s| s.kind == SurfaceKind::DepthStencil)
        {
            return Ok(UploadOutcome::NotApplicable);
        }
        Ok(download_chain(arena, ctx, stats, root))
    }

    /// Releases `id`'s owned resource under the live device and clears its chain's bindings.
    pub(crate) fn unbind(&mut self, id: SurfaceId) -> Result<(), BindError> {
        let root = self.refresh_chain(id)?;
        let RuntimeState {
            arena,
            context,
            stats,
            ..
        } = self;
        match context.as_mut() {
            Some(ctx) => drop_binding(arena, ctx.device_mut(), stats, root),
            None => {
                if let Some(surface) = arena.get_mut(root) {
                    surface.binding = Binding::NONE;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;
    use crate::surface::{complex, Surface, SurfaceDesc};

    #[test]
    fn placement_precedence() {
        let opts = CompatOptions::default();
        let hal = LegacyDeviceType::Hal;
        let place = |caps, caps2, kind| resolve_placement(caps, caps2, kind, &opts, hal);

        assert_eq!(
            place(
                SurfaceCaps::VIDEOMEMORY | SurfaceCaps::SYSTEMMEMORY,
                SurfaceCaps2::empty(),
                SurfaceKind::Texture
            ),
            Placement::Local
        );
        assert_eq!(
            place(
                SurfaceCaps::SYSTEMMEMORY,
                SurfaceCaps2::empty(),
                SurfaceKind::RenderTarget
            ),
            Placement::Local
        );
        assert_eq!(
            place(
                SurfaceCaps::SYSTEMMEMORY,
                SurfaceCaps2::TEXTUREMANAGE,
                SurfaceKind::Texture
            ),
            Placement::System
        );
        assert_eq!(
            place(
                SurfaceCaps::TEXTURE,
                SurfaceCaps2::TEXTUREMANAGE,
                SurfaceKind::Texture
            ),
            Placement::Managed
        );
        assert_eq!(
            place(
                SurfaceCaps::TEXTURE,
                SurfaceCaps2::CUBEMAP | SurfaceCaps2::TEXTUREMANAGE,
                SurfaceKind::CubeMap
            ),
            Placement::Local
        );
        assert_eq!(
            place(SurfaceCaps::TEXTURE, SurfaceCaps2::empty(), SurfaceKind::Texture),
            Placement::Local
        );
    }

    #[test]
    fn managed_textures_move_local_on_tnl_when_enabled() {
        let opts = CompatOptions {
            managed_textures_local_on_tnl: true,
            ..CompatOptions::default()
        };
        let caps = SurfaceCaps::TEXTURE | SurfaceCaps::NONLOCALVIDMEM;
        let kind = SurfaceKind::Texture;
        assert_eq!(
            resolve_placement(caps, SurfaceCaps2::empty(), kind, &opts, LegacyDeviceType::TnlHal),
            Placement::Local
        );
        assert_eq!(
            resolve_placement(caps, SurfaceCaps2::empty(), kind, &opts, LegacyDeviceType::Hal),
            Placement::Managed
        );
    }

    #[test]
    fn usage_flags() {
        assert_eq!(
            resolve_usage(SurfaceCaps::empty(), SurfaceKind::BackBuffer, Placement::Local),
            ResourceUsage::RENDER_TARGET
        );
        assert_eq!(
            resolve_usage(SurfaceCaps::TEXTURE, SurfaceKind::Texture, Placement::Local),
            ResourceUsage::DYNAMIC
        );
        assert_eq!(
            resolve_usage(SurfaceCaps::TEXTURE, SurfaceKind::Texture, Placement::Managed),
            ResourceUsage::empty()
        );
        assert_eq!(
            resolve_usage(
                SurfaceCaps::TEXTURE | SurfaceCaps::THREE_D_DEVICE,
                SurfaceKind::Texture,
                Placement::System
            ),
            ResourceUsage::RENDER_TARGET
        );
    }

    #[test]
    fn rejected_formats_fall_back_to_a_reachable_format() {
        let fallback = |kind, rejected, back_buffer| device_fallback(kind, rejected, back_buffer);
        assert_eq!(
            fallback(SurfaceKind::Texture, D3DFormat::R5G6B5, Some(D3DFormat::A8R8G8B8)),
            Some(D3DFormat::A8R8G8B8)
        );
        assert_eq!(
            fallback(SurfaceKind::Texture, D3DFormat::R5G6B5, Some(D3DFormat::R5G6B5)),
            Some(D3DFormat::X8R8G8B8)
        );
        assert_eq!(
            fallback(SurfaceKind::OffscreenPlain, D3DFormat::A1R5G5B5, None),
            Some(D3DFormat::A8R8G8B8)
        );
        assert_eq!(
            fallback(SurfaceKind::Texture, D3DFormat::Dxt5, Some(D3DFormat::X8R8G8B8)),
            Some(D3DFormat::A8R8G8B8)
        );
        assert_eq!(
            fallback(SurfaceKind::DepthStencil, D3DFormat::D24S8, None),
            Some(D3DFormat::D16)
        );
        assert_eq!(fallback(SurfaceKind::DepthStencil, D3DFormat::D16, None), None);
        assert_eq!(fallback(SurfaceKind::Texture, D3DFormat::X8R8G8B8, None), None);
        assert_eq!(fallback(SurfaceKind::Texture, D3DFormat::P8, None), None);
    }

    #[test]
    fn sublevels_and_faces_resolve_to_the_cube_root() {
        let mut arena = SurfaceArena::new();
        let desc = SurfaceDesc::new(
            SurfaceCaps::TEXTURE | SurfaceCaps::MIPMAP | SurfaceCaps::COMPLEX,
        )
        .with_caps2(SurfaceCaps2::CUBEMAP | SurfaceCaps2::CUBEMAP_ALLFACES)
        .with_size(8, 8)
        .with_mip_count(2)
        .with_pixel_format(PixelFormat::rgb(32, 0xFF_0000, 0xFF00, 0xFF, 0));
        let root = complex::create(&mut arena, desc, None).unwrap();

        let targets = chain_targets(&arena, root, SurfaceKind::CubeMap);
        assert_eq!(targets.len(), 12);
        for (id, sub) in &targets {
            assert_eq!(binding_root(&arena, *id), root);
            assert_eq!(
                arena.get(*id).unwrap().cube_face(),
                sub.face,
                "{id} maps to the wrong face"
            );
        }
    }

    #[test]
    fn explicit_depth_attachment_is_its_own_root() {
        let mut arena = SurfaceArena::new();
        let rt = arena.insert(
            Surface::new(SurfaceDesc::new(SurfaceCaps::THREE_D_DEVICE).with_size(4, 4), None)
                .unwrap(),
        );
        let z = arena.insert(
            Surface::new(SurfaceDesc::new(SurfaceCaps::ZBUFFER).with_size(4, 4), None).unwrap(),
        );
        arena.link(rt, z, false);
        assert_eq!(binding_root(&arena, z), z);
        assert_eq!(chain_targets(&arena, rt, SurfaceKind::RenderTarget).len(), 1);
    }
}
