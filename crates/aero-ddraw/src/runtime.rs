//! Public entry points.
//!
//! [`DdrawRuntime`] owns the surface arena and the (optional) device context behind one
//! recursive lock. Every entry point takes the lock for its whole duration; callers that need
//! several calls to appear atomic hold [`DdrawRuntime::lock`] across them.

use std::cell::RefCell;
use std::sync::Arc;

use bitflags::bitflags;
use hashbrown::HashSet;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::debug;

use crate::binder::{drop_binding, BindOutcome, UploadOutcome};
use crate::caps::{SurfaceCaps, SurfaceKind};
use crate::config::CompatOptions;
use crate::context::{DeviceContext, LegacyDeviceType};
use crate::device::{GpuDevice, ResourceId};
use crate::error::{BindError, SurfaceError};
use crate::flip::enumerate_back_buffers;
use crate::format::D3DFormat;
use crate::rebind::DeviceGeneration;
use crate::stats::BindingStats;
use crate::surface::{
    complex, BackingResource, Binding, ColorKey, ColorKeyFlags, DescFlags, DisplayMode,
    SurfaceArena, SurfaceDesc, SurfaceId,
};

bitflags! {
    /// `DDLOCK_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LockFlags: u32 {
        const WAIT = 0x0000_0001;
        const READONLY = 0x0000_0010;
        const WRITEONLY = 0x0000_0020;
        const DISCARDCONTENTS = 0x0000_2000;
    }
}

/// CPU view of a surface handed to [`DdrawRuntime::lock_surface`] closures.
#[derive(Debug)]
pub struct LockedSurface<'a> {
    pub width: u32,
    pub height: u32,
    /// Row pitch, or the payload size for block-compressed formats.
    pub pitch: u32,
    pub format: Option<D3DFormat>,
    pub bytes: &'a mut [u8],
}

pub(crate) struct RuntimeState<D> {
    pub(crate) arena: SurfaceArena,
    pub(crate) context: Option<DeviceContext<D>>,
    pub(crate) display: Option<DisplayMode>,
    /// Most recently created primary surface; the head of the flip chain.
    pub(crate) primary: Option<SurfaceId>,
    pub(crate) options: CompatOptions,
    pub(crate) stats: Arc<BindingStats>,
}

impl<D: GpuDevice> RuntimeState<D> {
    fn surface_desc(&self, id: SurfaceId) -> Result<&SurfaceDesc, SurfaceError> {
        self.arena
            .get(id)
            .map(|s| &s.desc)
            .ok_or(SurfaceError::UnknownSurface(id))
    }

    fn enumerate_slots(&mut self) {
        let force_single = self.options.force_single_back_buffer;
        let primary = self.primary;
        if let Some(ctx) = self.context.as_mut() {
            ctx.slots =
                enumerate_back_buffers(&self.arena, primary, ctx.device_mut(), force_single);
        }
    }

    fn install_context(&mut self, ctx: DeviceContext<D>) -> DeviceGeneration {
        let generation = ctx.generation();
        self.context = Some(ctx);
        self.enumerate_slots();
        generation
    }

    fn backing(&mut self, id: SurfaceId) -> Result<BackingResource, BindError> {
        self.refresh(id)?;
        self.arena
            .get(id)
            .map(|s| s.binding.resource)
            .ok_or(BindError::UnknownSurface(id))
    }

    fn bound_backing(&mut self, id: SurfaceId) -> Result<BackingResource, BindError> {
        self.ensure_bound(id)?;
        self.backing(id)
    }

    /// Binds the explicitly attached depth buffer of `rt` and makes it current.
    fn bind_attached_depth(&mut self, rt: SurfaceId) -> Result<(), BindError> {
        let depth = self.arena.get(rt).and_then(|surface| {
            surface
                .attachments
                .iter()
                .filter(|a| !a.implicit)
                .map(|a| a.surface)
                .find(|&id| {
                    self.arena
                        .get(id)
                        .is_some_and(|s| s.kind == SurfaceKind::DepthStencil)
                })
        });
        if let Some(depth) = depth {
            self.ensure_bound(depth)?;
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.depth_stencil = depth;
        }
        Ok(())
    }

    fn release_surface(&mut self, id: SurfaceId) -> Result<usize, SurfaceError> {
        if !self.arena.contains(id) {
            return Err(SurfaceError::UnknownSurface(id));
        }

        // Everything owned through implicit edges goes with `id`.
        let mut doomed = vec![id];
        let mut seen = HashSet::new();
        seen.insert(id);
        let mut cursor = 0;
        while cursor < doomed.len() {
            let cur = doomed[cursor];
            cursor += 1;
            if let Some(surface) = self.arena.get(cur) {
                for child in surface.attachments.iter().filter(|a| a.implicit) {
                    if seen.insert(child.surface) {
                        doomed.push(child.surface);
                    }
                }
            }
        }

        let mut released = HashSet::new();
        for &cur in &doomed {
            self.refresh(cur)?;
            let Some(surface) = self.arena.get(cur) else {
                continue;
            };
            if surface.binding.owned {
                if let Some(resource) = surface.binding.resource.resource() {
                    released.insert(resource);
                }
            }
            let RuntimeState {
                arena,
                context,
                stats,
                ..
            } = self;
            if let Some(ctx) = context.as_mut() {
                drop_binding(arena, ctx.device_mut(), stats, cur);
            }
        }

        let survivors: Vec<SurfaceId> = self.arena.ids().filter(|s| !seen.contains(s)).collect();
        for survivor in survivors {
            if let Some(surface) = self.arena.get_mut(survivor) {
                surface.attachments.retain(|a| !seen.contains(&a.surface));
                if surface.parent.is_some_and(|p| seen.contains(&p)) {
                    surface.parent = None;
                }
                if surface
                    .binding
                    .resource
                    .resource()
                    .is_some_and(|r| released.contains(&r))
                {
                    surface.binding = Binding::NONE;
                }
            }
        }

        if let Some(ctx) = self.context.as_mut() {
            if ctx.render_target.is_some_and(|s| seen.contains(&s)) {
                ctx.render_target = None;
            }
            if ctx.depth_stencil.is_some_and(|s| seen.contains(&s)) {
                ctx.depth_stencil = None;
            }
            ctx.slots.slots.retain(|s, _| !seen.contains(s));
        }
        if self.primary.is_some_and(|p| seen.contains(&p)) {
            self.primary = None;
        }

        for &cur in &doomed {
            self.arena.remove(cur);
        }
        debug!(surface = %id, destroyed = doomed.len(), "released surface");
        Ok(doomed.len())
    }
}

/// Guard returned by [`DdrawRuntime::lock`]. Other entry points may still be called on the
/// same thread while it is held.
pub struct RuntimeLock<'a, D> {
    _guard: ReentrantMutexGuard<'a, RefCell<RuntimeState<D>>>,
}

/// Surface binding runtime for one legacy DirectDraw object.
///
/// Closures passed to [`DdrawRuntime::lock_surface`] and [`DdrawRuntime::with_device`] run
/// with the runtime state borrowed and must not call back into the runtime; doing so panics.
pub struct DdrawRuntime<D> {
    state: ReentrantMutex<RefCell<RuntimeState<D>>>,
    stats: Arc<BindingStats>,
}

impl<D: GpuDevice> Default for DdrawRuntime<D> {
    fn default() -> Self {
        Self::new(CompatOptions::default())
    }
}

impl<D: GpuDevice> DdrawRuntime<D> {
    pub fn new(options: CompatOptions) -> Self {
        let stats = Arc::new(BindingStats::new());
        Self {
            state: ReentrantMutex::new(RefCell::new(RuntimeState {
                arena: SurfaceArena::new(),
                context: None,
                display: None,
                primary: None,
                options,
                stats: Arc::clone(&stats),
            })),
            stats,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RuntimeState<D>) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Holds the runtime lock until the guard drops.
    pub fn lock(&self) -> RuntimeLock<'_, D> {
        RuntimeLock {
            _guard: self.state.lock(),
        }
    }

    pub fn stats(&self) -> Arc<BindingStats> {
        Arc::clone(&self.stats)
    }

    pub fn options(&self) -> CompatOptions {
        self.with_state(|s| s.options)
    }

    pub fn set_display_mode(&self, width: u32, height: u32, format: D3DFormat) {
        self.with_state(|s| {
            s.display = Some(DisplayMode {
                width,
                height,
                format,
            });
        });
    }

    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.with_state(|s| s.display)
    }

    // ---------------------------------------------------------------------
    // Device lifecycle
    // ---------------------------------------------------------------------

    /// Attaches a device. Any previous device is dropped and every existing binding becomes
    /// stale.
    pub fn create_device(&self, device: D, device_type: LegacyDeviceType) -> DeviceGeneration {
        self.with_state(|s| {
            let generation = s.install_context(DeviceContext::new(device, device_type));
            debug!(%generation, ?device_type, "device created");
            generation
        })
    }

    /// Replaces the device wholesale (mode switch, swap-chain reset). Render-target and
    /// depth-stencil selections carry over and rebind lazily.
    pub fn reset_device(&self, device: D) -> DeviceGeneration {
        self.with_state(|s| {
            let previous = s.context.take();
            let device_type = previous
                .as_ref()
                .map(DeviceContext::device_type)
                .unwrap_or_default();
            let mut ctx = DeviceContext::new(device, device_type);
            if let Some(previous) = previous {
                ctx.render_target = previous.render_target;
                ctx.depth_stencil = previous.depth_stencil;
            }
            let generation = s.install_context(ctx);
            debug!(%generation, "device reset");
            generation
        })
    }

    /// Detaches the device and hands it back. Bindings become stale.
    pub fn release_device(&self) -> Option<D> {
        self.with_state(|s| s.context.take().map(DeviceContext::into_device))
    }

    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> Option<R> {
        self.with_state(|s| s.context.as_mut().map(|ctx| f(ctx.device_mut())))
    }

    pub fn device_generation(&self) -> Option<DeviceGeneration> {
        self.with_state(|s| s.context.as_ref().map(DeviceContext::generation))
    }

    // ---------------------------------------------------------------------
    // Surface lifecycle
    // ---------------------------------------------------------------------

    /// Creates a surface (plus the implicit attachments of a complex request) and returns the
    /// primary surface of the group.
    pub fn create_surface(&self, desc: SurfaceDesc) -> Result<SurfaceId, SurfaceError> {
        self.with_state(|s| {
            let id = complex::create(&mut s.arena, desc, s.display)?;
            let primary = desc.caps.contains(SurfaceCaps::PRIMARYSURFACE);
            if primary {
                s.primary = Some(id);
                s.enumerate_slots();
            }
            debug!(surface = %id, caps = ?desc.caps, primary, "created surface");
            Ok(id)
        })
    }

    /// Destroys `id` and its implicit attachments. Explicit attachments are detached.
    pub fn release_surface(&self, id: SurfaceId) -> Result<(), SurfaceError> {
        self.with_state(|s| s.release_surface(id).map(|_| ()))
    }

    pub fn surface_count(&self) -> usize {
        self.with_state(|s| s.arena.len())
    }

    pub fn add_attached_surface(
        &self,
        parent: SurfaceId,
        child: SurfaceId,
    ) -> Result<(), SurfaceError> {
        self.with_state(|s| {
            if parent == child {
                return Err(SurfaceError::CannotAttachToSelf);
            }
            s.surface_desc(parent)?;
            let child_surface = s
                .arena
                .get(child)
                .ok_or(SurfaceError::UnknownSurface(child))?;
            if child_surface.parent.is_some() {
                return Err(SurfaceError::AlreadyAttached(child));
            }
            let child_kind = child_surface.kind;
            s.arena.link(parent, child, false);

            if let Some(ctx) = s.context.as_mut() {
                if child_kind == SurfaceKind::DepthStencil && ctx.render_target == Some(parent) {
                    ctx.depth_stencil = Some(child);
                }
            }
            Ok(())
        })
    }

    pub fn delete_attached_surface(
        &self,
        parent: SurfaceId,
        child: SurfaceId,
    ) -> Result<(), SurfaceError> {
        self.with_state(|s| {
            s.surface_desc(parent)?;
            if !s.arena.unlink(parent, child) {
                return Err(SurfaceError::NotAttached { parent, child });
            }
            if let Some(ctx) = s.context.as_mut() {
                if ctx.render_target == Some(parent) && ctx.depth_stencil == Some(child) {
                    ctx.depth_stencil = None;
                }
            }
            Ok(())
        })
    }

    /// First attachment of `id` whose caps contain `caps`.
    pub fn attached_surface(
        &self,
        id: SurfaceId,
        caps: SurfaceCaps,
    ) -> Result<Option<SurfaceId>, SurfaceError> {
        self.with_state(|s| {
            let surface = s.arena.get(id).ok_or(SurfaceError::UnknownSurface(id))?;
            Ok(surface
                .attachments
                .iter()
                .map(|a| a.surface)
                .find(|&child| {
                    s.arena
                        .get(child)
                        .is_some_and(|c| c.desc.caps.contains(caps))
                }))
        })
    }

    /// Every surface attached to `id`, in attachment order.
    pub fn attached_surfaces(&self, id: SurfaceId) -> Result<Vec<SurfaceId>, SurfaceError> {
        self.with_state(|s| {
            let surface = s.arena.get(id).ok_or(SurfaceError::UnknownSurface(id))?;
            Ok(surface.attachments.iter().map(|a| a.surface).collect())
        })
    }

    pub fn surface_desc(&self, id: SurfaceId) -> Result<SurfaceDesc, SurfaceError> {
        self.with_state(|s| s.surface_desc(id).copied())
    }

    pub fn surface_kind(&self, id: SurfaceId) -> Result<SurfaceKind, SurfaceError> {
        self.with_state(|s| {
            s.arena
                .get(id)
                .map(|surface| surface.kind)
                .ok_or(SurfaceError::UnknownSurface(id))
        })
    }

    pub fn is_dirty(&self, id: SurfaceId) -> Result<bool, SurfaceError> {
        self.with_state(|s| {
            s.arena
                .get(id)
                .map(|surface| surface.dirty)
                .ok_or(SurfaceError::UnknownSurface(id))
        })
    }

    /// Replaces a surface's descriptor. The surface is reclassified; if its kind, extent or
    /// format changed, its resource is released and recreated on the next bind. A descriptor
    /// whose layout overflows is rejected before anything changes.
    pub fn set_surface_desc(&self, id: SurfaceId, desc: SurfaceDesc) -> Result<(), SurfaceError> {
        self.with_state(|s| {
            let before = s
                .arena
                .get(id)
                .map(|surface| (surface.kind, surface.extent(), surface.format))
                .ok_or(SurfaceError::UnknownSurface(id))?;
            let prepared = s
                .arena
                .get(id)
                .ok_or(SurfaceError::UnknownSurface(id))?
                .prepare_override(desc)?;
            // Release under the old classification so the whole old chain is cleared.
            s.unbind(id)?;
            let surface = s.arena.get_mut(id).ok_or(SurfaceError::UnknownSurface(id))?;
            surface.apply_override(prepared);
            let after = (surface.kind, surface.extent(), surface.format);
            debug!(surface = %id, ?before, ?after, "descriptor overridden");
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // CPU access
    // ---------------------------------------------------------------------

    /// Runs `f` over the surface's CPU memory. Unless `READONLY` is given the surface is dirty
    /// afterwards. Under proxied presentation, render-target-backed surfaces are first read
    /// back from the device, unless CPU writes are still pending, in which case those are
    /// pushed instead.
    pub fn lock_surface<R>(
        &self,
        id: SurfaceId,
        flags: LockFlags,
        f: impl FnOnce(&mut LockedSurface<'_>) -> R,
    ) -> Result<R, SurfaceError> {
        self.with_state(|s| {
            if s.options.proxied_presentation
                && !flags.intersects(LockFlags::WRITEONLY | LockFlags::DISCARDCONTENTS)
                && matches!(s.backing(id)?, BackingResource::RenderTarget(_))
            {
                if s.arena.get(id).is_some_and(|surface| surface.dirty) {
                    s.upload(id)?;
                } else {
                    s.download(id)?;
                }
            }

            let surface = s.arena.get_mut(id).ok_or(SurfaceError::UnknownSurface(id))?;
            let (width, height) = surface.extent();
            let mut locked = LockedSurface {
                width,
                height,
                pitch: surface.desc.pitch,
                format: surface.format,
                bytes: surface.memory.bytes_mut(),
            };
            let out = f(&mut locked);
            if !flags.contains(LockFlags::READONLY) {
                surface.dirty = true;
            }
            Ok(out)
        })
    }

    /// Copies `bytes` over the start of the surface's CPU memory. Returns the byte count copied.
    pub fn write_surface(&self, id: SurfaceId, bytes: &[u8]) -> Result<usize, SurfaceError> {
        self.lock_surface(id, LockFlags::WRITEONLY, |locked| {
            let len = bytes.len().min(locked.bytes.len());
            locked.bytes[..len].copy_from_slice(&bytes[..len]);
            len
        })
    }

    pub fn read_surface(&self, id: SurfaceId) -> Result<Vec<u8>, SurfaceError> {
        self.lock_surface(id, LockFlags::READONLY, |locked| locked.bytes.to_vec())
    }

    pub fn set_color_key(
        &self,
        id: SurfaceId,
        flags: ColorKeyFlags,
        key: Option<ColorKey>,
    ) -> Result<(), SurfaceError> {
        self.with_state(|s| {
            let surface = s.arena.get_mut(id).ok_or(SurfaceError::UnknownSurface(id))?;
            let desc = &mut surface.desc;
            *desc.color_keys.slot_mut(flags).ok_or(SurfaceError::NoColorKeyFlag)? = key;
            desc.flags.remove(
                DescFlags::CKDESTBLT
                    | DescFlags::CKDESTOVERLAY
                    | DescFlags::CKSRCBLT
                    | DescFlags::CKSRCOVERLAY,
            );
            desc.flags |= desc.color_keys.desc_flags();
            Ok(())
        })
    }

    pub fn color_key(
        &self,
        id: SurfaceId,
        flag: ColorKeyFlags,
    ) -> Result<Option<ColorKey>, SurfaceError> {
        self.with_state(|s| Ok(s.surface_desc(id)?.color_keys.get(flag)))
    }

    // ---------------------------------------------------------------------
    // Binding
    // ---------------------------------------------------------------------

    /// Makes sure `id` has a backing resource on the current device and that its CPU content
    /// has been pushed.
    pub fn ensure_bound(&self, id: SurfaceId) -> Result<BindOutcome, BindError> {
        self.with_state(|s| s.ensure_bound(id))
    }

    /// Pushes dirty CPU content of `id`'s chain to its resource.
    pub fn upload(&self, id: SurfaceId) -> Result<UploadOutcome, BindError> {
        self.with_state(|s| s.upload(id))
    }

    /// Reads `id`'s chain back from its resource into CPU memory.
    pub fn download(&self, id: SurfaceId) -> Result<UploadOutcome, BindError> {
        self.with_state(|s| s.download(id))
    }

    /// Drops `id`'s binding if it was made under a previous device. Returns whether it did.
    pub fn refresh_binding(&self, id: SurfaceId) -> Result<bool, BindError> {
        self.with_state(|s| s.refresh(id))
    }

    /// The current binding of `id`, without binding it.
    pub fn backing(&self, id: SurfaceId) -> Result<BackingResource, BindError> {
        self.with_state(|s| s.backing(id))
    }

    pub fn render_target_resource(&self, id: SurfaceId) -> Result<Option<ResourceId>, BindError> {
        self.with_state(|s| {
            Ok(match s.bound_backing(id)? {
                BackingResource::RenderTarget(resource) => Some(resource),
                _ => None,
            })
        })
    }

    pub fn depth_stencil_resource(&self, id: SurfaceId) -> Result<Option<ResourceId>, BindError> {
        self.with_state(|s| {
            Ok(match s.bound_backing(id)? {
                BackingResource::DepthStencil(resource) => Some(resource),
                _ => None,
            })
        })
    }

    pub fn texture_resource(&self, id: SurfaceId) -> Result<Option<ResourceId>, BindError> {
        self.with_state(|s| {
            Ok(match s.bound_backing(id)? {
                BackingResource::Texture { resource, .. } => Some(resource),
                _ => None,
            })
        })
    }

    pub fn cube_texture_resource(&self, id: SurfaceId) -> Result<Option<ResourceId>, BindError> {
        self.with_state(|s| {
            Ok(match s.bound_backing(id)? {
                BackingResource::CubeTexture { resource, .. } => Some(resource),
                _ => None,
            })
        })
    }

    pub fn surface_resource(&self, id: SurfaceId) -> Result<Option<ResourceId>, BindError> {
        self.with_state(|s| {
            Ok(match s.bound_backing(id)? {
                BackingResource::Surface(resource) => Some(resource),
                _ => None,
            })
        })
    }

    /// Selects `id` as the render target, binding it and its attached depth buffer. On failure
    /// the previous render-target and depth-stencil selections stay current.
    pub fn set_render_target(&self, id: SurfaceId) -> Result<BindOutcome, BindError> {
        self.with_state(|s| {
            if !s.arena.contains(id) {
                return Err(BindError::UnknownSurface(id));
            }
            let Some(ctx) = s.context.as_mut() else {
                return Ok(BindOutcome::Deferred);
            };
            // Selected before binding: a surface of unknown kind aliases the back buffer only
            // while it is the render target.
            let previous = (ctx.render_target.replace(id), ctx.depth_stencil);
            let result = s
                .ensure_bound(id)
                .and_then(|outcome| s.bind_attached_depth(id).map(|()| outcome));
            if result.is_err() {
                if let Some(ctx) = s.context.as_mut() {
                    (ctx.render_target, ctx.depth_stencil) = previous;
                }
            }
            result
        })
    }

    /// Selects (or clears) the current depth-stencil surface. Returns the bind outcome of the
    /// new selection, `None` when clearing.
    pub fn set_depth_stencil(
        &self,
        id: Option<SurfaceId>,
    ) -> Result<Option<BindOutcome>, BindError> {
        self.with_state(|s| {
            if let Some(id) = id.filter(|id| !s.arena.contains(*id)) {
                return Err(BindError::UnknownSurface(id));
            }
            if s.context.is_none() {
                return Ok(id.map(|_| BindOutcome::Deferred));
            }
            let outcome = id.map(|id| s.ensure_bound(id)).transpose()?;
            if let Some(ctx) = s.context.as_mut() {
                ctx.depth_stencil = id;
            }
            Ok(outcome)
        })
    }

    pub fn render_target(&self) -> Option<SurfaceId> {
        self.with_state(|s| s.context.as_ref().and_then(DeviceContext::render_target))
    }

    pub fn depth_stencil(&self) -> Option<SurfaceId> {
        self.with_state(|s| s.context.as_ref().and_then(DeviceContext::depth_stencil))
    }

    /// Swap-chain slot assigned to `id` by the last flip-chain enumeration.
    pub fn back_buffer_slot(&self, id: SurfaceId) -> Option<u32> {
        self.with_state(|s| s.context.as_ref().and_then(|ctx| ctx.slots().slot(id)))
    }
}
