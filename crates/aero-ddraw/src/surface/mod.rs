//! Legacy surface records and the arena that owns them.
//!
//! Attachment graphs (flip chains that loop back to their front buffer, mip chains, cube faces,
//! explicitly attached depth buffers) are modelled as handle edges between arena slots. A
//! [`SurfaceId`] carries a generation so a stale handle never resolves to a surface created
//! later in the same slot.

use core::fmt;

use bitflags::bitflags;

use crate::caps::{classify, CubeFace, SurfaceCaps, SurfaceCaps2, SurfaceKind};
use crate::device::ResourceId;
use crate::error::SurfaceError;
use crate::format::{D3DFormat, PixelFormat};
use crate::rebind::DeviceGeneration;

pub(crate) mod complex;
mod memory;

pub use memory::SurfaceMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}v{}", self.index, self.generation)
    }
}

bitflags! {
    /// `DDSD_*` flags: which descriptor fields are valid.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescFlags: u32 {
        const CAPS = 0x0000_0001;
        const HEIGHT = 0x0000_0002;
        const WIDTH = 0x0000_0004;
        const PITCH = 0x0000_0008;
        const BACKBUFFERCOUNT = 0x0000_0020;
        const PIXELFORMAT = 0x0000_1000;
        const CKDESTOVERLAY = 0x0000_2000;
        const CKDESTBLT = 0x0000_4000;
        const CKSRCOVERLAY = 0x0000_8000;
        const CKSRCBLT = 0x0001_0000;
        const MIPMAPCOUNT = 0x0002_0000;
        const LINEARSIZE = 0x0008_0000;
    }
}

bitflags! {
    /// `DDCKEY_*` flags selecting one of a surface's four color keys.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColorKeyFlags: u32 {
        const COLORSPACE = 0x0000_0001;
        const DESTBLT = 0x0000_0002;
        const DESTOVERLAY = 0x0000_0004;
        const SRCBLT = 0x0000_0008;
        const SRCOVERLAY = 0x0000_0010;
    }
}

/// Inclusive color-key range, in the surface's pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColorKey {
    pub low: u32,
    pub high: u32,
}

impl ColorKey {
    pub fn single(value: u32) -> Self {
        Self {
            low: value,
            high: value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorKeys {
    pub dest_blt: Option<ColorKey>,
    pub dest_overlay: Option<ColorKey>,
    pub src_blt: Option<ColorKey>,
    pub src_overlay: Option<ColorKey>,
}

impl ColorKeys {
    /// Slot addressed by `flag`. When several key flags are set the first of
    /// `DESTBLT`, `DESTOVERLAY`, `SRCBLT`, `SRCOVERLAY` wins.
    pub fn slot_mut(&mut self, flag: ColorKeyFlags) -> Option<&mut Option<ColorKey>> {
        if flag.contains(ColorKeyFlags::DESTBLT) {
            Some(&mut self.dest_blt)
        } else if flag.contains(ColorKeyFlags::DESTOVERLAY) {
            Some(&mut self.dest_overlay)
        } else if flag.contains(ColorKeyFlags::SRCBLT) {
            Some(&mut self.src_blt)
        } else if flag.contains(ColorKeyFlags::SRCOVERLAY) {
            Some(&mut self.src_overlay)
        } else {
            None
        }
    }

    pub fn get(&self, flag: ColorKeyFlags) -> Option<ColorKey> {
        if flag.contains(ColorKeyFlags::DESTBLT) {
            self.dest_blt
        } else if flag.contains(ColorKeyFlags::DESTOVERLAY) {
            self.dest_overlay
        } else if flag.contains(ColorKeyFlags::SRCBLT) {
            self.src_blt
        } else if flag.contains(ColorKeyFlags::SRCOVERLAY) {
            self.src_overlay
        } else {
            None
        }
    }

    pub(crate) fn desc_flags(&self) -> DescFlags {
        let mut flags = DescFlags::empty();
        flags.set(DescFlags::CKDESTBLT, self.dest_blt.is_some());
        flags.set(DescFlags::CKDESTOVERLAY, self.dest_overlay.is_some());
        flags.set(DescFlags::CKSRCBLT, self.src_blt.is_some());
        flags.set(DescFlags::CKSRCOVERLAY, self.src_overlay.is_some());
        flags
    }
}

/// Typed surface descriptor (`DDSURFACEDESC2`). `flags` says which fields are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceDesc {
    pub flags: DescFlags,
    pub width: u32,
    pub height: u32,
    /// Row pitch, or the total payload size for block-compressed surfaces (`LINEARSIZE`).
    pub pitch: u32,
    pub back_buffer_count: u32,
    /// Declared mip count. A hint only; the attachment chain is authoritative.
    pub mip_map_count: u32,
    pub caps: SurfaceCaps,
    pub caps2: SurfaceCaps2,
    pub pixel_format: Option<PixelFormat>,
    pub color_keys: ColorKeys,
}

impl SurfaceDesc {
    pub fn new(caps: SurfaceCaps) -> Self {
        Self {
            flags: DescFlags::CAPS,
            caps,
            ..Self::default()
        }
    }

    pub fn with_caps2(mut self, caps2: SurfaceCaps2) -> Self {
        self.caps2 = caps2;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self.flags |= DescFlags::WIDTH | DescFlags::HEIGHT;
        self
    }

    pub fn with_pitch(mut self, pitch: u32) -> Self {
        self.pitch = pitch;
        self.flags |= DescFlags::PITCH;
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = Some(pixel_format);
        self.flags |= DescFlags::PIXELFORMAT;
        self
    }

    pub fn with_back_buffers(mut self, count: u32) -> Self {
        self.back_buffer_count = count;
        self.flags |= DescFlags::BACKBUFFERCOUNT;
        self
    }

    pub fn with_mip_count(mut self, count: u32) -> Self {
        self.mip_map_count = count;
        self.flags |= DescFlags::MIPMAPCOUNT;
        self
    }

    pub fn with_color_key(mut self, flag: ColorKeyFlags, key: ColorKey) -> Self {
        if let Some(slot) = self.color_keys.slot_mut(flag) {
            *slot = Some(key);
        }
        self.flags |= self.color_keys.desc_flags();
        self
    }

    pub fn has_extent(&self) -> bool {
        self.flags.contains(DescFlags::WIDTH | DescFlags::HEIGHT)
    }
}

/// Current display mode: the implicit extent of primary surfaces and the implicit format of
/// surfaces created without a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub format: D3DFormat,
}

/// GPU object a bound surface resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackingResource {
    #[default]
    None,
    /// Lockable plain storage (offscreen-plain, overlay and generic surfaces).
    Surface(ResourceId),
    RenderTarget(ResourceId),
    DepthStencil(ResourceId),
    Texture { resource: ResourceId, level: u32 },
    CubeTexture {
        resource: ResourceId,
        face: CubeFace,
        level: u32,
    },
}

impl BackingResource {
    pub fn resource(&self) -> Option<ResourceId> {
        match *self {
            Self::None => None,
            Self::Surface(id) | Self::RenderTarget(id) | Self::DepthStencil(id) => Some(id),
            Self::Texture { resource, .. } | Self::CubeTexture { resource, .. } => Some(resource),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Binding {
    pub resource: BackingResource,
    /// Aliases (swap-chain slots, cube sibling faces, mip sublevels) do not own the GPU object.
    pub owned: bool,
}

impl Binding {
    pub const NONE: Binding = Binding {
        resource: BackingResource::None,
        owned: false,
    };

    pub fn owned(resource: BackingResource) -> Self {
        Self {
            resource,
            owned: true,
        }
    }

    pub fn alias(resource: BackingResource) -> Self {
        Self {
            resource,
            owned: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub surface: SurfaceId,
    /// Created together with the parent as part of a complex surface; destroyed with it.
    pub implicit: bool,
}

/// A replacement descriptor that passed validation. See [`Surface::prepare_override`].
#[derive(Debug)]
pub(crate) struct DescOverride {
    desc: SurfaceDesc,
    kind: SurfaceKind,
    format: Option<D3DFormat>,
    memory: SurfaceMemory,
}

#[derive(Debug)]
pub struct Surface {
    pub desc: SurfaceDesc,
    pub kind: SurfaceKind,
    /// Resolved format; `None` when the descriptor was indeterminate and no display mode was
    /// available at creation.
    pub format: Option<D3DFormat>,
    pub memory: SurfaceMemory,
    pub bound_generation: Option<DeviceGeneration>,
    pub binding: Binding,
    pub dirty: bool,
    pub parent: Option<SurfaceId>,
    pub attachments: Vec<Attachment>,
}

impl Surface {
    /// Builds a single surface record from `desc`, filling the descriptor's implicit fields.
    pub fn new(mut desc: SurfaceDesc, display: Option<DisplayMode>) -> Result<Self, SurfaceError> {
        let kind = classify(desc.caps, desc.caps2);

        if !desc.has_extent() {
            if let Some(mode) = display.filter(|_| kind == SurfaceKind::FrontBuffer) {
                desc = desc.with_size(mode.width, mode.height);
            }
        }

        let format = resolve_format(&desc, kind, display);
        if let (None, Some(format)) = (desc.pixel_format, format) {
            if let Some(pf) = crate::format::pixel_format(format) {
                desc = desc.with_pixel_format(pf);
            }
        }

        let sizing = format.unwrap_or(memory_format(kind));
        let memory = layout(&desc, sizing)?;
        sync_pitch(&mut desc, &memory, sizing);

        Ok(Self {
            desc,
            kind,
            format,
            memory,
            bound_generation: None,
            binding: Binding::NONE,
            dirty: false,
            parent: None,
            attachments: Vec::new(),
        })
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    pub fn cube_face(&self) -> Option<CubeFace> {
        CubeFace::from_caps2(self.desc.caps2)
    }

    pub fn caps_pair(&self) -> (SurfaceCaps, SurfaceCaps2) {
        (self.desc.caps, self.desc.caps2)
    }

    /// Validates a replacement descriptor and lays out its memory without touching `self`.
    pub(crate) fn prepare_override(
        &self,
        mut desc: SurfaceDesc,
    ) -> Result<DescOverride, SurfaceError> {
        let kind = classify(desc.caps, desc.caps2);
        let format = resolve_format(&desc, kind, None).or(self.format);
        let sizing = format.unwrap_or(memory_format(kind));
        let memory = layout(&desc, sizing)?;
        sync_pitch(&mut desc, &memory, sizing);
        Ok(DescOverride {
            desc,
            kind,
            format,
            memory,
        })
    }

    /// Replaces the descriptor wholesale and reclassifies. Returns whether the kind changed.
    pub(crate) fn apply_override(&mut self, prepared: DescOverride) -> bool {
        let changed = self.kind != prepared.kind;
        self.desc = prepared.desc;
        self.kind = prepared.kind;
        self.format = prepared.format;
        self.memory = prepared.memory;
        self.dirty = true;
        changed
    }

    /// Format the CPU memory is laid out in.
    pub fn memory_format(&self) -> D3DFormat {
        self.format.unwrap_or(memory_format(self.kind))
    }

    /// Settles the format of a surface bound without one. CPU memory is never re-laid out:
    /// when `format` does not share the current layout's pixel size, the current layout is
    /// kept and transfers convert. Returns the adopted format.
    pub(crate) fn adopt_format(&mut self, format: D3DFormat) -> D3DFormat {
        let current = self.memory_format();
        let adopted = if current.bits_per_pixel() == format.bits_per_pixel()
            && current.is_block_compressed() == format.is_block_compressed()
        {
            format
        } else {
            current
        };
        self.format = Some(adopted);
        if self.desc.pixel_format.is_none() {
            if let Some(pf) = crate::format::pixel_format(adopted) {
                self.desc = self.desc.with_pixel_format(pf);
            }
        }
        adopted
    }
}

fn layout(desc: &SurfaceDesc, format: D3DFormat) -> Result<SurfaceMemory, SurfaceError> {
    SurfaceMemory::new(
        format,
        desc.width,
        desc.height,
        desc.flags.contains(DescFlags::PITCH).then_some(desc.pitch),
    )
    .ok_or(SurfaceError::InvalidDescriptor("surface size overflows"))
}

fn resolve_format(
    desc: &SurfaceDesc,
    kind: SurfaceKind,
    display: Option<DisplayMode>,
) -> Option<D3DFormat> {
    match desc.pixel_format {
        Some(pf) => crate::format::translate(&pf),
        None if kind == SurfaceKind::DepthStencil => None,
        None => display.map(|mode| mode.format),
    }
}

/// Format used to size CPU memory while the real format is still unknown.
fn memory_format(kind: SurfaceKind) -> D3DFormat {
    if kind == SurfaceKind::DepthStencil {
        crate::format::FALLBACK_DEPTH_FORMAT
    } else {
        crate::format::FALLBACK_FORMAT
    }
}

fn sync_pitch(desc: &mut SurfaceDesc, memory: &SurfaceMemory, format: D3DFormat) {
    if format.is_block_compressed() {
        desc.flags.remove(DescFlags::PITCH);
        desc.flags |= DescFlags::LINEARSIZE;
        desc.pitch = memory.len() as u32;
    } else {
        desc.flags.remove(DescFlags::LINEARSIZE);
        desc.flags |= DescFlags::PITCH;
        desc.pitch = memory.pitch();
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    surface: Option<Surface>,
}

/// Generational arena of surfaces.
#[derive(Debug, Default)]
pub struct SurfaceArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl SurfaceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, surface: Surface) -> SurfaceId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.surface = Some(surface);
            return SurfaceId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            surface: Some(surface),
        });
        SurfaceId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.surface.as_ref())
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.surface.as_mut())
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let surface = slot.surface.take()?;
        self.free.push(id.index);
        Some(surface)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.surface.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.surface.as_ref().map(|_| SurfaceId {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    /// Adds an edge `parent -> child`. Implicit edges also make `parent` the child's owner.
    pub(crate) fn link(&mut self, parent: SurfaceId, child: SurfaceId, implicit: bool) {
        if let Some(p) = self.get_mut(parent) {
            p.attachments.push(Attachment {
                surface: child,
                implicit,
            });
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = Some(parent);
        }
    }

    /// Adds an edge that neither owns nor parents `child` (the flip-chain edge back to the
    /// front buffer).
    pub(crate) fn link_weak(&mut self, from: SurfaceId, to: SurfaceId) {
        if let Some(p) = self.get_mut(from) {
            p.attachments.push(Attachment {
                surface: to,
                implicit: false,
            });
        }
    }

    /// Removes the edge `parent -> child`, returning whether it existed.
    pub(crate) fn unlink(&mut self, parent: SurfaceId, child: SurfaceId) -> bool {
        let Some(p) = self.get_mut(parent) else {
            return false;
        };
        let before = p.attachments.len();
        p.attachments.retain(|a| a.surface != child);
        let removed = p.attachments.len() != before;
        if let Some(c) = self.get_mut(child) {
            if c.parent == Some(parent) {
                c.parent = None;
            }
        }
        removed
    }
}
