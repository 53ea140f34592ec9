//! Capability flags and the surface-kind classifier.
//!
//! Legacy capability bits are not mutually exclusive (a flip-chain front buffer carries
//! `PRIMARYSURFACE | FRONTBUFFER | FLIP | COMPLEX | 3DDEVICE`), so every surface is reduced to a
//! single [`SurfaceKind`] once, at creation or descriptor override, and the rest of the engine
//! dispatches on that.

use bitflags::bitflags;

bitflags! {
    /// `DDSCAPS_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceCaps: u32 {
        const ALPHA = 0x0000_0002;
        const BACKBUFFER = 0x0000_0004;
        const COMPLEX = 0x0000_0008;
        const FLIP = 0x0000_0010;
        const FRONTBUFFER = 0x0000_0020;
        const OFFSCREENPLAIN = 0x0000_0040;
        const OVERLAY = 0x0000_0080;
        const PALETTE = 0x0000_0100;
        const PRIMARYSURFACE = 0x0000_0200;
        const SYSTEMMEMORY = 0x0000_0800;
        const TEXTURE = 0x0000_1000;
        const THREE_D_DEVICE = 0x0000_2000;
        const VIDEOMEMORY = 0x0000_4000;
        const VISIBLE = 0x0000_8000;
        const WRITEONLY = 0x0001_0000;
        const ZBUFFER = 0x0002_0000;
        const OWNDC = 0x0004_0000;
        const MIPMAP = 0x0040_0000;
        const ALLOCONLOAD = 0x0400_0000;
        const NONLOCALVIDMEM = 0x0800_0000;
        const LOCALVIDMEM = 0x1000_0000;
    }
}

bitflags! {
    /// `DDSCAPS2_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceCaps2: u32 {
        const TEXTUREMANAGE = 0x0000_0010;
        const CUBEMAP = 0x0000_0200;
        const CUBEMAP_POSITIVEX = 0x0000_0400;
        const CUBEMAP_NEGATIVEX = 0x0000_0800;
        const CUBEMAP_POSITIVEY = 0x0000_1000;
        const CUBEMAP_NEGATIVEY = 0x0000_2000;
        const CUBEMAP_POSITIVEZ = 0x0000_4000;
        const CUBEMAP_NEGATIVEZ = 0x0000_8000;
        const CUBEMAP_ALLFACES = 0x0000_FC00;
        const MIPMAPSUBLEVEL = 0x0001_0000;
        const D3DTEXTUREMANAGE = 0x0002_0000;
    }
}

/// The single role a surface plays, derived from its capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    FrontBuffer,
    /// Back buffer or any other flippable surface.
    BackBuffer,
    DepthStencil,
    CubeMap,
    Texture,
    /// 3-D capable surface that is not part of a flip chain.
    RenderTarget,
    OffscreenPlain,
    Overlay,
    Unknown,
}

impl SurfaceKind {
    /// Kinds that may be bound as a color render target.
    pub fn is_render_target_eligible(self) -> bool {
        matches!(
            self,
            Self::FrontBuffer | Self::BackBuffer | Self::RenderTarget
        )
    }

    /// Kinds whose backing resource is a swap-chain slot rather than an allocation.
    pub fn is_swap_chain_alias(self) -> bool {
        matches!(self, Self::FrontBuffer | Self::BackBuffer)
    }

    /// Kinds that never receive CPU uploads. Swap-chain buffers do: writes through a locked
    /// primary or back buffer land in the aliased device back buffer.
    pub fn skips_upload(self) -> bool {
        self == Self::DepthStencil
    }

    pub fn is_textured(self) -> bool {
        matches!(self, Self::Texture | Self::CubeMap)
    }
}

/// Derives the kind of a surface. First match wins.
pub fn classify(caps: SurfaceCaps, caps2: SurfaceCaps2) -> SurfaceKind {
    if caps.intersects(SurfaceCaps::PRIMARYSURFACE | SurfaceCaps::FRONTBUFFER) {
        SurfaceKind::FrontBuffer
    } else if caps.intersects(SurfaceCaps::BACKBUFFER | SurfaceCaps::FLIP) {
        SurfaceKind::BackBuffer
    } else if caps.contains(SurfaceCaps::ZBUFFER) {
        SurfaceKind::DepthStencil
    } else if caps2.contains(SurfaceCaps2::CUBEMAP) {
        SurfaceKind::CubeMap
    } else if caps.contains(SurfaceCaps::TEXTURE) {
        SurfaceKind::Texture
    } else if caps.contains(SurfaceCaps::THREE_D_DEVICE) {
        SurfaceKind::RenderTarget
    } else if caps.contains(SurfaceCaps::OFFSCREENPLAIN) {
        SurfaceKind::OffscreenPlain
    } else if caps.contains(SurfaceCaps::OVERLAY) {
        SurfaceKind::Overlay
    } else {
        SurfaceKind::Unknown
    }
}

/// One face of a cube texture, in D3D9 face-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn caps2(self) -> SurfaceCaps2 {
        match self {
            Self::PositiveX => SurfaceCaps2::CUBEMAP_POSITIVEX,
            Self::NegativeX => SurfaceCaps2::CUBEMAP_NEGATIVEX,
            Self::PositiveY => SurfaceCaps2::CUBEMAP_POSITIVEY,
            Self::NegativeY => SurfaceCaps2::CUBEMAP_NEGATIVEY,
            Self::PositiveZ => SurfaceCaps2::CUBEMAP_POSITIVEZ,
            Self::NegativeZ => SurfaceCaps2::CUBEMAP_NEGATIVEZ,
        }
    }

    /// The face a cube surface represents. A surface carrying several face bits (the creation
    /// request for a whole cube) is its first face.
    pub fn from_caps2(caps2: SurfaceCaps2) -> Option<Self> {
        if !caps2.contains(SurfaceCaps2::CUBEMAP) {
            return None;
        }
        Self::ALL.into_iter().find(|face| caps2.contains(face.caps2()))
    }
}

/// Whether `child`, attached to `parent`, is a mip sublevel of it rather than a sibling cube
/// face or an unrelated attachment.
pub fn is_mip_sublevel(
    parent: (SurfaceCaps, SurfaceCaps2),
    child: (SurfaceCaps, SurfaceCaps2),
) -> bool {
    let (child_caps, child_caps2) = child;
    if child_caps2.contains(SurfaceCaps2::MIPMAPSUBLEVEL) {
        return true;
    }
    child_caps.contains(SurfaceCaps::MIPMAP)
        && child_caps.contains(SurfaceCaps::TEXTURE)
        && CubeFace::from_caps2(parent.1) == CubeFace::from_caps2(child_caps2)
        && !child_caps2.contains(SurfaceCaps2::CUBEMAP_ALLFACES)
}
