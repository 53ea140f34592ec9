//! Legacy pixel-format descriptors and their translation to D3D9-style format enumerants.
//!
//! DirectDraw describes pixel layouts with a `DDPIXELFORMAT`-shaped record (flags, FourCC,
//! bit count, channel masks). The modern device speaks in closed format enumerants, so every
//! surface resolves its descriptor once through [`translate`].

use bitflags::bitflags;

const fn fourcc(tag: &[u8; 4]) -> u32 {
    (tag[0] as u32) | ((tag[1] as u32) << 8) | ((tag[2] as u32) << 16) | ((tag[3] as u32) << 24)
}

pub const FOURCC_DXT1: u32 = fourcc(b"DXT1");
pub const FOURCC_DXT2: u32 = fourcc(b"DXT2");
pub const FOURCC_DXT3: u32 = fourcc(b"DXT3");
pub const FOURCC_DXT4: u32 = fourcc(b"DXT4");
pub const FOURCC_DXT5: u32 = fourcc(b"DXT5");
pub const FOURCC_UYVY: u32 = fourcc(b"UYVY");
pub const FOURCC_YUY2: u32 = fourcc(b"YUY2");

/// Format used when neither the descriptor, the display mode nor the swap chain can supply one.
pub const FALLBACK_FORMAT: D3DFormat = D3DFormat::X8R8G8B8;

/// Depth format used when a depth surface carries no usable depth descriptor.
pub const FALLBACK_DEPTH_FORMAT: D3DFormat = D3DFormat::D16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum D3DFormat {
    Unknown = 0,
    R8G8B8 = 20,
    A8R8G8B8 = 21,
    X8R8G8B8 = 22,
    R5G6B5 = 23,
    X1R5G5B5 = 24,
    A1R5G5B5 = 25,
    A4R4G4B4 = 26,
    R3G3B2 = 27,
    A8 = 28,
    X4R4G4B4 = 30,
    A8B8G8R8 = 32,
    X8B8G8R8 = 33,
    P8 = 41,
    L8 = 50,
    A8L8 = 51,
    A4L4 = 52,
    V8U8 = 60,
    L6V5U5 = 61,
    X8L8V8U8 = 62,
    D16Lockable = 70,
    D32 = 71,
    D15S1 = 73,
    D24S8 = 75,
    D24X8 = 77,
    D24X4S4 = 79,
    D16 = 80,
    Uyvy = FOURCC_UYVY,
    Yuy2 = FOURCC_YUY2,
    Dxt1 = FOURCC_DXT1,
    Dxt2 = FOURCC_DXT2,
    Dxt3 = FOURCC_DXT3,
    Dxt4 = FOURCC_DXT4,
    Dxt5 = FOURCC_DXT5,
}

impl D3DFormat {
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Dxt1 => 4,
            Self::Dxt2 | Self::Dxt3 | Self::Dxt4 | Self::Dxt5 => 8,
            Self::R3G3B2 | Self::A8 | Self::P8 | Self::L8 | Self::A4L4 => 8,
            Self::R5G6B5
            | Self::X1R5G5B5
            | Self::A1R5G5B5
            | Self::A4R4G4B4
            | Self::X4R4G4B4
            | Self::A8L8
            | Self::V8U8
            | Self::L6V5U5
            | Self::D16Lockable
            | Self::D15S1
            | Self::D16
            | Self::Uyvy
            | Self::Yuy2 => 16,
            Self::R8G8B8 => 24,
            Self::A8R8G8B8
            | Self::X8R8G8B8
            | Self::A8B8G8R8
            | Self::X8B8G8R8
            | Self::X8L8V8U8
            | Self::D32
            | Self::D24S8
            | Self::D24X8
            | Self::D24X4S4 => 32,
        }
    }

    pub fn is_block_compressed(self) -> bool {
        self.block_bytes().is_some()
    }

    /// Bytes per 4x4 block for BC formats.
    pub fn block_bytes(self) -> Option<u32> {
        match self {
            Self::Dxt1 => Some(8),
            Self::Dxt2 | Self::Dxt3 | Self::Dxt4 | Self::Dxt5 => Some(16),
            _ => None,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Self::D16Lockable
                | Self::D32
                | Self::D15S1
                | Self::D24S8
                | Self::D24X8
                | Self::D24X4S4
                | Self::D16
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D15S1 | Self::D24S8 | Self::D24X4S4)
    }

    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            Self::A8R8G8B8
                | Self::A8B8G8R8
                | Self::A1R5G5B5
                | Self::A4R4G4B4
                | Self::A8
                | Self::A8L8
                | Self::A4L4
                | Self::Dxt1
                | Self::Dxt2
                | Self::Dxt3
                | Self::Dxt4
                | Self::Dxt5
        )
    }

    /// Tightly packed bytes per row (per block row for BC formats). `None` when the row does
    /// not fit in a `u32`.
    pub fn checked_row_bytes(self, width: u32) -> Option<u32> {
        match self.block_bytes() {
            Some(block) => width.div_ceil(4).max(1).checked_mul(block),
            None => {
                let bits = u64::from(width) * u64::from(self.bits_per_pixel());
                u32::try_from(bits.div_ceil(8)).ok()
            }
        }
    }

    /// [`Self::checked_row_bytes`] for extents already validated at surface creation.
    /// Saturates instead of wrapping.
    pub fn row_bytes(self, width: u32) -> u32 {
        self.checked_row_bytes(width).unwrap_or(u32::MAX)
    }

    /// Number of rows (block rows for BC formats) covering `height` pixels.
    pub fn row_count(self, height: u32) -> u32 {
        if self.is_block_compressed() {
            height.div_ceil(4).max(1)
        } else {
            height
        }
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Unknown,
            20 => Self::R8G8B8,
            21 => Self::A8R8G8B8,
            22 => Self::X8R8G8B8,
            23 => Self::R5G6B5,
            24 => Self::X1R5G5B5,
            25 => Self::A1R5G5B5,
            26 => Self::A4R4G4B4,
            27 => Self::R3G3B2,
            28 => Self::A8,
            30 => Self::X4R4G4B4,
            32 => Self::A8B8G8R8,
            33 => Self::X8B8G8R8,
            41 => Self::P8,
            50 => Self::L8,
            51 => Self::A8L8,
            52 => Self::A4L4,
            60 => Self::V8U8,
            61 => Self::L6V5U5,
            62 => Self::X8L8V8U8,
            70 => Self::D16Lockable,
            71 => Self::D32,
            73 => Self::D15S1,
            75 => Self::D24S8,
            77 => Self::D24X8,
            79 => Self::D24X4S4,
            80 => Self::D16,
            FOURCC_UYVY => Self::Uyvy,
            FOURCC_YUY2 => Self::Yuy2,
            FOURCC_DXT1 => Self::Dxt1,
            FOURCC_DXT2 => Self::Dxt2,
            FOURCC_DXT3 => Self::Dxt3,
            FOURCC_DXT4 => Self::Dxt4,
            FOURCC_DXT5 => Self::Dxt5,
            _ => return None,
        })
    }
}

bitflags! {
    /// `DDPF_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PixelFormatFlags: u32 {
        const ALPHAPIXELS = 0x0000_0001;
        const ALPHA = 0x0000_0002;
        const FOURCC = 0x0000_0004;
        const PALETTEINDEXED8 = 0x0000_0020;
        const RGB = 0x0000_0040;
        const ZBUFFER = 0x0000_0400;
        const STENCILBUFFER = 0x0000_4000;
        const LUMINANCE = 0x0002_0000;
        const BUMPLUMINANCE = 0x0004_0000;
        const BUMPDUDV = 0x0008_0000;
    }
}

/// Typed view of a legacy pixel-format record.
///
/// The legacy record overlays the RGB masks with depth/stencil fields; this struct keeps them
/// apart. `bit_count` is the RGB bit count, or the z-buffer bit depth for depth formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelFormat {
    pub flags: PixelFormatFlags,
    pub fourcc: u32,
    pub bit_count: u32,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub alpha_mask: u32,
    pub z_mask: u32,
    pub stencil_bit_depth: u32,
}

impl PixelFormat {
    pub fn rgb(bit_count: u32, red: u32, green: u32, blue: u32, alpha: u32) -> Self {
        let mut flags = PixelFormatFlags::RGB;
        if alpha != 0 {
            flags |= PixelFormatFlags::ALPHAPIXELS;
        }
        Self {
            flags,
            bit_count,
            red_mask: red,
            green_mask: green,
            blue_mask: blue,
            alpha_mask: alpha,
            ..Self::default()
        }
    }

    pub fn fourcc(code: u32) -> Self {
        Self {
            flags: PixelFormatFlags::FOURCC,
            fourcc: code,
            ..Self::default()
        }
    }

    pub fn depth(bit_count: u32, z_mask: u32, stencil_bit_depth: u32) -> Self {
        let mut flags = PixelFormatFlags::ZBUFFER;
        if stencil_bit_depth != 0 {
            flags |= PixelFormatFlags::STENCILBUFFER;
        }
        Self {
            flags,
            bit_count,
            z_mask,
            stencil_bit_depth,
            ..Self::default()
        }
    }

    pub fn palette8() -> Self {
        Self {
            flags: PixelFormatFlags::PALETTEINDEXED8 | PixelFormatFlags::RGB,
            bit_count: 8,
            ..Self::default()
        }
    }

    pub fn luminance(bit_count: u32, luminance_mask: u32, alpha_mask: u32) -> Self {
        let mut flags = PixelFormatFlags::LUMINANCE;
        if alpha_mask != 0 {
            flags |= PixelFormatFlags::ALPHAPIXELS;
        }
        Self {
            flags,
            bit_count,
            red_mask: luminance_mask,
            alpha_mask,
            ..Self::default()
        }
    }
}

/// Maps a legacy pixel-format record onto a format enumerant.
///
/// Returns `None` when the layout has no modern equivalent; callers fall back per
/// [`FALLBACK_FORMAT`] / the active back buffer.
pub fn translate(pf: &PixelFormat) -> Option<D3DFormat> {
    let flags = pf.flags;

    if flags.contains(PixelFormatFlags::FOURCC) {
        return match D3DFormat::from_u32(pf.fourcc)? {
            f @ (D3DFormat::Dxt1
            | D3DFormat::Dxt2
            | D3DFormat::Dxt3
            | D3DFormat::Dxt4
            | D3DFormat::Dxt5
            | D3DFormat::Uyvy
            | D3DFormat::Yuy2) => Some(f),
            _ => None,
        };
    }

    if flags.contains(PixelFormatFlags::ZBUFFER) {
        return match (pf.bit_count, pf.stencil_bit_depth) {
            (16, 0) => Some(D3DFormat::D16),
            (15 | 16, 1) => Some(D3DFormat::D15S1),
            (24, 0) => Some(D3DFormat::D24X8),
            (32, 8) => Some(D3DFormat::D24S8),
            (32, 4) => Some(D3DFormat::D24X4S4),
            (32, 0) if pf.z_mask == 0xFFFF_FFFF => Some(D3DFormat::D32),
            (32, 0) => Some(D3DFormat::D24X8),
            _ => None,
        };
    }

    if flags.contains(PixelFormatFlags::PALETTEINDEXED8) {
        return Some(D3DFormat::P8);
    }

    let has_alpha = flags.contains(PixelFormatFlags::ALPHAPIXELS) && pf.alpha_mask != 0;

    if flags.contains(PixelFormatFlags::LUMINANCE) {
        return match (pf.bit_count, has_alpha) {
            (8, false) => Some(D3DFormat::L8),
            (8, true) => Some(D3DFormat::A4L4),
            (16, true) => Some(D3DFormat::A8L8),
            _ => None,
        };
    }

    if flags.contains(PixelFormatFlags::BUMPDUDV) {
        let luminance = flags.contains(PixelFormatFlags::BUMPLUMINANCE);
        return match (pf.bit_count, luminance) {
            (16, false) => Some(D3DFormat::V8U8),
            (16, true) => Some(D3DFormat::L6V5U5),
            (32, true) => Some(D3DFormat::X8L8V8U8),
            _ => None,
        };
    }

    if flags.contains(PixelFormatFlags::ALPHA) && !flags.contains(PixelFormatFlags::RGB) {
        return (pf.bit_count == 8).then_some(D3DFormat::A8);
    }

    if !flags.contains(PixelFormatFlags::RGB) {
        return None;
    }

    match (pf.bit_count, pf.red_mask) {
        (32, 0x00FF_0000) if has_alpha => Some(D3DFormat::A8R8G8B8),
        (32, 0x00FF_0000) => Some(D3DFormat::X8R8G8B8),
        (32, 0x0000_00FF) if has_alpha => Some(D3DFormat::A8B8G8R8),
        (32, 0x0000_00FF) => Some(D3DFormat::X8B8G8R8),
        (24, 0x00FF_0000) => Some(D3DFormat::R8G8B8),
        (16, 0xF800) => Some(D3DFormat::R5G6B5),
        (16, 0x7C00) if has_alpha => Some(D3DFormat::A1R5G5B5),
        (16, 0x7C00) => Some(D3DFormat::X1R5G5B5),
        (16, 0x0F00) if has_alpha => Some(D3DFormat::A4R4G4B4),
        (16, 0x0F00) => Some(D3DFormat::X4R4G4B4),
        (8, 0xE0) => Some(D3DFormat::R3G3B2),
        _ => None,
    }
}

/// Inverse of [`translate`], used to fill descriptors that were created without a pixel format.
pub fn pixel_format(format: D3DFormat) -> Option<PixelFormat> {
    Some(match format {
        D3DFormat::Unknown => return None,
        D3DFormat::R8G8B8 => PixelFormat::rgb(24, 0xFF_0000, 0x00_FF00, 0x00_00FF, 0),
        D3DFormat::A8R8G8B8 => {
            PixelFormat::rgb(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000)
        }
        D3DFormat::X8R8G8B8 => PixelFormat::rgb(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0),
        D3DFormat::A8B8G8R8 => {
            PixelFormat::rgb(32, 0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0xFF00_0000)
        }
        D3DFormat::X8B8G8R8 => PixelFormat::rgb(32, 0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0),
        D3DFormat::R5G6B5 => PixelFormat::rgb(16, 0xF800, 0x07E0, 0x001F, 0),
        D3DFormat::X1R5G5B5 => PixelFormat::rgb(16, 0x7C00, 0x03E0, 0x001F, 0),
        D3DFormat::A1R5G5B5 => PixelFormat::rgb(16, 0x7C00, 0x03E0, 0x001F, 0x8000),
        D3DFormat::A4R4G4B4 => PixelFormat::rgb(16, 0x0F00, 0x00F0, 0x000F, 0xF000),
        D3DFormat::X4R4G4B4 => PixelFormat::rgb(16, 0x0F00, 0x00F0, 0x000F, 0),
        D3DFormat::R3G3B2 => PixelFormat::rgb(8, 0xE0, 0x1C, 0x03, 0),
        D3DFormat::A8 => PixelFormat {
            flags: PixelFormatFlags::ALPHA,
            bit_count: 8,
            alpha_mask: 0xFF,
            ..PixelFormat::default()
        },
        D3DFormat::P8 => PixelFormat::palette8(),
        D3DFormat::L8 => PixelFormat::luminance(8, 0xFF, 0),
        D3DFormat::A4L4 => PixelFormat::luminance(8, 0x0F, 0xF0),
        D3DFormat::A8L8 => PixelFormat::luminance(16, 0x00FF, 0xFF00),
        D3DFormat::V8U8 => PixelFormat {
            flags: PixelFormatFlags::BUMPDUDV,
            bit_count: 16,
            ..PixelFormat::default()
        },
        D3DFormat::L6V5U5 => PixelFormat {
            flags: PixelFormatFlags::BUMPDUDV | PixelFormatFlags::BUMPLUMINANCE,
            bit_count: 16,
            ..PixelFormat::default()
        },
        D3DFormat::X8L8V8U8 => PixelFormat {
            flags: PixelFormatFlags::BUMPDUDV | PixelFormatFlags::BUMPLUMINANCE,
            bit_count: 32,
            ..PixelFormat::default()
        },
        D3DFormat::D16 | D3DFormat::D16Lockable => PixelFormat::depth(16, 0xFFFF, 0),
        D3DFormat::D15S1 => PixelFormat::depth(16, 0x7FFF, 1),
        D3DFormat::D24X8 => PixelFormat::depth(32, 0x00FF_FFFF, 0),
        D3DFormat::D24S8 => PixelFormat::depth(32, 0x00FF_FFFF, 8),
        D3DFormat::D24X4S4 => PixelFormat::depth(32, 0x00FF_FFFF, 4),
        D3DFormat::D32 => PixelFormat::depth(32, 0xFFFF_FFFF, 0),
        D3DFormat::Uyvy => PixelFormat::fourcc(FOURCC_UYVY),
        D3DFormat::Yuy2 => PixelFormat::fourcc(FOURCC_YUY2),
        D3DFormat::Dxt1 => PixelFormat::fourcc(FOURCC_DXT1),
        D3DFormat::Dxt2 => PixelFormat::fourcc(FOURCC_DXT2),
        D3DFormat::Dxt3 => PixelFormat::fourcc(FOURCC_DXT3),
        D3DFormat::Dxt4 => PixelFormat::fourcc(FOURCC_DXT4),
        D3DFormat::Dxt5 => PixelFormat::fourcc(FOURCC_DXT5),
    })
}
