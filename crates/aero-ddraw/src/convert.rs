//! Pixel conversion between a surface's CPU layout and the format its resource was created in.
//!
//! A device may reject a legacy format (16-bit RGB layouts and DXTn are commonly missing on GL
//! class backends), in which case the resource is created in a wider format and every transfer
//! goes through a [`Conversion`]. Uncompressed layouts are repacked channel by channel; DXTn
//! payloads are decompressed on upload. Decompression is one-way, so such resources cannot be
//! read back.

use crate::format::{pixel_format, D3DFormat, PixelFormatFlags};

/// Channel masks of a packed RGB layout, in red, green, blue, alpha order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    bytes: usize,
    masks: [u32; 4],
}

impl ChannelLayout {
    /// Layout of a byte-aligned RGB format. Palettized, luminance, bump, depth and FourCC
    /// formats have none.
    pub fn of(format: D3DFormat) -> Option<Self> {
        let pf = pixel_format(format)?;
        if !pf.flags.contains(PixelFormatFlags::RGB)
            || pf.flags.contains(PixelFormatFlags::PALETTEINDEXED8)
            || pf.bit_count % 8 != 0
        {
            return None;
        }
        Some(Self {
            bytes: (pf.bit_count / 8) as usize,
            masks: [pf.red_mask, pf.green_mask, pf.blue_mask, pf.alpha_mask],
        })
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes
    }

    fn read(&self, px: &[u8]) -> u32 {
        px.iter()
            .take(self.bytes)
            .enumerate()
            .fold(0, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)))
    }

    fn write(&self, px: &mut [u8], value: u32) {
        for (i, b) in px.iter_mut().take(self.bytes).enumerate() {
            *b = (value >> (8 * i)) as u8;
        }
    }

    /// Expands one pixel to RGBA8. Missing alpha reads as opaque.
    pub fn decode(&self, px: &[u8]) -> [u8; 4] {
        let raw = self.read(px);
        let [r, g, b, a] = self.masks;
        [
            expand(raw, r).unwrap_or(0),
            expand(raw, g).unwrap_or(0),
            expand(raw, b).unwrap_or(0),
            expand(raw, a).unwrap_or(255),
        ]
    }

    /// Packs RGBA8 into one pixel. Channels without a mask are dropped.
    pub fn encode(&self, rgba: [u8; 4], px: &mut [u8]) {
        let raw = self
            .masks
            .iter()
            .zip(rgba)
            .fold(0, |acc, (&mask, c)| acc | pack(c, mask));
        self.write(px, raw);
    }

    fn same_channels(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.masks[..3] == other.masks[..3]
    }
}

fn expand(raw: u32, mask: u32) -> Option<u8> {
    if mask == 0 {
        return None;
    }
    let shift = mask.trailing_zeros();
    let max = u64::from(mask >> shift);
    let v = u64::from((raw & mask) >> shift);
    Some(((v * 255 + max / 2) / max) as u8)
}

fn pack(c: u8, mask: u32) -> u32 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let max = u64::from(mask >> shift);
    let v = (u64::from(c) * max + 127) / 255;
    ((v as u32) << shift) & mask
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Bytes are copied unchanged.
    Direct,
    Repack {
        from: ChannelLayout,
        to: ChannelLayout,
    },
    /// DXTn blocks decoded into an RGB layout.
    Decompress { from: D3DFormat, to: ChannelLayout },
}

/// How to move pixels stored as `src` into a resource holding `dst`. `None` when no lossless
/// or decoding path exists.
pub fn plan(src: D3DFormat, dst: D3DFormat) -> Option<Conversion> {
    if src == dst {
        return Some(Conversion::Direct);
    }
    match (src.is_block_compressed(), ChannelLayout::of(src), ChannelLayout::of(dst)) {
        (true, _, Some(to)) => Some(Conversion::Decompress { from: src, to }),
        (false, Some(from), Some(to)) if from.same_channels(&to) => Some(Conversion::Direct),
        (false, Some(from), Some(to)) => Some(Conversion::Repack { from, to }),
        (false, None, None) if src.bits_per_pixel() == dst.bits_per_pixel() => {
            Some(Conversion::Direct)
        }
        _ => None,
    }
}

/// Repacks `rows` rows of `width` pixels. Rows that do not fit either buffer are left alone.
#[allow(clippy::too_many_arguments)]
pub fn repack_rows(
    from: &ChannelLayout,
    to: &ChannelLayout,
    dst: &mut [u8],
    dst_pitch: u32,
    src: &[u8],
    src_pitch: u32,
    width: u32,
    rows: u32,
) {
    let width = width as usize;
    let (src_row_len, dst_row_len) = (width * from.bytes, width * to.bytes);
    for row in 0..rows as usize {
        let src_off = row * src_pitch as usize;
        let dst_off = row * dst_pitch as usize;
        let (Some(src_row), Some(dst_row)) = (
            src.get(src_off..src_off + src_row_len),
            dst.get_mut(dst_off..dst_off + dst_row_len),
        ) else {
            break;
        };
        for (s, d) in src_row
            .chunks_exact(from.bytes)
            .zip(dst_row.chunks_exact_mut(to.bytes))
        {
            to.encode(from.decode(s), d);
        }
    }
}

/// Decodes a DXTn payload of `width` x `height` pixels into `dst`.
pub fn decompress(
    format: D3DFormat,
    to: &ChannelLayout,
    dst: &mut [u8],
    dst_pitch: u32,
    src: &[u8],
    width: u32,
    height: u32,
) {
    let Some(block_bytes) = format.block_bytes() else {
        return;
    };
    let block_bytes = block_bytes as usize;
    let blocks_wide = width.div_ceil(4) as usize;
    let blocks_high = height.div_ceil(4) as usize;

    for by in 0..blocks_high {
        for bx in 0..blocks_wide {
            let off = (by * blocks_wide + bx) * block_bytes;
            let Some(block) = src.get(off..off + block_bytes) else {
                return;
            };
            let texels = decode_block(format, block);
            for (i, rgba) in texels.into_iter().enumerate() {
                let x = bx * 4 + i % 4;
                let y = by * 4 + i / 4;
                if x >= width as usize || y >= height as usize {
                    continue;
                }
                let at = y * dst_pitch as usize + x * to.bytes;
                if let Some(px) = dst.get_mut(at..at + to.bytes) {
                    to.encode(rgba, px);
                }
            }
        }
    }
}

fn decode_block(format: D3DFormat, block: &[u8]) -> [[u8; 4]; 16] {
    match format {
        D3DFormat::Dxt1 => decode_dxt1(block),
        D3DFormat::Dxt2 | D3DFormat::Dxt3 => decode_dxt3(block),
        _ => decode_dxt5(block),
    }
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn rgb565(c: u16) -> [u8; 3] {
    let r = ((c >> 11) & 0x1F) as u8;
    let g = ((c >> 5) & 0x3F) as u8;
    let b = (c & 0x1F) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

fn lerp(a: u8, b: u8, num: u32, den: u32) -> u8 {
    ((u32::from(a) * (den - num) + u32::from(b) * num) / den) as u8
}

fn mix(a: [u8; 3], b: [u8; 3], num: u32, den: u32) -> [u8; 3] {
    [
        lerp(a[0], b[0], num, den),
        lerp(a[1], b[1], num, den),
        lerp(a[2], b[2], num, den),
    ]
}

/// Colour palette of a DXT colour block. `punch_through` selects the three colour plus
/// transparent mode when the endpoints are not in descending order (DXT1 only).
fn colour_palette(color0: u16, color1: u16, punch_through: bool) -> [[u8; 4]; 4] {
    let (c0, c1) = (rgb565(color0), rgb565(color1));
    let opaque = |[r, g, b]: [u8; 3]| [r, g, b, 255];
    if color0 > color1 || !punch_through {
        [
            opaque(c0),
            opaque(c1),
            opaque(mix(c0, c1, 1, 3)),
            opaque(mix(c0, c1, 2, 3)),
        ]
    } else {
        [opaque(c0), opaque(c1), opaque(mix(c0, c1, 1, 2)), [0; 4]]
    }
}

fn colour_texels(block: &[u8], punch_through: bool) -> [[u8; 4]; 16] {
    let palette = colour_palette(le_u16(block, 0), le_u16(block, 2), punch_through);
    let indices = le_u32(block, 4);
    std::array::from_fn(|i| palette[((indices >> (2 * i)) & 0b11) as usize])
}

fn decode_dxt1(block: &[u8]) -> [[u8; 4]; 16] {
    colour_texels(block, true)
}

fn decode_dxt3(block: &[u8]) -> [[u8; 4]; 16] {
    let alpha = u64::from(le_u32(block, 0)) | (u64::from(le_u32(block, 4)) << 32);
    let mut texels = colour_texels(&block[8..], false);
    for (i, texel) in texels.iter_mut().enumerate() {
        texel[3] = ((alpha >> (4 * i)) & 0xF) as u8 * 17;
    }
    texels
}

fn decode_dxt5(block: &[u8]) -> [[u8; 4]; 16] {
    let (a0, a1) = (block[0], block[1]);
    let mut alphas = [a0, a1, 0, 0, 0, 0, 0, 255];
    if a0 > a1 {
        for (step, a) in alphas[2..].iter_mut().enumerate() {
            *a = lerp(a0, a1, step as u32 + 1, 7);
        }
    } else {
        for (step, a) in alphas[2..6].iter_mut().enumerate() {
            *a = lerp(a0, a1, step as u32 + 1, 5);
        }
    }
    let indices = block[2..8]
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)));

    let mut texels = colour_texels(&block[8..], false);
    for (i, texel) in texels.iter_mut().enumerate() {
        texel[3] = alphas[((indices >> (3 * i)) & 0b111) as usize];
    }
    texels
}
