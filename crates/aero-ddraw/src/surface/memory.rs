use crate::format::D3DFormat;

/// CPU-visible pixel storage of a legacy surface, laid out with the pitch the client observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceMemory {
    width: u32,
    height: u32,
    pitch: u32,
    rows: u32,
    bytes: Vec<u8>,
}

impl SurfaceMemory {
    /// `requested_pitch` is honoured when it covers a full row; otherwise rows are packed and
    /// DWORD aligned, matching what legacy clients expect. Block-compressed surfaces are always
    /// tightly packed block rows.
    ///
    /// Returns `None` when a row or the whole surface does not fit in 32 bits.
    pub fn new(
        format: D3DFormat,
        width: u32,
        height: u32,
        requested_pitch: Option<u32>,
    ) -> Option<Self> {
        let row_bytes = format.checked_row_bytes(width)?;
        let pitch = if format.is_block_compressed() {
            row_bytes
        } else {
            match requested_pitch {
                Some(pitch) if pitch >= row_bytes && pitch != 0 => pitch,
                _ => align_to(row_bytes, 4)?,
            }
        };
        let rows = if width == 0 || height == 0 {
            0
        } else {
            format.row_count(height)
        };
        let len = pitch.checked_mul(rows)?;
        Some(Self {
            width,
            height,
            pitch,
            rows,
            bytes: vec![0u8; len as usize],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

pub(crate) fn align_to(value: u32, alignment: u32) -> Option<u32> {
    debug_assert!(alignment.is_power_of_two());
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}
