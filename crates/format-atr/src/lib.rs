//! Atari 8-bit disk image containers.
//!
//! Two layouts are understood:
//!
//! - **ATR**: a 16-byte header followed by raw sector data.
//!
//!   | Offset | Size | Field                                   |
//!   |--------|------|-----------------------------------------|
//!   | 0      | 2    | Magic `$0296` (little-endian)           |
//!   | 2      | 2    | Image size in 16-byte paragraphs, low   |
//!   | 4      | 2    | Sector size (128 or 256)                |
//!   | 6      | 2    | Image size in 16-byte paragraphs, high  |
//!   | 8      | 7    | Unused                                  |
//!   | 15     | 1    | Write-protect flag (non-zero = locked)  |
//!
//! - **XFD**: headerless sector data. Density is inferred from length.
//!
//! Sectors 1-3 are always 128 bytes on the wire. How they sit in a
//! double-density file is the [`BootLayout`].

use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

/// ATR magic word.
pub const ATR_MAGIC: u16 = 0x0296;
/// ATR header length in bytes.
pub const ATR_HEADER_LEN: usize = 16;
/// Boot sectors are always transferred as 128 bytes.
pub const BOOT_SECTOR_SIZE: usize = 128;
/// Number of boot sectors.
pub const BOOT_SECTORS: u32 = 3;
/// Largest XFD length still treated as single density (1040 x 128).
pub const MAX_SINGLE_DENSITY_XFD: u64 = 1040 * 128;

#[derive(Debug, thiserror::Error)]
pub enum AtrError {
    #[error("unsupported sector size {0} (expected 128 or 256)")]
    BadSectorSize(u16),
    #[error("image is empty")]
    Empty,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Container type. The header size is the only thing that differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    Atr,
    Xfd,
}

impl ImageKind {
    #[must_use]
    pub fn header_size(self) -> u64 {
        match self {
            ImageKind::Atr => ATR_HEADER_LEN as u64,
            ImageKind::Xfd => 0,
        }
    }
}

/// Placement of boot sectors 1-3 in a double-density image.
///
/// - `Logical`: three 128-byte records packed back to back (`$180` bytes).
/// - `Physical`: each boot sector occupies a full 256-byte slot, data in the
///   first half.
/// - `Sio2Pc`: the three records are packed into the first `$180` bytes and
///   the next `$180` bytes are zero padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootLayout {
    Logical,
    Physical,
    Sio2Pc,
}

impl BootLayout {
    /// Bytes a boot sector occupies in the file.
    #[must_use]
    pub fn boot_slot_size(self) -> u64 {
        match self {
            BootLayout::Physical => 256,
            BootLayout::Logical | BootLayout::Sio2Pc => 128,
        }
    }

    /// Offset of sector 4 relative to the start of sector data.
    #[must_use]
    pub fn data_start(self) -> u64 {
        match self {
            BootLayout::Logical => 0x180,
            BootLayout::Physical | BootLayout::Sio2Pc => 0x300,
        }
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Decoded ATR header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtrHeader {
    /// Image size (excluding header) in 16-byte paragraphs.
    pub paragraphs: u32,
    pub sector_size: u16,
    pub write_protect: bool,
}

impl AtrHeader {
    /// Decode a header. Returns `None` if the magic does not match.
    #[must_use]
    pub fn parse(bytes: &[u8; ATR_HEADER_LEN]) -> Option<Self> {
        if u16::from_le_bytes([bytes[0], bytes[1]]) != ATR_MAGIC {
            return None;
        }
        let lo = u16::from_le_bytes([bytes[2], bytes[3]]) as u32;
        let hi = u16::from_le_bytes([bytes[6], bytes[7]]) as u32;
        Some(Self {
            paragraphs: (hi << 16) | lo,
            sector_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            write_protect: bytes[15] != 0,
        })
    }

    /// Header for a freshly formatted image.
    ///
    /// Boot sectors take 256 bytes each only for a 256-byte image whose
    /// layout is not `Logical`.
    #[must_use]
    pub fn for_blank(sector_size: u16, sector_count: u32, layout: BootLayout) -> Self {
        let boot_size = boot_write_size(sector_size, layout);
        let boot_count = sector_count.min(BOOT_SECTORS);
        let bytes = u64::from(boot_size) * u64::from(boot_count)
            + u64::from(sector_size) * u64::from(sector_count - boot_count);
        Self {
            paragraphs: (bytes >> 4) as u32,
            sector_size,
            write_protect: false,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; ATR_HEADER_LEN] {
        let mut out = [0u8; ATR_HEADER_LEN];
        out[0..2].copy_from_slice(&ATR_MAGIC.to_le_bytes());
        out[2..4].copy_from_slice(&(self.paragraphs as u16).to_le_bytes());
        out[4..6].copy_from_slice(&self.sector_size.to_le_bytes());
        out[6..8].copy_from_slice(&((self.paragraphs >> 16) as u16).to_le_bytes());
        out[15] = u8::from(self.write_protect);
        out
    }
}

fn boot_write_size(sector_size: u16, layout: BootLayout) -> u16 {
    if sector_size == 256 && layout != BootLayout::Logical {
        256
    } else {
        128
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Everything needed to locate a sector in an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub kind: ImageKind,
    pub sector_size: u16,
    pub sector_count: u32,
    pub boot_layout: BootLayout,
    /// Set from the ATR header; always false for XFD.
    pub write_protect: bool,
}

impl Geometry {
    /// Inspect an image and work out its geometry.
    ///
    /// The reader is left at an unspecified position.
    pub fn detect<R: Read + Seek>(reader: &mut R) -> Result<Self, AtrError> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        if file_len == 0 {
            return Err(AtrError::Empty);
        }
        reader.seek(SeekFrom::Start(0))?;

        let mut raw = [0u8; ATR_HEADER_LEN];
        let header = if file_len >= ATR_HEADER_LEN as u64 {
            reader.read_exact(&mut raw)?;
            AtrHeader::parse(&raw)
        } else {
            None
        };

        let geometry = match header {
            Some(header) => Self::from_atr_header(reader, &header)?,
            None => Self::from_xfd_len(file_len),
        };
        log::debug!(
            "disk geometry: {:?} {} x {} bytes, boot {:?}",
            geometry.kind,
            geometry.sector_count,
            geometry.sector_size,
            geometry.boot_layout
        );
        Ok(geometry)
    }

    fn from_atr_header<R: Read + Seek>(
        reader: &mut R,
        header: &AtrHeader,
    ) -> Result<Self, AtrError> {
        let sector_size = header.sector_size;
        if sector_size != 128 && sector_size != 256 {
            return Err(AtrError::BadSectorSize(sector_size));
        }

        // Paragraphs to 128-byte units.
        let units = header.paragraphs >> 3;
        let (sector_count, boot_layout) = if sector_size == 256 {
            if units & 1 == 1 {
                ((units + 3) >> 1, BootLayout::Logical)
            } else {
                let layout = if padding_has_data(reader)? {
                    BootLayout::Physical
                } else {
                    BootLayout::Sio2Pc
                };
                (units >> 1, layout)
            }
        } else {
            (units, BootLayout::Logical)
        };

        Ok(Self {
            kind: ImageKind::Atr,
            sector_size,
            sector_count,
            boot_layout,
            write_protect: header.write_protect,
        })
    }

    /// XFD geometry from file length alone.
    #[must_use]
    pub fn from_xfd_len(file_len: u64) -> Self {
        let (sector_size, boot_layout) = if file_len <= MAX_SINGLE_DENSITY_XFD {
            (128u16, BootLayout::Logical)
        } else if file_len & 0xFF == 0 {
            (256, BootLayout::Physical)
        } else {
            (256, BootLayout::Logical)
        };
        let boot_bytes = u64::from(BOOT_SECTORS) * boot_layout.boot_slot_size();
        let rest = file_len.saturating_sub(boot_bytes) / u64::from(sector_size);
        Self {
            kind: ImageKind::Xfd,
            sector_size,
            sector_count: (u64::from(BOOT_SECTORS) + rest) as u32,
            boot_layout,
            write_protect: false,
        }
    }

    #[must_use]
    pub fn header_size(&self) -> u64 {
        self.kind.header_size()
    }

    /// Transfer size and file offset of a sector.
    ///
    /// No bounds check: callers validate `1..=sector_count` first.
    #[must_use]
    pub fn size_and_offset(&self, sector: u16) -> (usize, u64) {
        let header = self.header_size();
        if sector < 4 {
            let index = u64::from(sector.saturating_sub(1));
            (BOOT_SECTOR_SIZE, header + index * self.boot_layout.boot_slot_size())
        } else {
            let size = u64::from(self.sector_size);
            let offset = header + self.boot_layout.data_start() + u64::from(sector - 4) * size;
            (self.sector_size as usize, offset)
        }
    }

    /// True if `sector` is addressable on this image.
    #[must_use]
    pub fn contains(&self, sector: u16) -> bool {
        sector >= 1 && u32::from(sector) <= self.sector_count
    }
}

/// Any non-zero byte in data range `$180..$300` marks a physical layout.
fn padding_has_data<R: Read + Seek>(reader: &mut R) -> Result<bool, AtrError> {
    reader.seek(SeekFrom::Start(ATR_HEADER_LEN as u64 + 0x180))?;
    let mut padding = Vec::with_capacity(0x180);
    reader.take(0x180).read_to_end(&mut padding)?;
    Ok(padding.iter().any(|&b| b != 0))
}

/// Write a zero-filled image with the given geometry.
///
/// ATR images get a header; boot sectors are sized per `layout`.
pub fn write_blank<W: Write>(
    writer: &mut W,
    kind: ImageKind,
    sector_size: u16,
    sector_count: u32,
    layout: BootLayout,
) -> io::Result<()> {
    if kind == ImageKind::Atr {
        writer.write_all(&AtrHeader::for_blank(sector_size, sector_count, layout).to_bytes())?;
    }
    let zeros = [0u8; 256];
    let boot_size = boot_write_size(sector_size, layout) as usize;
    for sector in 1..=sector_count {
        let size = if sector <= BOOT_SECTORS {
            boot_size
        } else {
            sector_size as usize
        };
        writer.write_all(&zeros[..size])?;
    }
    Ok(())
}
