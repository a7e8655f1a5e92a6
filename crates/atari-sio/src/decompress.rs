//! Compressed disk images.
//!
//! A compressed image is expanded into an anonymous temporary file which
//! then backs the drive like any other image. The temporary file vanishes
//! when the drive lets go of it.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};

use flate2::read::GzDecoder;

use crate::error::DiskError;

/// Bytes of a file's start handed to [`Decompressor::matches`].
pub const MAGIC_LEN: usize = 5;

/// Decoder for one compressed container.
pub trait Decompressor {
    fn name(&self) -> &'static str;

    /// Check the first bytes of a file.
    fn matches(&self, magic: &[u8]) -> bool;

    /// Expand `source` into a fresh temporary file positioned at 0.
    fn decompress(&self, source: &mut File) -> Result<File, DiskError>;
}

/// gzip-wrapped ATR or XFD (`.atz`, `.atr.gz`, `.xfz`).
pub struct Gzip;

impl Decompressor for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn matches(&self, magic: &[u8]) -> bool {
        magic.starts_with(&[0x1F, 0x8B])
    }

    fn decompress(&self, source: &mut File) -> Result<File, DiskError> {
        source.seek(SeekFrom::Start(0))?;
        let mut decoder = GzDecoder::new(source);
        let mut out = tempfile::tempfile()?;
        io::copy(&mut decoder, &mut out).map_err(|e| DiskError::Decompress(e.to_string()))?;
        out.seek(SeekFrom::Start(0))?;
        Ok(out)
    }
}

/// DiskComm archives. Recognised so they fail cleanly instead of being
/// mounted as raw sector data.
pub struct Dcm;

impl Decompressor for Dcm {
    fn name(&self) -> &'static str {
        "DCM"
    }

    /// Archive type, pass info, first sector, then the first block type.
    /// A headerless XFD can start with $F9 as its boot flag, so the pass
    /// byte and block type must make sense too.
    fn matches(&self, magic: &[u8]) -> bool {
        let [archive, pass, sector_lo, sector_hi, block, ..] = *magic else {
            return false;
        };
        let density = (pass >> 5) & 0x03;
        matches!(archive, 0xF9 | 0xFA)
            && pass & 0x1F != 0
            && density != 0x03
            && u16::from_le_bytes([sector_lo, sector_hi]) != 0
            && matches!(block & 0x7F, 0x41..=0x47)
    }

    fn decompress(&self, _source: &mut File) -> Result<File, DiskError> {
        Err(DiskError::Decompress("DCM archives are not supported".to_string()))
    }
}

static DECOMPRESSORS: [&(dyn Decompressor + Sync); 2] = [&Gzip, &Dcm];

/// Decoder for a file starting with `magic`, if it is compressed.
#[must_use]
pub fn find(magic: &[u8]) -> Option<&'static (dyn Decompressor + Sync)> {
    DECOMPRESSORS.iter().copied().find(|d| d.matches(magic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{Read, Write};

    #[test]
    fn detection() {
        assert_eq!(find(&[0x1F, 0x8B, 0x08]).map(|d| d.name()), Some("gzip"));
        // Single density, pass 1, sector 1, DOS 2.0 compressed block.
        assert_eq!(find(&[0xFA, 0x01, 0x01, 0x00, 0x42]).map(|d| d.name()), Some("DCM"));
        assert_eq!(find(&[0xF9, 0x81, 0x01, 0x00, 0xC7]).map(|d| d.name()), Some("DCM"));
        assert!(find(&[0x96, 0x02]).is_none());
        assert!(find(&[]).is_none());
    }

    #[test]
    fn xfd_boot_flag_is_not_a_dcm_archive() {
        // Boot flag $F9, 3 boot sectors, load address $0700, init low byte.
        assert!(find(&[0xF9, 0x03, 0x00, 0x07, 0x40]).is_none());
        // Pass number 0 and density 11 are never written by DiskComm.
        assert!(find(&[0xF9, 0x00, 0x01, 0x00, 0x42]).is_none());
        assert!(find(&[0xF9, 0x61, 0x01, 0x00, 0x42]).is_none());
        assert!(find(&[0xF9, 0x01]).is_none());
    }

    #[test]
    fn gzip_expands_to_temp_file() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).expect("compress");
        let compressed = encoder.finish().expect("compress");

        let mut source = tempfile::tempfile().expect("temp");
        source.write_all(&compressed).expect("write");

        let mut out = Gzip.decompress(&mut source).expect("valid gzip");
        let mut expanded = Vec::new();
        out.read_to_end(&mut expanded).expect("read");
        assert_eq!(expanded, payload);
    }

    #[test]
    fn corrupt_gzip_is_a_decompress_error() {
        let mut source = tempfile::tempfile().expect("temp");
        source.write_all(&[0x1F, 0x8B, 0x08, 0x00, 0xDE, 0xAD]).expect("write");
        let err = Gzip.decompress(&mut source).expect_err("truncated stream");
        assert!(matches!(err, DiskError::Decompress(_)));
    }
}
