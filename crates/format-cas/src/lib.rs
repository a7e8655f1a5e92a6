//! CAS cassette container.
//!
//! A CAS file is a flat sequence of chunks. Every chunk starts with an
//! 8-byte header:
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 4    | ASCII tag                      |
//! | 4      | 2    | Payload length (little-endian) |
//! | 6      | 2    | Aux word (little-endian)       |
//!
//! Recognised tags:
//!
//! - `FUJI`: file marker, must come first. Payload is a description.
//! - `baud`: no payload, aux is the baud rate for the data chunks after it.
//! - `data`: one tape record. Aux is the pre-record gap in milliseconds.
//!
//! Anything else is skipped.

use std::io::{self, Read, Seek, SeekFrom, Write};

pub const TAG_FUJI: [u8; 4] = *b"FUJI";
pub const TAG_BAUD: [u8; 4] = *b"baud";
pub const TAG_DATA: [u8; 4] = *b"data";

/// Baud rate assumed until a `baud` chunk says otherwise.
pub const DEFAULT_BAUD: u16 = 600;
/// Block table capacity; chunks past this are ignored.
pub const MAX_BLOCKS: usize = 2048;
/// Longest description kept from a `FUJI` chunk.
pub const DESCRIPTION_MAX: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("not a CAS file (missing FUJI chunk)")]
    NotCas,
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Chunk header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub tag: [u8; 4],
    pub length: u16,
    pub aux: u16,
}

impl ChunkHeader {
    pub const SIZE: usize = 8;

    #[must_use]
    pub fn new(tag: [u8; 4], length: u16, aux: u16) -> Self {
        Self { tag, length, aux }
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            tag: [bytes[0], bytes[1], bytes[2], bytes[3]],
            length: u16::from_le_bytes([bytes[4], bytes[5]]),
            aux: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.tag);
        out[4..6].copy_from_slice(&self.length.to_le_bytes());
        out[6..8].copy_from_slice(&self.aux.to_le_bytes());
        out
    }

    /// Length and aux only, as found 4 bytes into a header.
    ///
    /// Tape reads seek past the tag since the block table only ever points
    /// at `data` chunks.
    #[must_use]
    pub fn length_and_aux(bytes: &[u8; 4]) -> (u16, u16) {
        (
            u16::from_le_bytes([bytes[0], bytes[1]]),
            u16::from_le_bytes([bytes[2], bytes[3]]),
        )
    }
}

// ---------------------------------------------------------------------------
// Block table
// ---------------------------------------------------------------------------

/// One `data` chunk located by [`CasIndex::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeBlock {
    /// File offset of the chunk header.
    pub offset: u64,
    /// Baud rate in force when the chunk was reached.
    pub baud: u16,
    pub length: u16,
    pub gap_ms: u16,
}

/// Result of a forward scan over a CAS file.
#[derive(Debug, Clone, Default)]
pub struct CasIndex {
    pub description: String,
    pub blocks: Vec<TapeBlock>,
    /// Offset just past the last complete chunk. New records go here.
    pub end_offset: u64,
    /// Baud rate in force at `end_offset`.
    pub end_baud: u16,
}

impl CasIndex {
    /// Walk every chunk once and record where the data chunks are.
    ///
    /// A truncated chunk ends the scan; the blocks before it stay usable.
    pub fn scan<R: Read + Seek>(reader: &mut R) -> Result<Self, CasError> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let Some(first) = read_header(reader)? else {
            return Err(CasError::NotCas);
        };
        if first.tag != TAG_FUJI {
            return Err(CasError::NotCas);
        }

        let mut index = CasIndex {
            end_baud: DEFAULT_BAUD,
            ..CasIndex::default()
        };
        let mut description = vec![0u8; first.length as usize];
        if reader.read_exact(&mut description).is_err() {
            log::warn!("CAS description truncated");
            index.end_offset = ChunkHeader::SIZE as u64;
            return Ok(index);
        }
        description.truncate(DESCRIPTION_MAX);
        index.description = String::from_utf8_lossy(&description)
            .trim_end_matches('\0')
            .to_string();

        let mut baud = DEFAULT_BAUD;
        let mut offset = (ChunkHeader::SIZE + first.length as usize) as u64;
        index.end_offset = offset;

        loop {
            reader.seek(SeekFrom::Start(offset))?;
            let Some(header) = read_header(reader)? else {
                break;
            };
            let next = offset + ChunkHeader::SIZE as u64 + u64::from(header.length);
            if next > file_len {
                log::warn!(
                    "CAS chunk {:?} at {offset} runs past end of file, scan stopped",
                    String::from_utf8_lossy(&header.tag)
                );
                break;
            }

            match header.tag {
                TAG_BAUD => baud = header.aux,
                TAG_DATA => {
                    if index.blocks.len() == MAX_BLOCKS {
                        log::warn!("CAS file has more than {MAX_BLOCKS} blocks, rest ignored");
                        break;
                    }
                    index.blocks.push(TapeBlock {
                        offset,
                        baud,
                        length: header.length,
                        gap_ms: header.aux,
                    });
                }
                tag => log::debug!(
                    "skipping CAS chunk {:?} ({} bytes)",
                    String::from_utf8_lossy(&tag),
                    header.length
                ),
            }
            offset = next;
            index.end_offset = offset;
            index.end_baud = baud;
        }

        Ok(index)
    }
}

/// Read an 8-byte header. `None` at a clean end of file or a partial header.
fn read_header<R: Read>(reader: &mut R) -> io::Result<Option<ChunkHeader>> {
    let mut bytes = [0u8; ChunkHeader::SIZE];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    match filled {
        0 => Ok(None),
        ChunkHeader::SIZE => Ok(Some(ChunkHeader::from_bytes(&bytes))),
        _ => {
            log::warn!("CAS chunk header truncated after {filled} bytes");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Start a new CAS file: `FUJI` chunk with the description, then a `baud`
/// chunk.
pub fn write_file_header<W: Write>(writer: &mut W, description: &str, baud: u16) -> io::Result<()> {
    let bytes = description.as_bytes();
    let bytes = &bytes[..bytes.len().min(DESCRIPTION_MAX)];
    writer.write_all(&ChunkHeader::new(TAG_FUJI, bytes.len() as u16, 0).to_bytes())?;
    writer.write_all(bytes)?;
    writer.write_all(&ChunkHeader::new(TAG_BAUD, 0, baud).to_bytes())?;
    Ok(())
}

/// Append one record. Returns the number of bytes written.
pub fn write_data_chunk<W: Write>(writer: &mut W, payload: &[u8], gap_ms: u16) -> io::Result<u64> {
    let length = u16::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too long"))?;
    writer.write_all(&ChunkHeader::new(TAG_DATA, length, gap_ms).to_bytes())?;
    writer.write_all(payload)?;
    Ok((ChunkHeader::SIZE + payload.len()) as u64)
}
