//! Error types.
//!
//! These are host-side failures. What the emulated computer sees is always a
//! [`ResultCode`]; [`DiskError::result_code`] is the mapping.

use std::io;

use crate::result::ResultCode;

#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    #[error("drive D{0}: is switched off")]
    NotPresent(u8),
    #[error("no disk in drive D{0}:")]
    NoMedia(u8),
    #[error("sector {sector} out of range on drive D{drive}:")]
    InvalidSector { drive: u8, sector: u16 },
    #[error("disk in drive D{0}: is write-protected")]
    ReadOnlyMedia(u8),
    #[error("data frame checksum mismatch")]
    ChecksumMismatch,
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("cannot decompress image: {0}")]
    Decompress(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Image(#[from] format_atr::AtrError),
}

impl DiskError {
    /// Wire result for this failure.
    ///
    /// An absent drive never answers, so it maps to a timeout.
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            DiskError::NotPresent(_) => ResultCode::Timeout,
            DiskError::NoMedia(_) => ResultCode::Nak,
            _ => ResultCode::Error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CassetteError {
    #[error("no tape inserted")]
    NoTape,
    #[error("tape is read-only")]
    ReadOnly,
    #[error("raw tape images cannot be recorded to")]
    RawTape,
    #[error("end of tape")]
    EndOfTape,
    #[error("record is not pressed")]
    NotRecording,
    #[error("tape is recording")]
    Recording,
    #[error("record length or checksum does not match")]
    BadRecord,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Container(#[from] format_cas::CasError),
}

/// Failure while re-establishing a saved state.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error(transparent)]
    Cassette(#[from] CassetteError),
    #[error("snapshot has {0} drives, expected {1}")]
    DriveCount(usize, usize),
}
