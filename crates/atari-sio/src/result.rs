//! Wire result codes and the CPU-side view of them.

use serde::{Deserialize, Serialize};

/// Single-byte answer a peripheral sends at the end of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    /// No device answered. Sent as `$00` and never appears on the wire.
    Timeout,
    /// `'A'`
    Acknowledge,
    /// `'C'`
    Complete,
    /// `'N'`
    Nak,
    /// `'E'`
    Error,
}

impl ResultCode {
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            ResultCode::Timeout => 0x00,
            ResultCode::Acknowledge => b'A',
            ResultCode::Complete => b'C',
            ResultCode::Nak => b'N',
            ResultCode::Error => b'E',
        }
    }

    /// Unknown bytes read as errors, matching the OS.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => ResultCode::Timeout,
            b'A' => ResultCode::Acknowledge,
            b'C' => ResultCode::Complete,
            b'N' => ResultCode::Nak,
            _ => ResultCode::Error,
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, ResultCode::Acknowledge | ResultCode::Complete)
    }
}

/// What the OS SIO routine returns: Y register and N flag.
///
/// The CPU glue applies this to its own registers; DSTATS is written by
/// the patch handler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SioResult {
    pub code: ResultCode,
    pub status_register: u8,
    pub negative_flag: bool,
}

impl From<ResultCode> for SioResult {
    fn from(code: ResultCode) -> Self {
        let (status_register, negative_flag) = match code {
            ResultCode::Timeout => (138, true),
            ResultCode::Acknowledge | ResultCode::Complete => (1, false),
            ResultCode::Nak => (144, true),
            ResultCode::Error => (146, true),
        };
        Self {
            code,
            status_register,
            negative_flag,
        }
    }
}
