//! Serial timing in scanlines.
//!
//! The whole SIO model counts PAL scanlines: 312 lines x 50 frames.

/// PAL scanlines per second.
pub const SCANLINES_PER_SECOND: i64 = 312 * 50;

/// Delay before a byte from a device raises SERIN.
pub const SERIN_INTERVAL: u32 = 8;
/// Delay before POKEY is ready for the next SEROUT byte.
pub const SEROUT_INTERVAL: u32 = 8;
/// Delay from SEROUT to transmit-done.
pub const XMTDONE_INTERVAL: u32 = 15;
/// Extra delay before an acknowledge.
pub const ACK_INTERVAL: u32 = 36;
/// Extra delay for reads of the probed sector.
pub const SECTOR_DELAY: u32 = 3200;
/// Delay after the first byte of a format result.
pub const FORMAT_DELAY: u32 = SERIN_INTERVAL << 3;

/// Start bit + 8 data bits + stop bit.
pub const BITS_PER_BYTE: i64 = 10;

/// Write-path pause that closes the current tape record.
pub const FLUSH_THRESHOLD_MS: i64 = 5;

#[must_use]
pub fn ms_to_scanlines(ms: i64) -> i64 {
    ms * SCANLINES_PER_SECOND / 1000
}

#[must_use]
pub fn scanlines_to_ms(lines: i64) -> i64 {
    lines * 1000 / SCANLINES_PER_SECOND
}

/// Time to shift one byte at `baud`.
#[must_use]
pub fn byte_scanlines(baud: u16) -> i64 {
    let baud = if baud == 0 {
        i64::from(format_cas::DEFAULT_BAUD)
    } else {
        i64::from(baud)
    };
    BITS_PER_BYTE * SCANLINES_PER_SECOND / baud
}

/// Byte time for POKEY's two-tone output, clocked by channels 3+4.
///
/// Channel pairs run at 1.79 MHz; a scanline is 114 CPU cycles and each
/// bit is two timer periods.
#[must_use]
pub fn pokey_byte_scanlines(audf3: u8, audf4: u8) -> i64 {
    let period = i64::from(audf3) + 256 * i64::from(audf4) + 7;
    BITS_PER_BYTE * 2 * period / 114
}

/// Milliseconds to play `length` bytes at `baud`.
#[must_use]
pub fn record_ms(length: usize, baud: u16) -> i64 {
    scanlines_to_ms(byte_scanlines(baud) * length as i64)
}
