//! Cassette deck (C:).
//!
//! Plays and records tape records from a CAS container, or plays a raw
//! headerless dump by slicing it into standard 132-byte records.
//!
//! Two read paths:
//!
//! - **Shortcut** ([`CassetteDeck::read_to_memory`]): used by the SIO patch.
//!   The OS says how long it waited for a gap; every record that went past
//!   the head during that wait is skipped and the next one is returned.
//! - **Timed** ([`CassetteDeck::add_scan_line`]): one call per scanline while
//!   the motor runs. Each byte becomes available when its last bit would
//!   have arrived; [`CassetteDeck::serial_line_level`] gives the bit under
//!   the head for software that samples the data line directly.
//!
//! Recording collects bytes from POKEY and closes a record whenever the
//! line stays idle for more than [`FLUSH_THRESHOLD_MS`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use emu_core::Bus;
use format_cas::{CasError, CasIndex, ChunkHeader, DEFAULT_BAUD, TAG_BAUD, TapeBlock};
use serde::{Deserialize, Serialize};

use crate::checksum::sio_checksum;
use crate::error::CassetteError;
use crate::timing::{
    BITS_PER_BYTE, FLUSH_THRESHOLD_MS, byte_scanlines, ms_to_scanlines, record_ms,
    scanlines_to_ms,
};

/// Standard tape record: two sync bytes, a type byte, 128 data bytes and a
/// checksum.
pub const RAW_RECORD_LEN: usize = 132;
const RAW_DATA_LEN: u64 = 128;

const RECORD_FULL: u8 = 0xFC;
const RECORD_SHORT: u8 = 0xFA;
const RECORD_EOF: u8 = 0xFE;

/// Leader before the first raw record.
pub const RAW_LEADER_MS: u32 = 19_200;
/// Inter-record gap between raw records.
pub const RAW_GAP_MS: u32 = 260;

/// Gap preset when the OS starts loading.
pub const LOAD_LEADER_MS: u32 = 9_600;
/// Gap preset when the OS starts saving.
pub const SAVE_LEADER_MS: u32 = 19_200;

/// Longest record the write path buffers before forcing it out.
const MAX_RECORD_LEN: usize = 4096;

/// A byte may be delivered this many scanlines before its deadline.
const IRQ_SLACK: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapeStatus {
    None,
    ReadOnly,
    ReadWrite,
}

/// One record as read from tape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeRecord {
    pub data: Vec<u8>,
    /// Silence before the record.
    pub gap_ms: u32,
    pub baud: u16,
}

pub struct CassetteDeck {
    pub(crate) file: Option<File>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) description: String,
    pub(crate) status: TapeStatus,
    pub(crate) is_cas: bool,
    pub(crate) blocks: Vec<TapeBlock>,
    pub(crate) raw_len: u64,
    pub(crate) end_offset: u64,
    pub(crate) end_baud: u16,
    /// 1-based; `max_block + 1` once everything has been read.
    pub(crate) current_block: usize,
    pub(crate) max_block: usize,

    pub(crate) motor_on: bool,
    pub(crate) record: bool,
    pub(crate) write_protect: bool,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) eof: bool,

    /// Scanlines the motor has run.
    pub(crate) elapsed: i64,
    /// When the byte under the head is complete.
    pub(crate) next_irq: i64,
    /// When the last byte was recorded.
    pub(crate) save_time: i64,
    pub(crate) gap_delay_ms: u32,

    pub(crate) buffer: Vec<u8>,
    pub(crate) buffer_index: usize,
    pub(crate) record_baud: u16,
    pub(crate) serin_byte: u8,

    pub(crate) write_buffer: Vec<u8>,
}

impl CassetteDeck {
    #[must_use]
    pub fn new() -> Self {
        Self {
            file: None,
            path: None,
            description: String::new(),
            status: TapeStatus::None,
            is_cas: false,
            blocks: Vec::new(),
            raw_len: 0,
            end_offset: 0,
            end_baud: DEFAULT_BAUD,
            current_block: 1,
            max_block: 0,
            motor_on: false,
            record: false,
            write_protect: false,
            readable: false,
            writable: false,
            eof: false,
            elapsed: 0,
            next_irq: 0,
            save_time: 0,
            gap_delay_ms: 0,
            buffer: Vec::new(),
            buffer_index: 0,
            record_baud: DEFAULT_BAUD,
            serin_byte: 0,
            write_buffer: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Tape handling
    // -----------------------------------------------------------------------

    /// Load a tape. CAS files are indexed; anything else is a raw dump.
    pub fn insert(&mut self, path: &Path) -> Result<(), CassetteError> {
        let path = path.to_path_buf();
        self.remove();

        let (mut file, status) = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => (file, TapeStatus::ReadWrite),
            Err(_) => (File::open(&path)?, TapeStatus::ReadOnly),
        };

        match CasIndex::scan(&mut file) {
            Ok(index) => {
                self.is_cas = true;
                self.description = index.description;
                self.max_block = index.blocks.len();
                self.blocks = index.blocks;
                self.end_offset = index.end_offset;
                self.end_baud = index.end_baud;
            }
            Err(CasError::NotCas) => {
                self.is_cas = false;
                self.raw_len = file.metadata()?.len();
                self.max_block = self.raw_len.div_ceil(RAW_DATA_LEN) as usize + 1;
            }
            Err(e) => return Err(e.into()),
        }

        log::info!(
            "tape {} inserted: {} blocks ({})",
            path.display(),
            self.max_block,
            if self.is_cas { "CAS" } else { "raw" }
        );
        self.file = Some(file);
        self.path = Some(path);
        self.status = status;
        self.current_block = 1;
        self.eof = false;
        self.write_protect = false;
        self.update_flags();
        Ok(())
    }

    /// Start a blank CAS tape with record pressed.
    pub fn create_new(&mut self, path: &Path, description: &str) -> Result<(), CassetteError> {
        self.remove();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        format_cas::write_file_header(&mut file, description, DEFAULT_BAUD)?;
        file.flush()?;

        log::info!("tape {} created", path.display());
        self.end_offset = file.stream_position()?;
        self.end_baud = DEFAULT_BAUD;
        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        self.description = description.to_string();
        self.status = TapeStatus::ReadWrite;
        self.is_cas = true;
        self.current_block = 1;
        self.max_block = 0;
        self.record = true;
        self.update_flags();
        Ok(())
    }

    /// Eject, writing out any record in progress.
    pub fn remove(&mut self) {
        self.flush_write();
        if let Some(path) = self.path.take() {
            log::info!("tape {} removed", path.display());
        }
        self.file = None;
        self.description.clear();
        self.status = TapeStatus::None;
        self.is_cas = false;
        self.blocks.clear();
        self.raw_len = 0;
        self.end_offset = 0;
        self.end_baud = DEFAULT_BAUD;
        self.current_block = 1;
        self.max_block = 0;
        self.record = false;
        self.write_protect = false;
        self.eof = false;
        self.elapsed = 0;
        self.next_irq = 0;
        self.save_time = 0;
        self.gap_delay_ms = 0;
        self.buffer.clear();
        self.buffer_index = 0;
        self.update_flags();
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.file.is_some()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn status(&self) -> TapeStatus {
        self.status
    }

    #[must_use]
    pub fn is_cas(&self) -> bool {
        self.is_cas
    }

    /// Block table of a CAS tape (empty for raw dumps).
    #[must_use]
    pub fn blocks(&self) -> &[TapeBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn current_block(&self) -> usize {
        self.current_block
    }

    #[must_use]
    pub fn max_block(&self) -> usize {
        self.max_block
    }

    #[must_use]
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    #[must_use]
    pub fn recording(&self) -> bool {
        self.record
    }

    #[must_use]
    pub fn write_protect(&self) -> bool {
        self.write_protect
    }

    #[must_use]
    pub fn readable(&self) -> bool {
        self.readable
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }

    #[must_use]
    pub fn end_of_tape(&self) -> bool {
        self.eof
    }

    #[must_use]
    pub fn gap_delay_ms(&self) -> u32 {
        self.gap_delay_ms
    }

    pub(crate) fn update_flags(&mut self) {
        self.readable =
            self.status != TapeStatus::None && self.motor_on && !self.record && !self.eof;
        self.writable = self.status == TapeStatus::ReadWrite
            && self.is_cas
            && self.motor_on
            && self.record
            && !self.write_protect;
    }

    /// Switch the write-protect tab. Unprotecting fails for read-only
    /// files and raw dumps.
    pub fn toggle_write_protect(&mut self) -> bool {
        if self.write_protect {
            if self.status != TapeStatus::ReadWrite || !self.is_cas {
                return false;
            }
            self.write_protect = false;
        } else {
            if !self.is_loaded() {
                return false;
            }
            self.write_protect = true;
        }
        self.update_flags();
        true
    }

    /// Press or release record. Returns false when there is no tape, or
    /// when record was pressed on a tape that cannot be written.
    pub fn toggle_record(&mut self) -> bool {
        if !self.is_loaded() {
            return false;
        }
        self.flush_write();
        self.record = !self.record;
        self.buffer.clear();
        self.buffer_index = 0;
        self.save_time = self.elapsed;
        self.gap_delay_ms = 0;
        self.update_flags();
        !self.record
            || (self.status == TapeStatus::ReadWrite && self.is_cas && !self.write_protect)
    }

    pub fn toggle_motor(&mut self, on: bool) {
        if on == self.motor_on {
            return;
        }
        if !on {
            self.flush_write();
        }
        self.motor_on = on;
        self.update_flags();
    }

    /// Move the head to the start of `block` (1-based).
    pub fn seek(&mut self, block: usize) {
        self.flush_write();
        self.current_block = block.clamp(1, self.max_block + 1);
        self.eof = false;
        self.buffer.clear();
        self.buffer_index = 0;
        self.gap_delay_ms = 0;
        self.update_flags();
    }

    /// OS is about to load: play mode, motor on, expect the load leader.
    pub fn leader_load(&mut self) {
        if self.record {
            self.toggle_record();
        }
        self.toggle_motor(true);
        self.gap_delay_ms = LOAD_LEADER_MS;
    }

    /// OS is about to save: record mode, motor on, write the save leader.
    pub fn leader_save(&mut self) {
        if !self.record {
            self.toggle_record();
        }
        self.toggle_motor(true);
        self.gap_delay_ms = SAVE_LEADER_MS;
        self.eof = false;
        self.update_flags();
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Length, gap and baud of a block without reading its data.
    fn block_meta(&self, block: usize) -> (usize, u32, u16) {
        if self.is_cas {
            let meta = self.blocks[block - 1];
            (meta.length as usize, u32::from(meta.gap_ms), meta.baud)
        } else {
            let gap = if block == 1 { RAW_LEADER_MS } else { RAW_GAP_MS };
            (RAW_RECORD_LEN, gap, DEFAULT_BAUD)
        }
    }

    /// Read the record under the head and advance to the next block.
    pub fn read_record(&mut self) -> Result<TapeRecord, CassetteError> {
        if self.file.is_none() {
            return Err(CassetteError::NoTape);
        }
        let block = self.current_block;
        if block == 0 || block > self.max_block {
            self.eof = true;
            self.update_flags();
            return Err(CassetteError::EndOfTape);
        }
        let record = if self.is_cas {
            self.read_cas_block(block)
        } else {
            self.read_raw_block(block)
        };
        match record {
            Ok(record) => {
                self.current_block += 1;
                Ok(record)
            }
            Err(e) => {
                log::warn!("tape block {block} unreadable: {e}");
                self.eof = true;
                self.update_flags();
                Err(e)
            }
        }
    }

    fn read_cas_block(&mut self, block: usize) -> Result<TapeRecord, CassetteError> {
        let meta = self.blocks[block - 1];
        let file = self.file.as_mut().ok_or(CassetteError::NoTape)?;
        // Skip the tag; the table only points at data chunks.
        file.seek(SeekFrom::Start(meta.offset + 4))?;
        let mut length_and_aux = [0u8; 4];
        file.read_exact(&mut length_and_aux)?;
        let (length, gap) = ChunkHeader::length_and_aux(&length_and_aux);
        let mut data = vec![0; length as usize];
        file.read_exact(&mut data)?;
        Ok(TapeRecord {
            data,
            gap_ms: u32::from(gap),
            baud: meta.baud,
        })
    }

    fn read_raw_block(&mut self, block: usize) -> Result<TapeRecord, CassetteError> {
        let mut data = vec![0u8; RAW_RECORD_LEN];
        data[0] = 0x55;
        data[1] = 0x55;
        if block == self.max_block {
            data[2] = RECORD_EOF;
        } else {
            let file = self.file.as_mut().ok_or(CassetteError::NoTape)?;
            file.seek(SeekFrom::Start((block as u64 - 1) * RAW_DATA_LEN))?;
            let mut chunk = Vec::with_capacity(RAW_DATA_LEN as usize);
            file.take(RAW_DATA_LEN).read_to_end(&mut chunk)?;
            data[3..3 + chunk.len()].copy_from_slice(&chunk);
            if chunk.len() < RAW_DATA_LEN as usize {
                data[2] = RECORD_SHORT;
                data[0x82] = chunk.len() as u8;
            } else {
                data[2] = RECORD_FULL;
            }
        }
        data[0x83] = sio_checksum(&data[..0x83]);
        let gap_ms = if block == 1 { RAW_LEADER_MS } else { RAW_GAP_MS };
        Ok(TapeRecord {
            data,
            gap_ms,
            baud: DEFAULT_BAUD,
        })
    }

    fn check_writable(&self) -> Result<(), CassetteError> {
        if self.file.is_none() {
            return Err(CassetteError::NoTape);
        }
        if !self.is_cas {
            return Err(CassetteError::RawTape);
        }
        if self.status != TapeStatus::ReadWrite || self.write_protect {
            return Err(CassetteError::ReadOnly);
        }
        Ok(())
    }

    /// Record `payload` at the head, preceded by the accumulated gap.
    /// Anything after the head is cut off.
    ///
    /// A record longer than a chunk can hold is refused before the file is
    /// touched. If the write itself fails the block table is rebuilt from
    /// what reached the disk.
    pub fn write_record(&mut self, payload: &[u8]) -> Result<(), CassetteError> {
        self.check_writable()?;
        let length = u16::try_from(payload.len()).map_err(|_| CassetteError::BadRecord)?;

        let index = self.current_block.saturating_sub(1);
        let (offset, baud_here) = match self.blocks.get(index) {
            Some(block) => (block.offset, block.baud),
            None => (self.end_offset, self.end_baud),
        };
        let gap = self.gap_delay_ms.min(u32::from(u16::MAX)) as u16;

        let (data_offset, written) = match self.append_chunk(offset, baud_here, payload, gap) {
            Ok(placed) => placed,
            Err(e) => {
                log::warn!("tape write at offset {offset} failed: {e}");
                self.reindex();
                return Err(e);
            }
        };

        self.blocks.truncate(index);
        self.blocks.push(TapeBlock {
            offset: data_offset,
            baud: DEFAULT_BAUD,
            length,
            gap_ms: gap,
        });
        self.max_block = self.blocks.len();
        self.current_block = self.max_block + 1;
        self.end_offset = offset + written;
        self.end_baud = DEFAULT_BAUD;
        self.gap_delay_ms = 0;
        log::debug!("tape block {} written: {} bytes, gap {gap} ms", self.max_block, payload.len());
        Ok(())
    }

    /// Cut the file at `offset` and write the record there. Returns the
    /// data chunk's offset and the bytes written.
    fn append_chunk(
        &mut self,
        offset: u64,
        baud_here: u16,
        payload: &[u8],
        gap: u16,
    ) -> Result<(u64, u64), CassetteError> {
        let file = self.file.as_mut().ok_or(CassetteError::NoTape)?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut written = 0;
        // Recording is always at the standard rate.
        if baud_here != DEFAULT_BAUD {
            file.write_all(&ChunkHeader::new(TAG_BAUD, 0, DEFAULT_BAUD).to_bytes())?;
            written += ChunkHeader::SIZE as u64;
        }
        let data_offset = offset + written;
        written += format_cas::write_data_chunk(file, payload, gap)?;
        file.flush()?;
        Ok((data_offset, written))
    }

    /// Rebuild the block table from the file after a failed write.
    fn reindex(&mut self) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        match CasIndex::scan(file) {
            Ok(index) => {
                self.blocks = index.blocks;
                self.end_offset = index.end_offset;
                self.end_baud = index.end_baud;
            }
            Err(e) => {
                log::warn!("tape could not be re-indexed: {e}");
                self.blocks.clear();
            }
        }
        self.max_block = self.blocks.len();
        self.current_block = self.current_block.clamp(1, self.max_block + 1);
    }

    /// Add to the silence expected before the next record.
    pub fn add_gap(&mut self, ms: u32) -> u32 {
        self.gap_delay_ms = self.gap_delay_ms.saturating_add(ms);
        self.gap_delay_ms
    }

    /// Skip every record that went past while the OS waited
    /// `gap_delay_ms`, then read the next one.
    pub fn read_record_via_shortcut(&mut self) -> Result<TapeRecord, CassetteError> {
        if self.file.is_none() {
            return Err(CassetteError::NoTape);
        }
        let waited = i64::from(self.gap_delay_ms);
        let mut tape_ms = 0i64;
        loop {
            if self.current_block > self.max_block {
                self.eof = true;
                self.update_flags();
                return Err(CassetteError::EndOfTape);
            }
            let (length, gap, baud) = self.block_meta(self.current_block);
            tape_ms += i64::from(gap) + record_ms(length, baud);
            if tape_ms > waited {
                break;
            }
            log::debug!("tape block {} passed during a {waited} ms wait", self.current_block);
            self.current_block += 1;
        }
        self.gap_delay_ms = 0;
        self.read_record()
    }

    /// Read a record into memory for the SIO patch.
    ///
    /// The record must be `length` data bytes plus a checksum. Data is
    /// copied even when the checks fail, like the real OS buffer.
    pub fn read_to_memory<B: Bus>(
        &mut self,
        bus: &mut B,
        address: u16,
        length: usize,
    ) -> Result<(), CassetteError> {
        self.toggle_motor(true);
        if !self.readable {
            return Err(self.unreadable_reason());
        }
        let record = self.read_record_via_shortcut()?;
        let copy = record.data.len().min(length);
        bus.write_block(address, &record.data[..copy]);
        if record.data.len() != length + 1
            || sio_checksum(&record.data[..length]) != record.data[length]
        {
            return Err(CassetteError::BadRecord);
        }
        Ok(())
    }

    /// Write `length` bytes of memory plus a checksum as one record.
    pub fn write_from_memory<B: Bus>(
        &mut self,
        bus: &mut B,
        address: u16,
        length: usize,
    ) -> Result<(), CassetteError> {
        self.toggle_motor(true);
        if !self.writable {
            self.check_writable()?;
            return Err(CassetteError::NotRecording);
        }
        let mut data = vec![0; length];
        bus.read_block(address, &mut data);
        data.push(sio_checksum(&data));
        self.write_record(&data)
    }

    fn unreadable_reason(&self) -> CassetteError {
        if !self.is_loaded() {
            CassetteError::NoTape
        } else if self.record {
            CassetteError::Recording
        } else {
            CassetteError::EndOfTape
        }
    }

    // -----------------------------------------------------------------------
    // Timed playback
    // -----------------------------------------------------------------------

    /// Advance one scanline. Returns true when a new byte is ready for
    /// SERIN.
    pub fn add_scan_line(&mut self) -> bool {
        if !self.motor_on || !self.is_loaded() {
            return false;
        }
        self.elapsed += 1;
        // Covers end of tape as well as record mode.
        if !self.readable {
            return false;
        }
        if self.buffer_index >= self.buffer.len() {
            // Start the next record; its first byte is a gap away.
            self.read_record_via_timing();
            return false;
        }
        if self.next_irq - self.elapsed > IRQ_SLACK {
            return false;
        }
        self.serin_byte = self.buffer[self.buffer_index];
        self.schedule_next_byte();
        true
    }

    /// Load the next record and time its first byte. `None` at end of tape.
    fn read_record_via_timing(&mut self) -> Option<usize> {
        match self.read_record() {
            Ok(record) => {
                self.gap_delay_ms = 0;
                self.next_irq = self.elapsed
                    + ms_to_scanlines(i64::from(record.gap_ms))
                    + byte_scanlines(record.baud);
                self.record_baud = record.baud;
                self.buffer = record.data;
                self.buffer_index = 0;
                Some(self.buffer.len())
            }
            Err(_) => {
                self.eof = true;
                self.buffer.clear();
                self.buffer_index = 0;
                self.update_flags();
                None
            }
        }
    }

    fn schedule_next_byte(&mut self) {
        self.buffer_index += 1;
        if self.buffer_index < self.buffer.len() {
            self.next_irq += byte_scanlines(self.record_baud);
        }
    }

    /// Last byte delivered by [`CassetteDeck::add_scan_line`].
    #[must_use]
    pub fn get_byte(&self) -> u8 {
        self.serin_byte
    }

    /// Data line level under the head: true for mark.
    ///
    /// The byte due at `next_irq` is shifted LSB first after a start bit
    /// and followed by a stop bit. Gaps read as mark.
    #[must_use]
    pub fn serial_line_level(&self) -> bool {
        if !self.readable || self.buffer_index >= self.buffer.len() {
            return true;
        }
        let byte_time = byte_scanlines(self.record_baud);
        let start = self.next_irq - byte_time;
        if self.elapsed < start {
            return true;
        }
        let bit = (self.elapsed - start) * BITS_PER_BYTE / byte_time;
        match bit {
            0 => false,
            1..=8 => (self.buffer[self.buffer_index] >> (bit - 1)) & 1 != 0,
            _ => true,
        }
    }

    /// Scanlines until the byte under the head is complete.
    #[must_use]
    pub fn input_irq_delay(&self) -> u32 {
        if !self.readable {
            return 0;
        }
        (self.next_irq - self.elapsed).max(0) as u32
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// A byte from POKEY in two-tone mode. `byte_time` is POKEY's current
    /// byte duration in scanlines.
    pub fn put_byte(&mut self, byte: u8, byte_time: i64) {
        if !self.writable {
            return;
        }
        let idle = self.elapsed - self.save_time - byte_time;
        let idle_ms = scanlines_to_ms(idle.max(0));
        if !self.write_buffer.is_empty() && idle_ms > FLUSH_THRESHOLD_MS {
            self.flush_write();
        }
        if self.write_buffer.is_empty() {
            self.add_gap(idle_ms as u32);
        }
        self.write_buffer.push(byte);
        self.save_time = self.elapsed;
        if self.write_buffer.len() >= MAX_RECORD_LEN {
            self.flush_write();
        }
    }

    /// POKEY serial reset: restart write-path timing from now.
    pub fn reset_serial(&mut self) {
        self.save_time = self.elapsed;
    }

    fn flush_write(&mut self) {
        if self.write_buffer.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.write_buffer);
        if let Err(e) = self.write_record(&data) {
            log::warn!("tape record of {} bytes lost: {e}", data.len());
        }
    }
}

impl Default for CassetteDeck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::FlatRam;
    use format_cas::write_data_chunk;
    use tempfile::NamedTempFile;

    fn cas(blocks: &[(u16, &[u8])]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp");
        format_cas::write_file_header(&mut file, "t", DEFAULT_BAUD).expect("header");
        for (gap, data) in blocks {
            write_data_chunk(&mut file, data, *gap).expect("chunk");
        }
        file.flush().expect("flush");
        file
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut data = payload.to_vec();
        data.push(sio_checksum(payload));
        data
    }

    #[test]
    fn raw_dump_becomes_standard_records() {
        let mut file = NamedTempFile::new().expect("temp");
        let bytes: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        file.write_all(&bytes).expect("write");

        let mut deck = CassetteDeck::new();
        deck.insert(file.path()).expect("insert");
        assert!(!deck.is_cas());
        assert_eq!(deck.max_block(), 4);

        let first = deck.read_record().expect("block 1");
        assert_eq!(first.data.len(), RAW_RECORD_LEN);
        assert_eq!(first.data[..3], [0x55, 0x55, RECORD_FULL]);
        assert_eq!(first.data[3..131], bytes[..128]);
        assert_eq!(first.data[0x83], sio_checksum(&first.data[..0x83]));
        assert_eq!(first.gap_ms, RAW_LEADER_MS);

        let second = deck.read_record().expect("block 2");
        assert_eq!(second.gap_ms, RAW_GAP_MS);

        let third = deck.read_record().expect("block 3");
        assert_eq!(third.data[2], RECORD_SHORT);
        assert_eq!(third.data[0x82], 44);
        assert_eq!(third.data[3..47], bytes[256..]);

        let last = deck.read_record().expect("block 4");
        assert_eq!(last.data[2], RECORD_EOF);

        assert!(matches!(deck.read_record(), Err(CassetteError::EndOfTape)));
        assert!(deck.end_of_tape());
    }

    #[test]
    fn raw_dump_refuses_writes() {
        let mut file = NamedTempFile::new().expect("temp");
        file.write_all(&[0; 10]).expect("write");
        let mut deck = CassetteDeck::new();
        deck.insert(file.path()).expect("insert");
        assert!(matches!(deck.write_record(&[1, 2, 3]), Err(CassetteError::RawTape)));
        assert!(!deck.toggle_record());
        assert!(!deck.writable());
    }

    #[test]
    fn end_of_tape_survives_motor_toggles() {
        let tape = cas(&[(100, &[1, 2, 3])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        deck.toggle_motor(true);
        assert!(deck.readable());
        deck.read_record().expect("block 1");
        assert!(deck.read_record().is_err());
        assert!(!deck.readable());

        deck.toggle_motor(false);
        deck.toggle_motor(true);
        assert!(!deck.readable(), "still at end of tape");

        deck.seek(1);
        assert!(deck.readable());
    }

    #[test]
    fn shortcut_skips_records_that_passed_during_the_wait() {
        // 10 bytes at 600 baud take 166 ms.
        let tape = cas(&[(100, &[1; 10]), (100, &[2; 10]), (5000, &[3; 10])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");

        deck.add_gap(50);
        assert_eq!(deck.read_record_via_shortcut().expect("block 1").data, [1; 10]);
        assert_eq!(deck.gap_delay_ms(), 0);

        // Waiting 1 s lets block 2 go by.
        deck.add_gap(1000);
        assert_eq!(deck.read_record_via_shortcut().expect("block 3").data, [3; 10]);

        deck.add_gap(10);
        assert!(matches!(
            deck.read_record_via_shortcut(),
            Err(CassetteError::EndOfTape)
        ));
    }

    #[test]
    fn read_to_memory_checks_length_and_checksum() {
        let good = framed(&[0x11; 16]);
        let mut bad = framed(&[0x22; 16]);
        bad[16] ^= 1;
        let tape = cas(&[(100, &good), (100, &bad), (100, &good)]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        let mut ram = FlatRam::new();

        deck.read_to_memory(&mut ram, 0x0400, 16).expect("good record");
        assert!(deck.motor_on());
        assert_eq!(ram.peek(0x0400), 0x11);
        assert_eq!(ram.peek(0x040F), 0x11);
        assert_eq!(ram.peek(0x0410), 0x00, "checksum not copied");

        let err = deck.read_to_memory(&mut ram, 0x0400, 16).expect_err("bad checksum");
        assert!(matches!(err, CassetteError::BadRecord));

        let err = deck.read_to_memory(&mut ram, 0x0400, 20).expect_err("wrong length");
        assert!(matches!(err, CassetteError::BadRecord));
    }

    #[test]
    fn timed_playback_delivers_bytes_on_schedule() {
        let tape = cas(&[(100, &[0xA5, 0x5A])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        deck.toggle_motor(true);

        // 100 ms gap = 1560 lines, then one byte time of 260 lines.
        let mut lines = 0;
        while !deck.add_scan_line() {
            lines += 1;
            assert!(lines < 10_000, "first byte never arrived");
        }
        lines += 1;
        assert_eq!(lines, 1 + 1560 + 260 - 1);
        assert_eq!(deck.get_byte(), 0xA5);

        let mut lines = 1;
        while !deck.add_scan_line() {
            lines += 1;
            assert!(lines < 10_000, "second byte never arrived");
        }
        assert_eq!(lines, 260);
        assert_eq!(deck.get_byte(), 0x5A);

        assert!(!deck.add_scan_line());
        assert!(deck.end_of_tape());
        assert!(!deck.readable());
    }

    #[test]
    fn line_level_follows_bit_windows() {
        let tape = cas(&[(100, &[0xA5])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        deck.toggle_motor(true);
        deck.add_scan_line();
        assert_eq!(deck.input_irq_delay(), 1560 + 260);

        let advance_to = |deck: &mut CassetteDeck, line: i64| {
            while deck.elapsed < line {
                deck.add_scan_line();
            }
        };
        // Byte starts at 1 + 1560 + 260 - 260; each bit is 26 lines.
        let start = 1 + 1560;
        advance_to(&mut deck, start - 1);
        assert!(deck.serial_line_level(), "gap is mark");
        advance_to(&mut deck, start);
        assert!(!deck.serial_line_level(), "start bit");
        advance_to(&mut deck, start + 26);
        assert!(deck.serial_line_level(), "bit 0 of $A5");
        advance_to(&mut deck, start + 52);
        assert!(!deck.serial_line_level(), "bit 1 of $A5");
        advance_to(&mut deck, start + 26 * 9);
        assert!(deck.serial_line_level(), "stop bit");
    }

    #[test]
    fn created_tape_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("new.cas");
        let mut deck = CassetteDeck::new();
        deck.create_new(&path, "TEST").expect("create");
        assert!(deck.recording());
        deck.toggle_motor(true);
        assert!(deck.writable());

        let payload: Vec<u8> = (0..128u8).collect();
        deck.add_gap(3000);
        deck.write_record(&payload).expect("write");
        deck.remove();

        deck.insert(&path).expect("reinsert");
        assert_eq!(deck.description(), "TEST");
        assert_eq!(deck.max_block(), 1);
        let record = deck.read_record().expect("block 1");
        assert_eq!(record.data, payload);
        assert_eq!(record.gap_ms, 3000);
    }

    #[test]
    fn pokey_bytes_split_into_records_on_pauses() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rec.cas");
        let mut deck = CassetteDeck::new();
        deck.create_new(&path, "").expect("create");
        deck.toggle_motor(true);

        let tick = |deck: &mut CassetteDeck, lines: u32| {
            for _ in 0..lines {
                deck.add_scan_line();
            }
        };
        tick(&mut deck, 100);
        for b in [1, 2, 3] {
            deck.put_byte(b, 260);
            tick(&mut deck, 260);
        }
        // 1000 lines of silence after the last byte: about 47 ms.
        tick(&mut deck, 1000 - 260);
        for b in [4, 5] {
            deck.put_byte(b, 260);
            tick(&mut deck, 260);
        }
        deck.toggle_motor(false);
        deck.remove();

        deck.insert(&path).expect("reinsert");
        assert_eq!(deck.max_block(), 2);
        let first = deck.read_record().expect("block 1");
        assert_eq!(first.data, [1, 2, 3]);
        assert_eq!(first.gap_ms, 0);
        let second = deck.read_record().expect("block 2");
        assert_eq!(second.data, [4, 5]);
        assert_eq!(second.gap_ms, 47);
    }

    #[test]
    fn writing_mid_tape_truncates_the_rest() {
        let tape = cas(&[(100, &[1; 4]), (100, &[2; 4]), (100, &[3; 4])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        deck.seek(2);
        deck.toggle_record();
        deck.add_gap(260);
        deck.write_record(&[9; 6]).expect("write");
        assert_eq!(deck.max_block(), 2);

        deck.insert(tape.path()).expect("reinsert");
        assert_eq!(deck.max_block(), 2);
        deck.seek(2);
        assert_eq!(deck.read_record().expect("block 2").data, [9; 6]);
    }

    #[test]
    fn oversized_record_leaves_the_tape_alone() {
        let tape = cas(&[(100, &[1; 4]), (100, &[2; 4]), (100, &[3; 4])]);
        let before = std::fs::metadata(tape.path()).expect("metadata").len();
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        deck.seek(2);
        assert!(deck.toggle_record());

        let err = deck.write_record(&vec![0; 65_536]).expect_err("too long");
        assert!(matches!(err, CassetteError::BadRecord));
        assert_eq!(std::fs::metadata(tape.path()).expect("metadata").len(), before);
        assert_eq!(deck.max_block(), 3);
        assert_eq!(deck.read_record().expect("block 2").data, [2; 4]);

        deck.insert(tape.path()).expect("reinsert");
        assert_eq!(deck.max_block(), 3);
    }

    #[test]
    fn memory_record_too_long_for_a_chunk_is_refused() {
        let tape = cas(&[(100, &[1; 4])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        assert!(deck.toggle_record());
        let mut ram = FlatRam::new();

        let err = deck
            .write_from_memory(&mut ram, 0x0000, 0xFFFF)
            .expect_err("record plus checksum overflows");
        assert!(matches!(err, CassetteError::BadRecord));
        assert_eq!(deck.blocks().len(), 1);
    }

    #[test]
    fn recording_at_end_of_tape_still_splits_records() {
        let tape = cas(&[(10, &[7; 2])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");
        deck.toggle_motor(true);
        let mut lines = 0;
        while !deck.end_of_tape() {
            deck.add_scan_line();
            lines += 1;
            assert!(lines < 10_000, "tape never ended");
        }
        assert!(deck.toggle_record());

        let tick = |deck: &mut CassetteDeck, lines: u32| {
            for _ in 0..lines {
                deck.add_scan_line();
            }
        };
        let start = deck.elapsed;
        tick(&mut deck, 100);
        assert_eq!(deck.elapsed, start + 100, "clock runs while recording");
        for b in [1, 2, 3] {
            deck.put_byte(b, 260);
            tick(&mut deck, 260);
        }
        tick(&mut deck, 2000);
        for b in [4, 5] {
            deck.put_byte(b, 260);
            tick(&mut deck, 260);
        }
        deck.toggle_motor(false);
        deck.remove();

        deck.insert(tape.path()).expect("reinsert");
        assert_eq!(deck.max_block(), 3);
        deck.seek(2);
        assert_eq!(deck.read_record().expect("block 2").data, [1, 2, 3]);
        let last = deck.read_record().expect("block 3");
        assert_eq!(last.data, [4, 5]);
        assert_eq!(last.gap_ms, 128);
    }

    #[test]
    fn unreadable_block_ends_the_tape() {
        let record = framed(&[0x11; 16]);
        let tape = cas(&[(100, &record), (100, &record)]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");

        // FUJI "t" and baud chunks take 17 bytes; cut block 1 halfway
        // through its payload.
        OpenOptions::new()
            .write(true)
            .open(tape.path())
            .expect("open")
            .set_len(17 + 8 + 8)
            .expect("truncate");

        let mut ram = FlatRam::new();
        let err = deck.read_to_memory(&mut ram, 0x0400, 16).expect_err("short chunk");
        assert!(matches!(err, CassetteError::Io(_)));
        assert!(deck.end_of_tape());
        assert!(!deck.readable());
        assert_eq!(deck.current_block(), 1);

        let err = deck.read_to_memory(&mut ram, 0x0400, 16).expect_err("still ended");
        assert!(matches!(err, CassetteError::EndOfTape));
    }

    #[test]
    fn recording_after_slow_section_restores_standard_baud() {
        let mut file = NamedTempFile::new().expect("temp");
        format_cas::write_file_header(&mut file, "", 300).expect("header");
        write_data_chunk(&mut file, &[1; 4], 100).expect("chunk");
        file.flush().expect("flush");

        let mut deck = CassetteDeck::new();
        deck.insert(file.path()).expect("insert");
        assert_eq!(deck.blocks()[0].baud, 300);
        deck.seek(2);
        deck.write_record(&[2; 4]).expect("write");

        deck.insert(file.path()).expect("reinsert");
        assert_eq!(deck.blocks().len(), 2);
        assert_eq!(deck.blocks()[1].baud, 600);
    }

    #[test]
    fn write_protect_tab() {
        let tape = cas(&[]);
        let mut deck = CassetteDeck::new();
        assert!(!deck.toggle_write_protect(), "no tape");
        deck.insert(tape.path()).expect("insert");
        assert!(deck.toggle_write_protect());
        assert!(matches!(deck.write_record(&[1]), Err(CassetteError::ReadOnly)));
        assert!(deck.toggle_write_protect());
        deck.write_record(&[1]).expect("unprotected");
    }

    #[test]
    fn leaders_set_mode_and_gap() {
        let tape = cas(&[(100, &[1])]);
        let mut deck = CassetteDeck::new();
        deck.insert(tape.path()).expect("insert");

        deck.leader_save();
        assert!(deck.recording());
        assert!(deck.motor_on());
        assert!(deck.writable());
        assert_eq!(deck.gap_delay_ms(), SAVE_LEADER_MS);

        deck.leader_load();
        assert!(!deck.recording());
        assert!(deck.readable());
        assert_eq!(deck.gap_delay_ms(), LOAD_LEADER_MS);
    }
}
