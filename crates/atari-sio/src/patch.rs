//! OS SIO patch.
//!
//! With the patch installed, the CPU glue traps the OS SIOV entry and calls
//! [`Sio::sio_patch`]. The whole request described by the device control
//! block is carried out in one step: no POKEY traffic, no interrupts.
//!
//! | Address | Name     | Use                                 |
//! |---------|----------|-------------------------------------|
//! | `$0300` | DDEVIC   | device bus ID                       |
//! | `$0301` | DUNIT    | unit number, added to DDEVIC - 1    |
//! | `$0302` | DCOMND   | command byte                        |
//! | `$0303` | DSTATS   | result, written back                |
//! | `$0304` | DBUF     | buffer address (LE word)            |
//! | `$0308` | DBYT     | byte count (LE word)                |
//! | `$030A` | DAUX1/2  | sector number; DAUX2 is the tape gap flag |
//!
//! CRITIC (`$42`) is cleared on return, as the OS does.

use emu_core::Bus;

use crate::command::{self, Command, Direction};
use crate::drive::UnitStatus;
use crate::result::{ResultCode, SioResult};
use crate::sio::Sio;
use crate::timing::SECTOR_DELAY;

pub const DDEVIC: u16 = 0x0300;
pub const DUNIT: u16 = 0x0301;
pub const DCOMND: u16 = 0x0302;
pub const DSTATS: u16 = 0x0303;
pub const DBUF: u16 = 0x0304;
pub const DBYT: u16 = 0x0308;
pub const DAUX1: u16 = 0x030A;
pub const DAUX2: u16 = 0x030B;
pub const CRITIC: u16 = 0x0042;

const FIRST_DISK_DEVICE: u8 = 0x31;
const LAST_DISK_DEVICE: u8 = 0x38;
const CASSETTE_DEVICE: u8 = 0x60;

const CASSETTE_READ: u8 = 0x52;
const CASSETTE_WRITE: u8 = 0x57;

/// Result of one trapped SIOV call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Not done yet. Leave PC on the trap and call again.
    Retry,
    /// Return to the caller with this Y and N.
    Complete(SioResult),
}

impl Sio {
    /// Service the request in the device control block.
    ///
    /// `ypos` is the current scanline; a held-back read only counts down
    /// when it changes.
    pub fn sio_patch<B: Bus>(&mut self, bus: &mut B, ypos: u16) -> PatchOutcome {
        let device = bus
            .read(DDEVIC)
            .wrapping_add(bus.read(DUNIT))
            .wrapping_sub(1);
        let command = bus.read(DCOMND);
        let buffer = bus.read_word(DBUF);
        let length = usize::from(bus.read_word(DBYT));
        let sector = bus.read_word(DAUX1);

        let code = match device {
            FIRST_DISK_DEVICE..=LAST_DISK_DEVICE => {
                let drive = device - b'0';
                match self.disk_request(bus, drive, command, buffer, length, sector, ypos) {
                    Some(code) => code,
                    None => return PatchOutcome::Retry,
                }
            }
            CASSETTE_DEVICE => self.cassette_request(bus, command, buffer, length),
            _ => {
                log::debug!("SIO patch: no device ${device:02X}");
                ResultCode::Timeout
            }
        };

        let result = SioResult::from(code);
        bus.write(DSTATS, result.status_register);
        bus.write(CRITIC, 0);
        self.drives.set_led_off();
        PatchOutcome::Complete(result)
    }

    fn disk_request<B: Bus>(
        &mut self,
        bus: &mut B,
        drive: u8,
        command_byte: u8,
        buffer: u16,
        length: usize,
        sector: u16,
        ypos: u16,
    ) -> Option<ResultCode> {
        if self.drives.status(drive) == UnitStatus::Off {
            return Some(ResultCode::Timeout);
        }
        let Some(command) = Command::decode(command_byte) else {
            log::warn!("SIO patch: unknown command ${command_byte:02X} for D{drive}:");
            return Some(ResultCode::Nak);
        };

        // Only reads arm or clear the hold.
        if command == Command::Read {
            if self.config.delayed_sector == Some(sector) {
                if self.delay_counter > 0 {
                    if self.last_ypos != Some(ypos) {
                        self.last_ypos = Some(ypos);
                        self.delay_counter -= 1;
                    }
                    return None;
                }
                self.delay_counter = SECTOR_DELAY;
            } else {
                self.delay_counter = 0;
            }
        }

        let size = command::data_size(&self.drives, drive, command, sector);
        if length != size {
            log::warn!("SIO patch: D{drive}: {command:?} wants {size} bytes, DBYT is {length}");
            return Some(ResultCode::Error);
        }

        let code = match command.direction() {
            Direction::Input => {
                let (code, data) = command::execute_input(&mut self.drives, drive, command, sector);
                if code == ResultCode::Complete {
                    bus.write_block(buffer, &data);
                }
                code
            }
            Direction::Output => {
                let mut data = vec![0; size];
                bus.read_block(buffer, &mut data);
                command::execute_output(&mut self.drives, drive, command, sector, &data)
            }
        };
        Some(code)
    }

    fn cassette_request<B: Bus>(
        &mut self,
        bus: &mut B,
        command: u8,
        buffer: u16,
        length: usize,
    ) -> ResultCode {
        if !self.cassette.is_loaded() {
            return ResultCode::Timeout;
        }
        let short_gaps = bus.read(DAUX2) != 0;
        let outcome = match command {
            CASSETTE_READ => {
                self.cassette.add_gap(if short_gaps { 160 } else { 2000 });
                self.cassette.read_to_memory(bus, buffer, length)
            }
            CASSETTE_WRITE => {
                self.cassette.add_gap(if short_gaps { 260 } else { 3000 });
                self.cassette.write_from_memory(bus, buffer, length)
            }
            _ => {
                log::warn!("SIO patch: unknown cassette command ${command:02X}");
                return ResultCode::Nak;
            }
        };
        match outcome {
            Ok(()) => ResultCode::Complete,
            Err(e) => {
                log::debug!("SIO patch: cassette: {e}");
                ResultCode::Error
            }
        }
    }

    /// OS hook at the start of a cassette load.
    pub fn cassette_leader_load(&mut self) {
        self.cassette.leader_load();
        self.frame.cassette_motor(true);
    }

    /// OS hook at the start of a cassette save.
    pub fn cassette_leader_save(&mut self) {
        self.cassette.leader_save();
        self.frame.cassette_motor(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use emu_core::FlatRam;
    use format_atr::{BootLayout, ImageKind};
    use tempfile::NamedTempFile;

    use crate::config::SioConfig;

    fn dcb(ram: &mut FlatRam, device: u8, unit: u8, command: u8, buffer: u16, length: u16, aux: u16) {
        ram.write(DDEVIC, device);
        ram.write(DUNIT, unit);
        ram.write(DCOMND, command);
        ram.write_block(DBUF, &buffer.to_le_bytes());
        ram.write_block(DBYT, &length.to_le_bytes());
        ram.write_block(DAUX1, &aux.to_le_bytes());
    }

    fn disk() -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp");
        format_atr::write_blank(&mut file, ImageKind::Atr, 128, 720, BootLayout::Logical)
            .expect("image");
        file.flush().expect("flush");
        file
    }

    fn complete(outcome: PatchOutcome) -> SioResult {
        match outcome {
            PatchOutcome::Complete(result) => result,
            PatchOutcome::Retry => panic!("request did not complete"),
        }
    }

    fn sio() -> Sio {
        Sio::new(SioConfig {
            patch_enabled: true,
            delayed_sector: None,
        })
    }

    #[test]
    fn write_then_read_sector() {
        let image = disk();
        let mut sio = sio();
        sio.drives_mut().mount(1, image.path(), false).expect("mount");
        let mut ram = FlatRam::new();
        ram.write(CRITIC, 1);

        let pattern: Vec<u8> = (0..128u8).collect();
        ram.write_block(0x2000, &pattern);
        dcb(&mut ram, 0x31, 1, 0x57, 0x2000, 128, 10);
        let result = complete(sio.sio_patch(&mut ram, 0));
        assert_eq!(result.code, ResultCode::Complete);
        assert_eq!(ram.peek(DSTATS), 1);
        assert_eq!(ram.peek(CRITIC), 0);

        dcb(&mut ram, 0x31, 1, 0x52, 0x3000, 128, 10);
        let result = complete(sio.sio_patch(&mut ram, 0));
        assert_eq!(result.code, ResultCode::Complete);
        assert!(!result.negative_flag);
        let mut back = [0u8; 128];
        ram.read_block(0x3000, &mut back);
        assert_eq!(back[..], pattern[..]);
    }

    #[test]
    fn error_codes_reach_dstats() {
        let image = disk();
        let mut sio = sio();
        sio.drives_mut().mount(1, image.path(), false).expect("mount");
        sio.drives_mut().disable_drive(3);
        let mut ram = FlatRam::new();

        dcb(&mut ram, 0x31, 3, 0x53, 0x2000, 4, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Timeout);
        assert_eq!(ram.peek(DSTATS), 138);

        dcb(&mut ram, 0x31, 2, 0x52, 0x2000, 128, 1);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Nak);
        assert_eq!(ram.peek(DSTATS), 144);

        dcb(&mut ram, 0x31, 1, 0x52, 0x2000, 128, 721);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Error);
        assert_eq!(ram.peek(DSTATS), 146);

        dcb(&mut ram, 0x31, 1, 0x66, 0x2000, 128, 1);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Nak);

        dcb(&mut ram, 0x45, 1, 0x52, 0x2000, 128, 1);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Timeout);
    }

    #[test]
    fn buffer_length_must_match() {
        let image = disk();
        let mut sio = sio();
        sio.drives_mut().mount(1, image.path(), false).expect("mount");
        let mut ram = FlatRam::new();
        ram.write_block(0x2000, &[0xEE; 4]);

        dcb(&mut ram, 0x31, 1, 0x52, 0x2000, 64, 4);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Error);
        assert_eq!(ram.peek(0x2000), 0xEE, "buffer untouched");

        dcb(&mut ram, 0x31, 1, 0x53, 0x2000, 4, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Complete);
    }

    #[test]
    fn repeated_boot_sector_reads_are_held_back() {
        let image = disk();
        let mut sio = Sio::default();
        sio.drives_mut().mount(1, image.path(), false).expect("mount");
        let mut ram = FlatRam::new();
        dcb(&mut ram, 0x31, 1, 0x52, 0x2000, 128, 1);

        complete(sio.sio_patch(&mut ram, 0));

        // Same scanline: no progress.
        assert_eq!(sio.sio_patch(&mut ram, 5), PatchOutcome::Retry);
        assert_eq!(sio.sio_patch(&mut ram, 5), PatchOutcome::Retry);

        let mut calls = 1;
        let mut ypos = 6u16;
        while sio.sio_patch(&mut ram, ypos) == PatchOutcome::Retry {
            ypos = (ypos + 1) % 312;
            calls += 1;
            assert!(calls <= SECTOR_DELAY as usize + 2, "never released");
        }
        assert_eq!(calls, SECTOR_DELAY as usize);

        // Another sector clears the hold.
        dcb(&mut ram, 0x31, 1, 0x52, 0x2000, 128, 4);
        complete(sio.sio_patch(&mut ram, 0));
        dcb(&mut ram, 0x31, 1, 0x52, 0x2000, 128, 1);
        complete(sio.sio_patch(&mut ram, 0));
    }

    #[test]
    fn status_between_boot_sector_reads_keeps_the_hold() {
        let image = disk();
        let mut sio = Sio::default();
        sio.drives_mut().mount(1, image.path(), false).expect("mount");
        let mut ram = FlatRam::new();

        dcb(&mut ram, 0x31, 1, 0x52, 0x2000, 128, 1);
        complete(sio.sio_patch(&mut ram, 0));

        dcb(&mut ram, 0x31, 1, 0x53, 0x2100, 4, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Complete);

        dcb(&mut ram, 0x31, 1, 0x52, 0x2000, 128, 1);
        assert_eq!(sio.sio_patch(&mut ram, 1), PatchOutcome::Retry);
    }

    #[test]
    fn cassette_write_longer_than_a_chunk_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("long.cas");
        let mut sio = sio();
        sio.cassette_mut().create_new(&path, "").expect("create");
        let mut ram = FlatRam::new();

        sio.cassette_leader_save();
        dcb(&mut ram, 0x60, 1, 0x57, 0x0400, 0xFFFF, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Error);
        assert_eq!(ram.peek(DSTATS), 146);
        sio.set_cassette_motor(false);
        assert!(sio.cassette().blocks().is_empty());
    }

    #[test]
    fn cassette_without_tape_times_out() {
        let mut sio = sio();
        let mut ram = FlatRam::new();
        dcb(&mut ram, 0x60, 1, 0x52, 0x0400, 128, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Timeout);
    }

    #[test]
    fn cassette_save_and_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("save.cas");
        let mut sio = sio();
        sio.cassette_mut().create_new(&path, "").expect("create");
        let mut ram = FlatRam::new();

        sio.cassette_leader_save();
        let record: Vec<u8> = [0x55, 0x55, 0xFC]
            .into_iter()
            .chain((0..128u8).map(|i| i ^ 0x5A))
            .collect();
        ram.write_block(0x0400, &record);
        dcb(&mut ram, 0x60, 1, 0x57, 0x0400, 131, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Complete);
        sio.set_cassette_motor(false);

        let blocks = sio.cassette().blocks().to_vec();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].length, 132);
        assert_eq!(blocks[0].gap_ms, 19_200 + 3000);

        sio.cassette_mut().insert(&path).expect("reinsert");
        sio.cassette_leader_load();
        dcb(&mut ram, 0x60, 1, 0x52, 0x0800, 131, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Complete);
        let mut back = vec![0u8; 131];
        ram.read_block(0x0800, &mut back);
        assert_eq!(back, record);

        dcb(&mut ram, 0x60, 1, 0x52, 0x0800, 131, 0);
        assert_eq!(complete(sio.sio_patch(&mut ram, 0)).code, ResultCode::Error);
        assert!(sio.cassette().end_of_tape());
    }
}
