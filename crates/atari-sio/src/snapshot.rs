//! Save states.
//!
//! A snapshot records which files are mounted and where every state
//! machine stands. Image contents are not copied; the files are reopened on
//! restore.

use std::path::PathBuf;

use format_atr::Geometry;
use serde::{Deserialize, Serialize};

use crate::disk::MAX_DRIVES;
use crate::drive::UnitStatus;
use crate::error::SnapshotError;
use crate::frame::{COMMAND_FRAME_LEN, TransferState};
use crate::sio::Sio;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveSnapshot {
    pub status: UnitStatus,
    pub path: Option<PathBuf>,
    pub read_only_requested: bool,
    pub geometry: Geometry,
    pub format_sector_size: u16,
    pub format_sector_count: u32,
    pub io_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub state: TransferState,
    pub command: [u8; COMMAND_FRAME_LEN],
    pub command_index: usize,
    pub data: Vec<u8>,
    pub data_index: usize,
    pub expected: usize,
    pub serin_delay: Option<u32>,
    pub serout_delay: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassetteSnapshot {
    pub path: PathBuf,
    pub current_block: usize,
    pub motor_on: bool,
    pub record: bool,
    pub write_protect: bool,
    pub eof: bool,
    pub elapsed: i64,
    pub next_irq: i64,
    pub save_time: i64,
    pub gap_delay_ms: u32,
    pub buffer: Vec<u8>,
    pub buffer_index: usize,
    pub record_baud: u16,
    pub serin_byte: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SioSnapshot {
    pub drives: Vec<DriveSnapshot>,
    pub binary_boot: bool,
    pub frame: FrameSnapshot,
    pub delay_counter: u32,
    pub last_ypos: Option<u16>,
    pub serin_delay: Option<u32>,
    pub cassette: Option<CassetteSnapshot>,
}

impl Sio {
    /// Capture the current state. A record being written to tape is not
    /// included; stop the motor first to flush it.
    #[must_use]
    pub fn snapshot(&self) -> SioSnapshot {
        let drives = self
            .drives
            .units()
            .iter()
            .map(|unit| DriveSnapshot {
                status: unit.status,
                path: unit.path.clone(),
                read_only_requested: unit.read_only_requested,
                geometry: unit.geometry,
                format_sector_size: unit.format_sector_size,
                format_sector_count: unit.format_sector_count,
                io_failed: unit.io_failed,
            })
            .collect();

        let frame = &self.frame;
        let deck = &self.cassette;
        let cassette = deck.path.as_ref().map(|path| CassetteSnapshot {
            path: path.clone(),
            current_block: deck.current_block,
            motor_on: deck.motor_on,
            record: deck.record,
            write_protect: deck.write_protect,
            eof: deck.eof,
            elapsed: deck.elapsed,
            next_irq: deck.next_irq,
            save_time: deck.save_time,
            gap_delay_ms: deck.gap_delay_ms,
            buffer: deck.buffer.clone(),
            buffer_index: deck.buffer_index,
            record_baud: deck.record_baud,
            serin_byte: deck.serin_byte,
        });

        SioSnapshot {
            drives,
            binary_boot: self.drives.binary_boot(),
            frame: FrameSnapshot {
                state: frame.state,
                command: frame.command,
                command_index: frame.command_index,
                data: frame.data.clone(),
                data_index: frame.data_index,
                expected: frame.expected,
                serin_delay: frame.serin_delay,
                serout_delay: frame.serout_delay,
            },
            delay_counter: self.delay_counter,
            last_ypos: self.last_ypos,
            serin_delay: self.serin_delay,
            cassette,
        }
    }

    /// Reopen the snapshot's files and put every state machine back.
    pub fn restore(&mut self, snapshot: &SioSnapshot) -> Result<(), SnapshotError> {
        if snapshot.drives.len() != MAX_DRIVES {
            return Err(SnapshotError::DriveCount(snapshot.drives.len(), MAX_DRIVES));
        }

        for (index, saved) in snapshot.drives.iter().enumerate() {
            let drive = index as u8 + 1;
            self.drives.dismount(drive);
            self.drives.enable_drive(drive);
            if let Some(path) = &saved.path {
                self.drives.mount(drive, path, saved.read_only_requested)?;
            }
            let unit = &mut self.drives.units_mut()[index];
            if unit.geometry != saved.geometry {
                log::warn!("D{drive}: image changed since the snapshot was taken");
            }
            if saved.status == UnitStatus::Off {
                unit.status = UnitStatus::Off;
            }
            unit.format_sector_size = saved.format_sector_size;
            unit.format_sector_count = saved.format_sector_count;
            unit.io_failed = saved.io_failed;
        }
        self.drives.set_binary_boot(snapshot.binary_boot);

        let frame = &snapshot.frame;
        self.frame.state = frame.state;
        self.frame.command = frame.command;
        self.frame.command_index = frame.command_index;
        self.frame.data.clone_from(&frame.data);
        self.frame.data_index = frame.data_index;
        self.frame.expected = frame.expected;
        self.frame.serin_delay = frame.serin_delay;
        self.frame.serout_delay = frame.serout_delay;

        self.delay_counter = snapshot.delay_counter;
        self.last_ypos = snapshot.last_ypos;
        self.serin_delay = snapshot.serin_delay;

        self.cassette.remove();
        if let Some(saved) = &snapshot.cassette {
            self.cassette.insert(&saved.path)?;
            let deck = &mut self.cassette;
            deck.current_block = saved.current_block.clamp(1, deck.max_block + 1);
            deck.motor_on = saved.motor_on;
            deck.record = saved.record;
            deck.write_protect = saved.write_protect;
            deck.eof = saved.eof;
            deck.elapsed = saved.elapsed;
            deck.next_irq = saved.next_irq;
            deck.save_time = saved.save_time;
            deck.gap_delay_ms = saved.gap_delay_ms;
            deck.buffer.clone_from(&saved.buffer);
            deck.buffer_index = saved.buffer_index.min(deck.buffer.len());
            deck.record_baud = saved.record_baud;
            deck.serin_byte = saved.serin_byte;
            deck.update_flags();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use format_atr::{BootLayout, ImageKind};
    use tempfile::NamedTempFile;

    use crate::config::SioConfig;

    fn disk(size: u16, count: u32) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp");
        format_atr::write_blank(&mut file, ImageKind::Atr, size, count, BootLayout::Logical)
            .expect("image");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn restore_reopens_images_and_state() {
        let d1 = disk(128, 720);
        let d2 = disk(256, 720);
        let mut tape = NamedTempFile::new().expect("temp");
        format_cas::write_file_header(&mut tape, "", 600).expect("header");
        for _ in 0..3 {
            format_cas::write_data_chunk(&mut tape, &[1, 2, 3], 100).expect("chunk");
        }
        tape.flush().expect("flush");

        let mut sio = Sio::new(SioConfig::default());
        sio.drives_mut().mount(1, d1.path(), false).expect("mount");
        sio.drives_mut().mount(2, d2.path(), true).expect("mount");
        sio.drives_mut().disable_drive(5);
        sio.drives_mut()
            .write_status_block(1, &[40, 1, 0, 26, 0, 4, 0, 128, 0xFF, 0, 0, 0])
            .expect("stage");
        sio.cassette_mut().insert(tape.path()).expect("insert");
        sio.cassette_mut().seek(3);
        sio.switch_command_frame(true);
        sio.delay_counter = 77;

        let snapshot = sio.snapshot();
        let json = serde_json::to_string(&snapshot).expect("serialize");
        let parsed: SioSnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, snapshot);

        let mut fresh = Sio::default();
        fresh.restore(&parsed).expect("restore");
        assert_eq!(fresh.snapshot(), snapshot);
        assert_eq!(fresh.drives().status(2), UnitStatus::ReadOnly);
        assert_eq!(fresh.drives().status(5), UnitStatus::Off);
        assert_eq!(
            fresh.drives().unit(1).map(|u| u.format_geometry()),
            Some((128, 1040))
        );
        assert_eq!(fresh.cassette().current_block(), 3);
        assert_eq!(fresh.frame().state(), TransferState::CommandFrame);
    }

    #[test]
    fn wrong_drive_count_is_rejected() {
        let mut sio = Sio::default();
        let mut snapshot = sio.snapshot();
        snapshot.drives.pop();
        assert!(matches!(
            sio.restore(&snapshot),
            Err(SnapshotError::DriveCount(7, 8))
        ));
    }
}
