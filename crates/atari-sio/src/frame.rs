//! Byte-level SIO protocol, driven by POKEY.
//!
//! The computer raises the command line, shifts out a 5-byte command frame
//! (device, command, aux1, aux2, checksum) and drops the line. The drive
//! acknowledges, then either sends a data frame or takes one, and finishes
//! with a status byte.
//!
//! ```text
//! NoFrame -> CommandFrame -> StatusRead -+-> ReadFrame ------------> NoFrame
//!                                        +-> FormatFrame -> ReadFrame
//!                                        +-> WriteFrame -> FinalStatus -> NoFrame
//! ```
//!
//! `CasRead` is entered from `NoFrame` while the cassette motor runs; bytes
//! then come from the tape instead of a drive.
//!
//! Every byte the drive sends is preceded by a SERIN delay in scanlines,
//! collected with [`CommandFrameMachine::take_serin_delay`].

use serde::{Deserialize, Serialize};

use crate::checksum::sio_checksum;
use crate::command::{self, Command, Direction};
use crate::disk::DiskDrives;
use crate::drive::{DriveLed, UnitStatus};
use crate::result::ResultCode;
use crate::timing::{ACK_INTERVAL, FORMAT_DELAY, SECTOR_DELAY, SERIN_INTERVAL, SEROUT_INTERVAL};

pub const COMMAND_FRAME_LEN: usize = 5;

/// First and last device IDs answered by disk drives (`'1'`..`'8'`).
const FIRST_DISK_DEVICE: u8 = 0x31;
const LAST_DISK_DEVICE: u8 = 0x38;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    NoFrame,
    CommandFrame,
    /// Command frame accepted; the acknowledge is next.
    StatusRead,
    ReadFrame,
    WriteFrame,
    FinalStatus,
    /// A format result: like `ReadFrame` with a longer pause after the
    /// first byte.
    FormatFrame,
    CasRead,
}

pub struct CommandFrameMachine {
    pub(crate) state: TransferState,
    pub(crate) command: [u8; COMMAND_FRAME_LEN],
    pub(crate) command_index: usize,
    pub(crate) data: Vec<u8>,
    pub(crate) data_index: usize,
    pub(crate) expected: usize,
    pub(crate) serin_delay: Option<u32>,
    pub(crate) serout_delay: Option<u32>,
    delayed_sector: Option<u16>,
}

impl CommandFrameMachine {
    #[must_use]
    pub fn new(delayed_sector: Option<u16>) -> Self {
        Self {
            state: TransferState::NoFrame,
            command: [0; COMMAND_FRAME_LEN],
            command_index: 0,
            data: Vec::with_capacity(256 + 3),
            data_index: 0,
            expected: 0,
            serin_delay: None,
            serout_delay: None,
            delayed_sector,
        }
    }

    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// The last command frame received (possibly partial).
    #[must_use]
    pub fn command_frame(&self) -> &[u8; COMMAND_FRAME_LEN] {
        &self.command
    }

    #[must_use]
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Scanlines until the next SERIN interrupt, if one is due.
    pub fn take_serin_delay(&mut self) -> Option<u32> {
        self.serin_delay.take()
    }

    /// Scanlines until POKEY can accept the next SEROUT byte.
    pub fn take_serout_delay(&mut self) -> Option<u32> {
        self.serout_delay.take()
    }

    fn drive(&self) -> u8 {
        self.command[0].wrapping_sub(b'0')
    }

    fn sector(&self) -> u16 {
        u16::from_le_bytes([self.command[2], self.command[3]])
    }

    /// Command line asserted (`on`) or released.
    pub fn switch_command_frame(&mut self, on: bool) {
        if on {
            if self.state != TransferState::NoFrame {
                log::warn!("unexpected command frame in state {:?}", self.state);
            }
            self.command_index = 0;
            self.data_index = 0;
            self.expected = COMMAND_FRAME_LEN;
            self.state = TransferState::CommandFrame;
        } else {
            if !matches!(
                self.state,
                TransferState::StatusRead | TransferState::NoFrame | TransferState::ReadFrame
            ) {
                if !(self.state == TransferState::CommandFrame && self.command_index == 0) {
                    log::warn!("command frame unfinished in state {:?}", self.state);
                }
                self.state = TransferState::NoFrame;
            }
            self.command_index = 0;
        }
    }

    /// Cassette motor switched. Only an idle bus is handed to the tape.
    pub fn cassette_motor(&mut self, on: bool) {
        match (on, self.state) {
            (true, TransferState::NoFrame) => self.state = TransferState::CasRead,
            (false, TransferState::CasRead) => self.state = TransferState::NoFrame,
            _ => {}
        }
    }

    /// A byte shifted out of POKEY towards the drives.
    pub fn put_byte(&mut self, drives: &mut DiskDrives, byte: u8) {
        log::trace!("SIO out ${byte:02X} in {:?}", self.state);
        match self.state {
            TransferState::CommandFrame => self.command_byte(drives, byte),
            TransferState::WriteFrame => self.write_frame_byte(drives, byte),
            _ => {}
        }
        self.serout_delay = Some(SEROUT_INTERVAL);
    }

    fn command_byte(&mut self, drives: &DiskDrives, byte: u8) {
        if self.command_index >= self.expected {
            log::warn!("invalid command frame");
            self.state = TransferState::NoFrame;
            return;
        }
        self.command[self.command_index] = byte;
        self.command_index += 1;
        if self.command_index < self.expected {
            return;
        }

        let device = self.command[0];
        let addressed = (FIRST_DISK_DEVICE..=LAST_DISK_DEVICE).contains(&device)
            && drives.status(self.drive()) != UnitStatus::Off;
        let intact = sio_checksum(&self.command[..4]) == self.command[4];
        if addressed && intact {
            self.state = TransferState::StatusRead;
            self.serin_delay = Some(SERIN_INTERVAL + ACK_INTERVAL);
        } else {
            if !intact {
                log::debug!("command frame {:02X?} has a bad checksum", self.command);
            }
            self.state = TransferState::NoFrame;
        }
    }

    fn write_frame_byte(&mut self, drives: &mut DiskDrives, byte: u8) {
        if self.data_index >= self.expected {
            log::warn!("invalid data frame");
            return;
        }
        self.data.push(byte);
        self.data_index += 1;
        if self.data_index < self.expected {
            return;
        }

        let payload_len = self.expected - 1;
        if sio_checksum(&self.data[..payload_len]) == self.data[payload_len] {
            let code = match Command::decode(self.command[1]) {
                Some(cmd) => command::execute_output(
                    drives,
                    self.drive(),
                    cmd,
                    self.sector(),
                    &self.data[..payload_len],
                ),
                None => ResultCode::Error,
            };
            if code == ResultCode::Timeout {
                self.state = TransferState::NoFrame;
                return;
            }
            self.respond(&[ResultCode::Acknowledge.byte(), code.byte()]);
        } else {
            log::debug!("data frame checksum mismatch, write dropped");
            self.respond(&[ResultCode::Error.byte()]);
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.data_index = 0;
        self.expected = bytes.len();
        self.serin_delay = Some(SERIN_INTERVAL + ACK_INTERVAL);
        self.state = TransferState::FinalStatus;
    }

    /// A byte the drive sends to POKEY, on the SERIN interrupt.
    pub fn get_byte(&mut self, drives: &mut DiskDrives) -> u8 {
        match self.state {
            TransferState::StatusRead => self.dispatch(drives),
            TransferState::FormatFrame => {
                self.state = TransferState::ReadFrame;
                let byte = self.next_data_byte(drives);
                if self.state == TransferState::ReadFrame {
                    self.serin_delay = Some(FORMAT_DELAY);
                }
                byte
            }
            TransferState::ReadFrame | TransferState::FinalStatus => self.next_data_byte(drives),
            _ => 0,
        }
    }

    fn next_data_byte(&mut self, drives: &mut DiskDrives) -> u8 {
        if self.data_index >= self.expected {
            log::warn!("invalid read frame");
            drives.set_led_off();
            self.state = TransferState::NoFrame;
            return 0;
        }
        let byte = self.data[self.data_index];
        self.data_index += 1;
        if self.data_index >= self.expected {
            self.state = TransferState::NoFrame;
            drives.set_led_off();
        } else {
            self.serin_delay = Some(SERIN_INTERVAL);
        }
        byte
    }

    /// Acknowledge the command frame and run the command.
    fn dispatch(&mut self, drives: &mut DiskDrives) -> u8 {
        let Some(cmd) = Command::decode(self.command[1]) else {
            log::warn!("unknown command frame {:02X?}", self.command);
            self.state = TransferState::NoFrame;
            return ResultCode::Nak.byte();
        };
        let drive = self.drive();
        let sector = self.sector();
        self.data.clear();
        self.data_index = 0;

        match cmd.direction() {
            Direction::Output => {
                self.expected = command::data_size(drives, drive, cmd, sector) + 1;
                self.state = TransferState::WriteFrame;
                if cmd == Command::Write {
                    drives.set_led(DriveLed::Write(drive));
                }
            }
            Direction::Input => {
                let (code, payload) = command::execute_input(drives, drive, cmd, sector);
                self.data.push(code.byte());
                self.data.extend_from_slice(&payload);
                self.data.push(sio_checksum(&payload));
                self.expected = self.data.len();
                self.state = if cmd.is_format() {
                    TransferState::FormatFrame
                } else {
                    TransferState::ReadFrame
                };
                let mut delay = SERIN_INTERVAL;
                if cmd == Command::Read && self.delayed_sector == Some(sector) {
                    delay += SECTOR_DELAY;
                }
                self.serin_delay = Some(delay);
            }
        }
        ResultCode::Acknowledge.byte()
    }
}

impl Default for CommandFrameMachine {
    fn default() -> Self {
        Self::new(Some(1))
    }
}
