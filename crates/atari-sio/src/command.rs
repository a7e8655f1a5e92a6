//! Disk command table.
//!
//! Both the SIO patch and the byte-level frame machine decode commands and
//! run them through here, so the two paths cannot disagree about what a
//! command byte means or what it returns. They differ only in how the bytes
//! reach the CPU.
//!
//! | Byte            | Command             | Data phase        |
//! |-----------------|---------------------|-------------------|
//! | `$4E`           | Read Status Block   | 12 bytes in       |
//! | `$4F`           | Write Status Block  | 12 bytes out      |
//! | `$50 $57 $D0 $D7` | Write (verify/hispeed) | sector out   |
//! | `$52 $D2`       | Read                | sector in         |
//! | `$53`           | Status              | 4 bytes in        |
//! | `$21 $A1`       | Format              | staged size in    |
//! | `$22 $A2`       | Format enhanced     | 128 bytes in      |

use crate::disk::DiskDrives;
use crate::result::ResultCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ReadStatusBlock,
    WriteStatusBlock,
    Write,
    Read,
    Status,
    Format,
    FormatEnhanced,
}

/// Which way the data frame travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Drive to computer.
    Input,
    /// Computer to drive.
    Output,
}

impl Command {
    #[must_use]
    pub fn decode(byte: u8) -> Option<Self> {
        match byte {
            0x4E => Some(Command::ReadStatusBlock),
            0x4F => Some(Command::WriteStatusBlock),
            0x50 | 0x57 | 0xD0 | 0xD7 => Some(Command::Write),
            0x52 | 0xD2 => Some(Command::Read),
            0x53 => Some(Command::Status),
            0x21 | 0xA1 => Some(Command::Format),
            0x22 | 0xA2 => Some(Command::FormatEnhanced),
            _ => None,
        }
    }

    #[must_use]
    pub fn direction(self) -> Direction {
        match self {
            Command::WriteStatusBlock | Command::Write => Direction::Output,
            _ => Direction::Input,
        }
    }

    #[must_use]
    pub fn is_format(self) -> bool {
        matches!(self, Command::Format | Command::FormatEnhanced)
    }
}

/// Data frame length for a command, checksum excluded.
#[must_use]
pub fn data_size(drives: &DiskDrives, drive: u8, command: Command, sector: u16) -> usize {
    match command {
        Command::ReadStatusBlock | Command::WriteStatusBlock => 12,
        Command::Read | Command::Write => drives.size_and_offset(drive, sector).0,
        Command::Status => 4,
        Command::Format => drives
            .unit(drive)
            .map_or(128, |unit| unit.format_geometry().0 as usize),
        Command::FormatEnhanced => 128,
    }
}

/// Run an input command. Returns the result code and exactly
/// [`data_size`] bytes of data (zeros on failure).
pub fn execute_input(
    drives: &mut DiskDrives,
    drive: u8,
    command: Command,
    sector: u16,
) -> (ResultCode, Vec<u8>) {
    let size = data_size(drives, drive, command, sector);
    let outcome = match command {
        Command::ReadStatusBlock => drives.read_status_block(drive).map(|block| block.to_vec()),
        Command::Read => {
            let mut buf = vec![0; size];
            drives.read_sector(drive, sector, &mut buf).map(|_| buf)
        }
        Command::Status => drives.drive_status(drive).map(|status| status.to_vec()),
        Command::Format => {
            let (sector_size, sector_count) = drives
                .unit(drive)
                .map_or((128, 720), |unit| unit.format_geometry());
            drives.format_disk(drive, sector_size, sector_count)
        }
        Command::FormatEnhanced => drives.format_disk(drive, 128, 1040),
        Command::WriteStatusBlock | Command::Write => return (ResultCode::Error, vec![0; size]),
    };
    match outcome {
        Ok(mut data) => {
            data.resize(size, 0);
            (ResultCode::Complete, data)
        }
        Err(e) => {
            log::debug!("D{drive}: {command:?} sector {sector}: {e}");
            (e.result_code(), vec![0; size])
        }
    }
}

/// Run an output command with the data frame from the computer.
pub fn execute_output(
    drives: &mut DiskDrives,
    drive: u8,
    command: Command,
    sector: u16,
    data: &[u8],
) -> ResultCode {
    let outcome = match command {
        Command::WriteStatusBlock => drives.write_status_block(drive, data),
        Command::Write => drives.write_sector(drive, sector, data).map(|_| ()),
        _ => return ResultCode::Error,
    };
    match outcome {
        Ok(()) => ResultCode::Complete,
        Err(e) => {
            log::debug!("D{drive}: {command:?} sector {sector}: {e}");
            e.result_code()
        }
    }
}
