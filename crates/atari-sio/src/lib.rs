//! Atari 8-bit serial I/O bus.
//!
//! Up to eight disk drives (ATR and XFD images, optionally gzipped) and a
//! cassette deck (CAS containers and raw dumps), reached either through
//! POKEY's serial port byte by byte or through a patch of the OS SIO
//! routine that serves whole requests at once. Both paths share one
//! command table and give identical results.
//!
//! Time is counted in PAL scanlines; [`Sio`] is ticked once per line.

mod cassette;
mod checksum;
pub mod command;
mod config;
pub mod decompress;
mod disk;
mod drive;
mod error;
mod frame;
pub mod patch;
mod result;
mod sio;
mod snapshot;
pub mod timing;

pub use cassette::{
    CassetteDeck, LOAD_LEADER_MS, RAW_GAP_MS, RAW_LEADER_MS, RAW_RECORD_LEN, SAVE_LEADER_MS,
    TapeRecord, TapeStatus,
};
pub use checksum::sio_checksum;
pub use command::{Command, Direction};
pub use config::SioConfig;
pub use disk::{BINARY_BOOT_SECTOR, BINARY_BOOT_STATUS, DiskDrives, FORMAT_FILL, MAX_DRIVES};
pub use drive::{DriveLed, DriveUnit, UnitStatus};
pub use error::{CassetteError, DiskError, SnapshotError};
pub use frame::{COMMAND_FRAME_LEN, CommandFrameMachine, TransferState};
pub use patch::PatchOutcome;
pub use result::{ResultCode, SioResult};
pub use sio::{PokeySerial, SerialTiming, Sio};
pub use snapshot::{CassetteSnapshot, DriveSnapshot, FrameSnapshot, SioSnapshot};
