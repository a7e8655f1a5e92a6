//! The serial bus as POKEY sees it.
//!
//! [`Sio`] owns the drives, the cassette deck and the command frame
//! machine. The machine glue forwards POKEY's serial traffic here:
//!
//! | POKEY event            | Call                         |
//! |------------------------|------------------------------|
//! | write to SEROUT        | [`Sio::serout`]              |
//! | SERIN interrupt        | [`Sio::serin`]               |
//! | PIA command line       | [`Sio::switch_command_frame`]|
//! | PIA motor line         | [`Sio::set_cassette_motor`]  |
//! | SKSTAT data bit        | [`Sio::serial_line_level`]   |
//! | SKCTL serial reset     | [`Sio::reset_pokey`]         |
//!
//! and ticks it once per scanline.

use emu_core::{Observable, Tickable, Value};

use crate::cassette::CassetteDeck;
use crate::config::SioConfig;
use crate::disk::{DiskDrives, MAX_DRIVES};
use crate::drive::DriveLed;
use crate::frame::{CommandFrameMachine, TransferState};
use crate::timing::{SEROUT_INTERVAL, XMTDONE_INTERVAL, pokey_byte_scanlines};

/// The POKEY state the serial bus depends on.
pub trait PokeySerial {
    /// AUDF register of channel 1-4.
    fn audf(&self, channel: usize) -> u8;
    /// SKCTL two-tone mode, used for cassette output.
    fn two_tone(&self) -> bool;
}

/// Interrupt delays after a SEROUT write, in scanlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialTiming {
    /// Until POKEY can take the next byte.
    pub serout: u32,
    /// Until the shift register is empty.
    pub xmtdone: u32,
}

pub struct Sio {
    pub(crate) drives: DiskDrives,
    pub(crate) cassette: CassetteDeck,
    pub(crate) frame: CommandFrameMachine,
    pub(crate) config: SioConfig,
    /// Scanlines left before a held-back sector read may complete.
    pub(crate) delay_counter: u32,
    pub(crate) last_ypos: Option<u16>,
    /// SERIN interrupt raised by the tape.
    pub(crate) serin_delay: Option<u32>,
}

impl Sio {
    #[must_use]
    pub fn new(config: SioConfig) -> Self {
        Self {
            drives: DiskDrives::new(),
            cassette: CassetteDeck::new(),
            frame: CommandFrameMachine::new(config.delayed_sector),
            config,
            delay_counter: 0,
            last_ypos: None,
            serin_delay: None,
        }
    }

    #[must_use]
    pub fn drives(&self) -> &DiskDrives {
        &self.drives
    }

    pub fn drives_mut(&mut self) -> &mut DiskDrives {
        &mut self.drives
    }

    #[must_use]
    pub fn cassette(&self) -> &CassetteDeck {
        &self.cassette
    }

    pub fn cassette_mut(&mut self) -> &mut CassetteDeck {
        &mut self.cassette
    }

    #[must_use]
    pub fn frame(&self) -> &CommandFrameMachine {
        &self.frame
    }

    #[must_use]
    pub fn config(&self) -> &SioConfig {
        &self.config
    }

    /// Install or remove the OS patch. Without it, disk and tape traffic
    /// goes through POKEY byte by byte.
    pub fn set_patch_enabled(&mut self, enabled: bool) {
        self.config.patch_enabled = enabled;
    }

    pub fn switch_command_frame(&mut self, on: bool) {
        self.frame.switch_command_frame(on);
    }

    pub fn set_cassette_motor(&mut self, on: bool) {
        self.cassette.toggle_motor(on);
        self.frame.cassette_motor(on);
    }

    /// A byte written to SEROUT.
    ///
    /// In two-tone mode the byte goes to tape at the rate set by channels
    /// 3 and 4; otherwise it goes to the drives.
    pub fn serout<P: PokeySerial>(&mut self, byte: u8, pokey: &P) -> SerialTiming {
        if pokey.two_tone() {
            let byte_time = pokey_byte_scanlines(pokey.audf(3), pokey.audf(4));
            self.cassette.put_byte(byte, byte_time);
            let serout = u32::try_from(byte_time).unwrap_or(u32::MAX).max(1);
            return SerialTiming {
                serout,
                xmtdone: serout.saturating_mul(2).saturating_sub(2),
            };
        }
        self.frame.put_byte(&mut self.drives, byte);
        SerialTiming {
            serout: self.frame.take_serout_delay().unwrap_or(SEROUT_INTERVAL),
            xmtdone: XMTDONE_INTERVAL,
        }
    }

    /// The byte for SERIN, on the SERIN interrupt.
    pub fn serin(&mut self) -> u8 {
        if self.frame.state() == TransferState::CasRead {
            self.cassette.get_byte()
        } else {
            self.frame.get_byte(&mut self.drives)
        }
    }

    /// Scanlines until the next SERIN interrupt, if one is pending.
    pub fn take_serin_delay(&mut self) -> Option<u32> {
        self.serin_delay
            .take()
            .or_else(|| self.frame.take_serin_delay())
    }

    /// Level of the serial data-in line. True is mark.
    #[must_use]
    pub fn serial_line_level(&self) -> bool {
        self.cassette.serial_line_level()
    }

    /// Scanlines until the tape byte in flight is complete.
    #[must_use]
    pub fn input_irq_delay(&self) -> u32 {
        self.cassette.input_irq_delay()
    }

    pub fn reset_pokey(&mut self) {
        self.cassette.reset_serial();
    }

    /// Drive activity light.
    #[must_use]
    pub fn led(&self) -> DriveLed {
        self.drives.led()
    }
}

impl Default for Sio {
    fn default() -> Self {
        Self::new(SioConfig::default())
    }
}

impl Tickable for Sio {
    /// One scanline. Only the tape has a clock of its own, and it only
    /// runs while POKEY reads it.
    fn tick(&mut self) {
        if self.config.patch_enabled {
            return;
        }
        if self.cassette.add_scan_line() && self.frame.state() == TransferState::CasRead {
            self.serin_delay = Some(1);
        }
    }
}

impl Observable for Sio {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "frame.state" => return Some(format!("{:?}", self.frame.state()).into()),
            "frame.command" => {
                let text = self
                    .frame
                    .command_frame()
                    .iter()
                    .map(|b| format!("{b:02X}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                return Some(text.into());
            }
            "frame.index" => return Some(Value::U32(self.frame.data_index() as u32)),
            "frame.expected" => return Some(Value::U32(self.frame.expected() as u32)),
            "cassette.block" => return Some(Value::U32(self.cassette.current_block() as u32)),
            "cassette.blocks" => return Some(Value::U32(self.cassette.max_block() as u32)),
            "cassette.motor" => return Some(self.cassette.motor_on().into()),
            "cassette.record" => return Some(self.cassette.recording().into()),
            "cassette.eof" => return Some(self.cassette.end_of_tape().into()),
            "led" => return Some(format!("{:?}", self.drives.led()).into()),
            _ => {}
        }

        let rest = path.strip_prefix("drive")?;
        let (number, field) = rest.split_once('.')?;
        let drive: u8 = number.parse().ok()?;
        let unit = self.drives.unit(drive)?;
        match field {
            "status" => Some(format!("{:?}", unit.status()).into()),
            "sectors" => Some(Value::U32(unit.sector_count())),
            "sector_size" => Some(Value::U16(unit.sector_size())),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = [
            "frame.state",
            "frame.command",
            "frame.index",
            "frame.expected",
            "cassette.block",
            "cassette.blocks",
            "cassette.motor",
            "cassette.record",
            "cassette.eof",
            "led",
        ]
        .iter()
        .map(|p| (*p).to_string())
        .collect();
        for drive in 1..=MAX_DRIVES {
            for field in ["status", "sectors", "sector_size"] {
                paths.push(format!("drive{drive}.{field}"));
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::checksum::sio_checksum;
    use tempfile::NamedTempFile;

    struct Pokey {
        two_tone: bool,
    }

    impl PokeySerial for Pokey {
        fn audf(&self, channel: usize) -> u8 {
            match channel {
                3 => 0xCC,
                4 => 0x05,
                _ => 0,
            }
        }

        fn two_tone(&self) -> bool {
            self.two_tone
        }
    }

    const DRIVES: Pokey = Pokey { two_tone: false };

    fn timed() -> Sio {
        Sio::new(SioConfig {
            patch_enabled: false,
            delayed_sector: None,
        })
    }

    #[test]
    fn status_over_the_wire() {
        let mut sio = timed();
        let frame = [0x31, 0x53, 0, 0];
        sio.switch_command_frame(true);
        for byte in frame {
            sio.serout(byte, &DRIVES);
        }
        let timing = sio.serout(sio_checksum(&frame), &DRIVES);
        assert_eq!(timing, SerialTiming { serout: 8, xmtdone: 15 });
        sio.switch_command_frame(false);

        assert!(sio.take_serin_delay().is_some());
        assert_eq!(sio.serin(), b'A');
        assert_eq!(sio.serin(), b'C');
        let status: Vec<u8> = (0..4).map(|_| sio.serin()).collect();
        assert_eq!(status, [0x10, 0x7F, 0x01, 0x00]);
        assert_eq!(sio.serin(), sio_checksum(&status));
        assert_eq!(sio.frame().state(), TransferState::NoFrame);
    }

    #[test]
    fn tape_bytes_raise_serin_while_motor_runs() {
        let mut tape = NamedTempFile::new().expect("temp");
        format_cas::write_file_header(&mut tape, "", 600).expect("header");
        format_cas::write_data_chunk(&mut tape, &[0x55, 0x55], 10).expect("chunk");
        tape.flush().expect("flush");

        let mut sio = timed();
        sio.cassette_mut().insert(tape.path()).expect("insert");
        sio.set_cassette_motor(true);
        assert_eq!(sio.frame().state(), TransferState::CasRead);

        let mut lines = 0;
        while sio.take_serin_delay().is_none() {
            sio.tick();
            lines += 1;
            assert!(lines < 5_000, "no byte from tape");
        }
        assert_eq!(sio.serin(), 0x55);

        sio.set_cassette_motor(false);
        assert_eq!(sio.frame().state(), TransferState::NoFrame);
    }

    #[test]
    fn patched_machine_does_not_advance_the_tape() {
        let mut tape = NamedTempFile::new().expect("temp");
        format_cas::write_file_header(&mut tape, "", 600).expect("header");
        format_cas::write_data_chunk(&mut tape, &[1], 0).expect("chunk");
        tape.flush().expect("flush");

        let mut sio = Sio::default();
        sio.cassette_mut().insert(tape.path()).expect("insert");
        sio.set_cassette_motor(true);
        sio.tick_n(1000);
        assert_eq!(sio.take_serin_delay(), None);
        assert_eq!(sio.cassette().current_block(), 1);
    }

    #[test]
    fn two_tone_output_goes_to_tape() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("out.cas");
        let mut sio = timed();
        sio.cassette_mut().create_new(&path, "").expect("create");
        sio.set_cassette_motor(true);

        let pokey = Pokey { two_tone: true };
        let timing = sio.serout(0x55, &pokey);
        assert!(timing.serout > 250, "{timing:?}");
        assert_eq!(timing.xmtdone, timing.serout * 2 - 2);
        assert_eq!(sio.frame().state(), TransferState::CasRead);

        sio.set_cassette_motor(false);
        assert_eq!(sio.cassette().max_block(), 1);
    }

    #[test]
    fn observable_paths() {
        let sio = Sio::default();
        assert_eq!(sio.query("frame.state"), Some(Value::from("NoFrame")));
        assert_eq!(sio.query("drive1.status"), Some(Value::from("NoDisk")));
        assert_eq!(sio.query("drive9.status"), None);
        assert_eq!(sio.query("cassette.motor"), Some(Value::Bool(false)));
        assert_eq!(sio.query("nonsense"), None);
        for path in sio.query_paths() {
            assert!(sio.query(&path).is_some(), "{path}");
        }
    }
}
