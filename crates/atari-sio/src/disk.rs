//! Disk drives D1: to D8: and their image files.
//!
//! Each drive owns at most one open image. Operations return host-side
//! errors; [`DiskError::result_code`] turns them into the byte the
//! emulated drive would send.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use format_atr::{BootLayout, Geometry, ImageKind};

use crate::decompress;
use crate::drive::{DriveLed, DriveUnit, EMPTY_GEOMETRY, UnitStatus};
use crate::error::DiskError;

pub const MAX_DRIVES: usize = 8;

/// Boot sector served while a binary file is being loaded.
///
/// One sector, load at $0700, init at $E477, then an escape to the loader.
pub const BINARY_BOOT_SECTOR: [u8; 8] = [0x00, 0x01, 0x00, 0x07, 0x77, 0xE4, 0xF2, 0xAD];

/// Drive status while a binary file is being loaded.
pub const BINARY_BOOT_STATUS: [u8; 4] = [0x18, 0xFF, 0x01, 0x00];

/// Fill byte returned by a format: no bad sectors.
pub const FORMAT_FILL: u8 = 0xFF;

pub struct DiskDrives {
    units: [DriveUnit; MAX_DRIVES],
    binary_boot: bool,
    led: DriveLed,
    status_line: String,
}

impl DiskDrives {
    #[must_use]
    pub fn new() -> Self {
        Self {
            units: std::array::from_fn(|_| DriveUnit::new()),
            binary_boot: false,
            led: DriveLed::Off,
            status_line: String::new(),
        }
    }

    /// Drive by number (1-8).
    #[must_use]
    pub fn unit(&self, drive: u8) -> Option<&DriveUnit> {
        let index = usize::from(drive).checked_sub(1)?;
        self.units.get(index)
    }

    fn unit_mut(&mut self, drive: u8) -> Result<&mut DriveUnit, DiskError> {
        usize::from(drive)
            .checked_sub(1)
            .and_then(|index| self.units.get_mut(index))
            .ok_or(DiskError::NotPresent(drive))
    }

    /// Status of a drive. Numbers outside 1-8 read as `Off`.
    #[must_use]
    pub fn status(&self, drive: u8) -> UnitStatus {
        self.unit(drive).map_or(UnitStatus::Off, DriveUnit::status)
    }

    #[must_use]
    pub fn led(&self) -> DriveLed {
        self.led
    }

    pub fn set_led_off(&mut self) {
        self.led = DriveLed::Off;
    }

    pub(crate) fn set_led(&mut self, led: DriveLed) {
        self.led = led;
    }

    /// `"<drive>: <sector>"` for the last sector accessed.
    #[must_use]
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    #[must_use]
    pub fn binary_boot(&self) -> bool {
        self.binary_boot
    }

    /// While set, every drive serves [`BINARY_BOOT_SECTOR`].
    pub fn set_binary_boot(&mut self, active: bool) {
        self.binary_boot = active;
    }

    // -----------------------------------------------------------------------
    // Mounting
    // -----------------------------------------------------------------------

    /// Attach an image to a drive.
    ///
    /// The drive is dismounted first, so a failed mount leaves it empty.
    /// Files that cannot be opened for writing fall back to read-only.
    pub fn mount(&mut self, drive: u8, path: &Path, read_only: bool) -> Result<(), DiskError> {
        // `path` may borrow the drive's own path; own it before dismounting.
        let path: PathBuf = path.to_path_buf();
        self.unit_mut(drive)?;
        self.dismount(drive);

        let (mut file, mut status) = open_image(&path, read_only)?;

        let mut magic = [0u8; decompress::MAGIC_LEN];
        let read = read_prefix(&mut file, &mut magic)?;
        let mut compressed = false;
        if let Some(decoder) = decompress::find(&magic[..read]) {
            log::debug!("D{drive}: expanding {} image {}", decoder.name(), path.display());
            file = decoder.decompress(&mut file)?;
            compressed = true;
            status = UnitStatus::ReadOnly;
        }

        let geometry = Geometry::detect(&mut file)?;
        if geometry.write_protect {
            status = UnitStatus::ReadOnly;
        }

        log::info!(
            "D{drive}: mounted {} ({} sectors of {} bytes, {:?})",
            path.display(),
            geometry.sector_count,
            geometry.sector_size,
            status
        );

        let unit = self.unit_mut(drive)?;
        unit.image = Some(file);
        unit.path = Some(path);
        unit.status = status;
        unit.read_only_requested = read_only;
        unit.compressed = compressed;
        unit.geometry = geometry;
        unit.format_sector_size = geometry.sector_size;
        unit.format_sector_count = geometry.sector_count;
        unit.io_failed = false;
        Ok(())
    }

    /// Close a drive's image. A no-op when nothing is mounted.
    pub fn dismount(&mut self, drive: u8) {
        let Ok(unit) = self.unit_mut(drive) else {
            return;
        };
        if unit.image.is_some() {
            if let Some(path) = unit.path.as_deref() {
                log::info!("D{drive}: dismounted {}", path.display());
            }
            unit.release();
            unit.status = UnitStatus::NoDisk;
        }
    }

    /// Remove a drive from the bus entirely.
    pub fn disable_drive(&mut self, drive: u8) {
        self.dismount(drive);
        if let Ok(unit) = self.unit_mut(drive) {
            unit.status = UnitStatus::Off;
        }
    }

    /// Put a disabled drive back on the bus, empty.
    pub fn enable_drive(&mut self, drive: u8) {
        if let Ok(unit) = self.unit_mut(drive)
            && unit.status == UnitStatus::Off
        {
            unit.status = UnitStatus::NoDisk;
        }
    }

    /// Shift every image down one drive; D1's image goes to the highest
    /// drive that had one. Returns false if any re-mount failed.
    pub fn rotate(&mut self) -> bool {
        let mounted: Vec<Option<(PathBuf, bool)>> = self
            .units
            .iter()
            .map(|unit| {
                unit.path
                    .clone()
                    .map(|path| (path, unit.read_only_requested))
            })
            .collect();

        for drive in 1..=MAX_DRIVES as u8 {
            self.dismount(drive);
        }

        let mut ok = true;
        for (index, entry) in mounted.iter().enumerate().skip(1) {
            if let Some((path, read_only)) = entry
                && let Err(e) = self.mount(index as u8, path, *read_only)
            {
                log::warn!("rotate: cannot remount {}: {e}", path.display());
                ok = false;
            }
        }

        let last = mounted.iter().rposition(Option::is_some);
        if let (Some(last), Some((path, read_only))) = (last, &mounted[0])
            && let Err(e) = self.mount(last as u8 + 1, path, *read_only)
        {
            log::warn!("rotate: cannot remount {}: {e}", path.display());
            ok = false;
        }
        ok
    }

    // -----------------------------------------------------------------------
    // Sector access
    // -----------------------------------------------------------------------

    /// Transfer size and file offset of a sector.
    ///
    /// While a binary boot is active every sector is 128 bytes at 0.
    #[must_use]
    pub fn size_and_offset(&self, drive: u8, sector: u16) -> (usize, u64) {
        if self.binary_boot {
            return (128, 0);
        }
        self.unit(drive)
            .map_or(EMPTY_GEOMETRY, |unit| unit.geometry)
            .size_and_offset(sector)
    }

    fn seek_sector(&mut self, drive: u8, sector: u16) -> Result<usize, DiskError> {
        self.status_line = format!("{drive}: {sector}");
        let (size, offset) = self.size_and_offset(drive, sector);
        let unit = self.unit_mut(drive)?;
        let file = unit.image.as_mut().ok_or(DiskError::NoMedia(drive))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(size)
    }

    fn check_present(&self, drive: u8) -> Result<&DriveUnit, DiskError> {
        let unit = self.unit(drive).ok_or(DiskError::NotPresent(drive))?;
        if unit.status == UnitStatus::Off {
            return Err(DiskError::NotPresent(drive));
        }
        if unit.image.is_none() {
            return Err(DiskError::NoMedia(drive));
        }
        Ok(unit)
    }

    /// Read one sector into `buf`. Returns the number of bytes read.
    pub fn read_sector(&mut self, drive: u8, sector: u16, buf: &mut [u8]) -> Result<usize, DiskError> {
        if self.binary_boot {
            let len = buf.len().min(128);
            buf[..len].fill(0);
            let boot = BINARY_BOOT_SECTOR.len().min(len);
            buf[..boot].copy_from_slice(&BINARY_BOOT_SECTOR[..boot]);
            return Ok(len);
        }

        let unit = self.check_present(drive)?;
        if !unit.geometry.contains(sector) {
            return Err(DiskError::InvalidSector { drive, sector });
        }
        let (size, _) = self.size_and_offset(drive, sector);
        if buf.len() < size {
            return Err(DiskError::WrongLength {
                expected: size,
                actual: buf.len(),
            });
        }

        self.unit_mut(drive)?.io_failed = true;
        self.led = DriveLed::Read(drive);
        self.seek_sector(drive, sector)?;
        let unit = self.unit_mut(drive)?;
        let file = unit.image.as_mut().ok_or(DiskError::NoMedia(drive))?;
        file.read_exact(&mut buf[..size])?;
        unit.io_failed = false;
        log::trace!("D{drive}: read sector {sector}");
        Ok(size)
    }

    /// Write one sector from `data`.
    pub fn write_sector(&mut self, drive: u8, sector: u16, data: &[u8]) -> Result<usize, DiskError> {
        let unit = self.check_present(drive)?;
        if unit.status != UnitStatus::ReadWrite {
            return Err(DiskError::ReadOnlyMedia(drive));
        }
        if !unit.geometry.contains(sector) {
            return Err(DiskError::InvalidSector { drive, sector });
        }
        let (size, _) = self.size_and_offset(drive, sector);
        if data.len() < size {
            return Err(DiskError::WrongLength {
                expected: size,
                actual: data.len(),
            });
        }

        self.unit_mut(drive)?.io_failed = true;
        self.led = DriveLed::Write(drive);
        self.seek_sector(drive, sector)?;
        let unit = self.unit_mut(drive)?;
        let file = unit.image.as_mut().ok_or(DiskError::NoMedia(drive))?;
        file.write_all(&data[..size])?;
        file.flush()?;
        unit.io_failed = false;
        log::trace!("D{drive}: wrote sector {sector}");
        Ok(size)
    }

    /// Recreate the image with a new geometry and return the format result
    /// buffer (`sector_size` bytes of [`FORMAT_FILL`]).
    ///
    /// The file is truncated and rewritten, then mounted again. A physical
    /// or SIO2PC boot layout survives, since a blank image cannot show it.
    pub fn format_disk(
        &mut self,
        drive: u8,
        sector_size: u16,
        sector_count: u32,
    ) -> Result<Vec<u8>, DiskError> {
        let unit = self.check_present(drive)?;
        if unit.status != UnitStatus::ReadWrite {
            return Err(DiskError::ReadOnlyMedia(drive));
        }
        let Some(path) = unit.path.clone() else {
            return Err(DiskError::NoMedia(drive));
        };
        let kind = unit.geometry.kind;
        let saved_layout = unit.geometry.boot_layout;
        let keep_layout = sector_size == 256 && saved_layout != BootLayout::Logical;

        self.unit_mut(drive)?.io_failed = true;
        self.dismount(drive);

        let file = File::create(&path).map_err(|e| {
            log::error!("D{drive}: cannot open {} for formatting: {e}", path.display());
            e
        })?;
        let mut writer = BufWriter::new(file);
        format_atr::write_blank(&mut writer, kind, sector_size, sector_count, saved_layout)?;
        writer.flush()?;
        drop(writer);

        self.mount(drive, &path, false)?;
        let unit = self.unit_mut(drive)?;
        if keep_layout {
            unit.geometry.boot_layout = saved_layout;
        }
        unit.io_failed = false;
        log::info!("D{drive}: formatted {sector_count} sectors of {sector_size} bytes");
        Ok(vec![FORMAT_FILL; sector_size as usize])
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// 12-byte percom block describing the mounted geometry.
    pub fn read_status_block(&self, drive: u8) -> Result<[u8; 12], DiskError> {
        let unit = self.unit(drive).ok_or(DiskError::NotPresent(drive))?;
        if unit.status == UnitStatus::Off {
            return Err(DiskError::NotPresent(drive));
        }

        let sector_size = unit.geometry.sector_size;
        let sector_count = unit.geometry.sector_count;
        let mut tracks: u8 = 1;
        let mut heads: u8 = 1;
        let mut spt = sector_count;
        if spt % 40 == 0 {
            tracks = 40;
            spt /= 40;
            if spt > 26 && spt % 2 == 0 {
                heads = 2;
                spt /= 2;
                if spt > 26 && spt % 2 == 0 {
                    tracks = 80;
                    spt /= 2;
                }
            }
        }

        let fm = sector_size == 128 && sector_count <= 720;
        Ok([
            tracks,
            1,
            (spt >> 8) as u8,
            spt as u8,
            heads - 1,
            if fm { 0 } else { 4 },
            (sector_size >> 8) as u8,
            sector_size as u8,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ])
    }

    /// Stage a geometry for the next format. The mounted image is untouched.
    pub fn write_status_block(&mut self, drive: u8, block: &[u8]) -> Result<(), DiskError> {
        if block.len() < 12 {
            return Err(DiskError::WrongLength {
                expected: 12,
                actual: block.len(),
            });
        }
        let unit = self.unit_mut(drive)?;
        if unit.status == UnitStatus::Off {
            return Err(DiskError::NotPresent(drive));
        }

        let size = u16::from(block[6]) << 8 | u16::from(block[7]);
        if size == 128 || size == 256 {
            unit.format_sector_size = size;
        }
        // Byte 4 holds heads minus one.
        let spt = u32::from(block[2]) << 8 | u32::from(block[3]);
        let count = u32::from(block[0]) * spt * (u32::from(block[4]) + 1);
        unit.format_sector_count = if (1..=65535).contains(&count) { count } else { 720 };
        log::debug!(
            "D{drive}: next format {} x {}",
            unit.format_sector_count,
            unit.format_sector_size
        );
        Ok(())
    }

    /// 4-byte drive status.
    pub fn drive_status(&self, drive: u8) -> Result<[u8; 4], DiskError> {
        if self.binary_boot {
            return Ok(BINARY_BOOT_STATUS);
        }
        let unit = self.unit(drive).ok_or(DiskError::NotPresent(drive))?;
        if unit.status == UnitStatus::Off {
            return Err(DiskError::NotPresent(drive));
        }

        let mut flags = 0x10;
        if unit.io_failed {
            flags |= 0x04;
        }
        if unit.status == UnitStatus::ReadOnly {
            flags |= 0x08;
        }
        if unit.format_sector_size == 256 {
            flags |= 0x20;
        }
        if unit.format_sector_count == 1040 {
            flags |= 0x80;
        }
        let hardware = if unit.image.is_some() { 0xFF } else { 0x7F };
        Ok([flags, hardware, 0x01, 0x00])
    }

    /// Image kind of a mounted drive.
    #[must_use]
    pub fn image_kind(&self, drive: u8) -> Option<ImageKind> {
        self.unit(drive)
            .filter(|unit| unit.is_mounted())
            .map(|unit| unit.geometry.kind)
    }

    pub(crate) fn units(&self) -> &[DriveUnit; MAX_DRIVES] {
        &self.units
    }

    pub(crate) fn units_mut(&mut self) -> &mut [DriveUnit; MAX_DRIVES] {
        &mut self.units
    }
}

impl Default for DiskDrives {
    fn default() -> Self {
        Self::new()
    }
}

fn open_image(path: &Path, read_only: bool) -> Result<(File, UnitStatus), DiskError> {
    if !read_only {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => return Ok((file, UnitStatus::ReadWrite)),
            Err(e) => log::debug!("{}: read-write open failed ({e}), trying read-only", path.display()),
        }
    }
    let file = File::open(path)?;
    Ok((file, UnitStatus::ReadOnly))
}

/// Read up to `buf.len()` bytes from the start and rewind.
fn read_prefix(file: &mut File, buf: &mut [u8]) -> Result<usize, DiskError> {
    file.seek(SeekFrom::Start(0))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(filled)
}
