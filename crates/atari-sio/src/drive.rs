//! One disk drive slot.

use std::fs::File;
use std::path::{Path, PathBuf};

use format_atr::{BootLayout, Geometry, ImageKind};
use serde::{Deserialize, Serialize};

/// Power and media state of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Drive absent from the bus. Never answers.
    Off,
    /// Drive present, nothing inserted. Answers `'N'`.
    NoDisk,
    ReadOnly,
    ReadWrite,
}

/// Drive activity light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveLed {
    #[default]
    Off,
    Read(u8),
    Write(u8),
}

/// Geometry used while no image is mounted.
pub(crate) const EMPTY_GEOMETRY: Geometry = Geometry {
    kind: ImageKind::Xfd,
    sector_size: 128,
    sector_count: 0,
    boot_layout: BootLayout::Logical,
    write_protect: false,
};

/// A drive and the image file it owns.
pub struct DriveUnit {
    pub(crate) status: UnitStatus,
    pub(crate) image: Option<File>,
    pub(crate) path: Option<PathBuf>,
    /// Mounted read-only on request (not because of the file).
    pub(crate) read_only_requested: bool,
    pub(crate) compressed: bool,
    pub(crate) geometry: Geometry,
    /// Geometry for the next format, staged by Write Status Block.
    pub(crate) format_sector_size: u16,
    pub(crate) format_sector_count: u32,
    /// Set when an operation starts, cleared when it succeeds.
    pub(crate) io_failed: bool,
}

impl DriveUnit {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: UnitStatus::NoDisk,
            image: None,
            path: None,
            read_only_requested: false,
            compressed: false,
            geometry: EMPTY_GEOMETRY,
            format_sector_size: 128,
            format_sector_count: 720,
            io_failed: false,
        }
    }

    #[must_use]
    pub fn status(&self) -> UnitStatus {
        self.status
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.image.is_some()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn sector_size(&self) -> u16 {
        self.geometry.sector_size
    }

    #[must_use]
    pub fn sector_count(&self) -> u32 {
        self.geometry.sector_count
    }

    #[must_use]
    pub fn format_geometry(&self) -> (u16, u32) {
        (self.format_sector_size, self.format_sector_count)
    }

    #[must_use]
    pub fn io_failed(&self) -> bool {
        self.io_failed
    }

    /// True for images expanded from a compressed container.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Close the image. Status is left to the caller.
    pub(crate) fn release(&mut self) {
        self.image = None;
        self.path = None;
        self.compressed = false;
        self.read_only_requested = false;
        self.geometry = EMPTY_GEOMETRY;
    }
}

impl Default for DriveUnit {
    fn default() -> Self {
        Self::new()
    }
}
