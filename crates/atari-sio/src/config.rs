/// Runtime options for the serial subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SioConfig {
    /// Serve OS SIO calls directly from the trap instead of POKEY bytes.
    /// While set, the cassette is not advanced by [`Tickable::tick`].
    ///
    /// [`Tickable::tick`]: emu_core::Tickable::tick
    pub patch_enabled: bool,
    /// Sector whose repeated reads are held back by [`SECTOR_DELAY`]
    /// scanlines. Some titles time this read to detect emulators.
    ///
    /// [`SECTOR_DELAY`]: crate::timing::SECTOR_DELAY
    pub delayed_sector: Option<u16>,
}

impl Default for SioConfig {
    fn default() -> Self {
        Self {
            patch_enabled: true,
            delayed_sector: Some(1),
        }
    }
}
