//! Scanline-driven components.

/// A component advanced by the machine's scanline clock.
///
/// The serial I/O timing model counts in scanlines, not CPU cycles: every
/// delay (SERIN interrupts, tape gaps, sector delays) is expressed as a
/// number of calls to [`Tickable::tick`].
pub trait Tickable {
    /// Advance by one scanline.
    fn tick(&mut self);

    /// Advance by `count` scanlines.
    ///
    /// Must be equivalent to calling `tick()` `count` times.
    fn tick_n(&mut self, count: u32) {
        for _ in 0..count {
            self.tick();
        }
    }
}
