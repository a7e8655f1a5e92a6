//! CPU-visible memory.

/// Byte-level access to the emulated address space.
///
/// The SIO patch reads its device control block and copies sector data
/// through this trait. Implementations decide how ROM, RAM and hardware
/// registers are mapped.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte to the given address.
    fn write(&mut self, address: u16, value: u8);

    /// Read a little-endian word (6502 byte order).
    fn read_word(&mut self, address: u16) -> u16 {
        let lo = self.read(address);
        let hi = self.read(address.wrapping_add(1));
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Copy `data` into memory starting at `address`, wrapping at $FFFF.
    fn write_block(&mut self, address: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write(address.wrapping_add(i as u16), byte);
        }
    }

    /// Fill `out` from memory starting at `address`, wrapping at $FFFF.
    fn read_block(&mut self, address: u16, out: &mut [u8]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.read(address.wrapping_add(i as u16));
        }
    }
}

/// 64K of plain RAM with no mapping. Used by tests and the inspection tool.
pub struct FlatRam {
    bytes: Box<[u8; 0x1_0000]>,
}

impl FlatRam {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0; 0x1_0000]),
        }
    }

    /// Read without going through the `Bus` trait (no `&mut` needed).
    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        self.bytes[address as usize]
    }
}

impl Default for FlatRam {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for FlatRam {
    fn read(&mut self, address: u16) -> u8 {
        self.bytes[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.bytes[address as usize] = value;
    }
}
