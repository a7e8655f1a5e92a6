/// SIO checksum: 8-bit sum with end-around carry.
#[must_use]
pub fn sio_checksum(data: &[u8]) -> u8 {
    let mut sum: u16 = 0;
    for &byte in data {
        sum += u16::from(byte);
        if sum > 0xFF {
            sum -= 0xFF;
        }
    }
    sum as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carry_wraps_into_bit_zero() {
        assert_eq!(sio_checksum(&[]), 0);
        assert_eq!(sio_checksum(&[0x12, 0x34]), 0x46);
        assert_eq!(sio_checksum(&[0xFF, 0x01]), 0x01);
        assert_eq!(sio_checksum(&[0xFF, 0xFF]), 0xFF);
        assert_eq!(sio_checksum(&[0x80, 0x80, 0x80]), 0x81);
    }

    #[test]
    fn command_frame_checksum() {
        // D1: read sector 1
        assert_eq!(sio_checksum(&[0x31, 0x52, 0x01, 0x00]), 0x84);
    }
}
