//! Packed boolean arrays as used by the `bitfield` message and the saved
//! piece bitmap: bit `i` lives in byte `i / 8`, counted from the most
//! significant bit.

pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        bytes[i / 8] |= 0x80 >> (i % 8);
    }
    bytes
}

/// Unpacks every bit of `bytes`, padding included. Callers truncate to the
/// number of entries they expect.
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| byte & (0x80 >> i) != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<bool> {
        (0..len).map(|i| i % 3 == 0 || i % 5 == 1).collect()
    }

    #[test]
    fn pack_then_unpack_keeps_bits() {
        for len in [0, 1, 7, 8, 9, 16] {
            let bits = pattern(len);
            let unpacked = unpack_bits(&pack_bits(&bits));

            assert_eq!(unpacked[..len], bits[..], "length {}", len);
        }
    }

    #[test]
    fn most_significant_bit_first() {
        assert_eq!(pack_bits(&[true, false, true]), vec![0b1010_0000]);
        assert_eq!(
            pack_bits(&[false, false, false, false, false, false, false, false, true]),
            vec![0b0000_0000, 0b1000_0000]
        );
    }

    #[test]
    fn padding_is_zero() {
        assert_eq!(pack_bits(&[true; 9]), vec![0xff, 0x80]);
    }

    #[test]
    fn unpack_keeps_padding() {
        assert_eq!(
            unpack_bits(&[0b0100_0001]),
            vec![false, true, false, false, false, false, false, true]
        );
    }
}
