//! CRC-8, polynomial 0x31 (Dallas/Maxim), table driven, zero initial value.

/// Generator polynomial.
pub const POLYNOMIAL: u8 = 0x31;

/// Lookup table, built once at compile time.
static TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut value = 0usize;
    while value < 256 {
        let mut crc = value as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[value] = crc;
        value += 1;
    }
    table
}

/// Checksum a byte sequence starting from zero.
pub fn crc8(data: &[u8]) -> u8 {
    crc8_update(0, data)
}

/// Continue a running checksum with more bytes.
///
/// `crc8_update(crc8(a), b) == crc8(a ++ b)` for any split.
pub fn crc8_update(seed: u8, data: &[u8]) -> u8 {
    data.iter()
        .fold(seed, |crc, &byte| TABLE[usize::from(crc ^ byte)])
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// Bit-at-a-time reference, independent of the table.
    fn reference(data: &[u8]) -> u8 {
        let mut crc = 0u8;
        for &byte in data {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 {
                    (crc << 1) ^ 0x31
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    #[test]
    fn table_matches_bitwise_definition() {
        for value in 0..=255u8 {
            assert_eq!(TABLE[usize::from(value)], reference(&[value]));
        }
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc8(&[]), 0);
        assert_eq!(crc8_update(0x5A, &[]), 0x5A);
    }

    #[test]
    fn known_ascii_vector() {
        // Non-reflected CRC-8/0x31 with zero init over "123456789".
        assert_eq!(crc8(b"123456789"), 0xA2);
        assert_eq!(crc8(b"123456789"), reference(b"123456789"));
    }

    proptest! {
        #[test]
        fn seeded_split_matches_single_pass(data in proptest::collection::vec(any::<u8>(), 0..512), split in 0usize..512) {
            let split = split.min(data.len());
            let (head, tail) = data.split_at(split);
            prop_assert_eq!(crc8_update(crc8(head), tail), crc8(&data));
        }

        #[test]
        fn table_matches_reference(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            prop_assert_eq!(crc8(&data), reference(&data));
        }
    }
}
