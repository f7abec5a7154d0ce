//! Unsigned and signed varint round-trips, boundary sizes, and corruption
//! handling.

#[cfg(test)]
mod tests {
    use crate::encoding::{
        EncodingError, read_signed, read_unsigned, size_of_signed, size_of_unsigned, write_signed,
        write_unsigned,
    };

    fn roundtrip_unsigned(value: u64) {
        let mut buf = Vec::new();
        write_unsigned(value, &mut buf);
        assert_eq!(buf.len(), size_of_unsigned(value), "size_of for {value}");
        let (decoded, consumed) = read_unsigned(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, buf.len());
    }

    /// Round-trips across every encoded-length boundary.
    #[test]
    fn unsigned_boundaries() {
        for value in [
            0,
            1,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            0x1F_FFFF,
            0x20_0000,
            u32::MAX as u64,
            (1u64 << 35) - 1,
            1u64 << 35,
            (1u64 << 63) - 1,
            u64::MAX,
        ] {
            roundtrip_unsigned(value);
        }
    }

    /// Exact encoded sizes at the documented boundaries, including a
    /// negative 32-bit value widened to unsigned (5 bytes).
    #[test]
    fn unsigned_size_boundaries() {
        assert_eq!(size_of_unsigned(0x7F), 1);
        assert_eq!(size_of_unsigned(0x80), 2);
        assert_eq!(size_of_unsigned(0x3FFF), 2);
        assert_eq!(size_of_unsigned(0x4000), 3);
        assert_eq!(size_of_unsigned(u64::from((-1i32) as u32)), 5);
        assert_eq!(size_of_unsigned((1u64 << 63) - 1), 9);
        assert_eq!(size_of_unsigned((-1i64) as u64), 10);
    }

    /// Trailing bytes after the varint are left untouched and not counted
    /// in `bytes_consumed`.
    #[test]
    fn unsigned_ignores_trailing_bytes() {
        let mut buf = Vec::new();
        write_unsigned(300, &mut buf);
        let encoded_len = buf.len();
        buf.extend_from_slice(b"trailing");
        let (decoded, consumed) = read_unsigned(&buf).unwrap();
        assert_eq!(decoded, 300);
        assert_eq!(consumed, encoded_len);
    }

    /// A buffer that ends mid-varint is an EOF error, not a panic.
    #[test]
    fn unsigned_truncated_is_eof() {
        let mut buf = Vec::new();
        write_unsigned(u64::MAX, &mut buf);
        buf.truncate(3);
        assert_eq!(
            read_unsigned(&buf),
            Err(EncodingError::UnexpectedEof { available: 3 })
        );
    }

    /// Eleven continuation bytes can never be a valid 64-bit varint.
    #[test]
    fn unsigned_overlong_is_corrupt() {
        let buf = [0x80u8; 11];
        assert_eq!(read_unsigned(&buf), Err(EncodingError::CorruptVarint));
    }

    /// A 10th byte contributing more than the top bit overflows 64 bits.
    #[test]
    fn unsigned_overflow_is_corrupt() {
        let mut buf = vec![0xFFu8; 9];
        buf.push(0x02);
        assert_eq!(read_unsigned(&buf), Err(EncodingError::CorruptVarint));
    }

    /// Signed round-trips across positive, negative, and extreme values.
    #[test]
    fn signed_roundtrip() {
        for value in [0i64, 1, -1, 63, -64, 64, -65, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            write_signed(value, &mut buf);
            assert_eq!(buf.len(), size_of_signed(value));
            let (decoded, consumed) = read_signed(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    /// Zig-zag keeps small magnitudes small: -1 must fit in a single byte.
    #[test]
    fn signed_small_magnitudes_are_short() {
        assert_eq!(size_of_signed(-1), 1);
        assert_eq!(size_of_signed(63), 1);
        assert_eq!(size_of_signed(64), 2);
        assert_eq!(size_of_signed(-64), 1);
        assert_eq!(size_of_signed(-65), 2);
    }
}
