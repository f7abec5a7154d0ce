//! Non-zero varint round-trips and the zero-byte-free guarantee.

#[cfg(test)]
mod tests {
    use crate::encoding::{
        EncodingError, read_unsigned_non_zero, size_of_unsigned_non_zero, write_unsigned_non_zero,
    };

    /// Every encoding is free of `0x00` bytes and round-trips exactly.
    #[test]
    fn roundtrip_and_no_zero_bytes() {
        for value in [
            0u64,
            1,
            0x7E,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            u32::MAX as u64,
            u64::MAX - 1,
        ] {
            let mut buf = Vec::new();
            write_unsigned_non_zero(value, &mut buf);
            assert!(
                buf.iter().all(|&b| b != 0),
                "encoding of {value} contains a zero byte: {buf:?}"
            );
            assert_eq!(buf.len(), size_of_unsigned_non_zero(value));
            let (decoded, consumed) = read_unsigned_non_zero(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    /// A raw zero byte decodes as corruption, never as a value.
    #[test]
    fn zero_byte_is_rejected() {
        assert_eq!(
            read_unsigned_non_zero(&[0x00]),
            Err(EncodingError::ZeroInNonZeroVarint)
        );
    }

    /// The shift by one moves the single-byte boundary down: `0x7E` is the
    /// largest one-byte value.
    #[test]
    fn boundary_shifts_by_one() {
        assert_eq!(size_of_unsigned_non_zero(0x7E), 1);
        assert_eq!(size_of_unsigned_non_zero(0x7F), 2);
    }
}
