//! Reversed (tail-readable) varint round-trips.

#[cfg(test)]
mod tests {
    use crate::encoding::{
        EncodingError, read_last_unsigned, size_of_unsigned, write_unsigned_reversed,
    };

    /// `read_last_unsigned(encode_reversed(n) ++ any)` recovers `(n, len)`
    /// regardless of what precedes the tail.
    #[test]
    fn roundtrip_with_arbitrary_prefix() {
        for value in [0u64, 1, 0x7F, 0x80, 0x3FFF, 0x4000, u32::MAX as u64, u64::MAX] {
            let mut buf = b"arbitrary prefix bytes".to_vec();
            write_unsigned_reversed(value, &mut buf);
            let (decoded, len) = read_last_unsigned(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(len, size_of_unsigned(value));
        }
    }

    /// A single-byte value reversed is itself.
    #[test]
    fn single_byte_value() {
        let mut buf = Vec::new();
        write_unsigned_reversed(5, &mut buf);
        assert_eq!(buf, vec![5]);
        assert_eq!(read_last_unsigned(&buf).unwrap(), (5, 1));
    }

    /// Multi-byte values are stored with the low group last.
    #[test]
    fn byte_order_is_reversed() {
        let mut forward = Vec::new();
        crate::encoding::write_unsigned(300, &mut forward);
        let mut reversed = Vec::new();
        write_unsigned_reversed(300, &mut reversed);
        let mut expected = forward.clone();
        expected.reverse();
        assert_eq!(reversed, expected);
    }

    /// An empty buffer is an EOF error.
    #[test]
    fn empty_buffer_is_eof() {
        assert_eq!(
            read_last_unsigned(&[]),
            Err(EncodingError::UnexpectedEof { available: 0 })
        );
    }

    /// A tail made entirely of continuation bytes never terminates and is
    /// rejected as corrupt.
    #[test]
    fn all_continuation_tail_is_corrupt() {
        let buf = [0xFFu8; 12];
        assert_eq!(read_last_unsigned(&buf), Err(EncodingError::CorruptVarint));
    }
}
