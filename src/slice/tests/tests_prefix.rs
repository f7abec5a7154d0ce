//! Prefix compression and compress-join round-trips.

#[cfg(test)]
mod tests {
    use crate::slice::{
        SliceError, common_prefix_len, compress, compress_join, decompress, decompress_join,
    };

    /// `decompress(a, compress(a, b).suffix, common(a, b)) == b` for
    /// representative pairs.
    #[test]
    fn prefix_roundtrip() {
        let pairs: &[(&[u8], &[u8])] = &[
            (b"apple", b"applesauce"),
            (b"applesauce", b"apple"),
            (b"apple", b"banana"),
            (b"", b"anything"),
            (b"same", b"same"),
            (b"a\x00b", b"a\x00c"),
        ];
        for (previous, key) in pairs {
            let (common, suffix) = compress(previous, key);
            assert_eq!(common, common_prefix_len(previous, key));
            let rebuilt = decompress(previous, suffix, common).unwrap();
            assert_eq!(&rebuilt, key);
        }
    }

    /// A stored prefix longer than the previous key is corruption.
    #[test]
    fn oversized_prefix_is_rejected() {
        assert_eq!(
            decompress(b"ab", b"suffix", 3),
            Err(SliceError::PrefixOutOfRange {
                prefix: 3,
                previous: 2
            })
        );
    }

    /// `decompress_join(compress_join(a, b)) == (a, b)`, including empty
    /// halves.
    #[test]
    fn compress_join_roundtrip() {
        let pairs: &[(&[u8], &[u8])] = &[
            (b"left", b"right"),
            (b"", b"right"),
            (b"left", b""),
            (b"", b""),
            (&[0u8; 300], b"tail"),
        ];
        for (left, right) in pairs {
            let joined = compress_join(left, right);
            let (a, b) = decompress_join(&joined).unwrap();
            assert_eq!(&a, left);
            assert_eq!(&b, right);
        }
    }

    /// A joined buffer whose tail length exceeds the body is corruption.
    #[test]
    fn corrupt_join_is_rejected() {
        // Reversed varint claiming left length 100 with only 2 body bytes.
        let mut joined = vec![1u8, 2];
        crate::encoding::write_unsigned_reversed(100, &mut joined);
        assert!(decompress_join(&joined).is_err());
    }
}
