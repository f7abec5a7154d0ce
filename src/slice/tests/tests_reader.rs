//! Cursor reader bounds checking and primitive reads.

#[cfg(test)]
mod tests {
    use crate::encoding;
    use crate::slice::{Reader, SliceError};

    /// Mixed primitive reads advance the cursor exactly.
    #[test]
    fn mixed_reads_track_position() {
        let mut buf = Vec::new();
        buf.push(0xAB);
        buf.extend_from_slice(&1234u32.to_le_bytes());
        encoding::write_unsigned(u32::MAX as u64, &mut buf);
        encoding::write_signed(-42, &mut buf);
        buf.extend_from_slice(b"payload");

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u32_le().unwrap(), 1234);
        assert_eq!(reader.read_unsigned().unwrap(), u32::MAX as u64);
        assert_eq!(reader.read_signed().unwrap(), -42);
        assert_eq!(reader.read_bytes(7).unwrap(), b"payload");
        assert!(reader.is_exhausted());
        assert_eq!(reader.position(), buf.len());
    }

    /// Reading past the end is an error, not a panic, and leaves the
    /// cursor where it was.
    #[test]
    fn out_of_bounds_read_is_error() {
        let buf = [1u8, 2, 3];
        let mut reader = Reader::new(&buf);
        reader.skip(2).unwrap();
        assert_eq!(
            reader.read_bytes(5),
            Err(SliceError::UnexpectedEof {
                needed: 5,
                available: 1
            })
        );
        assert_eq!(reader.position(), 2);
    }

    /// `with_position` starts mid-slice; `remaining_slice` is zero-copy.
    #[test]
    fn with_position_and_remaining() {
        let buf = b"abcdef";
        let reader = Reader::with_position(buf, 4);
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.remaining_slice(), b"ef");
    }

    /// Skipping beyond the end fails without moving the cursor.
    #[test]
    fn skip_past_end_fails() {
        let buf = [0u8; 4];
        let mut reader = Reader::new(&buf);
        assert!(reader.skip(5).is_err());
        assert_eq!(reader.position(), 0);
    }
}
