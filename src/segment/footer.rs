//! Footer block: segment-level counts and block locations.
//!
//! The footer is the last block of a segment.  After it, the file ends
//! with a **reversed varuint** of the footer's start offset and the magic
//! byte `0x01`, so a reader locates the footer from the file end alone by
//! inspecting a bounded tail.
//!
//! Body layout (always uncompressed):
//!
//! ```text
//! [format_id         : varuint]
//! [created_in_level  : varuint]
//! [has_put           : bool]
//! [key_value_count   : varuint]
//! [range_count       : varuint]
//! [has_remove_range  : bool]
//! [nearest_deadline  : varuint (0 = absent)]
//! [function ids      : bool presence + 2 × {varuint len, bytes}]
//! [values block      : bool presence + {offset, size varuints}]
//! [sorted index      : {offset, size varuints}]
//! [hash index        : bool presence + {offset, size varuints}]
//! [binary search     : bool presence + {offset, size varuints}]
//! [bloom filter      : bool presence + {offset, size varuints}]
//! [crc32             : u32-le over all preceding body bytes]
//! ```

use crate::encoding;
use crate::kv::Deadline;
use crate::slice::Reader;

use super::SegmentError;
use super::block::{self, BlockHandle, CompressionCodec};

/// Wire format id of this segment layout.
pub(crate) const SEGMENT_FORMAT_ID: u64 = 1;

/// Magic byte closing every segment file.
pub(crate) const FOOTER_MAGIC: u8 = 0x01;

/// The footer block has no specific header.
const MAX_HEADER_SIZE: usize = 0;

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// Decoded footer contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Footer {
    pub created_in_level: u64,
    pub has_put: bool,
    pub key_value_count: u64,
    pub range_count: u64,
    pub has_remove_range: bool,
    pub nearest_deadline: Option<Deadline>,
    pub min_function_id: Option<Vec<u8>>,
    pub max_function_id: Option<Vec<u8>>,
    pub values: Option<BlockHandle>,
    pub sorted_index: BlockHandle,
    pub hash_index: Option<BlockHandle>,
    pub binary_search: Option<BlockHandle>,
    pub bloom: Option<BlockHandle>,
}

fn write_handle(handle: &BlockHandle, buf: &mut Vec<u8>) {
    encoding::write_unsigned(handle.offset, buf);
    encoding::write_unsigned(handle.size, buf);
}

fn write_optional_handle(handle: &Option<BlockHandle>, buf: &mut Vec<u8>) {
    match handle {
        None => buf.push(0),
        Some(handle) => {
            buf.push(1);
            write_handle(handle, buf);
        }
    }
}

fn read_bool(reader: &mut Reader<'_>) -> Result<bool, SegmentError> {
    match reader.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(SegmentError::Corruption(format!(
            "invalid bool byte 0x{other:02X} in footer"
        ))),
    }
}

fn read_handle(reader: &mut Reader<'_>) -> Result<BlockHandle, SegmentError> {
    Ok(BlockHandle {
        offset: reader.read_unsigned()?,
        size: reader.read_unsigned()?,
    })
}

fn read_optional_handle(reader: &mut Reader<'_>) -> Result<Option<BlockHandle>, SegmentError> {
    Ok(if read_bool(reader)? {
        Some(read_handle(reader)?)
    } else {
        None
    })
}

fn read_optional_bytes(reader: &mut Reader<'_>) -> Result<Option<Vec<u8>>, SegmentError> {
    if !read_bool(reader)? {
        return Ok(None);
    }
    let len = usize::try_from(reader.read_unsigned()?)
        .map_err(|_| SegmentError::Corruption("footer byte-string length".to_string()))?;
    Ok(Some(reader.read_bytes(len)?.to_vec()))
}

fn write_optional_bytes(bytes: &Option<Vec<u8>>, buf: &mut Vec<u8>) {
    match bytes {
        None => buf.push(0),
        Some(bytes) => {
            buf.push(1);
            encoding::write_unsigned(bytes.len() as u64, buf);
            buf.extend_from_slice(bytes);
        }
    }
}

impl Footer {
    /// Frame the footer block and the trailing offset + magic, given the
    /// absolute offset the block will land at.
    pub fn write(&self, footer_offset: u64) -> Result<Vec<u8>, SegmentError> {
        let mut body = Vec::new();
        encoding::write_unsigned(SEGMENT_FORMAT_ID, &mut body);
        encoding::write_unsigned(self.created_in_level, &mut body);
        body.push(u8::from(self.has_put));
        encoding::write_unsigned(self.key_value_count, &mut body);
        encoding::write_unsigned(self.range_count, &mut body);
        body.push(u8::from(self.has_remove_range));
        encoding::write_unsigned(self.nearest_deadline.map_or(0, |d| d.nanos()), &mut body);
        body.push(u8::from(self.min_function_id.is_some() || self.max_function_id.is_some()));
        if self.min_function_id.is_some() || self.max_function_id.is_some() {
            write_optional_bytes(&self.min_function_id, &mut body);
            write_optional_bytes(&self.max_function_id, &mut body);
        }
        write_optional_handle(&self.values, &mut body);
        write_handle(&self.sorted_index, &mut body);
        write_optional_handle(&self.hash_index, &mut body);
        write_optional_handle(&self.binary_search, &mut body);
        write_optional_handle(&self.bloom, &mut body);
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());

        let mut framed =
            block::close_block(&[], &body, CompressionCodec::None, MAX_HEADER_SIZE)?;
        encoding::write_unsigned_reversed(footer_offset, &mut framed);
        framed.push(FOOTER_MAGIC);
        Ok(framed)
    }

    /// Locate and decode the footer from a whole segment byte range.
    ///
    /// Returns the footer and its block handle.
    pub fn read(bytes: &[u8]) -> Result<(Footer, BlockHandle), SegmentError> {
        let Some((&last, head)) = bytes.split_last() else {
            return Err(SegmentError::Corruption("empty segment file".to_string()));
        };
        if last != FOOTER_MAGIC {
            return Err(SegmentError::FooterMagicMismatch { found: last });
        }
        let (footer_offset, tail_len) = encoding::read_last_unsigned(head)?;
        let footer_start = usize::try_from(footer_offset)
            .map_err(|_| SegmentError::Corruption("footer offset exceeds usize".to_string()))?;
        let footer_end = head.len() - tail_len;
        if footer_start >= footer_end {
            return Err(SegmentError::Corruption(format!(
                "footer offset {footer_start} at or past footer end {footer_end}"
            )));
        }

        let framed = &bytes[footer_start..footer_end];
        let blk = block::open_block(framed)?;
        let body = blk.body.as_ref();
        if body.len() < 4 {
            return Err(SegmentError::Corruption("footer body too small".to_string()));
        }
        let (fields, crc_bytes) = body.split_at(body.len() - 4);
        let mut stored_crc = [0u8; 4];
        stored_crc.copy_from_slice(crc_bytes);
        if crc32fast::hash(fields) != u32::from_le_bytes(stored_crc) {
            return Err(SegmentError::ChecksumMismatch);
        }

        let mut reader = Reader::new(fields);
        let format_id = reader.read_unsigned()?;
        if format_id != SEGMENT_FORMAT_ID {
            return Err(SegmentError::Corruption(format!(
                "unsupported segment format id {format_id}"
            )));
        }
        let created_in_level = reader.read_unsigned()?;
        let has_put = read_bool(&mut reader)?;
        let key_value_count = reader.read_unsigned()?;
        let range_count = reader.read_unsigned()?;
        let has_remove_range = read_bool(&mut reader)?;
        let nearest_deadline = Deadline::from_nanos(reader.read_unsigned()?);
        let (min_function_id, max_function_id) = if read_bool(&mut reader)? {
            (
                read_optional_bytes(&mut reader)?,
                read_optional_bytes(&mut reader)?,
            )
        } else {
            (None, None)
        };
        let values = read_optional_handle(&mut reader)?;
        let sorted_index = read_handle(&mut reader)?;
        let hash_index = read_optional_handle(&mut reader)?;
        let binary_search = read_optional_handle(&mut reader)?;
        let bloom = read_optional_handle(&mut reader)?;

        Ok((
            Footer {
                created_in_level,
                has_put,
                key_value_count,
                range_count,
                has_remove_range,
                nearest_deadline,
                min_function_id,
                max_function_id,
                values,
                sorted_index,
                hash_index,
                binary_search,
                bloom,
            },
            BlockHandle {
                offset: footer_offset,
                size: (footer_end - footer_start) as u64,
            },
        ))
    }
}
