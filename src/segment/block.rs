//! Block framing and per-block compression.
//!
//! Every block of a segment file shares the same frame:
//!
//! ```text
//! [header_size : varuint]
//! [codec       : u8       (0 = uncompressed, 1 = snappy, 2 = lz4)]
//! [decompressed_size : varuint, present iff codec != 0]
//! [block-specific header bytes]
//! [body bytes  (compressed iff codec != 0)]
//! ```
//!
//! `header_size` counts everything between itself and the body, so a
//! reader can locate the body without understanding the block-specific
//! header.  Closing a block validates the specific header against the
//! declared maximum for its kind and surfaces
//! [`SegmentError::HeaderOverflow`] on violation.

use std::borrow::Cow;

use crate::encoding;
use crate::slice::Reader;

use super::SegmentError;

// ------------------------------------------------------------------------------------------------
// Compression codecs
// ------------------------------------------------------------------------------------------------

/// Per-block compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    /// Raw body bytes.
    #[default]
    None,
    /// Snappy framing-free raw compression.
    Snappy,
    /// LZ4 block compression.
    Lz4,
}

impl CompressionCodec {
    /// Wire id of this codec.
    pub fn id(self) -> u8 {
        match self {
            CompressionCodec::None => 0,
            CompressionCodec::Snappy => 1,
            CompressionCodec::Lz4 => 2,
        }
    }

    /// Codec for a wire id.
    pub fn from_id(id: u8) -> Result<Self, SegmentError> {
        match id {
            0 => Ok(CompressionCodec::None),
            1 => Ok(CompressionCodec::Snappy),
            2 => Ok(CompressionCodec::Lz4),
            other => Err(SegmentError::Corruption(format!(
                "unknown compression codec id {other}"
            ))),
        }
    }
}

fn compress(codec: CompressionCodec, body: &[u8]) -> Result<Vec<u8>, SegmentError> {
    match codec {
        CompressionCodec::None => Ok(body.to_vec()),
        CompressionCodec::Snappy => snap::raw::Encoder::new()
            .compress_vec(body)
            .map_err(|e| SegmentError::Corruption(format!("snappy compression failed: {e}"))),
        CompressionCodec::Lz4 => lz4::block::compress(body, None, false)
            .map_err(SegmentError::Io),
    }
}

fn decompress(
    codec: CompressionCodec,
    body: &[u8],
    decompressed_size: usize,
) -> Result<Vec<u8>, SegmentError> {
    let decompressed = match codec {
        CompressionCodec::None => body.to_vec(),
        CompressionCodec::Snappy => snap::raw::Decoder::new()
            .decompress_vec(body)
            .map_err(|e| SegmentError::Corruption(format!("snappy decompression failed: {e}")))?,
        CompressionCodec::Lz4 => {
            let size = i32::try_from(decompressed_size).map_err(|_| {
                SegmentError::Corruption("decompressed size exceeds i32".to_string())
            })?;
            lz4::block::decompress(body, Some(size)).map_err(SegmentError::Io)?
        }
    };
    if decompressed.len() != decompressed_size {
        return Err(SegmentError::Corruption(format!(
            "decompressed size mismatch: declared {decompressed_size}, got {}",
            decompressed.len()
        )));
    }
    Ok(decompressed)
}

// ------------------------------------------------------------------------------------------------
// Block handle
// ------------------------------------------------------------------------------------------------

/// Offset and size of a block within the segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    /// Absolute byte offset of the block's `header_size` varint.
    pub offset: u64,
    /// Total framed size of the block in bytes.
    pub size: u64,
}

// ------------------------------------------------------------------------------------------------
// Close (write side)
// ------------------------------------------------------------------------------------------------

/// Frame a block from its specific header and raw body.
///
/// `max_header_size` is the block kind's declared header budget; a
/// specific header that outgrows it fails the close.
pub fn close_block(
    specific_header: &[u8],
    body: &[u8],
    codec: CompressionCodec,
    max_header_size: usize,
) -> Result<Vec<u8>, SegmentError> {
    if specific_header.len() > max_header_size {
        return Err(SegmentError::HeaderOverflow {
            declared: max_header_size,
            actual: specific_header.len(),
        });
    }

    let body_bytes = compress(codec, body)?;

    let mut header = Vec::with_capacity(specific_header.len() + encoding::MAX_VARINT_LEN + 1);
    header.push(codec.id());
    if codec != CompressionCodec::None {
        encoding::write_unsigned(body.len() as u64, &mut header);
    }
    header.extend_from_slice(specific_header);

    let mut framed =
        Vec::with_capacity(encoding::MAX_VARINT_LEN + header.len() + body_bytes.len());
    encoding::write_unsigned(header.len() as u64, &mut framed);
    framed.extend_from_slice(&header);
    framed.extend_from_slice(&body_bytes);
    Ok(framed)
}

// ------------------------------------------------------------------------------------------------
// Open (read side)
// ------------------------------------------------------------------------------------------------

/// A decoded block: the specific header and the (decompressed) body.
#[derive(Debug)]
pub struct Block<'a> {
    /// Block-specific header bytes, after the codec fields.
    pub header: &'a [u8],
    /// Body bytes; borrowed when uncompressed, owned when decompressed.
    pub body: Cow<'a, [u8]>,
}

/// Decode a framed block from `bytes` (the block's full framed extent).
pub fn open_block(bytes: &[u8]) -> Result<Block<'_>, SegmentError> {
    let mut reader = Reader::new(bytes);
    let header_size = usize::try_from(reader.read_unsigned()?)
        .map_err(|_| SegmentError::Corruption("block header size exceeds usize".to_string()))?;
    let header_start = reader.position();
    let header_bytes = reader.read_bytes(header_size)?;

    let mut header_reader = Reader::new(header_bytes);
    let codec = CompressionCodec::from_id(header_reader.read_u8()?)?;
    let decompressed_size = if codec != CompressionCodec::None {
        Some(usize::try_from(header_reader.read_unsigned()?).map_err(|_| {
            SegmentError::Corruption("decompressed size exceeds usize".to_string())
        })?)
    } else {
        None
    };

    let specific_header = &bytes[header_start + header_reader.position()..header_start + header_size];
    let body_raw = reader.remaining_slice();

    let body = match decompressed_size {
        None => Cow::Borrowed(body_raw),
        Some(size) => Cow::Owned(decompress(codec, body_raw, size)?),
    };

    Ok(Block {
        header: specific_header,
        body,
    })
}
