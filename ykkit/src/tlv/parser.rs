//! BER-TLV Parser
//!
//! Strict parsing of BER-TLV (Basic Encoding Rules - Tag Length Value)
//! records as used by the PIV, OATH and OTP applications. Every byte of the
//! input must belong to a record: truncated tags, lengths or values are
//! errors, as is a length field claiming more bytes than remain.

use thiserror::Error;

/// Errors that can occur during TLV parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TLVError {
    #[error("Unexpected end of data while parsing tag")]
    UnexpectedEndTag,

    #[error("Unexpected end of data while parsing length")]
    UnexpectedEndLength,

    #[error("Length {length} exceeds the {available} remaining bytes")]
    UnexpectedEndValue { length: usize, available: usize },

    #[error("Indefinite length encoding is not supported")]
    IndefiniteLength,

    #[error("Length field of {0} bytes is too large")]
    LengthTooLarge(usize),

    #[error("Tags longer than three bytes are not supported")]
    TagTooLong,

    #[error("Expected tag 0x{expected:X}, found 0x{found:X}")]
    TagMismatch { expected: u32, found: u32 },

    #[error("{0} unexpected bytes after the record")]
    TrailingData(usize),
}

/// A TLV (Tag-Length-Value) record
///
/// Nested records are not decoded eagerly: a constructed value is parsed by
/// handing `value` back to [`decode_list`](super::decode_list) or
/// [`unpack_value`](super::unpack_value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TLV {
    /// The tag (1-3 bytes encoded as u32)
    pub tag: u32,
    /// The raw value bytes
    pub value: Vec<u8>,
}

impl TLV {
    /// Check if this is a constructed (container) tag based on the tag bits
    pub fn is_constructed(&self) -> bool {
        (first_tag_byte(self.tag) & 0x20) != 0
    }
}

fn first_tag_byte(tag: u32) -> u8 {
    if tag > 0xFFFF {
        ((tag >> 16) & 0xFF) as u8
    } else if tag > 0xFF {
        ((tag >> 8) & 0xFF) as u8
    } else {
        (tag & 0xFF) as u8
    }
}

/// Parse multiple TLVs, failing on the first malformed record
pub fn read_list(data: &[u8]) -> Result<Vec<TLV>, TLVError> {
    let mut result = Vec::new();
    let mut remaining = data;

    while !remaining.is_empty() {
        let (tlv, rest) = read_single(remaining)?;
        result.push(tlv);
        remaining = rest;
    }

    Ok(result)
}

/// Parse a single TLV and return it with the remaining bytes
pub fn read_single(data: &[u8]) -> Result<(TLV, &[u8]), TLVError> {
    let (tag, tag_len) = parse_tag(data)?;
    let (length, len_len) = parse_length(&data[tag_len..])?;

    let offset = tag_len + len_len;
    let available = data.len() - offset;
    if length > available {
        return Err(TLVError::UnexpectedEndValue { length, available });
    }

    let value = data[offset..offset + length].to_vec();
    Ok((TLV { tag, value }, &data[offset + length..]))
}

/// Parse a BER tag (1-3 bytes)
fn parse_tag(data: &[u8]) -> Result<(u32, usize), TLVError> {
    let first = *data.first().ok_or(TLVError::UnexpectedEndTag)?;

    // Single byte tag unless the low 5 bits are all set
    if (first & 0x1F) != 0x1F {
        return Ok((first as u32, 1));
    }

    let second = *data.get(1).ok_or(TLVError::UnexpectedEndTag)?;
    if (second & 0x80) == 0 {
        let tag = ((first as u32) << 8) | (second as u32);
        return Ok((tag, 2));
    }

    let third = *data.get(2).ok_or(TLVError::UnexpectedEndTag)?;
    if (third & 0x80) != 0 {
        return Err(TLVError::TagTooLong);
    }
    let tag = ((first as u32) << 16) | ((second as u32) << 8) | (third as u32);
    Ok((tag, 3))
}

/// Parse a BER length (1-5 bytes)
fn parse_length(data: &[u8]) -> Result<(usize, usize), TLVError> {
    let first = *data.first().ok_or(TLVError::UnexpectedEndLength)?;

    // Short form (0-127)
    if (first & 0x80) == 0 {
        return Ok((first as usize, 1));
    }

    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 {
        return Err(TLVError::IndefiniteLength);
    }
    if num_bytes > 4 {
        return Err(TLVError::LengthTooLarge(num_bytes));
    }
    if data.len() < 1 + num_bytes {
        return Err(TLVError::UnexpectedEndLength);
    }

    let length = data[1..=num_bytes]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);

    Ok((length, 1 + num_bytes))
}
