//! TLV (Tag-Length-Value) encoding and decoding
//!
//! BER-TLV records as used on the wire by the PIV, OATH and OTP
//! applications. Decoding is strict: a record whose length runs past the
//! end of the buffer is an error, never silently cut short.
//!
//! # Example
//! ```
//! use ykkit::tlv;
//!
//! let data = tlv::encode(0x7C, &tlv::encode(0x82, &[0x01, 0x02]));
//! let inner = tlv::unpack_value(0x7C, &data).unwrap();
//! assert_eq!(tlv::unpack_value(0x82, &inner).unwrap(), vec![0x01, 0x02]);
//! ```

mod encoder;
mod parser;

pub use encoder::{TLVBuilder, TLVEncoder};
pub use parser::{read_single, TLVError, TLV};

use std::collections::BTreeMap;

/// Encode a single record
pub fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
    TLVEncoder::encode(tag, value)
}

/// Encode records in the given order
pub fn encode_list<'a, I>(records: I) -> Vec<u8>
where
    I: IntoIterator<Item = (u32, &'a [u8])>,
{
    records
        .into_iter()
        .flat_map(|(tag, value)| TLVEncoder::encode(tag, value))
        .collect()
}

/// Encode a tag map, records ordered by ascending tag
pub fn encode_map(map: &BTreeMap<u32, Vec<u8>>) -> Vec<u8> {
    encode_list(map.iter().map(|(tag, value)| (*tag, value.as_slice())))
}

/// Decode every record in `data`
pub fn decode_list(data: &[u8]) -> Result<Vec<TLV>, TLVError> {
    parser::read_list(data)
}

/// Decode every record in `data` into a map keyed by tag
///
/// When a tag occurs more than once the last value wins.
pub fn decode_map(data: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>, TLVError> {
    Ok(parser::read_list(data)?
        .into_iter()
        .map(|tlv| (tlv.tag, tlv.value))
        .collect())
}

/// Decode exactly one record with the expected tag and return its value
pub fn unpack_value(tag: u32, data: &[u8]) -> Result<Vec<u8>, TLVError> {
    let (tlv, rest) = parser::read_single(data)?;
    if tlv.tag != tag {
        return Err(TLVError::TagMismatch {
            expected: tag,
            found: tlv.tag,
        });
    }
    if !rest.is_empty() {
        return Err(TLVError::TrailingData(rest.len()));
    }
    Ok(tlv.value)
}
