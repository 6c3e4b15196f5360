//! BER-TLV Encoder
//!
//! Encodes TLV records for command payloads.

/// TLV Encoder for building BER-TLV structures
pub struct TLVEncoder;

impl TLVEncoder {
    /// Encode a tag-value pair to bytes
    pub fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(value.len() + 8);
        result.extend(Self::encode_tag(tag));
        result.extend(Self::encode_length(value.len()));
        result.extend_from_slice(value);
        result
    }

    /// Encode just the tag bytes
    pub fn encode_tag(tag: u32) -> Vec<u8> {
        if tag > 0xFFFF {
            vec![
                ((tag >> 16) & 0xFF) as u8,
                ((tag >> 8) & 0xFF) as u8,
                (tag & 0xFF) as u8,
            ]
        } else if tag > 0xFF {
            vec![((tag >> 8) & 0xFF) as u8, (tag & 0xFF) as u8]
        } else {
            vec![(tag & 0xFF) as u8]
        }
    }

    /// Encode just the length bytes
    pub fn encode_length(length: usize) -> Vec<u8> {
        if length < 128 {
            vec![length as u8]
        } else if length < 256 {
            vec![0x81, length as u8]
        } else if length < 65536 {
            vec![0x82, (length >> 8) as u8, (length & 0xFF) as u8]
        } else if length < 16777216 {
            vec![
                0x83,
                (length >> 16) as u8,
                ((length >> 8) & 0xFF) as u8,
                (length & 0xFF) as u8,
            ]
        } else {
            vec![
                0x84,
                (length >> 24) as u8,
                ((length >> 16) & 0xFF) as u8,
                ((length >> 8) & 0xFF) as u8,
                (length & 0xFF) as u8,
            ]
        }
    }
}

/// Builder for constructing complex TLV structures
///
/// Records are emitted in the order they are added.
#[derive(Debug, Clone, Default)]
pub struct TLVBuilder {
    data: Vec<u8>,
}

impl TLVBuilder {
    /// Create a new TLV builder
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Add a primitive TLV
    pub fn add(mut self, tag: u32, value: &[u8]) -> Self {
        self.data.extend(TLVEncoder::encode(tag, value));
        self
    }

    /// Add a TLV only when a value is present
    pub fn add_opt(self, tag: u32, value: Option<&[u8]>) -> Self {
        match value {
            Some(value) => self.add(tag, value),
            None => self,
        }
    }

    /// Add raw bytes (pre-encoded TLV)
    pub fn add_raw(mut self, data: &[u8]) -> Self {
        self.data.extend_from_slice(data);
        self
    }

    /// Wrap current content in a constructed tag
    pub fn wrap(self, tag: u32) -> Self {
        let wrapped = TLVEncoder::encode(tag, &self.data);
        Self { data: wrapped }
    }

    /// Build the final byte vector
    pub fn build(self) -> Vec<u8> {
        self.data
    }

    /// Get current length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
