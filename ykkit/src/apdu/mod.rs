//! APDU (Application Protocol Data Unit) handling
//!
//! Plain structs and functions for ISO 7816-4 command and response APDUs.
//! Commands are encoded here in either the short or the extended length
//! format; [`parse_apdu`] does the reverse and understands both.
//!
//! # Example
//! ```
//! use ykkit::apdu::{parse_apdu, ApduFormat, APDU};
//!
//! let cmd = APDU::with_data(0x00, 0xA4, 0x04, 0x00, vec![0xA0, 0x00, 0x00, 0x03, 0x08]);
//! let raw = cmd.to_bytes(ApduFormat::Short).unwrap();
//! assert_eq!(parse_apdu(&raw).unwrap(), cmd);
//! ```

mod response;
mod status;

pub use response::Response;
pub use status::SW;

use thiserror::Error;

/// Largest command body that fits a single short APDU
pub const SHORT_APDU_MAX_CHUNK: usize = 0xFF;

/// Largest command body that fits a single extended APDU
pub const EXTENDED_APDU_MAX_DATA: usize = 0xFFFF;

/// Errors that can occur while encoding or parsing APDUs
#[derive(Debug, Error, PartialEq, Eq)]
pub enum APDUError {
    #[error("APDU too short: expected at least 4 bytes, got {0}")]
    TooShort(usize),

    #[error("Invalid APDU length")]
    InvalidLength,

    #[error("Invalid extended APDU format")]
    InvalidExtendedFormat,

    #[error("Command data of {0} bytes does not fit the APDU format")]
    DataTooLong(usize),

    #[error("Response too short: expected at least 2 status bytes, got {0}")]
    ResponseTooShort(usize),
}

/// Length encoding used when sending a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApduFormat {
    /// One byte Lc/Le, bodies over 255 bytes are sent with command chaining
    #[default]
    Short,
    /// Three byte Lc, two byte Le
    Extended,
}

/// A command APDU
///
/// # Fields
/// - `cla`: Class byte (chaining, secure messaging, logical channel)
/// - `ins`: Instruction byte (the command to execute)
/// - `p1`, `p2`: Parameter bytes (command-specific)
/// - `data`: Command data (may be empty)
/// - `le`: Expected response length (None if not specified)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct APDU {
    /// Class byte (CLA)
    pub cla: u8,
    /// Instruction byte (INS)
    pub ins: u8,
    /// Parameter 1 (P1)
    pub p1: u8,
    /// Parameter 2 (P2)
    pub p2: u8,
    /// Command data (may be empty)
    pub data: Vec<u8>,
    /// Expected response length (Le), None if not specified
    pub le: Option<u32>,
}

impl APDU {
    /// Create a new APDU with just the header (CLA, INS, P1, P2)
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Create a new APDU with data
    pub fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        }
    }

    /// Check if this is a chained APDU (CLA bit 4 set)
    pub fn is_chained(&self) -> bool {
        (self.cla & 0x10) != 0
    }

    /// Get P1-P2 combined as a u16
    pub fn p1p2(&self) -> u16 {
        ((self.p1 as u16) << 8) | (self.p2 as u16)
    }

    /// Encode the command for transmission
    ///
    /// - Short: CLA INS P1 P2 [Lc Data] [Le]
    /// - Extended: CLA INS P1 P2 00 [Lc1 Lc2 Data] [Le1 Le2]
    ///
    /// Short encoding fails for bodies over 255 bytes; splitting those into
    /// a chain is the job of the transport.
    pub fn to_bytes(&self, format: ApduFormat) -> Result<Vec<u8>, APDUError> {
        let mut buf = Vec::with_capacity(self.data.len() + 9);
        buf.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);

        match format {
            ApduFormat::Short => {
                if self.data.len() > SHORT_APDU_MAX_CHUNK {
                    return Err(APDUError::DataTooLong(self.data.len()));
                }
                if !self.data.is_empty() {
                    buf.push(self.data.len() as u8);
                    buf.extend_from_slice(&self.data);
                }
                if let Some(le) = self.le {
                    // Le=256 is written as 00
                    buf.push(le as u8);
                }
            }
            ApduFormat::Extended => {
                if self.data.len() > EXTENDED_APDU_MAX_DATA {
                    return Err(APDUError::DataTooLong(self.data.len()));
                }
                if !self.data.is_empty() || self.le.is_some() {
                    buf.push(0x00);
                }
                if !self.data.is_empty() {
                    buf.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
                    buf.extend_from_slice(&self.data);
                }
                if let Some(le) = self.le {
                    // Le=65536 is written as 00 00
                    buf.extend_from_slice(&(le as u16).to_be_bytes());
                }
            }
        }

        Ok(buf)
    }
}

/// Parse raw bytes into an APDU
///
/// Supports both short and extended APDU formats:
/// - Short: CLA INS P1 P2 [Lc Data] [Le]
/// - Extended: CLA INS P1 P2 00 Lc1 Lc2 Data [Le1 Le2]
///
/// # Example
/// ```
/// # use ykkit::apdu::parse_apdu;
/// let raw = &[0x00, 0xCB, 0x3F, 0xFF, 0x00];
/// let apdu = parse_apdu(raw).unwrap();
/// assert_eq!(apdu.ins, 0xCB);
/// assert_eq!(apdu.le, Some(256));
/// ```
pub fn parse_apdu(data: &[u8]) -> Result<APDU, APDUError> {
    if data.len() < 4 {
        return Err(APDUError::TooShort(data.len()));
    }

    let cla = data[0];
    let ins = data[1];
    let p1 = data[2];
    let p2 = data[3];

    // Case 1: CLA INS P1 P2 (no data, no Le)
    if data.len() == 4 {
        return Ok(APDU::new(cla, ins, p1, p2));
    }

    let remaining = &data[4..];

    // Extended format: 00 Lc1 Lc2 [Data] [Le1 Le2]
    if remaining[0] == 0x00 && remaining.len() > 2 {
        let ext_remaining = &remaining[1..];
        let potential_lc = ((ext_remaining[0] as usize) << 8) | (ext_remaining[1] as usize);
        // Case 2E: Le only; Case 3E: Lc + Data; Case 4E: Lc + Data + Le
        let is_valid_extended = ext_remaining.len() == 2
            || ext_remaining.len() == 2 + potential_lc
            || ext_remaining.len() == 2 + potential_lc + 2;

        if is_valid_extended {
            return parse_extended_apdu(cla, ins, p1, p2, ext_remaining);
        }

        // T=1 readers may prefix a short APDU with 00
        if let Ok(apdu) = parse_short_apdu(cla, ins, p1, p2, ext_remaining) {
            return Ok(apdu);
        }
    }

    parse_short_apdu(cla, ins, p1, p2, remaining)
}

/// Parse short format APDU (Lc/Le up to 255 bytes)
fn parse_short_apdu(
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    remaining: &[u8],
) -> Result<APDU, APDUError> {
    if remaining.is_empty() {
        return Ok(APDU::new(cla, ins, p1, p2));
    }

    let first_byte = remaining[0];

    // Case 2: Only Le (1 byte) - Le=0 means 256
    if remaining.len() == 1 {
        let le = if first_byte == 0 { 256 } else { first_byte as u32 };
        return Ok(APDU {
            cla, ins, p1, p2,
            data: Vec::new(),
            le: Some(le),
        });
    }

    let lc = first_byte as usize;

    // Case 3: Lc + Data (no Le)
    if remaining.len() == 1 + lc {
        return Ok(APDU {
            cla, ins, p1, p2,
            data: remaining[1..1 + lc].to_vec(),
            le: None,
        });
    }

    // Case 4: Lc + Data + Le
    if remaining.len() == 1 + lc + 1 {
        let le_byte = remaining[1 + lc];
        let le = if le_byte == 0 { 256 } else { le_byte as u32 };
        return Ok(APDU {
            cla, ins, p1, p2,
            data: remaining[1..1 + lc].to_vec(),
            le: Some(le),
        });
    }

    Err(APDUError::InvalidLength)
}

/// Parse extended format APDU (Lc/Le up to 65535 bytes)
fn parse_extended_apdu(
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    remaining: &[u8],
) -> Result<APDU, APDUError> {
    if remaining.len() < 2 {
        return Err(APDUError::InvalidExtendedFormat);
    }

    let first_word = ((remaining[0] as u32) << 8) | (remaining[1] as u32);

    // Case 2E: Only extended Le (no data) - Le=0 means 65536
    if remaining.len() == 2 {
        let le = if first_word == 0 { 65536 } else { first_word };
        return Ok(APDU {
            cla, ins, p1, p2,
            data: Vec::new(),
            le: Some(le),
        });
    }

    let lc = first_word as usize;

    if remaining.len() < 2 + lc {
        return Err(APDUError::InvalidLength);
    }

    let cmd_data = remaining[2..2 + lc].to_vec();

    // Case 3E: Extended Lc + Data (no Le)
    if remaining.len() == 2 + lc {
        return Ok(APDU {
            cla, ins, p1, p2,
            data: cmd_data,
            le: None,
        });
    }

    // Case 4E: Extended Lc + Data + Extended Le
    if remaining.len() == 2 + lc + 2 {
        let le_word = ((remaining[2 + lc] as u32) << 8) | (remaining[2 + lc + 1] as u32);
        let le = if le_word == 0 { 65536 } else { le_word };
        return Ok(APDU {
            cla, ins, p1, p2,
            data: cmd_data,
            le: Some(le),
        });
    }

    Err(APDUError::InvalidExtendedFormat)
}

/// Instruction bytes shared by every application
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const GET_RESPONSE: u8 = 0xC0;
}
