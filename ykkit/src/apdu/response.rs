//! APDU Response handling
//!
//! A Response contains data bytes plus the SW1/SW2 status word. Devices
//! produce them; the transport splits raw replies back into one.

use super::status::SW;
use super::APDUError;

/// A smartcard response
///
/// # Example
/// ```
/// use ykkit::apdu::{Response, SW};
///
/// let response = Response::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
/// assert!(response.is_okay());
/// assert_eq!(response.data, vec![0x01, 0x02]);
///
/// let error = Response::error(SW::SECURITY_STATUS_NOT_SATISFIED);
/// assert!(!error.is_okay());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data (without status words)
    pub data: Vec<u8>,
    /// Status word 1 (SW1)
    pub sw1: u8,
    /// Status word 2 (SW2)
    pub sw2: u8,
}

impl Response {
    /// Create a new response with data and status word
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self {
            data,
            sw1: (sw >> 8) as u8,
            sw2: sw as u8,
        }
    }

    /// Split a raw reply into data and the trailing status word
    pub fn from_bytes(raw: &[u8]) -> Result<Self, APDUError> {
        if raw.len() < 2 {
            return Err(APDUError::ResponseTooShort(raw.len()));
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }

    /// Create a success response (0x9000) with data
    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, SW::SUCCESS)
    }

    /// Create an empty success response (0x9000)
    pub fn ok() -> Self {
        Self::success(Vec::new())
    }

    /// Create an error response (no data)
    pub fn error(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Create a "more data available" response (0x61xx)
    pub fn more_data(data: Vec<u8>, remaining: u8) -> Self {
        Self::new(data, SW::bytes_remaining(remaining))
    }

    /// Create a counter warning response (0x63Cx) - for PIN retries
    pub fn counter_warning(retries: u8) -> Self {
        Self::error(SW::counter_warning(retries))
    }

    /// Check if the response is okay (0x9000 or 0x61xx)
    pub fn is_okay(&self) -> bool {
        (self.sw1 == 0x90 && self.sw2 == 0x00) || self.sw1 == 0x61
    }

    /// Get the combined status word as u16
    pub fn sw(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Returns Some(bytes) if SW1=0x61, None otherwise.
    pub fn available_response(&self) -> Option<u8> {
        if self.sw1 == 0x61 {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Convert to raw bytes for transmission (data + SW1 + SW2)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.data.len() + 2);
        result.extend_from_slice(&self.data);
        result.push(self.sw1);
        result.push(self.sw2);
        result
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<u16> for Response {
    /// Create an error response from a status word
    fn from(sw: u16) -> Self {
        Self::error(sw)
    }
}
