//! Crate-wide error type
//!
//! Each low-level module owns its own error enum; they fold into [`Error`]
//! so session code can use `?` throughout.

use std::io;

use thiserror::Error;

use crate::apdu::APDUError;
use crate::crypto::CryptoError;
use crate::tlv::TLVError;

/// Errors surfaced by sessions and the transport
#[derive(Debug, Error)]
pub enum Error {
    /// The connection failed; the session must be closed and reopened
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// SELECT did not find the requested application
    #[error("Application not available: {0}")]
    ApplicationNotAvailable(String),

    /// The device answered with a status word other than 9000
    #[error("Command failed with status word {sw:04X}")]
    Apdu { sw: u16 },

    #[error("Malformed APDU: {0}")]
    Frame(#[from] APDUError),

    /// The device reply does not have the expected shape or content
    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Malformed TLV in response: {0}")]
    Tlv(#[from] TLVError),

    /// A PIN or PUK was rejected
    #[error("Invalid PIN/PUK, {attempts_remaining} attempts remaining")]
    InvalidPin { attempts_remaining: u8 },

    /// The firmware does not support the requested feature
    #[error("{0}")]
    NotSupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),
}

impl Error {
    /// The status word, for errors reported by the device
    pub fn sw(&self) -> Option<u16> {
        match self {
            Error::Apdu { sw } => Some(*sw),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
