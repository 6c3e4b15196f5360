//! Cryptographic helpers
//!
//! Thin wrappers over the RustCrypto crates for what the sessions compute
//! on the host side: management key block cipher operations, HMAC and
//! PBKDF2 for OATH, RSA padding and CRT values, and EC key encodings.

pub mod ecc_nist;
pub mod hash;
pub mod mgmt;
pub mod rsa;

pub use self::ecc_nist::{EccCurve, EccNistOperations};
pub use self::hash::{HashAlgorithm, HashOperations};
pub use self::mgmt::ManagementKeyCipher;
pub use self::rsa::RsaOperations;

use thiserror::Error;

/// Errors from local cryptographic operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
