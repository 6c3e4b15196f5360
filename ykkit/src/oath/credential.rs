//! OATH credential value types

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::credential_id::{format_id, DEFAULT_PERIOD};
use crate::crypto::HashAlgorithm;
use crate::error::{Error, Result};

/// OATH algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OathType {
    /// Counter based, RFC 4226
    Hotp,
    /// Time based, RFC 6238
    Totp,
}

impl OathType {
    pub const fn value(self) -> u8 {
        match self {
            OathType::Hotp => 0x10,
            OathType::Totp => 0x20,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Self::Hotp),
            0x20 => Some(Self::Totp),
            _ => None,
        }
    }
}

/// Device code of an OATH hash algorithm
pub fn algorithm_value(algorithm: HashAlgorithm) -> Result<u8> {
    match algorithm {
        HashAlgorithm::Sha1 => Ok(0x01),
        HashAlgorithm::Sha256 => Ok(0x02),
        HashAlgorithm::Sha512 => Ok(0x03),
        HashAlgorithm::Sha384 => Err(Error::InvalidArgument(
            "SHA-384 is not an OATH algorithm".to_string(),
        )),
    }
}

pub fn algorithm_from_byte(byte: u8) -> Option<HashAlgorithm> {
    match byte {
        0x01 => Some(HashAlgorithm::Sha1),
        0x02 => Some(HashAlgorithm::Sha256),
        0x03 => Some(HashAlgorithm::Sha512),
        _ => None,
    }
}

/// A credential stored on a device
///
/// Two credentials are equal when they live on the same device under the
/// same id; the other fields are descriptive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub device_id: String,
    pub id: Vec<u8>,
    pub oath_type: OathType,
    pub issuer: Option<String>,
    pub account_name: String,
    /// Time step in seconds, `None` for HOTP
    pub period: Option<u32>,
    /// `None` when the listing did not report it
    pub touch_required: Option<bool>,
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.device_id == other.device_id && self.id == other.id
    }
}

impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.device_id.hash(state);
        self.id.hash(state);
    }
}

/// Everything needed to create a credential
#[derive(Clone)]
pub struct CredentialData {
    pub name: String,
    pub issuer: Option<String>,
    pub oath_type: OathType,
    pub hash_algorithm: HashAlgorithm,
    pub secret: Zeroizing<Vec<u8>>,
    pub digits: u8,
    /// TOTP time step in seconds
    pub period: u32,
    /// Initial HOTP counter
    pub counter: u32,
}

impl CredentialData {
    /// Credential data with 6 digits, a 30 second period and counter 0
    pub fn new(
        name: &str,
        oath_type: OathType,
        hash_algorithm: HashAlgorithm,
        secret: &[u8],
    ) -> Self {
        Self {
            name: name.to_string(),
            issuer: None,
            oath_type,
            hash_algorithm,
            secret: Zeroizing::new(secret.to_vec()),
            digits: 6,
            period: DEFAULT_PERIOD,
            counter: 0,
        }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self
    }

    pub fn id(&self) -> Vec<u8> {
        format_id(self.issuer.as_deref(), &self.name, self.oath_type, self.period)
    }
}

impl std::fmt::Debug for CredentialData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialData")
            .field("name", &self.name)
            .field("issuer", &self.issuer)
            .field("oath_type", &self.oath_type)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("digits", &self.digits)
            .field("period", &self.period)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// A one-time code and its validity window, in milliseconds since the epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub value: String,
    pub valid_from: i64,
    /// `i64::MAX` for HOTP codes
    pub valid_until: i64,
}

impl Code {
    /// Code for a TOTP credential, its window aligned to period boundaries
    pub fn totp(value: String, timestamp_ms: i64, period: u32) -> Self {
        let period_ms = i64::from(period.max(1)) * 1000;
        let valid_from = timestamp_ms - timestamp_ms.rem_euclid(period_ms);
        Self {
            value,
            valid_from,
            valid_until: valid_from + period_ms,
        }
    }

    /// Code for a HOTP credential, valid until the counter moves on
    pub fn hotp(value: String, timestamp_ms: i64) -> Self {
        Self {
            value,
            valid_from: timestamp_ms,
            valid_until: i64::MAX,
        }
    }
}
