//! PIV value types
//!
//! Slots, key types, policies and the metadata snapshots returned by the
//! device. Each enum carries its wire parameters through `const fn`
//! accessors.

use std::fmt;

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::crypto::EccCurve;
use crate::error::{Error, Result};
use crate::tlv;

/// PIV key slot identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Slot {
    /// PIV Authentication (9A)
    Authentication = 0x9A,
    /// Digital Signature (9C)
    Signature = 0x9C,
    /// Key Management (9D)
    KeyManagement = 0x9D,
    /// Card Authentication (9E)
    CardAuth = 0x9E,
    Retired1 = 0x82,
    Retired2 = 0x83,
    Retired3 = 0x84,
    Retired4 = 0x85,
    Retired5 = 0x86,
    Retired6 = 0x87,
    Retired7 = 0x88,
    Retired8 = 0x89,
    Retired9 = 0x8A,
    Retired10 = 0x8B,
    Retired11 = 0x8C,
    Retired12 = 0x8D,
    Retired13 = 0x8E,
    Retired14 = 0x8F,
    Retired15 = 0x90,
    Retired16 = 0x91,
    Retired17 = 0x92,
    Retired18 = 0x93,
    Retired19 = 0x94,
    Retired20 = 0x95,
    /// Yubico attestation key (F9)
    Attestation = 0xF9,
}

impl Slot {
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Data object holding the certificate for this slot
    pub const fn object_id(self) -> u32 {
        match self {
            Slot::Authentication => 0x5FC105,
            Slot::Signature => 0x5FC10A,
            Slot::KeyManagement => 0x5FC10B,
            Slot::CardAuth => 0x5FC101,
            Slot::Attestation => 0x5FFF01,
            retired => 0x5FC10D + (retired as u32 - 0x82),
        }
    }

    /// Try to convert from a byte value
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x9A => Self::Authentication,
            0x9C => Self::Signature,
            0x9D => Self::KeyManagement,
            0x9E => Self::CardAuth,
            0x82 => Self::Retired1,
            0x83 => Self::Retired2,
            0x84 => Self::Retired3,
            0x85 => Self::Retired4,
            0x86 => Self::Retired5,
            0x87 => Self::Retired6,
            0x88 => Self::Retired7,
            0x89 => Self::Retired8,
            0x8A => Self::Retired9,
            0x8B => Self::Retired10,
            0x8C => Self::Retired11,
            0x8D => Self::Retired12,
            0x8E => Self::Retired13,
            0x8F => Self::Retired14,
            0x90 => Self::Retired15,
            0x91 => Self::Retired16,
            0x92 => Self::Retired17,
            0x93 => Self::Retired18,
            0x94 => Self::Retired19,
            0x95 => Self::Retired20,
            0xF9 => Self::Attestation,
            _ => return None,
        })
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:02X})", self, self.value())
    }
}

/// Key algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

/// Asymmetric key types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa1024,
    Rsa2048,
    EccP256,
    EccP384,
}

impl KeyType {
    pub const fn value(self) -> u8 {
        match self {
            KeyType::Rsa1024 => 0x06,
            KeyType::Rsa2048 => 0x07,
            KeyType::EccP256 => 0x11,
            KeyType::EccP384 => 0x14,
        }
    }

    pub const fn bit_len(self) -> usize {
        match self {
            KeyType::Rsa1024 => 1024,
            KeyType::Rsa2048 => 2048,
            KeyType::EccP256 => 256,
            KeyType::EccP384 => 384,
        }
    }

    pub const fn algorithm(self) -> KeyAlgorithm {
        match self {
            KeyType::Rsa1024 | KeyType::Rsa2048 => KeyAlgorithm::Rsa,
            KeyType::EccP256 | KeyType::EccP384 => KeyAlgorithm::Ec,
        }
    }

    pub const fn curve(self) -> Option<EccCurve> {
        match self {
            KeyType::EccP256 => Some(EccCurve::P256),
            KeyType::EccP384 => Some(EccCurve::P384),
            KeyType::Rsa1024 | KeyType::Rsa2048 => None,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x06 => Some(Self::Rsa1024),
            0x07 => Some(Self::Rsa2048),
            0x11 => Some(Self::EccP256),
            0x14 => Some(Self::EccP384),
            _ => None,
        }
    }

    pub(crate) fn from_curve(curve: EccCurve) -> Self {
        match curve {
            EccCurve::P256 => Self::EccP256,
            EccCurve::P384 => Self::EccP384,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::Rsa1024 => "RSA1024",
            KeyType::Rsa2048 => "RSA2048",
            KeyType::EccP256 => "ECCP256",
            KeyType::EccP384 => "ECCP384",
        };
        f.write_str(name)
    }
}

/// Management key algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagementKeyType {
    Tdes,
    Aes128,
    Aes192,
    Aes256,
}

impl ManagementKeyType {
    pub const fn value(self) -> u8 {
        match self {
            ManagementKeyType::Tdes => 0x03,
            ManagementKeyType::Aes128 => 0x08,
            ManagementKeyType::Aes192 => 0x0A,
            ManagementKeyType::Aes256 => 0x0C,
        }
    }

    pub const fn key_len(self) -> usize {
        match self {
            ManagementKeyType::Tdes => 24,
            ManagementKeyType::Aes128 => 16,
            ManagementKeyType::Aes192 => 24,
            ManagementKeyType::Aes256 => 32,
        }
    }

    /// Witness and challenge length, the cipher block size
    pub const fn challenge_len(self) -> usize {
        match self {
            ManagementKeyType::Tdes => 8,
            ManagementKeyType::Aes128 | ManagementKeyType::Aes192 | ManagementKeyType::Aes256 => 16,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::Tdes),
            0x08 => Some(Self::Aes128),
            0x0A => Some(Self::Aes192),
            0x0C => Some(Self::Aes256),
            _ => None,
        }
    }
}

/// When the PIN must be verified for a key to be used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PinPolicy {
    #[default]
    Default,
    Never,
    Once,
    Always,
}

impl PinPolicy {
    pub const fn value(self) -> u8 {
        match self {
            PinPolicy::Default => 0x00,
            PinPolicy::Never => 0x01,
            PinPolicy::Once => 0x02,
            PinPolicy::Always => 0x03,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Default),
            0x01 => Some(Self::Never),
            0x02 => Some(Self::Once),
            0x03 => Some(Self::Always),
            _ => None,
        }
    }
}

/// When a touch is required for a key to be used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TouchPolicy {
    #[default]
    Default,
    Never,
    Always,
    /// Touch is cached for 15 seconds
    Cached,
}

impl TouchPolicy {
    pub const fn value(self) -> u8 {
        match self {
            TouchPolicy::Default => 0x00,
            TouchPolicy::Never => 0x01,
            TouchPolicy::Always => 0x02,
            TouchPolicy::Cached => 0x03,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Default),
            0x01 => Some(Self::Never),
            0x02 => Some(Self::Always),
            0x03 => Some(Self::Cached),
            _ => None,
        }
    }
}

/// PIN or PUK metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMetadata {
    /// The factory default value is still set
    pub default_value: bool,
    pub total_attempts: u8,
    pub attempts_remaining: u8,
}

/// Management key metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagementKeyMetadata {
    pub key_type: ManagementKeyType,
    pub default_value: bool,
    pub touch_policy: TouchPolicy,
}

/// Metadata of a key slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMetadata {
    pub key_type: KeyType,
    pub pin_policy: PinPolicy,
    pub touch_policy: TouchPolicy,
    /// Generated on the device rather than imported
    pub generated: bool,
    pub public_key: PublicKeyValues,
}

/// A certificate read from a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub der: Vec<u8>,
    /// The stored bytes are gzip compressed
    pub compressed: bool,
}

/// Public key as returned by key generation or slot metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyValues {
    Rsa {
        modulus: Vec<u8>,
        public_exponent: Vec<u8>,
    },
    Ec {
        curve: EccCurve,
        /// Uncompressed SEC1 point
        point: Vec<u8>,
    },
}

impl PublicKeyValues {
    /// Parse the content of a `7F49` public key template
    pub fn from_device(key_type: KeyType, data: &[u8]) -> Result<Self> {
        let fields = tlv::decode_map(data)?;
        let field = |tag: u32| {
            fields
                .get(&tag)
                .cloned()
                .ok_or_else(|| Error::BadResponse(format!("Public key is missing tag {:02X}", tag)))
        };
        match key_type.curve() {
            None => Ok(PublicKeyValues::Rsa {
                modulus: field(0x81)?,
                public_exponent: field(0x82)?,
            }),
            Some(curve) => {
                let point = field(0x86)?;
                if point.len() != curve.point_size() {
                    return Err(Error::BadResponse(format!(
                        "Invalid {} point length {}",
                        key_type,
                        point.len()
                    )));
                }
                Ok(PublicKeyValues::Ec { curve, point })
            }
        }
    }

    /// Encode as the content of a `7F49` public key template
    pub fn to_device(&self) -> Vec<u8> {
        match self {
            PublicKeyValues::Rsa {
                modulus,
                public_exponent,
            } => tlv::encode_list([(0x81, modulus.as_slice()), (0x82, public_exponent.as_slice())]),
            PublicKeyValues::Ec { point, .. } => tlv::encode(0x86, point),
        }
    }

    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey> {
        match self {
            PublicKeyValues::Rsa {
                modulus,
                public_exponent,
            } => RsaPublicKey::new(
                BigUint::from_bytes_be(modulus),
                BigUint::from_bytes_be(public_exponent),
            )
            .map_err(|e| Error::InvalidArgument(e.to_string())),
            PublicKeyValues::Ec { .. } => {
                Err(Error::InvalidArgument("Not an RSA public key".to_string()))
            }
        }
    }
}

/// Private key material for import
pub enum PrivateKeyValues {
    Rsa(RsaPrivateKey),
    Ec {
        curve: EccCurve,
        secret: Zeroizing<Vec<u8>>,
    },
}

impl PrivateKeyValues {
    pub fn key_type(&self) -> Result<KeyType> {
        match self {
            PrivateKeyValues::Rsa(key) => match key.n().bits() {
                1024 => Ok(KeyType::Rsa1024),
                2048 => Ok(KeyType::Rsa2048),
                bits => Err(Error::InvalidArgument(format!(
                    "Unsupported RSA key size: {}",
                    bits
                ))),
            },
            PrivateKeyValues::Ec { curve, .. } => Ok(KeyType::from_curve(*curve)),
        }
    }
}

impl fmt::Debug for PrivateKeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKeyValues::Rsa(key) => write!(f, "Rsa({} bits)", key.n().bits()),
            PrivateKeyValues::Ec { curve, .. } => write!(f, "Ec({:?})", curve),
        }
    }
}
