//! Hash Operations
//!
//! Digests, HMAC and PBKDF2 used by PIV signing and OATH credentials.

use digest::Digest;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use super::CryptoError;

/// Hash algorithm types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const fn output_size(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Internal block size, which bounds the HMAC key length
    pub const fn block_size(self) -> usize {
        match self {
            HashAlgorithm::Sha1 | HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha384 | HashAlgorithm::Sha512 => 128,
        }
    }

    /// DER prefix of a PKCS#1 DigestInfo for this algorithm
    pub const fn digest_info_prefix(self) -> &'static [u8] {
        match self {
            HashAlgorithm::Sha1 => &[
                0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04,
                0x14,
            ],
            HashAlgorithm::Sha256 => &[
                0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x01, 0x05, 0x00, 0x04, 0x20,
            ],
            HashAlgorithm::Sha384 => &[
                0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x02, 0x05, 0x00, 0x04, 0x30,
            ],
            HashAlgorithm::Sha512 => &[
                0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x03, 0x05, 0x00, 0x04, 0x40,
            ],
        }
    }
}

/// Hash Operations
pub struct HashOperations;

impl HashOperations {
    /// Compute hash using specified algorithm
    pub fn hash(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
        match algorithm {
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Compute HMAC over `data`
    pub fn hmac(algorithm: HashAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        fn mac<M: Mac + hmac::digest::KeyInit>(
            key: &[u8],
            data: &[u8],
        ) -> Result<Vec<u8>, CryptoError> {
            let mut m = <M as hmac::digest::KeyInit>::new_from_slice(key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            m.update(data);
            Ok(m.finalize().into_bytes().to_vec())
        }

        match algorithm {
            HashAlgorithm::Sha1 => mac::<Hmac<Sha1>>(key, data),
            HashAlgorithm::Sha256 => mac::<Hmac<Sha256>>(key, data),
            HashAlgorithm::Sha384 => mac::<Hmac<Sha384>>(key, data),
            HashAlgorithm::Sha512 => mac::<Hmac<Sha512>>(key, data),
        }
    }

    /// PBKDF2-HMAC-SHA1
    pub fn pbkdf2_sha1(password: &[u8], salt: &[u8], rounds: u32, length: usize) -> Vec<u8> {
        let mut out = vec![0u8; length];
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, rounds, &mut out);
        out
    }
}
