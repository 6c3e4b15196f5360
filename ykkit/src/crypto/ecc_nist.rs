//! NIST ECC Operations (P-256, P-384)
//!
//! Point encodings, ECDSA over precomputed hashes and ECDH using the p256
//! and p384 crates.

use log::debug;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use super::CryptoError;

/// ECC curve types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EccCurve {
    P256,
    P384,
}

impl EccCurve {
    /// Size in bytes of a scalar or a coordinate
    pub const fn field_size(self) -> usize {
        match self {
            EccCurve::P256 => 32,
            EccCurve::P384 => 48,
        }
    }

    /// Size of an uncompressed SEC1 point
    pub const fn point_size(self) -> usize {
        1 + 2 * self.field_size()
    }

    pub const fn bit_len(self) -> usize {
        self.field_size() * 8
    }
}

/// NIST ECC Operations
pub struct EccNistOperations;

impl EccNistOperations {
    /// Generate a new key pair
    /// Returns (private scalar, uncompressed public point)
    pub fn generate_keypair<R: RngCore + CryptoRng>(
        curve: EccCurve,
        rng: &mut R,
    ) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        debug!("Generating {:?} keypair", curve);
        match curve {
            EccCurve::P256 => {
                let secret = p256::SecretKey::random(rng);
                let point = secret.public_key().to_encoded_point(false);
                (Zeroizing::new(secret.to_bytes().to_vec()), point.as_bytes().to_vec())
            }
            EccCurve::P384 => {
                let secret = p384::SecretKey::random(rng);
                let point = secret.public_key().to_encoded_point(false);
                (Zeroizing::new(secret.to_bytes().to_vec()), point.as_bytes().to_vec())
            }
        }
    }

    /// Get the uncompressed public point for a private scalar
    pub fn get_public_key(
        curve: EccCurve,
        private_key_bytes: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_scalar(curve, private_key_bytes)?;
        let point = match curve {
            EccCurve::P256 => p256::SecretKey::from_slice(private_key_bytes)
                .map(|k| k.public_key().to_encoded_point(false).as_bytes().to_vec()),
            EccCurve::P384 => p384::SecretKey::from_slice(private_key_bytes)
                .map(|k| k.public_key().to_encoded_point(false).as_bytes().to_vec()),
        };
        point.map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Check that `point` is a valid SEC1 point on `curve`
    pub fn validate_point(curve: EccCurve, point: &[u8]) -> Result<(), CryptoError> {
        let valid = match curve {
            EccCurve::P256 => p256::PublicKey::from_sec1_bytes(point).is_ok(),
            EccCurve::P384 => p384::PublicKey::from_sec1_bytes(point).is_ok(),
        };
        if valid && point.len() == curve.point_size() {
            Ok(())
        } else {
            Err(CryptoError::InvalidKey(format!("Not an uncompressed {:?} point", curve)))
        }
    }

    /// ECDSA over an already hashed message, DER-encoded signature
    pub fn sign_prehash(
        curve: EccCurve,
        private_key_bytes: &[u8],
        hash: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_scalar(curve, private_key_bytes)?;
        let invalid = |e: p256::ecdsa::Error| CryptoError::InvalidData(e.to_string());
        match curve {
            EccCurve::P256 => {
                let key = p256::ecdsa::SigningKey::from_slice(private_key_bytes).map_err(invalid)?;
                let sig: p256::ecdsa::Signature = key.sign_prehash(hash).map_err(invalid)?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            EccCurve::P384 => {
                let key = p384::ecdsa::SigningKey::from_slice(private_key_bytes).map_err(invalid)?;
                let sig: p384::ecdsa::Signature = key.sign_prehash(hash).map_err(invalid)?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
        }
    }

    /// Verify a DER-encoded ECDSA signature over an already hashed message
    pub fn verify_prehash(curve: EccCurve, point: &[u8], hash: &[u8], signature: &[u8]) -> bool {
        match curve {
            EccCurve::P256 => {
                let (Ok(key), Ok(sig)) = (
                    p256::ecdsa::VerifyingKey::from_sec1_bytes(point),
                    p256::ecdsa::Signature::from_der(signature),
                ) else {
                    return false;
                };
                key.verify_prehash(hash, &sig).is_ok()
            }
            EccCurve::P384 => {
                let (Ok(key), Ok(sig)) = (
                    p384::ecdsa::VerifyingKey::from_sec1_bytes(point),
                    p384::ecdsa::Signature::from_der(signature),
                ) else {
                    return false;
                };
                key.verify_prehash(hash, &sig).is_ok()
            }
        }
    }

    /// ECDH shared secret (the x coordinate)
    pub fn ecdh(
        curve: EccCurve,
        private_key_bytes: &[u8],
        peer_point: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        Self::check_scalar(curve, private_key_bytes)?;
        Self::validate_point(curve, peer_point)?;
        let invalid = |e: p256::elliptic_curve::Error| CryptoError::InvalidKey(e.to_string());
        let shared = match curve {
            EccCurve::P256 => {
                let secret = p256::SecretKey::from_slice(private_key_bytes).map_err(invalid)?;
                let public = p256::PublicKey::from_sec1_bytes(peer_point).map_err(invalid)?;
                p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            EccCurve::P384 => {
                let secret = p384::SecretKey::from_slice(private_key_bytes).map_err(invalid)?;
                let public = p384::PublicKey::from_sec1_bytes(peer_point).map_err(invalid)?;
                p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
        };
        Ok(Zeroizing::new(shared))
    }

    fn check_scalar(curve: EccCurve, private_key_bytes: &[u8]) -> Result<(), CryptoError> {
        if private_key_bytes.len() != curve.field_size() {
            return Err(CryptoError::InvalidKey(format!(
                "Invalid {:?} key length: expected {}, got {}",
                curve,
                curve.field_size(),
                private_key_bytes.len()
            )));
        }
        Ok(())
    }
}
