//! RSA Operations
//!
//! PKCS#1 v1.5 padding, raw private key operations and CRT parameters
//! for key import, using the rsa crate.

use log::debug;
use rand::{CryptoRng, RngCore};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};

use super::CryptoError;

/// Exponent accepted for key import
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

/// CRT parameters of an RSA private key, big-endian
pub struct CrtComponents {
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub dp: Vec<u8>,
    pub dq: Vec<u8>,
    pub qinv: Vec<u8>,
}

/// RSA Operations
pub struct RsaOperations;

impl RsaOperations {
    /// Generate a new RSA key
    pub fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        bits: usize,
    ) -> Result<RsaPrivateKey, CryptoError> {
        debug!("Generating RSA-{} keypair", bits);
        RsaPrivateKey::new(rng, bits).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Extract p, q, dP, dQ and qInv
    pub fn crt_components(key: &RsaPrivateKey) -> Result<CrtComponents, CryptoError> {
        let primes = key.primes();
        if primes.len() != 2 {
            return Err(CryptoError::InvalidKey("Expected exactly two prime factors".to_string()));
        }
        let one = BigUint::from(1u64);
        let (p, q) = (&primes[0], &primes[1]);
        let d = key.d();

        let dp = d % (p - &one);
        let dq = d % (q - &one);
        let qinv = Self::mod_inverse(q, p)
            .ok_or_else(|| CryptoError::InvalidKey("q is not invertible mod p".to_string()))?;

        Ok(CrtComponents {
            p: p.to_bytes_be(),
            q: q.to_bytes_be(),
            dp: dp.to_bytes_be(),
            dq: dq.to_bytes_be(),
            qinv: qinv.to_bytes_be(),
        })
    }

    /// Rebuild a private key from its primes and public exponent
    pub fn from_primes(p: &[u8], q: &[u8], e: u32) -> Result<RsaPrivateKey, CryptoError> {
        let p = BigUint::from_bytes_be(p);
        let q = BigUint::from_bytes_be(q);
        let e = BigUint::from(e);
        let n = &p * &q;

        let one = BigUint::from(1u64);
        let phi_n = (&p - &one) * (&q - &one);
        let d = Self::mod_inverse(&e, &phi_n)
            .ok_or_else(|| {
                CryptoError::InvalidKey("Cannot compute private exponent d".to_string())
            })?;

        RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Build an EMSA-PKCS1-v1_5 block: 00 01 FF..FF 00 DigestInfo
    pub fn pkcs1v15_sign_pad(digest_info: &[u8], key_size: usize) -> Result<Vec<u8>, CryptoError> {
        // At least 8 bytes of 0xFF
        if digest_info.len() + 11 > key_size {
            return Err(CryptoError::InvalidData("DigestInfo too large for key size".to_string()));
        }

        let padding_len = key_size - digest_info.len() - 3;
        let mut padded = Vec::with_capacity(key_size);
        padded.push(0x00);
        padded.push(0x01);
        padded.extend(std::iter::repeat(0xFF).take(padding_len));
        padded.push(0x00);
        padded.extend_from_slice(digest_info);
        Ok(padded)
    }

    /// Strip EME-PKCS1-v1_5 padding (00 02 PS 00 M) from a decrypted block
    pub fn pkcs1v15_unpad_encryption(block: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let bad = || CryptoError::InvalidData("Invalid PKCS#1 v1.5 encryption padding".to_string());
        if block.len() < 11 || block[0] != 0x00 || block[1] != 0x02 {
            return Err(bad());
        }
        let separator = block[2..].iter().position(|&b| b == 0x00).ok_or_else(bad)? + 2;
        if separator < 10 {
            return Err(bad());
        }
        Ok(block[separator + 1..].to_vec())
    }

    /// Raw private key operation, m^d mod n, left-padded to the key size
    pub fn raw_sign(
        private_key: &RsaPrivateKey,
        padded_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key_size = private_key.size();
        let m = BigUint::from_bytes_be(padded_data);
        if padded_data.len() != key_size || &m >= private_key.n() {
            return Err(CryptoError::InvalidData("Input is not a valid RSA block".to_string()));
        }

        let result = m.modpow(private_key.d(), private_key.n()).to_bytes_be();
        let mut out = vec![0u8; key_size - result.len()];
        out.extend_from_slice(&result);
        Ok(out)
    }

    /// Compute modular multiplicative inverse using extended Euclidean algorithm
    /// Returns a^(-1) mod m, or None if no inverse exists
    fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
        // BigUint is unsigned, so signs are tracked separately
        let one = BigUint::from(1u64);
        let zero = BigUint::from(0u64);

        let mut old_r = m.clone();
        let mut r = a % m;
        let mut old_s = zero.clone();
        let mut s = one.clone();
        let mut old_s_neg = false;
        let mut s_neg = false;

        while r != zero {
            let quotient = &old_r / &r;

            let temp_r = old_r;
            old_r = r.clone();
            r = temp_r - &quotient * &r;

            // new_s = old_s - quotient * s
            let (new_s, new_s_neg) = {
                let qs = &quotient * &s;
                if old_s_neg == s_neg {
                    if old_s >= qs {
                        (old_s.clone() - &qs, old_s_neg)
                    } else {
                        (qs - &old_s, !old_s_neg)
                    }
                } else {
                    (old_s.clone() + &qs, old_s_neg)
                }
            };
            old_s = s;
            old_s_neg = s_neg;
            s = new_s;
            s_neg = new_s_neg;
        }

        if old_r != one {
            return None;
        }

        let result = if old_s_neg { m - &old_s } else { old_s };
        Some(result % m)
    }
}
