//! Management key block cipher operations
//!
//! ECB encryption and decryption of PIV authentication witnesses and
//! challenges with a 3DES or AES management key.

use aes::{Aes128, Aes192, Aes256};
use des::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use des::TdesEde3;
use log::trace;

use super::CryptoError;
use crate::piv::ManagementKeyType;

/// Block cipher keyed with a PIV management key
pub struct ManagementKeyCipher;

impl ManagementKeyCipher {
    /// Encrypt whole blocks in ECB mode
    pub fn encrypt_ecb(
        key_type: ManagementKeyType,
        key: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        trace!("{:?}-ECB encrypting {} bytes", key_type, plaintext.len());
        match key_type {
            ManagementKeyType::Tdes => ecb::<TdesEde3>(key, plaintext, true),
            ManagementKeyType::Aes128 => ecb::<Aes128>(key, plaintext, true),
            ManagementKeyType::Aes192 => ecb::<Aes192>(key, plaintext, true),
            ManagementKeyType::Aes256 => ecb::<Aes256>(key, plaintext, true),
        }
    }

    /// Decrypt whole blocks in ECB mode
    pub fn decrypt_ecb(
        key_type: ManagementKeyType,
        key: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        trace!("{:?}-ECB decrypting {} bytes", key_type, ciphertext.len());
        match key_type {
            ManagementKeyType::Tdes => ecb::<TdesEde3>(key, ciphertext, false),
            ManagementKeyType::Aes128 => ecb::<Aes128>(key, ciphertext, false),
            ManagementKeyType::Aes192 => ecb::<Aes192>(key, ciphertext, false),
            ManagementKeyType::Aes256 => ecb::<Aes256>(key, ciphertext, false),
        }
    }
}

fn ecb<C>(key: &[u8], data: &[u8], encrypt: bool) -> Result<Vec<u8>, CryptoError>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit,
{
    let cipher = C::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey(format!("Invalid key length: {}", key.len())))?;

    let block_size = C::block_size();
    if data.len() % block_size != 0 {
        return Err(CryptoError::InvalidData(format!(
            "Data length {} is not a multiple of block size {}",
            data.len(),
            block_size
        )));
    }

    let mut result = Vec::with_capacity(data.len());
    for chunk in data.chunks(block_size) {
        let mut block = Block::<C>::clone_from_slice(chunk);
        if encrypt {
            cipher.encrypt_block(&mut block);
        } else {
            cipher.decrypt_block(&mut block);
        }
        result.extend_from_slice(&block);
    }

    Ok(result)
}
