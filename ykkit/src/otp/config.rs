//! OTP slot configurations
//!
//! A slot is programmed with a fixed 52 byte block. Key material is spread
//! over the key and uid fields, behaviour is selected by three flag bytes
//! and the block ends with a CRC-16/X.25 over everything before it, stored
//! little-endian.
//!
//! ```text
//! fixed[16] uid[6] key[16] acc_code[6] fixed_size ext_flags tkt_flags cfg_flags rfu[2] crc[2]
//! ```

use crc::{Crc, CRC_16_IBM_SDLC};
use zeroize::Zeroizing;

use crate::crypto::{HashAlgorithm, HashOperations};
use crate::error::{Error, Result};
use crate::version::{Feature, Version};

pub const FIXED_SIZE: usize = 16;
pub const UID_SIZE: usize = 6;
pub const KEY_SIZE: usize = 16;
pub const ACC_CODE_SIZE: usize = 6;
pub const CONFIG_SIZE: usize = 52;
pub const HMAC_KEY_SIZE: usize = 20;
pub const HMAC_CHALLENGE_SIZE: usize = 64;
pub const HMAC_RESPONSE_SIZE: usize = 20;

/// Largest HOTP initial moving factor
pub const MAX_IMF: u32 = 0xFFFF0;

pub(crate) const UID_OFFSET: usize = FIXED_SIZE;
pub(crate) const KEY_OFFSET: usize = UID_OFFSET + UID_SIZE;
pub(crate) const ACC_OFFSET: usize = KEY_OFFSET + KEY_SIZE;
pub(crate) const FIXED_SIZE_OFFSET: usize = ACC_OFFSET + ACC_CODE_SIZE;
pub(crate) const EXT_OFFSET: usize = FIXED_SIZE_OFFSET + 1;
pub(crate) const TKT_OFFSET: usize = EXT_OFFSET + 1;
pub(crate) const CFG_OFFSET: usize = TKT_OFFSET + 1;
pub(crate) const CRC_OFFSET: usize = CONFIG_SIZE - 2;

pub(crate) const X25: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Access code protecting a slot against reprogramming
pub type AccessCode = [u8; ACC_CODE_SIZE];

pub mod ext_flag {
    pub const SERIAL_API_VISIBLE: u8 = 0x04;
    pub const ALLOW_UPDATE: u8 = 0x20;
}

pub mod tkt_flag {
    pub const APPEND_CR: u8 = 0x20;
    pub const OATH_HOTP: u8 = 0x40;
    pub const CHAL_RESP: u8 = 0x40;
}

pub mod cfg_flag {
    pub const OATH_HOTP8: u8 = 0x02;
    pub const HMAC_LT64: u8 = 0x04;
    pub const CHAL_BTN_TRIG: u8 = 0x08;
    pub const CHAL_HMAC: u8 = 0x22;
}

pub const FEATURE_HOTP: Feature = Feature::at_least("OATH-HOTP", 2, 1, 0);
pub const FEATURE_HMAC: Feature = Feature::at_least("HMAC-SHA1 challenge-response", 2, 2, 0);
pub const FEATURE_SERIAL_API_VISIBLE: Feature = Feature::at_least("Serial API visibility", 2, 2, 0);
pub const FEATURE_ALLOW_UPDATE: Feature = Feature::at_least("Configuration update", 2, 3, 0);
pub const FEATURE_CHAL_BTN_TRIG: Feature =
    Feature::at_least("Touch-triggered challenge-response", 2, 3, 0);

/// Reduce an HMAC key to the form the device stores
///
/// Keys longer than the SHA-1 block are hashed first.
fn shorten_hmac_key(key: &[u8]) -> Zeroizing<Vec<u8>> {
    if key.len() > HashAlgorithm::Sha1.block_size() {
        Zeroizing::new(HashOperations::hash(HashAlgorithm::Sha1, key))
    } else {
        Zeroizing::new(key.to_vec())
    }
}

fn check_hmac_key(key: &[u8]) -> Result<()> {
    if key.len() > HMAC_KEY_SIZE {
        return Err(Error::InvalidArgument(format!(
            "HMAC key must be at most {} bytes, got {}",
            HMAC_KEY_SIZE,
            key.len()
        )));
    }
    Ok(())
}

/// HMAC-SHA1 challenge-response
#[derive(Clone)]
pub struct HmacSha1Config {
    pub key: Zeroizing<Vec<u8>>,
    /// Wait for a button press before answering
    pub require_touch: bool,
    /// Challenges may be shorter than 64 bytes
    pub lt64: bool,
    pub serial_api_visible: bool,
    pub allow_update: bool,
}

impl HmacSha1Config {
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: shorten_hmac_key(key),
            require_touch: false,
            lt64: true,
            serial_api_visible: true,
            allow_update: false,
        }
    }
}

/// OATH-HOTP typed out on a button press
#[derive(Clone)]
pub struct HotpConfig {
    pub key: Zeroizing<Vec<u8>>,
    /// Eight digit codes instead of six
    pub digits8: bool,
    /// Initial moving factor, a multiple of 16
    pub imf: u32,
    /// Press Enter after the code
    pub append_cr: bool,
    pub serial_api_visible: bool,
    pub allow_update: bool,
}

impl HotpConfig {
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: shorten_hmac_key(key),
            digits8: false,
            imf: 0,
            append_cr: true,
            serial_api_visible: true,
            allow_update: false,
        }
    }
}

/// What a slot should do
#[derive(Clone)]
pub enum SlotConfiguration {
    HmacSha1(HmacSha1Config),
    Hotp(HotpConfig),
}

impl std::fmt::Debug for SlotConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotConfiguration::HmacSha1(_) => f.write_str("SlotConfiguration::HmacSha1"),
            SlotConfiguration::Hotp(_) => f.write_str("SlotConfiguration::Hotp"),
        }
    }
}

impl SlotConfiguration {
    /// Check that `version` supports this configuration and its options
    pub fn validate(&self, version: Version) -> Result<()> {
        let (serial_api_visible, allow_update) = match self {
            SlotConfiguration::HmacSha1(config) => {
                FEATURE_HMAC.require(version)?;
                if config.require_touch {
                    FEATURE_CHAL_BTN_TRIG.require(version)?;
                }
                check_hmac_key(&config.key)?;
                (config.serial_api_visible, config.allow_update)
            }
            SlotConfiguration::Hotp(config) => {
                FEATURE_HOTP.require(version)?;
                check_hmac_key(&config.key)?;
                if config.imf % 16 != 0 || config.imf > MAX_IMF {
                    return Err(Error::InvalidArgument(format!(
                        "Initial moving factor must be a multiple of 16 up to {}, got {}",
                        MAX_IMF, config.imf
                    )));
                }
                (config.serial_api_visible, config.allow_update)
            }
        };
        if serial_api_visible {
            FEATURE_SERIAL_API_VISIBLE.require(version)?;
        }
        if allow_update {
            FEATURE_ALLOW_UPDATE.require(version)?;
        }
        Ok(())
    }

    fn flags(&self) -> (u8, u8, u8) {
        let mut ext = 0;
        let (serial_api_visible, allow_update) = match self {
            SlotConfiguration::HmacSha1(config) => (config.serial_api_visible, config.allow_update),
            SlotConfiguration::Hotp(config) => (config.serial_api_visible, config.allow_update),
        };
        if serial_api_visible {
            ext |= ext_flag::SERIAL_API_VISIBLE;
        }
        if allow_update {
            ext |= ext_flag::ALLOW_UPDATE;
        }

        match self {
            SlotConfiguration::HmacSha1(config) => {
                let mut cfg = cfg_flag::CHAL_HMAC;
                if config.lt64 {
                    cfg |= cfg_flag::HMAC_LT64;
                }
                if config.require_touch {
                    cfg |= cfg_flag::CHAL_BTN_TRIG;
                }
                (ext, tkt_flag::CHAL_RESP, cfg)
            }
            SlotConfiguration::Hotp(config) => {
                let mut tkt = tkt_flag::OATH_HOTP;
                if config.append_cr {
                    tkt |= tkt_flag::APPEND_CR;
                }
                let cfg = if config.digits8 { cfg_flag::OATH_HOTP8 } else { 0 };
                (ext, tkt, cfg)
            }
        }
    }

    /// The 52 byte configuration block, protected by `acc_code` once written
    pub fn encode(&self, acc_code: Option<&AccessCode>) -> Result<Zeroizing<Vec<u8>>> {
        let (key, imf) = match self {
            SlotConfiguration::HmacSha1(config) => (&config.key, None),
            SlotConfiguration::Hotp(config) => (&config.key, Some(config.imf)),
        };
        check_hmac_key(key)?;

        let mut block = Zeroizing::new(vec![0u8; CONFIG_SIZE]);
        let mut padded = Zeroizing::new([0u8; HMAC_KEY_SIZE]);
        padded[..key.len()].copy_from_slice(key);
        block[KEY_OFFSET..KEY_OFFSET + KEY_SIZE].copy_from_slice(&padded[..KEY_SIZE]);
        block[UID_OFFSET..UID_OFFSET + 4].copy_from_slice(&padded[KEY_SIZE..]);
        if let Some(imf) = imf {
            let moving_factor = ((imf >> 4) as u16).to_be_bytes();
            block[UID_OFFSET + 4..UID_OFFSET + UID_SIZE].copy_from_slice(&moving_factor);
        }
        if let Some(acc_code) = acc_code {
            block[ACC_OFFSET..ACC_OFFSET + ACC_CODE_SIZE].copy_from_slice(acc_code);
        }

        let (ext, tkt, cfg) = self.flags();
        block[EXT_OFFSET] = ext;
        block[TKT_OFFSET] = tkt;
        block[CFG_OFFSET] = cfg;

        let crc = X25.checksum(&block[..CRC_OFFSET]);
        block[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        Ok(block)
    }
}

/// Configuration block followed by the access code currently on the slot
pub(crate) fn write_payload(block: &[u8], cur_acc_code: Option<&AccessCode>) -> Zeroizing<Vec<u8>> {
    let mut payload = Zeroizing::new(Vec::with_capacity(block.len() + ACC_CODE_SIZE));
    payload.extend_from_slice(block);
    payload.extend_from_slice(cur_acc_code.unwrap_or(&[0u8; ACC_CODE_SIZE]));
    payload
}

/// Pad a challenge to 64 bytes with a byte differing from its last one
pub(crate) fn pad_challenge(challenge: &[u8]) -> Result<Vec<u8>> {
    if challenge.len() > HMAC_CHALLENGE_SIZE {
        return Err(Error::InvalidArgument(format!(
            "Challenge must be at most {} bytes, got {}",
            HMAC_CHALLENGE_SIZE,
            challenge.len()
        )));
    }
    let pad = if challenge.last() == Some(&0) { 1 } else { 0 };
    let mut padded = challenge.to_vec();
    padded.resize(HMAC_CHALLENGE_SIZE, pad);
    Ok(padded)
}
