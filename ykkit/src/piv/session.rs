//! PIV session
//!
//! Host side of the YubiKey PIV application: management key
//! authentication, PIN and PUK lifecycle, key generation and import,
//! private key operations, data objects and certificates.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rand::{CryptoRng, RngCore};
use rsa::traits::PublicKeyParts;
use rsa::BigUint;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::security_state::{PinAttemptEstimate, DEFAULT_PIN_ATTEMPTS};
use super::types::{
    Certificate, KeyAlgorithm, KeyType, ManagementKeyMetadata, ManagementKeyType, PinMetadata,
    PinPolicy, PrivateKeyValues, PublicKeyValues, Slot, SlotMetadata, TouchPolicy,
};
use crate::apdu::{APDU, SW};
use crate::crypto::rsa::RSA_PUBLIC_EXPONENT;
use crate::crypto::{
    EccNistOperations, HashAlgorithm, HashOperations, ManagementKeyCipher, RsaOperations,
};
use crate::error::{Error, Result};
use crate::tlv::{self, TLVBuilder};
use crate::transport::{SmartCardConnection, SmartCardProtocol};
use crate::version::{Feature, Version};

/// PIV Application Identifier
pub const PIV_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x03, 0x08];

/// PIV instruction bytes, including the Yubico extensions
pub mod ins {
    pub const VERIFY: u8 = 0x20;
    pub const CHANGE_REFERENCE: u8 = 0x24;
    pub const RESET_RETRY: u8 = 0x2C;
    pub const GENERATE_ASYMMETRIC: u8 = 0x47;
    pub const AUTHENTICATE: u8 = 0x87;
    pub const GET_DATA: u8 = 0xCB;
    pub const PUT_DATA: u8 = 0xDB;
    pub const GET_METADATA: u8 = 0xF7;
    pub const GET_SERIAL: u8 = 0xF8;
    pub const ATTEST: u8 = 0xF9;
    pub const SET_PIN_RETRIES: u8 = 0xFA;
    pub const RESET: u8 = 0xFB;
    pub const GET_VERSION: u8 = 0xFD;
    pub const IMPORT_KEY: u8 = 0xFE;
    pub const SET_MGMKEY: u8 = 0xFF;
}

/// PIV Key Reference bytes
pub mod key_ref {
    pub const PIN: u8 = 0x80;
    pub const PUK: u8 = 0x81;
    pub const MGMT_KEY: u8 = 0x9B;
}

/// Tags used in PIV requests and replies
pub mod tag {
    pub const DYN_AUTH: u32 = 0x7C;
    pub const AUTH_WITNESS: u32 = 0x80;
    pub const AUTH_CHALLENGE: u32 = 0x81;
    pub const AUTH_RESPONSE: u32 = 0x82;
    pub const AUTH_EXPONENTIATION: u32 = 0x85;
    pub const GEN_ALGORITHM: u32 = 0x80;
    pub const GEN_TEMPLATE: u32 = 0xAC;
    pub const PIN_POLICY: u32 = 0xAA;
    pub const TOUCH_POLICY: u32 = 0xAB;
    pub const PUBLIC_KEY: u32 = 0x7F49;
    pub const OBJ_ID: u32 = 0x5C;
    pub const OBJ_DATA: u32 = 0x53;
    pub const CERTIFICATE: u32 = 0x70;
    pub const CERT_INFO: u32 = 0x71;
    pub const LRC: u32 = 0xFE;
    pub const METADATA_ALGO: u32 = 0x01;
    pub const METADATA_POLICY: u32 = 0x02;
    pub const METADATA_ORIGIN: u32 = 0x03;
    pub const METADATA_PUBLIC_KEY: u32 = 0x04;
    pub const METADATA_IS_DEFAULT: u32 = 0x05;
    pub const METADATA_RETRIES: u32 = 0x06;
}

const ORIGIN_GENERATED: u8 = 0x01;
const PIN_LEN: usize = 8;

pub const FEATURE_P384: Feature = Feature::at_least("Curve P384", 4, 0, 0);
pub const FEATURE_USAGE_POLICY: Feature = Feature::at_least("PIN/Touch Policy", 4, 0, 0);
pub const FEATURE_TOUCH_CACHED: Feature = Feature::at_least("Cached Touch Policy", 4, 3, 0);
pub const FEATURE_ATTESTATION: Feature = Feature::at_least("Attestation", 4, 3, 0);
pub const FEATURE_SERIAL: Feature = Feature::at_least("Serial Number", 5, 0, 0);
pub const FEATURE_METADATA: Feature = Feature::at_least("Metadata", 5, 3, 0);
pub const FEATURE_AES_KEY: Feature = Feature::at_least("AES Management Key", 5, 4, 0);
/// Firmware 4.2.6 to 4.3.4 generates weak RSA keys
pub const FEATURE_RSA_GENERATION: Feature = Feature::excluding(
    "RSA key generation",
    Version::new(4, 2, 6),
    Version::new(4, 3, 5),
);

/// Decode the remaining PIN or PUK attempts carried by a failure status word
///
/// Returns `None` when `sw` is not a retry-bearing status.
pub fn pin_retries_from_sw(sw: u16, version: Version) -> Option<u8> {
    if sw == SW::AUTH_METHOD_BLOCKED {
        return Some(0);
    }
    if version < Version::new(1, 0, 4) {
        SW::get_legacy_retry_count(sw)
    } else {
        SW::get_retry_count(sw)
    }
}

fn pin_bytes(pin: &str) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = pin.as_bytes();
    if bytes.len() > PIN_LEN {
        return Err(Error::InvalidArgument(format!(
            "PIN/PUK must be no longer than {} bytes",
            PIN_LEN
        )));
    }
    let mut padded = Zeroizing::new(vec![0xFF; PIN_LEN]);
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// Minimal big-endian encoding of a data object id
fn object_id_bytes(object_id: u32) -> Vec<u8> {
    let bytes = object_id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    bytes[skip..].to_vec()
}

/// Left-pad an unsigned big-endian integer to exactly `length` bytes
fn pad_int(value: &[u8], length: usize) -> Result<Zeroizing<Vec<u8>>> {
    let skip = value.iter().take_while(|&&b| b == 0).count();
    let value = &value[skip..];
    if value.len() > length {
        return Err(Error::InvalidArgument(format!(
            "Value of {} bytes does not fit in {} bytes",
            value.len(),
            length
        )));
    }
    let mut padded = Zeroizing::new(vec![0u8; length - value.len()]);
    padded.extend_from_slice(value);
    Ok(padded)
}

/// Compare the device's encrypted challenge with the expected value
fn check_challenge_response(expected: &[u8], actual: &[u8]) -> Result<()> {
    if bool::from(expected.ct_eq(actual)) {
        Ok(())
    } else {
        Err(Error::BadResponse(
            "Device response to the management key challenge is incorrect".to_string(),
        ))
    }
}

/// An open PIV session
pub struct PivSession<C: SmartCardConnection> {
    protocol: SmartCardProtocol<C>,
    version: Version,
    pin_attempts: PinAttemptEstimate,
}

impl<C: SmartCardConnection> PivSession<C> {
    /// Select the PIV application and read the firmware version
    pub fn open(connection: C) -> Result<Self> {
        let mut protocol = SmartCardProtocol::new(connection);
        protocol.select(PIV_AID)?;
        let reply = protocol.send_and_receive(&APDU::new(0, ins::GET_VERSION, 0, 0))?;
        let version = Version::from_bytes(&reply)?;
        protocol.configure(version);
        info!("PIV session opened, firmware {}", version);
        Ok(Self {
            protocol,
            version,
            pin_attempts: PinAttemptEstimate::default(),
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Close the session and its connection
    pub fn close(self) -> Result<()> {
        self.protocol.close()
    }

    fn send(&mut self, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Vec<u8>> {
        self.protocol.send_and_receive(&APDU::with_data(0, ins, p1, p2, data))
    }

    /// Authenticate with the management key
    ///
    /// Mutual three-pass challenge-response: the device sends an encrypted
    /// witness, the host returns it decrypted with its own challenge, and
    /// the device proves key possession by returning that challenge
    /// encrypted.
    pub fn authenticate<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        key_type: ManagementKeyType,
        management_key: &[u8],
    ) -> Result<()> {
        if management_key.len() != key_type.key_len() {
            return Err(Error::InvalidArgument(format!(
                "Management key must be {} bytes for {:?}",
                key_type.key_len(),
                key_type
            )));
        }
        if key_type != ManagementKeyType::Tdes {
            FEATURE_AES_KEY.require(self.version)?;
        }
        let challenge_len = key_type.challenge_len();

        debug!("Requesting management key witness");
        let request = tlv::encode(tag::DYN_AUTH, &tlv::encode(tag::AUTH_WITNESS, &[]));
        let response = self.send(ins::AUTHENTICATE, key_type.value(), key_ref::MGMT_KEY, request)?;
        let template = tlv::unpack_value(tag::DYN_AUTH, &response)?;
        let witness = tlv::unpack_value(tag::AUTH_WITNESS, &template)?;
        if witness.len() != challenge_len {
            return Err(Error::BadResponse(format!(
                "Witness has length {}, expected {}",
                witness.len(),
                challenge_len
            )));
        }
        let decrypted = ManagementKeyCipher::decrypt_ecb(key_type, management_key, &witness)?;

        let mut challenge = vec![0u8; challenge_len];
        rng.fill_bytes(&mut challenge);
        let request = tlv::encode(
            tag::DYN_AUTH,
            &tlv::encode_list([
                (tag::AUTH_WITNESS, decrypted.as_slice()),
                (tag::AUTH_CHALLENGE, challenge.as_slice()),
            ]),
        );
        let response = self.send(ins::AUTHENTICATE, key_type.value(), key_ref::MGMT_KEY, request)?;
        let encrypted =
            tlv::unpack_value(tag::AUTH_RESPONSE, &tlv::unpack_value(tag::DYN_AUTH, &response)?)?;

        let expected = ManagementKeyCipher::encrypt_ecb(key_type, management_key, &challenge)?;
        check_challenge_response(&expected, &encrypted)?;
        info!("Management key authenticated");
        Ok(())
    }

    /// Replace the management key; requires prior authentication
    pub fn set_management_key(
        &mut self,
        key_type: ManagementKeyType,
        management_key: &[u8],
        require_touch: bool,
    ) -> Result<()> {
        if key_type != ManagementKeyType::Tdes {
            FEATURE_AES_KEY.require(self.version)?;
        }
        if management_key.len() != key_type.key_len() {
            return Err(Error::InvalidArgument(format!(
                "Management key must be {} bytes for {:?}",
                key_type.key_len(),
                key_type
            )));
        }
        let mut data = Zeroizing::new(vec![
            key_type.value(),
            key_ref::MGMT_KEY,
            management_key.len() as u8,
        ]);
        data.extend_from_slice(management_key);
        let p2 = if require_touch { 0xFE } else { 0xFF };
        self.send(ins::SET_MGMKEY, 0xFF, p2, data.to_vec())?;
        info!("Management key changed ({:?})", key_type);
        Ok(())
    }

    /// Verify the PIN
    pub fn verify_pin(&mut self, pin: &str) -> Result<()> {
        let data = pin_bytes(pin)?;
        match self.send(ins::VERIFY, 0, key_ref::PIN, data.to_vec()) {
            Ok(_) => {
                self.pin_attempts.reset();
                info!("PIN verified");
                Ok(())
            }
            Err(Error::Apdu { sw }) => {
                let remaining = pin_retries_from_sw(sw, self.version).ok_or(Error::Apdu { sw })?;
                self.pin_attempts.record(remaining);
                warn!("PIN verification failed, {} attempts remaining", remaining);
                Err(Error::InvalidPin {
                    attempts_remaining: remaining,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Remaining PIN attempts
    ///
    /// Without metadata support this probes with an empty VERIFY. When the
    /// PIN is already verified the device answers 9000 without revealing
    /// the counter, and the session's last known estimate is returned.
    pub fn get_pin_attempts(&mut self) -> Result<u8> {
        if FEATURE_METADATA.is_supported_by(self.version) {
            return Ok(self.get_pin_metadata()?.attempts_remaining);
        }
        match self.send(ins::VERIFY, 0, key_ref::PIN, Vec::new()) {
            Ok(_) => {
                debug!("PIN already verified, returning estimate");
                Ok(self.pin_attempts.current())
            }
            Err(Error::Apdu { sw }) => {
                let remaining = pin_retries_from_sw(sw, self.version).ok_or(Error::Apdu { sw })?;
                self.pin_attempts.record(remaining);
                Ok(remaining)
            }
            Err(e) => Err(e),
        }
    }

    /// Remaining PUK attempts, read from metadata
    pub fn get_puk_attempts(&mut self) -> Result<u8> {
        Ok(self.get_puk_metadata()?.attempts_remaining)
    }

    pub fn change_pin(&mut self, old_pin: &str, new_pin: &str) -> Result<()> {
        self.change_reference(ins::CHANGE_REFERENCE, key_ref::PIN, old_pin, new_pin)?;
        self.pin_attempts.reset();
        info!("PIN changed");
        Ok(())
    }

    pub fn change_puk(&mut self, old_puk: &str, new_puk: &str) -> Result<()> {
        self.change_reference(ins::CHANGE_REFERENCE, key_ref::PUK, old_puk, new_puk)?;
        info!("PUK changed");
        Ok(())
    }

    /// Set a new PIN using the PUK, unblocking a blocked PIN
    pub fn unblock_pin(&mut self, puk: &str, new_pin: &str) -> Result<()> {
        self.change_reference(ins::RESET_RETRY, key_ref::PIN, puk, new_pin)?;
        self.pin_attempts.reset();
        info!("PIN unblocked");
        Ok(())
    }

    /// Set the retry limits of PIN and PUK
    ///
    /// Requires management key authentication and a verified PIN. Both
    /// values are reset to their defaults by the device.
    pub fn set_pin_attempts(&mut self, pin_attempts: u8, puk_attempts: u8) -> Result<()> {
        if pin_attempts == 0 || puk_attempts == 0 {
            return Err(Error::InvalidArgument("Attempts must be at least 1".to_string()));
        }
        self.send(ins::SET_PIN_RETRIES, pin_attempts, puk_attempts, Vec::new())?;
        self.pin_attempts.configure(pin_attempts);
        info!("PIN attempts set to {}, PUK attempts set to {}", pin_attempts, puk_attempts);
        Ok(())
    }

    fn change_reference(&mut self, ins: u8, p2: u8, value1: &str, value2: &str) -> Result<()> {
        let mut data = pin_bytes(value1)?;
        data.extend_from_slice(&pin_bytes(value2)?);
        match self.send(ins, 0, p2, data.to_vec()) {
            Ok(_) => Ok(()),
            Err(Error::Apdu { sw }) => {
                let remaining = pin_retries_from_sw(sw, self.version).ok_or(Error::Apdu { sw })?;
                // RESET RETRY reports the PUK counter
                if ins == ins::CHANGE_REFERENCE && p2 == key_ref::PIN {
                    self.pin_attempts.record(remaining);
                }
                warn!("Reference data rejected, {} attempts remaining", remaining);
                Err(Error::InvalidPin {
                    attempts_remaining: remaining,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn get_metadata(&mut self, p2: u8) -> Result<BTreeMap<u32, Vec<u8>>> {
        FEATURE_METADATA.require(self.version)?;
        let response = self.send(ins::GET_METADATA, 0, p2, Vec::new())?;
        Ok(tlv::decode_map(&response)?)
    }

    fn get_pin_puk_metadata(&mut self, p2: u8) -> Result<PinMetadata> {
        let data = self.get_metadata(p2)?;
        let retries = metadata_field(&data, tag::METADATA_RETRIES, 2)?;
        Ok(PinMetadata {
            default_value: metadata_field(&data, tag::METADATA_IS_DEFAULT, 1)?[0] != 0,
            total_attempts: retries[0],
            attempts_remaining: retries[1],
        })
    }

    pub fn get_pin_metadata(&mut self) -> Result<PinMetadata> {
        self.get_pin_puk_metadata(key_ref::PIN)
    }

    pub fn get_puk_metadata(&mut self) -> Result<PinMetadata> {
        self.get_pin_puk_metadata(key_ref::PUK)
    }

    pub fn get_management_key_metadata(&mut self) -> Result<ManagementKeyMetadata> {
        let data = self.get_metadata(key_ref::MGMT_KEY)?;
        // Firmware without AES support omits the algorithm
        let key_type = match data.get(&tag::METADATA_ALGO) {
            Some(value) => value
                .first()
                .copied()
                .and_then(ManagementKeyType::from_byte)
                .ok_or_else(|| {
                    Error::BadResponse(format!("Unknown management key type {:02X?}", value))
                })?,
            None => ManagementKeyType::Tdes,
        };
        let policy = metadata_field(&data, tag::METADATA_POLICY, 2)?;
        Ok(ManagementKeyMetadata {
            key_type,
            default_value: metadata_field(&data, tag::METADATA_IS_DEFAULT, 1)?[0] != 0,
            touch_policy: touch_policy_from_byte(policy[1])?,
        })
    }

    pub fn get_slot_metadata(&mut self, slot: Slot) -> Result<SlotMetadata> {
        let data = self.get_metadata(slot.value())?;
        let algo = metadata_field(&data, tag::METADATA_ALGO, 1)?[0];
        let key_type = KeyType::from_byte(algo)
            .ok_or_else(|| Error::BadResponse(format!("Unknown key type {:02X}", algo)))?;
        let policy = metadata_field(&data, tag::METADATA_POLICY, 2)?;
        let pin_policy = PinPolicy::from_byte(policy[0])
            .ok_or_else(|| Error::BadResponse(format!("Unknown PIN policy {:02X}", policy[0])))?;
        Ok(SlotMetadata {
            key_type,
            pin_policy,
            touch_policy: touch_policy_from_byte(policy[1])?,
            generated: metadata_field(&data, tag::METADATA_ORIGIN, 1)?[0] == ORIGIN_GENERATED,
            public_key: PublicKeyValues::from_device(
                key_type,
                metadata_field(&data, tag::METADATA_PUBLIC_KEY, 0)?,
            )?,
        })
    }

    fn check_key_support(
        &self,
        key_type: KeyType,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
        generate: bool,
    ) -> Result<()> {
        if key_type == KeyType::EccP384 {
            FEATURE_P384.require(self.version)?;
        }
        if pin_policy != PinPolicy::Default || touch_policy != TouchPolicy::Default {
            FEATURE_USAGE_POLICY.require(self.version)?;
        }
        if touch_policy == TouchPolicy::Cached {
            FEATURE_TOUCH_CACHED.require(self.version)?;
        }
        if generate && key_type.algorithm() == KeyAlgorithm::Rsa {
            FEATURE_RSA_GENERATION.require(self.version)?;
        }
        Ok(())
    }

    fn policy_tlvs(
        builder: TLVBuilder,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> TLVBuilder {
        let mut builder = builder;
        if pin_policy != PinPolicy::Default {
            builder = builder.add(tag::PIN_POLICY, &[pin_policy.value()]);
        }
        if touch_policy != TouchPolicy::Default {
            builder = builder.add(tag::TOUCH_POLICY, &[touch_policy.value()]);
        }
        builder
    }

    /// Generate a key pair on the device and return its public key
    pub fn generate_key(
        &mut self,
        slot: Slot,
        key_type: KeyType,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> Result<PublicKeyValues> {
        self.check_key_support(key_type, pin_policy, touch_policy, true)?;
        let builder = TLVBuilder::new().add(tag::GEN_ALGORITHM, &[key_type.value()]);
        let data = Self::policy_tlvs(builder, pin_policy, touch_policy)
            .wrap(tag::GEN_TEMPLATE)
            .build();

        debug!("Generating {} key in slot {}", key_type, slot);
        let response = self.send(ins::GENERATE_ASYMMETRIC, 0, slot.value(), data)?;
        let encoded = tlv::unpack_value(tag::PUBLIC_KEY, &response)?;
        let public_key = PublicKeyValues::from_device(key_type, &encoded)?;
        info!("Generated {} key in slot {}", key_type, slot);
        Ok(public_key)
    }

    /// Import a private key
    pub fn put_key(
        &mut self,
        slot: Slot,
        private_key: &PrivateKeyValues,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> Result<KeyType> {
        let key_type = private_key.key_type()?;
        self.check_key_support(key_type, pin_policy, touch_policy, false)?;

        let mut builder = TLVBuilder::new();
        match private_key {
            PrivateKeyValues::Rsa(key) => {
                if key.e() != &BigUint::from(RSA_PUBLIC_EXPONENT) {
                    return Err(Error::InvalidArgument(format!(
                        "RSA public exponent must be {}",
                        RSA_PUBLIC_EXPONENT
                    )));
                }
                let crt = RsaOperations::crt_components(key)?;
                let length = key_type.bit_len() / 16;
                let components = [
                    (0x01, &crt.p),
                    (0x02, &crt.q),
                    (0x03, &crt.dp),
                    (0x04, &crt.dq),
                    (0x05, &crt.qinv),
                ];
                for (t, value) in components {
                    builder = builder.add(t, &pad_int(value, length)?);
                }
            }
            PrivateKeyValues::Ec { curve, secret } => {
                builder = builder.add(0x06, &pad_int(secret, curve.field_size())?);
            }
        }
        let data = Zeroizing::new(Self::policy_tlvs(builder, pin_policy, touch_policy).build());

        self.send(ins::IMPORT_KEY, key_type.value(), slot.value(), data.to_vec())?;
        info!("Imported {} key into slot {}", key_type, slot);
        Ok(key_type)
    }

    /// Sign `message`, hashing and padding it on the host
    ///
    /// RSA keys produce a PKCS#1 v1.5 signature; EC keys produce a DER
    /// encoded ECDSA signature.
    pub fn sign(
        &mut self,
        slot: Slot,
        key_type: KeyType,
        message: &[u8],
        hash: HashAlgorithm,
    ) -> Result<Vec<u8>> {
        let digest = HashOperations::hash(hash, message);
        let size = key_type.bit_len() / 8;
        let payload = match key_type.algorithm() {
            KeyAlgorithm::Rsa => {
                let mut digest_info = hash.digest_info_prefix().to_vec();
                digest_info.extend_from_slice(&digest);
                RsaOperations::pkcs1v15_sign_pad(&digest_info, size)?
            }
            KeyAlgorithm::Ec if digest.len() >= size => digest[..size].to_vec(),
            KeyAlgorithm::Ec => {
                let mut padded = vec![0u8; size - digest.len()];
                padded.extend_from_slice(&digest);
                padded
            }
        };
        self.raw_sign(slot, key_type, &payload)
    }

    /// Apply the private key to an already padded payload
    pub fn raw_sign(&mut self, slot: Slot, key_type: KeyType, payload: &[u8]) -> Result<Vec<u8>> {
        self.use_private_key(slot, key_type, payload, false)
    }

    /// Raw RSA decryption; the result still carries its padding
    pub fn decrypt(
        &mut self,
        slot: Slot,
        key_type: KeyType,
        cipher_text: &[u8],
    ) -> Result<Vec<u8>> {
        if key_type.algorithm() != KeyAlgorithm::Rsa {
            return Err(Error::InvalidArgument(format!("{} cannot decrypt", key_type)));
        }
        if cipher_text.len() != key_type.bit_len() / 8 {
            return Err(Error::InvalidArgument(format!(
                "Cipher text must be {} bytes for {}",
                key_type.bit_len() / 8,
                key_type
            )));
        }
        self.use_private_key(slot, key_type, cipher_text, false)
    }

    /// ECDH with the key in `slot`, returning the shared secret
    pub fn calculate_secret(
        &mut self,
        slot: Slot,
        key_type: KeyType,
        peer_point: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let curve = key_type
            .curve()
            .ok_or_else(|| Error::InvalidArgument(format!("{} cannot perform ECDH", key_type)))?;
        EccNistOperations::validate_point(curve, peer_point)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(Zeroizing::new(self.use_private_key(slot, key_type, peer_point, true)?))
    }

    fn use_private_key(
        &mut self,
        slot: Slot,
        key_type: KeyType,
        payload: &[u8],
        exponentiation: bool,
    ) -> Result<Vec<u8>> {
        let payload_tag = if exponentiation {
            tag::AUTH_EXPONENTIATION
        } else {
            tag::AUTH_CHALLENGE
        };
        let request = tlv::encode(
            tag::DYN_AUTH,
            &tlv::encode_list([(tag::AUTH_RESPONSE, &[][..]), (payload_tag, payload)]),
        );
        match self.send(ins::AUTHENTICATE, key_type.value(), slot.value(), request) {
            Ok(response) => Ok(tlv::unpack_value(
                tag::AUTH_RESPONSE,
                &tlv::unpack_value(tag::DYN_AUTH, &response)?,
            )?),
            Err(Error::Apdu { sw }) if sw == SW::WRONG_DATA => Err(Error::InvalidArgument(format!(
                "make sure that a {} key is present in slot {}",
                key_type, slot
            ))),
            Err(e) => Err(e),
        }
    }

    /// Read a data object
    pub fn get_object(&mut self, object_id: u32) -> Result<Vec<u8>> {
        let request = tlv::encode(tag::OBJ_ID, &object_id_bytes(object_id));
        let response = self.send(ins::GET_DATA, 0x3F, 0xFF, request)?;
        Ok(tlv::unpack_value(tag::OBJ_DATA, &response)?)
    }

    /// Write a data object, or delete it when `data` is `None`
    pub fn put_object(&mut self, object_id: u32, data: Option<&[u8]>) -> Result<()> {
        let request = tlv::encode_list([
            (tag::OBJ_ID, object_id_bytes(object_id).as_slice()),
            (tag::OBJ_DATA, data.unwrap_or_default()),
        ]);
        self.send(ins::PUT_DATA, 0x3F, 0xFF, request)?;
        debug!("Stored object {:06X}", object_id);
        Ok(())
    }

    /// Read the certificate stored for `slot`
    ///
    /// Compressed certificates are returned as stored.
    pub fn get_certificate(&mut self, slot: Slot) -> Result<Certificate> {
        let mut data = tlv::decode_map(&self.get_object(slot.object_id())?)?;
        let compressed = data
            .get(&tag::CERT_INFO)
            .map(|info| info.as_slice() == [0x01])
            .unwrap_or(false);
        let der = data.remove(&tag::CERTIFICATE).ok_or_else(|| {
            Error::BadResponse("Object does not contain a certificate".to_string())
        })?;
        Ok(Certificate { der, compressed })
    }

    pub fn put_certificate(&mut self, slot: Slot, der: &[u8], compressed: bool) -> Result<()> {
        let info = [u8::from(compressed)];
        let data = tlv::encode_list([
            (tag::CERTIFICATE, der),
            (tag::CERT_INFO, &info[..]),
            (tag::LRC, &[][..]),
        ]);
        self.put_object(slot.object_id(), Some(&data))?;
        info!("Certificate stored in slot {}", slot);
        Ok(())
    }

    pub fn delete_certificate(&mut self, slot: Slot) -> Result<()> {
        self.put_object(slot.object_id(), None)
    }

    /// Have the device attest a generated key, returning the DER certificate
    pub fn attest_key(&mut self, slot: Slot) -> Result<Vec<u8>> {
        FEATURE_ATTESTATION.require(self.version)?;
        self.send(ins::ATTEST, slot.value(), 0, Vec::new())
    }

    pub fn get_serial(&mut self) -> Result<u32> {
        FEATURE_SERIAL.require(self.version)?;
        let response = self.send(ins::GET_SERIAL, 0, 0, Vec::new())?;
        let bytes: [u8; 4] = response
            .as_slice()
            .try_into()
            .map_err(|_| Error::BadResponse(format!("Serial has length {}", response.len())))?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Factory reset the PIV application
    ///
    /// Deliberately exhausts the PIN and PUK retry counters with wrong
    /// values, since the device only accepts RESET once both are blocked.
    pub fn reset(&mut self) -> Result<()> {
        warn!("Resetting PIV application");
        self.block_pin()?;
        self.block_puk()?;
        self.send(ins::RESET, 0, 0, Vec::new())?;
        self.pin_attempts.configure(DEFAULT_PIN_ATTEMPTS);
        info!("PIV application reset");
        Ok(())
    }

    fn block_pin(&mut self) -> Result<()> {
        let mut counter = self.get_pin_attempts()?;
        while counter > 0 {
            match self.verify_pin("") {
                Err(Error::InvalidPin { attempts_remaining }) => counter = attempts_remaining,
                Err(e) => return Err(e),
                Ok(()) => {
                    return Err(Error::BadResponse(
                        "Device accepted an empty PIN".to_string(),
                    ))
                }
            }
        }
        debug!("PIN blocked");
        Ok(())
    }

    fn block_puk(&mut self) -> Result<()> {
        let mut counter = 1;
        while counter > 0 {
            match self.change_reference(ins::RESET_RETRY, key_ref::PIN, "", "") {
                Err(Error::InvalidPin { attempts_remaining }) => counter = attempts_remaining,
                Err(e) => return Err(e),
                Ok(()) => {
                    return Err(Error::BadResponse(
                        "Device accepted an empty PUK".to_string(),
                    ))
                }
            }
        }
        debug!("PUK blocked");
        Ok(())
    }
}

fn metadata_field(data: &BTreeMap<u32, Vec<u8>>, tag: u32, min_len: usize) -> Result<&[u8]> {
    match data.get(&tag) {
        Some(value) if value.len() >= min_len => Ok(value),
        _ => Err(Error::BadResponse(format!("Metadata is missing tag {:02X}", tag))),
    }
}

fn touch_policy_from_byte(value: u8) -> Result<TouchPolicy> {
    TouchPolicy::from_byte(value)
        .ok_or_else(|| Error::BadResponse(format!("Unknown touch policy {:02X}", value)))
}
