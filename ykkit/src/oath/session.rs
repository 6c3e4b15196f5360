//! YKOATH session
//!
//! Access key handshake, credential management and TOTP/HOTP code
//! calculation against the OATH application.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use log::{debug, info, warn};
use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::credential::{algorithm_value, Code, Credential, CredentialData, OathType};
use super::credential_id::{format_id, parse_id, DEFAULT_PERIOD};
use crate::apdu::{APDU, SW};
use crate::crypto::{HashAlgorithm, HashOperations};
use crate::error::{Error, Result};
use crate::tlv::{self, TLVBuilder, TLV};
use crate::transport::{SmartCardConnection, SmartCardProtocol};
use crate::version::{Feature, Version};

/// OATH Application Identifier
pub const OATH_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x05, 0x27, 0x21, 0x01];

pub mod tag {
    pub const NAME: u32 = 0x71;
    pub const NAME_LIST: u32 = 0x72;
    pub const KEY: u32 = 0x73;
    pub const CHALLENGE: u32 = 0x74;
    pub const RESPONSE: u32 = 0x75;
    pub const TRUNCATED: u32 = 0x76;
    pub const HOTP: u32 = 0x77;
    pub const PROPERTY: u32 = 0x78;
    pub const VERSION: u32 = 0x79;
    pub const IMF: u32 = 0x7A;
    pub const ALGORITHM: u32 = 0x7B;
    pub const TOUCH: u32 = 0x7C;
}

pub mod ins {
    pub const PUT: u8 = 0x01;
    pub const DELETE: u8 = 0x02;
    pub const SET_CODE: u8 = 0x03;
    pub const RESET: u8 = 0x04;
    pub const RENAME: u8 = 0x05;
    pub const LIST: u8 = 0xA1;
    pub const CALCULATE: u8 = 0xA2;
    pub const VALIDATE: u8 = 0xA3;
    pub const CALCULATE_ALL: u8 = 0xA4;
    pub const SEND_REMAINING: u8 = 0xA5;
}

/// PROPERTY is sent as a bare tag-value pair, without a length byte
pub const PROP_REQUIRE_TOUCH: u8 = 0x02;
pub const MASK_TYPE: u8 = 0xF0;
pub const MASK_ALGO: u8 = 0x0F;

pub const MAX_ID_LENGTH: usize = 64;
pub const MIN_SECRET_LENGTH: usize = 14;
const ACCESS_KEY_LENGTH: usize = 16;
const ACCESS_KEY_ROUNDS: u32 = 1000;
const CHALLENGE_LENGTH: usize = 8;

pub const FEATURE_TOUCH: Feature = Feature::at_least("Touch", 4, 2, 0);
pub const FEATURE_SHA512: Feature = Feature::at_least("SHA-512", 4, 3, 1);
pub const FEATURE_RENAME: Feature = Feature::at_least("Rename Credential", 5, 3, 1);

/// Render a truncated response as a code of `digits` characters
///
/// The whole value is rendered in decimal and cut to its last `digits` digits.
pub fn format_code(digits: u8, truncated: u32) -> Result<String> {
    if digits == 0 || digits > 10 {
        return Err(Error::BadResponse(format!("Invalid number of digits: {}", digits)));
    }
    let value = u64::from(truncated) % 10u64.pow(u32::from(digits));
    Ok(format!("{:0width$}", value, width = usize::from(digits)))
}

fn parse_truncated(response: &[u8]) -> Result<String> {
    match response {
        [digits, a, b, c, d] => format_code(*digits, u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(Error::BadResponse(format!(
            "Truncated response has length {}",
            response.len()
        ))),
    }
}

fn time_challenge(timestamp_ms: i64, period: u32) -> [u8; 8] {
    let steps = timestamp_ms.div_euclid(1000) / i64::from(period.max(1));
    (steps as u64).to_be_bytes()
}

/// Shorten keys longer than the hash block size and pad to the minimum length
fn hmac_shorten_key(secret: &[u8], algorithm: HashAlgorithm) -> Zeroizing<Vec<u8>> {
    let mut key = if secret.len() > algorithm.block_size() {
        Zeroizing::new(HashOperations::hash(algorithm, secret))
    } else {
        Zeroizing::new(secret.to_vec())
    };
    if key.len() < MIN_SECRET_LENGTH {
        key.resize(MIN_SECRET_LENGTH, 0);
    }
    key
}

fn device_id_from_salt(salt: &[u8]) -> String {
    let digest = HashOperations::hash(HashAlgorithm::Sha256, salt);
    STANDARD_NO_PAD.encode(&digest[..16])
}

/// State taken from the SELECT reply
struct SelectInfo {
    version: Version,
    salt: Vec<u8>,
    challenge: Option<Vec<u8>>,
}

impl SelectInfo {
    fn parse(response: &[u8]) -> Result<Self> {
        let mut data = tlv::decode_map(response)?;
        let version = Version::from_bytes(
            data.get(&tag::VERSION)
                .ok_or_else(|| Error::BadResponse("SELECT reply has no version".to_string()))?,
        )?;
        let salt = data
            .remove(&tag::NAME)
            .ok_or_else(|| Error::BadResponse("SELECT reply has no salt".to_string()))?;
        Ok(Self {
            version,
            salt,
            challenge: data.remove(&tag::CHALLENGE),
        })
    }
}

/// An open OATH session
pub struct OathSession<C: SmartCardConnection> {
    protocol: SmartCardProtocol<C>,
    version: Version,
    salt: Vec<u8>,
    device_id: String,
    has_access_key: bool,
    challenge: Option<Vec<u8>>,
}

impl<C: SmartCardConnection> OathSession<C> {
    /// Select the OATH application
    pub fn open(connection: C) -> Result<Self> {
        let mut protocol = SmartCardProtocol::with_send_remaining(connection, ins::SEND_REMAINING);
        let info = SelectInfo::parse(&protocol.select(OATH_AID)?)?;
        protocol.configure(info.version);
        let mut session = Self {
            protocol,
            version: info.version,
            salt: Vec::new(),
            device_id: String::new(),
            has_access_key: false,
            challenge: None,
        };
        session.apply(info);
        info!(
            "OATH session opened, firmware {}, device {}",
            session.version, session.device_id
        );
        Ok(session)
    }

    fn apply(&mut self, info: SelectInfo) {
        self.version = info.version;
        self.device_id = device_id_from_salt(&info.salt);
        self.salt = info.salt;
        self.has_access_key = info.challenge.is_some();
        self.challenge = info.challenge;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Stable identifier of the application instance, changes on reset
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn has_access_key(&self) -> bool {
        self.has_access_key
    }

    /// An access key is set and has not been presented yet
    pub fn is_locked(&self) -> bool {
        self.challenge.is_some()
    }

    pub fn close(self) -> Result<()> {
        self.protocol.close()
    }

    fn send(&mut self, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Vec<u8>> {
        self.protocol.send_and_receive(&APDU::with_data(0, ins, p1, p2, data))
    }

    /// Derive the access key for `password` with this device's salt
    pub fn derive_access_key(&self, password: &str) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(HashOperations::pbkdf2_sha1(
            password.as_bytes(),
            &self.salt,
            ACCESS_KEY_ROUNDS,
            ACCESS_KEY_LENGTH,
        ))
    }

    /// Present the access key
    ///
    /// Returns `Ok(false)` when the key is wrong; only transport and
    /// protocol failures are errors. Without a pending challenge there is
    /// nothing to prove and no command is sent.
    pub fn unlock<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        access_key: &[u8],
    ) -> Result<bool> {
        let Some(challenge) = self.challenge.clone() else {
            return Ok(true);
        };
        let response = HashOperations::hmac(HashAlgorithm::Sha1, access_key, &challenge)?;
        let mut client_challenge = [0u8; CHALLENGE_LENGTH];
        rng.fill_bytes(&mut client_challenge);

        let data = tlv::encode_list([
            (tag::RESPONSE, response.as_slice()),
            (tag::CHALLENGE, &client_challenge[..]),
        ]);
        let reply = match self.send(ins::VALIDATE, 0, 0, data) {
            Ok(reply) => reply,
            Err(Error::Apdu { sw })
                if sw == SW::WRONG_DATA || sw == SW::REFERENCE_DATA_NOT_USABLE =>
            {
                warn!("Access key rejected by device");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let device_response = tlv::unpack_value(tag::RESPONSE, &reply)?;
        let expected = HashOperations::hmac(HashAlgorithm::Sha1, access_key, &client_challenge)?;
        if bool::from(expected.ct_eq(&device_response)) {
            self.challenge = None;
            info!("OATH application unlocked");
            Ok(true)
        } else {
            warn!("Device response to the access key challenge is incorrect");
            Ok(false)
        }
    }

    pub fn unlock_with_password<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        password: &str,
    ) -> Result<bool> {
        if self.challenge.is_none() {
            return Ok(true);
        }
        let key = self.derive_access_key(password);
        self.unlock(rng, &key)
    }

    /// Protect the application with an access key
    pub fn set_access_key<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        access_key: &[u8],
    ) -> Result<()> {
        if access_key.is_empty() {
            return Err(Error::InvalidArgument("Access key must not be empty".to_string()));
        }
        let mut challenge = [0u8; CHALLENGE_LENGTH];
        rng.fill_bytes(&mut challenge);
        let response = HashOperations::hmac(HashAlgorithm::Sha1, access_key, &challenge)?;

        let header = OathType::Totp.value() | algorithm_value(HashAlgorithm::Sha1)?;
        let mut key = Zeroizing::new(vec![header]);
        key.extend_from_slice(access_key);
        let data = Zeroizing::new(tlv::encode_list([
            (tag::KEY, key.as_slice()),
            (tag::CHALLENGE, &challenge[..]),
            (tag::RESPONSE, response.as_slice()),
        ]));
        self.send(ins::SET_CODE, 0, 0, data.to_vec())?;
        self.has_access_key = true;
        self.challenge = None;
        info!("OATH access key set");
        Ok(())
    }

    pub fn set_password<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        password: &str,
    ) -> Result<()> {
        let key = self.derive_access_key(password);
        self.set_access_key(rng, &key)
    }

    /// Remove the access key
    pub fn delete_access_key(&mut self) -> Result<()> {
        self.send(ins::SET_CODE, 0, 0, tlv::encode(tag::KEY, &[]))?;
        self.has_access_key = false;
        self.challenge = None;
        info!("OATH access key removed");
        Ok(())
    }

    /// List the stored credentials
    ///
    /// The listing does not report touch requirements.
    pub fn get_credentials(&mut self) -> Result<Vec<Credential>> {
        let response = self.send(ins::LIST, 0, 0, Vec::new())?;
        tlv::decode_list(&response)?
            .into_iter()
            .filter(|record| record.tag == tag::NAME_LIST)
            .map(|record| {
                let (&header, id) = record
                    .value
                    .split_first()
                    .ok_or_else(|| Error::BadResponse("Empty credential entry".to_string()))?;
                Ok(self.credential(id.to_vec(), oath_type_from_header(header)?, None))
            })
            .collect()
    }

    fn credential(
        &self,
        id: Vec<u8>,
        oath_type: OathType,
        touch_required: Option<bool>,
    ) -> Credential {
        let parsed = parse_id(&id, oath_type);
        Credential {
            device_id: self.device_id.clone(),
            id,
            oath_type,
            issuer: parsed.issuer,
            account_name: parsed.account_name,
            period: parsed.period,
            touch_required,
        }
    }

    /// Calculate codes for every TOTP credential in one round trip
    ///
    /// HOTP and touch-required credentials map to `None`. Credentials with a
    /// period other than 30 seconds are recalculated individually.
    pub fn calculate_codes(
        &mut self,
        timestamp_ms: i64,
    ) -> Result<HashMap<Credential, Option<Code>>> {
        let challenge = time_challenge(timestamp_ms, DEFAULT_PERIOD);
        let response = self.send(
            ins::CALCULATE_ALL,
            0,
            0x01,
            tlv::encode(tag::CHALLENGE, &challenge),
        )?;

        let records = tlv::decode_list(&response)?;
        if records.len() % 2 != 0 {
            return Err(Error::BadResponse(
                "Odd number of records in CALCULATE ALL reply".to_string(),
            ));
        }
        let mut codes = HashMap::with_capacity(records.len() / 2);
        let mut recalculate = Vec::new();
        for pair in records.chunks(2) {
            let [TLV { tag: name_tag, value: id }, TLV { tag: kind, value }] = pair else {
                continue;
            };
            if *name_tag != tag::NAME {
                return Err(Error::BadResponse(format!("Expected name, got tag {:02X}", name_tag)));
            }
            let oath_type = if *kind == tag::HOTP { OathType::Hotp } else { OathType::Totp };
            let credential = self.credential(id.clone(), oath_type, Some(*kind == tag::TOUCH));

            let code = match (*kind, credential.period) {
                (tag::TRUNCATED, Some(DEFAULT_PERIOD)) => {
                    Some(Code::totp(parse_truncated(value)?, timestamp_ms, DEFAULT_PERIOD))
                }
                (tag::TRUNCATED, _) => {
                    recalculate.push(credential.clone());
                    None
                }
                (tag::HOTP | tag::TOUCH, _) => None,
                (other, _) => {
                    return Err(Error::BadResponse(format!("Unexpected response tag {:02X}", other)))
                }
            };
            codes.insert(credential, code);
        }

        for credential in recalculate {
            debug!(
                "Recalculating {:?} with period {:?}",
                credential.account_name, credential.period
            );
            let code = self.calculate_code(&credential, timestamp_ms)?;
            codes.insert(credential, Some(code));
        }
        Ok(codes)
    }

    /// Calculate the code of a single credential
    ///
    /// For HOTP this advances the counter on the device.
    pub fn calculate_code(&mut self, credential: &Credential, timestamp_ms: i64) -> Result<Code> {
        if credential.device_id != self.device_id {
            return Err(Error::InvalidArgument(
                "Credential belongs to a different device".to_string(),
            ));
        }
        let period = credential.period.unwrap_or(DEFAULT_PERIOD);
        let challenge = match credential.oath_type {
            OathType::Totp => time_challenge(timestamp_ms, period).to_vec(),
            OathType::Hotp => Vec::new(),
        };
        let data = tlv::encode_list([
            (tag::NAME, credential.id.as_slice()),
            (tag::CHALLENGE, challenge.as_slice()),
        ]);
        let response = self.send(ins::CALCULATE, 0, 0x01, data)?;
        let value = parse_truncated(&tlv::unpack_value(tag::TRUNCATED, &response)?)?;

        Ok(match credential.oath_type {
            OathType::Totp => Code::totp(value, timestamp_ms, period),
            OathType::Hotp => Code::hotp(value, timestamp_ms),
        })
    }

    /// Full HMAC of `challenge` with the credential's secret
    pub fn calculate_response(
        &mut self,
        credential_id: &[u8],
        challenge: &[u8],
    ) -> Result<Vec<u8>> {
        let data = tlv::encode_list([(tag::NAME, credential_id), (tag::CHALLENGE, challenge)]);
        let response = tlv::unpack_value(tag::RESPONSE, &self.send(ins::CALCULATE, 0, 0, data)?)?;
        match response.split_first() {
            Some((_digits, hmac)) => Ok(hmac.to_vec()),
            None => Err(Error::BadResponse("Empty calculate response".to_string())),
        }
    }

    /// Store a credential, replacing one with the same id
    pub fn put_credential(
        &mut self,
        data: &CredentialData,
        require_touch: bool,
    ) -> Result<Credential> {
        if require_touch {
            FEATURE_TOUCH.require(self.version)?;
        }
        if data.hash_algorithm == HashAlgorithm::Sha512 {
            FEATURE_SHA512.require(self.version)?;
        }
        let algorithm = algorithm_value(data.hash_algorithm)?;
        if !(6..=8).contains(&data.digits) {
            return Err(Error::InvalidArgument(format!(
                "Digits must be 6, 7 or 8, got {}",
                data.digits
            )));
        }
        if data.oath_type == OathType::Totp && data.period == 0 {
            return Err(Error::InvalidArgument("Period must be positive".to_string()));
        }
        let id = data.id();
        if id.len() > MAX_ID_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "Credential id must be at most {} bytes, got {}",
                MAX_ID_LENGTH,
                id.len()
            )));
        }

        let secret = hmac_shorten_key(&data.secret, data.hash_algorithm);
        let mut key = Zeroizing::new(vec![data.oath_type.value() | algorithm, data.digits]);
        key.extend_from_slice(&secret);

        let mut builder = TLVBuilder::new().add(tag::NAME, &id).add(tag::KEY, &key);
        if require_touch {
            builder = builder.add_raw(&[tag::PROPERTY as u8, PROP_REQUIRE_TOUCH]);
        }
        if data.oath_type == OathType::Hotp && data.counter > 0 {
            builder = builder.add(tag::IMF, &data.counter.to_be_bytes());
        }
        let request = Zeroizing::new(builder.build());
        self.send(ins::PUT, 0, 0, request.to_vec())?;
        info!("Stored credential {:?}", data.name);

        Ok(Credential {
            device_id: self.device_id.clone(),
            id,
            oath_type: data.oath_type,
            issuer: data.issuer.clone(),
            account_name: data.name.clone(),
            period: match data.oath_type {
                OathType::Totp => Some(data.period),
                OathType::Hotp => None,
            },
            touch_required: Some(require_touch),
        })
    }

    pub fn delete_credential(&mut self, credential_id: &[u8]) -> Result<()> {
        self.send(ins::DELETE, 0, 0, tlv::encode(tag::NAME, credential_id))?;
        info!("Deleted credential {}", String::from_utf8_lossy(credential_id));
        Ok(())
    }

    /// Change issuer and account name; the id changes accordingly
    pub fn rename_credential(
        &mut self,
        credential: &Credential,
        account_name: &str,
        issuer: Option<&str>,
    ) -> Result<Credential> {
        FEATURE_RENAME.require(self.version)?;
        let new_id = format_id(
            issuer,
            account_name,
            credential.oath_type,
            credential.period.unwrap_or(DEFAULT_PERIOD),
        );
        if new_id.len() > MAX_ID_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "Credential id must be at most {} bytes, got {}",
                MAX_ID_LENGTH,
                new_id.len()
            )));
        }
        let data = tlv::encode_list([
            (tag::NAME, credential.id.as_slice()),
            (tag::NAME, new_id.as_slice()),
        ]);
        self.send(ins::RENAME, 0, 0, data)?;
        info!("Renamed credential to {}", String::from_utf8_lossy(&new_id));
        Ok(Credential {
            id: new_id,
            issuer: issuer.filter(|i| !i.is_empty()).map(str::to_string),
            account_name: account_name.to_string(),
            ..credential.clone()
        })
    }

    /// Erase every credential and the access key
    ///
    /// The device picks a new salt, so the device id changes.
    pub fn reset(&mut self) -> Result<()> {
        warn!("Resetting OATH application");
        self.send(ins::RESET, 0xDE, 0xAD, Vec::new())?;
        let info = SelectInfo::parse(&self.protocol.select(OATH_AID)?)?;
        self.apply(info);
        info!("OATH application reset, device {}", self.device_id);
        Ok(())
    }
}

fn oath_type_from_header(header: u8) -> Result<OathType> {
    OathType::from_byte(header & MASK_TYPE)
        .ok_or_else(|| Error::BadResponse(format!("Unknown OATH type {:02X}", header)))
}
