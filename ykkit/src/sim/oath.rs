//! Virtual OATH applet

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::apdu::{Response, APDU, SW};
use crate::crypto::{HashAlgorithm, HashOperations};
use crate::error::{Error, Result};
use crate::oath::credential::algorithm_from_byte;
use crate::oath::session::{
    ins, tag, FEATURE_RENAME, MASK_ALGO, MASK_TYPE, PROP_REQUIRE_TOUCH,
};
use crate::oath::OathType;
use crate::tlv;
use crate::version::Version;

pub(crate) use crate::oath::OATH_AID;
pub(crate) const INS_SEND_REMAINING: u8 = ins::SEND_REMAINING;

/// Parse a PUT request body; PROPERTY has no length byte
pub fn parse_put_request(data: &[u8]) -> Result<(BTreeMap<u32, Vec<u8>>, Option<u8>)> {
    let mut fields = BTreeMap::new();
    let mut property = None;
    let mut rest = data;
    while let Some(&first) = rest.first() {
        if u32::from(first) == tag::PROPERTY {
            let value = rest
                .get(1)
                .copied()
                .ok_or_else(|| Error::BadResponse("Truncated property".to_string()))?;
            property = Some(value);
            rest = &rest[2..];
            continue;
        }
        let (record, tail) = tlv::read_single(rest)?;
        fields.insert(record.tag, record.value);
        rest = tail;
    }
    Ok((fields, property))
}

struct StoredCredential {
    id: Vec<u8>,
    oath_type: OathType,
    algorithm: HashAlgorithm,
    digits: u8,
    secret: Vec<u8>,
    touch: bool,
    counter: u32,
}

impl StoredCredential {
    fn hmac(&self, challenge: &[u8]) -> Option<Vec<u8>> {
        HashOperations::hmac(self.algorithm, &self.secret, challenge).ok()
    }

    /// Dynamic truncation, RFC 4226 section 5.3
    fn truncate(&self, challenge: &[u8]) -> Option<Vec<u8>> {
        let digest = self.hmac(challenge)?;
        let offset = usize::from(digest[digest.len() - 1] & 0x0F);
        let mut value = vec![self.digits];
        value.extend_from_slice(&digest[offset..offset + 4]);
        value[1] &= 0x7F;
        Some(value)
    }
}

/// In-memory OATH application
pub struct VirtualOath {
    version: Version,
    salt: Vec<u8>,
    access_key: Option<Vec<u8>>,
    challenge: Option<Vec<u8>>,
    forge_validation: bool,
    credentials: Vec<StoredCredential>,
    rng: StdRng,
}

impl VirtualOath {
    pub fn new(version: Version) -> Self {
        let mut rng = StdRng::seed_from_u64(0x0A7B);
        let mut salt = vec![0u8; 8];
        rng.fill_bytes(&mut salt);
        Self {
            version,
            salt,
            access_key: None,
            challenge: None,
            forge_validation: false,
            credentials: Vec::new(),
            rng,
        }
    }

    pub fn salt(&self) -> Vec<u8> {
        self.salt.clone()
    }

    pub fn access_key(&self) -> Option<Vec<u8>> {
        self.access_key.clone()
    }

    /// Answer VALIDATE with a wrong device response
    pub fn forge_validation(&mut self, forge: bool) {
        self.forge_validation = forge;
    }

    pub fn counter(&self, id: &[u8]) -> Option<u32> {
        self.find(id).map(|credential| credential.counter)
    }

    fn find(&self, id: &[u8]) -> Option<&StoredCredential> {
        self.credentials.iter().find(|credential| credential.id == id)
    }

    fn locked(&self) -> bool {
        self.challenge.is_some()
    }

    pub(crate) fn select(&mut self) -> Response {
        self.challenge = self.access_key.as_ref().map(|_| {
            let mut challenge = vec![0u8; 8];
            self.rng.fill_bytes(&mut challenge);
            challenge
        });
        let mut builder = tlv::TLVBuilder::new()
            .add(tag::VERSION, &[self.version.major, self.version.minor, self.version.micro])
            .add(tag::NAME, &self.salt);
        if let Some(challenge) = &self.challenge {
            builder = builder
                .add(tag::CHALLENGE, challenge)
                .add(tag::ALGORITHM, &[0x01]);
        }
        Response::success(builder.build())
    }

    pub(crate) fn process(&mut self, cmd: &APDU) -> Response {
        debug!("OATH APDU: INS={:02X} P1={:02X} P2={:02X}", cmd.ins, cmd.p1, cmd.p2);
        if self.locked() && cmd.ins != ins::VALIDATE && cmd.ins != ins::RESET {
            return Response::error(SW::SECURITY_STATUS_NOT_SATISFIED);
        }
        match cmd.ins {
            ins::PUT => self.handle_put(cmd),
            ins::DELETE => self.handle_delete(cmd),
            ins::SET_CODE => self.handle_set_code(cmd),
            ins::RESET => self.handle_reset(cmd),
            ins::RENAME => self.handle_rename(cmd),
            ins::LIST => self.handle_list(),
            ins::CALCULATE => self.handle_calculate(cmd),
            ins::VALIDATE => self.handle_validate(cmd),
            ins::CALCULATE_ALL => self.handle_calculate_all(cmd),
            _ => {
                warn!("Unknown OATH instruction: {:02X}", cmd.ins);
                Response::error(SW::INS_NOT_SUPPORTED)
            }
        }
    }

    fn handle_put(&mut self, cmd: &APDU) -> Response {
        let Ok((fields, property)) = parse_put_request(&cmd.data) else {
            return Response::error(SW::WRONG_DATA);
        };
        let (Some(id), Some(key)) = (fields.get(&tag::NAME), fields.get(&tag::KEY)) else {
            return Response::error(SW::WRONG_DATA);
        };
        let [header, digits, secret @ ..] = key.as_slice() else {
            return Response::error(SW::WRONG_DATA);
        };
        let (Some(oath_type), Some(algorithm)) = (
            OathType::from_byte(header & MASK_TYPE),
            algorithm_from_byte(header & MASK_ALGO),
        ) else {
            return Response::error(SW::WRONG_DATA);
        };
        let counter = match fields.get(&tag::IMF).map(Vec::as_slice) {
            Some(&[a, b, c, d]) => u32::from_be_bytes([a, b, c, d]),
            Some(_) => return Response::error(SW::WRONG_DATA),
            None => 0,
        };

        self.credentials.retain(|credential| credential.id != *id);
        self.credentials.push(StoredCredential {
            id: id.clone(),
            oath_type,
            algorithm,
            digits: *digits,
            secret: secret.to_vec(),
            touch: property.is_some_and(|p| p & PROP_REQUIRE_TOUCH != 0),
            counter,
        });
        info!("OATH credential stored: {}", String::from_utf8_lossy(id));
        Response::ok()
    }

    fn handle_delete(&mut self, cmd: &APDU) -> Response {
        let Ok(id) = tlv::unpack_value(tag::NAME, &cmd.data) else {
            return Response::error(SW::WRONG_DATA);
        };
        let before = self.credentials.len();
        self.credentials.retain(|credential| credential.id != id);
        if self.credentials.len() == before {
            Response::error(SW::REFERENCE_DATA_NOT_USABLE)
        } else {
            Response::ok()
        }
    }

    fn handle_rename(&mut self, cmd: &APDU) -> Response {
        if !FEATURE_RENAME.is_supported_by(self.version) {
            return Response::error(SW::INS_NOT_SUPPORTED);
        }
        let Ok(records) = tlv::decode_list(&cmd.data) else {
            return Response::error(SW::WRONG_DATA);
        };
        let [old, new] = records.as_slice() else {
            return Response::error(SW::WRONG_DATA);
        };
        if self.find(&new.value).is_some() {
            return Response::error(SW::WRONG_DATA);
        }
        match self.credentials.iter_mut().find(|c| c.id == old.value) {
            Some(credential) => {
                credential.id = new.value.clone();
                Response::ok()
            }
            None => Response::error(SW::REFERENCE_DATA_NOT_USABLE),
        }
    }

    fn handle_list(&self) -> Response {
        let data = self
            .credentials
            .iter()
            .flat_map(|credential| {
                let algorithm = match credential.algorithm {
                    HashAlgorithm::Sha256 => 0x02,
                    HashAlgorithm::Sha512 => 0x03,
                    _ => 0x01,
                };
                let mut value = vec![credential.oath_type.value() | algorithm];
                value.extend_from_slice(&credential.id);
                tlv::encode(tag::NAME_LIST, &value)
            })
            .collect();
        Response::success(data)
    }

    fn handle_calculate(&mut self, cmd: &APDU) -> Response {
        let Ok(params) = tlv::decode_map(&cmd.data) else {
            return Response::error(SW::WRONG_DATA);
        };
        let (Some(id), Some(challenge)) = (params.get(&tag::NAME), params.get(&tag::CHALLENGE))
        else {
            return Response::error(SW::WRONG_DATA);
        };
        let Some(credential) = self.credentials.iter_mut().find(|c| c.id == *id) else {
            return Response::error(SW::REFERENCE_DATA_NOT_USABLE);
        };
        let challenge = match credential.oath_type {
            OathType::Hotp => {
                let moving = u64::from(credential.counter).to_be_bytes().to_vec();
                credential.counter += 1;
                moving
            }
            OathType::Totp => challenge.clone(),
        };

        let reply = if cmd.p2 == 0x01 {
            credential
                .truncate(&challenge)
                .map(|value| tlv::encode(tag::TRUNCATED, &value))
        } else {
            credential.hmac(&challenge).map(|digest| {
                let mut value = vec![credential.digits];
                value.extend_from_slice(&digest);
                tlv::encode(tag::RESPONSE, &value)
            })
        };
        match reply {
            Some(data) => Response::success(data),
            None => Response::error(SW::WRONG_DATA),
        }
    }

    fn handle_calculate_all(&self, cmd: &APDU) -> Response {
        let Ok(challenge) = tlv::unpack_value(tag::CHALLENGE, &cmd.data) else {
            return Response::error(SW::WRONG_DATA);
        };
        let mut data = Vec::new();
        for credential in &self.credentials {
            data.extend_from_slice(&tlv::encode(tag::NAME, &credential.id));
            let record = if credential.oath_type == OathType::Hotp {
                tlv::encode(tag::HOTP, &[credential.digits])
            } else if credential.touch {
                tlv::encode(tag::TOUCH, &[credential.digits])
            } else {
                match credential.truncate(&challenge) {
                    Some(value) => tlv::encode(tag::TRUNCATED, &value),
                    None => return Response::error(SW::WRONG_DATA),
                }
            };
            data.extend_from_slice(&record);
        }
        Response::success(data)
    }

    fn handle_set_code(&mut self, cmd: &APDU) -> Response {
        let Ok(params) = tlv::decode_map(&cmd.data) else {
            return Response::error(SW::WRONG_DATA);
        };
        let Some(key) = params.get(&tag::KEY) else {
            return Response::error(SW::WRONG_DATA);
        };
        let Some((_, key)) = key.split_first() else {
            self.access_key = None;
            info!("OATH access key removed");
            return Response::ok();
        };
        let challenge = params.get(&tag::CHALLENGE);
        let response = params.get(&tag::RESPONSE);
        let (Some(challenge), Some(response)) = (challenge, response) else {
            return Response::error(SW::WRONG_DATA);
        };
        match HashOperations::hmac(HashAlgorithm::Sha1, key, challenge) {
            Ok(expected) if expected == *response => {
                self.access_key = Some(key.to_vec());
                info!("OATH access key set");
                Response::ok()
            }
            _ => Response::error(SW::WRONG_DATA),
        }
    }

    fn handle_validate(&mut self, cmd: &APDU) -> Response {
        let (Some(key), Some(pending)) = (self.access_key.clone(), self.challenge.clone()) else {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED);
        };
        let Ok(params) = tlv::decode_map(&cmd.data) else {
            return Response::error(SW::WRONG_DATA);
        };
        let response = params.get(&tag::RESPONSE);
        let challenge = params.get(&tag::CHALLENGE);
        let (Some(response), Some(challenge)) = (response, challenge) else {
            return Response::error(SW::WRONG_DATA);
        };
        let (Ok(expected), Ok(mut proof)) = (
            HashOperations::hmac(HashAlgorithm::Sha1, &key, &pending),
            HashOperations::hmac(HashAlgorithm::Sha1, &key, challenge),
        ) else {
            return Response::error(SW::WRONG_DATA);
        };
        if expected != *response {
            warn!("OATH validation failed");
            return Response::error(SW::WRONG_DATA);
        }
        if self.forge_validation {
            proof[0] ^= 0xFF;
        }
        self.challenge = None;
        Response::success(tlv::encode(tag::RESPONSE, &proof))
    }

    fn handle_reset(&mut self, cmd: &APDU) -> Response {
        if cmd.p1 != 0xDE || cmd.p2 != 0xAD {
            return Response::error(SW::INCORRECT_P1_P2);
        }
        self.credentials.clear();
        self.access_key = None;
        self.challenge = None;
        self.rng.fill_bytes(&mut self.salt);
        info!("OATH application reset");
        Response::ok()
    }
}
