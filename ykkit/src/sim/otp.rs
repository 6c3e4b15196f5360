//! Virtual OTP applet

use log::{debug, info, warn};

use crate::apdu::{Response, APDU, SW};
use crate::crypto::{HashAlgorithm, HashOperations};
use crate::otp::config::{
    cfg_flag, tkt_flag, ACC_CODE_SIZE, ACC_OFFSET, CFG_OFFSET, CONFIG_SIZE, CRC_OFFSET, EXT_OFFSET,
    HMAC_CHALLENGE_SIZE, KEY_OFFSET, KEY_SIZE, TKT_OFFSET, UID_OFFSET, X25,
};
use crate::otp::session::{cmd, INS_CONFIG};
use crate::otp::Slot;
use crate::version::Version;

pub(crate) use crate::otp::OTP_AID;

/// Fields of a written configuration block
pub struct BlockView<'a>(pub &'a [u8]);

impl<'a> BlockView<'a> {
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn crc_valid(&self) -> bool {
        self.0.len() == CONFIG_SIZE
            && X25.checksum(&self.0[..CRC_OFFSET]).to_le_bytes() == self.0[CRC_OFFSET..]
    }

    pub fn acc_code(&self) -> &'a [u8] {
        &self.0[ACC_OFFSET..ACC_OFFSET + ACC_CODE_SIZE]
    }

    pub fn hmac_key(&self) -> Vec<u8> {
        let mut key = self.0[KEY_OFFSET..KEY_OFFSET + KEY_SIZE].to_vec();
        key.extend_from_slice(&self.0[UID_OFFSET..UID_OFFSET + 4]);
        key
    }

    pub fn imf(&self) -> u32 {
        u32::from(u16::from_be_bytes([self.0[UID_OFFSET + 4], self.0[UID_OFFSET + 5]])) << 4
    }

    pub fn flags(&self) -> (u8, u8, u8) {
        (self.0[EXT_OFFSET], self.0[TKT_OFFSET], self.0[CFG_OFFSET])
    }
}

/// In-memory OTP application
pub struct VirtualOtp {
    version: Version,
    prog_seq: u8,
    slots: [Option<Vec<u8>>; 2],
}

fn index(slot: Slot) -> usize {
    match slot {
        Slot::One => 0,
        Slot::Two => 1,
    }
}

impl VirtualOtp {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            prog_seq: 0,
            slots: [None, None],
        }
    }

    pub fn prog_seq(&self) -> u8 {
        self.prog_seq
    }

    /// Configuration block stored in `slot`
    pub fn block(&self, slot: Slot) -> Option<Vec<u8>> {
        self.slots[index(slot)].clone()
    }

    fn status(&self) -> Response {
        let mut touch_level = 0u16;
        for (i, block) in self.slots.iter().enumerate() {
            let Some(block) = block else { continue };
            touch_level |= 0x01 << i;
            let (_, tkt, cfg) = BlockView(block).flags();
            let challenge_response =
                tkt & tkt_flag::CHAL_RESP != 0 && cfg & cfg_flag::CHAL_HMAC == cfg_flag::CHAL_HMAC;
            if !challenge_response || cfg & cfg_flag::CHAL_BTN_TRIG != 0 {
                touch_level |= 0x04 << i;
            }
        }
        let [touch_lo, touch_hi] = touch_level.to_le_bytes();
        Response::success(vec![
            self.version.major,
            self.version.minor,
            self.version.micro,
            self.prog_seq,
            touch_lo,
            touch_hi,
        ])
    }

    pub(crate) fn select(&mut self) -> Response {
        self.status()
    }

    pub(crate) fn process(&mut self, apdu: &APDU) -> Response {
        debug!("OTP APDU: INS={:02X} P1={:02X}", apdu.ins, apdu.p1);
        if apdu.ins != INS_CONFIG {
            warn!("Unknown OTP instruction: {:02X}", apdu.ins);
            return Response::error(SW::INS_NOT_SUPPORTED);
        }
        match apdu.p1 {
            cmd::CONFIG_1 => self.handle_config(Slot::One, &apdu.data),
            cmd::CONFIG_2 => self.handle_config(Slot::Two, &apdu.data),
            cmd::SWAP => {
                self.slots.swap(0, 1);
                self.prog_seq = self.prog_seq.wrapping_add(1);
                self.status()
            }
            cmd::HMAC_1 => self.handle_hmac(Slot::One, &apdu.data),
            cmd::HMAC_2 => self.handle_hmac(Slot::Two, &apdu.data),
            cmd::DEVICE_SERIAL => Response::success(super::SERIAL.to_be_bytes().to_vec()),
            _ => Response::error(SW::INCORRECT_P1_P2),
        }
    }

    /// A rejected write leaves the sequence untouched and still answers 9000
    fn handle_config(&mut self, slot: Slot, data: &[u8]) -> Response {
        if data.len() != CONFIG_SIZE + ACC_CODE_SIZE {
            return Response::error(SW::WRONG_LENGTH);
        }
        let (block, cur_acc_code) = data.split_at(CONFIG_SIZE);
        if let Some(existing) = &self.slots[index(slot)] {
            let acc_code = BlockView(existing).acc_code();
            if acc_code.iter().any(|&b| b != 0) && acc_code != cur_acc_code {
                warn!("OTP slot {:?} access code mismatch", slot);
                return self.status();
            }
        }

        let view = BlockView(block);
        if view.is_empty() {
            self.slots[index(slot)] = None;
        } else if view.crc_valid() {
            self.slots[index(slot)] = Some(block.to_vec());
        } else {
            warn!("OTP configuration with bad checksum");
            return self.status();
        }

        self.prog_seq = if self.slots.iter().all(Option::is_none) {
            0
        } else {
            self.prog_seq.wrapping_add(1)
        };
        info!("OTP slot {:?} written, sequence {}", slot, self.prog_seq);
        self.status()
    }

    fn handle_hmac(&self, slot: Slot, challenge: &[u8]) -> Response {
        let Some(block) = &self.slots[index(slot)] else {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED);
        };
        let view = BlockView(block);
        let (_, _, cfg) = view.flags();
        if cfg & cfg_flag::CHAL_HMAC != cfg_flag::CHAL_HMAC
            || challenge.len() != HMAC_CHALLENGE_SIZE
        {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED);
        }

        let mut message = challenge;
        if cfg & cfg_flag::HMAC_LT64 != 0 {
            if let Some(&last) = challenge.last() {
                let end = challenge.iter().rposition(|&b| b != last).map_or(0, |i| i + 1);
                message = &challenge[..end];
            }
        }
        match HashOperations::hmac(HashAlgorithm::Sha1, &view.hmac_key(), message) {
            Ok(hmac) => Response::success(hmac),
            Err(_) => Response::error(SW::WRONG_DATA),
        }
    }
}
