//! YubiOTP session
//!
//! Programs the two OTP slots and runs HMAC-SHA1 challenge-response. Every
//! configuration write returns fresh status bytes; the programming sequence
//! in them tells whether the device applied the write.

use log::{debug, info, warn};

use super::config::{
    pad_challenge, write_payload, AccessCode, SlotConfiguration, CONFIG_SIZE, FEATURE_HMAC,
    HMAC_RESPONSE_SIZE,
};
use super::state::{ConfigurationState, Slot, Status};
use crate::apdu::APDU;
use crate::error::{Error, Result};
use crate::transport::{SmartCardConnection, SmartCardProtocol};
use crate::version::{Feature, Version};

/// OTP Application Identifier
pub const OTP_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x05, 0x27, 0x20, 0x01];

/// Every OTP command is this instruction, with the slot command in P1
pub const INS_CONFIG: u8 = 0x01;

pub mod cmd {
    pub const CONFIG_1: u8 = 0x01;
    pub const CONFIG_2: u8 = 0x03;
    pub const SWAP: u8 = 0x06;
    pub const DEVICE_SERIAL: u8 = 0x10;
    pub const HMAC_1: u8 = 0x30;
    pub const HMAC_2: u8 = 0x38;
}

pub const FEATURE_SWAP: Feature = Feature::at_least("Swap slots", 2, 3, 0);
pub const FEATURE_SERIAL: Feature = Feature::at_least("Serial number", 2, 2, 0);

const PROG_SEQ_MASK: u16 = 0x1F;

impl Slot {
    pub const fn config_cmd(self) -> u8 {
        match self {
            Slot::One => cmd::CONFIG_1,
            Slot::Two => cmd::CONFIG_2,
        }
    }

    pub const fn hmac_cmd(self) -> u8 {
        match self {
            Slot::One => cmd::HMAC_1,
            Slot::Two => cmd::HMAC_2,
        }
    }
}

/// An open OTP session
pub struct OtpSession<C: SmartCardConnection> {
    protocol: SmartCardProtocol<C>,
    status: Status,
}

impl<C: SmartCardConnection> OtpSession<C> {
    /// Select the OTP application and read its status
    pub fn open(connection: C) -> Result<Self> {
        let mut protocol = SmartCardProtocol::new(connection);
        let status = Status::parse(&protocol.select(OTP_AID)?)?;
        protocol.configure(status.version);
        info!(
            "OTP session opened, firmware {}, programming sequence {}",
            status.version, status.prog_seq
        );
        Ok(Self { protocol, status })
    }

    pub fn version(&self) -> Version {
        self.status.version
    }

    pub fn close(self) -> Result<()> {
        self.protocol.close()
    }

    /// Slot state as of the last status the device returned
    pub fn get_configuration_state(&self) -> ConfigurationState {
        ConfigurationState::new(self.status.version, self.status.touch_level)
    }

    fn send(&mut self, slot_cmd: u8, data: Vec<u8>) -> Result<Vec<u8>> {
        self.protocol
            .send_and_receive(&APDU::with_data(0, INS_CONFIG, slot_cmd, 0, data))
    }

    /// Send a configuration command and check that the device applied it
    fn write_config(&mut self, slot_cmd: u8, payload: &[u8]) -> Result<()> {
        let previous = self.status.prog_seq;
        let status = Status::parse(&self.send(slot_cmd, payload.to_vec())?)?;
        self.status = status;
        debug!("Programming sequence {} -> {}", previous, status.prog_seq);

        let applied = status.prog_seq == previous.wrapping_add(1)
            || (status.prog_seq == 0 && previous > 0 && status.touch_level & PROG_SEQ_MASK == 0);
        if applied {
            Ok(())
        } else {
            warn!("OTP configuration was not applied");
            Err(Error::CommandRejected(
                "Configuration not applied, check the access code".to_string(),
            ))
        }
    }

    /// Program a slot
    ///
    /// `acc_code` protects the slot from now on; `cur_acc_code` unlocks a
    /// slot that is already protected.
    pub fn put_configuration(
        &mut self,
        slot: Slot,
        configuration: &SlotConfiguration,
        acc_code: Option<&AccessCode>,
        cur_acc_code: Option<&AccessCode>,
    ) -> Result<()> {
        configuration.validate(self.status.version)?;
        let block = configuration.encode(acc_code)?;
        self.write_config(slot.config_cmd(), &write_payload(&block, cur_acc_code))?;
        info!("OTP slot {:?} programmed with {:?}", slot, configuration);
        Ok(())
    }

    /// Erase a slot
    pub fn delete_configuration(
        &mut self,
        slot: Slot,
        cur_acc_code: Option<&AccessCode>,
    ) -> Result<()> {
        self.write_config(
            slot.config_cmd(),
            &write_payload(&[0u8; CONFIG_SIZE], cur_acc_code),
        )?;
        info!("OTP slot {:?} deleted", slot);
        Ok(())
    }

    /// Exchange the configurations of both slots
    pub fn swap_configurations(&mut self) -> Result<()> {
        FEATURE_SWAP.require(self.status.version)?;
        self.write_config(cmd::SWAP, &write_payload(&[], None))?;
        info!("OTP slots swapped");
        Ok(())
    }

    /// HMAC-SHA1 of `challenge` with the key in `slot`
    ///
    /// Challenges are padded to 64 bytes; slots configured for shorter
    /// challenges strip the padding again.
    pub fn calculate_hmac_sha1(&mut self, slot: Slot, challenge: &[u8]) -> Result<Vec<u8>> {
        FEATURE_HMAC.require(self.status.version)?;
        let padded = pad_challenge(challenge)?;
        let response = self.send(slot.hmac_cmd(), padded)?;
        match response.get(..HMAC_RESPONSE_SIZE) {
            Some(hmac) => Ok(hmac.to_vec()),
            None => Err(Error::BadResponse(format!(
                "HMAC response must be {} bytes, got {}",
                HMAC_RESPONSE_SIZE,
                response.len()
            ))),
        }
    }

    pub fn get_serial(&mut self) -> Result<u32> {
        FEATURE_SERIAL.require(self.status.version)?;
        match self.send(cmd::DEVICE_SERIAL, Vec::new())?.as_slice() {
            [a, b, c, d, ..] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
            other => Err(Error::BadResponse(format!(
                "Serial number must be 4 bytes, got {}",
                other.len()
            ))),
        }
    }
}
