//! Configuration status reported by the OTP application

use crate::error::{Error, Result};
use crate::version::{Feature, Version};

pub const FEATURE_CONFIGURED: Feature = Feature::at_least("Slot configuration state", 2, 1, 0);
pub const FEATURE_TOUCH_TRIGGERED: Feature = Feature::at_least("Touch triggered state", 3, 0, 0);
pub const FEATURE_LED_INVERTED: Feature = Feature::at_least("LED inversion state", 5, 0, 0);

const STATUS_LENGTH: usize = 6;

/// One of the two OTP configuration slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Short touch
    One,
    /// Long touch
    Two,
}

impl Slot {
    const fn configured_bit(self) -> u16 {
        match self {
            Slot::One => 0x01,
            Slot::Two => 0x02,
        }
    }

    const fn touch_bit(self) -> u16 {
        match self {
            Slot::One => 0x04,
            Slot::Two => 0x08,
        }
    }
}

const LED_INVERTED: u16 = 0x10;

/// Status bytes: version, programming sequence and touch level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Status {
    pub version: Version,
    pub prog_seq: u8,
    pub touch_level: u16,
}

impl Status {
    pub fn parse(data: &[u8]) -> Result<Self> {
        match data {
            [major, minor, micro, prog_seq, touch_lo, touch_hi, ..] => Ok(Self {
                version: Version::new(*major, *minor, *micro),
                prog_seq: *prog_seq,
                touch_level: u16::from_le_bytes([*touch_lo, *touch_hi]),
            }),
            _ => Err(Error::BadResponse(format!(
                "OTP status must be {} bytes, got {}",
                STATUS_LENGTH,
                data.len()
            ))),
        }
    }
}

/// Which slots are programmed and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationState {
    version: Version,
    touch_level: u16,
}

impl ConfigurationState {
    pub fn new(version: Version, touch_level: u16) -> Self {
        Self { version, touch_level }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_configured(&self, slot: Slot) -> Result<bool> {
        FEATURE_CONFIGURED.require(self.version)?;
        Ok(self.touch_level & slot.configured_bit() != 0)
    }

    /// The slot fires on a button press rather than on request
    pub fn is_touch_triggered(&self, slot: Slot) -> Result<bool> {
        FEATURE_TOUCH_TRIGGERED.require(self.version)?;
        Ok(self.touch_level & slot.touch_bit() != 0)
    }

    pub fn is_led_inverted(&self) -> Result<bool> {
        FEATURE_LED_INVERTED.require(self.version)?;
        Ok(self.touch_level & LED_INVERTED != 0)
    }
}
