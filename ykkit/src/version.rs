//! Firmware versions and version-gated features
//!
//! Every application keeps a static table of [`Feature`]s. Sessions check
//! them against the firmware version before sending a command, so an
//! unsupported request never reaches the device.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A firmware version, ordered component by component
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, micro: u8) -> Self {
        Self { major, minor, micro }
    }

    /// Read a version from the first three bytes of a device reply
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match data {
            [major, minor, micro, ..] => Ok(Self::new(*major, *minor, *micro)),
            _ => Err(Error::BadResponse(format!(
                "Version needs 3 bytes, got {}",
                data.len()
            ))),
        }
    }

    /// Development builds report major version 0 and support everything
    pub fn is_development(&self) -> bool {
        self.major == 0
    }

    pub fn is_at_least(&self, major: u8, minor: u8, micro: u8) -> bool {
        *self >= Self::new(major, minor, micro)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    AtLeast(Version),
    /// Supported everywhere except `from <= v < until`
    Excluding { from: Version, until: Version },
}

/// A named capability and the firmware versions that have it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feature {
    pub name: &'static str,
    gate: Gate,
}

impl Feature {
    pub const fn at_least(name: &'static str, major: u8, minor: u8, micro: u8) -> Self {
        Self {
            name,
            gate: Gate::AtLeast(Version::new(major, minor, micro)),
        }
    }

    pub const fn excluding(name: &'static str, from: Version, until: Version) -> Self {
        Self {
            name,
            gate: Gate::Excluding { from, until },
        }
    }

    pub fn is_supported_by(&self, version: Version) -> bool {
        if version.is_development() {
            return true;
        }
        match self.gate {
            Gate::AtLeast(min) => version >= min,
            Gate::Excluding { from, until } => version < from || version >= until,
        }
    }

    /// Fail with [`Error::NotSupported`] unless `version` has this feature
    pub fn require(&self, version: Version) -> Result<()> {
        if self.is_supported_by(version) {
            Ok(())
        } else {
            Err(Error::NotSupported(format!(
                "{} is not supported by this YubiKey (firmware {})",
                self.name, version
            )))
        }
    }
}
