//! Host-side session engines for YubiKey-compatible smartcards
//!
//! The crate speaks APDUs over any [`SmartCardConnection`] and provides one
//! session type per card application:
//! - PIV (NIST SP 800-73-4 with the YubiKey extensions), [`piv::PivSession`]
//! - OATH TOTP/HOTP credentials, [`oath::OathSession`]
//! - YubiOTP slot programming, [`otp::OtpSession`]
//!
//! Opening a session selects the application and takes ownership of the
//! connection; dropping the session closes it.

// Core modules
pub mod apdu;
pub mod crypto;
pub mod error;
pub mod tlv;
pub mod transport;
pub mod version;

// Applications
pub mod oath;
pub mod otp;
pub mod piv;

#[cfg(test)]
mod sim;

pub use apdu::ApduFormat;
pub use error::{Error, Result};
pub use transport::{SmartCardConnection, SmartCardProtocol};
pub use version::{Feature, Version};
