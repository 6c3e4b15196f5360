//! YubiOTP session
//!
//! Slot programming for HMAC-SHA1 challenge-response and OATH-HOTP, and
//! challenge-response calculation.

pub mod config;
pub mod session;
pub mod state;

pub use config::{AccessCode, HmacSha1Config, HotpConfig, SlotConfiguration};
pub use session::{OtpSession, OTP_AID};
pub use state::{ConfigurationState, Slot};
