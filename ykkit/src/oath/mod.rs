//! OATH (YKOATH) session
//!
//! TOTP and HOTP credentials held by the OATH application, with optional
//! access key protection.

pub mod credential;
pub mod credential_id;
pub mod session;

pub use credential::{Code, Credential, CredentialData, OathType};
pub use credential_id::{format_id, parse_id, CredentialIdData, DEFAULT_PERIOD};
pub use session::{format_code, OathSession, OATH_AID};
