//! PIV (Personal Identity Verification) session
//!
//! Host side of the PIV card application (NIST SP 800-73-4) with the
//! YubiKey extensions: metadata, attestation, AES management keys and PIN
//! retry configuration.

pub mod security_state;
pub mod session;
pub mod types;

pub use security_state::PinAttemptEstimate;
pub use session::{pin_retries_from_sw, PivSession, PIV_AID};
pub use types::{
    Certificate, KeyAlgorithm, KeyType, ManagementKeyMetadata, ManagementKeyType, PinMetadata,
    PinPolicy, PrivateKeyValues, PublicKeyValues, Slot, SlotMetadata, TouchPolicy,
};
