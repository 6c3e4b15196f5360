//! Credential id encoding
//!
//! On the device a credential is addressed by a byte string built from its
//! issuer, account name and, for TOTP with a non-default period, the period:
//!
//! - TOTP, period 30: `"{issuer}:{name}"`
//! - TOTP, other periods: `"{period}/{issuer}:{name}"`
//! - HOTP: `"{issuer}:{name}"`
//!
//! The issuer part is omitted when there is no issuer. Parsing accepts any
//! id, also ones written by other tools; what does not follow the scheme
//! becomes a bare account name.

use super::credential::OathType;

/// TOTP time step assumed when the id carries no period
pub const DEFAULT_PERIOD: u32 = 30;

/// Identity fields recovered from a credential id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialIdData {
    pub issuer: Option<String>,
    pub account_name: String,
    /// `None` for HOTP
    pub period: Option<u32>,
}

/// Build the on-device id of a credential
pub fn format_id(issuer: Option<&str>, name: &str, oath_type: OathType, period: u32) -> Vec<u8> {
    let mut id = String::new();
    if oath_type == OathType::Totp && period != DEFAULT_PERIOD {
        id.push_str(&format!("{}/", period));
    }
    if let Some(issuer) = issuer.filter(|issuer| !issuer.is_empty()) {
        id.push_str(issuer);
        id.push(':');
    }
    id.push_str(name);
    id.into_bytes()
}

/// Recover issuer, account name and period from an on-device id
pub fn parse_id(id: &[u8], oath_type: OathType) -> CredentialIdData {
    let data = String::from_utf8_lossy(id);
    match oath_type {
        OathType::Totp => {
            let (period, rest) = split_period(&data);
            let (issuer, account_name) = split_issuer(rest);
            CredentialIdData {
                issuer,
                account_name,
                period: Some(period),
            }
        }
        OathType::Hotp => {
            let (issuer, account_name) = match data.split_once(':') {
                Some((issuer, name)) => (Some(issuer.to_string()), name.to_string()),
                None => (None, data.to_string()),
            };
            CredentialIdData {
                issuer,
                account_name,
                period: None,
            }
        }
    }
}

/// Match an optional non-zero `digits/` prefix, keeping at least one character
fn split_period(data: &str) -> (u32, &str) {
    let digits = data.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && data[digits..].starts_with('/') && data.len() > digits + 1 {
        match data[..digits].parse::<u32>() {
            Ok(period) if period > 0 => return (period, &data[digits + 1..]),
            _ => {}
        }
    }
    (DEFAULT_PERIOD, data)
}

/// Match an optional non-empty `issuer:` prefix, keeping a non-empty name
fn split_issuer(data: &str) -> (Option<String>, String) {
    match data.split_once(':') {
        Some((issuer, name)) if !issuer.is_empty() && !name.is_empty() => {
            (Some(issuer.to_string()), name.to_string())
        }
        _ => (None, data.to_string()),
    }
}
