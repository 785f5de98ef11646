//! Webhook sender verification.
//!
//! Every verifier is total: malformed, missing or empty signatures yield
//! `false`, never a panic. Comparisons are constant time, either through
//! `Mac::verify_slice` or `subtle::ConstantTimeEq`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Wire encoding of an HMAC signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Base64,
    /// Lowercase or uppercase hex, optionally prefixed with `sha256=`.
    Hex,
}

/// Computes the HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return Vec::new();
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a raw signature the way the header carries it.
pub fn encode_signature(signature: &[u8], encoding: SignatureEncoding) -> String {
    match encoding {
        SignatureEncoding::Base64 => STANDARD.encode(signature),
        SignatureEncoding::Hex => hex::encode(signature),
    }
}

fn decode_signature(header: &str, encoding: SignatureEncoding) -> Option<Vec<u8>> {
    let header = header.trim();
    match encoding {
        SignatureEncoding::Base64 => STANDARD.decode(header).ok(),
        SignatureEncoding::Hex => {
            let hex_sig = header.strip_prefix("sha256=").unwrap_or(header);
            hex::decode(hex_sig).ok()
        }
    }
}

/// Verifies an HMAC-SHA256 signature computed over the exact raw body.
pub fn verify_hmac(
    body: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
    encoding: SignatureEncoding,
) -> bool {
    let Some(header) = signature_header.filter(|value| !value.trim().is_empty()) else {
        return false;
    };
    let Some(expected) = decode_signature(header, encoding) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Verifies a header that carries the shared secret verbatim.
pub fn verify_shared_secret(signature_header: Option<&str>, secret: &str) -> bool {
    let Some(provided) = signature_header.map(str::trim).filter(|value| !value.is_empty()) else {
        return false;
    };
    constant_time_eq(provided.as_bytes(), secret.as_bytes())
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Sender identities this service is allowed to act for. Matching ignores
/// case and surrounding whitespace.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<String>,
}

impl Allowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|entry| normalize_identity(entry.as_ref()))
            .filter(|entry| !entry.is_empty())
            .collect();
        Self { entries }
    }

    pub fn contains(&self, identity: &str) -> bool {
        let identity = normalize_identity(identity);
        !identity.is_empty() && self.entries.iter().any(|entry| *entry == identity)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_ascii_lowercase()
}
