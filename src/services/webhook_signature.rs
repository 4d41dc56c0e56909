//! Verification of the `x-signature` header Mercado Pago attaches to notifications.
//!
//! Header format: `ts=<unix seconds>,v1=<hex hmac-sha256>`. The signed manifest is
//! `id:<data.id>;request-id:<x-request-id>;ts:<ts>;` where parts whose value is missing
//! are left out.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    Missing,
    Malformed,
    Expired,
    Mismatch,
}

struct ParsedSignature<'a> {
    ts: &'a str,
    v1: &'a str,
}

fn parse_header(header: &str) -> Option<ParsedSignature<'_>> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        let mut it = part.splitn(2, '=');
        match (it.next().map(str::trim), it.next().map(str::trim)) {
            (Some("ts"), Some(val)) if !val.is_empty() => ts = Some(val),
            (Some("v1"), Some(val)) if !val.is_empty() => v1 = Some(val),
            _ => {}
        }
    }
    Some(ParsedSignature { ts: ts?, v1: v1? })
}

pub fn manifest(data_id: Option<&str>, request_id: Option<&str>, ts: &str) -> String {
    let mut manifest = String::new();
    if let Some(id) = data_id.filter(|id| !id.is_empty()) {
        // Alphanumeric ids are signed in lower case.
        manifest.push_str(&format!("id:{};", id.to_ascii_lowercase()));
    }
    if let Some(request_id) = request_id.filter(|r| !r.is_empty()) {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));
    manifest
}

pub fn sign(secret: &str, manifest: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(manifest.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Checks `header` against the notification's `data.id` and `x-request-id`.
///
/// `ts` may be in seconds or milliseconds; it must be within `tolerance_secs` of `now`.
pub fn verify(
    secret: &str,
    header: Option<&str>,
    data_id: Option<&str>,
    request_id: Option<&str>,
    tolerance_secs: u64,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let parsed = parse_header(header).ok_or(SignatureError::Malformed)?;

    let ts: i64 = parsed.ts.parse().map_err(|_| SignatureError::Malformed)?;
    let ts_secs = if ts > 10_000_000_000 { ts / 1000 } else { ts };
    if (now_unix - ts_secs).unsigned_abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let expected = sign(secret, &manifest(data_id, request_id, parsed.ts));
    if constant_time_eq(&expected, &parsed.v1.to_ascii_lowercase()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
