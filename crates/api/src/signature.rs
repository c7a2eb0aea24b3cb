//! Callback signature verification: hex(HMAC-SHA256(secret, raw body)).

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-callback-signature";

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature against the body.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_body_verifies() {
        let body = br#"{"id":"J1","status":"done"}"#;
        let sig = sign("s3cret", body);
        assert_eq!(sig.len(), 64);
        assert!(verify("s3cret", body, &sig));
        assert!(verify("s3cret", body, &sig.to_uppercase()));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = br#"{"id":"J1","status":"done"}"#;
        let sig = sign("s3cret", body);
        assert!(!verify("other", body, &sig));
        assert!(!verify("s3cret", br#"{"id":"J2","status":"done"}"#, &sig));
        assert!(!verify("s3cret", body, "not-hex"));
    }
}
