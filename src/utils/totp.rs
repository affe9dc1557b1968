//! RFC 6238 time-based one-time passwords over HMAC-SHA1.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// TOTP time step in seconds.
pub const TIME_STEP_SECONDS: u64 = 30;

/// Accepted clock drift, in time steps, on either side of the current window.
pub const SKEW_STEPS: u64 = 2;

/// Generate a fresh 160-bit TOTP secret, base32 encoded.
pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 20] = rng.gen();
    base32::encode(base32::Alphabet::RFC4648 { padding: true }, &bytes)
}

/// Render the otpauth provisioning URI consumed by authenticator apps,
/// typically displayed as a QR payload.
pub fn provisioning_uri(issuer: &str, account: &str, secret: &str) -> String {
    format!("otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}")
}

/// Compute the 6-digit code for a specific time window.
pub fn code_for_window(secret: &str, window: u64) -> Result<String, anyhow::Error> {
    let secret_bytes = base32::decode(base32::Alphabet::RFC4648 { padding: true }, secret)
        .ok_or_else(|| anyhow::anyhow!("Invalid TOTP secret encoding"))?;

    let mut mac = HmacSha1::new_from_slice(&secret_bytes)
        .map_err(|e| anyhow::anyhow!("Invalid TOTP key length: {}", e))?;
    mac.update(&window.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation per RFC 4226
    let offset = (digest[19] & 0xf) as usize;
    let code = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    Ok(format!("{:06}", code % 1_000_000))
}

/// Compute the code for a Unix timestamp.
pub fn code_at(secret: &str, unix_seconds: u64) -> Result<String, anyhow::Error> {
    code_for_window(secret, unix_seconds / TIME_STEP_SECONDS)
}

/// Verify a presented code against the secret at the given timestamp,
/// tolerating `SKEW_STEPS` windows of drift in either direction.
pub fn verify(secret: &str, code: &str, unix_seconds: u64) -> bool {
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let current = unix_seconds / TIME_STEP_SECONDS;
    let start = current.saturating_sub(SKEW_STEPS);
    for window in start..=current + SKEW_STEPS {
        if let Ok(expected) = code_for_window(secret, window) {
            if expected == code {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_base32() {
        let secret = generate_secret();
        assert!(base32::decode(base32::Alphabet::RFC4648 { padding: true }, &secret).is_some());
    }

    #[test]
    fn test_code_round_trip() {
        let secret = generate_secret();
        let now = 1_700_000_000u64;
        let code = code_at(&secret, now).unwrap();
        assert!(verify(&secret, &code, now));
    }

    #[test]
    fn test_drift_tolerance() {
        let secret = generate_secret();
        let now = 1_700_000_000u64;
        let code = code_at(&secret, now).unwrap();

        assert!(verify(&secret, &code, now + TIME_STEP_SECONDS * SKEW_STEPS));
        assert!(!verify(
            &secret,
            &code,
            now + TIME_STEP_SECONDS * (SKEW_STEPS + 2)
        ));
    }

    #[test]
    fn test_rejects_malformed_codes() {
        let secret = generate_secret();
        assert!(!verify(&secret, "12345", 1_700_000_000));
        assert!(!verify(&secret, "abcdef", 1_700_000_000));
    }

    #[test]
    fn test_provisioning_uri_shape() {
        let uri = provisioning_uri("Bakehouse", "user@example.com", "SECRET");
        assert!(uri.starts_with("otpauth://totp/Bakehouse:user@example.com?"));
        assert!(uri.contains("secret=SECRET"));
        assert!(uri.contains("issuer=Bakehouse"));
    }
}
