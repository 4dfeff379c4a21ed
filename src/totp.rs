//! RFC 6238 time-based one-time passwords.
//!
//! Pure functions only: token derivation is `(secret, step) -> code` with no
//! shared state, so the same module serves enrollment previews and
//! authoritative verification.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;

/// RFC 4648 base32 alphabet, also used to print generated secrets.
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Recommended secret size: 160 bits.
pub const DEFAULT_SECRET_LENGTH: usize = 20;
/// Standard authenticator profile.
pub const DEFAULT_DIGITS: u32 = 6;
/// Step size in seconds.
pub const DEFAULT_PERIOD: u64 = 30;
/// Steps of clock-drift tolerance on each side.
pub const DEFAULT_WINDOW: i64 = 1;

type Result<T> = std::result::Result<T, TotpError>;

#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    #[error("secure random source is unavailable: {0}")]
    Entropy(#[from] rand::Error),
    #[error("secret is not valid base32")]
    InvalidSecret,
    #[error("system clock is before the unix epoch")]
    Clock(#[from] std::time::SystemTimeError),
}

/// Generate a random shared secret of `length` characters.
///
/// Each entropy byte is mapped modulo 32 into the base32 alphabet, so the
/// output needs no padding and embeds directly into a provisioning URI.
pub fn generate_secret(length: usize) -> Result<String> {
    let mut bytes = vec![0u8; length];
    OsRng.try_fill_bytes(&mut bytes)?;

    Ok(bytes
        .iter()
        .map(|byte| BASE32_ALPHABET[(byte % 32) as usize] as char)
        .collect())
}

/// Build the `otpauth://` URI consumed by authenticator apps.
///
/// Label and issuer are percent-encoded; the secret is already URL-safe.
pub fn provisioning_uri(secret: &str, label: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{}?secret={}&issuer={}",
        utf8_percent_encode(label, NON_ALPHANUMERIC),
        secret,
        utf8_percent_encode(issuer, NON_ALPHANUMERIC),
    )
}

/// Current time step: `floor(unix_time / period)`.
pub fn current_step(period: u64) -> Result<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(now / period)
}

/// Decode a base32 secret into HMAC key bytes.
///
/// Uppercase-normalizes and drops characters outside the alphabet before
/// decoding, matching what authenticator apps accept.
fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized: String = secret
        .to_ascii_uppercase()
        .chars()
        .filter(|c| BASE32_ALPHABET.contains(&(*c as u8)))
        .collect();

    let key = base32::decode(
        base32::Alphabet::Rfc4648 { padding: false },
        &normalized,
    )
    .ok_or(TotpError::InvalidSecret)?;

    if key.is_empty() {
        return Err(TotpError::InvalidSecret);
    }

    Ok(key)
}

/// Derive the code for a given secret and time step.
///
/// RFC 4226 HOTP with the step as counter: HMAC-SHA1 over the 8-byte
/// big-endian counter, dynamic truncation to a 31-bit integer, reduced
/// modulo `10^digits` and zero-padded.
pub fn generate(secret: &str, step: u64, digits: u32) -> Result<String> {
    let key = decode_secret(secret)?;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|_| TotpError::InvalidSecret)?;
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    let code = binary % 10u32.pow(digits);
    Ok(format!("{code:0width$}", width = digits as usize))
}

/// Whether a submission even looks like a code: exactly `digits` ASCII
/// digits. Anything else is rejected before any base32 or HMAC work.
pub fn is_code_format(code: &str, digits: u32) -> bool {
    code.len() == digits as usize && code.bytes().all(|b| b.is_ascii_digit())
}

/// Verify a submitted code around an explicit step.
///
/// Scans `[-window, +window]` and returns the matched offset for drift
/// diagnostics, or `None`. Comparison is constant-time.
pub fn verify_at(
    secret: &str,
    code: &str,
    at_step: u64,
    window: i64,
    digits: u32,
) -> Result<Option<i64>> {
    if !is_code_format(code, digits) {
        return Ok(None);
    }

    for offset in -window..=window {
        let Some(step) = at_step.checked_add_signed(offset) else {
            continue;
        };

        let expected = generate(secret, step, digits)?;
        if bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
            return Ok(Some(offset));
        }
    }

    Ok(None)
}

/// Verify a submitted code against the current clock.
pub fn verify(
    secret: &str,
    code: &str,
    period: u64,
    window: i64,
    digits: u32,
) -> Result<Option<i64>> {
    verify_at(secret, code, current_step(period)?, window, digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4226/6238 test secret: ASCII "12345678901234567890".
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc4226_counter_vectors() {
        let expected = [
            "755224", "287082", "359152", "969429", "338314", "254676",
            "287922", "162583", "399871", "520489",
        ];

        for (counter, code) in expected.iter().enumerate() {
            assert_eq!(
                generate(RFC_SECRET, counter as u64, 6).unwrap(),
                *code,
                "counter {counter}",
            );
        }
    }

    #[test]
    fn rfc6238_time_vectors() {
        // (unix time, 6-digit profile of the published SHA-1 vectors).
        let expected = [
            (59u64, "287082"),
            (1111111109, "081804"),
            (1111111111, "050471"),
            (1234567890, "005924"),
            (2000000000, "279037"),
            (20000000000, "353130"),
        ];

        for (time, code) in expected {
            assert_eq!(generate(RFC_SECRET, time / 30, 6).unwrap(), code);
        }
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let first = generate("JBSWY3DPEHPK3PXP", 56666666, 6).unwrap();
        let second = generate("JBSWY3DPEHPK3PXP", 56666666, 6).unwrap();

        assert_eq!(first, second);
        // frozen clock at unix 1700000000, 30s granularity.
        assert_eq!(first, "324550");
    }

    #[test]
    fn secret_normalization() {
        // lowercase and foreign characters must not change the key.
        assert_eq!(
            generate("jbswy3dp ehpk-3pxp", 56666666, 6).unwrap(),
            "324550",
        );
    }

    #[test]
    fn generated_secret_shape() {
        let secret = generate_secret(DEFAULT_SECRET_LENGTH).unwrap();

        assert_eq!(secret.len(), 20);
        assert!(secret.bytes().all(|b| BASE32_ALPHABET.contains(&b)));

        // a fresh secret must be usable as an HMAC key right away.
        generate(&secret, 1, 6).unwrap();
    }

    #[test]
    fn base32_round_trip() {
        for _ in 0..32 {
            let mut bytes = [0u8; 20];
            OsRng.try_fill_bytes(&mut bytes).unwrap();

            let alphabet = base32::Alphabet::Rfc4648 { padding: false };
            let encoded = base32::encode(alphabet, &bytes);
            assert_eq!(base32::decode(alphabet, &encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn uri_encodes_label_and_issuer() {
        let uri = provisioning_uri(
            "JBSWY3DPEHPK3PXP",
            "nurse@example.com",
            "City Health+",
        );

        assert_eq!(
            uri,
            "otpauth://totp/nurse%40example%2Ecom?secret=JBSWY3DPEHPK3PXP&issuer=City%20Health%2B",
        );
    }

    #[test]
    fn window_tolerance() {
        let secret = "JBSWY3DPEHPK3PXP";
        let step = 56666666;
        let code = generate(secret, step, 6).unwrap();

        // valid one step behind, at, and one step ahead.
        assert_eq!(verify_at(secret, &code, step - 1, 1, 6).unwrap(), Some(1));
        assert_eq!(verify_at(secret, &code, step, 1, 6).unwrap(), Some(0));
        assert_eq!(verify_at(secret, &code, step + 1, 1, 6).unwrap(), Some(-1));

        // out of window.
        assert_eq!(verify_at(secret, &code, step + 2, 1, 6).unwrap(), None);
        assert_eq!(verify_at(secret, &code, step - 2, 1, 6).unwrap(), None);
    }

    #[test]
    fn malformed_codes_short_circuit() {
        // the secret here cannot even be decoded; Ok(None) proves the
        // format check rejects before any cryptographic work.
        let secret = "!!!!";

        for code in ["12345", "1234567", "abcdef", "12 456", ""] {
            assert_eq!(verify_at(secret, code, 1, 1, 6).unwrap(), None);
        }

        // a well-formed code against that secret does reach the decoder.
        assert!(matches!(
            verify_at(secret, "123456", 1, 1, 6),
            Err(TotpError::InvalidSecret),
        ));
    }
}
