//! Single-use recovery codes issued alongside a TOTP secret.

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::totp::TotpError;

/// Codes issued per enrollment.
pub const CODE_COUNT: usize = 10;
/// Characters per code.
pub const CODE_LENGTH: usize = 8;

const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a fresh set of recovery codes from the OS random source.
pub fn generate_codes(count: usize) -> Result<Vec<String>, TotpError> {
    let mut codes = Vec::with_capacity(count);

    for _ in 0..count {
        let mut bytes = [0u8; CODE_LENGTH];
        OsRng.try_fill_bytes(&mut bytes)?;

        codes.push(
            bytes
                .iter()
                .map(|byte| {
                    CODE_ALPHABET[(byte % CODE_ALPHABET.len() as u8) as usize]
                        as char
                })
                .collect(),
        );
    }

    Ok(codes)
}

/// Whether a submission looks like a recovery code: exactly
/// [`CODE_LENGTH`] characters from `A–Z0–9` after uppercasing.
pub fn is_code_format(code: &str) -> bool {
    code.len() == CODE_LENGTH
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Timing-safe equality for recovery codes.
pub fn matches(submitted: &str, stored: &str) -> bool {
    bool::from(submitted.as_bytes().ct_eq(stored.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_full_set() {
        let codes = generate_codes(CODE_COUNT).unwrap();

        assert_eq!(codes.len(), CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
            assert!(is_code_format(code));
        }
    }

    #[test]
    fn format_gate() {
        assert!(is_code_format("R7K2M9QX"));
        assert!(is_code_format("00000000"));

        assert!(!is_code_format("r7k2m9qx")); // lowercase: caller uppercases.
        assert!(!is_code_format("R7K2M9Q")); // too short.
        assert!(!is_code_format("R7K2M9QX2")); // too long.
        assert!(!is_code_format("R7K2-9QX"));
    }

    #[test]
    fn comparison_requires_exact_match() {
        assert!(matches("R7K2M9QX", "R7K2M9QX"));
        assert!(!matches("R7K2M9QX", "R7K2M9QZ"));
        assert!(!matches("R7K2M9QX", "R7K2M9Q"));
    }
}
