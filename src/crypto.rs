//! At-rest protection for enrollment secrets.

use aes_gcm::aead::{Aead, Nonce};
use aes_gcm::{Aes256Gcm, Key, KeyInit};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::config::Argon2 as ArgonConfig;

const NONCE_SIZE: usize = 12;
const KEY_LENGTH: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("stored ciphertext cannot be decrypted")]
    AesGcm(#[from] aes_gcm::Error),
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("hex is not valid")]
    Hex(#[from] hex::FromHexError),
    #[error("decrypted data is not utf8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("ciphertext length is {value} while at least {expected} is expected")]
    CiphertextLength { value: usize, expected: usize },
}

/// Cryptographic manager, built once at startup and injected everywhere a
/// secret is read or written.
pub struct Crypto {
    pub symmetric: SymmetricCipher,
    pub hasher: Hasher,
}

impl Crypto {
    /// Create a new [`Crypto`] from the process-wide master key and salt.
    pub fn new(
        config: Option<ArgonConfig>,
        master_key: impl AsRef<[u8]>,
        salt: impl AsRef<[u8]>,
    ) -> Result<Self> {
        let key = SymmetricKey::derive_from_password(config, master_key, &salt)?;

        Ok(Self {
            symmetric: SymmetricCipher::new(key),
            hasher: Hasher::new(salt),
        })
    }
}

/// Fixed-size key material, zeroized on drop.
pub struct SymmetricKey(Zeroizing<[u8; KEY_LENGTH]>);

impl SymmetricKey {
    /// Derive key from a password + salt using Argon2id.
    pub fn derive_from_password(
        config: Option<ArgonConfig>,
        password: impl AsRef<[u8]>,
        salt: impl AsRef<[u8]>,
    ) -> Result<Self> {
        let config = config.unwrap_or_default();
        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        argon2
            .hash_password_into(password.as_ref(), salt.as_ref(), &mut *key)
            .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self(key))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Encrypt/decrypt with AES-256-GCM.
///
/// A random 96-bit nonce is drawn per record and prepended to the
/// ciphertext, so no two encryptions of the same secret collide.
pub struct SymmetricCipher {
    key: SymmetricKey,
}

impl SymmetricCipher {
    /// Create a new [`SymmetricCipher`].
    pub fn new(key: SymmetricKey) -> Self {
        Self { key }
    }

    pub fn encrypt_and_hex(&self, plaintext: impl AsRef<[u8]>) -> Result<String> {
        let cipher_text = self.encrypt(plaintext)?;
        Ok(hex::encode(cipher_text))
    }

    pub fn decrypt_from_hex(&self, data: impl AsRef<[u8]>) -> Result<String> {
        let data = hex::decode(data)?;
        let plain = self.decrypt(data)?;
        Ok(String::from_utf8(plain)?)
    }

    /// Encrypts data returning raw bytes.
    pub fn encrypt(&self, plaintext: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let key = Key::<Aes256Gcm>::from_slice(self.key.as_slice());
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::<Aes256Gcm>::from(nonce_bytes);

        let cipher_text = cipher.encrypt(&nonce, plaintext.as_ref())?;

        let mut out = Vec::with_capacity(NONCE_SIZE + cipher_text.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&cipher_text);
        Ok(out)
    }

    /// Decrypt raw data.
    pub fn decrypt(&self, data: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let data = data.as_ref();
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::CiphertextLength {
                value: data.len(),
                expected: NONCE_SIZE,
            });
        }

        let (nonce_bytes, cipher_text) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::<Aes256Gcm>::clone_from_slice(nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(self.key.as_slice());
        let cipher = Aes256Gcm::new(key);

        Ok(cipher.decrypt(&nonce, cipher_text)?)
    }
}

/// Deterministic peppered digests, used to look backup codes up by exact
/// match without storing them in clear.
pub struct Hasher(Zeroizing<Vec<u8>>);

impl Hasher {
    /// Create a new [`Hasher`].
    pub fn new(pepper: impl AsRef<[u8]>) -> Self {
        Self(Zeroizing::new(pepper.as_ref().to_vec()))
    }

    /// Digest data into SHA256.
    pub fn digest(&self, data: impl AsRef<[u8]>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        hasher.update(data.as_ref());
        let hash = hasher.finalize();

        hex::encode(hash)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Cheap parameters so tests do not pay the production KDF cost.
    pub(crate) fn test_config() -> ArgonConfig {
        ArgonConfig {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn aes256_round_trip() {
        let crypto =
            Crypto::new(Some(test_config()), "secret", [0x42; 16]).unwrap();

        let plaintext = "JBSWY3DPEHPK3PXP";
        let encrypted = crypto.symmetric.encrypt_and_hex(plaintext).unwrap();
        let decrypted = crypto.symmetric.decrypt_from_hex(encrypted).unwrap();

        assert_eq!(plaintext, decrypted);
    }

    #[test]
    fn nonce_makes_ciphertexts_unique() {
        let crypto =
            Crypto::new(Some(test_config()), "secret", [0x42; 16]).unwrap();

        let first = crypto.symmetric.encrypt_and_hex("same").unwrap();
        let second = crypto.symmetric.encrypt_and_hex("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn wrong_key_is_a_distinct_failure() {
        let writer =
            Crypto::new(Some(test_config()), "key-one", [0x42; 16]).unwrap();
        let reader =
            Crypto::new(Some(test_config()), "key-two", [0x42; 16]).unwrap();

        let encrypted = writer.symmetric.encrypt_and_hex("secret").unwrap();
        assert!(matches!(
            reader.symmetric.decrypt_from_hex(encrypted),
            Err(CryptoError::AesGcm(_)),
        ));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let crypto =
            Crypto::new(Some(test_config()), "secret", [0x42; 16]).unwrap();

        assert!(matches!(
            crypto.symmetric.decrypt(b"short".as_slice()),
            Err(CryptoError::CiphertextLength { .. }),
        ));
    }

    #[test]
    fn digest_is_deterministic() {
        let hasher = Hasher::new([0x42; 16]);

        let expected =
            "10846ce86bc72a1a12172069cd4ce7e5ebfb5f35c7a1f46c84ad01f8e892c492";
        assert_eq!(hasher.digest("R7K2M9QX"), expected);
        assert_eq!(hasher.digest("R7K2M9QX"), hasher.digest("R7K2M9QX"));
    }
}
