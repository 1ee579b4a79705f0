//! AES-256-GCM credential cipher.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Errors reported at the cipher boundary.
///
/// Readers treat both decrypt failures the same way ("no usable
/// credential"); they stay distinct here so tests can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Ciphertext is too short or does not decode to UTF-8 text.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(&'static str),

    /// Tag verification failed: wrong key or tampered data.
    #[error("ciphertext authentication failed")]
    AuthenticationFailed,

    /// The AEAD refused to encrypt.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Raw key material has the wrong length.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

/// Key for credential encryption.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CredentialKey {
    bytes: [u8; KEY_SIZE],
}

impl CredentialKey {
    /// Derives the key for a store: `SHA-256(store_path || domain)`.
    ///
    /// Deterministic for a given path and tag, so every process opening the
    /// same store derives the same key.
    #[must_use]
    pub fn derive(store_path: &Path, domain: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(store_path.as_os_str().as_encoded_bytes());
        hasher.update(domain.as_bytes());

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&hasher.finalize());
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_SIZE {
            return Err(CipherError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts peer passwords.
///
/// Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
/// The empty password maps to the empty ciphertext in both directions, so
/// "no secret" never needs a dummy encryption.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Creates a cipher for the given key.
    #[must_use]
    pub fn new(key: &CredentialKey) -> Self {
        // Infallible: the key is always exactly KEY_SIZE bytes.
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypts a password.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CipherError> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    /// Decrypts a password produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// [`CipherError::MalformedCiphertext`] for short or non-UTF-8 input,
    /// [`CipherError::AuthenticationFailed`] for a wrong key or tampering.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<String, CipherError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::MalformedCiphertext("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &ciphertext[NONCE_SIZE..])
            .map_err(|_| CipherError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::MalformedCiphertext("not UTF-8"))
    }

    /// Decrypts, mapping any failure to `None` ("no usable credential").
    #[must_use]
    pub fn decrypt_best_effort(&self, ciphertext: &[u8]) -> Option<String> {
        self.decrypt(ciphertext).ok()
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DOMAIN: &str = "townsync-federation-key-v1";

    fn cipher_for(path: &str) -> CredentialCipher {
        CredentialCipher::new(&CredentialKey::derive(Path::new(path), DOMAIN))
    }

    #[test]
    fn derive_is_deterministic() {
        let a = CredentialKey::derive(Path::new("/srv/a"), DOMAIN);
        let b = CredentialKey::derive(Path::new("/srv/a"), DOMAIN);
        assert_eq!(a.as_bytes(), b.as_bytes());

        let other_path = CredentialKey::derive(Path::new("/srv/b"), DOMAIN);
        assert_ne!(a.as_bytes(), other_path.as_bytes());

        let other_domain = CredentialKey::derive(Path::new("/srv/a"), "townsync-federation-key-v2");
        assert_ne!(a.as_bytes(), other_domain.as_bytes());
    }

    #[test]
    fn key_wrong_size() {
        assert!(matches!(
            CredentialKey::from_bytes(&[0u8; 16]),
            Err(CipherError::InvalidKeySize { expected: 32, actual: 16 })
        ));
        assert!(CredentialKey::from_bytes(&[0u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn debug_redacts_key() {
        let key = CredentialKey::derive(Path::new("/srv/a"), DOMAIN);
        assert!(format!("{key:?}").contains("REDACTED"));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = cipher_for("/srv/town");
        let ciphertext = cipher.encrypt("local-pass").unwrap();

        assert_eq!(ciphertext.len(), NONCE_SIZE + "local-pass".len() + TAG_SIZE);
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), "local-pass");
    }

    #[test]
    fn empty_password_is_empty_ciphertext() {
        let cipher = cipher_for("/srv/town");
        assert!(cipher.encrypt("").unwrap().is_empty());
        assert_eq!(cipher.decrypt(&[]).unwrap(), "");
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let cipher = cipher_for("/srv/town");
        let ct1 = cipher.encrypt("same").unwrap();
        let ct2 = cipher.encrypt("same").unwrap();
        assert_ne!(ct1, ct2);
        assert_ne!(ct1[..NONCE_SIZE], ct2[..NONCE_SIZE]);
    }

    #[test]
    fn too_short_is_malformed() {
        let cipher = cipher_for("/srv/town");
        assert!(matches!(
            cipher.decrypt(b"invalid-ciphertext"),
            Err(CipherError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn tampering_fails_authentication() {
        let cipher = cipher_for("/srv/town");
        let mut ciphertext = cipher.encrypt("secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;

        assert_eq!(cipher.decrypt(&ciphertext), Err(CipherError::AuthenticationFailed));
        assert!(cipher.decrypt_best_effort(&ciphertext).is_none());
    }

    proptest! {
        #[test]
        fn roundtrip_any_password(password in "\\PC{1,64}") {
            let cipher = cipher_for("/srv/town");
            let ciphertext = cipher.encrypt(&password).unwrap();
            prop_assert_eq!(cipher.decrypt(&ciphertext).unwrap(), password);
        }

        #[test]
        fn wrong_path_never_decrypts(
            password in "[ -~]{1,32}",
            a in "/[a-z]{1,12}",
            b in "/[a-z]{1,12}",
        ) {
            prop_assume!(a != b);
            let ciphertext = cipher_for(&a).encrypt(&password).unwrap();
            prop_assert_eq!(
                cipher_for(&b).decrypt(&ciphertext),
                Err(CipherError::AuthenticationFailed)
            );
        }
    }
}
