//! At-rest encryption for mailbox credentials.
//!
//! AES-256-GCM with a random 96-bit nonce per encryption; the stored form is
//! base64(nonce || ciphertext). The key is supplied by the operator through
//! `ENCRYPTION_KEY` and must decode to exactly 32 bytes.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const NONCE_SIZE: usize = 12;

pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .context("ENCRYPTION_KEY is not valid base64")?;
        if key.len() != 32 {
            bail!(
                "ENCRYPTION_KEY must decode to 32 bytes, got {}",
                key.len()
            );
        }
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| anyhow!("failed to initialise cipher: {e}"))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let combined = BASE64
            .decode(encrypted)
            .context("encrypted credential is not valid base64")?;
        if combined.len() < NONCE_SIZE {
            bail!("encrypted credential too short: {} bytes", combined.len());
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow!("decryption failed (wrong key or corrupted data): {e}"))?;
        String::from_utf8(plaintext).context("decrypted credential is not valid UTF-8")
    }
}

#[cfg(test)]
pub(crate) fn test_cipher() -> CredentialCipher {
    CredentialCipher::from_base64_key(&BASE64.encode([7u8; 32])).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = test_cipher();
        let plaintext = "my_secret_app_password!";
        let encrypted = cipher.encrypt(plaintext).unwrap();

        assert_ne!(encrypted, plaintext);
        assert!(BASE64.decode(&encrypted).is_ok());
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn same_plaintext_yields_different_ciphertext() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same_password").unwrap();
        let b = cipher.encrypt("same_password").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "same_password");
        assert_eq!(cipher.decrypt(&b).unwrap(), "same_password");
    }

    #[test]
    fn rejects_bad_key_length() {
        let short = BASE64.encode([1u8; 16]);
        assert!(CredentialCipher::from_base64_key(&short).is_err());
    }

    #[test]
    fn rejects_garbage_input() {
        let cipher = test_cipher();
        assert!(cipher.decrypt("not_base64!@#").is_err());
        assert!(cipher.decrypt(&BASE64.encode("short")).is_err());
        // valid envelope size, wrong contents
        assert!(cipher.decrypt(&BASE64.encode([0u8; 32])).is_err());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let cipher = test_cipher();
        let other = CredentialCipher::from_base64_key(&BASE64.encode([8u8; 32])).unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }
}
