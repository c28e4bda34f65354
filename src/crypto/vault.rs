use argon2::Argon2;
use base64::{engine::general_purpose, Engine as _};
use zeroize::Zeroizing;

use crate::crypto::aes;
use crate::error::{AppError, Result};

/// Application salt for deriving the vault key. Fixed so the same secret
/// always yields the same key across restarts.
const VAULT_SALT: &[u8] = b"cyberchat-vault-salt-v1";

/// Encrypts and decrypts provider API keys at rest.
///
/// The symmetric key is derived once from the configured secret with Argon2.
/// Ciphertexts are stored as base64 of `nonce || ciphertext`.
pub struct KeyVault {
    key: Zeroizing<[u8; aes::KEY_SIZE]>,
}

impl KeyVault {
    /// Derives the vault key from the application secret.
    pub fn new(secret: &str) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; aes::KEY_SIZE]);
        Argon2::default()
            .hash_password_into(secret.as_bytes(), VAULT_SALT, key.as_mut())
            .map_err(|e| AppError::Crypto(format!("Argon2 key derivation error: {}", e)))?;
        Ok(Self { key })
    }

    /// Encrypts a credential string for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let (ciphertext, nonce) = aes::encrypt(&self.key, plaintext.as_bytes())?;

        let mut payload = Vec::with_capacity(nonce.len() + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(payload))
    }

    /// Decrypts a stored credential.
    ///
    /// Fails when the ciphertext was produced under a different derivation
    /// secret (e.g. a rotated `SESSION_SECRET`).
    pub fn decrypt(&self, encoded: &str) -> Result<Zeroizing<String>> {
        let payload = general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| AppError::Crypto(format!("Invalid credential encoding: {}", e)))?;

        if payload.len() <= aes::NONCE_SIZE {
            return Err(AppError::Crypto("Credential payload too short".to_string()));
        }

        let (nonce, ciphertext) = payload.split_at(aes::NONCE_SIZE);
        let nonce: [u8; aes::NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| AppError::Crypto("Invalid nonce size".to_string()))?;

        let plaintext = aes::decrypt(&self.key, ciphertext, &nonce)?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| AppError::Crypto("Credential is not valid UTF-8".to_string()))
    }

    /// Round-trips a probe value. Run once at startup so a broken secret
    /// aborts boot instead of failing the first credential read.
    pub fn self_check(&self) -> Result<()> {
        let probe = "vault-self-check";
        let decrypted = self.decrypt(&self.encrypt(probe)?)?;
        if decrypted.as_str() != probe {
            return Err(AppError::Crypto("Vault self-check mismatch".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_recovers_plaintext() {
        let vault = KeyVault::new("unit-test-secret-0123456789").unwrap();
        let encrypted = vault.encrypt("sk-or-v1-abcdef").unwrap();
        assert_ne!(encrypted, "sk-or-v1-abcdef");
        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.as_str(), "sk-or-v1-abcdef");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let vault = KeyVault::new("unit-test-secret-0123456789").unwrap();
        let a = vault.encrypt("same-plaintext").unwrap();
        let b = vault.encrypt("same-plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_under_rotated_secret_fails() {
        let vault = KeyVault::new("original-secret-0123456789").unwrap();
        let rotated = KeyVault::new("rotated-secret-0123456789!").unwrap();
        let encrypted = vault.encrypt("sk-or-v1-abcdef").unwrap();
        assert!(matches!(
            rotated.decrypt(&encrypted),
            Err(AppError::Crypto(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let vault = KeyVault::new("unit-test-secret-0123456789").unwrap();
        let encrypted = vault.encrypt("sk-or-v1-abcdef").unwrap();
        let mut bytes = encrypted.into_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(vault.decrypt(&tampered).is_err());
    }

    #[test]
    fn self_check_passes() {
        let vault = KeyVault::new("unit-test-secret-0123456789").unwrap();
        vault.self_check().unwrap();
    }
}
