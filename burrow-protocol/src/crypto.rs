//! AEAD envelope for tunnel frames
//!
//! A 256-bit key is derived once from the shared password and salt with
//! PBKDF2-HMAC-SHA256; every sealed message carries its own random
//! 96-bit nonce so concurrent encryptors need no coordination.
//!
//! Wire format:
//! ```text
//! +------------------+------------------------+------------------+
//! | Nonce (12 bytes) |   Ciphertext           | GCM tag (16)     |
//! +------------------+------------------------+------------------+
//! ```
//!
//! The derivation parameters are part of the wire contract and must
//! match on both ends of the tunnel.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::{Error, Result};

/// AES-256 key size
pub const KEY_LEN: usize = 32;

/// GCM nonce size
pub const NONCE_LEN: usize = 12;

/// Salt size produced by [`generate_salt`]
pub const SALT_LEN: usize = 16;

/// PBKDF2 iteration count
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Authenticated encryption context shared by both tunnel peers
///
/// The shared (password, salt) pair is the sole authentication
/// mechanism: a peer holding the wrong secret cannot produce a frame
/// that survives [`Envelope::open`].
#[derive(Clone)]
pub struct Envelope {
    cipher: Aes256Gcm,
}

impl Envelope {
    /// Derive the AEAD context from a password and salt
    pub fn new(password: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);

        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Encrypt a plaintext frame
    ///
    /// Draws a fresh nonce per call and emits `nonce ‖ ciphertext ‖ tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encryption("AEAD seal failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a sealed frame
    ///
    /// Rejects inputs shorter than the nonce. Authentication failure is
    /// an error; the caller drops the frame and keeps reading.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(Error::Decryption(format!(
                "sealed message too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decryption("AEAD open failed".to_string()))
    }
}

/// Generate a random salt suitable for [`Envelope::new`]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_envelope() -> Envelope {
        let salt = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        Envelope::new("pw", &salt)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let envelope = test_envelope();
        let plaintext = b"Hello, World!";

        let sealed = envelope.seal(plaintext).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + plaintext.len() + 16);

        let opened = envelope.open(&sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let envelope = test_envelope();
        let sealed = envelope.seal(b"").unwrap();
        assert_eq!(envelope.open(&sealed).unwrap(), b"");
    }

    #[test]
    fn test_seal_uses_fresh_nonces() {
        let envelope = test_envelope();

        let a = envelope.seal(b"same input").unwrap();
        let b = envelope.seal(b"same input").unwrap();

        assert_ne!(a, b);
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_wrong_password_fails() {
        let salt = generate_salt();
        let ours = Envelope::new("correct horse", &salt);
        let theirs = Envelope::new("battery staple", &salt);

        let sealed = ours.seal(b"secret").unwrap();
        assert!(theirs.open(&sealed).is_err());
    }

    #[test]
    fn test_wrong_salt_fails() {
        let ours = Envelope::new("pw", &[0u8; SALT_LEN]);
        let theirs = Envelope::new("pw", &[1u8; SALT_LEN]);

        let sealed = ours.seal(b"secret").unwrap();
        assert!(theirs.open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let envelope = test_envelope();
        let mut sealed = envelope.seal(b"integrity matters").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(envelope.open(&sealed).is_err());
    }

    #[test]
    fn test_short_input_rejected() {
        let envelope = test_envelope();
        assert!(envelope.open(&[0u8; NONCE_LEN - 1]).is_err());
        assert!(envelope.open(&[]).is_err());
    }

    #[test]
    fn test_generate_salt_varies() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_identical_contexts_interoperate() {
        let salt = generate_salt();
        let client = Envelope::new("shared", &salt);
        let upstream = Envelope::new("shared", &salt);

        let sealed = client.seal(b"query bytes").unwrap();
        assert_eq!(upstream.open(&sealed).unwrap(), b"query bytes");
    }
}
