//! Link cipher for the hub ↔ leaf control protocol.
//!
//! The hub generates one 32-byte key per process lifetime and hands it to
//! every leaf, unframed, as the first bytes on the connection. Every frame
//! after that is XORed with a keystream derived from the key.
//!
//! The keystream is BLAKE3 in extendable-output mode over the key, restarted
//! at offset 0 for every message. That makes this obfuscation, not
//! encryption: two ciphertexts under the same key leak their XOR, and there
//! is no integrity check. A deployment that needs confidentiality swaps this
//! type for an authenticated cipher keyed right after the key-delivery step;
//! the frame layout in [`crate::frame`] does not change.
//!
//! Key material lives in `Zeroizing` and is wiped on drop.

use std::fmt;

use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::wire::KEY_LEN;

/// BLAKE3 derive-key context. Changing it changes every keystream.
const KEYSTREAM_CONTEXT: &str = "pylon 2024 hub-leaf link keystream";

/// Keystream bytes produced per XOF read.
const BLOCK_LEN: usize = 64;

/// Symmetric keystream cipher shared by the hub and its leaves.
pub struct Cipher {
    key: Zeroizing<Vec<u8>>,
}

impl Cipher {
    /// Generate a fresh random key. Called once per hub process.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Build a cipher from received key bytes. Any non-empty key works.
    pub fn from_key(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Raw key bytes, for the handshake write only.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Short hex fingerprint safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(&blake3::hash(&self.key).as_bytes()[..8])
    }

    /// XOR `data` in place with the keystream. Applying it twice is identity.
    pub fn apply_keystream(&self, data: &mut [u8]) {
        let mut hasher = blake3::Hasher::new_derive_key(KEYSTREAM_CONTEXT);
        hasher.update(&self.key);
        let mut stream = hasher.finalize_xof();

        let mut block = [0u8; BLOCK_LEN];
        for chunk in data.chunks_mut(BLOCK_LEN) {
            let block = &mut block[..chunk.len()];
            stream.fill(block);
            for (byte, k) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= k;
            }
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = plaintext.to_vec();
        self.apply_keystream(&mut out);
        out
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        self.encrypt(ciphertext)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("link key must not be empty")]
    EmptyKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_restores_plaintext() {
        let cipher = Cipher::generate();
        for text in ["", "a", "hello hub", "ünïcødé ✓ #chan", &"x".repeat(1000)] {
            let sealed = cipher.encrypt(text.as_bytes());
            assert_eq!(cipher.decrypt(&sealed), text.as_bytes());
        }
    }

    #[test]
    fn roundtrip_with_short_non_standard_key() {
        let cipher = Cipher::from_key(b"k").unwrap();
        let sealed = cipher.encrypt(b"{\"type\":\"alert\"}");
        assert_eq!(cipher.decrypt(&sealed), b"{\"type\":\"alert\"}");
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let cipher = Cipher::generate();
        let plain = b"PRIVMSG #test :hello there";
        assert_ne!(cipher.encrypt(plain), plain.to_vec());
    }

    #[test]
    fn same_key_is_deterministic() {
        let key = [7u8; KEY_LEN];
        let a = Cipher::from_key(&key).unwrap();
        let b = Cipher::from_key(&key).unwrap();
        assert_eq!(a.encrypt(b"same"), b.encrypt(b"same"));
    }

    #[test]
    fn different_keys_differ() {
        let a = Cipher::from_key(&[1u8; KEY_LEN]).unwrap();
        let b = Cipher::from_key(&[2u8; KEY_LEN]).unwrap();
        assert_ne!(a.encrypt(b"payload"), b.encrypt(b"payload"));
        assert_ne!(b.decrypt(&a.encrypt(b"payload")), b"payload".to_vec());
    }

    #[test]
    fn empty_key_rejected() {
        assert_eq!(Cipher::from_key(&[]).unwrap_err(), CryptoError::EmptyKey);
    }

    #[test]
    fn generated_keys_are_full_length_and_distinct() {
        let a = Cipher::generate();
        let b = Cipher::generate();
        assert_eq!(a.key().len(), KEY_LEN);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn debug_does_not_print_key() {
        let cipher = Cipher::from_key(&[0xAB; KEY_LEN]).unwrap();
        let shown = format!("{cipher:?}");
        assert!(!shown.contains(&hex::encode([0xAB; KEY_LEN])));
        assert!(shown.contains(&cipher.fingerprint()));
    }
}
