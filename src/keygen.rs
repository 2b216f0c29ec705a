//! Ed25519 key pair generation

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::fmt;
use thiserror::Error;

/// Errors raised while producing key material
#[derive(Error, Debug)]
pub enum KeyGenError {
    #[error("secure entropy source unavailable: {0}")]
    EntropyUnavailable(#[from] rand::Error),
}

/// An Ed25519 key pair: the 32-byte secret seed and its public key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    seed: [u8; 32],
    public: [u8; 32],
}

impl KeyPair {
    /// Derive the key pair for a secret seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let public = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        Self { seed, public }
    }

    /// Build a key pair from parts without deriving the public key.
    ///
    /// The caller is responsible for the two halves belonging together.
    pub fn from_parts(seed: [u8; 32], public: [u8; 32]) -> Self {
        Self { seed, public }
    }

    /// Raw 32-byte secret seed
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Raw 32-byte public key
    pub fn public_bytes(&self) -> &[u8; 32] {
        &self.public
    }

    /// Expanded secret key as Tor stores it: clamped scalar || nonce prefix
    pub fn expanded_secret(&self) -> [u8; 64] {
        let hash = Sha512::digest(self.seed);
        let mut expanded = [0u8; 64];
        expanded.copy_from_slice(&hash);
        expanded[0] &= 248;
        expanded[31] &= 127;
        expanded[31] |= 64;
        expanded
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("seed", &"<redacted>")
            .field("public", &self.public)
            .finish()
    }
}

/// Source of fresh key pairs. Each call must return an independent pair.
pub trait KeyGenerator: Send {
    fn generate(&mut self) -> Result<KeyPair, KeyGenError>;
}

/// Key generator reading seeds straight from the operating system RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeyGenerator;

impl OsKeyGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl KeyGenerator for OsKeyGenerator {
    #[inline]
    fn generate(&mut self) -> Result<KeyPair, KeyGenError> {
        let mut seed = [0u8; 32];
        OsRng.try_fill_bytes(&mut seed)?;
        Ok(KeyPair::from_seed(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 8032 section 7.1, test 1
    const RFC_SEED: [u8; 32] = [
        0x9d, 0x61, 0xb1, 0x9d, 0xef, 0xfd, 0x5a, 0x60, 0xba, 0x84, 0x4a, 0xf4, 0x92, 0xec, 0x2c,
        0xc4, 0x44, 0x49, 0xc5, 0x69, 0x7b, 0x32, 0x69, 0x19, 0x70, 0x3b, 0xac, 0x03, 0x1c, 0xae,
        0x7f, 0x60,
    ];
    const RFC_PUBLIC: [u8; 32] = [
        0xd7, 0x5a, 0x98, 0x01, 0x82, 0xb1, 0x0a, 0xb7, 0xd5, 0x4b, 0xfe, 0xd3, 0xc9, 0x64, 0x07,
        0x3a, 0x0e, 0xe1, 0x72, 0xf3, 0xda, 0xa6, 0x23, 0x25, 0xaf, 0x02, 0x1a, 0x68, 0xf7, 0x07,
        0x51, 0x1a,
    ];

    #[test]
    fn test_from_seed_matches_rfc8032() {
        let pair = KeyPair::from_seed(RFC_SEED);
        assert_eq!(pair.public_bytes(), &RFC_PUBLIC);
        assert_eq!(pair.secret_bytes(), &RFC_SEED);
    }

    #[test]
    fn test_expanded_secret_is_clamped() {
        let expanded = KeyPair::from_seed(RFC_SEED).expanded_secret();
        assert_eq!(&expanded[..4], &[0x30, 0x7c, 0x83, 0x86]);
        assert_eq!(expanded[0] & 7, 0);
        assert_eq!(expanded[31] & 0xc0, 0x40);
        assert_eq!(&expanded[60..], &[0x87, 0xe0, 0x1f, 0x8f]);
    }

    #[test]
    fn test_os_generator_produces_independent_pairs() {
        let mut gen = OsKeyGenerator::new();
        let a = gen.generate().unwrap();
        let b = gen.generate().unwrap();
        assert_ne!(a.secret_bytes(), b.secret_bytes());
        assert_ne!(a.public_bytes(), b.public_bytes());
        assert_eq!(KeyPair::from_seed(*a.secret_bytes()), a);
    }

    #[test]
    fn test_debug_redacts_seed() {
        let dbg = format!("{:?}", KeyPair::from_seed(RFC_SEED));
        assert!(dbg.contains("redacted"));
    }
}
