//! Tor v3 onion address generation utilities

use sha3::{Digest, Sha3_256};
use std::fmt;

/// Number of base32 characters in a v3 address body
pub const ADDRESS_LEN: usize = 56;

/// Hostname suffix appended to the address body
pub const ONION_SUFFIX: &str = ".onion";

const CHECKSUM_PREFIX: &[u8] = b".onion checksum";
const VERSION: u8 = 3;

/// A v3 onion address body (56 lowercase base32 characters, no ".onion")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Derive the address for an Ed25519 public key
    pub fn from_public_key(pubkey: &[u8; 32]) -> Self {
        Self(encode_body(pubkey))
    }

    /// The 56-character address body
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full hostname, i.e. the body followed by ".onion"
    pub fn hostname(&self) -> String {
        format!("{}{}", self.0, ONION_SUFFIX)
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OnionAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Convert an Ed25519 public key to a Tor v3 onion hostname
///
/// The onion address format is: base32(pubkey || checksum || version).onion
/// where checksum = SHA3-256(".onion checksum" || pubkey || version)[0..2]
/// and version = 0x03
pub fn pubkey_to_onion(pubkey: &[u8; 32]) -> String {
    OnionAddress::from_public_key(pubkey).hostname()
}

fn encode_body(pubkey: &[u8; 32]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(CHECKSUM_PREFIX);
    hasher.update(pubkey);
    hasher.update([VERSION]);

    let mut onion = [0u8; 35];
    onion[..32].copy_from_slice(pubkey);
    onion[32..34].copy_from_slice(&hasher.finalize()[..2]);
    onion[34] = VERSION;

    base32::encode(base32::Alphabet::Rfc4648Lower { padding: false }, &onion)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex32(s: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).unwrap();
        }
        out
    }

    #[test]
    fn test_onion_format() {
        let pubkey = [0u8; 32];
        let onion = pubkey_to_onion(&pubkey);
        assert!(onion.ends_with(".onion"));
        assert_eq!(onion.len(), 56 + 6);
    }

    #[test]
    fn test_zero_key_vector() {
        let addr = OnionAddress::from_public_key(&[0u8; 32]);
        assert_eq!(
            addr.as_str(),
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaam2dqd"
        );
    }

    #[test]
    fn test_rfc8032_key_vector() {
        // Public key of RFC 8032 section 7.1, test 1
        let pubkey = hex32("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a");
        let addr = OnionAddress::from_public_key(&pubkey);
        assert_eq!(
            addr.hostname(),
            "25njqamcweflpvkl73j4szahhihoc4xt3ktcgjnpaingr5yhkenl5sid.onion"
        );
    }

    #[test]
    fn test_sequential_key_vector() {
        let mut pubkey = [0u8; 32];
        for (i, b) in pubkey.iter_mut().enumerate() {
            *b = i as u8;
        }
        assert_eq!(
            OnionAddress::from_public_key(&pubkey).as_str(),
            "aaaqeayeaudaocajbifqydiob4ibceqtcqkrmfyydenbwha5dyp3kead"
        );
    }

    #[test]
    fn test_deterministic_lowercase_base32() {
        for seed in 0u8..16 {
            let pubkey = [seed.wrapping_mul(37); 32];
            let a = OnionAddress::from_public_key(&pubkey);
            let b = OnionAddress::from_public_key(&pubkey);
            assert_eq!(a, b);
            assert_eq!(a.as_str().len(), ADDRESS_LEN);
            assert!(a
                .as_str()
                .bytes()
                .all(|c| c.is_ascii_lowercase() || (b'2'..=b'7').contains(&c)));
            // version byte 0x03 always ends the body in 'd'
            assert!(a.as_str().ends_with('d'));
        }
    }
}
