//! Tor V3 Vanity Address Miner Library
//!
//! Brute-forces Ed25519 key pairs until the derived v3 onion address starts
//! with a chosen prefix, spreading the work across cooperative CPU workers and
//! saving every match to disk.

pub mod config;
pub mod keygen;
pub mod logging;
pub mod matcher;
pub mod onion;
pub mod persist;
pub mod search;

pub use config::ControlConfig;
pub use keygen::{KeyGenError, KeyGenerator, KeyPair, OsKeyGenerator};
pub use matcher::{matches, SearchTarget};
pub use onion::{pubkey_to_onion, OnionAddress};
pub use persist::{KeyPersister, PersistenceError};
pub use search::{
    format_speed, FoundKey, MatchPolicy, Progress, SearchCoordinator, SearchError, SearchEvent,
    SearchOptions, SessionHandle, SessionStatus, StopSignal, WorkerState,
};

/// File prefix for Tor ed25519 secret key files
pub const FILE_PREFIX: &[u8] = b"== ed25519v1-secret: type0 ==\0\0\0";

/// File prefix for Tor ed25519 public key files
pub const PUBKEY_PREFIX: &[u8] = b"== ed25519v1-public: type0 ==\0\0\0";
