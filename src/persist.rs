//! Writing discovered keys to disk
//!
//! Every match gets its own directory named after the full hostname:
//!
//! ```text
//! <root>/<address>.onion/
//!     ed25519_private_key.bin   32-byte seed
//!     ed25519_public_key.bin    32-byte public key
//!     hostname.txt              "<address>.onion"
//!     hostname                  "<address>.onion\n"           (Tor layout)
//!     hs_ed25519_public_key     tag || public key              (Tor layout)
//!     hs_ed25519_secret_key     tag || expanded secret key     (Tor layout)
//!     authorized_clients/                                      (Tor layout)
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::search::FoundKey;
use crate::{FILE_PREFIX, PUBKEY_PREFIX};

pub const PRIVATE_KEY_FILE: &str = "ed25519_private_key.bin";
pub const PUBLIC_KEY_FILE: &str = "ed25519_public_key.bin";
pub const HOSTNAME_FILE: &str = "hostname.txt";

const TOR_HOSTNAME_FILE: &str = "hostname";
const TOR_PUBLIC_KEY_FILE: &str = "hs_ed25519_public_key";
const TOR_SECRET_KEY_FILE: &str = "hs_ed25519_secret_key";
const TOR_CLIENTS_DIR: &str = "authorized_clients";

/// Failure to write one of the key artifacts
#[derive(Error, Debug)]
#[error("failed to write {}: {source}", path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl PersistenceError {
    fn at(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persists found keys under a root directory
#[derive(Debug, Clone)]
pub struct KeyPersister {
    root: PathBuf,
    tor_files: bool,
}

impl KeyPersister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tor_files: true,
        }
    }

    /// Also write the files Tor expects in a `HiddenServiceDir` (default on)
    pub fn with_tor_files(mut self, enabled: bool) -> Self {
        self.tor_files = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a given key would be written to
    pub fn key_dir(&self, found: &FoundKey) -> PathBuf {
        self.root.join(found.address.hostname())
    }

    /// Write all artifacts for `found`, returning the key directory.
    ///
    /// Writing the same key twice overwrites the previous files.
    pub fn persist(&self, found: &FoundKey) -> Result<PathBuf, PersistenceError> {
        let dir = self.key_dir(found);
        fs::create_dir_all(&dir).map_err(PersistenceError::at(&dir))?;

        let hostname = found.address.hostname();
        let keys = &found.key_pair;

        write_file(&dir.join(PRIVATE_KEY_FILE), keys.secret_bytes())?;
        write_file(&dir.join(PUBLIC_KEY_FILE), keys.public_bytes())?;
        write_file(&dir.join(HOSTNAME_FILE), hostname.as_bytes())?;

        if self.tor_files {
            write_file(
                &dir.join(TOR_HOSTNAME_FILE),
                format!("{}\n", hostname).as_bytes(),
            )?;

            let mut public = Vec::with_capacity(PUBKEY_PREFIX.len() + 32);
            public.extend_from_slice(PUBKEY_PREFIX);
            public.extend_from_slice(keys.public_bytes());
            write_file(&dir.join(TOR_PUBLIC_KEY_FILE), &public)?;

            let mut secret = Vec::with_capacity(FILE_PREFIX.len() + 64);
            secret.extend_from_slice(FILE_PREFIX);
            secret.extend_from_slice(&keys.expanded_secret());
            write_file(&dir.join(TOR_SECRET_KEY_FILE), &secret)?;

            let clients = dir.join(TOR_CLIENTS_DIR);
            fs::create_dir_all(&clients).map_err(PersistenceError::at(&clients))?;
        }

        debug!(dir = %dir.display(), "persisted key");
        Ok(dir)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    fs::write(path, contents).map_err(PersistenceError::at(path))
}
