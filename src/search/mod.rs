//! Parallel vanity address search
//!
//! A [`SearchCoordinator`] spawns one [`SearchWorker`] per requested degree of
//! parallelism. Workers share nothing but an attempt counter and a stop flag;
//! matches are handed to a dispatcher thread that persists them and forwards a
//! [`SearchEvent`] to the caller.

mod coordinator;
mod worker;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::keygen::{KeyGenError, KeyPair};
use crate::onion::OnionAddress;
use crate::persist::PersistenceError;

pub use coordinator::{SearchCoordinator, SessionHandle, StopSignal};
pub use worker::{SearchWorker, WorkerExit, WorkerState, WorkerStateWatch};

/// Attempts a worker performs between stop checks and counter flushes
pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

/// Errors surfaced by the search control surface
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("parallelism must be at least 1, got {0}")]
    InvalidParallelism(usize),

    #[error("invalid prefix {0:?}: only a-z and 2-7 are allowed, at most 56 characters")]
    InvalidPrefix(String),

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("no match found within {0:?}")]
    Timeout(Duration),

    #[error("all workers terminated without a match")]
    Aborted,

    #[error("search session already ended")]
    Ended,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A key pair whose address satisfied the target
#[derive(Debug, Clone)]
pub struct FoundKey {
    pub key_pair: KeyPair,
    pub address: OnionAddress,
}

/// What the coordinator does once a worker reports a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Stop every worker after the first match
    #[default]
    StopOnFirst,
    /// Replace the finishing worker and keep mining until stopped
    KeepSearching,
}

/// Tunables for a search session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub batch_size: u64,
    pub policy: MatchPolicy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            policy: MatchPolicy::default(),
        }
    }
}

/// Notifications delivered from a running session
#[derive(Debug)]
pub enum SearchEvent {
    /// A match was found. `persisted` carries the key directory or the write error.
    Found {
        key: FoundKey,
        worker_id: usize,
        persisted: Result<PathBuf, PersistenceError>,
    },
    /// A worker could not read entropy and terminated
    WorkerFailed { worker_id: usize, error: KeyGenError },
    /// Every worker terminated without a match and without a stop request
    Aborted,
    /// The session ended after a match under [`MatchPolicy::StopOnFirst`]
    Finished,
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Finished,
    Stopped,
    Aborted,
}

/// Progress snapshot of a session
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub attempts: u64,
    pub attempts_per_sec: f64,
    pub elapsed: Duration,
}

/// Format speed for display
pub fn format_speed(speed: u64) -> String {
    if speed >= 1_000_000_000 {
        format!("{:.1}B", speed as f64 / 1_000_000_000.0)
    } else if speed >= 1_000_000 {
        format!("{:.1}M", speed as f64 / 1_000_000.0)
    } else if speed >= 1_000 {
        format!("{:.1}K", speed as f64 / 1_000.0)
    } else {
        format!("{}", speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(999), "999");
        assert_eq!(format_speed(1_500), "1.5K");
        assert_eq!(format_speed(2_340_000), "2.3M");
        assert_eq!(format_speed(7_000_000_000), "7.0B");
    }

    #[test]
    fn test_default_options() {
        let opts = SearchOptions::default();
        assert_eq!(opts.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(opts.policy, MatchPolicy::StopOnFirst);
    }
}
