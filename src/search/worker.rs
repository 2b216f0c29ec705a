//! A single search worker: generate, encode, match, repeat.

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::keygen::{KeyGenError, KeyGenerator};
use crate::matcher::SearchTarget;
use crate::onion::OnionAddress;

use super::FoundKey;

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of one worker as seen from other threads.
///
/// A running worker whose stop flag is raised reports [`WorkerState::Stopping`]
/// until it reaches its next batch boundary.
#[derive(Debug, Clone)]
pub struct WorkerStateWatch {
    state: Arc<AtomicU8>,
    stop_flag: Arc<AtomicBool>,
}

impl WorkerStateWatch {
    pub(crate) fn new(stop_flag: Arc<AtomicBool>) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(IDLE)),
            stop_flag,
        }
    }

    pub fn get(&self) -> WorkerState {
        match self.state.load(Ordering::Acquire) {
            IDLE => WorkerState::Idle,
            RUNNING if self.stop_flag.load(Ordering::Acquire) => WorkerState::Stopping,
            RUNNING => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }

    fn set(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }
}

/// Why a worker left its loop
#[derive(Debug)]
pub enum WorkerExit {
    /// Found a match and handed it off
    Found,
    /// Observed the stop flag at a batch boundary
    Stopped,
    /// The key generator could not read entropy
    Failed(KeyGenError),
    /// The worker thread panicked
    Panicked,
}

/// Messages from workers to the session dispatcher
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Found { worker_id: usize, key: FoundKey },
    Exited { worker_id: usize, exit: WorkerExit },
}

/// Brute-force search loop for one unit of parallelism
pub struct SearchWorker<G> {
    id: usize,
    generator: G,
    target: SearchTarget,
    batch_size: u64,
    counter: Arc<AtomicU64>,
    stop_flag: Arc<AtomicBool>,
    found_tx: Sender<WorkerMessage>,
    state: WorkerStateWatch,
    attempts: u64,
}

impl<G: KeyGenerator> SearchWorker<G> {
    pub(crate) fn new(
        id: usize,
        generator: G,
        target: SearchTarget,
        batch_size: u64,
        counter: Arc<AtomicU64>,
        stop_flag: Arc<AtomicBool>,
        found_tx: Sender<WorkerMessage>,
    ) -> Self {
        Self {
            id,
            generator,
            target,
            batch_size: batch_size.max(1),
            counter,
            state: WorkerStateWatch::new(stop_flag.clone()),
            stop_flag,
            found_tx,
            attempts: 0,
        }
    }

    /// Runs the worker loop.
    ///
    /// Keeps generating key pairs until one of:
    /// - a match is found (handed to the dispatcher)
    /// - the stop flag is seen at a batch boundary
    /// - the generator fails
    pub fn run(&mut self) -> WorkerExit {
        self.state.set(RUNNING);
        let exit = self.search();
        self.state.set(STOPPED);
        exit
    }

    fn search(&mut self) -> WorkerExit {
        loop {
            if self.stop_flag.load(Ordering::Acquire) {
                return WorkerExit::Stopped;
            }

            let mut local = 0u64;
            for _ in 0..self.batch_size {
                let key_pair = match self.generator.generate() {
                    Ok(key_pair) => key_pair,
                    Err(e) => {
                        self.flush(local);
                        return WorkerExit::Failed(e);
                    }
                };
                local += 1;

                let address = OnionAddress::from_public_key(key_pair.public_bytes());
                if self.target.matches(&address) {
                    self.flush(local);
                    // An unbounded channel never blocks; a closed one means
                    // the session is gone and nobody wants the key.
                    let _ = self.found_tx.send(WorkerMessage::Found {
                        worker_id: self.id,
                        key: FoundKey { key_pair, address },
                    });
                    return WorkerExit::Found;
                }
            }

            self.flush(local);
        }
    }

    #[inline]
    fn flush(&mut self, local: u64) {
        if local > 0 {
            self.attempts += local;
            self.counter.fetch_add(local, Ordering::Relaxed);
        }
    }

    /// Returns the worker ID.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// A handle for reading this worker's state from another thread
    pub fn watch(&self) -> WorkerStateWatch {
        self.state.clone()
    }

    /// Attempts this worker has flushed into the shared counter
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::KeyPair;
    use crossbeam_channel::{bounded, unbounded};
    use std::thread;

    /// Deterministic generator: seed counts up from `next`
    struct SeqGenerator {
        next: u64,
        fail_after: Option<u64>,
    }

    impl KeyGenerator for SeqGenerator {
        fn generate(&mut self) -> Result<KeyPair, KeyGenError> {
            if self.fail_after == Some(0) {
                return Err(KeyGenError::EntropyUnavailable(rand::Error::new(
                    std::io::Error::new(std::io::ErrorKind::Other, "no entropy"),
                )));
            }
            if let Some(n) = self.fail_after.as_mut() {
                *n -= 1;
            }
            let mut seed = [0u8; 32];
            seed[..8].copy_from_slice(&self.next.to_le_bytes());
            self.next += 1;
            Ok(KeyPair::from_seed(seed))
        }
    }

    fn worker(
        target: &str,
        batch: u64,
        gen: SeqGenerator,
    ) -> (
        SearchWorker<SeqGenerator>,
        Arc<AtomicU64>,
        Arc<AtomicBool>,
        crossbeam_channel::Receiver<WorkerMessage>,
    ) {
        let counter = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded();
        let w = SearchWorker::new(
            0,
            gen,
            SearchTarget::new(target),
            batch,
            counter.clone(),
            stop.clone(),
            tx,
        );
        (w, counter, stop, rx)
    }

    #[test]
    fn test_empty_prefix_matches_first_attempt() {
        let gen = SeqGenerator { next: 0, fail_after: None };
        let (mut w, counter, _stop, rx) = worker("", 100, gen);
        assert_eq!(w.state(), WorkerState::Idle);

        assert!(matches!(w.run(), WorkerExit::Found));
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(w.attempts(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        match rx.try_recv().unwrap() {
            WorkerMessage::Found { worker_id, key } => {
                assert_eq!(worker_id, 0);
                assert_eq!(
                    key.address,
                    OnionAddress::from_public_key(key.key_pair.public_bytes())
                );
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_finds_single_char_prefix() {
        // 1 in 32 chance per attempt; the sequence is deterministic
        let gen = SeqGenerator { next: 0, fail_after: None };
        let (mut w, counter, _stop, rx) = worker("q", 7, gen);
        assert!(matches!(w.run(), WorkerExit::Found));
        assert_eq!(counter.load(Ordering::Relaxed), w.attempts());

        let WorkerMessage::Found { key, .. } = rx.try_recv().unwrap() else {
            panic!("expected found message");
        };
        assert!(key.address.as_str().starts_with('q'));
    }

    #[test]
    fn test_stop_flag_checked_before_first_batch() {
        let gen = SeqGenerator { next: 0, fail_after: None };
        let (mut w, counter, stop, rx) = worker("", 10, gen);
        stop.store(true, Ordering::Release);

        assert!(matches!(w.run(), WorkerExit::Stopped));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_generator_failure_flushes_and_exits() {
        let gen = SeqGenerator { next: 0, fail_after: Some(25) };
        // "7777" is very unlikely within 25 deterministic attempts
        let (mut w, counter, _stop, rx) = worker("7777777777", 10, gen);

        assert!(matches!(w.run(), WorkerExit::Failed(KeyGenError::EntropyUnavailable(_))));
        assert_eq!(w.attempts(), 25);
        assert_eq!(counter.load(Ordering::Relaxed), 25);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stopping_visible_until_batch_boundary() {
        /// Raises the stop flag on its third call, then blocks until released
        struct Gate {
            calls: u64,
            stop: Arc<AtomicBool>,
            entered: crossbeam_channel::Sender<()>,
            release: crossbeam_channel::Receiver<()>,
        }

        impl KeyGenerator for Gate {
            fn generate(&mut self) -> Result<KeyPair, KeyGenError> {
                self.calls += 1;
                if self.calls == 3 {
                    self.stop.store(true, Ordering::Release);
                    self.entered.send(()).unwrap();
                    self.release.recv().unwrap();
                }
                let mut seed = [0u8; 32];
                seed[..8].copy_from_slice(&self.calls.to_le_bytes());
                Ok(KeyPair::from_seed(seed))
            }
        }

        let counter = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, _rx) = unbounded();
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let gate = Gate {
            calls: 0,
            stop: stop.clone(),
            entered: entered_tx,
            release: release_rx,
        };
        let mut w = SearchWorker::new(
            0,
            gate,
            SearchTarget::new("7777777777"),
            10,
            counter.clone(),
            stop,
            tx,
        );
        let watch = w.watch();
        assert_eq!(watch.get(), WorkerState::Idle);

        let handle = thread::spawn(move || w.run());
        entered_rx.recv().unwrap();
        assert_eq!(watch.get(), WorkerState::Stopping);

        release_tx.send(()).unwrap();
        assert!(matches!(handle.join().unwrap(), WorkerExit::Stopped));
        assert_eq!(watch.get(), WorkerState::Stopped);
        // the interrupted batch still completes and is flushed
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }
}
