//! Session management: worker pool, progress counter, match dispatch.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::keygen::{KeyGenerator, OsKeyGenerator};
use crate::matcher::SearchTarget;
use crate::persist::KeyPersister;

use super::worker::{SearchWorker, WorkerExit, WorkerMessage, WorkerState, WorkerStateWatch};
use super::{
    FoundKey, MatchPolicy, Progress, SearchError, SearchEvent, SearchOptions, SessionStatus,
};

type GeneratorFactory<G> = Arc<dyn Fn() -> G + Send + Sync>;

/// Starts search sessions with a shared persister and generator factory
pub struct SearchCoordinator<G = OsKeyGenerator> {
    persister: KeyPersister,
    options: SearchOptions,
    new_generator: GeneratorFactory<G>,
}

impl SearchCoordinator<OsKeyGenerator> {
    /// Coordinator drawing keys from the OS RNG, one generator per worker
    pub fn new(persister: KeyPersister) -> Self {
        Self::with_generator(persister, OsKeyGenerator::new)
    }
}

impl<G: KeyGenerator + 'static> SearchCoordinator<G> {
    /// Coordinator with a custom generator; `new_generator` runs once per worker
    pub fn with_generator(
        persister: KeyPersister,
        new_generator: impl Fn() -> G + Send + Sync + 'static,
    ) -> Self {
        Self {
            persister,
            options: SearchOptions::default(),
            new_generator: Arc::new(new_generator),
        }
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn persister(&self) -> &KeyPersister {
        &self.persister
    }

    /// Validate the request and spawn `parallelism` workers.
    ///
    /// Nothing is spawned when validation fails.
    pub fn start(
        &self,
        parallelism: usize,
        target: SearchTarget,
    ) -> Result<SessionHandle, SearchError> {
        if parallelism < 1 {
            return Err(SearchError::InvalidParallelism(parallelism));
        }
        if !target.is_satisfiable() {
            return Err(SearchError::InvalidPrefix(target.prefix().to_string()));
        }
        if self.options.batch_size < 1 {
            return Err(SearchError::InvalidBatchSize);
        }

        let (worker_tx, worker_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let shared = Arc::new(SessionShared::default());

        let ctx = WorkerContext {
            target: target.clone(),
            batch_size: self.options.batch_size,
            counter: Arc::new(AtomicU64::new(0)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            tx: worker_tx,
            new_generator: self.new_generator.clone(),
        };

        let mut handles = HashMap::with_capacity(parallelism);
        for id in 0..parallelism {
            match ctx.spawn(id) {
                Ok((handle, watch)) => {
                    handles.insert(id, handle);
                    shared.track(id, watch);
                }
                Err(e) => {
                    ctx.stop_flag.store(true, Ordering::Release);
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(SearchError::Spawn(e));
                }
            }
        }

        info!(
            parallelism,
            prefix = target.prefix(),
            batch_size = self.options.batch_size,
            policy = ?self.options.policy,
            "search session started"
        );

        let dispatcher = Dispatcher {
            rx: worker_rx,
            events: event_tx,
            persister: self.persister.clone(),
            policy: self.options.policy,
            shared: shared.clone(),
            ctx: ctx.clone(),
            handles,
            next_id: parallelism,
        };
        let dispatcher = thread::Builder::new()
            .name("vanity-dispatch".into())
            .spawn(move || dispatcher.run());
        let dispatcher = match dispatcher {
            Ok(handle) => handle,
            Err(e) => {
                // The dispatcher owned the worker handles; workers exit on the flag.
                ctx.stop_flag.store(true, Ordering::Release);
                return Err(SearchError::Spawn(e));
            }
        };

        Ok(SessionHandle {
            target,
            parallelism,
            counter: ctx.counter.clone(),
            stop_flag: ctx.stop_flag.clone(),
            shared,
            events: event_rx,
            dispatcher: Some(dispatcher),
            started: Instant::now(),
        })
    }
}

#[derive(Debug)]
struct SessionShared {
    stop_requested: AtomicBool,
    status: Mutex<SessionStatus>,
    /// Workers whose threads have not been joined yet
    workers: Mutex<BTreeMap<usize, WorkerStateWatch>>,
}

impl Default for SessionShared {
    fn default() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            status: Mutex::new(SessionStatus::Running),
            workers: Mutex::new(BTreeMap::new()),
        }
    }
}

impl SessionShared {
    fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn track(&self, id: usize, watch: WorkerStateWatch) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, watch);
    }

    fn untrack(&self, id: usize) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn worker_states(&self) -> Vec<(usize, WorkerState)> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, watch)| (*id, watch.get()))
            .collect()
    }
}

/// Everything a worker thread needs; cloned per spawn
struct WorkerContext<G> {
    target: SearchTarget,
    batch_size: u64,
    counter: Arc<AtomicU64>,
    stop_flag: Arc<AtomicBool>,
    tx: Sender<WorkerMessage>,
    new_generator: GeneratorFactory<G>,
}

impl<G> Clone for WorkerContext<G> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            batch_size: self.batch_size,
            counter: self.counter.clone(),
            stop_flag: self.stop_flag.clone(),
            tx: self.tx.clone(),
            new_generator: self.new_generator.clone(),
        }
    }
}

impl<G: KeyGenerator + 'static> WorkerContext<G> {
    fn spawn(&self, id: usize) -> std::io::Result<(JoinHandle<()>, WorkerStateWatch)> {
        let mut worker = SearchWorker::new(
            id,
            (self.new_generator)(),
            self.target.clone(),
            self.batch_size,
            self.counter.clone(),
            self.stop_flag.clone(),
            self.tx.clone(),
        );
        let watch = worker.watch();
        let tx = self.tx.clone();
        let handle = thread::Builder::new()
            .name(format!("vanity-worker-{}", id))
            .spawn(move || {
                let exit = panic::catch_unwind(AssertUnwindSafe(|| worker.run()))
                    .unwrap_or(WorkerExit::Panicked);
                let _ = tx.send(WorkerMessage::Exited {
                    worker_id: id,
                    exit,
                });
            })?;
        Ok((handle, watch))
    }
}

/// Receives worker messages, persists matches and tracks worker liveness
struct Dispatcher<G> {
    rx: Receiver<WorkerMessage>,
    events: Sender<SearchEvent>,
    persister: KeyPersister,
    policy: MatchPolicy,
    shared: Arc<SessionShared>,
    ctx: WorkerContext<G>,
    handles: HashMap<usize, JoinHandle<()>>,
    next_id: usize,
}

impl<G: KeyGenerator + 'static> Dispatcher<G> {
    fn run(mut self) {
        let mut live = self.handles.len();
        let mut found = 0u64;

        // The dispatcher holds a sender itself, so liveness is counted from
        // exit notices rather than channel disconnection.
        while live > 0 {
            let Ok(msg) = self.rx.recv() else { break };
            match msg {
                WorkerMessage::Found { worker_id, key } => {
                    found += 1;
                    self.on_found(worker_id, key);
                }
                WorkerMessage::Exited { worker_id, exit } => {
                    live -= 1;
                    if self.on_exit(worker_id, exit) {
                        live += 1;
                    }
                }
            }
        }

        for (id, handle) in self.handles.drain() {
            let _ = handle.join();
            self.shared.untrack(id);
        }

        let status = if self.shared.stop_requested.load(Ordering::Acquire) {
            SessionStatus::Stopped
        } else if found > 0 && self.policy == MatchPolicy::StopOnFirst {
            SessionStatus::Finished
        } else {
            SessionStatus::Aborted
        };
        self.shared.set_status(status);

        match status {
            SessionStatus::Finished => {
                info!(found, "search session finished");
                let _ = self.events.send(SearchEvent::Finished);
            }
            SessionStatus::Aborted => {
                error!(found, "all workers terminated without a stop request");
                let _ = self.events.send(SearchEvent::Aborted);
            }
            _ => info!(found, "search session stopped"),
        }
    }

    fn on_found(&mut self, worker_id: usize, key: FoundKey) {
        if self.policy == MatchPolicy::StopOnFirst {
            self.ctx.stop_flag.store(true, Ordering::Release);
        }

        let persisted = self.persister.persist(&key);
        match &persisted {
            Ok(dir) => info!(
                worker_id,
                address = %key.address.hostname(),
                dir = %dir.display(),
                "found matching address"
            ),
            Err(e) => error!(
                worker_id,
                address = %key.address.hostname(),
                error = %e,
                "found matching address but failed to save it"
            ),
        }

        let _ = self.events.send(SearchEvent::Found {
            key,
            worker_id,
            persisted,
        });
    }

    /// Returns true when a replacement worker was spawned
    fn on_exit(&mut self, worker_id: usize, exit: WorkerExit) -> bool {
        debug!(worker_id, ?exit, "worker exited");
        // The exit notice is the thread's last action, so this join is immediate.
        if let Some(handle) = self.handles.remove(&worker_id) {
            let _ = handle.join();
        }
        self.shared.untrack(worker_id);

        match exit {
            WorkerExit::Found => {
                if self.policy == MatchPolicy::KeepSearching {
                    return self.respawn();
                }
            }
            WorkerExit::Stopped => {}
            WorkerExit::Failed(error) => {
                warn!(worker_id, %error, "worker terminated");
                let _ = self.events.send(SearchEvent::WorkerFailed { worker_id, error });
            }
            WorkerExit::Panicked => {
                error!(worker_id, "worker panicked");
            }
        }
        false
    }

    fn respawn(&mut self) -> bool {
        if self.ctx.stop_flag.load(Ordering::Acquire) {
            return false;
        }
        let id = self.next_id;
        match self.ctx.spawn(id) {
            Ok((handle, watch)) => {
                self.next_id += 1;
                self.handles.insert(id, handle);
                self.shared.track(id, watch);
                true
            }
            Err(e) => {
                warn!(worker_id = id, error = %e, "failed to spawn replacement worker");
                false
            }
        }
    }
}

/// Control surface for a running search session.
///
/// Dropping the handle stops the session.
pub struct SessionHandle {
    target: SearchTarget,
    parallelism: usize,
    counter: Arc<AtomicU64>,
    stop_flag: Arc<AtomicBool>,
    shared: Arc<SessionShared>,
    events: Receiver<SearchEvent>,
    dispatcher: Option<JoinHandle<()>>,
    started: Instant,
}

impl SessionHandle {
    pub fn target(&self) -> &SearchTarget {
        &self.target
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Aggregated attempts, accurate up to each worker's last flush
    pub fn progress(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Attempts together with throughput since the session started
    pub fn snapshot(&self) -> Progress {
        let attempts = self.progress();
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();
        Progress {
            attempts,
            attempts_per_sec: if secs > 0.0 { attempts as f64 / secs } else { 0.0 },
            elapsed,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    /// Workers whose threads are still held by the session, by id.
    ///
    /// Under [`MatchPolicy::KeepSearching`] a worker that found a match is
    /// joined before its replacement is spawned, so this never exceeds
    /// [`parallelism`](Self::parallelism).
    pub fn workers(&self) -> Vec<(usize, WorkerState)> {
        self.shared.worker_states()
    }

    /// Found-key and lifecycle notifications
    pub fn events(&self) -> &Receiver<SearchEvent> {
        &self.events
    }

    /// A cloneable trigger for requesting a stop from elsewhere (e.g. a signal handler)
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            stop_flag: self.stop_flag.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Wait for the next match, optionally bounded by `timeout`.
    ///
    /// Non-match events read while waiting are discarded. Reaching the
    /// deadline is reported as [`SearchError::Timeout`]; the session keeps
    /// running.
    pub fn wait_for_found(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(FoundKey, PathBuf), SearchError> {
        let deadline = timeout.map(|t| (t, Instant::now() + t));
        loop {
            let event = match deadline {
                Some((timeout, deadline)) => match self.events.recv_deadline(deadline) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => return Err(SearchError::Timeout(timeout)),
                    Err(RecvTimeoutError::Disconnected) => return Err(SearchError::Ended),
                },
                None => self.events.recv().map_err(|_| SearchError::Ended)?,
            };

            match event {
                SearchEvent::Found { key, persisted, .. } => return Ok((key, persisted?)),
                SearchEvent::Aborted => return Err(SearchError::Aborted),
                SearchEvent::WorkerFailed { .. } | SearchEvent::Finished => continue,
            }
        }
    }

    /// Stop every worker and wait for all of them to acknowledge.
    ///
    /// Workers notice the request at their next batch boundary, so this blocks
    /// for up to one batch per worker, without a deadline. Matches already
    /// handed off are persisted and notified before it returns; nothing is
    /// notified afterwards. Calling it again is a no-op.
    pub fn stop(&mut self) {
        self.stop_signal().request();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("search dispatcher panicked");
                self.shared.set_status(SessionStatus::Stopped);
            }
        }
    }

    /// Found notifications still queued, typically read after [`stop`](Self::stop)
    /// to report matches that were handed off while the session was ending.
    pub fn drain_found(&self) -> Vec<SearchEvent> {
        self.events
            .try_iter()
            .filter(|event| matches!(event, SearchEvent::Found { .. }))
            .collect()
    }

    /// Block until the session ends on its own (match under stop-on-first,
    /// abnormal termination) or through a [`StopSignal`].
    pub fn join(mut self) -> SessionStatus {
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        self.status()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Requests a cooperative stop of one session
#[derive(Clone)]
pub struct StopSignal {
    stop_flag: Arc<AtomicBool>,
    shared: Arc<SessionShared>,
}

impl StopSignal {
    pub fn request(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }
}
