//! Continuous sync orchestration: a polling watcher, a shared job queue and
//! a pool of transfer workers.
//!
//! The poll loop compares local and remote tree tables at a fixed cadence
//! and schedules every out-of-sync file; workers drain the queue, each over
//! its own connection, running the signature, delta and patch sequence per
//! file. Failures are logged and dropped; the next poll reschedules
//! anything still mismatched, so the cadence doubles as the retry policy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rpc::RpcClient;
use crate::sync::{Engine, TEMP_EXTENSION};
use crate::tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    InFlight,
}

/// Shared queue of files awaiting transfer.
///
/// A path is either absent, pending, or in flight. Scheduling is level
/// triggered: a path already known is left alone, so repeated polls cannot
/// queue duplicate work, and a file being transferred is not re-queued
/// until its worker completes it.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<HashMap<String, JobState>>,
    ready: Condvar,
    stop: AtomicBool,
}

impl JobQueue {
    /// Fresh empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobState>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a path pending. Returns `false` if it was already queued or in
    /// flight.
    pub fn schedule(&self, path: &str) -> bool {
        let mut jobs = self.lock();
        if jobs.contains_key(path) {
            return false;
        }
        jobs.insert(path.to_owned(), JobState::Pending);
        drop(jobs);
        self.ready.notify_one();
        true
    }

    /// Take the next pending path, blocking until one exists.
    ///
    /// The path is marked in flight under the same lock, so no two workers
    /// can hold the same path. Returns `None` once the queue is shut down.
    pub fn claim(&self) -> Option<String> {
        let mut jobs = self.lock();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return None;
            }
            let pending = jobs
                .iter()
                .find(|(_, state)| **state == JobState::Pending)
                .map(|(path, _)| path.clone());
            if let Some(path) = pending {
                jobs.insert(path.clone(), JobState::InFlight);
                return Some(path);
            }
            jobs = self.ready.wait(jobs).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Forget a path entirely, successful or not. The next poll may
    /// schedule it again.
    pub fn complete(&self, path: &str) {
        self.lock().remove(path);
    }

    /// Stop the queue: blocked and future claims return `None`. In-flight
    /// jobs are not interrupted.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.ready.notify_all();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Number of known paths, pending plus in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no path is queued or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Poll/worker driver that keeps a remote tree mirroring a local one.
#[derive(Debug, Clone)]
pub struct Watcher {
    root: PathBuf,
    host: String,
    port: u16,
    engine: Engine,
    workers: usize,
    interval: Duration,
}

impl Watcher {
    /// Default number of transfer workers.
    pub const DEFAULT_WORKERS: usize = 4;
    /// Default poll interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    /// Watcher for a local root and a remote server, with default engine,
    /// worker count and poll interval.
    #[must_use]
    pub fn new(root: PathBuf, host: impl Into<String>, port: u16) -> Self {
        Self {
            root,
            host: host.into(),
            port,
            engine: Engine::new(),
            workers: Self::DEFAULT_WORKERS,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    /// Replace the engine (window size).
    #[must_use]
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Set the worker pool size; clamped to at least one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the queue is shut down.
    ///
    /// Spawns the worker pool, then polls at the configured cadence on the
    /// calling thread. A failed poll logs, reconnects and waits for the
    /// next tick; workers that lose their connection reconnect per job.
    ///
    /// # Errors
    ///
    /// Returns an error only if the initial poll connection cannot be
    /// established; the queue is shut down and the workers joined before
    /// the error is reported.
    pub fn run(&self, queue: &Arc<JobQueue>) -> Result<()> {
        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let watcher = self.clone();
            let queue = Arc::clone(queue);
            handles.push(
                thread::Builder::new()
                    .name(format!("blocksync-worker-{id}"))
                    .spawn(move || watcher.worker_loop(&queue))
                    .map_err(Error::from)?,
            );
        }

        let mut client = match RpcClient::connect(&self.host, self.port) {
            Ok(client) => client,
            Err(err) => {
                // don't strand the workers in claim()
                queue.shutdown();
                for handle in handles {
                    let _ = handle.join();
                }
                return Err(err);
            }
        };
        info!(root = %self.root.display(), host = %self.host, port = self.port, "watching");
        while !queue.is_shutdown() {
            if let Err(err) = self.poll_once(&mut client, queue) {
                warn!(error = %err, "poll failed, will retry");
                if let Ok(fresh) = RpcClient::connect(&self.host, self.port) {
                    client = fresh;
                }
            }
            thread::sleep(self.interval);
        }

        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }

    /// One poll iteration: reconcile directories, prune remote extras,
    /// drop stale staging files and schedule every mismatched file.
    ///
    /// # Errors
    ///
    /// Any RPC or filesystem error aborts the iteration; the caller retries
    /// on the next tick.
    pub fn poll_once(&self, client: &mut RpcClient, queue: &JobQueue) -> Result<()> {
        let remote_dirs = client.dirs()?;
        let local_dirs = tree::dirs(&self.root)?;

        for dir in remote_dirs.difference(&local_dirs) {
            debug!(dir, "removing remote directory");
            client.rmdir(dir)?;
        }
        for dir in &local_dirs {
            client.mkdir(dir)?;
        }

        let remote_files = client.files()?;
        let local_files = tree::files(&self.root)?;

        for path in remote_files.keys() {
            if !local_files.contains_key(path) {
                debug!(path, "removing remote file");
                client.rmdir(path)?;
            }
        }

        for (path, meta) in &local_files {
            if path.ends_with(TEMP_EXTENSION) {
                // leftover staging file from an interrupted patch
                tree::remove_all(&self.root.join(path))?;
                continue;
            }
            if remote_files.get(path) == Some(meta) {
                continue;
            }
            if queue.schedule(path) {
                debug!(path, "scheduled");
            }
        }
        Ok(())
    }

    /// Transfer one file: fetch its remote signature, compute the local
    /// delta, send the patch.
    ///
    /// # Errors
    ///
    /// RPC and I/O failures, and [`Error::Protocol`] when the server
    /// reports the patch did not apply.
    pub fn sync_path(&self, client: &mut RpcClient, path: &str) -> Result<()> {
        let signature = client.signature(path)?;
        let delta = self.engine.delta_file(&self.root.join(path), &signature)?;
        debug!(
            path,
            copied = delta.bytes_copied(),
            literal = delta.bytes_literal(),
            "delta computed"
        );
        if !client.patch(path, &delta)? {
            return Err(Error::Protocol(format!("server rejected patch of {path}")));
        }
        Ok(())
    }

    fn worker_loop(&self, queue: &JobQueue) {
        let mut client: Option<RpcClient> = None;
        while let Some(path) = queue.claim() {
            let result = match connected(&mut client, &self.host, self.port) {
                Ok(c) => self.sync_path(c, &path),
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => info!(path, "synced"),
                Err(err) => {
                    warn!(path, error = %err, "sync failed");
                    // force a fresh connection for the next job
                    client = None;
                }
            }
            queue.complete(&path);
        }
    }
}

/// Connection cache for a worker: reuse if alive, dial otherwise.
fn connected<'a>(
    slot: &'a mut Option<RpcClient>,
    host: &str,
    port: u16,
) -> Result<&'a mut RpcClient> {
    match slot {
        Some(client) => Ok(client),
        None => Ok(slot.insert(RpcClient::connect(host, port)?)),
    }
}
