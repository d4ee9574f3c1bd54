//! Fixed worker pool for eager patching
//!
//! Each worker owns one queue. Jobs are assigned by hashing the unit id, so a
//! unit is only ever handled by one worker and its declarations are applied
//! in order. The first failure raises a shared abort flag; workers finish the
//! job in hand and drain nothing further.

use crate::error::LoaderError;
use crossbeam::channel::{self, Receiver};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, warn};

/// Pool of scoped worker threads
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

struct WorkerOutcome<T> {
    done: Vec<(String, T)>,
    failure: Option<(String, LoaderError)>,
}

impl WorkerPool {
    /// Create a pool
    ///
    /// If workers is 0, defaults to the number of CPU cores
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 { num_cpus::get() } else { workers };
        Self { workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Worker that owns `id`
    pub fn worker_for(&self, id: &str) -> usize {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        (hasher.finish() % self.workers as u64) as usize
    }

    /// Run `work` once per job and collect the results sorted by id
    ///
    /// On failure, the error of the smallest failing id is returned. Failures
    /// that only report an earlier abort rank after the one that caused it.
    pub fn run<T, F>(
        &self,
        jobs: impl IntoIterator<Item = String>,
        work: F,
    ) -> Result<Vec<(String, T)>, LoaderError>
    where
        T: Send,
        F: Fn(&str) -> Result<T, LoaderError> + Sync,
    {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..self.workers)
            .map(|_| channel::unbounded::<String>())
            .unzip();
        for job in jobs {
            let slot = self.worker_for(&job);
            senders[slot].send(job).map_err(|e| {
                LoaderError::Worker(format!("queue {} closed before '{}' was sent", slot, e.0))
            })?;
        }
        drop(senders);

        let abort = AtomicBool::new(false);
        let (joined, spawn_error) = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);
            let mut spawn_error = None;
            for (index, queue) in receivers.into_iter().enumerate() {
                let abort = &abort;
                let work = &work;
                let spawned = thread::Builder::new()
                    .name(format!("weft-worker-{}", index))
                    .spawn_scoped(scope, move || worker_loop(index, queue, abort, work));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        abort.store(true, Ordering::Release);
                        spawn_error = Some(LoaderError::Worker(format!(
                            "failed to spawn worker {}: {}",
                            index, e
                        )));
                        break;
                    }
                }
            }
            let joined: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
            (joined, spawn_error)
        });

        let mut done = Vec::new();
        let mut failures = Vec::new();
        let mut panicked = None;
        for (index, outcome) in joined.into_iter().enumerate() {
            match outcome {
                Ok(outcome) => {
                    done.extend(outcome.done);
                    failures.extend(outcome.failure);
                }
                Err(_) if panicked.is_none() => {
                    panicked = Some(LoaderError::Worker(format!("worker {} panicked", index)));
                }
                Err(_) => {}
            }
        }

        let cause = failures
            .into_iter()
            .min_by_key(|(id, error)| (matches!(error, LoaderError::Aborted { .. }), id.clone()));
        if let Some((id, error)) = cause {
            warn!(unit = %id, "patching aborted");
            return Err(error);
        }
        if let Some(error) = panicked.or(spawn_error) {
            return Err(error);
        }

        done.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(done)
    }
}

fn worker_loop<T, F>(
    index: usize,
    queue: Receiver<String>,
    abort: &AtomicBool,
    work: &F,
) -> WorkerOutcome<T>
where
    F: Fn(&str) -> Result<T, LoaderError>,
{
    let mut outcome = WorkerOutcome {
        done: Vec::new(),
        failure: None,
    };
    for id in queue.iter() {
        if abort.load(Ordering::Acquire) {
            break;
        }
        debug!(worker = index, unit = %id, "job started");
        match work(&id) {
            Ok(value) => outcome.done.push((id, value)),
            Err(error) => {
                abort.store(true, Ordering::Release);
                outcome.failure = Some((id, error));
                break;
            }
        }
    }
    outcome
}
