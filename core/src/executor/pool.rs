//! Worker pool for asynchronous calls.
//!
//! # Design
//! Calls are blocking ureq round-trips, so the pool is tokio's blocking
//! thread pool: threads are spawned on demand up to `max_workers` and
//! reclaimed after `worker_idle` without work. The runtime is built on the
//! first submission; a client that never makes an async call never starts a
//! thread.
//!
//! In-flight work is counted under a mutex with a condvar, so shutdown can
//! wait for it with a deadline and report what was left behind.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Runtime};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("failed to start worker pool: {0}")]
    Runtime(#[from] io::Error),
}

/// What a pool shutdown observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    pub completed: usize,
    pub abandoned: usize,
}

#[derive(Default)]
struct Counts {
    in_flight: usize,
    completed: usize,
}

#[derive(Default)]
struct Tracker {
    counts: Mutex<Counts>,
    idle: Condvar,
}

/// Marks one task as finished when dropped, panics included.
struct InFlight(Arc<Tracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut counts = self.0.counts.lock();
        counts.in_flight -= 1;
        counts.completed += 1;
        if counts.in_flight == 0 {
            self.0.idle.notify_all();
        }
    }
}

struct State {
    accepting: bool,
    runtime: Option<Runtime>,
}

pub struct WorkerPool {
    max_workers: usize,
    worker_idle: Duration,
    state: Mutex<State>,
    tracker: Arc<Tracker>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, worker_idle: Duration) -> Self {
        Self {
            max_workers: max_workers.max(1),
            worker_idle,
            state: Mutex::new(State {
                accepting: true,
                runtime: None,
            }),
            tracker: Arc::new(Tracker::default()),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.counts.lock().in_flight
    }

    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<(), SubmitError> {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(SubmitError::Closed);
        }
        if state.runtime.is_none() {
            state.runtime = Some(self.build_runtime()?);
        }
        let Some(runtime) = state.runtime.as_ref() else {
            return Err(SubmitError::Closed);
        };

        self.tracker.counts.lock().in_flight += 1;
        let guard = InFlight(Arc::clone(&self.tracker));
        runtime.spawn_blocking(move || {
            let _guard = guard;
            task();
        });
        Ok(())
    }

    fn build_runtime(&self) -> io::Result<Runtime> {
        tracing::debug!(max_workers = self.max_workers, "starting worker pool");
        Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.max_workers)
            .thread_keep_alive(self.worker_idle)
            .thread_name("wirecall-worker")
            .build()
    }

    /// Stop accepting work, wait up to `grace` for in-flight work, then drop
    /// the runtime without waiting further. Later calls report zero
    /// abandoned work.
    pub fn shutdown(&self, grace: Duration) -> PoolReport {
        let runtime = {
            let mut state = self.state.lock();
            state.accepting = false;
            state.runtime.take()
        };

        let deadline = Instant::now() + grace;
        let report = {
            let mut counts = self.tracker.counts.lock();
            while counts.in_flight > 0 {
                if self.tracker.idle.wait_until(&mut counts, deadline).timed_out() {
                    break;
                }
            }
            PoolReport {
                completed: counts.completed,
                abandoned: counts.in_flight,
            }
        };

        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        if report.abandoned > 0 {
            tracing::warn!(abandoned = report.abandoned, "worker pool shut down with work in flight");
        }
        report
    }
}
