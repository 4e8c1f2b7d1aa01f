//! Elastic worker pool on plain threads.
//!
//! Jobs go through an unbounded crossbeam queue. A worker is spawned when a
//! job arrives and nobody is idle, up to `max`; workers above `min` exit
//! after sitting idle for `idle_timeout`. Shutdown lets queued jobs finish
//! and rejects new ones.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sizing of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max: usize,
    pub min: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max: 8,
            min: 1,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct PoolState {
    workers: usize,
    idle: usize,
    handles: Vec<JoinHandle<()>>,
}

struct PoolInner {
    config: PoolConfig,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    state: Mutex<PoolState>,
    spawned: AtomicUsize,
}

/// Shared handle to the pool; clones submit to the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (sender, receiver) = unbounded();
        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                sender: Mutex::new(Some(sender)),
                receiver,
                state: Mutex::new(PoolState::default()),
                spawned: AtomicUsize::new(0),
            }),
        };
        {
            let mut state = pool.inner.state.lock();
            for _ in 0..config.min.min(config.max) {
                spawn_worker(&pool.inner, &mut state);
            }
        }
        pool
    }

    /// Queue `job`; fails with [`TransportError::Closed`] after shutdown.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let sender = self.inner.sender.lock();
            let sender = sender.as_ref().ok_or(TransportError::Closed)?;
            sender
                .send(Box::new(job))
                .map_err(|_| TransportError::Closed)?;
        }

        let mut state = self.inner.state.lock();
        if state.idle == 0 && state.workers < self.inner.config.max {
            spawn_worker(&self.inner, &mut state);
        }
        Ok(())
    }

    /// Live worker threads.
    pub fn workers(&self) -> usize {
        self.inner.state.lock().workers
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.receiver.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Stop accepting jobs, let queued ones run, and join the workers.
    ///
    /// Safe to call from inside a job; the calling worker is not joined.
    pub fn shutdown(&self) {
        if self.inner.sender.lock().take().is_none() {
            return;
        }
        let handles = std::mem::take(&mut self.inner.state.lock().handles);
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        debug!("worker pool shut down");
    }
}

fn spawn_worker(inner: &Arc<PoolInner>, state: &mut PoolState) {
    let number = inner.spawned.fetch_add(1, Ordering::Relaxed);
    let worker = Arc::clone(inner);
    let spawned = thread::Builder::new()
        .name(format!("spacebus-worker-{number}"))
        .spawn(move || worker_loop(&worker));
    match spawned {
        Ok(handle) => {
            state.workers += 1;
            state.handles.retain(|h| !h.is_finished());
            state.handles.push(handle);
        }
        Err(err) => warn!(error = %err, "failed to spawn worker thread"),
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        inner.state.lock().idle += 1;
        let received = inner.receiver.recv_timeout(inner.config.idle_timeout);
        let mut state = inner.state.lock();
        state.idle -= 1;
        match received {
            Ok(job) => {
                // A submitter may have counted this worker as idle.
                if state.idle == 0
                    && !inner.receiver.is_empty()
                    && state.workers < inner.config.max
                {
                    spawn_worker(inner, &mut state);
                }
                drop(state);
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("worker job panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if inner.receiver.is_empty() && state.workers > inner.config.min {
                    state.workers -= 1;
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                state.workers -= 1;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use super::*;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn runs_every_submitted_job() {
        let pool = WorkerPool::new(PoolConfig {
            max: 4,
            min: 1,
            idle_timeout: Duration::from_secs(1),
        });
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit should succeed");
        }
        assert!(wait_until(|| done.load(Ordering::SeqCst) == 100));
        assert!(pool.workers() <= 4);
        pool.shutdown();
    }

    #[test]
    fn shutdown_drains_queue_and_rejects_new_jobs() {
        let pool = WorkerPool::new(PoolConfig {
            max: 1,
            min: 1,
            idle_timeout: Duration::from_secs(1),
        });
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(2));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit should succeed");
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(pool.is_shut_down());
        assert!(matches!(pool.submit(|| {}), Err(TransportError::Closed)));
        pool.shutdown();
    }

    #[test]
    fn idle_workers_above_minimum_retire() {
        let pool = WorkerPool::new(PoolConfig {
            max: 4,
            min: 0,
            idle_timeout: Duration::from_millis(20),
        });
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit should succeed");
        }
        assert!(wait_until(|| done.load(Ordering::SeqCst) == 8));
        assert!(wait_until(|| pool.workers() == 0));

        let flag = Arc::clone(&done);
        pool.submit(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .expect("pool should respawn after retiring");
        assert!(wait_until(|| done.load(Ordering::SeqCst) == 9));
        pool.shutdown();
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(PoolConfig {
            max: 1,
            min: 1,
            idle_timeout: Duration::from_secs(1),
        });
        pool.submit(|| panic!("job failure")).expect("submit should succeed");
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        pool.submit(move || {
            flag.store(1, Ordering::SeqCst);
        })
        .expect("submit should succeed");
        assert!(wait_until(|| done.load(Ordering::SeqCst) == 1));
        assert_eq!(pool.workers(), 1);
        pool.shutdown();
    }
}
