//! The process-wide owner of all Workers.
//!
//! `Pool` is the only public entry point into this crate. Every operation
//! serializes on a single mutex (`pool.lock` in the design notes); the
//! critical sections are short (pointer compares, at most one wakeup
//! signal, or handing a socket to a freshly-spawned thread), so a single
//! lock for the whole pool is the right trade: it keeps each Worker's
//! readiness loop trivially correct, since while it holds the lock, no
//! slot can be added or removed behind its back.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;
use tracing::{debug, error, info};

use crate::runtime::callback::ClientCallback;
use crate::runtime::worker::WorkerState;

pub(crate) struct PoolInner {
    workers: Vec<WorkerState>,
}

impl PoolInner {
    pub(crate) fn worker_mut(&mut self, worker_id: usize) -> Option<&mut WorkerState> {
        self.workers.get_mut(worker_id)
    }
}

/// Owns all Workers and assigns new connections to them.
///
/// Construct one `Pool` per process (typically wrapped in `Arc<Pool>` so
/// every thread, including a Worker's own callbacks, can reach
/// `attach`/`detach_by_socket`/`detach_by_callback`/`notify_write`).
/// Dropping the `Pool` asks every Worker to stop after its current
/// iteration and joins their threads.
pub struct Pool {
    inner: Arc<Mutex<PoolInner>>,
}

impl Pool {
    pub fn new() -> Self {
        Pool {
            inner: Arc::new(Mutex::new(PoolInner { workers: Vec::new() })),
        }
    }

    /// Bind `socket` to `callback` and hand it to a Worker. Returns `false`
    /// only if a new Worker had to be created and its readiness primitive
    /// or control handle failed to start; the caller is responsible for
    /// not attaching the same socket or callback twice (doing so violates
    /// the one-slot-per-socket / one-slot-per-callback invariants and is
    /// undefined).
    pub fn attach(&self, socket: TcpStream, callback: Arc<dyn ClientCallback>) -> bool {
        let mut inner = self.inner.lock().unwrap();

        if let Some(worker) = inner.workers.iter_mut().find(|w| w.has_empty_slot()) {
            return match worker.insert(socket, callback) {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "failed to register socket with existing worker");
                    false
                }
            };
        }

        let worker_id = inner.workers.len();
        info!(worker_id, existing_workers = worker_id, "spawning new worker");
        match WorkerState::spawn(Arc::clone(&self.inner), worker_id, socket, callback) {
            Ok(worker) => {
                inner.workers.push(worker);
                true
            }
            Err(e) => {
                error!(worker_id, error = %e, "failed to start new worker");
                false
            }
        }
    }

    /// Remove the slot holding `socket`, identified by its raw file
    /// descriptor (the caller must have captured this before attaching,
    /// since `attach` takes ownership of the socket). A missing fd is a
    /// no-op.
    pub fn detach_by_socket(&self, socket: RawFd) -> bool {
        let mut inner = self.inner.lock().unwrap();
        for worker in inner.workers.iter_mut() {
            if worker.remove_by_socket(socket) {
                debug!(fd = socket, "detached by socket");
                return true;
            }
        }
        false
    }

    /// Remove the slot holding `callback`, identified by pointer identity.
    /// A callback not currently attached is a no-op.
    pub fn detach_by_callback(&self, callback: &Arc<dyn ClientCallback>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        for worker in inner.workers.iter_mut() {
            if worker.remove_by_callback(callback) {
                debug!("detached by callback");
                return true;
            }
        }
        false
    }

    /// Wake the Worker responsible for `callback` so it re-evaluates that
    /// slot's outbound buffer via `on_drain`. Silently does nothing if the
    /// callback is not currently attached (it may have raced a detach).
    pub fn notify_write(&self, callback: &Arc<dyn ClientCallback>) {
        let inner = self.inner.lock().unwrap();
        for worker in inner.workers.iter() {
            if worker.notify_write(callback) {
                return;
            }
        }
    }

    /// Number of Workers currently in the pool. Exposed for tests and
    /// diagnostics; not part of the subsystem's conceptual contract.
    pub fn worker_count(&self) -> usize {
        self.inner.lock().unwrap().workers.len()
    }

    /// Slot counts per worker, in worker-creation order. Exposed for tests.
    pub fn slot_counts(&self) -> Vec<usize> {
        self.inner
            .lock()
            .unwrap()
            .workers
            .iter()
            .map(|w| w.slot_count())
            .collect()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Pool::new()
    }
}

/// Convenience for callers that captured a socket's fd before attaching.
pub fn raw_fd_of(socket: &TcpStream) -> RawFd {
    socket.as_raw_fd()
}

impl Drop for Pool {
    fn drop(&mut self) {
        let handles: Vec<_> = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .workers
                .iter_mut()
                .filter_map(|w| w.begin_shutdown())
                .collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}
