//! One I/O thread servicing up to `SLOTS_PER_WORKER` client sockets plus a
//! control wakeup handle, using a single blocking readiness wait per loop
//! iteration.
//!
//! See SPEC_FULL.md §9a for why the control handle is a `mio::Waker`
//! rather than a hand-rolled loopback socket pair, and why that collapses
//! the source material's two-phase (blocking read `select`, zero-timeout
//! write `select`) loop into one blocking `mio::Poll::poll` per iteration.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, trace, warn};

use crate::error::WorkerStartError;
use crate::runtime::callback::ClientCallback;
use crate::runtime::pool::PoolInner;
use crate::runtime::slot::Slot;

/// How many clients one worker thread handles. Kept as the reference value
/// from the source material even though nothing here forces it the way
/// `FD_SETSIZE` forced it on a `select`-based implementation.
pub const SLOTS_PER_WORKER: usize = 63;

/// Bytes read per `recv` call.
const READ_BUFFER_SIZE: usize = 1024;

/// Reserved token for the per-worker control wakeup handle. `slots.len()`
/// never approaches `usize::MAX`, so this can never collide with a slot's
/// index-derived token.
const CONTROL_TOKEN: Token = Token(usize::MAX);

/// Everything the pool-wide lock protects for one worker: its slot table
/// and the handles needed to keep the readiness primitive's registrations
/// consistent with that table. The `Poll` object itself is *not* here — it
/// lives solely on the worker's own thread, since only that thread ever
/// blocks on it.
pub(crate) struct WorkerState {
    slots: Vec<Slot>,
    registry: Registry,
    waker: Arc<mio::Waker>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerState {
    /// Create the readiness primitive, register its control handle and an
    /// initial socket, then launch the worker thread. Mirrors `AddClient`
    /// immediately followed by `Start` in the source material, reordered
    /// so the thread only ever observes a fully-initialized slot table.
    pub(crate) fn spawn(
        inner: Arc<Mutex<PoolInner>>,
        worker_id: usize,
        mut socket: TcpStream,
        callback: Arc<dyn ClientCallback>,
    ) -> Result<WorkerState, WorkerStartError> {
        let poll = Poll::new().map_err(WorkerStartError::PollCreate)?;
        let waker = Arc::new(
            mio::Waker::new(poll.registry(), CONTROL_TOKEN).map_err(WorkerStartError::WakerCreate)?,
        );
        let registry = poll
            .registry()
            .try_clone()
            .map_err(WorkerStartError::WakerCreate)?;

        registry
            .register(&mut socket, Token(0), Interest::READABLE | Interest::WRITABLE)
            .map_err(WorkerStartError::Register)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name(format!("socket-worker-{worker_id}"))
            .spawn(move || run(inner, worker_id, poll, thread_shutdown))
            .map_err(WorkerStartError::ThreadSpawn)?;

        Ok(WorkerState {
            slots: vec![Slot::new(socket, callback)],
            registry,
            waker,
            shutdown,
            thread: Some(thread),
        })
    }

    pub(crate) fn has_empty_slot(&self) -> bool {
        self.slots.len() < SLOTS_PER_WORKER
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Insert a second-or-later client into an already-running worker.
    /// Asserts a free slot exists; the caller (`Pool::attach`) must have
    /// checked `has_empty_slot` first.
    pub(crate) fn insert(
        &mut self,
        mut socket: TcpStream,
        callback: Arc<dyn ClientCallback>,
    ) -> io::Result<()> {
        debug_assert!(self.has_empty_slot(), "insert called on a full worker");
        let idx = self.slots.len();
        self.registry
            .register(&mut socket, Token(idx), Interest::READABLE | Interest::WRITABLE)?;
        self.slots.push(Slot::new(socket, callback));
        // 'a' (attach): wake the loop so it picks up the new slot.
        trace!(slot = idx, "waking worker: attach");
        let _ = self.waker.wake();
        Ok(())
    }

    pub(crate) fn remove_by_socket(&mut self, target: RawFd) -> bool {
        match self.slots.iter().rposition(|s| s.socket.as_raw_fd() == target) {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_by_callback(&mut self, target: &Arc<dyn ClientCallback>) -> bool {
        match self
            .slots
            .iter()
            .rposition(|s| Arc::ptr_eq(&s.callback, target))
        {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn notify_write(&self, target: &Arc<dyn ClientCallback>) -> bool {
        if self.slots.iter().any(|s| Arc::ptr_eq(&s.callback, target)) {
            // 'q' (write-wanted)
            trace!("waking worker: write-wanted");
            let _ = self.waker.wake();
            true
        } else {
            false
        }
    }

    /// Swap-with-last removal (invariant 3): the removed slot is replaced
    /// by the current last slot, which keeps used slots contiguous at
    /// `[0, slot_count)`. The slot that moved must be re-registered under
    /// its new index-derived token.
    fn remove_at(&mut self, idx: usize) {
        let mut removed = self.slots.swap_remove(idx);
        let _ = self.registry.deregister(&mut removed.socket);
        if idx < self.slots.len() {
            let moved = &mut self.slots[idx];
            let _ = self
                .registry
                .reregister(&mut moved.socket, Token(idx), Interest::READABLE | Interest::WRITABLE);
        }
        // 'r' (remove)
        trace!(slot = idx, "waking worker: remove");
        let _ = self.waker.wake();
    }

    /// Signal the worker to stop after its current iteration and wake it
    /// so it observes the flag promptly.
    pub(crate) fn begin_shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.waker.wake();
        self.thread.take()
    }
}

/// The worker thread's entire lifetime.
fn run(inner: Arc<Mutex<PoolInner>>, worker_id: usize, mut poll: Poll, shutdown: Arc<AtomicBool>) {
    let mut events = Events::with_capacity(SLOTS_PER_WORKER + 1);

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(worker_id, error = %e, "readiness wait failed, retrying");
                continue;
            }
        }

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = inner.lock().unwrap();
        let state = match guard.worker_mut(worker_id) {
            Some(state) => state,
            None => break,
        };

        // Step 3 (reads): only sockets mio actually reported readable, each
        // drained to `WouldBlock` since the readiness is edge-triggered.
        for event in events.iter() {
            if event.token() == CONTROL_TOKEN {
                // Informational only; the act of waking is the signal.
                continue;
            }

            let idx = event.token().0;
            if idx >= state.slots.len() {
                // Stale event for a slot retired earlier this pass.
                continue;
            }

            if event.is_writable() {
                state.slots[idx].writable = true;
            }
            if event.is_readable() && !state.slots[idx].closed {
                service_read(state, idx);
            }
        }

        // Steps 4-5 (writes): only slots whose latched `writable` flag is
        // set, i.e. a real writable edge was observed and no write attempt
        // since has hit `WouldBlock`. A control-handle wakeup from
        // `notify_write`/`insert`/`remove` carries no writable event of its
        // own, but it still re-checks every such slot here, which is what
        // lets a deferred `on_drain` flush once the kernel has room —
        // without ever invoking the callback for a slot that isn't
        // actually reported writable.
        for idx in 0..state.slots.len() {
            if !state.slots[idx].closed && state.slots[idx].writable {
                service_write(state, idx);
            }
        }

        retire_closed_slots(state);
    }

    debug!(worker_id, "worker thread terminating");
}

/// Drains the socket until `WouldBlock`, `0`, or a hard error. Required
/// because `mio`'s readiness is edge-triggered: a single bounded `read`
/// per readable event would strand any remainder past
/// `READ_BUFFER_SIZE` in the kernel buffer with no further readable edge
/// to wake the worker until more data (or a FIN) arrives.
fn service_read(state: &mut WorkerState, idx: usize) {
    let callback = Arc::clone(&state.slots[idx].callback);
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        if state.slots[idx].closed {
            return;
        }

        let result = state.slots[idx].socket.read(&mut buf);
        match result {
            Ok(0) => {
                mark_closed(state, idx, &callback);
                return;
            }
            Ok(n) => callback.on_data_received(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(slot = idx, error = %e, "read error, closing slot");
                mark_closed(state, idx, &callback);
                return;
            }
        }
    }
}

/// Only called for slots whose latched `writable` flag is set (see
/// `Slot::writable`); clears that flag on `WouldBlock` so the slot is not
/// serviced again until a real writable edge re-latches it.
fn service_write(state: &mut WorkerState, idx: usize) {
    let callback = Arc::clone(&state.slots[idx].callback);

    if state.slots[idx].outbound.is_empty() {
        callback.on_drain(state.slots[idx].outbound.as_bytes_mut());
        if state.slots[idx].outbound.is_empty() {
            return;
        }
    }

    let result = {
        let slot = &mut state.slots[idx];
        slot.socket.write(slot.outbound.as_slice())
    };

    match result {
        Ok(0) => mark_closed(state, idx, &callback),
        Ok(n) => state.slots[idx].outbound.consume(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            state.slots[idx].writable = false;
        }
        Err(e) => {
            warn!(slot = idx, error = %e, "write error, closing slot");
            mark_closed(state, idx, &callback);
        }
    }
}

/// Invariant 5: never call `on_socket_closed` twice for the same slot.
fn mark_closed(state: &mut WorkerState, idx: usize, callback: &Arc<dyn ClientCallback>) {
    let slot = &mut state.slots[idx];
    if slot.closed {
        return;
    }
    slot.closed = true;
    callback.on_socket_closed();
}

/// Compact invalidated slots out of the table, swapping each with the
/// current last used slot so used slots stay contiguous at `[0, count)`.
fn retire_closed_slots(state: &mut WorkerState) {
    let mut i = 0;
    while i < state.slots.len() {
        if state.slots[i].closed {
            let mut removed = state.slots.swap_remove(i);
            let _ = state.registry.deregister(&mut removed.socket);
            if i < state.slots.len() {
                let moved = &mut state.slots[i];
                let _ = state.registry.reregister(
                    &mut moved.socket,
                    Token(i),
                    Interest::READABLE | Interest::WRITABLE,
                );
            }
            // Re-check index i: it now holds a different slot (or none).
        } else {
            i += 1;
        }
    }
}
