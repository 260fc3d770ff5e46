//! Construction-failure error types.
//!
//! Per the error handling design, construction failures are the only kind
//! that ever leave the worker pool: they surface as a `false` return from
//! `Pool::attach`, with the underlying cause logged at the call site and
//! also available here for callers that want to inspect it directly.

use std::fmt;
use std::io;

/// Reason a Worker failed to start.
///
/// Mirrors the three-step handshake in the source material (create the
/// control-socket listener, bind it, accept/connect it) collapsed onto this
/// crate's readiness primitive: creating the `Poll` and registering its
/// `Waker` are the only two fallible steps left once the control handle is
/// an event rather than a socket pair (see SPEC_FULL.md §9a).
#[derive(Debug)]
pub enum WorkerStartError {
    /// The worker's readiness primitive (`mio::Poll`) could not be created.
    PollCreate(io::Error),
    /// The worker's control wakeup handle (`mio::Waker`) could not be
    /// registered with the readiness primitive.
    WakerCreate(io::Error),
    /// The initial socket could not be registered with the readiness
    /// primitive once the worker was otherwise ready.
    Register(io::Error),
    /// The OS thread for the worker's readiness loop could not be spawned.
    ThreadSpawn(io::Error),
}

impl fmt::Display for WorkerStartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStartError::PollCreate(e) => write!(f, "failed to create readiness primitive: {e}"),
            WorkerStartError::WakerCreate(e) => write!(f, "failed to register control wakeup handle: {e}"),
            WorkerStartError::Register(e) => write!(f, "failed to register socket with worker: {e}"),
            WorkerStartError::ThreadSpawn(e) => write!(f, "failed to spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for WorkerStartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerStartError::PollCreate(e)
            | WorkerStartError::WakerCreate(e)
            | WorkerStartError::Register(e)
            | WorkerStartError::ThreadSpawn(e) => Some(e),
        }
    }
}
