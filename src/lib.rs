//! socket-threads: a worker-pool socket multiplexer.
//!
//! Owns client TCP connections, distributes them across a small pool of
//! I/O worker threads, and bridges each connection to an upper-layer
//! protocol handler through the [`ClientCallback`] contract. See
//! SPEC_FULL.md for the full design.

pub mod echo;
pub mod error;
mod runtime;

pub use error::WorkerStartError;
pub use runtime::{raw_fd_of, ClientCallback, Pool, SLOTS_PER_WORKER};
