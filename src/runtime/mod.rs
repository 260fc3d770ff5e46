//! Worker-pool socket multiplexer.
//!
//! `Pool` owns a list of `Worker`s, each a single thread running a
//! readiness loop over up to `worker::SLOTS_PER_WORKER` client sockets. See
//! SPEC_FULL.md for the full component design.

mod callback;
mod pool;
mod slot;
mod worker;

pub use callback::ClientCallback;
pub use pool::{raw_fd_of, Pool};
pub use worker::SLOTS_PER_WORKER;
