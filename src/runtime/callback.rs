//! The contract between the socket multiplexer and the upper protocol layer.
//!
//! A `ClientCallback` is owned by the upper layer and handed to `Pool::attach`
//! as a shared, non-owning reference. The pool never outlives a callback it
//! doesn't control, and never calls into it once `on_socket_closed` has run.

use bytes::BytesMut;

/// Per-connection hook implemented by whatever sits above the multiplexer
/// (packet parser, game session, echo test harness, ...).
///
/// All three methods are invoked on a Worker thread while `pool.lock` is
/// held. Implementations must be quick: buffer work into your own queue and
/// hand it to another thread rather than doing anything expensive here.
/// Calling back into the `Pool` from inside one of these methods in a way
/// that would require re-acquiring `pool.lock` will deadlock; this is
/// undefined behavior by contract, not something the pool detects.
pub trait ClientCallback: Send + Sync {
    /// Bytes arrived on the socket, in socket order. Called zero or more
    /// times before `on_socket_closed`. `bytes` is never empty.
    fn on_data_received(&self, bytes: &[u8]);

    /// The socket is writable and the slot's outbound buffer is empty.
    /// Append zero or more bytes to `buffer`; leaving it empty means
    /// "nothing to send right now".
    fn on_drain(&self, buffer: &mut BytesMut);

    /// Called exactly once per slot lifetime, after the last successful
    /// `on_data_received`. The slot is considered dead once this returns.
    fn on_socket_closed(&self);
}
