//! A single slot: one client socket bound to one callback, plus its
//! outbound byte queue.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;

use super::callback::ClientCallback;

/// The association of one client socket, its callback, and its outbound
/// byte buffer inside a Worker.
///
/// `Slot` does not implement `Clone`; it owns the socket and is moved
/// around inside the Worker's slot table by value (swap-with-last on
/// removal, per the data-model invariant that used slots occupy a
/// contiguous prefix of the table).
pub(crate) struct Slot {
    pub(crate) socket: TcpStream,
    pub(crate) callback: Arc<dyn ClientCallback>,
    pub(crate) outbound: OutboundBuffer,
    /// Set once a read/recv/send indicates the socket is dead. The slot is
    /// compacted out of the table on the next retirement pass; it is never
    /// serviced again once this is true.
    pub(crate) closed: bool,
    /// Latched writable readiness. `mio`'s readiness is edge-triggered, so
    /// this is set by the event loop when a writable event actually arrives
    /// for this slot's token and cleared only when a write attempt reports
    /// `WouldBlock`; it is never set speculatively. A wakeup that carries no
    /// writable event of its own (a control-handle signal from
    /// `notify_write`/`insert`/`remove`) still finds the slot writable here
    /// as long as the last *real* writable edge hasn't been followed by a
    /// `WouldBlock`, which is exactly the common case for a TCP send buffer
    /// that isn't full.
    pub(crate) writable: bool,
}

impl Slot {
    pub(crate) fn new(socket: TcpStream, callback: Arc<dyn ClientCallback>) -> Self {
        Slot {
            socket,
            callback,
            outbound: OutboundBuffer::new(),
            closed: false,
            writable: false,
        }
    }
}

/// FIFO byte queue for bytes awaiting `send`.
///
/// Backed by `bytes::BytesMut`, which already amortizes head-removal via an
/// internal offset so `consume` does not shift the remaining bytes on every
/// call; it only reclaims space once the buffer has drained far enough to
/// be worth compacting.
pub(crate) struct OutboundBuffer {
    inner: BytesMut,
}

impl OutboundBuffer {
    fn new() -> Self {
        OutboundBuffer {
            inner: BytesMut::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Give the callback direct access to append bytes via `on_drain`.
    pub(crate) fn as_bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.inner
    }

    /// Called by the callback (via `on_drain`) to append outgoing bytes.
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    /// Remove `n` bytes from the head after a successful send.
    pub(crate) fn consume(&mut self, n: usize) {
        self.inner.advance(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_buffer_extend_and_consume() {
        let mut buf = OutboundBuffer::new();
        assert!(buf.is_empty());

        buf.extend(b"hello ");
        buf.extend(b"world");
        assert_eq!(buf.as_slice(), b"hello world");

        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");

        buf.consume(5);
        assert!(buf.is_empty());
    }

    #[test]
    fn outbound_buffer_tolerates_interleaved_small_operations() {
        let mut buf = OutboundBuffer::new();
        for _ in 0..1000 {
            buf.extend(b"x");
            buf.consume(1);
        }
        assert!(buf.is_empty());
        // No unbounded growth: BytesMut's internal cursor gets reclaimed.
        assert!(buf.inner.capacity() < 4096);
    }
}
