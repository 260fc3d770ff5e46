//! A trivial [`ClientCallback`] that echoes back whatever it receives.
//!
//! Grounded in the reference crate's `protocols::echo` handler, minus its
//! length-prefixed framing: this demo callback has no wire protocol of its
//! own, it just round-trips raw bytes through the outbound buffer. It
//! exists to exercise `Pool` end to end from `main.rs` and from the
//! integration tests under `tests/`.

use std::sync::Mutex;

use bytes::BytesMut;
use tracing::trace;

use crate::runtime::ClientCallback;

/// Copies every byte received into its own pending queue, then drains that
/// queue into the slot's outbound buffer on the next `on_drain`.
pub struct EchoCallback {
    pending: Mutex<BytesMut>,
}

impl EchoCallback {
    pub fn new() -> Self {
        EchoCallback {
            pending: Mutex::new(BytesMut::new()),
        }
    }
}

impl Default for EchoCallback {
    fn default() -> Self {
        EchoCallback::new()
    }
}

impl ClientCallback for EchoCallback {
    fn on_data_received(&self, bytes: &[u8]) {
        trace!(len = bytes.len(), "echo: queuing bytes for drain");
        self.pending.lock().unwrap().extend_from_slice(bytes);
    }

    fn on_drain(&self, buffer: &mut BytesMut) {
        let mut pending = self.pending.lock().unwrap();
        if !pending.is_empty() {
            buffer.extend_from_slice(&pending);
            pending.clear();
        }
    }

    fn on_socket_closed(&self) {
        trace!("echo: socket closed");
    }
}
