//! Shared helpers for in-crate tests.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dmx::DatagramSink;

/// Shared handle to datagrams recorded by a [`RecordingSink`].
pub(crate) type Sent = Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>;

/// A [`DatagramSink`] that records every datagram instead of sending it.
pub(crate) struct RecordingSink {
    sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
    fail: bool,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// A sink whose sends always fail, for error-path tests.
    pub(crate) fn failing() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    /// Shared handle to the recorded datagrams.
    pub(crate) fn sent(&self) -> Sent {
        self.sent.clone()
    }
}

impl DatagramSink for RecordingSink {
    fn try_send_to(&self, payload: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "recording sink set to fail",
            ));
        }
        self.sent.lock().push((dest, payload.to_vec()));
        Ok(payload.len())
    }
}
