use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use growroom_api::Envelope;
use growroom_api::transport::TransportError;
use parking_lot::Mutex;

use crate::connection::Transport;
use crate::error::Result;

/// Records emitted envelopes and reconnect requests.
#[derive(Default)]
pub(crate) struct MockTransport {
    connected: AtomicBool,
    fail_emit: AtomicBool,
    reconnects: AtomicUsize,
    emitted: Mutex<Vec<Envelope>>,
}

impl MockTransport {
    pub fn connected() -> Arc<Self> {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_fail_emit(&self, fail: bool) {
        self.fail_emit.store(fail, Ordering::SeqCst);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn emitted(&self) -> Vec<Envelope> {
        self.emitted.lock().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.emitted.lock().iter().map(|e| e.event.clone()).collect()
    }

    pub fn clear(&self) {
        self.emitted.lock().clear();
    }
}

impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, envelope: Envelope) -> Result<()> {
        if self.fail_emit.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }

        self.emitted.lock().push(envelope);
        Ok(())
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}
