use crate::error::{TagError, TransportError};
use crate::hal::{Endpoint, ProtocolClient};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Owns the protocol client and serializes every request through it.
///
/// All controller I/O goes through [`ConnectionManager::with_client`], which
/// holds the client lock for the whole closure. A read-modify-write done
/// inside one closure cannot interleave with another caller's write.
pub struct ConnectionManager {
    client: Mutex<Box<dyn ProtocolClient>>,
    connected: AtomicBool,
    endpoint: Mutex<Option<Endpoint>>,
}

impl ConnectionManager {
    pub fn new(client: impl ProtocolClient + 'static) -> Self {
        Self {
            client: Mutex::new(Box::new(client)),
            connected: AtomicBool::new(false),
            endpoint: Mutex::new(None),
        }
    }

    /// Connects to `endpoint`, dropping any current session first.
    pub fn connect(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        let mut client = self.client.lock();
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(err) = client.disconnect() {
                warn!("disconnect before reconnect failed: {err}");
            }
        }
        *self.endpoint.lock() = Some(endpoint.clone());
        match client.connect(&endpoint) {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!("connected to PLC at {endpoint}");
                Ok(())
            }
            Err(err) => {
                warn!("connect to {endpoint} failed: {err}");
                Err(err)
            }
        }
    }

    /// Retries the last endpoint passed to [`connect`](Self::connect).
    pub fn reconnect(&self) -> Result<(), TransportError> {
        let endpoint = self.endpoint.lock().clone().ok_or(TransportError::Disconnected)?;
        self.connect(endpoint)
    }

    /// Safe to call repeatedly; transport errors are logged, not returned.
    pub fn disconnect(&self) {
        let mut client = self.client.lock();
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        match client.disconnect() {
            Ok(()) => info!("disconnected from PLC"),
            Err(err) => warn!("disconnect reported an error: {err}"),
        }
    }

    /// Checks the live link, not just the last known state.
    pub fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        let alive = self.client.lock().is_alive();
        if !alive && self.connected.swap(false, Ordering::SeqCst) {
            warn!("PLC link lost");
        }
        alive
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.lock().clone()
    }

    /// Runs `f` with exclusive access to the client.
    pub fn with_client<R>(
        &self,
        f: impl FnOnce(&mut dyn ProtocolClient) -> Result<R, TagError>,
    ) -> Result<R, TagError> {
        let mut client = self.client.lock();
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TagError::NotConnected);
        }
        let result = f(client.as_mut());
        if let Err(err) = &result {
            if err.is_connection_loss() {
                debug!("request failed on a dead link: {err}");
                self.connected.store(false, Ordering::SeqCst);
            }
        }
        result
    }
}
