use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The server itself, used when the server requests work on its own behalf.
    pub const SERVER: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(PeerId),
    Data(PeerId, Vec<u8>),
    Disconnected(PeerId),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),
    #[error("transport closed")]
    Closed,
}

/// Ordered byte delivery between peers. Reliability and channels are the
/// implementation's concern.
pub trait Transport {
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError>;
    fn try_recv(&self) -> Option<TransportEvent>;
    fn disconnect(&self, peer: PeerId);
}

type ClientTable = Arc<Mutex<HashMap<PeerId, Sender<Vec<u8>>>>>;

/// In-process transport: one server endpoint and any number of clients.
pub struct LoopbackHub {
    to_server_tx: Sender<TransportEvent>,
    to_server_rx: Receiver<TransportEvent>,
    clients: ClientTable,
    next_id: AtomicU32,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        let (to_server_tx, to_server_rx) = unbounded();
        Self {
            to_server_tx,
            to_server_rx,
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU32::new(PeerId::SERVER.0 + 1),
        }
    }

    pub fn server_endpoint(&self) -> LoopbackServer {
        LoopbackServer {
            rx: self.to_server_rx.clone(),
            clients: Arc::clone(&self.clients),
        }
    }

    pub fn connect(&self) -> LoopbackClient {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = unbounded();
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let _ = self.to_server_tx.send(TransportEvent::Connected(id));
        log::debug!(target: "net", "loopback peer {} connected", id);
        LoopbackClient {
            id,
            to_server: self.to_server_tx.clone(),
            rx,
            clients: Arc::clone(&self.clients),
        }
    }
}

pub struct LoopbackServer {
    rx: Receiver<TransportEvent>,
    clients: ClientTable,
}

impl Transport for LoopbackServer {
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = clients.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
        tx.send(bytes).map_err(|_| TransportError::UnknownPeer(peer))
    }

    fn try_recv(&self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    fn disconnect(&self, peer: PeerId) {
        // Dropping the sender closes the client's receive side.
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&peer);
    }
}

pub struct LoopbackClient {
    id: PeerId,
    to_server: Sender<TransportEvent>,
    rx: Receiver<Vec<u8>>,
    clients: ClientTable,
}

impl LoopbackClient {
    pub fn peer_id(&self) -> PeerId {
        self.id
    }
}

impl Transport for LoopbackClient {
    fn send(&self, _peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.to_server
            .send(TransportEvent::Data(self.id, bytes))
            .map_err(|_| TransportError::Closed)
    }

    fn try_recv(&self) -> Option<TransportEvent> {
        match self.rx.try_recv() {
            Ok(bytes) => Some(TransportEvent::Data(PeerId::SERVER, bytes)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(TransportEvent::Disconnected(PeerId::SERVER)),
        }
    }

    fn disconnect(&self, _peer: PeerId) {
        let removed = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        if removed.is_some() {
            let _ = self.to_server.send(TransportEvent::Disconnected(self.id));
        }
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.disconnect(PeerId::SERVER);
    }
}
