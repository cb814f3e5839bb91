use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

type Outbox = mpsc::UnboundedSender<Value>;

/// Open streaming connections by connection id.
#[derive(Clone, Default)]
pub struct Connections {
    inner: Arc<Mutex<HashMap<Uuid, Outbox>>>,
}

impl Connections {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Outbox>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new connection, messages for it arrive at the returned receiver.
    pub fn open(&self) -> (Uuid, mpsc::UnboundedReceiver<Value>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        (id, rx)
    }

    /// Push a message to a connection, `false` if the connection is gone.
    pub fn send(&self, id: &Uuid, message: Value) -> bool {
        self.lock()
            .get(id)
            .map(|tx| tx.send(message).is_ok())
            .unwrap_or(false)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget a connection, its stream ends. Closing twice is a no-op.
    pub fn close(&self, id: &Uuid) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Close every connection, returns how many were open.
    pub fn close_all(&self) -> usize {
        let mut connections = self.lock();
        let count = connections.len();
        connections.clear();
        count
    }

    pub(super) fn guard(&self, id: Uuid) -> ConnectionGuard {
        ConnectionGuard {
            connections: self.clone(),
            id,
        }
    }
}

/// Unregisters the connection when the stream serving it is dropped.
pub(super) struct ConnectionGuard {
    connections: Connections,
    id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.connections.close(&self.id) {
            log::debug!(target: "server", "stream {} dropped", self.id);
        }
    }
}
