use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

/// A message could not be delivered because the client is gone.
#[derive(Debug, thiserror::Error)]
#[error("window client '{client_id}' is no longer reachable")]
pub struct PostError {
    pub client_id: String,
}

/// A window controlled by the worker, reachable by posting structured
/// messages.
pub trait WindowClient: Send + Sync {
    fn id(&self) -> &str;

    fn post_message(&self, message: Value) -> Result<(), PostError>;
}

/// The set of window clients currently controlled by the worker.
pub trait ClientDirectory: Send + Sync {
    /// Controlled window clients, in claim order.
    fn match_windows(&self) -> Vec<Arc<dyn WindowClient>>;
}

/// A window client backed by an unbounded channel into the page's message
/// loop.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    id: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelClient {
    pub fn new(id: impl Into<String>, tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { id: id.into(), tx }
    }
}

impl WindowClient for ChannelClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn post_message(&self, message: Value) -> Result<(), PostError> {
        self.tx.send(message).map_err(|_| PostError {
            client_id: self.id.clone(),
        })
    }
}

/// In-memory [`ClientDirectory`]: pages are claimed when the worker
/// activates and released when they close.
#[derive(Default)]
pub struct ClientList {
    clients: Mutex<Vec<Arc<dyn WindowClient>>>,
}

impl ClientList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn WindowClient>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start controlling `client`. Claiming an id twice replaces the earlier
    /// client in place.
    pub fn claim(&self, client: Arc<dyn WindowClient>) {
        let mut clients = self.lock();
        match clients.iter_mut().find(|c| c.id() == client.id()) {
            Some(existing) => *existing = client,
            None => clients.push(client),
        }
    }

    /// Stop controlling the client with `id`. Returns whether it was present.
    pub fn release(&self, id: &str) -> bool {
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|c| c.id() != id);
        clients.len() != before
    }
}

impl ClientDirectory for ClientList {
    fn match_windows(&self) -> Vec<Arc<dyn WindowClient>> {
        self.lock().clone()
    }
}
