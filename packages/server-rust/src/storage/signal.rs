//! Multi-subscriber signal and the cache's event payloads.
//!
//! [`Signal`] fans one notification out to every connected handler, the same
//! way a composite observer forwards each call to its members. Handlers are
//! independent: there is no back-pressure and no ordering guarantee between
//! them. [`DataSuccess`] and [`DataFailure`] are the payloads every
//! [`Data`](super::Data) instance publishes after each store call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use datacache_core::DataMethod;
use parking_lot::RwLock;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A store call that completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSuccess {
    pub method: DataMethod,
    pub key: String,
}

/// A store call that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFailure {
    pub method: DataMethod,
    pub key: String,
    pub error: String,
}

struct Slots<T> {
    handlers: RwLock<Vec<(u64, Handler<T>)>>,
    next_id: AtomicU64,
}

/// Type-erased view of a slot list, so [`Connection`] is not generic.
trait Disconnect: Send + Sync {
    fn disconnect(&self, id: u64);
    fn contains(&self, id: u64) -> bool;
}

impl<T> Disconnect for Slots<T> {
    fn disconnect(&self, id: u64) {
        self.handlers.write().retain(|(existing, _)| *existing != id);
    }

    fn contains(&self, id: u64) -> bool {
        self.handlers.read().iter().any(|(existing, _)| *existing == id)
    }
}

/// Multi-subscriber notification channel.
pub struct Signal<T> {
    slots: Arc<Slots<T>>,
}

impl<T: 'static> Signal<T> {
    /// Creates a signal with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Slots {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Connects a handler. It runs on every [`fire()`](Self::fire) until the
    /// returned [`Connection`] is disconnected.
    pub fn connect(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Connection {
        let id = self.slots.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.handlers.write().push((id, Arc::new(handler)));
        let slots: Arc<dyn Disconnect> = self.slots.clone();
        Connection {
            id,
            slots: Arc::downgrade(&slots),
        }
    }

    /// Delivers `payload` to every connected handler.
    ///
    /// Handlers are snapshotted first, so one may connect or disconnect
    /// others while the signal is firing.
    pub fn fire(&self, payload: &T) {
        let handlers: Vec<Handler<T>> = self
            .slots
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(payload);
        }
    }

    /// Disconnects every handler.
    pub fn disconnect_all(&self) {
        self.slots.handlers.write().clear();
    }

    /// Number of connected handlers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.slots.handlers.read().len()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one connected handler.
///
/// Dropping the handle does not disconnect; call
/// [`disconnect()`](Connection::disconnect) explicitly.
pub struct Connection {
    id: u64,
    slots: Weak<dyn Disconnect>,
}

impl Connection {
    /// Removes the handler from its signal. Idempotent.
    pub fn disconnect(&self) {
        if let Some(slots) = self.slots.upgrade() {
            slots.disconnect(self.id);
        }
    }

    /// Whether the handler is still connected to a live signal.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.slots
            .upgrade()
            .is_some_and(|slots| slots.contains(self.id))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
