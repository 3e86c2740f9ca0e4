//! Synchronized handler registry
//!
//! Controllers invoke handlers from their message-dispatch path while user
//! code may add or remove handlers from another thread. The registry keeps
//! the handler list behind a mutex and snapshots it for invocation, so an
//! add or remove never races an ongoing dispatch.

use std::sync::{Arc, Mutex};

use log::warn;

/// Opaque id returned when adding a handler, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<Mutex<dyn FnMut(&E) + Send>>;

struct RegistryInner<E> {
    next_id: u64,
    handlers: Vec<(HandlerId, Handler<E>)>,
}

/// Ordered set of handlers for one event type
pub struct HandlerRegistry<E> {
    inner: Mutex<RegistryInner<E>>,
}

impl<E> HandlerRegistry<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                handlers: Vec::new(),
            }),
        }
    }

    /// Register a handler and return a fresh id
    pub fn add<F>(&self, handler: F) -> HandlerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.push((id, Arc::new(Mutex::new(handler))));
        id
    }

    /// Remove a handler; returns false for an unknown id
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.handlers.len();
        inner.handlers.retain(|(hid, _)| *hid != id);
        inner.handlers.len() != before
    }

    /// Remove a handler, logging a warning for an unknown id
    pub fn remove_or_warn(&self, id: HandlerId, handler_kind: &str) {
        if !self.remove(id) {
            warn!("Remove{}Handler failed: unknown HandlerId", handler_kind);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().handlers.is_empty()
    }

    /// Invoke all handlers in registration order.
    ///
    /// The handler list is snapshotted first, so handlers registered or
    /// removed concurrently do not affect the running dispatch.
    pub fn invoke_all(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = {
            let inner = self.inner.lock().unwrap();
            inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in snapshot {
            (handler.lock().unwrap())(event);
        }
    }
}

impl<E> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
