use std::sync::Arc;

use parking_lot::Mutex;

/// Shared, drainable queue of notifications for presentation layers.
///
/// Producers push in emission order; hosts call [`EventQueue::drain`] from
/// their event loop. Clones share the same queue.
#[derive(Debug)]
pub struct EventQueue<E> {
    inner: Arc<Mutex<Vec<E>>>,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, event: E) {
        self.inner.lock().push(event);
    }

    pub fn drain(&self) -> Vec<E> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<E> Clone for EventQueue<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
