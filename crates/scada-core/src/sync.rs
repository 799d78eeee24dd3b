use parking_lot::RwLock;
use std::sync::Arc;

/// Read-mostly value replaced whole on every edit.
///
/// Readers hold an `Arc` snapshot that never changes under them; writers
/// build the next value off to the side and swap it in under the write lock,
/// so no reader can observe a half-applied edit.
#[derive(Debug, Default)]
pub struct Shared<T> {
    current: RwLock<Arc<T>>,
}

impl<T: Clone> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Swaps in `value`, returning the previous snapshot.
    pub fn replace(&self, value: T) -> Arc<T> {
        std::mem::replace(&mut *self.current.write(), Arc::new(value))
    }

    /// Clones the current value, applies `edit`, then publishes the result.
    pub fn update<R>(&self, edit: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.current.write();
        let mut next = T::clone(&guard);
        let out = edit(&mut next);
        *guard = Arc::new(next);
        out
    }
}
