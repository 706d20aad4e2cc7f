use parking_lot::RwLock;
use std::sync::Arc;

/// Explicitly registered listeners of one component's events.
///
/// Notification runs on a snapshot of the list, outside the lock, so an
/// observer may subscribe others or read the emitting component back.
pub struct ObserverList<O: ?Sized> {
    observers: RwLock<Vec<Arc<O>>>,
}

impl<O: ?Sized> ObserverList<O> {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<O>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, f: impl Fn(&O)) {
        let snapshot: Vec<Arc<O>> = self.observers.read().clone();
        for observer in &snapshot {
            f(observer.as_ref());
        }
    }
}

impl<O: ?Sized> Default for ObserverList<O> {
    fn default() -> Self {
        Self::new()
    }
}
