use arc_swap::ArcSwap;
use std::sync::Arc;

/// Read-mostly table replaced wholesale. Readers keep the `Arc` they loaded
/// for as long as they need it; a concurrent `store` never mutates it.
pub struct Snapshot<T> {
    current: ArcSwap<T>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(value),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    pub fn store(&self, value: T) {
        self.current.store(Arc::new(value));
    }
}
