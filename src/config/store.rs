use std::sync::{Arc, PoisonError, RwLock};

use super::ConfigSnapshot;

/// Holds the current configuration as an immutable snapshot.
///
/// Publishing swaps the whole snapshot; readers keep whichever `Arc` they
/// loaded, so a step never sees a half-applied configuration.
#[derive(Clone, Default)]
pub struct ConfigStore {
    current: Arc<RwLock<Arc<ConfigSnapshot>>>,
}

impl ConfigStore {
    pub fn publish(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        snapshot
    }

    pub fn load(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }
}
