//! SQLite backing of the reconnect table.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use budlink_core::ReconnectStorage;
use budlink_store::Store;
use budlink_types::{PersistedEntry, TableHalf};

/// Adapts a shared [`Store`] to the scheduler's storage seam.
///
/// The scheduler calls this synchronously from its own task, so the store
/// sits behind a blocking mutex rather than an async one.
#[derive(Debug, Clone)]
pub struct StoreBackend {
    store: Arc<Mutex<Store>>,
}

impl StoreBackend {
    pub fn new(store: Arc<Mutex<Store>>) -> Self {
        Self { store }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReconnectStorage for StoreBackend {
    fn load(&self, capacity: usize) -> budlink_core::Result<Vec<Option<PersistedEntry>>> {
        self.lock()
            .load_reconnect_table(capacity)
            .map_err(budlink_core::Error::storage)
    }

    fn save(&self, slots: &[Option<PersistedEntry>], half: TableHalf) -> budlink_core::Result<()> {
        self.lock()
            .save_reconnect_table(slots, half)
            .map_err(budlink_core::Error::storage)
    }
}
