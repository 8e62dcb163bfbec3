use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::{Collection, CollectionWrite, DocumentStore, StoreResult};

/// Process-local store for tests. A batch is applied under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Collection, Vec<Value>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, collection: Collection) -> StoreResult<Vec<Value>> {
        Ok(self.lock().get(&collection).cloned().unwrap_or_default())
    }

    fn save(&self, collection: Collection, records: &[Value]) -> StoreResult<()> {
        self.lock().insert(collection, records.to_vec());
        Ok(())
    }

    fn save_batch(&self, writes: &[CollectionWrite]) -> StoreResult<()> {
        let mut collections = self.lock();
        for (collection, records) in writes {
            collections.insert(*collection, records.clone());
        }
        Ok(())
    }
}
