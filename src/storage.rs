use crate::config::Config;
use crate::error::Result;
use bytes::Bytes;
use feoxdb::FeoxStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Point lookups and writes by raw byte-string key.
///
/// This is the only path from the protocol layer to the storage engine.
/// Implementations may be shared by every connection on the reactor thread;
/// read-modify-write sequences rely on commands never running concurrently.
pub trait Storage: Send + Sync {
    /// Fetch the value stored under `key`, `Ok(None)` when absent
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Overwrite the value stored under `key`
    fn put(&self, key: &[u8], value: Bytes) -> Result<()>;

    /// Make every acknowledged write durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Storage backed by an embedded FeOx store
#[derive(Clone)]
pub struct FeoxStorage {
    store: Arc<FeoxStore>,
}

impl FeoxStorage {
    pub fn new(store: Arc<FeoxStore>) -> Self {
        Self { store }
    }

    /// Open the store described by `config`: persistent when a data path is
    /// set, memory-only otherwise.
    pub fn open(config: &Config) -> Result<Self> {
        let max_memory = config.max_memory.unwrap_or(1024 * 1024 * 1024);

        let store = if let Some(ref data_path) = config.data_path {
            let mut builder = FeoxStore::builder()
                .device_path(data_path.clone())
                .max_memory(max_memory)
                .enable_ttl(false);

            if let Some(file_size) = config.file_size {
                builder = builder.file_size(file_size);
            }

            builder.build()?
        } else {
            FeoxStore::builder()
                .max_memory(max_memory)
                .enable_ttl(false)
                .build()?
        };

        Ok(Self::new(Arc::new(store)))
    }
}

impl Storage for FeoxStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.store.get_bytes(key) {
            Ok(value) => Ok(Some(value)),
            Err(feoxdb::FeoxError::KeyNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        self.store.insert_bytes(key, value)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.store.flush_all()?;
        Ok(())
    }
}

/// Volatile storage for tests and embedding
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<Vec<u8>, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        self.entries.lock().insert(key.to_vec(), value);
        Ok(())
    }
}
