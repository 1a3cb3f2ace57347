//! Bounded most-recent-first cache of bag references seen locally
//!
//! Backed by a `CacheStore`. Store failures never reach the caller: a failed
//! read yields an empty list and a failed write is dropped, both logged.

use crate::domain::CachedReference;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default number of references kept
pub const DEFAULT_CAPACITY: usize = 50;

/// Persistent backing for the reference list
pub trait CacheStore: Send {
    fn load(&self) -> io::Result<Vec<CachedReference>>;
    fn save(&mut self, entries: &[CachedReference]) -> io::Result<()>;
}

/// Stores the list under one namespaced key inside a JSON object file.
///
/// Other keys in the file are preserved on write.
pub struct JsonFileStore {
    path: PathBuf,
    namespace: String,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P, namespace: &str) -> Self {
        Self { path: path.as_ref().to_path_buf(), namespace: namespace.to_string() }
    }

    fn read_object(&self) -> io::Result<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "cache file is not a JSON object")),
        }
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> io::Result<Vec<CachedReference>> {
        let mut object = self.read_object()?;
        match object.remove(&self.namespace) {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&mut self, entries: &[CachedReference]) -> io::Result<()> {
        // A corrupt file is replaced rather than blocking every write
        let mut object = self.read_object().unwrap_or_default();
        object.insert(self.namespace.clone(), serde_json::to_value(entries)?);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(object))?)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Volatile store for tests and one-shot commands
#[derive(Default)]
pub struct MemoryStore {
    entries: Vec<CachedReference>,
}

impl CacheStore for MemoryStore {
    fn load(&self) -> io::Result<Vec<CachedReference>> {
        Ok(self.entries.clone())
    }

    fn save(&mut self, entries: &[CachedReference]) -> io::Result<()> {
        self.entries = entries.to_vec();
        Ok(())
    }
}

pub struct BagReferenceCache {
    store: Box<dyn CacheStore>,
    capacity: usize,
}

impl BagReferenceCache {
    pub fn new(store: Box<dyn CacheStore>, capacity: usize) -> Self {
        Self { store, capacity: capacity.max(1) }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::<MemoryStore>::default(), DEFAULT_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> Vec<CachedReference> {
        match self.store.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "reference_cache_read_failed");
                Vec::new()
            }
        }
    }

    fn write(&mut self, entries: &[CachedReference]) {
        if let Err(e) = self.store.save(entries) {
            warn!(error = %e, entries = entries.len(), "reference_cache_write_failed");
        }
    }

    /// Insert at the front, dropping any older entry with the same id, then
    /// trim to capacity.
    pub fn record_seen(&mut self, reference: CachedReference) {
        if reference.id.trim().is_empty() {
            return;
        }
        let mut entries = self.read();
        entries.retain(|e| e.id != reference.id);
        debug!(id = %reference.id, "reference_cache_record");
        entries.insert(0, reference);
        entries.truncate(self.capacity);
        self.write(&entries);
    }

    /// Most recent first
    pub fn list_recent(&self) -> Vec<CachedReference> {
        let mut entries = self.read();
        entries.truncate(self.capacity);
        entries
    }

    /// Returns true if an entry was removed
    pub fn remove(&mut self, id: &str) -> bool {
        let mut entries = self.read();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return false;
        }
        self.write(&entries);
        true
    }

    /// Find the entry whose id or tag label equals `code`
    pub fn resolve(&self, code: &str) -> Option<CachedReference> {
        let code = code.trim();
        let entries = self.read();
        entries
            .iter()
            .find(|e| e.id == code)
            .or_else(|| entries.iter().find(|e| e.label.as_deref() == Some(code)))
            .cloned()
    }
}

/// Cache shared between the capture worker and the operator front end
pub type SharedReferenceCache = std::sync::Arc<Mutex<BagReferenceCache>>;

pub fn shared(cache: BagReferenceCache) -> SharedReferenceCache {
    std::sync::Arc::new(Mutex::new(cache))
}
