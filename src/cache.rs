//! Two-tier prototype cache.
//!
//! L1 is a bounded in-memory LRU behind a mutex; L2 is an optional directory
//! of versioned JSON blobs, one per class. An L2 hit is promoted into L1.
//! Entries carry a format version; a mismatch is treated as a miss.

use crate::prototype::ServicePrototype;
use ahash::RandomState;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use serde::{Deserialize, Serialize};

/// Serialized-entry format version. Bump on any prototype shape change.
const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    prototype: ServicePrototype,
}

// =============================================================================
// L1: bounded LRU
// =============================================================================

struct LruState {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (u64, Arc<ServicePrototype>), RandomState>,
}

impl LruState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::with_hasher(RandomState::new()),
        }
    }

    fn get(&mut self, class: &str) -> Option<Arc<ServicePrototype>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(class).map(|(stamp, prototype)| {
            *stamp = tick;
            Arc::clone(prototype)
        })
    }

    fn set(&mut self, class: &str, prototype: Arc<ServicePrototype>) {
        self.tick += 1;
        self.entries
            .insert(class.to_string(), (self.tick, prototype));
        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(victim) = self
            .entries
            .iter()
            .min_by_key(|(_, (stamp, _))| *stamp)
            .map(|(class, _)| class.clone())
        {
            #[cfg(feature = "logging")]
            trace!(
                target: "keystone_di",
                class = victim.as_str(),
                "Evicting least-recently-used prototype"
            );
            self.entries.remove(&victim);
        }
    }
}

// =============================================================================
// L2: persistent store
// =============================================================================

struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    fn path_for(&self, class: &str) -> PathBuf {
        // Class names carry separators and punctuation; flatten to a safe stem.
        let stem: String = class
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{stem}.proto.json"))
    }

    fn load(&self, class: &str) -> Option<ServicePrototype> {
        let bytes = fs::read(self.path_for(class)).ok()?;
        let envelope: CacheEnvelope = serde_json::from_slice(&bytes).ok()?;
        if envelope.version != CACHE_FORMAT_VERSION {
            return None;
        }
        Some(envelope.prototype)
    }

    fn store(&self, class: &str, prototype: &ServicePrototype) {
        let envelope = CacheEnvelope {
            version: CACHE_FORMAT_VERSION,
            prototype: prototype.clone(),
        };
        let write = fs::create_dir_all(&self.dir).and_then(|_| {
            let bytes = serde_json::to_vec(&envelope).map_err(std::io::Error::other)?;
            fs::write(self.path_for(class), bytes)
        });
        // The persistent tier is best-effort; a failed write only costs a rebuild.
        if let Err(_err) = write {
            #[cfg(feature = "logging")]
            debug!(
                target: "keystone_di",
                class = class,
                error = %_err,
                "Failed to persist prototype; continuing without L2 entry"
            );
        }
    }

    fn remove(&self, class: &str) {
        let _ = fs::remove_file(self.path_for(class));
    }

    fn clear(&self) {
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".proto.json"))
                {
                    let _ = fs::remove_file(path);
                }
            }
        }
    }
}

// =============================================================================
// Facade
// =============================================================================

/// The combined cache the prototype factory talks to.
pub struct PrototypeCache {
    l1: Mutex<LruState>,
    l2: Option<DiskStore>,
}

impl PrototypeCache {
    /// Memory tier only.
    pub fn memory_only(capacity: usize) -> Self {
        Self {
            l1: Mutex::new(LruState::new(capacity)),
            l2: None,
        }
    }

    /// Memory tier backed by a persistent directory.
    pub fn with_dir(capacity: usize, dir: impl AsRef<Path>) -> Self {
        Self {
            l1: Mutex::new(LruState::new(capacity)),
            l2: Some(DiskStore {
                dir: dir.as_ref().to_path_buf(),
            }),
        }
    }

    /// Look up a prototype; an L2 hit is promoted into L1.
    pub fn get(&self, class: &str) -> Option<Arc<ServicePrototype>> {
        if let Some(hit) = self.lock_l1().get(class) {
            return Some(hit);
        }

        let prototype = Arc::new(self.l2.as_ref()?.load(class)?);

        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            class = class,
            "Prototype promoted from persistent cache"
        );

        self.lock_l1().set(class, Arc::clone(&prototype));
        Some(prototype)
    }

    /// Write to both tiers.
    pub fn set(&self, class: &str, prototype: Arc<ServicePrototype>) {
        if let Some(l2) = &self.l2 {
            l2.store(class, &prototype);
        }
        self.lock_l1().set(class, prototype);
    }

    /// Remove one class from both tiers.
    pub fn remove(&self, class: &str) {
        self.lock_l1().entries.remove(class);
        if let Some(l2) = &self.l2 {
            l2.remove(class);
        }
    }

    /// Drop every entry in both tiers.
    pub fn clear(&self) {
        self.lock_l1().entries.clear();
        if let Some(l2) = &self.l2 {
            l2.clear();
        }
    }

    /// Entries currently held in memory.
    pub fn memory_len(&self) -> usize {
        self.lock_l1().entries.len()
    }

    fn lock_l1(&self) -> std::sync::MutexGuard<'_, LruState> {
        self.l1
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether a persistent tier is configured.
    #[inline]
    pub fn has_persistent_tier(&self) -> bool {
        self.l2.is_some()
    }
}

impl std::fmt::Debug for PrototypeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrototypeCache")
            .field("memory_len", &self.memory_len())
            .field("persistent", &self.has_persistent_tier())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::{MethodPrototype, ParameterPrototype};

    fn prototype(class: &str) -> Arc<ServicePrototype> {
        Arc::new(ServicePrototype {
            class_name: class.to_string(),
            constructor: Some(MethodPrototype::new(
                "constructor",
                vec![ParameterPrototype::new("clock").of_type("pkg.Clock")],
            )),
            properties: Vec::new(),
            methods: Vec::new(),
            instantiable: true,
        })
    }

    #[test]
    fn test_memory_hit() {
        let cache = PrototypeCache::memory_only(4);
        cache.set("pkg.A", prototype("pkg.A"));

        let hit = cache.get("pkg.A").unwrap();
        assert_eq!(hit.class_name, "pkg.A");
        assert!(cache.get("pkg.B").is_none());
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = PrototypeCache::memory_only(2);
        cache.set("pkg.A", prototype("pkg.A"));
        cache.set("pkg.B", prototype("pkg.B"));

        // Touch A so B becomes the eviction victim.
        let _ = cache.get("pkg.A");
        cache.set("pkg.C", prototype("pkg.C"));

        assert!(cache.get("pkg.A").is_some());
        assert!(cache.get("pkg.B").is_none());
        assert!(cache.get("pkg.C").is_some());
    }

    #[test]
    fn test_persistent_roundtrip_and_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrototypeCache::with_dir(4, dir.path());
        cache.set("pkg.Logger", prototype("pkg.Logger"));

        // A fresh cache over the same directory sees the persisted entry.
        let rebuilt = PrototypeCache::with_dir(4, dir.path());
        assert_eq!(rebuilt.memory_len(), 0);
        let hit = rebuilt.get("pkg.Logger").unwrap();
        assert_eq!(hit.class_name, "pkg.Logger");
        assert_eq!(rebuilt.memory_len(), 1);
    }

    #[test]
    fn test_version_mismatch_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrototypeCache::with_dir(4, dir.path());
        cache.set("pkg.Old", prototype("pkg.Old"));

        // Rewrite the entry with a bumped version.
        let path = dir.path().join("pkg_Old.proto.json");
        let raw = std::fs::read_to_string(&path).unwrap();
        let bumped = raw.replacen("\"version\":1", "\"version\":99", 1);
        std::fs::write(&path, bumped).unwrap();

        let rebuilt = PrototypeCache::with_dir(4, dir.path());
        assert!(rebuilt.get("pkg.Old").is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrototypeCache::with_dir(4, dir.path());
        cache.set("pkg.A", prototype("pkg.A"));
        cache.set("pkg.B", prototype("pkg.B"));

        cache.remove("pkg.A");
        assert!(cache.get("pkg.A").is_none());
        assert!(cache.get("pkg.B").is_some());

        cache.clear();
        assert!(cache.get("pkg.B").is_none());
        assert_eq!(cache.memory_len(), 0);
    }
}
