use parking_lot::Mutex;
use std::collections::HashMap;

/// Content-addressed session cache with a two-phase write.
///
/// Entries are first *staged* while the network operation that introduced
/// them is in flight, and only become visible to [`get`](Self::get) once that
/// operation is confirmed and [`commit`](Self::commit) runs. A hash lives in
/// at most one of the two tables. Nothing is ever evicted.
pub struct ContentCache<T> {
    tables: Mutex<Tables<T>>,
}

struct Tables<T> {
    committed: HashMap<String, T>,
    staged: HashMap<String, T>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub committed: usize,
    pub staged: usize,
}

impl<T: Clone> ContentCache<T> {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                committed: HashMap::new(),
                staged: HashMap::new(),
            }),
        }
    }

    /// True if `hash` is committed *or* staged. Counting staged entries keeps
    /// two overlapping submissions from both treating an object as new.
    pub fn has(&self, hash: &str) -> bool {
        let tables = self.tables.lock();
        tables.committed.contains_key(hash) || tables.staged.contains_key(hash)
    }

    /// True only once the peer has confirmed the object.
    pub fn is_committed(&self, hash: &str) -> bool {
        self.tables.lock().committed.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<T> {
        self.tables.lock().committed.get(hash).cloned()
    }

    /// Stages `object` unless `hash` is already known. Returns whether it was
    /// inserted; an existing entry is left untouched.
    pub fn stage(&self, hash: &str, object: T) -> bool {
        let mut tables = self.tables.lock();
        if tables.committed.contains_key(hash) || tables.staged.contains_key(hash) {
            return false;
        }
        tables.staged.insert(hash.to_string(), object);
        true
    }

    /// Promotes every staged entry and empties the stage. Call only after
    /// the operation that staged them succeeded.
    pub fn commit(&self) -> usize {
        let mut tables = self.tables.lock();
        let Tables { committed, staged } = &mut *tables;
        let promoted = staged.len();
        committed.extend(staged.drain());
        promoted
    }

    /// Records an object already confirmed by the peer, e.g. one just
    /// fetched. A staged entry for the same hash is replaced.
    pub fn store(&self, hash: &str, object: T) {
        let mut tables = self.tables.lock();
        tables.staged.remove(hash);
        tables.committed.entry(hash.to_string()).or_insert(object);
    }

    pub fn stats(&self) -> CacheStats {
        let tables = self.tables.lock();
        CacheStats {
            committed: tables.committed.len(),
            staged: tables.staged.len(),
        }
    }
}

impl<T: Clone> Default for ContentCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ContentCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("ContentCache")
            .field("committed", &tables.committed.len())
            .field("staged", &tables.staged.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_disjoint(cache: &ContentCache<String>) {
        let tables = cache.tables.lock();
        for hash in tables.staged.keys() {
            assert!(!tables.committed.contains_key(hash), "{hash} in both tables");
        }
    }

    #[test]
    fn test_stage_then_commit() {
        let cache = ContentCache::new();
        assert!(cache.stage("Mesh.a", "first".to_string()));
        assert_eq!(cache.get("Mesh.a"), None);

        assert_eq!(cache.commit(), 1);
        assert_eq!(cache.get("Mesh.a"), Some("first".to_string()));
        assert!(cache.has("Mesh.a"));
        assert_eq!(cache.stats(), CacheStats { committed: 1, staged: 0 });
        assert_disjoint(&cache);
    }

    #[test]
    fn test_second_stage_is_noop() {
        let cache = ContentCache::new();
        assert!(cache.stage("Mesh.a", "first".to_string()));
        assert!(!cache.stage("Mesh.a", "second".to_string()));
        cache.commit();
        assert_eq!(cache.get("Mesh.a"), Some("first".to_string()));

        // Already committed: staging again must not resurrect it in the stage.
        assert!(!cache.stage("Mesh.a", "third".to_string()));
        assert_eq!(cache.stats().staged, 0);
        assert_disjoint(&cache);
    }

    #[test]
    fn test_staged_counts_as_present() {
        let cache = ContentCache::new();
        cache.stage("Brep.x", "pending".to_string());
        assert!(cache.has("Brep.x"));
        assert!(!cache.is_committed("Brep.x"));
        assert_eq!(cache.get("Brep.x"), None);
    }

    #[test]
    fn test_uncommitted_stage_survives_failure() {
        let cache = ContentCache::new();
        cache.stage("Mesh.a", "a".to_string());
        // The operation failed, so commit is never called.
        assert_eq!(cache.stats(), CacheStats { committed: 0, staged: 1 });
        cache.stage("Mesh.b", "b".to_string());
        assert_eq!(cache.commit(), 2);
        assert!(cache.is_committed("Mesh.a"));
    }

    #[test]
    fn test_store_replaces_staged() {
        let cache = ContentCache::new();
        cache.stage("Curve.c", "staged".to_string());
        cache.store("Curve.c", "fetched".to_string());
        assert_eq!(cache.get("Curve.c"), Some("fetched".to_string()));
        assert_eq!(cache.stats(), CacheStats { committed: 1, staged: 0 });
        assert_disjoint(&cache);
    }

    #[test]
    fn test_concurrent_staging_keeps_tables_disjoint() {
        let cache = Arc::new(ContentCache::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        cache.stage(&format!("Mesh.{}", i % 50), format!("w{worker}"));
                        if i % 17 == 0 {
                            cache.commit();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        cache.commit();
        assert_eq!(cache.stats(), CacheStats { committed: 50, staged: 0 });
        assert_disjoint(&cache);
    }
}
