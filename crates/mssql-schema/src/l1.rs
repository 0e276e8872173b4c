//! In-process schema cache (L1).
//!
//! Generalizes the teacher's `lazy::LazySchemaCache`: a per-key
//! `Loading`/`Loaded`/`NotLoaded` state machine over `parking_lot::RwLock`
//! that de-duplicates concurrent refreshes for the same key, carried over
//! from table/column lookups to versioned procedure and TVP schemas.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mssql_core::{InstanceId, ProcedureSchema, TvpSchema, VersionToken};
use parking_lot::RwLock;

/// Identifies one L1 slot: an instance, an object kind, and its
/// schema-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub instance: InstanceId,
    pub kind: SchemaObjectKind,
    pub qualified_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaObjectKind {
    Procedure,
    Tvp,
}

#[derive(Debug, Clone)]
pub enum SchemaPayload {
    Procedure(ProcedureSchema),
    Tvp(TvpSchema),
}

impl SchemaPayload {
    pub fn version(&self) -> VersionToken {
        match self {
            SchemaPayload::Procedure(p) => p.version,
            SchemaPayload::Tvp(t) => t.version,
        }
    }

    pub fn as_procedure(&self) -> Option<&ProcedureSchema> {
        match self {
            SchemaPayload::Procedure(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_tvp(&self) -> Option<&TvpSchema> {
        match self {
            SchemaPayload::Tvp(t) => Some(t),
            _ => None,
        }
    }
}

/// Cache entry state for single-flight refresh.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Loaded(SchemaPayload),
    Loading,
    NotLoaded,
}

impl CacheEntry {
    pub fn is_loaded(&self) -> bool {
        matches!(self, CacheEntry::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, CacheEntry::Loading)
    }

    pub fn payload(&self) -> Option<&SchemaPayload> {
        match self {
            CacheEntry::Loaded(p) => Some(p),
            _ => None,
        }
    }
}

struct TimestampedEntry {
    entry: CacheEntry,
    next_check_due: Option<Instant>,
}

impl TimestampedEntry {
    fn not_loaded() -> Self {
        Self { entry: CacheEntry::NotLoaded, next_check_due: None }
    }

    fn loading() -> Self {
        Self { entry: CacheEntry::Loading, next_check_due: None }
    }

    fn loaded(payload: SchemaPayload, ttl: Duration) -> Self {
        Self { entry: CacheEntry::Loaded(payload), next_check_due: Some(Instant::now() + ttl) }
    }

    fn is_stale(&self) -> bool {
        match self.next_check_due {
            Some(due) => Instant::now() >= due,
            None => true,
        }
    }

    fn extend(&mut self, ttl: Duration) {
        self.next_check_due = Some(Instant::now() + ttl);
    }
}

/// In-process schema cache. One instance is shared process-wide; refresh
/// dedup happens per key via the `Loading` state, not via a lock held across
/// the network round trip.
pub struct L1Cache {
    entries: RwLock<HashMap<SchemaKey, TimestampedEntry>>,
    refresh_interval: Duration,
}

impl L1Cache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), refresh_interval }
    }

    /// Current state for `key`, with staleness already applied.
    pub fn get(&self, key: &SchemaKey) -> CacheEntry {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(e) if e.is_stale() => CacheEntry::NotLoaded,
            Some(e) => e.entry.clone(),
            None => CacheEntry::NotLoaded,
        }
    }

    /// Mark `key` as loading. Returns false if another refresh already owns it.
    pub fn begin_loading(&self, key: SchemaKey) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(e) if e.entry.is_loading() => false,
            _ => {
                entries.insert(key, TimestampedEntry::loading());
                true
            }
        }
    }

    /// Publish a freshly fetched payload, resetting the refresh timer.
    pub fn publish(&self, key: SchemaKey, payload: SchemaPayload) {
        self.entries.write().insert(key, TimestampedEntry::loaded(payload, self.refresh_interval));
    }

    /// Extend the TTL of an existing entry without replacing its payload --
    /// used both for version-match confirmation and fail-safe grace windows.
    pub fn extend(&self, key: &SchemaKey, grace: Duration) {
        if let Some(e) = self.entries.write().get_mut(key) {
            e.extend(grace);
        }
    }

    pub fn invalidate(&self, key: &SchemaKey) {
        self.entries.write().remove(key);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mssql_core::ParameterMetadata;

    fn key(name: &str) -> SchemaKey {
        SchemaKey {
            instance: InstanceId::new("test"),
            kind: SchemaObjectKind::Procedure,
            qualified_name: name.to_string(),
        }
    }

    fn procedure(name: &str, version: u64) -> SchemaPayload {
        SchemaPayload::Procedure(ProcedureSchema {
            qualified_name: name.to_string(),
            instance: InstanceId::new("test"),
            parameters: Vec::<ParameterMetadata>::new(),
            version: VersionToken(version),
            fetched_at: std::time::SystemTime::now(),
        })
    }

    #[test]
    fn miss_then_single_flight_then_hit() {
        let cache = L1Cache::new(Duration::from_secs(60));
        let k = key("dbo.GetUser");
        assert!(matches!(cache.get(&k), CacheEntry::NotLoaded));
        assert!(cache.begin_loading(k.clone()));
        assert!(!cache.begin_loading(k.clone()), "second refresh must not proceed concurrently");
        cache.publish(k.clone(), procedure("dbo.GetUser", 1));
        assert!(cache.get(&k).is_loaded());
    }

    #[test]
    fn stale_entry_reports_not_loaded() {
        let cache = L1Cache::new(Duration::from_millis(1));
        let k = key("dbo.GetUser");
        cache.publish(k.clone(), procedure("dbo.GetUser", 1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(cache.get(&k), CacheEntry::NotLoaded));
    }

    #[test]
    fn extend_keeps_payload_fresh() {
        let cache = L1Cache::new(Duration::from_millis(1));
        let k = key("dbo.GetUser");
        cache.publish(k.clone(), procedure("dbo.GetUser", 1));
        std::thread::sleep(Duration::from_millis(5));
        cache.extend(&k, Duration::from_secs(60));
        assert!(cache.get(&k).is_loaded());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = L1Cache::new(Duration::from_secs(60));
        let k = key("dbo.GetUser");
        cache.publish(k.clone(), procedure("dbo.GetUser", 1));
        cache.invalidate(&k);
        assert!(matches!(cache.get(&k), CacheEntry::NotLoaded));
    }
}
