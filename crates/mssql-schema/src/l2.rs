//! Cross-process schema cache (L2).
//!
//! A fixed-header region backed by a memory-mapped file, addressed under an
//! isolation key derived from the connection-string fingerprint so sibling
//! processes sharing an instance see the same cache. Writers serialize
//! through a striped pool of OS-level named mutexes; when a named mutex
//! cannot be created (sandboxed environments, read-only `/tmp`, ...) the
//! pool demotes to a process-private lock and says so in the log, since at
//! that point the region is no longer actually cross-process.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use mssql_core::{ProcedureSchema, TvpSchema, VersionToken};

use crate::l1::{SchemaObjectKind, SchemaPayload};

const MAGIC: u32 = 0x4D53_4C32; // "MSL2"
const STRIPE_COUNT: usize = 1024;

/// One cached object as stored in the shared region.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoredPayload {
    Procedure(ProcedureSchema),
    Tvp(TvpSchema),
}

impl From<&SchemaPayload> for StoredPayload {
    fn from(p: &SchemaPayload) -> Self {
        match p {
            SchemaPayload::Procedure(p) => StoredPayload::Procedure(p.clone()),
            SchemaPayload::Tvp(t) => StoredPayload::Tvp(t.clone()),
        }
    }
}

impl From<StoredPayload> for SchemaPayload {
    fn from(p: StoredPayload) -> Self {
        match p {
            StoredPayload::Procedure(p) => SchemaPayload::Procedure(p),
            StoredPayload::Tvp(t) => SchemaPayload::Tvp(t),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Region {
    entries: HashMap<String, StoredPayload>,
}

/// Acquires the cross-process mutex for a stripe, falling back to a
/// process-private lock when a named OS mutex cannot be created.
enum StripeLock {
    Named(named_lock::NamedLock),
    ProcessLocal(Mutex<()>),
}

impl StripeLock {
    fn new(isolation_key: &str, stripe: usize) -> Self {
        let name = format!("mssql-l2-{isolation_key}-{stripe}");
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        match named_lock::NamedLock::create(&sanitized) {
            Ok(lock) => StripeLock::Named(lock),
            Err(err) => {
                tracing::warn!(
                    stripe,
                    error = %err,
                    "named lock unavailable, demoting L2 stripe to process-private"
                );
                StripeLock::ProcessLocal(Mutex::new(()))
            }
        }
    }

    fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        match self {
            StripeLock::Named(lock) => {
                let _guard = lock.lock().expect("named lock poisoned");
                f()
            }
            StripeLock::ProcessLocal(mutex) => {
                let _guard = mutex.lock();
                f()
            }
        }
    }
}

fn key_name(qualified_name: &str, kind: SchemaObjectKind) -> String {
    match kind {
        SchemaObjectKind::Procedure => format!("p:{qualified_name}"),
        SchemaObjectKind::Tvp => format!("t:{qualified_name}"),
    }
}

fn stripe_of(qualified_name: &str) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::hash::Hash::hash(&qualified_name, &mut hasher);
    (std::hash::Hasher::finish(&hasher) as usize) % STRIPE_COUNT
}

/// Cross-process schema cache for one isolation key (typically a hash of
/// the connection string, so distinct instances don't share a region).
pub struct L2Store {
    path: PathBuf,
    stripes: Vec<StripeLock>,
}

impl L2Store {
    pub fn open(isolation_key: &str) -> Self {
        let path = std::env::temp_dir().join(format!("mssql-schema-l2-{isolation_key}.cache"));
        let stripes = (0..STRIPE_COUNT).map(|i| StripeLock::new(isolation_key, i)).collect();
        Self { path, stripes }
    }

    fn stripe_for(&self, qualified_name: &str) -> &StripeLock {
        &self.stripes[stripe_of(qualified_name)]
    }

    fn read_region(&self) -> Region {
        let Ok(file) = File::open(&self.path) else {
            return Region::default();
        };
        let Ok(meta) = file.metadata() else {
            return Region::default();
        };
        if meta.len() < 12 {
            return Region::default();
        }
        let Ok(mmap) = (unsafe { Mmap::map(&file) }) else {
            return Region::default();
        };
        let magic = u32::from_le_bytes(mmap[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(mmap[4..8].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(mmap[8..12].try_into().unwrap());
        if magic != MAGIC || mmap.len() < 12 + len {
            return Region::default();
        }
        let payload = &mmap[12..12 + len];
        if crc32fast::hash(payload) != crc {
            tracing::warn!("L2 region failed integrity check, treating as empty");
            return Region::default();
        }
        serde_json::from_slice(payload).unwrap_or_default()
    }

    fn write_region(&self, region: &Region) {
        let payload = match serde_json::to_vec(region) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize L2 region");
                return;
            }
        };
        let crc = crc32fast::hash(&payload);
        let mut buf = Vec::with_capacity(12 + payload.len());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&payload);

        let tmp_path = self.path.with_extension("cache.tmp");
        let result = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .and_then(|mut f| f.write_all(&buf).and(f.sync_all()))
            .and_then(|_| std::fs::rename(&tmp_path, &self.path));
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to publish L2 region");
        }
    }

    /// Look up a cached entry without acquiring any stripe lock -- reads are
    /// lock-free, consistent with the atomic rename used to publish.
    pub fn get(&self, qualified_name: &str, kind: SchemaObjectKind) -> Option<SchemaPayload> {
        let region = self.read_region();
        region.entries.get(&key_name(qualified_name, kind)).cloned().map(Into::into)
    }

    /// Publish an entry under its stripe lock (read-modify-write of the
    /// whole region; regions are small enough that this is cheap).
    pub fn publish(&self, qualified_name: &str, kind: SchemaObjectKind, payload: &SchemaPayload) {
        self.stripe_for(qualified_name).with_lock(|| {
            let mut region = self.read_region();
            region.entries.insert(key_name(qualified_name, kind), payload.into());
            self.write_region(&region);
        });
    }

    pub fn version(&self, qualified_name: &str, kind: SchemaObjectKind) -> VersionToken {
        self.get(qualified_name, kind).map(|p| p.version()).unwrap_or(VersionToken::ABSENT)
    }
}

pub type SharedL2Store = Arc<L2Store>;

#[cfg(test)]
mod tests {
    use super::*;
    use mssql_core::{InstanceId, ParameterMetadata};

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
    fn publish_then_get_round_trips() {
        let isolation_key = format!("test-{}", std::process::id());
        let store = L2Store::open(&isolation_key);
        store.publish("dbo.GetUser", SchemaObjectKind::Procedure, &procedure("dbo.GetUser", 7));
        let got = store.get("dbo.GetUser", SchemaObjectKind::Procedure).unwrap();
        assert_eq!(got.version(), VersionToken(7));
    }

    #[test]
    fn miss_returns_none() {
        let isolation_key = format!("test-miss-{}", std::process::id());
        let store = L2Store::open(&isolation_key);
        assert!(store.get("dbo.NoSuchProc", SchemaObjectKind::Procedure).is_none());
    }
}
