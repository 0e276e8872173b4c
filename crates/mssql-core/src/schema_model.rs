//! Data model shared by the schema repository/service and the binding and
//! result-mapping engines: parameter and TVP metadata, version tokens,
//! columnar TVP payload buffers, and the request/cache-key vocabulary that
//! threads through the whole execution pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::InstanceId;

/// Monotonic, opaque version token for a cached procedure or TVP schema.
///
/// Strictly increases whenever the underlying database object is altered;
/// never reused. `0` denotes "object does not exist".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub u64);

impl VersionToken {
    pub const ABSENT: VersionToken = VersionToken(0);

    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

/// Parameter passing direction, as declared by the procedure's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// Immutable metadata for a single stored-procedure parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterMetadata {
    pub name: String,
    /// Database type tag (e.g. "varchar", "decimal", "structured").
    pub type_tag: String,
    pub direction: ParameterDirection,
    /// -1 means "maximum" (e.g. varchar(max)).
    pub max_length: i64,
    pub precision: i32,
    pub scale: i32,
    pub is_nullable: bool,
    pub has_default: bool,
    /// For `type_tag == "structured"`, the qualified user-defined type name.
    pub user_defined_type_name: Option<String>,
}

impl ParameterMetadata {
    pub fn is_structured(&self) -> bool {
        self.type_tag == "structured"
    }
}

/// Ordered sequence of parameters for one stored procedure, as cached by the
/// schema service.
///
/// Identity is `(qualified_name, instance)`; ordinals in `parameters` are
/// contiguous from 0 and match wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureSchema {
    pub qualified_name: String,
    pub instance: InstanceId,
    pub parameters: Vec<ParameterMetadata>,
    pub version: VersionToken,
    pub fetched_at: std::time::SystemTime,
}

/// A single column of a table-valued-parameter type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvpColumn {
    pub name: String,
    pub type_tag: String,
    pub ordinal: usize,
    pub max_length: i64,
    pub precision: i32,
    pub scale: i32,
    pub is_identity: bool,
    pub is_computed: bool,
    pub is_nullable: bool,
}

/// Ordered column sequence for one table-valued-parameter type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvpSchema {
    pub qualified_name: String,
    pub instance: InstanceId,
    pub columns: Vec<TvpColumn>,
    pub version: VersionToken,
    pub fetched_at: std::time::SystemTime,
}

/// Key identifying a cached procedure or TVP schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaCacheKey {
    pub qualified_name: String,
    pub instance: InstanceId,
    pub kind: SchemaObjectKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaObjectKind {
    Procedure,
    TableType,
}

/// An append-only, single-column buffer under construction for a TVP
/// payload. `T` stores value types unboxed and reference types as-is; the
/// buffer is closed under both by virtue of being generic.
#[derive(Debug, Default)]
pub struct ColumnarBuffer<T> {
    values: Vec<Option<T>>,
}

impl<T> ColumnarBuffer<T> {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: Option<T>) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&Option<T>> {
        self.values.get(row)
    }

    /// Release storage back to an empty buffer, for pooling by the caller.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// A streaming, forward-only record reader over a TVP payload under
/// construction. Backed by the same row count across every column buffer --
/// enforced by construction, since [`TvpPayloadWriter`] is the only way to
/// populate one.
pub struct TvpPayloadReader {
    schema: TvpSchema,
    /// One erased column buffer per `schema.columns` entry, stored as a
    /// boxed row-rendering closure to keep the reader non-generic.
    row_count: usize,
    render_row: Box<dyn Fn(usize) -> Vec<crate::Value> + Send + Sync>,
    cursor: usize,
}

impl TvpPayloadReader {
    pub fn new(
        schema: TvpSchema,
        row_count: usize,
        render_row: Box<dyn Fn(usize) -> Vec<crate::Value> + Send + Sync>,
    ) -> Self {
        Self {
            schema,
            row_count,
            render_row,
            cursor: 0,
        }
    }

    pub fn schema(&self) -> &TvpSchema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Read the next row in insertion order, or `None` once exhausted.
    pub fn next_row(&mut self) -> Option<Vec<crate::Value>> {
        if self.cursor >= self.row_count {
            return None;
        }
        let row = (self.render_row)(self.cursor);
        self.cursor += 1;
        Some(row)
    }
}

impl std::fmt::Debug for TvpPayloadReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvpPayloadReader")
            .field("schema", &self.schema.qualified_name)
            .field("row_count", &self.row_count)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// A compiled, cached function plus its hit counter.
///
/// `Materialize` entries map a row reader to a value of the target type;
/// `Binder` entries bind a single value into a command under a schema.
/// Both shapes share the generational-cache bookkeeping in the mapper
/// factory, so the hit counter lives on this common wrapper rather than on
/// each closure shape separately.
pub enum MapperEntryKind<M, B> {
    Materialize(M),
    Binder(B),
}

pub struct MapperEntry<M, B> {
    pub kind: MapperEntryKind<M, B>,
    hits: AtomicU64,
}

impl<M, B> MapperEntry<M, B> {
    pub fn new(kind: MapperEntryKind<M, B>) -> Self {
        Self {
            kind,
            hits: AtomicU64::new(0),
        }
    }

    /// Record a use and return the updated hit count.
    pub fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// How a command's schema should be resolved for this one call, overriding
/// the service's default freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaResolutionMode {
    /// Use the cache, refreshing per the service's normal version-check contract.
    #[default]
    CacheThenVerify,
    /// Skip the cache and force a repository round trip.
    ForceRefresh,
    /// Use whatever is cached even if stale; never calls the repository.
    CachedOnly,
}

/// The kind of command text carried by an [`ExecutionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Text,
    StoredProcedure,
}

/// Per-call overrides to the engine's default execution policy.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOverrides {
    pub timeout: Option<Duration>,
    pub schema_resolution: Option<SchemaResolutionMode>,
}

/// Immutable descriptor for one unit of work submitted to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub instance: InstanceId,
    pub command_text: String,
    pub command_kind: CommandKind,
    pub parameters: Vec<crate::Value>,
    pub transactional: bool,
    pub overrides: ExecutionOverrides,
}

impl ExecutionRequest {
    pub fn new(instance: InstanceId, command_text: impl Into<String>, command_kind: CommandKind) -> Self {
        Self {
            instance,
            command_text: command_text.into(),
            command_kind,
            parameters: Vec::new(),
            transactional: false,
            overrides: ExecutionOverrides::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<crate::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columnar_buffer_tracks_len() {
        let mut buf: ColumnarBuffer<i64> = ColumnarBuffer::new();
        buf.push(Some(1));
        buf.push(None);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.get(1), Some(&None));
    }

    #[test]
    fn mapper_entry_counts_hits() {
        let entry: MapperEntry<(), ()> = MapperEntry::new(MapperEntryKind::Binder(()));
        assert_eq!(entry.record_hit(), 1);
        assert_eq!(entry.record_hit(), 2);
        assert_eq!(entry.hits(), 2);
    }

    #[test]
    fn version_token_absent() {
        assert!(VersionToken::ABSENT.is_absent());
        assert!(!VersionToken(1).is_absent());
    }
}
