//! Schema Repository and Schema Service for the data access engine
//!
//! This crate provides:
//! - C2 Schema Repository: re-exported from `mssql-tds`'s `SchemaCatalog`,
//!   the direct system-catalog queries backing `procedure_metadata`,
//!   `tvp_metadata`, and the version-token operations.
//! - C3 Schema Service: a two-tier cache (in-process L1, cross-process L2)
//!   in front of the repository, following the version-token contract.

mod l1;
mod l2;
mod service;

pub use l1::{CacheEntry, SchemaKey, SchemaObjectKind, SchemaPayload};
pub use l2::{L2Store, SharedL2Store};
pub use mssql_tds::{BulkSchemaResult, SchemaCatalog};
pub use service::{ChangeHook, SchemaChanged, SchemaService, SchemaServiceConfig};
