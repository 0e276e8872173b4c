//! Core abstractions and data model for the data access engine
//!
//! This crate provides the fundamental traits and types every other crate in
//! the workspace depends on:
//!
//! - `Connection` / `Transaction` / `PreparedStatement` - driver-facing traits
//! - `InstanceId` / `InstanceResolver` - logical endpoint naming and resolution
//! - The schema/binding data model: `ParameterMetadata`, `ProcedureSchema`,
//!   `TvpSchema`, `ColumnarBuffer`, `TvpPayloadReader`, `MapperEntry`,
//!   `ExecutionRequest`, `VersionToken`
//! - `Value` / `Row` / `ColumnMeta` / `QueryResult` - wire-independent result types
//! - `DataAccessError` - the engine's error-kind taxonomy

mod connection;
mod error;
mod instance;
mod schema_model;
pub mod security;
pub mod transaction;
mod types;

pub use connection::*;
pub use error::*;
pub use instance::*;
pub use schema_model::*;
pub use security::*;
pub use transaction::*;
pub use types::*;
