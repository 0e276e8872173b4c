//! TDS wire driver for the data access engine
//!
//! Implements `mssql_core::Connection` over `tiberius`, plus the
//! system-catalog queries the Schema Repository (C2) builds on.

mod connection;
mod schema;

#[cfg(test)]
mod connection_tests;

pub use connection::{MssqlConnection, MssqlConnectionError};
pub use schema::{BulkSchemaResult, SchemaCatalog};
