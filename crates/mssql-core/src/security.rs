//! Security-related configuration types for database connections
//!
//! This module provides configuration types for secure connections to a
//! SQL-Server-family endpoint, namely TLS/SSL settings. The wire driver
//! (`mssql-tds`) translates a `TlsConfig` into the concrete `rustls`
//! configuration tiberius expects.

mod tls_config;

pub use tls_config::*;
