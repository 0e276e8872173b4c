//! Error types for the data access engine

use thiserror::Error;

/// Core error type for data access engine operations.
///
/// The variants through `Cancelled` are generic connection/pool plumbing
/// errors; the group starting at `SchemaLookup` is the engine's own
/// error-kind taxonomy, kept distinct from raw wire/transport error codes so
/// callers can match on what went wrong without knowing the server's numeric
/// vocabulary.
#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    /// Schema metadata could not be retrieved at all: catalog query failed,
    /// object does not exist, or the wire driver returned an unrecoverable
    /// error while fetching it.
    #[error("schema lookup failed for {object}: {reason}")]
    SchemaLookup { object: String, reason: String },

    /// Cached schema metadata no longer matches the server's current
    /// definition of the object (parameter count/order/type changed).
    #[error("schema mismatch for {object}: {reason}")]
    SchemaMismatch { object: String, reason: String },

    /// A parameter the procedure/TVP schema marks as required was not bound.
    #[error("required parameter '{parameter}' was not bound")]
    RequiredParameterMissing { parameter: String },

    /// A bound value does not fit the target column/parameter's declared
    /// type, precision, or scale.
    #[error(
        "value for parameter '{parameter}' overflows {type_tag}(Precision:{precision}, Scale:{scale}): {value}"
    )]
    RangeOverflow {
        parameter: String,
        value: String,
        type_tag: String,
        precision: i32,
        scale: i32,
    },

    /// Assembling a table-valued-parameter payload failed: column count
    /// mismatch, unsupported column type, or a row ordering problem.
    #[error("bulk/TVP binding failed: {0}")]
    BulkBinding(String),

    /// The server rejected the request with a wire-level error code distinct
    /// from this taxonomy's own kinds, surfaced verbatim for diagnostics.
    #[error("transport error {code}: {message}")]
    Transport { code: i32, message: String },

    /// The circuit breaker for an instance is open; the request was rejected
    /// without attempting the network call.
    #[error("circuit broken for {instance}, retry after {retry_after_ms}ms")]
    CircuitBroken { instance: String, retry_after_ms: u64 },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for data access engine operations
pub type Result<T> = std::result::Result<T, DataAccessError>;

/// Classification of a server-reported error code into the engine's own
/// error-kind taxonomy, per the wire error code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 1205: deadlock victim, retry with priority elevation.
    Deadlock,
    /// 201, 207, 8144: parameter/schema mismatch, cached schema is stale.
    SchemaMismatch,
    /// 18456, 4060, 2812: auth/database/procedure not found, retrying will not help.
    FastFail,
    /// -2, 53, 233: transient network-level failure, safe to retry.
    Transient,
    /// Anything not in the known table.
    Unclassified,
}

impl ErrorClass {
    /// Classify a server error code per the engine's wire error code table.
    pub fn classify(code: i32) -> Self {
        match code {
            1205 => ErrorClass::Deadlock,
            201 | 207 | 8144 => ErrorClass::SchemaMismatch,
            18456 | 4060 | 2812 => ErrorClass::FastFail,
            -2 | 53 | 233 => ErrorClass::Transient,
            _ => ErrorClass::Unclassified,
        }
    }
}
