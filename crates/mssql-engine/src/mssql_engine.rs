//! Data access engine core: parameter binding (C4), result mapping (C5),
//! execution strategy (C6), and the executor that composes them with
//! bulk and resumable-query flows (C7).

pub mod executor;
pub mod mapping;
pub mod parameters;
pub mod strategy;

pub use mapping::{MapperCache, ResultMapperFactory, RowMapper, RowSignature, map_dictionary, map_scalar};

pub use strategy::{
    ExecutionStrategy, ResilientStrategy, SchemaInvalidateHook, SchemaMode, TransactionalStrategy,
};

pub use executor::{
    BatchSizer, BatchSizerConfig, CursorStore, Executor, ExecutionContext, ExecutionOutcome, Interceptor,
    RetryConfig, quote_identifier,
};
