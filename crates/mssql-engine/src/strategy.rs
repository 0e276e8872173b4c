//! Execution Strategy (C6): wraps a database round trip, classifies the
//! server's response, and decides whether to retry, invalidate cached
//! schema, or break the circuit.
//!
//! Modeled as a sum type behind one shared operation, per the two
//! variants a caller selects between. The "wrap a fallible operation,
//! classify the error, decide retry/break" control flow is grounded in
//! the teacher's `batch::executor::BatchExecutor` (transaction
//! start/commit/rollback around a sequence of fallible calls) and its
//! `mssql-connection::reconnect` wrapper (classify-then-act over a
//! connection factory); the wire error code table is
//! `mssql_core::ErrorClass::classify`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mssql_core::{Connection, DataAccessError, ErrorClass, InstanceId, Result};

use mssql_connection::ConnectionProvider;

/// Per-request schema resolution policy; a strategy sets a default, the
/// caller may override for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    /// Use whatever is cached without a network round trip.
    SnapshotOnly,
    /// Always consult the schema service.
    ServiceOnly,
    /// Use the snapshot; fall back to the service if the snapshot is
    /// absent.
    SnapshotThenServiceFallback,
    /// No schema resolution at all (bind without metadata).
    None,
}

/// Extract the server error code a transport error carries, if any.
fn transport_code(err: &DataAccessError) -> Option<i32> {
    match err {
        DataAccessError::Transport { code, .. } => Some(*code),
        _ => None,
    }
}

/// Hook invoked when a schema-mismatch error code is observed for a
/// stored-procedure call, so the caller (C7's executor, which owns the
/// schema key) can invalidate the right cache entry.
pub type SchemaInvalidateHook = Arc<dyn Fn() + Send + Sync>;

/// Obtains a fresh connection per request and cooperates with an
/// external resilience pipeline (retry/circuit-breaker/timeout) by
/// classifying errors into actionable outcomes rather than deciding
/// policy itself.
pub struct ResilientStrategy {
    instance: InstanceId,
    provider: Arc<ConnectionProvider>,
    deadlock_priority_elevated: AtomicBool,
    schema_mode: SchemaMode,
}

impl ResilientStrategy {
    pub fn new(instance: InstanceId, provider: Arc<ConnectionProvider>) -> Self {
        Self {
            instance,
            provider,
            deadlock_priority_elevated: AtomicBool::new(false),
            schema_mode: SchemaMode::SnapshotThenServiceFallback,
        }
    }

    /// Whether the next attempt on this strategy instance should run
    /// with elevated deadlock priority (set after a 1205 observation).
    pub fn deadlock_priority_elevated(&self) -> bool {
        self.deadlock_priority_elevated.load(Ordering::Acquire)
    }

    pub fn clear_deadlock_priority(&self) {
        self.deadlock_priority_elevated.store(false, Ordering::Release);
    }

    pub async fn run<F, Fut, R>(
        &self,
        schema_invalidate: Option<SchemaInvalidateHook>,
        op: F,
    ) -> Result<R>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let cancel = tokio_util::sync::CancellationToken::new();
        let conn = self.provider.open(&self.instance, cancel).await?;
        if self.deadlock_priority_elevated.swap(false, Ordering::AcqRel) {
            conn.execute("SET DEADLOCK_PRIORITY HIGH", &[]).await?;
            tracing::debug!(instance = %self.instance, "elevated deadlock priority for this attempt");
        }
        match op(conn).await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.classify_and_act(err, schema_invalidate)),
        }
    }

    fn classify_and_act(&self, err: DataAccessError, schema_invalidate: Option<SchemaInvalidateHook>) -> DataAccessError {
        let Some(code) = transport_code(&err) else {
            return err;
        };
        match ErrorClass::classify(code) {
            ErrorClass::Deadlock => {
                self.deadlock_priority_elevated.store(true, Ordering::Release);
                tracing::warn!(instance = %self.instance, code, "deadlock victim, elevating priority for next attempt");
                err
            }
            ErrorClass::SchemaMismatch => {
                if let Some(hook) = schema_invalidate {
                    hook();
                }
                tracing::info!(instance = %self.instance, code, "schema mismatch, cache invalidated for self-healing refresh");
                err
            }
            ErrorClass::FastFail => {
                tracing::error!(instance = %self.instance, code, "fast-fail code observed, breaking circuit");
                DataAccessError::CircuitBroken { instance: self.instance.to_string(), retry_after_ms: 0 }
            }
            ErrorClass::Transient | ErrorClass::Unclassified => err,
        }
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.schema_mode
    }
}

/// Uses an externally provided, already-open connection (bound to an
/// active transaction); never opens a new connection and never retries.
pub struct TransactionalStrategy {
    instance: InstanceId,
    connection: Arc<dyn Connection>,
    schema_mode: SchemaMode,
}

impl TransactionalStrategy {
    pub fn new(instance: InstanceId, connection: Arc<dyn Connection>) -> Self {
        Self { instance, connection, schema_mode: SchemaMode::SnapshotOnly }
    }

    pub async fn run<F, Fut, R>(
        &self,
        schema_invalidate: Option<SchemaInvalidateHook>,
        op: F,
    ) -> Result<R>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        match op(self.connection.clone()).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Some(code) = transport_code(&err) {
                    if ErrorClass::classify(code) == ErrorClass::SchemaMismatch {
                        if let Some(hook) = schema_invalidate {
                            hook();
                        }
                        tracing::info!(
                            instance = %self.instance,
                            code,
                            "schema mismatch inside transaction, cache invalidated and re-thrown"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.schema_mode
    }
}

/// Sum type selecting between the two execution strategies behind one
/// shared operation signature.
pub enum ExecutionStrategy {
    Resilient(ResilientStrategy),
    Transactional(TransactionalStrategy),
}

impl ExecutionStrategy {
    pub async fn run<F, Fut, R>(&self, schema_invalidate: Option<SchemaInvalidateHook>, op: F) -> Result<R>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        match self {
            ExecutionStrategy::Resilient(s) => s.run(schema_invalidate, op).await,
            ExecutionStrategy::Transactional(s) => s.run(schema_invalidate, op).await,
        }
    }

    pub fn schema_mode(&self) -> SchemaMode {
        match self {
            ExecutionStrategy::Resilient(s) => s.schema_mode(),
            ExecutionStrategy::Transactional(s) => s.schema_mode(),
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, ExecutionStrategy::Transactional(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mssql_core::{PreparedStatement, QueryResult, StatementResult, Transaction, Value};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct StubConnection {
        executed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Connection for StubConnection {
        fn driver_name(&self) -> &str {
            "mssql"
        }
        async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
            self.executed.lock().push(sql.to_string());
            Ok(StatementResult { is_query: false, result: None, affected_rows: 0, error: None })
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            unimplemented!()
        }
        async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
            unimplemented!()
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn transactional_never_retries_and_rethrows_schema_mismatch() {
        let strategy =
            TransactionalStrategy::new(InstanceId::new("test"), Arc::new(StubConnection::default()));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let hook: SchemaInvalidateHook = Arc::new(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        let result: Result<()> = strategy
            .run(Some(hook), |_conn| async move {
                Err(DataAccessError::Transport { code: 207, message: "column not found".into() })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(strategy.schema_mode(), SchemaMode::SnapshotOnly);
    }

    #[tokio::test]
    async fn fast_fail_code_converts_to_circuit_broken() {
        let provider =
            Arc::new(ConnectionProvider::new(Arc::new(StubConnector { executed: Arc::new(Mutex::new(Vec::new())) })));
        provider.register(InstanceId::new("prod"), "server=host");
        let strategy = ResilientStrategy::new(InstanceId::new("prod"), provider);

        let result: Result<()> = strategy
            .run(None, |_conn| async move {
                Err(DataAccessError::Transport { code: 18456, message: "login failed".into() })
            })
            .await;

        assert!(matches!(result, Err(DataAccessError::CircuitBroken { .. })));
    }

    #[tokio::test]
    async fn deadlock_code_elevates_priority_for_next_attempt() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let provider = Arc::new(ConnectionProvider::new(Arc::new(StubConnector { executed: executed.clone() })));
        provider.register(InstanceId::new("prod"), "server=host");
        let strategy = ResilientStrategy::new(InstanceId::new("prod"), provider);
        assert!(!strategy.deadlock_priority_elevated());

        let _: Result<()> = strategy
            .run(None, |_conn| async move {
                Err(DataAccessError::Transport { code: 1205, message: "deadlock".into() })
            })
            .await;

        assert!(strategy.deadlock_priority_elevated());
        assert!(executed.lock().is_empty());
    }

    #[tokio::test]
    async fn next_attempt_issues_deadlock_priority_then_clears_flag() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let provider = Arc::new(ConnectionProvider::new(Arc::new(StubConnector { executed: executed.clone() })));
        provider.register(InstanceId::new("prod"), "server=host");
        let strategy = ResilientStrategy::new(InstanceId::new("prod"), provider);

        let _: Result<()> = strategy
            .run(None, |_conn| async move {
                Err(DataAccessError::Transport { code: 1205, message: "deadlock".into() })
            })
            .await;
        assert!(strategy.deadlock_priority_elevated());

        let result: Result<()> = strategy.run(None, |_conn| async move { Ok(()) }).await;

        assert!(result.is_ok());
        assert_eq!(executed.lock().as_slice(), ["SET DEADLOCK_PRIORITY HIGH"]);
        assert!(!strategy.deadlock_priority_elevated());
    }

    struct StubConnector {
        executed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl mssql_connection::InstanceConnector for StubConnector {
        async fn connect(&self, _connection_string: &str) -> Result<Arc<dyn Connection>> {
            Ok(Arc::new(StubConnection { executed: self.executed.clone() }))
        }
    }
}
