//! Connection Provider (C1)
//!
//! Resolves an [`InstanceId`] to an open [`Connection`], with fail-fast
//! disposal: any error during opening must tear down the partially
//! constructed connection before returning.

use std::collections::HashMap;
use std::sync::Arc;

use mssql_core::{Connection, DataAccessError, InstanceId, InstanceResolver, Result};

/// Per-instance connection factory: knows how to turn a resolved connection
/// string into an open [`Connection`]. Implemented by the wire driver crate.
#[async_trait::async_trait]
pub trait InstanceConnector: Send + Sync {
    async fn connect(&self, connection_string: &str) -> Result<Arc<dyn Connection>>;
}

/// The only production [`InstanceConnector`]: opens a TDS connection via
/// `mssql-tds`. Fail-fast per C1's contract -- `MssqlConnection::from_connection_string`
/// itself tears down its socket before returning on any handshake error, so
/// there is never a partially constructed connection to dispose here.
#[derive(Debug, Default)]
pub struct MssqlInstanceConnector;

#[async_trait::async_trait]
impl InstanceConnector for MssqlInstanceConnector {
    async fn connect(&self, connection_string: &str) -> Result<Arc<dyn Connection>> {
        let conn = mssql_tds::MssqlConnection::from_connection_string(connection_string)
            .await
            .map_err(|e| DataAccessError::Connection(e.to_string()))?;
        Ok(Arc::new(conn))
    }
}

/// Resolves instance ids to connections and opens them, disposing any
/// partially constructed connection on failure.
///
/// Ad-hoc registrations and aliases share [`InstanceResolver`]'s resolution
/// order (ad-hoc map > literal-string prefix > configured alias map);
/// registering or unregistering an ad-hoc endpoint is process-lifetime and
/// does not require restarting the provider.
pub struct ConnectionProvider {
    resolver: InstanceResolver,
    connector: Arc<dyn InstanceConnector>,
}

impl ConnectionProvider {
    pub fn new(connector: Arc<dyn InstanceConnector>) -> Self {
        Self {
            resolver: InstanceResolver::new(),
            connector,
        }
    }

    pub fn with_aliases(connector: Arc<dyn InstanceConnector>, aliases: HashMap<InstanceId, String>) -> Self {
        Self {
            resolver: InstanceResolver::with_aliases(aliases),
            connector,
        }
    }

    /// Register an ad-hoc connection string for an instance for the
    /// lifetime of the process (or until [`unregister`](Self::unregister)).
    pub fn register(&self, id: InstanceId, connection_string: impl Into<String>) {
        self.resolver.register(id, connection_string);
    }

    pub fn unregister(&self, id: &InstanceId) {
        self.resolver.unregister(id);
    }

    /// Open a connection for `instance_id`. Resolution failure is reported
    /// as a [`DataAccessError::Configuration`] distinct from transport
    /// errors; any connection error during opening disposes the partial
    /// connection before the error is returned.
    #[tracing::instrument(skip(self, cancel), fields(instance = %instance_id))]
    pub async fn open(
        &self,
        instance_id: &InstanceId,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<Arc<dyn Connection>> {
        let connection_string = self.resolver.resolve(instance_id).map_err(|e| {
            DataAccessError::Configuration(format!("resolving instance '{instance_id}': {e}"))
        })?;

        if cancel.is_cancelled() {
            return Err(DataAccessError::Cancelled);
        }

        match self.connector.connect(&connection_string).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                tracing::warn!(instance = %instance_id, error = %err, "failed to open connection");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mssql_core::{PreparedStatement, QueryResult, StatementResult, Transaction, Value};

    struct FailingConnector;

    #[async_trait::async_trait]
    impl InstanceConnector for FailingConnector {
        async fn connect(&self, _connection_string: &str) -> Result<Arc<dyn Connection>> {
            Err(DataAccessError::Connection("refused".into()))
        }
    }

    struct StubConnection;

    #[async_trait::async_trait]
    impl Connection for StubConnection {
        fn driver_name(&self) -> &str {
            "mssql"
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            unimplemented!()
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

    struct StubConnector;

    #[async_trait::async_trait]
    impl InstanceConnector for StubConnector {
        async fn connect(&self, _connection_string: &str) -> Result<Arc<dyn Connection>> {
            Ok(Arc::new(StubConnection))
        }
    }

    #[tokio::test]
    async fn unresolved_instance_is_a_configuration_error() {
        let provider = ConnectionProvider::new(Arc::new(FailingConnector));
        let err = provider
            .open(&InstanceId::new("unknown"), tokio_util::sync::CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataAccessError::Configuration(_)));
    }

    #[tokio::test]
    async fn resolved_instance_opens_via_connector() {
        let provider = ConnectionProvider::new(Arc::new(StubConnector));
        provider.register(InstanceId::new("prod"), "server=host;database=db");
        let conn = provider
            .open(&InstanceId::new("prod"), tokio_util::sync::CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(conn.driver_name(), "mssql");
    }

    #[tokio::test]
    async fn cancellation_is_honored_before_connecting() {
        let provider = ConnectionProvider::new(Arc::new(FailingConnector));
        provider.register(InstanceId::new("prod"), "server=host");
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        let err = provider.open(&InstanceId::new("prod"), cancel).await.err().unwrap();
        assert!(matches!(err, DataAccessError::Cancelled));
    }
}
