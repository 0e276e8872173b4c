//! Connection Provider (C1): instance-id resolution, pooling, health
//! checking, and automatic reconnection for the data access engine.

pub mod health;
pub mod pool;
mod provider;
pub mod reconnect;

pub use health::{
    HealthCheckConfig, HealthCheckResult, HealthChecker, HealthStatus, HealthThresholds, PingError,
    PingResult, create_shared_checker, ping_database,
};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use provider::{ConnectionProvider, InstanceConnector, MssqlInstanceConnector};
pub use reconnect::{
    BackoffStrategy, ConnectionFactory, ReconnectConfig, ReconnectEvent, ReconnectingConnection,
};
