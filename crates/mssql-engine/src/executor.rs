//! Executor (C7): composes the binding engine (C4), result mapper
//! factory (C5), and execution strategy (C6) into five operation shapes,
//! plus the bulk and resumable-query flows built on top of them.
//!
//! The five shapes share one `Executor` struct with five public async
//! methods, the way the teacher's `batch::executor::BatchExecutor`
//! exposes several statement-execution entry points over one shared
//! connection/interceptor plumbing, rather than one shape-polymorphic
//! call.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use mssql_core::{Connection, DataAccessError, Result, Row, StatementResult, Value};
use sysinfo::System;

use crate::mapping::ResultMapperFactory;
use crate::parameters::BindingEngine;
use crate::strategy::{ExecutionStrategy, SchemaInvalidateHook, SchemaMode};

/// Outcome of one of the non-streaming operation shapes, used both as
/// the executor's real return value and as an interceptor's mock
/// substitute.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Rows(Vec<Row>),
    Scalar(Value),
    NonQuery(u64),
}

/// Context visible to interceptors: the command about to run (or that
/// just ran).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub command_text: String,
    pub is_stored_procedure: bool,
}

/// An interceptor observing (and optionally short-circuiting) execution.
pub trait Interceptor: Send + Sync {
    /// Return `Some(outcome)` to suppress the real call and substitute a
    /// mock result (for testing); `None` to let execution proceed.
    fn pre_execute(&self, _ctx: &ExecutionContext) -> Option<ExecutionOutcome> {
        None
    }

    fn post_execute(&self, _ctx: &ExecutionContext, _outcome: &Result<ExecutionOutcome>, _duration: Duration) {}
}

type PreChain = Box<dyn Fn(&ExecutionContext) -> Option<ExecutionOutcome> + Send + Sync>;
type PostChain = Box<dyn Fn(&ExecutionContext, &Result<ExecutionOutcome>, Duration) + Send + Sync>;

/// Pre-composes an interceptor list into a single delegate per
/// direction, built by reverse-fold (onion layering), so runtime
/// dispatch is one call per invocation regardless of chain length.
fn compose_pre(interceptors: &[Arc<dyn Interceptor>]) -> PreChain {
    interceptors.iter().cloned().rev().fold(
        Box::new(|_ctx: &ExecutionContext| None) as PreChain,
        |next, interceptor| Box::new(move |ctx| interceptor.pre_execute(ctx).or_else(|| next(ctx))),
    )
}

fn compose_post(interceptors: &[Arc<dyn Interceptor>]) -> PostChain {
    interceptors.iter().cloned().rev().fold(
        Box::new(|_ctx: &ExecutionContext, _outcome: &Result<ExecutionOutcome>, _dur: Duration| ()) as PostChain,
        |next, interceptor| {
            Box::new(move |ctx, outcome, dur| {
                interceptor.post_execute(ctx, outcome, dur);
                next(ctx, outcome, dur);
            })
        },
    )
}

fn is_write_command(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_uppercase();
    trimmed.starts_with("INSERT")
        || trimmed.starts_with("UPDATE")
        || trimmed.starts_with("DELETE")
        || trimmed.starts_with("MERGE")
}

/// Quotes a possibly schema-qualified identifier (`dbo.Orders` ->
/// `[dbo].[Orders]`), doubling closing brackets within each part to
/// prevent injection.
pub fn quote_identifier(name: &str) -> String {
    name.split('.').map(|part| format!("[{}]", part.replace(']', "]]"))).collect::<Vec<_>>().join(".")
}

/// Monotonic, high-entropy seed for temp-table names, initialized once
/// at process start from a wall-clock tick so names don't collide with
/// a prior run sharing the same pooled connections.
static TEMP_TABLE_COUNTER: once_cell::sync::Lazy<AtomicU64> = once_cell::sync::Lazy::new(|| {
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    AtomicU64::new(seed)
});

fn next_temp_table_name() -> String {
    let n = TEMP_TABLE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("#exec_bulk_{n:x}")
}

/// Configuration for [`BatchSizer`], builder-style with a [`Default`]
/// impl carrying the spec's documented defaults, the way the teacher's
/// `pool::PoolConfig` and `SchemaServiceConfig` are configured.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BatchSizerConfig {
    initial_size: usize,
    min_size: usize,
    max_size: usize,
    target_duration_ms: u64,
    oom_floor: usize,
}

impl BatchSizerConfig {
    /// # Panics
    ///
    /// Panics if `min_size > max_size` or if `max_size` is 0.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        assert!(max_size > 0, "max_size must be greater than 0, got {}", max_size);
        assert!(min_size <= max_size, "min_size ({}) cannot exceed max_size ({})", min_size, max_size);
        Self {
            initial_size: min_size.max(1),
            min_size,
            max_size,
            target_duration_ms: 1_000,
            oom_floor: 100,
        }
    }

    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    pub fn with_target_duration_ms(mut self, target_duration_ms: u64) -> Self {
        self.target_duration_ms = target_duration_ms;
        self
    }

    pub fn with_oom_floor(mut self, oom_floor: usize) -> Self {
        self.oom_floor = oom_floor;
        self
    }
}

impl Default for BatchSizerConfig {
    /// min_size 100, max_size 50,000, initial_size 100, target duration
    /// 1.0s, OOM floor 100.
    fn default() -> Self {
        Self::new(100, 50_000)
    }
}

/// Exponential-moving-average batch sizer for adaptive bulk insert:
/// tracks rows/sec, re-estimates a batch size targeting a fixed
/// duration per batch, clamped to ±20% per step and then to
/// `[min_size, max_size]`. Halves under memory pressure; floors at a
/// fixed minimum on an explicit OOM signal.
pub struct BatchSizer {
    current_size: AtomicUsize,
    ema_rows_per_sec: parking_lot::Mutex<f64>,
    min_size: usize,
    max_size: usize,
    target: Duration,
    oom_floor: usize,
}

impl BatchSizer {
    const EMA_WEIGHT: f64 = 0.3;

    pub fn new(config: BatchSizerConfig) -> Self {
        Self {
            current_size: AtomicUsize::new(config.initial_size.clamp(config.min_size, config.max_size)),
            ema_rows_per_sec: parking_lot::Mutex::new(0.0),
            min_size: config.min_size,
            max_size: config.max_size,
            target: Duration::from_millis(config.target_duration_ms),
            oom_floor: config.oom_floor,
        }
    }

    pub fn current_size(&self) -> usize {
        self.current_size.load(Ordering::Acquire)
    }

    /// Record one batch's (row count, elapsed) and re-estimate the next
    /// batch size.
    pub fn record(&self, rows: usize, elapsed: Duration) {
        if elapsed.as_secs_f64() <= 0.0 || rows == 0 {
            return;
        }
        let sample = rows as f64 / elapsed.as_secs_f64();
        let mut ema = self.ema_rows_per_sec.lock();
        *ema = if *ema == 0.0 { sample } else { Self::EMA_WEIGHT * sample + (1.0 - Self::EMA_WEIGHT) * *ema };
        let estimated = (*ema * self.target.as_secs_f64()).round().max(1.0) as usize;

        let current = self.current_size.load(Ordering::Acquire);
        let lower = (current as f64 * 0.8).floor() as usize;
        let upper = (current as f64 * 1.2).ceil() as usize;
        let clamped = estimated.clamp(lower.max(1), upper.max(lower + 1)).clamp(self.min_size, self.max_size);
        self.current_size.store(clamped, Ordering::Release);
    }

    /// Halve the batch size under memory pressure (live-set/available
    /// ratio above 0.8).
    pub fn apply_memory_pressure(&self, system: &System) {
        let total = system.total_memory();
        if total == 0 {
            return;
        }
        let used_ratio = system.used_memory() as f64 / total as f64;
        if used_ratio > 0.8 {
            let current = self.current_size.load(Ordering::Acquire);
            let halved = (current / 2).max(self.min_size);
            self.current_size.store(halved, Ordering::Release);
            tracing::warn!(used_ratio, halved, "memory pressure detected, halving bulk batch size");
        }
    }

    pub fn throttle_to_floor(&self) {
        self.current_size.store(self.oom_floor.max(self.min_size), Ordering::Release);
    }
}

/// Backoff configuration for [`Executor::resumable_query`]'s transient-error
/// retries, builder-style like [`BatchSizerConfig`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries, base_delay: Duration::from_millis(100), max_delay: Duration::from_secs(30) }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl Default for RetryConfig {
    /// 5 retries, 100ms base delay, 30s ceiling.
    fn default() -> Self {
        Self::new(5)
    }
}

/// External store for resumable-query cursor persistence.
#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    async fn save(&self, key: &str, cursor: &str) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<String>>;
}

/// Composes C4-C6 into the five operation shapes plus bulk/resumable
/// flows.
pub struct Executor {
    strategy: ExecutionStrategy,
    binder: BindingEngine,
    mapper: ResultMapperFactory,
    pre_chain: PreChain,
    post_chain: PostChain,
    dry_run: bool,
}

impl Executor {
    pub fn build(strategy: ExecutionStrategy, interceptors: Vec<Arc<dyn Interceptor>>, dry_run: bool) -> Self {
        let pre_chain = compose_pre(&interceptors);
        let post_chain = compose_post(&interceptors);
        Self {
            strategy,
            binder: BindingEngine::new(),
            mapper: ResultMapperFactory::default(),
            pre_chain,
            post_chain,
            dry_run,
        }
    }

    pub fn binder(&self) -> &BindingEngine {
        &self.binder
    }

    pub fn mapper(&self) -> &ResultMapperFactory {
        &self.mapper
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.strategy.schema_mode()
    }

    /// Runs `ctx` through the pre-interceptor chain, the strategy (unless
    /// suppressed), and the post-interceptor chain. `schema_invalidate`
    /// is forwarded to the strategy so a schema-mismatch code observed
    /// during this call can invalidate the right cache entry.
    async fn run_intercepted<F, Fut>(
        &self,
        ctx: ExecutionContext,
        schema_invalidate: Option<SchemaInvalidateHook>,
        op: F,
    ) -> Result<ExecutionOutcome>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<ExecutionOutcome>>,
    {
        if let Some(mock) = (self.pre_chain)(&ctx) {
            let outcome = Ok(mock.clone());
            (self.post_chain)(&ctx, &outcome, Duration::ZERO);
            return Ok(mock);
        }

        let start = Instant::now();
        let result = self.strategy.run(schema_invalidate, op).await;
        (self.post_chain)(&ctx, &result, start.elapsed());
        result
    }

    /// 1. Streaming query: materializes rows eagerly (the core's
    /// `Connection` trait has no lazy reader) and returns them as an
    /// in-memory iterator, so callers can still consume lazily even
    /// though the wire round trip itself is not incremental here.
    pub async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<std::vec::IntoIter<Row>> {
        let ctx = ExecutionContext { command_text: sql.to_string(), is_stored_procedure: false };
        let sql_owned = sql.to_string();
        let params_owned = params.to_vec();
        let outcome = self
            .run_intercepted(ctx, None, move |conn| async move {
                let result = conn.query(&sql_owned, &params_owned).await?;
                Ok(ExecutionOutcome::Rows(result.rows))
            })
            .await?;
        match outcome {
            ExecutionOutcome::Rows(rows) => Ok(rows.into_iter()),
            _ => Ok(Vec::new().into_iter()),
        }
    }

    /// 2. Single-row query: same pipeline, returns `None` if the result
    /// set is empty.
    pub async fn query_single_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut rows = self.query_stream(sql, params).await?;
        Ok(rows.next())
    }

    /// 3. Scalar: first column of the first row.
    pub async fn query_scalar(&self, sql: &str, params: &[Value]) -> Result<Value> {
        if self.dry_run && is_write_command(sql) {
            return Ok(Value::Null);
        }
        let ctx = ExecutionContext { command_text: sql.to_string(), is_stored_procedure: false };
        let sql_owned = sql.to_string();
        let params_owned = params.to_vec();
        let outcome = self
            .run_intercepted(ctx, None, move |conn| async move {
                let result = conn.query(&sql_owned, &params_owned).await?;
                let value = result.rows.first().and_then(|r| r.get(0)).cloned().unwrap_or(Value::Null);
                Ok(ExecutionOutcome::Scalar(value))
            })
            .await?;
        match outcome {
            ExecutionOutcome::Scalar(v) => Ok(v),
            _ => Ok(Value::Null),
        }
    }

    /// 4. Non-query: returns the affected-row count. Dry-run mode skips
    /// write commands entirely, reporting zero affected rows.
    pub async fn execute_non_query(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.execute_non_query_with_schema_hook(sql, params, false, None).await
    }

    /// Same as [`Self::execute_non_query`], but forwards `schema_invalidate`
    /// to the strategy so a schema-mismatch code can invalidate the right
    /// cache entry. Used by [`Self::execute_procedure`].
    async fn execute_non_query_with_schema_hook(
        &self,
        sql: &str,
        params: &[Value],
        is_stored_procedure: bool,
        schema_invalidate: Option<SchemaInvalidateHook>,
    ) -> Result<u64> {
        if self.dry_run && is_write_command(sql) {
            tracing::debug!(sql, "dry run: skipping write command");
            return Ok(0);
        }
        let ctx = ExecutionContext { command_text: sql.to_string(), is_stored_procedure };
        let sql_owned = sql.to_string();
        let params_owned = params.to_vec();
        let outcome = self
            .run_intercepted(ctx, schema_invalidate, move |conn| async move {
                let result: StatementResult = conn.execute(&sql_owned, &params_owned).await?;
                Ok(ExecutionOutcome::NonQuery(result.affected_rows))
            })
            .await?;
        match outcome {
            ExecutionOutcome::NonQuery(n) => Ok(n),
            _ => Ok(0),
        }
    }

    /// Stored-procedure call: consults the schema service for the
    /// procedure's parameter metadata (unless schema mode is `None`),
    /// binds each caller-supplied value against that metadata, and
    /// executes the call as a non-query. A schema-fetch failure is
    /// fatal under `SnapshotOnly`/`ServiceOnly`; under
    /// `SnapshotThenServiceFallback` it is logged and binding proceeds
    /// unvalidated via `bind_raw`.
    pub async fn execute_procedure(
        &self,
        repository: &mssql_tds::MssqlConnection,
        schema_service: &Arc<mssql_schema::SchemaService>,
        qualified_name: &str,
        raw_params: Vec<(String, Value)>,
    ) -> Result<u64> {
        let mode = self.schema_mode();
        let schema = if mode == SchemaMode::None {
            None
        } else {
            match schema_service.procedure_metadata(repository, qualified_name).await {
                Ok(schema) => Some(schema),
                Err(err) if mode != SchemaMode::SnapshotThenServiceFallback => return Err(err),
                Err(err) => {
                    tracing::warn!(qualified_name, error = %err, "schema fetch failed, binding without metadata");
                    None
                }
            }
        };

        let mut values = Vec::with_capacity(raw_params.len());
        let mut call = String::from("EXEC ");
        call.push_str(qualified_name);
        for (i, (name, value)) in raw_params.into_iter().enumerate() {
            let meta = schema.as_ref().and_then(|s| s.parameters.iter().find(|p| p.name == name));
            let bound = match meta {
                Some(meta) => self.binder.bind(meta, Some(value), mode != SchemaMode::SnapshotThenServiceFallback)?,
                None => self.binder.bind_raw(&name, value, None)?,
            };
            if i > 0 {
                call.push(',');
            }
            call.push_str(&format!(" @{} = ${}", bound.name, i + 1));
            values.push(bound.value);
        }

        let qualified_name = qualified_name.to_string();
        let schema_service = schema_service.clone();
        let hook: SchemaInvalidateHook = Arc::new(move || {
            schema_service.invalidate(&qualified_name, mssql_schema::SchemaObjectKind::Procedure);
        });

        self.execute_non_query_with_schema_hook(&call, &values, true, Some(hook)).await
    }

    /// 5. Multiple result sets: runs each statement in the batch in
    /// sequence against the same connection, collecting one row-set per
    /// statement. Dry-run returns an empty list.
    pub async fn query_multiple(&self, statements: &[String]) -> Result<Vec<Vec<Row>>> {
        if self.dry_run {
            return Ok(Vec::new());
        }
        let mut all = Vec::with_capacity(statements.len());
        for sql in statements {
            all.push(self.query_stream(sql, &[]).await?);
        }
        Ok(all.into_iter().map(|it| it.collect()).collect())
    }

    /// Bulk insert: iterates `rows` in adaptive batches sized by an EMA
    /// rows-per-second estimator targeting ~1s per batch.
    pub async fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        mut rows: impl Iterator<Item = Vec<Value>>,
        sizer: &BatchSizer,
    ) -> Result<u64> {
        if self.dry_run {
            let drained = rows.count();
            return Ok(drained as u64);
        }

        let system = System::new_all();
        let mut total = 0u64;
        loop {
            sizer.apply_memory_pressure(&system);
            let batch_size = sizer.current_size();
            let batch: Vec<Vec<Value>> = rows.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let n = batch.len();
            let sql = build_insert_sql(table, columns, n);
            let flat: Vec<Value> = batch.into_iter().flatten().collect();

            let start = Instant::now();
            let affected = self.execute_non_query(&sql, &flat).await?;
            sizer.record(n, start.elapsed());
            total += affected;
        }
        Ok(total)
    }

    /// Bulk update/delete: bulk-inserts the key rows into a uniquely
    /// named temp table, runs `build_merge_sql`, then drops the temp
    /// table.
    pub async fn bulk_merge(
        &self,
        target_table: &str,
        key_columns: &[String],
        set_columns: &[String],
        rows: impl Iterator<Item = Vec<Value>>,
        sizer: &BatchSizer,
        delete: bool,
    ) -> Result<u64> {
        let temp_table = next_temp_table_name();
        let mut all_columns = key_columns.to_vec();
        all_columns.extend(set_columns.iter().cloned());

        let create_sql = format!(
            "CREATE TABLE {} ({})",
            temp_table,
            all_columns.iter().map(|c| format!("{} sql_variant", quote_identifier(c))).collect::<Vec<_>>().join(", ")
        );
        if !self.dry_run {
            self.execute_non_query(&create_sql, &[]).await?;
        }

        let inserted = self.bulk_insert(&temp_table, &all_columns, rows, sizer).await?;

        let merge_sql = if delete {
            build_delete_join_sql(target_table, &temp_table, key_columns)
        } else {
            build_merge_sql(target_table, &temp_table, key_columns, set_columns)
        };
        let affected = if self.dry_run { 0 } else { self.execute_non_query(&merge_sql, &[]).await? };

        if !self.dry_run {
            let _ = self.execute_non_query(&format!("DROP TABLE {temp_table}"), &[]).await;
        }

        Ok(affected.max(inserted.min(affected)))
    }

    /// Bulk pipeline: drains a bounded channel, buffering to the
    /// adaptive batch size and flushing on completion. Drains without
    /// writing under dry-run so the producer never blocks.
    pub async fn bulk_pipeline(
        &self,
        table: &str,
        columns: &[String],
        mut receiver: tokio::sync::mpsc::Receiver<Vec<Value>>,
        sizer: &BatchSizer,
    ) -> Result<u64> {
        let mut total = 0u64;
        let mut buffer: Vec<Vec<Value>> = Vec::new();

        while let Some(row) = receiver.recv().await {
            if self.dry_run {
                total += 1;
                continue;
            }
            buffer.push(row);
            if buffer.len() >= sizer.current_size() {
                total += self.flush_bulk_buffer(table, columns, &mut buffer, sizer).await?;
            }
        }
        if !self.dry_run && !buffer.is_empty() {
            total += self.flush_bulk_buffer(table, columns, &mut buffer, sizer).await?;
        }
        Ok(total)
    }

    async fn flush_bulk_buffer(
        &self,
        table: &str,
        columns: &[String],
        buffer: &mut Vec<Vec<Value>>,
        sizer: &BatchSizer,
    ) -> Result<u64> {
        let n = buffer.len();
        let sql = build_insert_sql(table, columns, n);
        let flat: Vec<Value> = buffer.drain(..).flatten().collect();
        let start = Instant::now();
        let affected = self.execute_non_query(&sql, &flat).await?;
        sizer.record(n, start.elapsed());
        Ok(affected)
    }

    /// Resumable query: repeatedly runs `query_for_cursor(cursor)`,
    /// streaming rows until empty, persisting the last cursor via
    /// `cursor_store` and retrying transient errors with clamped
    /// exponential backoff. Raises `no-progress` after three
    /// consecutive batches whose cursor doesn't change.
    pub async fn resumable_query<QF, CF>(
        &self,
        key: &str,
        cursor_store: &dyn CursorStore,
        query_for_cursor: QF,
        next_cursor: CF,
        retry_config: &RetryConfig,
    ) -> Result<u64>
    where
        QF: Fn(&str) -> String,
        CF: Fn(&Row) -> String,
    {
        let mut cursor = cursor_store.load(key).await?.unwrap_or_default();
        let mut stuck_count = 0u32;
        let mut total = 0u64;
        let mut retry = 0u32;

        loop {
            let sql = query_for_cursor(&cursor);
            let batch = match self.query_stream(&sql, &[]).await {
                Ok(rows) => rows.collect::<Vec<_>>(),
                Err(err) => {
                    if is_transient(&err) && retry < retry_config.max_retries {
                        retry += 1;
                        let backoff = retry_config.base_delay * 2u32.pow(retry.min(6));
                        tokio::time::sleep(backoff.min(retry_config.max_delay)).await;
                        continue;
                    }
                    return Err(err);
                }
            };
            retry = 0;

            if batch.is_empty() {
                break;
            }
            total += batch.len() as u64;

            let new_cursor = next_cursor(batch.last().unwrap());
            if new_cursor == cursor {
                stuck_count += 1;
                if stuck_count >= 3 {
                    return Err(DataAccessError::Other(format!(
                        "resumable query '{key}' made no progress for 3 consecutive batches"
                    )));
                }
            } else {
                stuck_count = 0;
            }
            cursor = new_cursor;
            cursor_store.save(key, &cursor).await?;
        }
        Ok(total)
    }
}

fn is_transient(err: &DataAccessError) -> bool {
    matches!(err, DataAccessError::Transport { code, .. } if mssql_core::ErrorClass::classify(*code) == mssql_core::ErrorClass::Transient)
}

fn build_insert_sql(table: &str, columns: &[String], row_count: usize) -> String {
    let column_list = columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ");
    let placeholders: Vec<String> = (0..row_count)
        .map(|r| {
            let row_placeholders: Vec<String> =
                (0..columns.len()).map(|c| format!("${}", r * columns.len() + c + 1)).collect();
            format!("({})", row_placeholders.join(", "))
        })
        .collect();
    format!("INSERT INTO {} ({}) VALUES {}", quote_identifier(table), column_list, placeholders.join(", "))
}

fn build_merge_sql(target: &str, temp: &str, key_columns: &[String], set_columns: &[String]) -> String {
    let on_clause = key_columns
        .iter()
        .map(|c| format!("t.{0} = s.{0}", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let set_clause =
        set_columns.iter().map(|c| format!("t.{0} = s.{0}", quote_identifier(c))).collect::<Vec<_>>().join(", ");
    format!(
        "MERGE {} AS t USING {} AS s ON {} WHEN MATCHED THEN UPDATE SET {};",
        quote_identifier(target),
        temp,
        on_clause,
        set_clause
    )
}

fn build_delete_join_sql(target: &str, temp: &str, key_columns: &[String]) -> String {
    let on_clause = key_columns
        .iter()
        .map(|c| format!("t.{0} = s.{0}", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("DELETE t FROM {} AS t INNER JOIN {} AS s ON {};", quote_identifier(target), temp, on_clause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mssql_core::{InstanceId, PreparedStatement, QueryResult, Transaction};

    struct StubConnection;

    #[async_trait::async_trait]
    impl Connection for StubConnection {
        fn driver_name(&self) -> &str {
            "mssql"
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            Ok(StatementResult { is_query: false, result: None, affected_rows: 3, error: None })
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            let mut result = QueryResult::empty();
            result.rows.push(Row::new(vec!["id".to_string()], vec![Value::Int32(1)]));
            result.rows.push(Row::new(vec!["id".to_string()], vec![Value::Int32(2)]));
            Ok(result)
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

    fn executor(dry_run: bool) -> Executor {
        let strategy = ExecutionStrategy::Transactional(crate::strategy::TransactionalStrategy::new(
            InstanceId::new("test"),
            Arc::new(StubConnection),
        ));
        Executor::build(strategy, Vec::new(), dry_run)
    }

    #[tokio::test]
    async fn query_stream_returns_materialized_rows() {
        let exec = executor(false);
        let rows: Vec<_> = exec.query_stream("SELECT id FROM t", &[]).await.unwrap().collect();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn query_single_row_returns_first() {
        let exec = executor(false);
        let row = exec.query_single_row("SELECT id FROM t", &[]).await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int32(1)));
    }

    #[tokio::test]
    async fn scalar_reads_first_column_of_first_row() {
        let exec = executor(false);
        let value = exec.query_scalar("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(value, Value::Int32(1));
    }

    #[tokio::test]
    async fn non_query_returns_affected_rows() {
        let exec = executor(false);
        let n = exec.execute_non_query("UPDATE t SET x = 1", &[]).await.unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn dry_run_skips_write_commands() {
        let exec = executor(true);
        let n = exec.execute_non_query("DELETE FROM t", &[]).await.unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn quote_identifier_handles_schema_qualified_names() {
        assert_eq!(quote_identifier("dbo.Orders"), "[dbo].[Orders]");
        assert_eq!(quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn batch_sizer_clamps_growth_to_20_percent() {
        let sizer = BatchSizer::new(BatchSizerConfig::new(10, 100_000).with_initial_size(100));
        sizer.record(100_000, Duration::from_millis(10));
        assert!(sizer.current_size() <= 120);
    }

    struct SuppressingInterceptor;
    impl Interceptor for SuppressingInterceptor {
        fn pre_execute(&self, _ctx: &ExecutionContext) -> Option<ExecutionOutcome> {
            Some(ExecutionOutcome::NonQuery(42))
        }
    }

    #[tokio::test]
    async fn interceptor_can_suppress_and_mock_result() {
        let strategy = ExecutionStrategy::Transactional(crate::strategy::TransactionalStrategy::new(
            InstanceId::new("test"),
            Arc::new(StubConnection),
        ));
        let exec = Executor::build(strategy, vec![Arc::new(SuppressingInterceptor)], false);
        let n = exec.execute_non_query("UPDATE t SET x = 1", &[]).await.unwrap();
        assert_eq!(n, 42);
    }

    struct CursorConnection {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Connection for CursorConnection {
        fn driver_name(&self) -> &str {
            "mssql"
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            unimplemented!()
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result = QueryResult::empty();
            if call == 0 {
                result.rows.push(Row::new(vec!["id".to_string()], vec![Value::Int32(1)]));
                result.rows.push(Row::new(vec!["id".to_string()], vec![Value::Int32(2)]));
            }
            Ok(result)
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

    struct MemoryCursorStore(parking_lot::Mutex<Option<String>>);

    #[async_trait::async_trait]
    impl CursorStore for MemoryCursorStore {
        async fn save(&self, _key: &str, cursor: &str) -> Result<()> {
            *self.0.lock() = Some(cursor.to_string());
            Ok(())
        }
        async fn load(&self, _key: &str) -> Result<Option<String>> {
            Ok(self.0.lock().clone())
        }
    }

    #[tokio::test]
    async fn resumable_query_terminates_on_empty_batch() {
        let strategy = ExecutionStrategy::Transactional(crate::strategy::TransactionalStrategy::new(
            InstanceId::new("test"),
            Arc::new(CursorConnection { calls: AtomicUsize::new(0) }),
        ));
        let exec = Executor::build(strategy, Vec::new(), false);
        let store = MemoryCursorStore(parking_lot::Mutex::new(None));

        let total = exec
            .resumable_query(
                "job",
                &store,
                |cursor| format!("SELECT id FROM t WHERE id > {cursor}"),
                |row| row.get(0).and_then(Value::as_i64).unwrap_or(0).to_string(),
                &RetryConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(total, 2);
    }

    struct StuckConnection;

    #[async_trait::async_trait]
    impl Connection for StuckConnection {
        fn driver_name(&self) -> &str {
            "mssql"
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            unimplemented!()
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            let mut result = QueryResult::empty();
            result.rows.push(Row::new(vec!["id".to_string()], vec![Value::Int32(1)]));
            Ok(result)
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
    async fn resumable_query_raises_no_progress_after_three_stuck_batches() {
        let strategy = ExecutionStrategy::Transactional(crate::strategy::TransactionalStrategy::new(
            InstanceId::new("test"),
            Arc::new(StuckConnection),
        ));
        let exec = Executor::build(strategy, Vec::new(), false);
        let store = MemoryCursorStore(parking_lot::Mutex::new(None));

        let result = exec
            .resumable_query(
                "job",
                &store,
                |cursor| format!("SELECT id FROM t WHERE id > {cursor}"),
                |_row| "1".to_string(),
                &RetryConfig::default(),
            )
            .await;

        assert!(matches!(result, Err(DataAccessError::Other(_))));
    }
}
