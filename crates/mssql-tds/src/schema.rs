//! System-catalog queries backing the Schema Repository (C2).
//!
//! Everything here talks to `sys.*` catalog views directly rather than
//! `INFORMATION_SCHEMA`, because only the `sys` views expose the
//! `modify_date` columns the version-token scheme in [`object_version`] and
//! [`tvp_version`] depends on, and because table-valued parameter column
//! metadata has no `INFORMATION_SCHEMA` equivalent at all.

use mssql_core::{
    Connection, DataAccessError, InstanceId, ParameterDirection, ParameterMetadata,
    ProcedureSchema, Result, TvpColumn, TvpSchema, Value, VersionToken,
};

use crate::connection::MssqlConnection;

/// Splits `schema.name` into its parts, defaulting the schema to `dbo` when
/// the caller passed an unqualified name.
fn split_qualified(qualified_name: &str) -> (&str, &str) {
    match qualified_name.split_once('.') {
        Some((schema, name)) => (schema, name),
        None => ("dbo", qualified_name),
    }
}

/// Translates a `*`/`?` glob pattern into a parameter-bound SQL `LIKE`
/// pattern (`%`/`_`). Literal `%`, `_`, and `[` are escaped so the filter
/// can never be turned into unintended wildcards by the object name itself.
fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '[' => {
                out.push('[');
                out.push(ch);
                out.push(']');
            }
            other => out.push(other),
        }
    }
    out
}

/// Reads procedure and table-valued-parameter metadata from the database
/// catalog (C2).
#[async_trait::async_trait]
pub trait SchemaCatalog {
    async fn object_version(&self, qualified_name: &str) -> Result<VersionToken>;
    async fn tvp_version(&self, qualified_name: &str) -> Result<VersionToken>;
    async fn procedure_metadata(
        &self,
        qualified_name: &str,
        instance: &InstanceId,
    ) -> Result<ProcedureSchema>;
    async fn tvp_metadata(&self, qualified_name: &str, instance: &InstanceId) -> Result<TvpSchema>;
    /// One round trip covering every object matching `include_patterns` and
    /// not matching `exclude_patterns` in `schema`.
    async fn bulk(
        &self,
        schema: &str,
        instance: &InstanceId,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<BulkSchemaResult>;
}

#[derive(Debug, Default)]
pub struct BulkSchemaResult {
    pub sp_versions: Vec<(String, VersionToken)>,
    pub tvp_versions: Vec<(String, VersionToken)>,
    pub sp_params: Vec<ProcedureSchema>,
    pub tvp_columns: Vec<TvpSchema>,
}

/// Epoch for the version-token encoding: minutes since this instant fit
/// comfortably in a `u64` for centuries, unlike seconds-since-1900 in an
/// `i32`, which SQL Server's own `DATEDIFF` would overflow.
const VERSION_EPOCH: &str = "2000-01-01";

#[async_trait::async_trait]
impl SchemaCatalog for MssqlConnection {
    async fn object_version(&self, qualified_name: &str) -> Result<VersionToken> {
        let (schema, name) = split_qualified(qualified_name);
        let result = Connection::query(
            self,
            &format!(
                "SELECT CAST(DATEDIFF(MINUTE, '{VERSION_EPOCH}', o.modify_date) AS BIGINT)
                 FROM sys.objects o
                 INNER JOIN sys.schemas s ON o.schema_id = s.schema_id
                 WHERE s.name = @P1 AND o.name = @P2 AND o.type IN ('P', 'PC')"
            ),
            &[Value::String(schema.to_string()), Value::String(name.to_string())],
        )
        .await
        .map_err(|e| DataAccessError::SchemaLookup {
            object: qualified_name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(row_to_version(&result.rows))
    }

    async fn tvp_version(&self, qualified_name: &str) -> Result<VersionToken> {
        let (schema, name) = split_qualified(qualified_name);
        let result = Connection::query(
            self,
            &format!(
                "SELECT CAST(DATEDIFF(MINUTE, '{VERSION_EPOCH}', o.modify_date) AS BIGINT)
                 FROM sys.table_types tt
                 INNER JOIN sys.schemas s ON tt.schema_id = s.schema_id
                 INNER JOIN sys.objects o ON tt.type_table_object_id = o.object_id
                 WHERE s.name = @P1 AND tt.name = @P2"
            ),
            &[Value::String(schema.to_string()), Value::String(name.to_string())],
        )
        .await
        .map_err(|e| DataAccessError::SchemaLookup {
            object: qualified_name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(row_to_version(&result.rows))
    }

    async fn procedure_metadata(
        &self,
        qualified_name: &str,
        instance: &InstanceId,
    ) -> Result<ProcedureSchema> {
        let version = self.object_version(qualified_name).await?;
        if version.is_absent() {
            return Err(DataAccessError::SchemaLookup {
                object: qualified_name.to_string(),
                reason: "procedure does not exist".to_string(),
            });
        }

        let (schema, name) = split_qualified(qualified_name);
        let result = Connection::query(
            self,
            "SELECT
                p.name,
                TYPE_NAME(p.user_type_id) AS type_tag,
                p.is_output,
                p.parameter_id,
                p.max_length,
                p.precision,
                p.scale,
                p.has_default_value,
                t.is_table_type,
                SCHEMA_NAME(t.schema_id) AS udt_schema,
                t.name AS udt_name
             FROM sys.parameters p
             INNER JOIN sys.procedures pr ON p.object_id = pr.object_id
             INNER JOIN sys.schemas s ON pr.schema_id = s.schema_id
             INNER JOIN sys.types t ON p.user_type_id = t.user_type_id
             WHERE s.name = @P1 AND pr.name = @P2
             ORDER BY p.parameter_id",
            &[Value::String(schema.to_string()), Value::String(name.to_string())],
        )
        .await
        .map_err(|e| DataAccessError::SchemaLookup {
            object: qualified_name.to_string(),
            reason: e.to_string(),
        })?;

        let parameters = result
            .rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| parameter_metadata_from_row(ordinal, row))
            .collect();

        Ok(ProcedureSchema {
            qualified_name: qualified_name.to_string(),
            instance: instance.clone(),
            parameters,
            version,
            fetched_at: std::time::SystemTime::now(),
        })
    }

    async fn tvp_metadata(&self, qualified_name: &str, instance: &InstanceId) -> Result<TvpSchema> {
        let version = self.tvp_version(qualified_name).await?;
        if version.is_absent() {
            return Err(DataAccessError::SchemaLookup {
                object: qualified_name.to_string(),
                reason: "table type does not exist".to_string(),
            });
        }

        let (schema, name) = split_qualified(qualified_name);
        let result = Connection::query(
            self,
            "SELECT
                c.name,
                TYPE_NAME(c.user_type_id) AS type_tag,
                c.column_id,
                c.max_length,
                c.precision,
                c.scale,
                c.is_identity,
                c.is_computed,
                c.is_nullable
             FROM sys.table_types tt
             INNER JOIN sys.schemas s ON tt.schema_id = s.schema_id
             INNER JOIN sys.columns c ON c.object_id = tt.type_table_object_id
             WHERE s.name = @P1 AND tt.name = @P2
             ORDER BY c.column_id",
            &[Value::String(schema.to_string()), Value::String(name.to_string())],
        )
        .await
        .map_err(|e| DataAccessError::SchemaLookup {
            object: qualified_name.to_string(),
            reason: e.to_string(),
        })?;

        let columns = result
            .rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| tvp_column_from_row(ordinal, row))
            .collect();

        Ok(TvpSchema {
            qualified_name: qualified_name.to_string(),
            instance: instance.clone(),
            columns,
            version,
            fetched_at: std::time::SystemTime::now(),
        })
    }

    async fn bulk(
        &self,
        schema: &str,
        instance: &InstanceId,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<BulkSchemaResult> {
        let procedure_names = self
            .matching_object_names(schema, "sys.procedures", include_patterns, exclude_patterns)
            .await?;
        let table_type_names = self
            .matching_object_names(schema, "sys.table_types", include_patterns, exclude_patterns)
            .await?;

        let mut out = BulkSchemaResult::default();

        for name in procedure_names {
            let qualified = format!("{schema}.{name}");
            let version = self.object_version(&qualified).await?;
            out.sp_versions.push((qualified.clone(), version));
            out.sp_params.push(self.procedure_metadata(&qualified, instance).await?);
        }

        for name in table_type_names {
            let qualified = format!("{schema}.{name}");
            let version = self.tvp_version(&qualified).await?;
            out.tvp_versions.push((qualified.clone(), version));
            out.tvp_columns.push(self.tvp_metadata(&qualified, instance).await?);
        }

        Ok(out)
    }
}

impl MssqlConnection {
    /// List object names in `schema_catalog_view` (e.g. `sys.procedures`)
    /// under `schema` whose name matches at least one include pattern and no
    /// exclude pattern. An empty include list matches everything.
    async fn matching_object_names(
        &self,
        schema: &str,
        schema_catalog_view: &str,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Vec<String>> {
        let result = Connection::query(
            self,
            &format!(
                "SELECT o.name FROM {schema_catalog_view} o
                 INNER JOIN sys.schemas s ON o.schema_id = s.schema_id
                 WHERE s.name = @P1
                 ORDER BY o.name"
            ),
            &[Value::String(schema.to_string())],
        )
        .await
        .map_err(|e| DataAccessError::SchemaLookup {
            object: format!("{schema}.*"),
            reason: e.to_string(),
        })?;

        let include: Vec<String> = include_patterns.iter().map(|p| glob_to_like(p)).collect();
        let exclude: Vec<String> = exclude_patterns.iter().map(|p| glob_to_like(p)).collect();

        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get(0).and_then(|v| v.as_str()).map(|s| s.to_string()))
            .filter(|name| include.is_empty() || include.iter().any(|p| like_match(p, name)))
            .filter(|name| !exclude.iter().any(|p| like_match(p, name)))
            .collect())
    }
}

/// Minimal `LIKE`-pattern matcher supporting `%` and `_`, mirroring what the
/// parameter-bound query above asks the server to evaluate -- used here only
/// to pre-filter names already fetched.
fn like_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('%') => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            Some('_') => !t.is_empty() && inner(&p[1..], &t[1..]),
            Some(c) => t.first() == Some(c) && inner(&p[1..], &t[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    inner(&p, &t)
}

fn row_to_version(rows: &[mssql_core::Row]) -> VersionToken {
    rows.first()
        .and_then(|r| r.get(0))
        .and_then(|v| v.as_i64())
        .map(|minutes| VersionToken(minutes.max(0) as u64 + 1))
        .unwrap_or(VersionToken::ABSENT)
}

fn parameter_metadata_from_row(ordinal: usize, row: &mssql_core::Row) -> ParameterMetadata {
    let name = row
        .get(0)
        .and_then(|v| v.as_str())
        .map(|s| s.trim_start_matches('@').to_string())
        .unwrap_or_default();
    let type_tag = row.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let is_output = row.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
    let max_length = row.get(4).and_then(|v| v.as_i64()).unwrap_or(-1);
    let precision = row.get(5).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let scale = row.get(6).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
    let has_default = row.get(7).and_then(|v| v.as_bool()).unwrap_or(false);
    let is_table_type = row.get(8).and_then(|v| v.as_bool()).unwrap_or(false);
    let udt_schema = row.get(9).and_then(|v| v.as_str());
    let udt_name = row.get(10).and_then(|v| v.as_str());

    let (type_tag, user_defined_type_name) = if is_table_type {
        (
            "structured".to_string(),
            match (udt_schema, udt_name) {
                (Some(s), Some(n)) => Some(format!("{s}.{n}")),
                _ => None,
            },
        )
    } else {
        (type_tag, None)
    };

    ParameterMetadata {
        name,
        type_tag,
        direction: if ordinal == 0 && row.get(3).and_then(|v| v.as_i64()) == Some(0) {
            ParameterDirection::ReturnValue
        } else if is_output {
            ParameterDirection::Output
        } else {
            ParameterDirection::Input
        },
        max_length,
        precision,
        scale,
        is_nullable: true,
        has_default,
        user_defined_type_name,
    }
}

fn tvp_column_from_row(ordinal: usize, row: &mssql_core::Row) -> TvpColumn {
    TvpColumn {
        name: row.get(0).and_then(|v| v.as_str()).unwrap_or("").to_string(),
        type_tag: row.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string(),
        ordinal,
        max_length: row.get(3).and_then(|v| v.as_i64()).unwrap_or(-1),
        precision: row.get(4).and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        scale: row.get(5).and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        is_identity: row.get(6).and_then(|v| v.as_bool()).unwrap_or(false),
        is_computed: row.get(7).and_then(|v| v.as_bool()).unwrap_or(false),
        is_nullable: row.get(8).and_then(|v| v.as_bool()).unwrap_or(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_qualified_names() {
        assert_eq!(split_qualified("dbo.GetUser"), ("dbo", "GetUser"));
        assert_eq!(split_qualified("GetUser"), ("dbo", "GetUser"));
    }

    #[test]
    fn glob_translates_wildcards() {
        assert_eq!(glob_to_like("Get*"), "Get%");
        assert_eq!(glob_to_like("Get?ser"), "Get_ser");
        assert_eq!(glob_to_like("100%_done"), "100[%][_]done");
    }

    #[test]
    fn like_match_supports_wildcards() {
        assert!(like_match("Get%", "GetUserById"));
        assert!(like_match("Get_ser", "GetUser"));
        assert!(!like_match("Get%", "ListUsers"));
    }
}
