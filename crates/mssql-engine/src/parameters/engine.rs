//! Binding Engine (C4): validates and attaches caller-supplied values to a
//! command's parameter list, either against authoritative procedure
//! metadata (`bind`) or with inferred typing (`bind_raw`).
//!
//! Generalizes [`super::binder`]'s placeholder-rewriting shape (the
//! teacher's only parameter-handling precedent) from "rewrite SQL text"
//! to "validate a value against a declared database type and produce a
//! bound [`Value`]". TVP assembly has no teacher precedent and is new
//! code, styled after the same crate's columnar `ColumnarBuffer`/
//! `TvpPayloadReader` types.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use mssql_core::{
    ColumnarBuffer, DataAccessError, ParameterDirection, ParameterMetadata, Result, TvpColumn,
    TvpPayloadReader, TvpSchema, Value,
};

/// Earliest date representable by SQL Server's legacy `datetime` type.
const LEGACY_DATETIME_MIN: NaiveDate = match NaiveDate::from_ymd_opt(1753, 1, 1) {
    Some(d) => d,
    None => unreachable!(),
};

/// Trivial types auto-JSON never applies to: anything else bound to a
/// character column is treated as a composite and serialized.
fn is_trivial(value: &Value) -> bool {
    matches!(
        value,
        Value::Null
            | Value::Bool(_)
            | Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Float32(_)
            | Value::Float64(_)
            | Value::Decimal(_)
            | Value::String(_)
            | Value::Bytes(_)
            | Value::Uuid(_)
            | Value::Date(_)
            | Value::Time(_)
            | Value::DateTime(_)
            | Value::DateTimeUtc(_)
    )
}

fn is_character_type(type_tag: &str) -> bool {
    matches!(
        type_tag,
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "xml"
    )
}

/// Validates that an integer value fits the declared width, per the
/// overflow pre-validation contract.
fn check_integer_range(parameter: &str, type_tag: &str, value: i64) -> Result<()> {
    let (min, max): (i64, i64) = match type_tag {
        "tinyint" => (0, u8::MAX as i64),
        "smallint" => (i16::MIN as i64, i16::MAX as i64),
        "int" => (i32::MIN as i64, i32::MAX as i64),
        "bigint" => (i64::MIN, i64::MAX),
        _ => return Ok(()),
    };
    if value < min || value > max {
        return Err(DataAccessError::RangeOverflow {
            parameter: parameter.to_string(),
            value: value.to_string(),
            type_tag: type_tag.to_string(),
            precision: 0,
            scale: 0,
        });
    }
    Ok(())
}

/// Validates a decimal string against `|value| < 10^(precision - scale)`.
fn check_decimal_range(parameter: &str, type_tag: &str, precision: i32, scale: i32, raw: &str) -> Result<()> {
    let magnitude: f64 = raw.parse().map_err(|_| DataAccessError::RangeOverflow {
        parameter: parameter.to_string(),
        value: raw.to_string(),
        type_tag: type_tag.to_string(),
        precision,
        scale,
    })?;
    let limit = 10f64.powi((precision - scale).max(0));
    if magnitude.abs() >= limit {
        return Err(DataAccessError::RangeOverflow {
            parameter: parameter.to_string(),
            value: raw.to_string(),
            type_tag: type_tag.to_string(),
            precision,
            scale,
        });
    }
    Ok(())
}

fn check_date_range(parameter: &str, type_tag: &str, date: NaiveDate) -> Result<()> {
    if type_tag == "datetime" && date < LEGACY_DATETIME_MIN {
        return Err(DataAccessError::RangeOverflow {
            parameter: parameter.to_string(),
            value: date.to_string(),
            type_tag: type_tag.to_string(),
            precision: 0,
            scale: 0,
        });
    }
    Ok(())
}

/// Sanitizes a bound string: strips control characters other than
/// tab/newline/carriage-return, then truncates to `max_length` bytes when
/// set (a negative `max_length` means "max", i.e. unbounded).
fn preprocess_string(value: String, max_length: i64) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();
    if max_length < 0 {
        return cleaned;
    }
    let limit = max_length as usize;
    if cleaned.len() <= limit {
        cleaned
    } else {
        cleaned.chars().take(limit).collect()
    }
}

/// One bound parameter ready for the wire layer: a name and validated
/// value, plus the direction the caller should read output/inout values
/// back through after execution.
#[derive(Debug, Clone)]
pub struct BoundParameter {
    pub name: String,
    pub value: Value,
    pub direction: ParameterDirection,
}

/// Validates and attaches values to a command's parameter list.
pub struct BindingEngine {
    tvp_factories: TvpFactoryCache,
}

impl Default for BindingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingEngine {
    pub fn new() -> Self {
        Self {
            tvp_factories: TvpFactoryCache::new(10_000),
        }
    }

    /// Bind one parameter using authoritative procedure metadata.
    ///
    /// `strict` controls whether a missing required input parameter is
    /// fatal; non-strict callers accept a null in its place (the database
    /// default, if any, applies).
    pub fn bind(&self, meta: &ParameterMetadata, raw_value: Option<Value>, strict: bool) -> Result<BoundParameter> {
        let value = raw_value.unwrap_or(Value::Null);

        if value.is_null() {
            if meta.has_default && meta.direction == ParameterDirection::Input {
                return Ok(BoundParameter {
                    name: meta.name.clone(),
                    value: Value::Null,
                    direction: meta.direction,
                });
            }
            if strict && !meta.is_nullable && meta.direction == ParameterDirection::Input {
                return Err(DataAccessError::RequiredParameterMissing {
                    parameter: meta.name.clone(),
                });
            }
            return Ok(BoundParameter { name: meta.name.clone(), value: Value::Null, direction: meta.direction });
        }

        if meta.is_structured() {
            // Structured parameters are bound via `bind_tvp`, not here;
            // a bare scalar value against a structured parameter is a
            // caller error distinct from range overflow.
            return Err(DataAccessError::BulkBinding(format!(
                "parameter '{}' is structured; use bind_tvp",
                meta.name
            )));
        }

        let coerced = coerce_and_validate(&meta.name, &meta.type_tag, meta.max_length, meta.precision, meta.scale, value)?;
        Ok(BoundParameter { name: meta.name.clone(), value: coerced, direction: meta.direction })
    }

    /// Bind without schema: infer database typing from the Rust value
    /// itself. Used for ad-hoc text commands where no procedure metadata
    /// is available.
    pub fn bind_raw(&self, name: &str, value: Value, optional_override: Option<bool>) -> Result<BoundParameter> {
        let optional = optional_override.unwrap_or(true);
        if value.is_null() && !optional {
            return Err(DataAccessError::RequiredParameterMissing { parameter: name.to_string() });
        }
        let value = match value {
            Value::Json(_) | Value::Array(_) if !is_trivial(&value) => {
                let text = serde_json::to_string(&value).map_err(DataAccessError::Serialization)?;
                Value::String(text)
            }
            other => other,
        };
        Ok(BoundParameter { name: name.to_string(), value, direction: ParameterDirection::Input })
    }

    /// Build a [`TvpPayloadReader`] from row data supplied as
    /// `(row_count, render_row)`, validating each column against
    /// `schema` and caching the compiled per-column accessor layout
    /// (the "payload factory") by the TVP's qualified name.
    pub fn bind_tvp(
        &self,
        schema: &TvpSchema,
        row_count: usize,
        rows: Vec<Vec<Value>>,
    ) -> Result<TvpPayloadReader> {
        self.tvp_factories.get_or_build(&schema.qualified_name, &schema.columns)?;

        let mut buffers: Vec<ColumnarBuffer<Value>> =
            schema.columns.iter().map(|_| ColumnarBuffer::with_capacity(row_count.min(4096))).collect();

        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != schema.columns.len() {
                for buf in &mut buffers {
                    buf.clear();
                }
                return Err(DataAccessError::BulkBinding(format!(
                    "row {row_index} has {} columns, expected {}",
                    row.len(),
                    schema.columns.len()
                )));
            }
            for (col, value) in schema.columns.iter().zip(row.iter()) {
                if value.is_null() && !col.is_nullable {
                    for buf in &mut buffers {
                        buf.clear();
                    }
                    return Err(DataAccessError::BulkBinding(format!(
                        "column '{}' is non-nullable but row {row_index} supplied null",
                        col.name
                    )));
                }
                let rendered = if !value.is_null() && is_character_type(&col.type_tag) && !is_trivial(value) {
                    Value::String(serde_json::to_string(value).map_err(DataAccessError::Serialization)?)
                } else {
                    value.clone()
                };
                buffers[col.ordinal].push(Some(rendered));
            }
            if row_index % 128 == 0 {
                tracing::trace!(estimated_rows = (row_index + 1) * 128, "sampling TVP payload size");
            }
        }

        let schema_clone = schema.clone();
        let render_row = move |row: usize| -> Vec<Value> {
            buffers.iter().map(|b| b.get(row).cloned().flatten().unwrap_or(Value::Null)).collect()
        };
        Ok(TvpPayloadReader::new(schema_clone, row_count, Box::new(render_row)))
    }
}

fn coerce_and_validate(
    parameter: &str,
    type_tag: &str,
    max_length: i64,
    precision: i32,
    scale: i32,
    value: Value,
) -> Result<Value> {
    match (type_tag, &value) {
        ("tinyint" | "smallint" | "int" | "bigint", _) => {
            let as_i64 = value.as_i64().ok_or_else(|| DataAccessError::RangeOverflow {
                parameter: parameter.to_string(),
                value: value.to_string(),
                type_tag: type_tag.to_string(),
                precision,
                scale,
            })?;
            check_integer_range(parameter, type_tag, as_i64)?;
            Ok(match type_tag {
                "tinyint" => Value::Int8(as_i64 as i8),
                "smallint" => Value::Int16(as_i64 as i16),
                "int" => Value::Int32(as_i64 as i32),
                _ => Value::Int64(as_i64),
            })
        }
        ("decimal" | "numeric", Value::Decimal(raw)) => {
            check_decimal_range(parameter, type_tag, precision, scale, raw)?;
            Ok(value)
        }
        ("decimal" | "numeric", _) => {
            let raw = value.to_string();
            check_decimal_range(parameter, type_tag, precision, scale, &raw)?;
            Ok(Value::Decimal(raw))
        }
        ("real", Value::Float32(_)) => Ok(value),
        ("real", _) => Ok(Value::Float32(value.as_f64().unwrap_or_default() as f32)),
        ("float", _) => Ok(Value::Float64(value.as_f64().unwrap_or_default())),
        ("datetime", Value::Date(d)) => {
            check_date_range(parameter, type_tag, *d)?;
            Ok(value)
        }
        ("datetime", Value::DateTime(dt)) => {
            check_date_range(parameter, type_tag, dt.date())?;
            Ok(value)
        }
        (tag, Value::String(s)) if is_character_type(tag) => Ok(Value::String(preprocess_string(s.clone(), max_length))),
        (tag, other) if is_character_type(tag) && !is_trivial(other) => {
            let text = serde_json::to_string(other).map_err(DataAccessError::Serialization)?;
            Ok(Value::String(preprocess_string(text, max_length)))
        }
        _ => Ok(value),
    }
}

/// Validation outcome for a (clr-type, udt-name) pair, cached so repeated
/// binds of the same TVP shape skip re-validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidatorState {
    /// Represented implicitly by absence from the cache map rather than
    /// constructed directly.
    #[allow(dead_code)]
    NotValidated,
    Success,
    Failed,
}

/// Compiled per-column accessor layout for one TVP type, cached by
/// qualified name up to a capacity; exceeding the cap clears the whole
/// cache (rebuild cost is small, so a full clear is an acceptable, simple
/// eviction policy).
struct TvpFactoryCache {
    capacity: usize,
    factories: DashMap<String, Arc<Vec<TvpColumn>>>,
    validator_states: DashMap<String, ValidatorState>,
}

impl TvpFactoryCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, factories: DashMap::new(), validator_states: DashMap::new() }
    }

    fn get_or_build(&self, qualified_name: &str, columns: &[TvpColumn]) -> Result<Arc<Vec<TvpColumn>>> {
        if let Some(state) = self.validator_states.get(qualified_name) {
            if *state == ValidatorState::Failed {
                return Err(DataAccessError::SchemaMismatch {
                    object: qualified_name.to_string(),
                    reason: "TVP shape previously failed validation".to_string(),
                });
            }
        }
        if let Some(existing) = self.factories.get(qualified_name) {
            return Ok(existing.clone());
        }
        if self.factories.len() >= self.capacity {
            self.factories.clear();
        }
        let built = Arc::new(columns.to_vec());
        self.factories.insert(qualified_name.to_string(), built.clone());
        self.validator_states.insert(qualified_name.to_string(), ValidatorState::Success);
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mssql_core::InstanceId;

    fn meta(name: &str, type_tag: &str, direction: ParameterDirection, nullable: bool) -> ParameterMetadata {
        ParameterMetadata {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            direction,
            max_length: -1,
            precision: 18,
            scale: 2,
            is_nullable: nullable,
            has_default: false,
            user_defined_type_name: None,
        }
    }

    #[test]
    fn null_against_required_parameter_fails_strict() {
        let engine = BindingEngine::new();
        let m = meta("id", "int", ParameterDirection::Input, false);
        let err = engine.bind(&m, None, true).unwrap_err();
        assert!(matches!(err, DataAccessError::RequiredParameterMissing { .. }));
    }

    #[test]
    fn null_with_default_skips_without_error() {
        let engine = BindingEngine::new();
        let mut m = meta("id", "int", ParameterDirection::Input, false);
        m.has_default = true;
        let bound = engine.bind(&m, None, true).unwrap();
        assert!(bound.value.is_null());
    }

    #[test]
    fn integer_overflow_is_rejected() {
        let engine = BindingEngine::new();
        let m = meta("flag", "tinyint", ParameterDirection::Input, true);
        let err = engine.bind(&m, Some(Value::Int32(500)), false).unwrap_err();
        assert!(matches!(err, DataAccessError::RangeOverflow { .. }));
    }

    #[test]
    fn decimal_overflow_message_reports_precision_and_scale() {
        let engine = BindingEngine::new();
        let mut m = meta("Qty", "decimal", ParameterDirection::Input, true);
        m.precision = 5;
        m.scale = 2;
        let err = engine.bind(&m, Some(Value::String("1234.56".into())), false).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Precision:5, Scale:2"), "{message}");
        assert!(message.contains("1234.56"), "{message}");
    }

    #[test]
    fn string_is_truncated_to_max_length() {
        let engine = BindingEngine::new();
        let mut m = meta("name", "varchar", ParameterDirection::Input, true);
        m.max_length = 3;
        let bound = engine.bind(&m, Some(Value::String("hello".into())), false).unwrap();
        assert_eq!(bound.value, Value::String("hel".into()));
    }

    #[test]
    fn composite_value_is_auto_json_on_character_column() {
        let engine = BindingEngine::new();
        let m = meta("payload", "nvarchar", ParameterDirection::Input, true);
        let composite = Value::Array(vec![Value::Int32(1), Value::Int32(2)]);
        let bound = engine.bind(&m, Some(composite), false).unwrap();
        assert!(matches!(bound.value, Value::String(ref s) if s.contains('1')));
    }

    #[test]
    fn structured_parameter_rejects_scalar_bind() {
        let engine = BindingEngine::new();
        let m = meta("rows", "structured", ParameterDirection::Input, true);
        let err = engine.bind(&m, Some(Value::Int32(1)), false).unwrap_err();
        assert!(matches!(err, DataAccessError::BulkBinding(_)));
    }

    #[test]
    fn tvp_payload_reader_round_trips_rows() {
        let engine = BindingEngine::new();
        let schema = TvpSchema {
            qualified_name: "dbo.IntList".to_string(),
            instance: InstanceId::new("test"),
            columns: vec![TvpColumn {
                name: "Value".to_string(),
                type_tag: "int".to_string(),
                ordinal: 0,
                max_length: 4,
                precision: 10,
                scale: 0,
                is_identity: false,
                is_computed: false,
                is_nullable: false,
            }],
            version: mssql_core::VersionToken(1),
            fetched_at: std::time::SystemTime::now(),
        };
        let rows = vec![vec![Value::Int32(1)], vec![Value::Int32(2)]];
        let mut reader = engine.bind_tvp(&schema, 2, rows).unwrap();
        assert_eq!(reader.next_row(), Some(vec![Value::Int32(1)]));
        assert_eq!(reader.next_row(), Some(vec![Value::Int32(2)]));
        assert_eq!(reader.next_row(), None);
    }

    #[test]
    fn tvp_rejects_null_in_non_nullable_column() {
        let engine = BindingEngine::new();
        let schema = TvpSchema {
            qualified_name: "dbo.Strict".to_string(),
            instance: InstanceId::new("test"),
            columns: vec![TvpColumn {
                name: "Value".to_string(),
                type_tag: "int".to_string(),
                ordinal: 0,
                max_length: 4,
                precision: 10,
                scale: 0,
                is_identity: false,
                is_computed: false,
                is_nullable: false,
            }],
            version: mssql_core::VersionToken(1),
            fetched_at: std::time::SystemTime::now(),
        };
        let err = engine.bind_tvp(&schema, 1, vec![vec![Value::Null]]).unwrap_err();
        assert!(matches!(err, DataAccessError::BulkBinding(_)));
    }
}
