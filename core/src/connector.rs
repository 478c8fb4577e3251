//! Source connectors: where source and target datasets come from

use crate::dataset::{Column, Dataset, Row, Schema};
use crate::error::{ReconError, Result};
use crate::value::{DataType, Decimal, Value, DAYS_FROM_CE_TO_UNIX_EPOCH};
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::Connection;
use std::path::Path;

/// Anything that can describe a relation and run a query returning a dataset
pub trait SourceConnector {
    /// Column names and types of `relation`, in declared order
    fn extract_schema(&self, relation: &str) -> Result<Vec<(String, DataType)>>;

    /// Run `query` and materialise the result
    fn extract_data(&self, query: &str) -> Result<Dataset>;
}

/// Connector backed by an in-memory DuckDB database
pub struct DuckDbConnector {
    connection: Connection,
}

impl DuckDbConnector {
    pub fn open_in_memory() -> Result<Self> {
        Self::open_with_memory_limit(None)
    }

    /// Open with an optional DuckDB memory limit such as `"4GB"`
    pub fn open_with_memory_limit(memory_limit: Option<&str>) -> Result<Self> {
        let connection = Connection::open_in_memory()?;

        connection.execute("SET enable_progress_bar=false", [])?;
        connection.execute("SET preserve_insertion_order=true", [])?;
        connection.execute("SET enable_object_cache=true", [])?;
        if let Some(limit) = memory_limit {
            if !limit.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
                return Err(ReconError::config(format!("Invalid memory limit '{limit}'")));
            }
            connection.execute(&format!("SET memory_limit='{limit}'"), [])?;
        }

        Ok(Self { connection })
    }

    /// Expose a CSV, Parquet or JSON file as view `view`
    pub fn register_file(&self, view: &str, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ReconError::invalid_input(format!(
                "File not found: {}",
                path.display()
            )));
        }
        let path_str = path.to_string_lossy().replace('\'', "''");
        self.connection
            .execute(
                &format!("CREATE OR REPLACE VIEW {view} AS SELECT * FROM '{path_str}'"),
                [],
            )
            .map_err(|e| {
                ReconError::data_processing(format!(
                    "Failed to load '{}' as {view}: {e}",
                    path.display()
                ))
            })?;
        log::debug!("Registered {} as view {view}", path.display());
        Ok(())
    }

    /// Register `path` as `view` and read all of it
    pub fn load_file(&self, view: &str, path: &Path) -> Result<Dataset> {
        self.register_file(view, path)?;
        self.extract_data(&format!("SELECT * FROM {view}"))
    }

    fn describe(&self, sql: &str) -> Result<Vec<(String, DataType)>> {
        let mut stmt = self
            .connection
            .prepare(&format!("DESCRIBE {sql}"))
            .map_err(|e| ReconError::invalid_input(format!("Failed to describe '{sql}': {e}")))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut columns = Vec::new();
        for row in rows {
            let (name, sql_type) = row?;
            columns.push((name, DataType::from_sql_type(&sql_type)));
        }
        Ok(columns)
    }
}

impl SourceConnector for DuckDbConnector {
    fn extract_schema(&self, relation: &str) -> Result<Vec<(String, DataType)>> {
        self.describe(relation)
    }

    fn extract_data(&self, query: &str) -> Result<Dataset> {
        let columns = self.describe(query)?;
        let schema = Schema::new(
            columns
                .iter()
                .map(|(name, data_type)| Column::new(name.clone(), *data_type))
                .collect(),
        )?;

        let width = columns.len();
        let mut stmt = self
            .connection
            .prepare(query)
            .map_err(|e| ReconError::invalid_input(format!("Failed to prepare query: {e}")))?;
        let raw_rows = stmt.query_map([], |row| {
            (0..width)
                .map(|i| row.get::<usize, DuckValue>(i))
                .collect::<std::result::Result<Vec<_>, _>>()
        })?;

        let mut rows: Vec<Row> = Vec::new();
        for raw in raw_rows {
            let raw = raw?;
            let row = raw
                .into_iter()
                .zip(&columns)
                .map(|(value, (name, data_type))| convert_value(value, *data_type, name))
                .collect::<Result<Row>>()?;
            rows.push(row);
        }

        log::debug!("Extracted {} rows with {} columns", rows.len(), width);
        Dataset::new(schema, rows)
    }
}

fn timestamp_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert a DuckDB value and coerce it to the column's declared type
fn convert_value(value: DuckValue, declared: DataType, column: &str) -> Result<Value> {
    let out_of_range = || {
        ReconError::data_processing(format!("Value in column '{column}' is out of range"))
    };

    let natural = match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Boolean(b),
        DuckValue::TinyInt(i) => Value::Integer(i as i64),
        DuckValue::SmallInt(i) => Value::Integer(i as i64),
        DuckValue::Int(i) => Value::Integer(i as i64),
        DuckValue::BigInt(i) => Value::Integer(i),
        DuckValue::UTinyInt(i) => Value::Integer(i as i64),
        DuckValue::USmallInt(i) => Value::Integer(i as i64),
        DuckValue::UInt(i) => Value::Integer(i as i64),
        DuckValue::UBigInt(i) => Value::Integer(i64::try_from(i).map_err(|_| out_of_range())?),
        DuckValue::HugeInt(i) => Value::Decimal(Decimal::new(i, 0)),
        DuckValue::Float(f) => Value::Float(f as f64),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => Value::Decimal(Decimal::new(d.value(), u32::from(d.scale()))),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::Text(s),
        DuckValue::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + DAYS_FROM_CE_TO_UNIX_EPOCH)
            .map(Value::Date)
            .ok_or_else(out_of_range)?,
        DuckValue::Timestamp(unit, v) => DateTime::from_timestamp_micros(timestamp_micros(unit, v))
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .ok_or_else(out_of_range)?,
        DuckValue::Time64(unit, v) => {
            let micros = timestamp_micros(unit, v);
            let secs = u32::try_from(micros.div_euclid(1_000_000)).map_err(|_| out_of_range())?;
            let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map(|t| Value::Text(t.to_string()))
                .ok_or_else(out_of_range)?
        }
        DuckValue::Blob(bytes) => Value::Text(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        other => Value::Text(format!("{other:?}")),
    };

    coerce(natural, declared, column)
}

fn coerce(value: Value, declared: DataType, column: &str) -> Result<Value> {
    match declared.admit(value) {
        Ok(value) => Ok(value),
        Err(value) if declared == DataType::Text => Ok(Value::Text(value.to_string())),
        Err(value) => Err(ReconError::data_processing(format!(
            "Column '{column}' is declared {declared} but produced '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_widens_integers_and_stringifies() {
        assert_eq!(coerce(Value::Integer(3), DataType::Float, "c").unwrap(), Value::Float(3.0));
        assert_eq!(coerce(Value::Integer(3), DataType::Text, "c").unwrap(), Value::from("3"));
        assert_eq!(
            coerce(Value::Integer(3), DataType::Decimal, "c").unwrap(),
            Value::Decimal(Decimal::new(3, 0))
        );
        assert!(coerce(Value::from("x"), DataType::Integer, "c").is_err());
    }

    #[test]
    fn test_extract_data_from_query() {
        let connector = DuckDbConnector::open_in_memory().unwrap();
        let ds = connector
            .extract_data("SELECT 1::INTEGER AS id, 'a' AS name, DATE '2024-01-02' AS day, NULL::DOUBLE AS score")
            .unwrap();
        assert_eq!(ds.column_names(), vec!["id", "name", "day", "score"]);
        assert_eq!(ds.value(0, "id"), Some(&Value::Integer(1)));
        assert_eq!(
            ds.value(0, "day"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()))
        );
        assert_eq!(ds.value(0, "score"), Some(&Value::Null));
    }

    #[test]
    fn test_decimals_and_hugeints_stay_exact() {
        let connector = DuckDbConnector::open_in_memory().unwrap();
        let ds = connector
            .extract_data(
                "SELECT 12345678901234567.01::DECIMAL(38,2) AS amount, \
                 9223372036854775808::HUGEINT AS big",
            )
            .unwrap();
        assert_eq!(ds.schema().column(0).data_type, DataType::Decimal);
        assert_eq!(
            ds.value(0, "amount"),
            Some(&Value::Decimal("12345678901234567.01".parse().unwrap()))
        );
        assert_eq!(ds.value(0, "big"), Some(&Value::Decimal(Decimal::new(9_223_372_036_854_775_808, 0))));
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let connector = DuckDbConnector::open_in_memory().unwrap();
        let err = connector
            .register_file("v", Path::new("/definitely/not/here.csv"))
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidInput(_)));
    }
}
