//! Intermediate persistence of joined relations
//!
//! The row reconciler hands its full outer join to an [`IntermediatePersist`]
//! implementation and continues from the relation it gets back. Implementations must
//! return a relation that is row-for-row identical to the one they were given.

use crate::dataset::Schema;
use crate::error::PersistenceError;
use crate::join::{JoinSide, JoinedDataset, JoinedRow};
use crate::value::{DataType, Decimal, Value, DAYS_FROM_CE_TO_UNIX_EPOCH};
use arrow_array::{
    Array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, Float64Array, Int64Array, RecordBatch,
    StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{
    DataType as ArrowType, Field, Schema as ArrowSchema, SchemaRef, TimeUnit, DECIMAL128_MAX_PRECISION,
    DECIMAL128_MAX_SCALE,
};
use chrono::{DateTime, Datelike, NaiveDate};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the persisted relation inside its directory
pub const UNMATCHED_FILE_NAME: &str = "unmatched.parquet";

const BATCH_ROWS: usize = 64 * 1024;
const SOURCE_PRESENT: &str = "__source_present";
const TARGET_PRESENT: &str = "__target_present";

/// Writes a joined relation somewhere durable and returns a re-read copy
pub trait IntermediatePersist: Send + Sync {
    fn persist_and_reload(
        &self,
        joined: JoinedDataset,
        path: &str,
    ) -> Result<JoinedDataset, PersistenceError>;
}

/// Keeps the relation in memory; used for tests and small inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryPersist;

impl IntermediatePersist for InMemoryPersist {
    fn persist_and_reload(
        &self,
        joined: JoinedDataset,
        path: &str,
    ) -> Result<JoinedDataset, PersistenceError> {
        log::debug!("Keeping {} joined rows for '{path}' in memory", joined.num_rows());
        Ok(joined)
    }
}

/// Persists relations as parquet files under a base directory
#[derive(Debug, Clone)]
pub struct ParquetPersist {
    base_dir: PathBuf,
}

impl ParquetPersist {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Location of the parquet file for `path`
    pub fn file_path(&self, path: &str) -> PathBuf {
        self.base_dir.join(path).join(UNMATCHED_FILE_NAME)
    }

    fn write(&self, joined: &JoinedDataset, path: &str) -> Result<PathBuf, PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: path.to_string(),
            source,
        };
        let parquet_err = |source| PersistenceError::Parquet {
            path: path.to_string(),
            source,
        };

        let target_file = self.file_path(path);
        let dir = target_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_dir.clone());
        fs::create_dir_all(&dir).map_err(io_err)?;

        let schema = arrow_schema_for(joined, path)?;

        // Stage next to the destination so the final rename is atomic
        let mut staged = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer =
                ArrowWriter::try_new(staged.as_file_mut(), schema.clone(), None).map_err(parquet_err)?;
            for chunk in joined.rows().chunks(BATCH_ROWS) {
                let batch = encode_batch(joined, chunk, schema.clone(), path)?;
                writer.write(&batch).map_err(parquet_err)?;
            }
            writer.close().map_err(parquet_err)?;
        }
        staged
            .persist(&target_file)
            .map_err(|e| io_err(e.error))?;

        Ok(target_file)
    }

    fn read(
        &self,
        file: &Path,
        source_schema: Schema,
        target_schema: Schema,
        path: &str,
    ) -> Result<JoinedDataset, PersistenceError> {
        let handle = File::open(file).map_err(|source| PersistenceError::Io {
            path: path.to_string(),
            source,
        })?;
        let parquet_err = |source| PersistenceError::Parquet {
            path: path.to_string(),
            source,
        };
        let reader = ParquetRecordBatchReaderBuilder::try_new(handle)
            .map_err(parquet_err)?
            .build()
            .map_err(parquet_err)?;

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|source| PersistenceError::Arrow {
                path: path.to_string(),
                source,
            })?;
            decode_batch(&batch, &source_schema, &target_schema, path, &mut rows)?;
        }
        Ok(JoinedDataset::new(source_schema, target_schema, rows))
    }
}

impl IntermediatePersist for ParquetPersist {
    fn persist_and_reload(
        &self,
        joined: JoinedDataset,
        path: &str,
    ) -> Result<JoinedDataset, PersistenceError> {
        let file = self.write(&joined, path)?;
        log::info!(
            "Wrote {} joined rows to {}",
            joined.num_rows(),
            file.display()
        );
        let source_schema = joined.schema(JoinSide::Source).clone();
        let target_schema = joined.schema(JoinSide::Target).clone();
        drop(joined);
        self.read(&file, source_schema, target_schema, path)
    }
}

fn arrow_type(data_type: DataType, decimal_scale: i8) -> ArrowType {
    match data_type {
        DataType::Boolean => ArrowType::Boolean,
        DataType::Integer => ArrowType::Int64,
        DataType::Float => ArrowType::Float64,
        DataType::Decimal => ArrowType::Decimal128(DECIMAL128_MAX_PRECISION, decimal_scale),
        DataType::Text => ArrowType::Utf8,
        DataType::Date => ArrowType::Date32,
        DataType::Timestamp => ArrowType::Timestamp(TimeUnit::Microsecond, None),
    }
}

/// Largest scale among the decimals of one column
fn decimal_scale(joined: &JoinedDataset, side: JoinSide, idx: usize, path: &str) -> Result<i8, PersistenceError> {
    let scale = joined
        .rows()
        .iter()
        .filter_map(|r| match r.value(side, idx) {
            Value::Decimal(d) => Some(d.scale()),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    i8::try_from(scale)
        .ok()
        .filter(|s| *s <= DECIMAL128_MAX_SCALE)
        .ok_or_else(|| PersistenceError::Layout {
            path: path.to_string(),
            detail: format!("decimal scale {scale} exceeds {DECIMAL128_MAX_SCALE}"),
        })
}

/// Columns are stored positionally; the reader restores names from the schemas it already holds
fn arrow_schema_for(joined: &JoinedDataset, path: &str) -> Result<SchemaRef, PersistenceError> {
    let mut fields = vec![
        Field::new(SOURCE_PRESENT, ArrowType::Boolean, false),
        Field::new(TARGET_PRESENT, ArrowType::Boolean, false),
    ];
    for (prefix, side) in [("s", JoinSide::Source), ("t", JoinSide::Target)] {
        for (idx, column) in joined.schema(side).columns().iter().enumerate() {
            let scale = match column.data_type {
                DataType::Decimal => decimal_scale(joined, side, idx, path)?,
                _ => 0,
            };
            fields.push(Field::new(format!("{prefix}{idx}"), arrow_type(column.data_type, scale), true));
        }
    }
    Ok(Arc::new(ArrowSchema::new(fields)))
}

fn type_error(path: &str, expected: DataType, value: &Value) -> PersistenceError {
    PersistenceError::Layout {
        path: path.to_string(),
        detail: format!(
            "value '{value}' does not fit a {expected} column"
        ),
    }
}

fn encode_batch(
    joined: &JoinedDataset,
    rows: &[JoinedRow],
    schema: SchemaRef,
    path: &str,
) -> Result<RecordBatch, PersistenceError> {
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(BooleanArray::from(rows.iter().map(|r| r.source.is_some()).collect::<Vec<_>>())),
        Arc::new(BooleanArray::from(rows.iter().map(|r| r.target.is_some()).collect::<Vec<_>>())),
    ];
    for side in [JoinSide::Source, JoinSide::Target] {
        for (idx, column) in joined.schema(side).columns().iter().enumerate() {
            let field = schema.field(columns.len());
            columns.push(encode_column(rows, side, idx, column.data_type, field.data_type(), path)?);
        }
    }
    RecordBatch::try_new(schema, columns).map_err(|source| PersistenceError::Arrow {
        path: path.to_string(),
        source,
    })
}

fn encode_column(
    rows: &[JoinedRow],
    side: JoinSide,
    idx: usize,
    data_type: DataType,
    arrow: &ArrowType,
    path: &str,
) -> Result<ArrayRef, PersistenceError> {
    let values = rows.iter().map(|r| r.value(side, idx));
    let array: ArrayRef = match data_type {
        DataType::Boolean => Arc::new(BooleanArray::from(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Boolean(b) => Ok(Some(*b)),
                    other => Err(type_error(path, data_type, other)),
                })
                .collect::<Result<Vec<_>, _>>()?,
        )),
        DataType::Integer => Arc::new(Int64Array::from(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Integer(i) => Ok(Some(*i)),
                    other => Err(type_error(path, data_type, other)),
                })
                .collect::<Result<Vec<_>, _>>()?,
        )),
        DataType::Float => Arc::new(Float64Array::from(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Float(f) => Ok(Some(*f)),
                    other => Err(type_error(path, data_type, other)),
                })
                .collect::<Result<Vec<_>, _>>()?,
        )),
        DataType::Decimal => {
            let ArrowType::Decimal128(precision, scale) = *arrow else {
                return Err(PersistenceError::Layout {
                    path: path.to_string(),
                    detail: format!("decimal column {idx} laid out as {arrow}"),
                });
            };
            let mantissas = values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Decimal(d) => d
                        .rescaled(scale as u32)
                        .map(Some)
                        .ok_or_else(|| type_error(path, data_type, v)),
                    other => Err(type_error(path, data_type, other)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(
                Decimal128Array::from(mantissas)
                    .with_precision_and_scale(precision, scale)
                    .map_err(|source| PersistenceError::Arrow {
                        path: path.to_string(),
                        source,
                    })?,
            )
        }
        DataType::Text => Arc::new(StringArray::from(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Text(s) => Ok(Some(s.clone())),
                    other => Err(type_error(path, data_type, other)),
                })
                .collect::<Result<Vec<Option<String>>, _>>()?,
        )),
        DataType::Date => Arc::new(Date32Array::from(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Date(d) => Ok(Some(d.num_days_from_ce() - DAYS_FROM_CE_TO_UNIX_EPOCH)),
                    other => Err(type_error(path, data_type, other)),
                })
                .collect::<Result<Vec<_>, _>>()?,
        )),
        DataType::Timestamp => Arc::new(TimestampMicrosecondArray::from(
            values
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Timestamp(ts) => Ok(Some(ts.and_utc().timestamp_micros())),
                    other => Err(type_error(path, data_type, other)),
                })
                .collect::<Result<Vec<_>, _>>()?,
        )),
    };
    Ok(array)
}

fn downcast<'a, T: 'static>(
    batch: &'a RecordBatch,
    idx: usize,
    path: &str,
) -> Result<&'a T, PersistenceError> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PersistenceError::Layout {
            path: path.to_string(),
            detail: format!(
                "column {idx} has unexpected type {}",
                batch.column(idx).data_type()
            ),
        })
}

fn decode_value(
    batch: &RecordBatch,
    col: usize,
    row: usize,
    data_type: DataType,
    path: &str,
) -> Result<Value, PersistenceError> {
    if batch.column(col).is_null(row) {
        return Ok(Value::Null);
    }
    let value = match data_type {
        DataType::Boolean => Value::Boolean(downcast::<BooleanArray>(batch, col, path)?.value(row)),
        DataType::Integer => Value::Integer(downcast::<Int64Array>(batch, col, path)?.value(row)),
        DataType::Float => Value::Float(downcast::<Float64Array>(batch, col, path)?.value(row)),
        DataType::Decimal => {
            let array = downcast::<Decimal128Array>(batch, col, path)?;
            Value::Decimal(Decimal::new(array.value(row), array.scale().max(0) as u32))
        }
        DataType::Text => Value::Text(downcast::<StringArray>(batch, col, path)?.value(row).to_string()),
        DataType::Date => {
            let days = downcast::<Date32Array>(batch, col, path)?.value(row);
            NaiveDate::from_num_days_from_ce_opt(days + DAYS_FROM_CE_TO_UNIX_EPOCH)
                .map(Value::Date)
                .ok_or_else(|| PersistenceError::Layout {
                    path: path.to_string(),
                    detail: format!("date {days} out of range"),
                })?
        }
        DataType::Timestamp => {
            let micros = downcast::<TimestampMicrosecondArray>(batch, col, path)?.value(row);
            DateTime::from_timestamp_micros(micros)
                .map(|dt| Value::Timestamp(dt.naive_utc()))
                .ok_or_else(|| PersistenceError::Layout {
                    path: path.to_string(),
                    detail: format!("timestamp {micros} out of range"),
                })?
        }
    };
    Ok(value)
}

fn decode_batch(
    batch: &RecordBatch,
    source_schema: &Schema,
    target_schema: &Schema,
    path: &str,
    out: &mut Vec<JoinedRow>,
) -> Result<(), PersistenceError> {
    let expected = 2 + source_schema.len() + target_schema.len();
    if batch.num_columns() != expected {
        return Err(PersistenceError::Layout {
            path: path.to_string(),
            detail: format!("expected {expected} columns, found {}", batch.num_columns()),
        });
    }
    let source_present = downcast::<BooleanArray>(batch, 0, path)?;
    let target_present = downcast::<BooleanArray>(batch, 1, path)?;
    let target_offset = 2 + source_schema.len();

    for row in 0..batch.num_rows() {
        let source = if source_present.value(row) {
            let mut values = Vec::with_capacity(source_schema.len());
            for (idx, column) in source_schema.columns().iter().enumerate() {
                values.push(decode_value(batch, 2 + idx, row, column.data_type, path)?);
            }
            Some(values)
        } else {
            None
        };
        let target = if target_present.value(row) {
            let mut values = Vec::with_capacity(target_schema.len());
            for (idx, column) in target_schema.columns().iter().enumerate() {
                values.push(decode_value(batch, target_offset + idx, row, column.data_type, path)?);
            }
            Some(values)
        } else {
            None
        };
        out.push(JoinedRow { source, target });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, Dataset};
    use crate::join::{full_outer_join, JoinCondition};
    use tempfile::TempDir;

    fn joined() -> JoinedDataset {
        let columns = [
            ("id", DataType::Integer),
            ("name", DataType::Text),
            ("score", DataType::Float),
            ("active", DataType::Boolean),
            ("born", DataType::Date),
        ];
        let born = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        let source = Dataset::from_rows(
            &columns,
            vec![
                vec![1.into(), "a".into(), 1.5.into(), true.into(), born.into()],
                vec![2.into(), Value::Null, f64::NAN.into(), Value::Null, Value::Null],
            ],
        )
        .unwrap();
        let target = Dataset::from_rows(
            &columns,
            vec![vec![3.into(), "c".into(), (-0.0).into(), false.into(), born.into()]],
        )
        .unwrap();
        let cond = JoinCondition::on_columns(source.schema(), target.schema(), &["id"]).unwrap();
        full_outer_join(&source, &target, &cond)
    }

    #[test]
    fn test_parquet_round_trip_preserves_rows_and_sides() {
        let dir = TempDir::new().unwrap();
        let persist = ParquetPersist::new(dir.path());
        let original = joined();

        let reloaded = persist.persist_and_reload(original.clone(), "orders/run-1").unwrap();

        assert_eq!(reloaded, original);
        assert!(persist.file_path("orders/run-1").exists());
        assert!(reloaded.rows()[2].source.is_none());
    }

    #[test]
    fn test_decimals_round_trip_exactly() {
        let dir = TempDir::new().unwrap();
        let columns = [("id", DataType::Integer), ("amount", DataType::Decimal)];
        let exact = |s: &str| Value::from(s.parse::<Decimal>().unwrap());
        let source = Dataset::from_rows(
            &columns,
            vec![
                vec![1.into(), exact("12345678901234567.01")],
                vec![2.into(), exact("-3.5")],
                vec![3.into(), Value::Null],
            ],
        )
        .unwrap();
        let target = Dataset::from_rows(&columns, vec![vec![1.into(), exact("7")]]).unwrap();
        let cond = JoinCondition::on_columns(source.schema(), target.schema(), &["id"]).unwrap();
        let original = full_outer_join(&source, &target, &cond);

        let reloaded = ParquetPersist::new(dir.path())
            .persist_and_reload(original.clone(), "decimals")
            .unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn test_in_memory_is_passthrough() {
        let original = joined();
        let reloaded = InMemoryPersist.persist_and_reload(original.clone(), "x").unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn test_value_of_wrong_type_is_layout_error() {
        let dir = TempDir::new().unwrap();
        let schema = Schema::new(vec![Column::new("id", DataType::Integer)]).unwrap();
        let source = Dataset::from_parts_unchecked(schema, vec![vec!["oops".into()]]);
        let target = Dataset::from_rows(&[("id", DataType::Integer)], vec![]).unwrap();
        let joined = full_outer_join(&source, &target, &JoinCondition::cross());

        let err = ParquetPersist::new(dir.path())
            .persist_and_reload(joined, "bad")
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Layout { .. }));
    }
}
