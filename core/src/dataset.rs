//! In-memory relations: schema, rows and typed row-parallel operators

use crate::error::{ReconError, Result};
use crate::value::{DataType, Value};
use rayon::prelude::*;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

/// Smallest slice of rows handed to a single rayon task
pub const MIN_PARTITION_ROWS: usize = 4096;

pub type Row = Vec<Value>;

/// Named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of uniquely named columns
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Schema {
    columns: Vec<Column>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if positions.insert(column.name.clone(), idx).is_some() {
                return Err(ReconError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns, positions })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Resolve a column name, reporting which side of a comparison it was missing from
    pub fn resolve(&self, name: &str, side: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| ReconError::unknown_column(side, name))
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }
}

/// A relation: schema plus an unordered multiset of rows
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Schema,
    rows: Vec<Row>,
}

impl Dataset {
    /// Checks every row against the schema; integers are widened into float and decimal columns
    pub fn new(schema: Schema, mut rows: Vec<Row>) -> Result<Self> {
        let expected = schema.len();
        for (row, values) in rows.iter_mut().enumerate() {
            if values.len() != expected {
                return Err(ReconError::RowWidth {
                    row,
                    expected,
                    actual: values.len(),
                });
            }
            for (column, value) in schema.columns().iter().zip(values.iter_mut()) {
                let taken = std::mem::replace(value, Value::Null);
                *value = column
                    .data_type
                    .admit(taken)
                    .map_err(|rejected| ReconError::TypeMismatch {
                        row,
                        column: column.name.clone(),
                        expected: column.data_type,
                        value: format!("{rejected:?}"),
                    })?;
            }
        }
        Ok(Self { schema, rows })
    }

    /// Build a dataset from `(name, type)` pairs
    pub fn from_rows(columns: &[(&str, DataType)], rows: Vec<Row>) -> Result<Self> {
        let schema = Schema::new(
            columns
                .iter()
                .map(|(name, data_type)| Column::new(*name, *data_type))
                .collect(),
        )?;
        Self::new(schema, rows)
    }

    pub(crate) fn from_parts_unchecked(schema: Schema, rows: Vec<Row>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == schema.len()));
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.names()
    }

    /// Value of `column` in row `row`
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Keep rows satisfying `predicate`, evaluated in parallel
    pub fn filter<F>(&self, predicate: F) -> Dataset
    where
        F: Fn(&[Value]) -> bool + Sync,
    {
        let rows: Vec<Row> = self
            .rows
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .filter(|row| predicate(row))
            .cloned()
            .collect();
        Dataset::from_parts_unchecked(self.schema.clone(), rows)
    }

    /// Keep only `columns`, in the order given
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> Result<Dataset> {
        let indices = columns
            .iter()
            .map(|c| self.schema.resolve(c.as_ref(), "dataset"))
            .collect::<Result<Vec<_>>>()?;
        let schema = Schema::new(
            indices
                .iter()
                .map(|&i| self.schema.column(i).clone())
                .collect(),
        )?;
        let rows = self
            .rows
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Dataset::from_parts_unchecked(schema, rows))
    }

    /// Remove `column` if present; absent columns are ignored
    pub fn drop_column(&self, column: &str) -> Dataset {
        match self.schema.index_of(column) {
            None => self.clone(),
            Some(drop_idx) => {
                let keep: Vec<String> = self
                    .schema
                    .columns()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != drop_idx)
                    .map(|(_, c)| c.name.clone())
                    .collect();
                // every kept name comes from this schema
                self.project(&keep).unwrap_or_else(|_| self.clone())
            }
        }
    }

    /// First `n` rows
    pub fn limit(&self, n: usize) -> Dataset {
        let rows = self.rows.iter().take(n).cloned().collect();
        Dataset::from_parts_unchecked(self.schema.clone(), rows)
    }

    /// Same rows with every column name lower-cased
    pub fn lowercase_names(&self) -> Result<Dataset> {
        let schema = Schema::new(
            self.schema
                .columns()
                .iter()
                .map(|c| Column::new(c.name.to_lowercase(), c.data_type))
                .collect(),
        )?;
        Ok(Dataset::from_parts_unchecked(schema, self.rows.clone()))
    }

    /// Append a computed column
    pub fn with_column<F>(&self, column: Column, compute: F) -> Result<Dataset>
    where
        F: Fn(&[Value]) -> Value + Sync,
    {
        let mut columns = self.schema.columns().to_vec();
        columns.push(column);
        let schema = Schema::new(columns)?;
        let rows = self
            .rows
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .map(|row| {
                let mut out = row.clone();
                out.push(compute(row));
                out
            })
            .collect();
        Ok(Dataset::from_parts_unchecked(schema, rows))
    }
}

/// Serialized as a list of `{column: value}` objects
impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct RowRef<'a>(&'a Schema, &'a Row);

        impl Serialize for RowRef<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.1.len()))?;
                for (column, value) in self.0.columns().iter().zip(self.1.iter()) {
                    map.serialize_entry(&column.name, value)?;
                }
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowRef(&self.schema, row))?;
        }
        seq.end()
    }
}
