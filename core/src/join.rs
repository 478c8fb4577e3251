//! Join conditions and typed join results
//!
//! A [`JoinCondition`] is the conjunction of per-column equalities between the source
//! and target side. With no column pairs it is the always-true predicate, which turns
//! any join into a cross join. Joined rows keep the two sides as separate records
//! instead of synthesising prefixed column names.

use crate::dataset::{Dataset, Row, Schema, MIN_PARTITION_ROWS};
use crate::error::Result;
use crate::value::Value;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// Which input of a comparison a column or row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    Source,
    Target,
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinSide::Source => f.write_str("source"),
            JoinSide::Target => f.write_str("target"),
        }
    }
}

/// How key values are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Equality {
    /// NULL matches NULL
    #[default]
    NullSafe,
    /// NULL matches nothing
    Sql,
}

/// Resolved conjunction of `source.col = target.col` terms
#[derive(Debug, Clone, Default)]
pub struct JoinCondition {
    pairs: Vec<(usize, usize)>,
    equality: Equality,
}

impl JoinCondition {
    /// Always-true predicate
    pub fn cross() -> Self {
        Self::default()
    }

    /// Pair `source_column` with `target_column` for every entry in `pairs`
    pub fn on_pairs<S: AsRef<str>>(
        source: &Schema,
        target: &Schema,
        pairs: &[(S, S)],
    ) -> Result<Self> {
        let resolved = pairs
            .iter()
            .map(|(source_column, target_column)| {
                Ok((
                    source.resolve(source_column.as_ref(), &JoinSide::Source.to_string())?,
                    target.resolve(target_column.as_ref(), &JoinSide::Target.to_string())?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            pairs: resolved,
            equality: Equality::NullSafe,
        })
    }

    /// Same column names on both sides
    pub fn on_columns<S: AsRef<str>>(source: &Schema, target: &Schema, columns: &[S]) -> Result<Self> {
        let pairs: Vec<(&str, &str)> = columns
            .iter()
            .map(|c| (c.as_ref(), c.as_ref()))
            .collect();
        Self::on_pairs(source, target, &pairs)
    }

    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    pub fn is_cross(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Hash key of a row; `None` when it can never match under SQL equality
    fn key(&self, row: &[Value], side: JoinSide) -> Option<Vec<Value>> {
        let key: Vec<Value> = self
            .pairs
            .iter()
            .map(|&(s, t)| match side {
                JoinSide::Source => row[s].clone(),
                JoinSide::Target => row[t].clone(),
            })
            .collect();
        if self.equality == Equality::Sql && key.iter().any(Value::is_null) {
            None
        } else {
            Some(key)
        }
    }
}

/// One output row of a join; an absent side means "no counterpart"
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub source: Option<Row>,
    pub target: Option<Row>,
}

impl JoinedRow {
    pub fn side(&self, side: JoinSide) -> Option<&Row> {
        match side {
            JoinSide::Source => self.source.as_ref(),
            JoinSide::Target => self.target.as_ref(),
        }
    }

    /// Value of column `idx` on `side`, NULL when that side is absent
    pub fn value(&self, side: JoinSide, idx: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.side(side).map(|row| &row[idx]).unwrap_or(&NULL)
    }
}

/// Result of joining a source and a target dataset
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedDataset {
    source_schema: Schema,
    target_schema: Schema,
    rows: Vec<JoinedRow>,
}

impl JoinedDataset {
    pub fn new(source_schema: Schema, target_schema: Schema, rows: Vec<JoinedRow>) -> Self {
        Self {
            source_schema,
            target_schema,
            rows,
        }
    }

    pub fn schema(&self, side: JoinSide) -> &Schema {
        match side {
            JoinSide::Source => &self.source_schema,
            JoinSide::Target => &self.target_schema,
        }
    }

    pub fn rows(&self) -> &[JoinedRow] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn filter<F>(&self, predicate: F) -> JoinedDataset
    where
        F: Fn(&JoinedRow) -> bool + Sync,
    {
        let rows = self
            .rows
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        JoinedDataset::new(self.source_schema.clone(), self.target_schema.clone(), rows)
    }

    /// One side of the relation as a plain dataset; absent sides become all-NULL rows
    pub fn side_dataset(&self, side: JoinSide) -> Dataset {
        let schema = self.schema(side).clone();
        let width = schema.len();
        let rows = self
            .rows
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .map(|r| {
                r.side(side)
                    .cloned()
                    .unwrap_or_else(|| vec![Value::Null; width])
            })
            .collect();
        Dataset::from_parts_unchecked(schema, rows)
    }

    /// Source columns followed by target columns; names must not collide
    pub fn flatten(&self) -> Result<Dataset> {
        let mut columns = self.source_schema.columns().to_vec();
        columns.extend(self.target_schema.columns().iter().cloned());
        let schema = Schema::new(columns)?;
        let rows = self
            .rows
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .map(|r| {
                let mut out = Vec::with_capacity(schema.len());
                for idx in 0..self.source_schema.len() {
                    out.push(r.value(JoinSide::Source, idx).clone());
                }
                for idx in 0..self.target_schema.len() {
                    out.push(r.value(JoinSide::Target, idx).clone());
                }
                out
            })
            .collect();
        Ok(Dataset::from_parts_unchecked(schema, rows))
    }
}

/// Full outer join: every source and every target row appears at least once
pub fn full_outer_join(source: &Dataset, target: &Dataset, condition: &JoinCondition) -> JoinedDataset {
    join(source, target, condition, true)
}

/// Inner join: only pairs satisfying `condition`
pub fn inner_join(source: &Dataset, target: &Dataset, condition: &JoinCondition) -> JoinedDataset {
    join(source, target, condition, false)
}

fn join(source: &Dataset, target: &Dataset, condition: &JoinCondition, outer: bool) -> JoinedDataset {
    let target_rows = target.rows();

    // Matching target indices per source row, source order preserved
    let matches: Vec<Vec<usize>> = if condition.is_cross() {
        let all: Vec<usize> = (0..target_rows.len()).collect();
        vec![all; source.num_rows()]
    } else {
        let mut index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for (idx, row) in target_rows.iter().enumerate() {
            if let Some(key) = condition.key(row, JoinSide::Target) {
                index.entry(key).or_default().push(idx);
            }
        }
        source
            .rows()
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .map(|row| {
                condition
                    .key(row, JoinSide::Source)
                    .and_then(|key| index.get(&key).cloned())
                    .unwrap_or_default()
            })
            .collect()
    };

    let mut target_matched = vec![false; target_rows.len()];
    let mut rows = Vec::with_capacity(source.num_rows().max(target_rows.len()));
    for (source_row, hits) in source.rows().iter().zip(matches) {
        if hits.is_empty() {
            if outer {
                rows.push(JoinedRow {
                    source: Some(source_row.clone()),
                    target: None,
                });
            }
            continue;
        }
        for t in hits {
            target_matched[t] = true;
            rows.push(JoinedRow {
                source: Some(source_row.clone()),
                target: Some(target_rows[t].clone()),
            });
        }
    }

    if outer {
        for (t, matched) in target_matched.into_iter().enumerate() {
            if !matched {
                rows.push(JoinedRow {
                    source: None,
                    target: Some(target_rows[t].clone()),
                });
            }
        }
    }

    log::debug!(
        "Joined {} source and {} target rows into {} rows (outer={}, cross={})",
        source.num_rows(),
        target_rows.len(),
        rows.len(),
        outer,
        condition.is_cross()
    );

    JoinedDataset::new(source.schema().clone(), target.schema().clone(), rows)
}
