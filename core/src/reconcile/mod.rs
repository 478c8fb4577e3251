//! Reconciliation of a source dataset against a target dataset
//!
//! Two entry points share one output shape ([`crate::result::ReconcileOutput`]):
//!
//! - [`RowReconciler`] pairs individual rows on key columns (or on the row fingerprint)
//!   and classifies every joined row as matched, mismatched or missing on one side.
//! - [`AggregateReconciler`] compares pre-aggregated metrics per group.
//!
//! [`detect_column_mismatches`] attributes keyed mismatches to individual columns.

pub mod aggregate;
pub mod columns;
pub mod rows;

pub use aggregate::{reconcile_aggregates, AggregateReconciler};
pub use columns::{check_same_columns, detect_column_mismatches};
pub use rows::{reconcile_rows, RowReconciler};

use crate::dataset::{Column, Row, Schema};
use crate::error::Result;
use crate::fingerprint::FINGERPRINT_COLUMN;
use crate::result::DEFAULT_SAMPLE_ROWS;
use serde::{Deserialize, Serialize};

/// How much detail to produce for keyed mismatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostics {
    /// Flag mismatching rows by fingerprint inequality alone
    #[default]
    FingerprintOnly,
    /// Also attribute each mismatch to the columns that differ
    ColumnLevel,
}

/// Knobs shared by both reconcilers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Cap on rows kept in each missing-row sample
    pub sample_rows: usize,
    pub diagnostics: Diagnostics,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            sample_rows: DEFAULT_SAMPLE_ROWS,
            diagnostics: Diagnostics::default(),
        }
    }
}

impl ReconcileOptions {
    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Column selection applied to rows before they leave the engine:
/// the fingerprint is dropped and names are lower-cased
#[derive(Debug, Clone)]
pub(crate) struct OutputProjection {
    indices: Vec<usize>,
    schema: Schema,
}

impl OutputProjection {
    pub(crate) fn for_schema(schema: &Schema) -> Result<Self> {
        let (indices, columns): (Vec<usize>, Vec<Column>) = schema
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name != FINGERPRINT_COLUMN)
            .map(|(idx, c)| (idx, Column::new(c.name.to_lowercase(), c.data_type)))
            .unzip();
        Ok(Self {
            indices,
            schema: Schema::new(columns)?,
        })
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn apply(&self, row: &[crate::value::Value]) -> Row {
        self.indices.iter().map(|&i| row[i].clone()).collect()
    }
}
