//! Output shape shared by row-level and aggregate reconciliation

use crate::dataset::Dataset;
use serde::Serialize;

/// Maximum rows kept in each missing-row sample
pub const DEFAULT_SAMPLE_ROWS: usize = 50;

/// A boolean column in a mismatch dataset recording whether `column` agreed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchFlag {
    /// Reported name of the compared column
    pub column: String,
    /// Name of the boolean flag column in the mismatch dataset
    pub flag_column: String,
}

impl MatchFlag {
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            flag_column: format!("{column}_match"),
            column,
        }
    }
}

/// Rows that matched on key but differ in content
///
/// The list of disagreeing columns is derived from the flag columns of `data`, so it
/// can never drift from the rows it describes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MismatchOutput {
    data: Option<Dataset>,
    flags: Vec<MatchFlag>,
}

impl MismatchOutput {
    /// Mismatch rows with per-column flags
    pub fn attributed(data: Dataset, flags: Vec<MatchFlag>) -> Self {
        Self {
            data: Some(data),
            flags,
        }
    }

    /// Mismatch rows flagged by fingerprint only
    pub fn unattributed(data: Dataset) -> Self {
        Self {
            data: Some(data),
            flags: Vec::new(),
        }
    }

    /// Data comparison was not requested
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn data(&self) -> Option<&Dataset> {
        self.data.as_ref()
    }

    pub fn flags(&self) -> &[MatchFlag] {
        &self.flags
    }

    pub fn row_count(&self) -> usize {
        self.data.as_ref().map(Dataset::num_rows).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Columns where at least one row is not provably equal
    pub fn mismatch_columns(&self) -> Vec<String> {
        let Some(data) = &self.data else {
            return Vec::new();
        };
        self.flags
            .iter()
            .filter(|flag| {
                data.schema()
                    .index_of(&flag.flag_column)
                    .map(|idx| data.rows().iter().any(|row| row[idx].as_bool() != Some(true)))
                    .unwrap_or(false)
            })
            .map(|flag| flag.column.clone())
            .collect()
    }
}

/// Result of one reconciliation run
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutput {
    pub mismatch_count: usize,
    pub missing_in_source_count: usize,
    pub missing_in_target_count: usize,
    /// Rows present on both sides that agree
    pub matched_count: usize,
    /// Target rows with no source counterpart, in the target's columns
    pub missing_in_source: Dataset,
    /// Source rows with no target counterpart, in the source's columns
    pub missing_in_target: Dataset,
    pub mismatch: MismatchOutput,
}

impl ReconcileOutput {
    pub fn is_reconciled(&self) -> bool {
        self.mismatch_count == 0 && self.missing_in_source_count == 0 && self.missing_in_target_count == 0
    }

    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            reconciled: self.is_reconciled(),
            matched_count: self.matched_count,
            mismatch_count: self.mismatch_count,
            missing_in_source_count: self.missing_in_source_count,
            missing_in_target_count: self.missing_in_target_count,
            mismatch_columns: self.mismatch.mismatch_columns(),
        }
    }
}

/// Serializable counts and attribution of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub reconciled: bool,
    pub matched_count: usize,
    pub mismatch_count: usize,
    pub missing_in_source_count: usize,
    pub missing_in_target_count: usize,
    pub mismatch_columns: Vec<String>,
}

/// Full JSON report: counts plus the row samples
#[derive(Debug, Serialize)]
pub struct ReconcileReport<'a> {
    pub name: &'a str,
    #[serde(flatten)]
    pub summary: ReconcileSummary,
    pub missing_in_source: &'a Dataset,
    pub missing_in_target: &'a Dataset,
    pub mismatch: Option<&'a Dataset>,
}

impl<'a> ReconcileReport<'a> {
    pub fn new(name: &'a str, output: &'a ReconcileOutput) -> Self {
        Self {
            name,
            summary: output.summary(),
            missing_in_source: &output.missing_in_source,
            missing_in_target: &output.missing_in_target,
            mismatch: output.mismatch.data(),
        }
    }
}
