//! Row-level reconciliation
//!
//! Source and target are full-outer-joined on the key columns (or on the row
//! fingerprint when no row data is compared). The joined relation goes through the
//! injected persistence step, then every joined row falls into exactly one of four
//! classes:
//!
//! | source | target | fingerprints | class              |
//! |--------|--------|--------------|--------------------|
//! | yes    | no     |              | missing in target  |
//! | no     | yes    |              | missing in source  |
//! | yes    | yes    | equal        | matched            |
//! | yes    | yes    | different    | mismatched         |

use super::columns::{attribute_mismatches, check_same_columns};
use super::{Diagnostics, OutputProjection, ReconcileOptions};
use crate::dataset::{Dataset, Row, MIN_PARTITION_ROWS};
use crate::error::{ReconError, Result};
use crate::fingerprint::FINGERPRINT_COLUMN;
use crate::join::{full_outer_join, JoinCondition, JoinSide, JoinedDataset, JoinedRow};
use crate::persist::IntermediatePersist;
use crate::report::{ComparisonMode, ReportType};
use crate::result::{MismatchOutput, ReconcileOutput};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowClass {
    MissingInSource,
    MissingInTarget,
    Matched,
    Mismatched,
}

/// Row reconciler with an injected persistence step
pub struct RowReconciler<'a> {
    persist: &'a dyn IntermediatePersist,
    options: ReconcileOptions,
}

impl<'a> RowReconciler<'a> {
    pub fn new(persist: &'a dyn IntermediatePersist) -> Self {
        Self {
            persist,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile `source` against `target`
    ///
    /// Both datasets must carry the `hash_value_recon` fingerprint column. `path`
    /// names the location handed to the persistence step.
    pub fn reconcile(
        &self,
        source: &Dataset,
        target: &Dataset,
        key_columns: &[String],
        report_type: ReportType,
        path: &str,
    ) -> Result<ReconcileOutput> {
        let mode = ComparisonMode::for_report(report_type, key_columns)?;
        let source_fp = fingerprint_index(source, JoinSide::Source)?;
        let target_fp = fingerprint_index(target, JoinSide::Target)?;

        if source.is_empty() && target.is_empty() {
            log::warn!("Both source and target are empty for '{path}'");
        }

        let join_columns = mode.join_columns();
        let condition = JoinCondition::on_columns(source.schema(), target.schema(), join_columns.as_slice())?;
        let joined = full_outer_join(source, target, &condition);
        let joined = self.persist.persist_and_reload(joined, path)?;

        let classes: Vec<RowClass> = joined
            .rows()
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .map(|row| classify(row, source_fp, target_fp))
            .collect();

        let source_out = OutputProjection::for_schema(joined.schema(JoinSide::Source))?;
        let target_out = OutputProjection::for_schema(joined.schema(JoinSide::Target))?;

        let count = |class: RowClass| classes.iter().filter(|&&c| c == class).count();
        let missing_in_source_count = count(RowClass::MissingInSource);
        let missing_in_target_count = count(RowClass::MissingInTarget);
        let matched_count = count(RowClass::Matched);
        let mismatch_count = if report_type.compares_data() {
            count(RowClass::Mismatched)
        } else {
            0
        };

        let missing_in_source = self.sample(&joined, &classes, RowClass::MissingInSource, JoinSide::Target, &target_out);
        let missing_in_target = self.sample(&joined, &classes, RowClass::MissingInTarget, JoinSide::Source, &source_out);

        let mismatch = if report_type.compares_data() {
            self.mismatch_output(&joined, &classes, &mode, &source_out, &target_out)?
        } else {
            MismatchOutput::absent()
        };

        let output = ReconcileOutput {
            mismatch_count,
            missing_in_source_count,
            missing_in_target_count,
            matched_count,
            missing_in_source,
            missing_in_target,
            mismatch,
        };

        log::info!(
            "Reconciled '{path}': {} matched, {} mismatched, {} missing in source, {} missing in target",
            output.matched_count,
            output.mismatch_count,
            output.missing_in_source_count,
            output.missing_in_target_count
        );
        Ok(output)
    }

    /// First `sample_rows` rows of `class`, taken from `side`
    fn sample(
        &self,
        joined: &JoinedDataset,
        classes: &[RowClass],
        class: RowClass,
        side: JoinSide,
        projection: &OutputProjection,
    ) -> Dataset {
        let rows: Vec<Row> = joined
            .rows()
            .iter()
            .zip(classes)
            .filter(|(_, &c)| c == class)
            .filter_map(|(row, _)| row.side(side))
            .take(self.options.sample_rows)
            .map(|row| projection.apply(row))
            .collect();
        Dataset::from_parts_unchecked(projection.schema().clone(), rows)
    }

    fn mismatch_output(
        &self,
        joined: &JoinedDataset,
        classes: &[RowClass],
        mode: &ComparisonMode,
        source_out: &OutputProjection,
        target_out: &OutputProjection,
    ) -> Result<MismatchOutput> {
        let pairs: Vec<JoinedRow> = joined
            .rows()
            .iter()
            .zip(classes)
            .filter(|(_, &c)| c == RowClass::Mismatched)
            .map(|(row, _)| JoinedRow {
                source: row.source.as_deref().map(|r| source_out.apply(r)),
                target: row.target.as_deref().map(|r| target_out.apply(r)),
            })
            .collect();

        match (self.options.diagnostics, mode) {
            (Diagnostics::ColumnLevel, ComparisonMode::Keyed { keys }) => {
                check_same_columns(source_out.schema(), target_out.schema())?;
                let keys: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
                let paired = JoinedDataset::new(
                    source_out.schema().clone(),
                    target_out.schema().clone(),
                    pairs,
                );
                attribute_mismatches(&paired, keys.as_slice())
            }
            _ => {
                let rows = pairs.into_iter().filter_map(|p| p.source).collect();
                Ok(MismatchOutput::unattributed(Dataset::from_parts_unchecked(
                    source_out.schema().clone(),
                    rows,
                )))
            }
        }
    }
}

fn fingerprint_index(dataset: &Dataset, side: JoinSide) -> Result<usize> {
    let idx = dataset
        .schema()
        .index_of(FINGERPRINT_COLUMN)
        .ok_or_else(|| ReconError::MissingFingerprint {
            side: side.to_string(),
            column: FINGERPRINT_COLUMN.to_string(),
        })?;
    let nulls = dataset.rows().iter().filter(|r| r[idx].is_null()).count();
    if nulls > 0 {
        return Err(ReconError::NullFingerprint {
            side: side.to_string(),
            count: nulls,
        });
    }
    Ok(idx)
}

fn classify(row: &JoinedRow, source_fp: usize, target_fp: usize) -> RowClass {
    match (&row.source, &row.target) {
        (Some(_), None) => RowClass::MissingInTarget,
        (None, Some(_)) => RowClass::MissingInSource,
        (Some(s), Some(t)) if s[source_fp] == t[target_fp] => RowClass::Matched,
        (Some(_), Some(_)) => RowClass::Mismatched,
        // the join never emits a row with both sides absent
        (None, None) => RowClass::Matched,
    }
}

/// Reconcile rows with default options
pub fn reconcile_rows(
    source: &Dataset,
    target: &Dataset,
    key_columns: &[String],
    report_type: ReportType,
    persist: &dyn IntermediatePersist,
    path: &str,
) -> Result<ReconcileOutput> {
    RowReconciler::new(persist).reconcile(source, target, key_columns, report_type, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::fingerprint::with_fingerprint;
    use crate::persist::InMemoryPersist;
    use crate::value::{DataType, Value};

    fn keyed(rows: Vec<Row>) -> Dataset {
        let ds = Dataset::from_rows(&[("id", DataType::Integer), ("v", DataType::Text)], rows).unwrap();
        with_fingerprint(&ds, None).unwrap()
    }

    fn keys() -> Vec<String> {
        vec!["id".to_string()]
    }

    struct FailingPersist;

    impl IntermediatePersist for FailingPersist {
        fn persist_and_reload(&self, _: JoinedDataset, path: &str) -> std::result::Result<JoinedDataset, PersistenceError> {
            Err(PersistenceError::Layout {
                path: path.to_string(),
                detail: "disk full".to_string(),
            })
        }
    }

    #[test]
    fn test_classifies_missing_and_mismatched_rows() {
        let source = keyed(vec![
            vec![1.into(), "x".into()],
            vec![2.into(), "y".into()],
            vec![4.into(), "old".into()],
        ]);
        let target = keyed(vec![
            vec![1.into(), "x".into()],
            vec![3.into(), "z".into()],
            vec![4.into(), "new".into()],
        ]);

        let output = reconcile_rows(&source, &target, &keys(), ReportType::All, &InMemoryPersist, "t").unwrap();

        assert_eq!(output.matched_count, 1);
        assert_eq!(output.mismatch_count, 1);
        assert_eq!(output.missing_in_source_count, 1);
        assert_eq!(output.missing_in_target_count, 1);
        assert_eq!(output.missing_in_source.value(0, "id"), Some(&Value::from(3)));
        assert_eq!(output.missing_in_target.column_names(), vec!["id", "v"]);
        let mismatch = output.mismatch.data().unwrap();
        assert_eq!(mismatch.value(0, "v"), Some(&Value::from("old")));
        assert!(output.mismatch.flags().is_empty());
    }

    #[test]
    fn test_schema_report_joins_on_fingerprint() {
        let source = keyed(vec![vec![1.into(), "x".into()], vec![2.into(), "y".into()]]);
        let target = keyed(vec![vec![1.into(), "x".into()], vec![2.into(), "changed".into()]]);

        let output = reconcile_rows(&source, &target, &[], ReportType::Schema, &InMemoryPersist, "t").unwrap();

        assert_eq!(output.matched_count, 1);
        assert_eq!(output.mismatch_count, 0);
        assert_eq!(output.missing_in_source_count, 1);
        assert_eq!(output.missing_in_target_count, 1);
        assert!(output.mismatch.data().is_none());
    }

    #[test]
    fn test_column_level_diagnostics_attribute_mismatches() {
        let source = keyed(vec![vec![1.into(), "a".into()], vec![2.into(), "b".into()]]);
        let target = keyed(vec![vec![1.into(), "a".into()], vec![2.into(), "B".into()]]);
        let options = ReconcileOptions::default().with_diagnostics(Diagnostics::ColumnLevel);

        let output = RowReconciler::new(&InMemoryPersist)
            .with_options(options)
            .reconcile(&source, &target, &keys(), ReportType::Data, "t")
            .unwrap();

        assert_eq!(output.mismatch_count, 1);
        assert_eq!(output.mismatch.mismatch_columns(), vec!["v"]);
        let data = output.mismatch.data().unwrap();
        assert_eq!(data.value(0, "v_compare"), Some(&Value::from("B")));
    }

    #[test]
    fn test_missing_fingerprint_is_rejected() {
        let bare = Dataset::from_rows(&[("id", DataType::Integer)], vec![]).unwrap();
        let err = reconcile_rows(&bare, &bare, &keys(), ReportType::All, &InMemoryPersist, "t").unwrap_err();
        assert!(matches!(err, ReconError::MissingFingerprint { ref side, .. } if side == "source"));
    }

    #[test]
    fn test_null_fingerprint_is_rejected() {
        let ds = Dataset::from_rows(
            &[("id", DataType::Integer), (FINGERPRINT_COLUMN, DataType::Text)],
            vec![vec![1.into(), Value::Null]],
        )
        .unwrap();
        let ok = keyed(vec![]);
        let err = reconcile_rows(&ok, &ds, &keys(), ReportType::All, &InMemoryPersist, "t").unwrap_err();
        assert!(matches!(err, ReconError::NullFingerprint { count: 1, .. }));
    }

    #[test]
    fn test_persistence_failure_aborts() {
        let source = keyed(vec![vec![1.into(), "x".into()]]);
        let err = reconcile_rows(&source, &source, &keys(), ReportType::All, &FailingPersist, "orders").unwrap_err();
        assert!(matches!(err, ReconError::Persistence(PersistenceError::Layout { ref path, .. }) if path == "orders"));
    }

    #[test]
    fn test_data_report_without_keys_is_invalid() {
        let source = keyed(vec![]);
        let err = reconcile_rows(&source, &source, &[], ReportType::Data, &InMemoryPersist, "t").unwrap_err();
        assert!(matches!(err, ReconError::InvalidInput(_)));
    }
}
