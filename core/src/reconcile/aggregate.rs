//! Aggregate-level reconciliation
//!
//! Both inputs are already aggregated: the source carries `source_<func>_<col>` metric
//! columns and, when grouped, `source_group_by_<col>` columns; the target mirrors
//! them with a `target_` prefix. Groups are paired with a null-safe full outer join on
//! the group columns. Without grouping each side is a single whole-dataset row and the
//! join predicate is always true.

use super::ReconcileOptions;
use crate::aggregate_query::AggregateSpec;
use crate::dataset::{Column, Dataset, Row, Schema, MIN_PARTITION_ROWS};
use crate::error::{ReconError, Result};
use crate::join::{full_outer_join, JoinCondition, JoinSide, JoinedRow};
use crate::result::{MatchFlag, MismatchOutput, ReconcileOutput};
use crate::value::{DataType, Value};
use indexmap::IndexSet;
use rayon::prelude::*;

/// Name of the composite per-group flag
pub const AGGREGATE_MATCH_COLUMN: &str = "agg_data_match";

/// Source/target column pair plus the name it is reported under
#[derive(Debug, Clone)]
struct ColumnPair {
    name: String,
    source: usize,
    target: usize,
}

/// Per-row outcome; a row can be missing on both sides only when every value is NULL
#[derive(Debug, Clone, Copy, Default)]
struct GroupOutcome {
    missing_in_source: bool,
    missing_in_target: bool,
    matched: bool,
    mismatched: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateReconciler {
    options: ReconcileOptions,
}

impl AggregateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn reconcile(
        &self,
        source: &Dataset,
        target: &Dataset,
        specs: &[AggregateSpec],
    ) -> Result<ReconcileOutput> {
        let first = specs
            .first()
            .ok_or_else(|| ReconError::invalid_input("No aggregate specifications given"))?;
        for spec in specs {
            spec.validate()?;
        }
        let group_columns = first.group_key();
        if specs.iter().any(|s| s.group_key() != group_columns) {
            log::warn!(
                "Aggregate specs disagree on grouping; using {:?} from the first spec",
                group_columns
            );
        }

        let source = source.lowercase_names()?;
        let target = target.lowercase_names()?;

        let metric_names: IndexSet<String> = specs.iter().flat_map(AggregateSpec::metric_names).collect();
        let metrics = resolve_pairs(&source, &target, metric_names.iter().map(String::as_str), "")?;
        let groups = resolve_pairs(&source, &target, group_columns.iter().map(String::as_str), "group_by_")?;

        let condition = if groups.is_empty() {
            if source.num_rows() > 1 || target.num_rows() > 1 {
                return Err(ReconError::UngroupedAggregate {
                    source_rows: source.num_rows(),
                    target_rows: target.num_rows(),
                });
            }
            JoinCondition::cross()
        } else {
            let names: Vec<(String, String)> = group_columns
                .iter()
                .map(|c| (format!("source_group_by_{c}"), format!("target_group_by_{c}")))
                .collect();
            JoinCondition::on_pairs(source.schema(), target.schema(), names.as_slice())?
        };
        let joined = full_outer_join(&source, &target, &condition);

        let all_pairs: Vec<&ColumnPair> = groups.iter().chain(metrics.iter()).collect();
        let outcomes: Vec<GroupOutcome> = joined
            .rows()
            .par_iter()
            .with_min_len(MIN_PARTITION_ROWS)
            .map(|row| classify(row, &all_pairs, &groups, &metrics))
            .collect();

        let count = |pick: fn(&GroupOutcome) -> bool| outcomes.iter().filter(|o| pick(o)).count();
        let missing_in_source_count = count(|o| o.missing_in_source);
        let missing_in_target_count = count(|o| o.missing_in_target);
        let mismatch_count = count(|o| o.mismatched);
        let matched_count = count(|o| o.matched);

        // Missing-group samples carry every column of the side they come from
        let sample = |pick: fn(&GroupOutcome) -> bool, side: JoinSide, schema: &Schema| -> Dataset {
            let rows: Vec<Row> = joined
                .rows()
                .iter()
                .zip(&outcomes)
                .filter(|(_, o)| pick(o))
                .take(self.options.sample_rows)
                .map(|(row, _)| (0..schema.len()).map(|i| row.value(side, i).clone()).collect())
                .collect();
            Dataset::from_parts_unchecked(schema.clone(), rows)
        };
        let missing_in_source = sample(|o| o.missing_in_source, JoinSide::Target, target.schema());
        let missing_in_target = sample(|o| o.missing_in_target, JoinSide::Source, source.schema());

        let source_cols: Vec<usize> = all_pairs.iter().map(|p| p.source).collect();
        let target_cols: Vec<usize> = all_pairs.iter().map(|p| p.target).collect();
        let source_out = side_projection(source.schema(), &source_cols)?;
        let target_out = side_projection(target.schema(), &target_cols)?;

        let mut columns = source_out.columns().to_vec();
        columns.extend(target_out.columns().iter().cloned());
        let flags: Vec<MatchFlag> = metrics.iter().map(|p| MatchFlag::new(p.name.clone())).collect();
        for flag in &flags {
            columns.push(Column::new(flag.flag_column.clone(), DataType::Boolean));
        }
        columns.push(Column::new(AGGREGATE_MATCH_COLUMN, DataType::Boolean));
        let mismatch_schema = Schema::new(columns)?;

        let mismatch_rows: Vec<Row> = joined
            .rows()
            .iter()
            .zip(&outcomes)
            .filter(|(_, o)| o.mismatched)
            .map(|(row, _)| {
                let mut out: Row = source_cols.iter().map(|&i| row.value(JoinSide::Source, i).clone()).collect();
                out.extend(target_cols.iter().map(|&i| row.value(JoinSide::Target, i).clone()));
                let metric_flags: Vec<Option<bool>> = metrics.iter().map(|p| pair_match(row, p)).collect();
                let composite = all_of(&metric_flags);
                out.extend(metric_flags.into_iter().map(Value::from));
                out.push(Value::from(composite));
                out
            })
            .collect();

        let output = ReconcileOutput {
            mismatch_count,
            missing_in_source_count,
            missing_in_target_count,
            matched_count,
            missing_in_source,
            missing_in_target,
            mismatch: MismatchOutput::attributed(
                Dataset::from_parts_unchecked(mismatch_schema, mismatch_rows),
                flags,
            ),
        };

        log::info!(
            "Reconciled {} aggregate groups: {} matched, {} mismatched, {} missing in source, {} missing in target",
            joined.num_rows(),
            output.matched_count,
            output.mismatch_count,
            output.missing_in_source_count,
            output.missing_in_target_count
        );
        Ok(output)
    }
}

/// Resolve `source_<prefix><name>` / `target_<prefix><name>` for every name
fn resolve_pairs<'a>(
    source: &Dataset,
    target: &Dataset,
    names: impl Iterator<Item = &'a str>,
    prefix: &str,
) -> Result<Vec<ColumnPair>> {
    names
        .map(|name| {
            Ok(ColumnPair {
                name: name.to_string(),
                source: source
                    .schema()
                    .resolve(&format!("source_{prefix}{name}"), &JoinSide::Source.to_string())?,
                target: target
                    .schema()
                    .resolve(&format!("target_{prefix}{name}"), &JoinSide::Target.to_string())?,
            })
        })
        .collect()
}

fn side_projection(schema: &Schema, indices: &[usize]) -> Result<Schema> {
    Schema::new(indices.iter().map(|&i| schema.column(i).clone()).collect())
}

fn pair_match(row: &JoinedRow, pair: &ColumnPair) -> Option<bool> {
    row.value(JoinSide::Source, pair.source)
        .sql_eq(row.value(JoinSide::Target, pair.target))
}

/// Three-valued AND
fn all_of(flags: &[Option<bool>]) -> Option<bool> {
    if flags.contains(&Some(false)) {
        Some(false)
    } else if flags.iter().any(Option::is_none) {
        None
    } else {
        Some(true)
    }
}

fn classify(row: &JoinedRow, all_pairs: &[&ColumnPair], groups: &[ColumnPair], metrics: &[ColumnPair]) -> GroupOutcome {
    let missing_in_source = all_pairs
        .iter()
        .all(|p| row.value(JoinSide::Source, p.source).is_null());
    let missing_in_target = all_pairs
        .iter()
        .all(|p| row.value(JoinSide::Target, p.target).is_null());

    let groups_present = groups.iter().all(|p| {
        !row.value(JoinSide::Source, p.source).is_null() && !row.value(JoinSide::Target, p.target).is_null()
    });
    let flags: Vec<Option<bool>> = metrics.iter().map(|p| pair_match(row, p)).collect();
    let composite = all_of(&flags);

    GroupOutcome {
        missing_in_source,
        missing_in_target,
        matched: !missing_in_source && !missing_in_target && composite == Some(true),
        mismatched: groups_present && composite == Some(false),
    }
}

/// Reconcile pre-aggregated datasets with default options
pub fn reconcile_aggregates(
    source: &Dataset,
    target: &Dataset,
    specs: &[AggregateSpec],
) -> Result<ReconcileOutput> {
    AggregateReconciler::new().reconcile(source, target, specs)
}
