//! Column-level mismatch attribution
//!
//! Of the rows present on both sides, find those whose non-key values differ and
//! record, per column, whether the two sides agreed. Value comparison is ordinary SQL
//! equality: a NULL on either side is never provably equal, so it is flagged.

use crate::dataset::{Column, Dataset, Row, Schema, MIN_PARTITION_ROWS};
use crate::error::{ReconError, Result};
use crate::join::{inner_join, Equality, JoinCondition, JoinSide, JoinedDataset};
use crate::result::{MatchFlag, MismatchOutput};
use crate::value::{DataType, Value};
use rayon::prelude::*;
use std::collections::BTreeSet;

const COLUMN_MISMATCH_MESSAGE: &str =
    "source and target should have same columns for capturing the mismatch data";

/// Fail unless both schemas carry the same column names, in any order
pub fn check_same_columns(source: &Schema, target: &Schema) -> Result<()> {
    let source_names: BTreeSet<String> = source.names().into_iter().collect();
    let target_names: BTreeSet<String> = target.names().into_iter().collect();

    let source_missing: Vec<String> = target_names.difference(&source_names).cloned().collect();
    let target_missing: Vec<String> = source_names.difference(&target_names).cloned().collect();

    if source_missing.is_empty() && target_missing.is_empty() {
        return Ok(());
    }
    Err(ReconError::ColumnMismatch {
        message: COLUMN_MISMATCH_MESSAGE.to_string(),
        source_missing,
        target_missing,
    })
}

/// Inner-join `source` and `target` on `key_columns` and flag every differing column
///
/// Rows without a partner on the other side are not considered. The result holds the
/// key columns followed by `<col>_base`, `<col>_compare` and `<col>_match` for every
/// non-key column in sorted order.
pub fn detect_column_mismatches<S: AsRef<str>>(
    source: &Dataset,
    target: &Dataset,
    key_columns: &[S],
) -> Result<MismatchOutput> {
    check_same_columns(source.schema(), target.schema())?;

    let condition = JoinCondition::on_columns(source.schema(), target.schema(), key_columns)?
        .with_equality(Equality::Sql);
    let joined = inner_join(source, target, &condition);

    attribute_mismatches(&joined, key_columns)
}

/// Attribute already-paired rows; rows with an absent side are skipped
pub(crate) fn attribute_mismatches<S: AsRef<str>>(
    joined: &JoinedDataset,
    key_columns: &[S],
) -> Result<MismatchOutput> {
    let source_schema = joined.schema(JoinSide::Source);
    let target_schema = joined.schema(JoinSide::Target);

    let keys: Vec<&str> = key_columns.iter().map(AsRef::as_ref).collect();
    let key_indices = keys
        .iter()
        .map(|k| source_schema.resolve(k, &JoinSide::Source.to_string()))
        .collect::<Result<Vec<_>>>()?;

    let mut compare: Vec<&Column> = source_schema
        .columns()
        .iter()
        .filter(|c| !keys.contains(&c.name.as_str()))
        .collect();
    compare.sort_by(|a, b| a.name.cmp(&b.name));

    let compare_indices = compare
        .iter()
        .map(|c| {
            Ok((
                source_schema.resolve(&c.name, &JoinSide::Source.to_string())?,
                target_schema.resolve(&c.name, &JoinSide::Target.to_string())?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut columns: Vec<Column> = key_indices
        .iter()
        .map(|&i| source_schema.column(i).clone())
        .collect();
    for (column, &(_, t)) in compare.iter().zip(&compare_indices) {
        columns.push(Column::new(format!("{}_base", column.name), column.data_type));
        columns.push(Column::new(
            format!("{}_compare", column.name),
            target_schema.column(t).data_type,
        ));
        columns.push(Column::new(format!("{}_match", column.name), DataType::Boolean));
    }
    let schema = Schema::new(columns)?;

    let rows: Vec<Row> = joined
        .rows()
        .par_iter()
        .with_min_len(MIN_PARTITION_ROWS)
        .filter_map(|joined_row| {
            let (source_row, target_row) = (joined_row.source.as_ref()?, joined_row.target.as_ref()?);
            let flags: Vec<bool> = compare_indices
                .iter()
                .map(|&(s, t)| source_row[s].sql_eq(&target_row[t]) == Some(true))
                .collect();
            if flags.iter().all(|&f| f) {
                return None;
            }
            let mut out: Row = key_indices.iter().map(|&i| source_row[i].clone()).collect();
            for (&(s, t), flag) in compare_indices.iter().zip(flags) {
                out.push(source_row[s].clone());
                out.push(target_row[t].clone());
                out.push(Value::Boolean(flag));
            }
            Some(out)
        })
        .collect();

    log::debug!(
        "{} of {} paired rows differ in at least one of {} compared columns",
        rows.len(),
        joined.num_rows(),
        compare.len()
    );

    let flags = compare.iter().map(|c| MatchFlag::new(c.name.clone())).collect();
    Ok(MismatchOutput::attributed(
        Dataset::from_parts_unchecked(schema, rows),
        flags,
    ))
}
