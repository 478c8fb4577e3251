//! Column-level mismatch attribution

mod common;

use common::{fingerprinted, keys};
use tabrecon_core::{
    detect_column_mismatches, DataType, Dataset, Diagnostics, InMemoryPersist, ReconError, ReconcileOptions,
    ReportType, RowReconciler, Value,
};

fn abc(first: &str, second: &str, third: &str) -> Dataset {
    Dataset::from_rows(
        &[
            (first, DataType::Integer),
            (second, DataType::Integer),
            (third, DataType::Integer),
        ],
        vec![],
    )
    .unwrap()
}

#[test]
fn test_column_sets_must_match() {
    let source = abc("a", "b", "c");
    let target = abc("a", "b", "d");

    let err = detect_column_mismatches(&source, &target, &["a"]).unwrap_err();
    match err {
        ReconError::ColumnMismatch {
            source_missing,
            target_missing,
            ..
        } => {
            assert_eq!(source_missing, vec!["d".to_string()]);
            assert_eq!(target_missing, vec!["c".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_column_order_does_not_matter() {
    let source = abc("a", "b", "c");
    let target = abc("c", "a", "b");
    assert!(detect_column_mismatches(&source, &target, &["a"]).is_ok());
}

#[test]
fn test_single_column_attribution() {
    let columns = [("id", DataType::Integer), ("a", DataType::Integer), ("b", DataType::Integer)];
    let source = Dataset::from_rows(&columns, vec![vec![1.into(), 10.into(), 20.into()]]).unwrap();
    let target = Dataset::from_rows(&columns, vec![vec![1.into(), 10.into(), 99.into()]]).unwrap();

    let output = detect_column_mismatches(&source, &target, &["id"]).unwrap();

    assert_eq!(output.row_count(), 1);
    assert_eq!(output.mismatch_columns(), vec!["b".to_string()]);
    let data = output.data().unwrap();
    assert_eq!(data.value(0, "id"), Some(&Value::from(1)));
    assert_eq!(data.value(0, "b_base"), Some(&Value::from(20)));
    assert_eq!(data.value(0, "b_compare"), Some(&Value::from(99)));
}

#[test]
fn test_null_handling_differs_between_keys_and_values() {
    // NULL keys pair up in the row reconciler but NULL values never compare equal
    let columns = [("id", DataType::Integer), ("v", DataType::Text), ("w", DataType::Text)];
    let source = fingerprinted(
        &columns,
        vec![
            vec![Value::Null, "same".into(), "x".into()],
            vec![2.into(), Value::Null, "x".into()],
        ],
    );
    let target = fingerprinted(
        &columns,
        vec![
            vec![Value::Null, "same".into(), "x".into()],
            vec![2.into(), Value::Null, "y".into()],
        ],
    );

    let output = RowReconciler::new(&InMemoryPersist)
        .with_options(ReconcileOptions::default().with_diagnostics(Diagnostics::ColumnLevel))
        .reconcile(&source, &target, &keys(&["id"]), ReportType::All, "nulls")
        .unwrap();

    assert_eq!(output.matched_count, 1);
    assert_eq!(output.mismatch_count, 1);
    assert_eq!(output.mismatch.mismatch_columns(), vec!["v".to_string(), "w".to_string()]);
    let data = output.mismatch.data().unwrap();
    assert_eq!(data.value(0, "v_match"), Some(&Value::from(false)));
}

#[test]
fn test_mismatch_list_omits_clean_columns() {
    let columns = [("id", DataType::Integer), ("a", DataType::Text), ("b", DataType::Text)];
    let source = Dataset::from_rows(
        &columns,
        vec![vec![1.into(), "p".into(), "q".into()], vec![2.into(), "r".into(), "s".into()]],
    )
    .unwrap();
    let target = Dataset::from_rows(
        &columns,
        vec![vec![1.into(), "P".into(), "q".into()], vec![2.into(), "R".into(), "s".into()]],
    )
    .unwrap();

    let output = detect_column_mismatches(&source, &target, &["id"]).unwrap();
    assert_eq!(output.row_count(), 2);
    assert_eq!(output.mismatch_columns(), vec!["a".to_string()]);
}
