//! Aggregate reconciliation, both on prepared datasets and through DuckDB

mod common;

use common::TestWorkspace;
use tabrecon_core::aggregate_query::{build_aggregate_queries, Layer};
use tabrecon_core::reconcile::aggregate::AGGREGATE_MATCH_COLUMN;
use tabrecon_core::{
    reconcile_aggregates, AggregateFunction, AggregateSpec, DataType, Dataset, Decimal, DuckDbConnector,
    SourceConnector, Value,
};

#[test]
fn test_group_mismatch_and_group_missing_in_source() {
    let source = Dataset::from_rows(
        &[("source_group_by_group", DataType::Text), ("source_sum_amount", DataType::Integer)],
        vec![vec!["A".into(), 100.into()]],
    )
    .unwrap();
    let target = Dataset::from_rows(
        &[("target_group_by_group", DataType::Text), ("target_sum_amount", DataType::Integer)],
        vec![vec!["A".into(), 150.into()], vec!["B".into(), 70.into()]],
    )
    .unwrap();
    let specs = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["group"])];

    let output = reconcile_aggregates(&source, &target, &specs).unwrap();

    assert_eq!(output.mismatch_count, 1);
    assert_eq!(output.missing_in_source_count, 1);
    let mismatch = output.mismatch.data().unwrap();
    assert_eq!(mismatch.value(0, "source_group_by_group"), Some(&Value::from("A")));
    assert_eq!(mismatch.value(0, "sum_amount_match"), Some(&Value::from(false)));
    assert_eq!(mismatch.value(0, AGGREGATE_MATCH_COLUMN), Some(&Value::from(false)));
    assert_eq!(
        output.missing_in_source.value(0, "target_group_by_group"),
        Some(&Value::from("B"))
    );
}

#[test]
fn test_multiple_metrics_flag_only_the_differing_one() {
    let source = Dataset::from_rows(
        &[
            ("source_group_by_region", DataType::Text),
            ("source_sum_amount", DataType::Integer),
            ("source_count_id", DataType::Integer),
        ],
        vec![vec!["east".into(), 10.into(), 2.into()]],
    )
    .unwrap();
    let target = Dataset::from_rows(
        &[
            ("target_group_by_region", DataType::Text),
            ("target_sum_amount", DataType::Integer),
            ("target_count_id", DataType::Integer),
        ],
        vec![vec!["east".into(), 10.into(), 3.into()]],
    )
    .unwrap();
    let specs = vec![
        AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["region"]),
        AggregateSpec::new(AggregateFunction::Count, ["id"]).with_group_by(["region"]),
    ];

    let output = reconcile_aggregates(&source, &target, &specs).unwrap();

    assert_eq!(output.mismatch_count, 1);
    assert_eq!(output.mismatch.mismatch_columns(), vec!["count_id".to_string()]);
    let data = output.mismatch.data().unwrap();
    assert_eq!(data.value(0, "sum_amount_match"), Some(&Value::from(true)));
}

#[test]
fn test_aggregates_computed_by_duckdb() {
    let workspace = TestWorkspace::new();
    let source_csv = workspace.write_file(
        "source.csv",
        "id,region,amount\n1,east,10\n2,east,20\n3,west,5\n",
    );
    let target_csv = workspace.write_file(
        "target.csv",
        "id,region,amount\n1,east,10\n2,east,25\n4,north,7\n",
    );

    let connector = DuckDbConnector::open_in_memory().unwrap();
    connector.register_file("src", &source_csv).unwrap();
    connector.register_file("tgt", &target_csv).unwrap();

    let specs = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["region"])];
    let source_query = &build_aggregate_queries(Layer::Source, "src", &specs, None).unwrap()[0];
    let target_query = &build_aggregate_queries(Layer::Target, "tgt", &specs, None).unwrap()[0];

    let source = connector.extract_data(&source_query.sql).unwrap();
    let target = connector.extract_data(&target_query.sql).unwrap();
    let output = reconcile_aggregates(&source, &target, &source_query.specs).unwrap();

    // east differs (30 vs 35), west only in source, north only in target
    assert_eq!(output.mismatch_count, 1);
    assert_eq!(output.missing_in_target_count, 1);
    assert_eq!(output.missing_in_source_count, 1);
    assert_eq!(output.matched_count, 0);
    assert_eq!(
        output.missing_in_target.value(0, "source_group_by_region"),
        Some(&Value::from("west"))
    );
}

#[test]
fn test_null_group_is_paired_but_not_compared() {
    let source = Dataset::from_rows(
        &[("source_group_by_group", DataType::Text), ("source_sum_amount", DataType::Integer)],
        vec![vec![Value::Null, 10.into()], vec!["A".into(), 5.into()]],
    )
    .unwrap();
    let target = Dataset::from_rows(
        &[("target_group_by_group", DataType::Text), ("target_sum_amount", DataType::Integer)],
        vec![vec![Value::Null, 20.into()], vec!["A".into(), 5.into()]],
    )
    .unwrap();
    let specs = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["group"])];

    let output = reconcile_aggregates(&source, &target, &specs).unwrap();

    assert_eq!(output.matched_count, 1);
    assert_eq!(output.mismatch_count, 0);
    assert_eq!(output.missing_in_source_count, 0);
    assert_eq!(output.missing_in_target_count, 0);
    assert!(output.mismatch.is_empty());
}

#[test]
fn test_decimal_sums_differing_in_the_last_cent() {
    let exact = |s: &str| Value::from(s.parse::<Decimal>().unwrap());
    let source = Dataset::from_rows(
        &[("source_group_by_group", DataType::Text), ("source_sum_amount", DataType::Decimal)],
        vec![vec!["A".into(), exact("12345678901234567.01")], vec!["B".into(), exact("0.10")]],
    )
    .unwrap();
    let target = Dataset::from_rows(
        &[("target_group_by_group", DataType::Text), ("target_sum_amount", DataType::Decimal)],
        vec![vec!["A".into(), exact("12345678901234567.02")], vec!["B".into(), exact("0.1")]],
    )
    .unwrap();
    let specs = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["group"])];

    let output = reconcile_aggregates(&source, &target, &specs).unwrap();

    assert_eq!(output.mismatch_count, 1);
    assert_eq!(output.matched_count, 1);
    assert_eq!(
        output.mismatch.data().unwrap().value(0, "source_group_by_group"),
        Some(&Value::from("A"))
    );
}

#[test]
fn test_duckdb_decimals_are_compared_exactly() {
    let connector = DuckDbConnector::open_in_memory().unwrap();
    let source = connector
        .extract_data(
            "SELECT 'A' AS source_group_by_group, 12345678901234567.01::DECIMAL(38,2) AS source_sum_amount",
        )
        .unwrap();
    let target = connector
        .extract_data(
            "SELECT 'A' AS target_group_by_group, 12345678901234567.02::DECIMAL(38,2) AS target_sum_amount",
        )
        .unwrap();
    let specs = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["group"])];

    let output = reconcile_aggregates(&source, &target, &specs).unwrap();

    assert_eq!(output.mismatch_count, 1);
    assert!(!output.is_reconciled());
}
