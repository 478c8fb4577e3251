//! Row reconciliation throughput
//!
//! ```
//! cargo bench --bench reconcile_rows
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;
use tabrecon_core::dataset::Row;
use tabrecon_core::{
    reconcile_aggregates, with_fingerprint, AggregateFunction, AggregateSpec, DataType, Dataset, Diagnostics,
    InMemoryPersist, ReconcileOptions, ReportType, RowReconciler, Value,
};

/// `rows` orders where every tenth target row differs and the last few exist on one side only
fn orders(rows: i64) -> (Dataset, Dataset) {
    let columns = [
        ("id", DataType::Integer),
        ("customer", DataType::Text),
        ("amount", DataType::Float),
    ];
    let make = |id: i64, amount: f64| -> Row {
        vec![Value::from(id), Value::from(format!("c{}", id % 97)), Value::from(amount)]
    };

    let source: Vec<Row> = (0..rows).map(|i| make(i, i as f64 * 1.5)).collect();
    let target: Vec<Row> = (5..rows + 5)
        .map(|i| make(i, if i % 10 == 0 { -1.0 } else { i as f64 * 1.5 }))
        .collect();

    let source = Dataset::from_rows(&columns, source).unwrap();
    let target = Dataset::from_rows(&columns, target).unwrap();
    (
        with_fingerprint(&source, None).unwrap(),
        with_fingerprint(&target, None).unwrap(),
    )
}

fn bench_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/rows");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    let keys = vec!["id".to_string()];
    for size in [10_000i64, 100_000] {
        let (source, target) = orders(size);
        group.throughput(Throughput::Elements(size as u64));

        for (label, report_type, diagnostics) in [
            ("fingerprint", ReportType::Schema, Diagnostics::FingerprintOnly),
            ("keyed", ReportType::All, Diagnostics::FingerprintOnly),
            ("keyed_columns", ReportType::All, Diagnostics::ColumnLevel),
        ] {
            let options = ReconcileOptions::default().with_diagnostics(diagnostics);
            group.bench_with_input(BenchmarkId::new(label, size), &(&source, &target), |b, (s, t)| {
                b.iter(|| {
                    RowReconciler::new(&InMemoryPersist)
                        .with_options(options)
                        .reconcile(s, t, &keys, report_type, "bench")
                        .unwrap();
                })
            });
        }
    }

    group.finish();
}

fn bench_aggregates(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/aggregates");
    group.sample_size(10);

    let groups = 10_000i64;
    let side = |prefix: &str, skew: i64| {
        let columns = [
            (format!("{prefix}_group_by_region"), DataType::Integer),
            (format!("{prefix}_sum_amount"), DataType::Integer),
        ];
        let columns: Vec<(&str, DataType)> = columns.iter().map(|(n, t)| (n.as_str(), *t)).collect();
        let rows = (0..groups)
            .map(|g| vec![Value::from(g + skew), Value::from(g * 3)])
            .collect();
        Dataset::from_rows(&columns, rows).unwrap()
    };
    let source = side("source", 0);
    let target = side("target", 3);
    let specs = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["region"])];

    group.throughput(Throughput::Elements(groups as u64));
    group.bench_function(BenchmarkId::new("grouped_sum", groups), |b| {
        b.iter(|| black_box(reconcile_aggregates(&source, &target, &specs).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_rows, bench_aggregates);
criterion_main!(benches);
