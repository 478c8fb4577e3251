//! End-to-end reconciliation of one configured table pair

use crate::aggregate_query::{build_aggregate_queries, AggregateQuery, Layer};
use crate::config::{ReconConfig, TableConfig};
use crate::connector::{DuckDbConnector, SourceConnector};
use crate::dataset::Dataset;
use crate::error::{ReconError, Result};
use crate::fingerprint::with_fingerprint;
use crate::persist::{InMemoryPersist, IntermediatePersist, ParquetPersist};
use crate::reconcile::{AggregateReconciler, RowReconciler};
use crate::result::ReconcileOutput;
use serde::Serialize;

const SOURCE_VIEW: &str = "source_data";
const TARGET_VIEW: &str = "target_data";

/// One reconciliation inside a table run
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledOutput {
    pub label: String,
    pub output: ReconcileOutput,
}

/// All reconciliations performed for one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableResult {
    pub table: String,
    pub runs: Vec<LabeledOutput>,
}

impl TableResult {
    pub fn is_reconciled(&self) -> bool {
        self.runs.iter().all(|r| r.output.is_reconciled())
    }
}

#[derive(Debug, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub reconciled: bool,
    pub runs: Vec<LabeledSummary>,
}

#[derive(Debug, Serialize)]
pub struct LabeledSummary {
    pub label: String,
    #[serde(flatten)]
    pub summary: crate::result::ReconcileSummary,
}

impl From<&TableResult> for TableSummary {
    fn from(result: &TableResult) -> Self {
        Self {
            table: result.table.clone(),
            reconciled: result.is_reconciled(),
            runs: result
                .runs
                .iter()
                .map(|r| LabeledSummary {
                    label: r.label.clone(),
                    summary: r.output.summary(),
                })
                .collect(),
        }
    }
}

/// Runs configured tables against files loaded through DuckDB
pub struct TableRunner<'a> {
    config: &'a ReconConfig,
    run_id: String,
}

impl<'a> TableRunner<'a> {
    pub fn new(config: &'a ReconConfig, run_id: impl Into<String>) -> Self {
        Self {
            config,
            run_id: run_id.into(),
        }
    }

    fn connector(&self) -> Result<DuckDbConnector> {
        DuckDbConnector::open_with_memory_limit(self.config.duckdb.memory_limit.as_deref())
    }

    fn persist(&self) -> Box<dyn IntermediatePersist> {
        match &self.config.reconcile.intermediate_dir {
            Some(dir) => Box::new(ParquetPersist::new(dir)),
            None => Box::new(InMemoryPersist),
        }
    }

    pub fn run(&self, table: &TableConfig) -> Result<TableResult> {
        log::info!("Reconciling table '{}'", table.name);
        let connector = self.connector()?;
        connector.register_file(SOURCE_VIEW, &table.source)?;
        connector.register_file(TARGET_VIEW, &table.target)?;

        let runs = if table.is_aggregate() {
            self.run_aggregates(&connector, table)?
        } else {
            vec![self.run_rows(&connector, table)?]
        };

        Ok(TableResult {
            table: table.name.clone(),
            runs,
        })
    }

    pub fn run_all(&self) -> Result<Vec<TableResult>> {
        if self.config.tables.is_empty() {
            return Err(ReconError::config("No tables configured"));
        }
        self.config.tables.iter().map(|t| self.run(t)).collect()
    }

    fn run_rows(&self, connector: &DuckDbConnector, table: &TableConfig) -> Result<LabeledOutput> {
        let source = load_fingerprinted(connector, SOURCE_VIEW, table.filter.as_deref())?;
        let target = load_fingerprinted(connector, TARGET_VIEW, table.filter.as_deref())?;
        let keys: Vec<String> = table.join_columns.iter().map(|k| k.to_lowercase()).collect();

        let persist = self.persist();
        let path = format!("{}/{}", table.name, self.run_id);
        let output = RowReconciler::new(persist.as_ref())
            .with_options(self.config.reconcile.options())
            .reconcile(&source, &target, &keys, table.report_type, &path)?;

        Ok(LabeledOutput {
            label: format!("rows ({})", table.report_type),
            output,
        })
    }

    fn run_aggregates(&self, connector: &DuckDbConnector, table: &TableConfig) -> Result<Vec<LabeledOutput>> {
        let filter = table.filter.as_deref();
        let source_queries = build_aggregate_queries(Layer::Source, SOURCE_VIEW, &table.aggregates, filter)?;
        let target_queries = build_aggregate_queries(Layer::Target, TARGET_VIEW, &table.aggregates, filter)?;
        let reconciler = AggregateReconciler::new().with_options(self.config.reconcile.options());

        source_queries
            .iter()
            .zip(&target_queries)
            .map(|(source_query, target_query)| {
                let source = connector.extract_data(&source_query.sql)?;
                let target = connector.extract_data(&target_query.sql)?;
                let output = reconciler.reconcile(&source, &target, &source_query.specs)?;
                Ok(LabeledOutput {
                    label: aggregate_label(source_query),
                    output,
                })
            })
            .collect()
    }
}

fn aggregate_label(query: &AggregateQuery) -> String {
    if query.group_by_columns.is_empty() {
        "aggregates (ungrouped)".to_string()
    } else {
        format!("aggregates by {}", query.group_by_columns.join(", "))
    }
}

/// Read a view, lower-case its column names and append the row fingerprint
pub fn load_fingerprinted(
    connector: &dyn SourceConnector,
    relation: &str,
    filter: Option<&str>,
) -> Result<Dataset> {
    let query = match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(filter) => format!("SELECT * FROM {relation} WHERE {filter}"),
        None => format!("SELECT * FROM {relation}"),
    };
    let dataset = connector.extract_data(&query)?.lowercase_names()?;
    with_fingerprint(&dataset, None)
}
