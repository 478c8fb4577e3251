//! Command implementations for tabrecon CLI

use crate::cli::Commands;
use crate::output::{JsonFormatter, PrettyPrinter};
use crate::progress::ProgressReporter;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tabrecon_core::config::{get_config, ReconConfig, TableConfig};
use tabrecon_core::runner::{TableResult, TableRunner};
use tabrecon_core::{AggregateSpec, ReportType};

/// Whether every reconciled table came out clean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reconciled,
    Discrepancies,
}

impl Outcome {
    fn of(results: &[TableResult]) -> Self {
        if results.iter().all(TableResult::is_reconciled) {
            Outcome::Reconciled
        } else {
            Outcome::Discrepancies
        }
    }
}

/// Execute a command
pub fn execute_command(command: Commands, config_path: Option<&Path>) -> Result<Outcome> {
    match command {
        Commands::Rows {
            source,
            target,
            keys,
            report,
            column_detail,
            intermediate_dir,
            sample_rows,
            filter,
            json,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(dir) = intermediate_dir {
                config.reconcile.intermediate_dir = Some(dir);
            }
            if let Some(rows) = sample_rows {
                if rows == 0 {
                    bail!("--sample-rows must be at least 1");
                }
                config.reconcile.sample_rows = rows;
            }
            if column_detail {
                config.reconcile.column_diagnostics = true;
            }
            let report_type: ReportType = report.parse()?;
            let table = TableConfig {
                name: table_name(&source),
                source,
                target,
                join_columns: keys,
                report_type,
                filter,
                aggregates: Vec::new(),
            };
            run_tables(&config, &[table], json, false)
        }
        Commands::Aggregate {
            source,
            target,
            aggregates,
            group_by,
            filter,
            json,
        } => {
            let config = load_config(config_path)?;
            let specs = aggregates
                .iter()
                .map(|text| AggregateSpec::parse(text).map(|spec| spec.with_group_by(group_by.clone())))
                .collect::<tabrecon_core::Result<Vec<_>>>()?;
            let table = TableConfig {
                name: table_name(&source),
                source,
                target,
                join_columns: Vec::new(),
                report_type: ReportType::default(),
                filter,
                aggregates: specs,
            };
            run_tables(&config, &[table], json, false)
        }
        Commands::Run {
            table,
            json,
            summary,
        } => {
            let config = load_config(config_path)?;
            let tables: Vec<TableConfig> = match table {
                Some(name) => vec![config
                    .table(&name)
                    .cloned()
                    .with_context(|| format!("No table named '{name}' in configuration"))?],
                None => config.tables.clone(),
            };
            if tables.is_empty() {
                bail!("No tables configured; add [[tables]] to tabrecon.toml");
            }
            run_tables(&config, &tables, json, summary)
        }
        Commands::Config { json } => {
            let (config, source) = get_config(config_path).context("Failed to load configuration")?;
            if json {
                println!("{}", JsonFormatter::format_config(&config, &source)?);
            } else {
                PrettyPrinter::print_config(&config, &source);
            }
            Ok(Outcome::Reconciled)
        }
    }
}

fn load_config(config_path: Option<&Path>) -> Result<ReconConfig> {
    let (config, source) = get_config(config_path).context("Failed to load configuration")?;
    log::debug!("Configuration source: {}", source.describe());
    Ok(config)
}

fn table_name(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "table".to_string())
}

fn run_tables(config: &ReconConfig, tables: &[TableConfig], json: bool, summary: bool) -> Result<Outcome> {
    let run_id = uuid::Uuid::new_v4().to_string();
    log::debug!("Run id {run_id}");
    let runner = TableRunner::new(config, run_id);

    let mut results = Vec::with_capacity(tables.len());
    for table in tables {
        let mut progress = ProgressReporter::new(!json);
        progress.step(&format!("Reconciling {}...", table.name));
        let result = runner
            .run(table)
            .with_context(|| format!("Failed to reconcile table '{}'", table.name))?;
        progress.finish(&format!("Reconciled {}", table.name));
        drop(progress);

        if !json {
            PrettyPrinter::print_table_result(&result);
        }
        results.push(result);
    }

    if json {
        let text = if summary {
            JsonFormatter::format_summaries(&results)?
        } else {
            JsonFormatter::format_table_results(&results)?
        };
        println!("{text}");
    }

    Ok(Outcome::of(&results))
}
