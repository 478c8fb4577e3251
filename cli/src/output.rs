//! Output formatting utilities

use tabrecon_core::config::ConfigSource;
use tabrecon_core::runner::{TableResult, TableSummary};
use tabrecon_core::{Dataset, ReconConfig, ReconcileReport, ReconcileOutput};

/// Sample rows printed per section in human output
const PREVIEW_ROWS: usize = 5;

/// Pretty printer for tabrecon output
pub struct PrettyPrinter;

impl PrettyPrinter {
    /// Print the result of one table
    pub fn print_table_result(result: &TableResult) {
        let icon = if result.is_reconciled() { "✅" } else { "❌" };
        println!("{icon} Table: {}", result.table);
        for (i, run) in result.runs.iter().enumerate() {
            let last = i == result.runs.len() - 1;
            let (branch, indent) = if last { ("└─", "   ") } else { ("├─", "│  ") };
            println!("{branch} {}", run.label);
            Self::print_output(&run.output, indent);
        }
    }

    fn print_output(output: &ReconcileOutput, indent: &str) {
        println!("{indent}├─ Matched: {}", output.matched_count);

        Self::print_count_with_sample(
            indent,
            "├─",
            "Missing in source",
            output.missing_in_source_count,
            &output.missing_in_source,
        );
        Self::print_count_with_sample(
            indent,
            "├─",
            "Missing in target",
            output.missing_in_target_count,
            &output.missing_in_target,
        );

        match output.mismatch.data() {
            None => println!("{indent}└─ Mismatched: not compared"),
            Some(data) => {
                let columns = output.mismatch.mismatch_columns();
                if columns.is_empty() {
                    Self::print_count_with_sample(indent, "└─", "Mismatched", output.mismatch_count, data);
                } else {
                    println!(
                        "{indent}└─ Mismatched: {} (columns: {})",
                        output.mismatch_count,
                        columns.join(", ")
                    );
                    Self::print_rows(&format!("{indent}   "), data);
                }
            }
        }
    }

    fn print_count_with_sample(indent: &str, branch: &str, label: &str, count: usize, sample: &Dataset) {
        let icon = if count == 0 { "✅" } else { "❌" };
        println!("{indent}{branch} {icon} {label}: {count}");
        let child_indent = if branch == "└─" { "   " } else { "│  " };
        Self::print_rows(&format!("{indent}{child_indent}"), sample);
    }

    fn print_rows(indent: &str, data: &Dataset) {
        let shown = data.num_rows().min(PREVIEW_ROWS);
        for (i, row) in data.rows().iter().take(shown).enumerate() {
            let last = i == shown - 1 && data.num_rows() <= PREVIEW_ROWS;
            let prefix = if last { "└─" } else { "├─" };
            let cells: Vec<String> = data
                .schema()
                .columns()
                .iter()
                .zip(row)
                .map(|(column, value)| format!("{}={}", column.name, value))
                .collect();
            println!("{indent}{prefix} {}", cells.join(", "));
        }
        if data.num_rows() > PREVIEW_ROWS {
            println!("{indent}└─ ... {} more in sample", data.num_rows() - PREVIEW_ROWS);
        }
    }

    /// Print where configuration was loaded from
    pub fn print_config(config: &ReconConfig, source: &ConfigSource) {
        println!("⚙️  Configuration: {}", source.describe());
        println!("├─ Sample rows: {}", config.reconcile.sample_rows);
        println!(
            "├─ Intermediate dir: {}",
            config
                .reconcile
                .intermediate_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in memory".to_string())
        );
        println!("├─ Column diagnostics: {}", config.reconcile.column_diagnostics);
        if config.tables.is_empty() {
            println!("└─ Tables: none");
            return;
        }
        println!("└─ Tables:");
        for (i, table) in config.tables.iter().enumerate() {
            let prefix = if i == config.tables.len() - 1 { "   └─" } else { "   ├─" };
            let kind = if table.is_aggregate() { "aggregate" } else { "rows" };
            println!("{prefix} {} ({kind}, {})", table.name, table.report_type);
        }
    }
}

/// JSON formatter for tabrecon output
pub struct JsonFormatter;

impl JsonFormatter {
    /// Full results including samples and mismatch rows
    pub fn format_table_results(results: &[TableResult]) -> anyhow::Result<String> {
        let tables: Vec<serde_json::Value> = results
            .iter()
            .map(|result| -> Result<serde_json::Value, serde_json::Error> {
                let runs = result
                    .runs
                    .iter()
                    .map(|run| serde_json::to_value(ReconcileReport::new(&run.label, &run.output)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(serde_json::json!({
                    "table": result.table,
                    "reconciled": result.is_reconciled(),
                    "runs": runs,
                }))
            })
            .collect::<Result<_, _>>()?;
        Ok(serde_json::to_string_pretty(&tables)?)
    }

    /// Counts only
    pub fn format_summaries(results: &[TableResult]) -> anyhow::Result<String> {
        let summaries: Vec<TableSummary> = results.iter().map(TableSummary::from).collect();
        Ok(serde_json::to_string_pretty(&summaries)?)
    }

    pub fn format_config(config: &ReconConfig, source: &ConfigSource) -> anyhow::Result<String> {
        let json = serde_json::json!({
            "source": source.describe(),
            "path": source.path().map(|p| p.display().to_string()),
            "config": config,
        });
        Ok(serde_json::to_string_pretty(&json)?)
    }
}
