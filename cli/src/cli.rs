//! Command-line interface for tabrecon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tabrecon")]
#[command(about = "Reconcile a source dataset against the target derived from it")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to TABRECON_CONFIG, ./tabrecon.toml, ~/.tabrecon/global.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compare two files row by row
    Rows {
        /// Source file (CSV, Parquet or JSON)
        #[arg(long)]
        source: PathBuf,

        /// Target file (CSV, Parquet or JSON)
        #[arg(long)]
        target: PathBuf,

        /// Key column(s) identifying the same entity on both sides
        #[arg(long = "key", value_delimiter = ',')]
        keys: Vec<String>,

        /// Report type: data, schema or all
        #[arg(long, default_value = "all")]
        report: String,

        /// Attribute mismatches to individual columns
        #[arg(long)]
        column_detail: bool,

        /// Persist the joined rows as parquet under this directory
        #[arg(long)]
        intermediate_dir: Option<PathBuf>,

        /// Rows kept in each missing-row sample
        #[arg(long)]
        sample_rows: Option<usize>,

        /// SQL predicate applied to both sides
        #[arg(long)]
        filter: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare grouped aggregates of two files
    Aggregate {
        /// Source file (CSV, Parquet or JSON)
        #[arg(long)]
        source: PathBuf,

        /// Target file (CSV, Parquet or JSON)
        #[arg(long)]
        target: PathBuf,

        /// Aggregate as func:col1,col2 (e.g. sum:amount); repeatable
        #[arg(long = "agg", required = true)]
        aggregates: Vec<String>,

        /// Grouping column(s)
        #[arg(long = "group-by", value_delimiter = ',')]
        group_by: Vec<String>,

        /// SQL predicate applied to both sides before aggregating
        #[arg(long)]
        filter: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile every table in the configuration file
    Run {
        /// Only run this table
        #[arg(long)]
        table: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// With --json, emit counts only
        #[arg(long, requires = "json")]
        summary: bool,
    },

    /// Show which configuration is active
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
