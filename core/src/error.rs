//! Error types for tabrecon

use crate::value::DataType;
use thiserror::Error;

/// Result alias used throughout tabrecon-core
pub type Result<T> = std::result::Result<T, ReconError>;

/// Errors raised by the reconciliation engine
#[derive(Debug, Error)]
pub enum ReconError {
    /// Source and target do not share the same column names
    #[error(
        "{message}\ncolumns missing in source: {}\ncolumns missing in target: {}",
        join_or_none(.source_missing),
        join_or_none(.target_missing)
    )]
    ColumnMismatch {
        message: String,
        source_missing: Vec<String>,
        target_missing: Vec<String>,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Unknown column '{column}' in {side} dataset")]
    UnknownColumn { side: String, column: String },

    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("Row {row} has {actual} values but the schema has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Row {row} column '{column}' holds {value}, which is not a {expected} value")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: DataType,
        value: String,
    },

    #[error("Fingerprint column '{column}' is missing from the {side} dataset")]
    MissingFingerprint { side: String, column: String },

    #[error("{count} {side} row(s) have a NULL fingerprint")]
    NullFingerprint { side: String, count: usize },

    #[error(
        "Ungrouped aggregates need at most one row per side, got {source_rows} source and {target_rows} target rows"
    )]
    UngroupedAggregate {
        source_rows: usize,
        target_rows: usize,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn data_processing(message: impl Into<String>) -> Self {
        Self::DataProcessing(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn unknown_column(side: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            side: side.into(),
            column: column.into(),
        }
    }
}

/// Failure of the intermediate persist-then-reload step
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O failure persisting '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parquet failure persisting '{path}': {source}")]
    Parquet {
        path: String,
        #[source]
        source: parquet::errors::ParquetError,
    },

    #[error("Arrow failure persisting '{path}': {source}")]
    Arrow {
        path: String,
        #[source]
        source: arrow_schema::ArrowError,
    },

    #[error("Reloaded data at '{path}' does not match the written layout: {detail}")]
    Layout { path: String, detail: String },
}

fn join_or_none(columns: &[String]) -> String {
    if columns.is_empty() {
        "None".to_string()
    } else {
        columns.join(",")
    }
}
