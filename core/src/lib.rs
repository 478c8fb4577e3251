//! # tabrecon-core
//!
//! Core library for tabrecon - a reconciliation engine that compares a source dataset
//! with the target dataset derived from it and reports missing rows, mismatched rows
//! and aggregate discrepancies.
//!
//! This crate provides the engine plus the DuckDB loading and configuration used by
//! the `tabrecon` binary.

pub mod aggregate_query;
pub mod config;
pub mod connector;
pub mod dataset;
pub mod error;
pub mod fingerprint;
pub mod join;
pub mod persist;
pub mod reconcile;
pub mod report;
pub mod result;
pub mod runner;
pub mod value;

// Re-export the most commonly used types for convenience
pub use aggregate_query::{AggregateFunction, AggregateSpec};
pub use config::ReconConfig;
pub use connector::{DuckDbConnector, SourceConnector};
pub use dataset::{Column, Dataset, Schema};
pub use error::{PersistenceError, ReconError, Result};
pub use fingerprint::{with_fingerprint, FINGERPRINT_COLUMN};
pub use persist::{InMemoryPersist, IntermediatePersist, ParquetPersist};
pub use reconcile::{
    detect_column_mismatches, reconcile_aggregates, reconcile_rows, AggregateReconciler, Diagnostics,
    ReconcileOptions, RowReconciler,
};
pub use report::{ComparisonMode, ReportType};
pub use result::{MatchFlag, MismatchOutput, ReconcileOutput, ReconcileReport, ReconcileSummary};
pub use runner::{TableResult, TableRunner};
pub use value::{DataType, Decimal, Value};
