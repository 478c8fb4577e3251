//! Report types and the comparison mode they select

use crate::error::{ReconError, Result};
use crate::fingerprint::FINGERPRINT_COLUMN;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a reconciliation run should report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Data,
    Schema,
    #[default]
    All,
}

impl ReportType {
    /// Whether row values are compared (and mismatches reported)
    pub fn compares_data(&self) -> bool {
        matches!(self, ReportType::Data | ReportType::All)
    }
}

impl FromStr for ReportType {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "data" => Ok(ReportType::Data),
            "schema" => Ok(ReportType::Schema),
            "all" => Ok(ReportType::All),
            other => Err(ReconError::invalid_input(format!(
                "Unknown report type '{other}' (expected data, schema or all)"
            ))),
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportType::Data => f.write_str("data"),
            ReportType::Schema => f.write_str("schema"),
            ReportType::All => f.write_str("all"),
        }
    }
}

/// How source and target rows are paired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonMode {
    /// Pair rows on caller-supplied key columns
    Keyed { keys: Vec<String> },
    /// Whole-row identity: pair rows on their fingerprint
    Fingerprint,
}

impl ComparisonMode {
    /// Select the mode once, at the start of a run
    pub fn for_report(report_type: ReportType, key_columns: &[String]) -> Result<Self> {
        if !report_type.compares_data() {
            return Ok(ComparisonMode::Fingerprint);
        }
        if key_columns.is_empty() {
            return Err(ReconError::invalid_input(format!(
                "Report type '{report_type}' needs at least one key column"
            )));
        }
        Ok(ComparisonMode::Keyed {
            keys: key_columns.to_vec(),
        })
    }

    /// Columns the full outer join is evaluated on
    pub fn join_columns(&self) -> Vec<String> {
        match self {
            ComparisonMode::Keyed { keys } => keys.clone(),
            ComparisonMode::Fingerprint => vec![FINGERPRINT_COLUMN.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report_type() {
        assert_eq!("ALL".parse::<ReportType>().unwrap(), ReportType::All);
        assert_eq!("schema".parse::<ReportType>().unwrap(), ReportType::Schema);
        assert!("rows".parse::<ReportType>().is_err());
    }

    #[test]
    fn test_schema_report_uses_fingerprint() {
        let mode = ComparisonMode::for_report(ReportType::Schema, &["id".to_string()]).unwrap();
        assert_eq!(mode, ComparisonMode::Fingerprint);
        assert_eq!(mode.join_columns(), vec![FINGERPRINT_COLUMN.to_string()]);
    }

    #[test]
    fn test_data_report_requires_keys() {
        assert!(ComparisonMode::for_report(ReportType::Data, &[]).is_err());
        let mode = ComparisonMode::for_report(ReportType::All, &["id".to_string()]).unwrap();
        assert_eq!(mode.join_columns(), vec!["id".to_string()]);
    }
}
