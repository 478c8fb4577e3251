//! Aggregate specifications and the SQL that pre-computes them
//!
//! The aggregate reconciler compares two already-aggregated datasets. This module
//! produces those datasets' queries: specs sharing a grouping are bucketed together
//! and each bucket becomes one `SELECT ... GROUP BY` whose output columns follow the
//! `<layer>_<func>_<col>` / `<layer>_group_by_<col>` naming the reconciler expects.

use crate::error::{ReconError, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("IDENTIFIER_REGEX is a valid regex pattern")
});

/// Summary statistic applied to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    Stddev,
    Variance,
}

impl AggregateFunction {
    fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Stddev => "STDDEV_SAMP",
            AggregateFunction::Variance => "VAR_SAMP",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Stddev => "stddev",
            AggregateFunction::Variance => "variance",
        };
        f.write_str(name)
    }
}

impl FromStr for AggregateFunction {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(AggregateFunction::Sum),
            "count" => Ok(AggregateFunction::Count),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "avg" | "mean" => Ok(AggregateFunction::Avg),
            "stddev" => Ok(AggregateFunction::Stddev),
            "variance" => Ok(AggregateFunction::Variance),
            other => Err(ReconError::invalid_input(format!(
                "Unknown aggregate function '{other}'"
            ))),
        }
    }
}

/// One aggregate comparison unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    #[serde(rename = "type")]
    pub agg_type: AggregateFunction,
    pub agg_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_columns: Option<Vec<String>>,
}

impl AggregateSpec {
    pub fn new<S: Into<String>>(agg_type: AggregateFunction, agg_columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            agg_type,
            agg_columns: agg_columns.into_iter().map(Into::into).collect(),
            group_by_columns: None,
        }
    }

    pub fn with_group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        self.group_by_columns = if columns.is_empty() { None } else { Some(columns) };
        self
    }

    /// Grouping columns, lower-cased and sorted; empty when ungrouped
    pub fn group_key(&self) -> Vec<String> {
        let mut key: Vec<String> = self
            .group_by_columns
            .iter()
            .flatten()
            .map(|c| c.to_lowercase())
            .collect();
        key.sort();
        key
    }

    /// `<func>_<col>` for every aggregated column, lower-cased
    pub fn metric_names(&self) -> Vec<String> {
        self.agg_columns
            .iter()
            .map(|c| format!("{}_{}", self.agg_type, c).to_lowercase())
            .collect()
    }

    /// A spec must aggregate at least one column
    pub fn validate(&self) -> Result<()> {
        if self.agg_columns.is_empty() {
            return Err(ReconError::invalid_input(format!(
                "Aggregate '{}' names no columns",
                self.agg_type
            )));
        }
        Ok(())
    }

    /// Parse the command-line form `func:col1,col2`
    pub fn parse(text: &str) -> Result<Self> {
        let (func, columns) = text.split_once(':').ok_or_else(|| {
            ReconError::invalid_input(format!("Aggregate '{text}' must look like func:col1,col2"))
        })?;
        let columns: Vec<&str> = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        if columns.is_empty() {
            return Err(ReconError::invalid_input(format!(
                "Aggregate '{text}' names no columns"
            )));
        }
        Ok(Self::new(func.parse()?, columns))
    }
}

/// Which side of the comparison a query is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Source,
    Target,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Source => f.write_str("source"),
            Layer::Target => f.write_str("target"),
        }
    }
}

/// A single aggregate query and the specs it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateQuery {
    pub layer: Layer,
    pub group_by_columns: Vec<String>,
    pub specs: Vec<AggregateSpec>,
    pub sql: String,
}

fn validate_identifier(name: &str, what: &str) -> Result<()> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ReconError::invalid_input(format!(
            "Invalid {what} name '{name}'"
        )))
    }
}

/// Build one query per distinct grouping found in `specs`
///
/// Buckets come out ordered by grouping key, and the specs inside each bucket keep
/// their input order.
pub fn build_aggregate_queries(
    layer: Layer,
    relation: &str,
    specs: &[AggregateSpec],
    filter: Option<&str>,
) -> Result<Vec<AggregateQuery>> {
    if specs.is_empty() {
        return Err(ReconError::invalid_input("No aggregate specifications given"));
    }
    validate_identifier(relation, "relation")?;

    let mut sorted: Vec<&AggregateSpec> = specs.iter().collect();
    sorted.sort_by_key(|spec| spec.group_key());

    let mut buckets: IndexMap<Vec<String>, Vec<AggregateSpec>> = IndexMap::new();
    for spec in sorted {
        spec.validate()?;
        for column in spec.agg_columns.iter().chain(spec.group_by_columns.iter().flatten()) {
            validate_identifier(column, "column")?;
        }
        buckets.entry(spec.group_key()).or_default().push(spec.clone());
    }

    let queries = buckets
        .into_iter()
        .map(|(group_by_columns, specs)| {
            let mut select: Vec<String> = group_by_columns
                .iter()
                .map(|c| format!("\"{c}\" AS {layer}_group_by_{c}"))
                .collect();
            for spec in &specs {
                for (column, metric) in spec.agg_columns.iter().zip(spec.metric_names()) {
                    select.push(format!(
                        "{}(\"{column}\") AS {layer}_{metric}",
                        spec.agg_type.sql_name()
                    ));
                }
            }

            let mut sql = format!("SELECT {} FROM {relation}", select.join(", "));
            if let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) {
                sql.push_str(&format!(" WHERE {filter}"));
            }
            if !group_by_columns.is_empty() {
                let quoted: Vec<String> = group_by_columns.iter().map(|c| format!("\"{c}\"")).collect();
                sql.push_str(&format!(" GROUP BY {}", quoted.join(", ")));
            }

            log::debug!("Aggregate query for {layer}: {sql}");
            AggregateQuery {
                layer,
                group_by_columns,
                specs,
                sql,
            }
        })
        .collect();

    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec_from_cli_form() {
        let spec = AggregateSpec::parse("SUM:amount, qty").unwrap();
        assert_eq!(spec.agg_type, AggregateFunction::Sum);
        assert_eq!(spec.agg_columns, vec!["amount", "qty"]);
        assert_eq!(spec.metric_names(), vec!["sum_amount", "sum_qty"]);
        assert!(AggregateSpec::parse("median:amount").is_err());
        assert!(AggregateSpec::parse("sum").is_err());
    }

    #[test]
    fn test_specs_are_bucketed_by_grouping() {
        let specs = vec![
            AggregateSpec::new(AggregateFunction::Sum, ["amount"]).with_group_by(["region"]),
            AggregateSpec::new(AggregateFunction::Count, ["id"]),
            AggregateSpec::new(AggregateFunction::Max, ["amount"]).with_group_by(["Region"]),
        ];
        let queries = build_aggregate_queries(Layer::Source, "orders", &specs, Some("amount > 0")).unwrap();

        assert_eq!(queries.len(), 2);
        assert!(queries[0].group_by_columns.is_empty());
        assert_eq!(
            queries[0].sql,
            "SELECT COUNT(\"id\") AS source_count_id FROM orders WHERE amount > 0"
        );
        assert_eq!(queries[1].group_by_columns, vec!["region"]);
        assert_eq!(queries[1].specs.len(), 2);
        assert!(queries[1].sql.contains("\"region\" AS source_group_by_region"));
        assert!(queries[1].sql.contains("SUM(\"amount\") AS source_sum_amount"));
        assert!(queries[1].sql.ends_with("GROUP BY \"region\""));
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let specs = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount; DROP TABLE x"])];
        assert!(build_aggregate_queries(Layer::Target, "orders", &specs, None).is_err());
        let ok = vec![AggregateSpec::new(AggregateFunction::Sum, ["amount"])];
        assert!(build_aggregate_queries(Layer::Target, "orders x", &ok, None).is_err());
        assert!(build_aggregate_queries(Layer::Target, "orders", &[], None).is_err());
    }

    #[test]
    fn test_spec_without_columns_builds_no_query() {
        let specs = vec![AggregateSpec::new(AggregateFunction::Count, Vec::<String>::new())];
        assert!(specs[0].validate().is_err());
        assert!(matches!(
            build_aggregate_queries(Layer::Source, "orders", &specs, None),
            Err(ReconError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_spec_toml_shape() {
        let spec: AggregateSpec = toml::from_str(
            "type = \"sum\"\nagg_columns = [\"amount\"]\ngroup_by_columns = [\"region\"]\n",
        )
        .unwrap();
        assert_eq!(spec.group_key(), vec!["region"]);
    }
}
