//! Turns a validated query and a parsed DE table into the matching rows.

use crate::annotation::{AnnotationIndex, normalize_symbol};
use crate::assay::{SIGNIFICANCE_THRESHOLD, layout};
use crate::cell_types::CellTypeCatalog;
use crate::de_table::DifferentialRecord;
use crate::error::EngineError;
use de_atlas_protocol::{AssayFamily, AssayType, QueryParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_MAX_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub assay_type: AssayType,
    pub cell_type: String,
    /// Empty means "no symbol filter".
    pub symbol: String,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMode {
    /// Rows for one gene, significant or not. Holds the normalized symbol.
    IdentifierMatch(String),
    /// Rows whose family statistic is below the significance threshold.
    SignificanceFilter,
}

impl Query {
    pub fn new(assay_type: AssayType, cell_type: &str) -> Self {
        Self {
            assay_type,
            cell_type: cell_type.trim().to_string(),
            symbol: String::new(),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = symbol.to_string();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn family(&self) -> AssayFamily {
        self.assay_type.family()
    }

    pub fn mode(&self) -> QueryMode {
        let symbol = normalize_symbol(&self.symbol);
        if symbol.is_empty() {
            QueryMode::SignificanceFilter
        } else {
            QueryMode::IdentifierMatch(symbol)
        }
    }

    /// Validates raw presentation-layer parameters. Every rejection is an
    /// `InvalidQuery`.
    pub fn from_params(
        params: &QueryParams,
        limits: &QueryLimits,
        cell_types: &CellTypeCatalog,
    ) -> Result<Self, EngineError> {
        let assay_type = AssayType::parse(&params.assay_type).map_err(EngineError::invalid_query)?;
        let cell_type = params.cell_type.trim();
        if !cell_types.contains(cell_type) {
            return Err(EngineError::invalid_query(format!(
                "Unknown cell type '{cell_type}'"
            )));
        }
        let limit = parse_limit(params.limit.as_ref(), limits)?;
        Ok(Self {
            assay_type,
            cell_type: cell_type.to_string(),
            symbol: params.symbol.clone().unwrap_or_default(),
            limit,
        })
    }
}

fn parse_limit(raw: Option<&Value>, limits: &QueryLimits) -> Result<usize, EngineError> {
    let requested = match raw {
        None | Some(Value::Null) => return Ok(limits.default_limit.min(limits.max_limit)),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Ok(limits.default_limit.min(limits.max_limit));
        }
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    match requested {
        Some(0) | None => Err(EngineError::invalid_query(format!(
            "limit must be a positive integer, got {}",
            raw.map(Value::to_string).unwrap_or_default()
        ))),
        Some(n) => Ok(usize::try_from(n)
            .unwrap_or(usize::MAX)
            .min(limits.max_limit)),
    }
}

/// Filters `records` for `query`, keeping file order and stopping after
/// `query.limit` matches.
///
/// In identifier mode the dsRNA family resolves the symbol through `index`
/// while the mRNA/ncRNA family matches the Ensembl ID and symbol columns
/// directly; the significance threshold is not applied. Without a symbol,
/// rows are kept when the family statistic (raw p-value for dsRNA,
/// adjusted p-value for mRNA/ncRNA) parses and is below 0.05.
pub fn resolve<'a>(
    query: &Query,
    index: Option<&AnnotationIndex>,
    records: &'a [DifferentialRecord],
) -> Result<Vec<&'a DifferentialRecord>, EngineError> {
    if query.limit == 0 {
        return Err(EngineError::invalid_query("limit must be positive"));
    }
    let family = query.family();
    let matched = match query.mode() {
        QueryMode::IdentifierMatch(symbol) => match family {
            AssayFamily::DsRna => {
                let index = index.ok_or_else(|| {
                    EngineError::invalid_query(format!(
                        "Symbol lookup for {} needs the annotation index",
                        query.assay_type
                    ))
                })?;
                let candidates = index.lookup_set(&symbol);
                if candidates.is_empty() {
                    return Ok(vec![]);
                }
                take_matching(records, query.limit, |r| {
                    candidates.contains(r.feature_id.as_str())
                })
            }
            AssayFamily::MrnaNcrna => take_matching(records, query.limit, |r| {
                r.feature_id.to_uppercase() == symbol
                    || r.symbol
                        .as_deref()
                        .is_some_and(|s| s.to_uppercase() == symbol)
            }),
        },
        QueryMode::SignificanceFilter => {
            let column = layout(family).threshold;
            take_matching(records, query.limit, |r| {
                r.threshold_value(column)
                    .is_some_and(|v| v < SIGNIFICANCE_THRESHOLD)
            })
        }
    };
    Ok(matched)
}

fn take_matching<'a, F>(
    records: &'a [DifferentialRecord],
    limit: usize,
    predicate: F,
) -> Vec<&'a DifferentialRecord>
where
    F: Fn(&DifferentialRecord) -> bool,
{
    records.iter().filter(|r| predicate(*r)).take(limit).collect()
}

/// Distinct feature IDs in a result, for log lines.
pub fn distinct_ids(records: &[&DifferentialRecord]) -> usize {
    records
        .iter()
        .map(|r| r.feature_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}
