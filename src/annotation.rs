//! Symbol → feature-ID index over the dsRNA annotation table.
//!
//! The annotation table is a tab-separated export with a header row. Column
//! positions vary between releases, so the feature ID column (`V4`) and the
//! gene symbol column (`SYMBOL`) are located by header name.

use crate::error::EngineError;
use csv::ReaderBuilder;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const FEATURE_ID_COLUMN: &str = "V4";
pub const SYMBOL_COLUMN: &str = "SYMBOL";

/// Symbols are compared trimmed and upper-cased, both at ingestion and at
/// lookup.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub feature_id: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStats {
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub duplicate_ids: usize,
    pub feature_count: usize,
    pub symbol_count: usize,
}

/// Records in file order plus the number of data rows that could not be used.
#[derive(Debug, Clone, Default)]
pub struct ParsedAnnotation {
    pub records: Vec<AnnotationRecord>,
    pub rows_read: usize,
    pub rows_skipped: usize,
}

pub fn parse_records(text: &str) -> Result<ParsedAnnotation, EngineError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| EngineError::invalid_input(format!("Could not read annotation header: {e}")))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| {
                EngineError::invalid_input(format!(
                    "Annotation header has no '{name}' column"
                ))
            })
    };
    let id_col = column(FEATURE_ID_COLUMN)?;
    let symbol_col = column(SYMBOL_COLUMN)?;
    let required = id_col.max(symbol_col) + 1;

    let mut parsed = ParsedAnnotation::default();
    for (row_no, result) in rdr.records().enumerate() {
        parsed.rows_read += 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(row = row_no + 2, error = %e, "skipping unreadable annotation row");
                parsed.rows_skipped += 1;
                continue;
            }
        };
        if record.len() < required {
            parsed.rows_skipped += 1;
            continue;
        }
        let feature_id = record[id_col].trim();
        let symbol = normalize_symbol(&record[symbol_col]);
        if feature_id.is_empty() || symbol.is_empty() {
            parsed.rows_skipped += 1;
            continue;
        }
        parsed.records.push(AnnotationRecord {
            feature_id: feature_id.to_string(),
            symbol,
        });
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationIndex {
    by_symbol: HashMap<String, Vec<String>>,
    symbol_by_id: HashMap<String, String>,
    stats: AnnotationStats,
}

impl AnnotationIndex {
    pub fn build(text: &str) -> Result<Self, EngineError> {
        let parsed = parse_records(text)?;
        let mut ret = Self::from_records(parsed.records);
        ret.stats.rows_read = parsed.rows_read;
        ret.stats.rows_skipped = parsed.rows_skipped;
        Ok(ret)
    }

    /// A feature ID that shows up again later in the stream keeps its first
    /// symbol; the repeat is only counted.
    pub fn from_records(records: impl IntoIterator<Item = AnnotationRecord>) -> Self {
        let mut ret = Self::default();
        for record in records {
            if ret.symbol_by_id.contains_key(&record.feature_id) {
                ret.stats.duplicate_ids += 1;
                continue;
            }
            ret.symbol_by_id
                .insert(record.feature_id.clone(), record.symbol.clone());
            ret.by_symbol
                .entry(record.symbol)
                .or_default()
                .push(record.feature_id);
        }
        ret.stats.feature_count = ret.symbol_by_id.len();
        ret.stats.symbol_count = ret.by_symbol.len();
        ret
    }

    /// Feature IDs annotated with `symbol`, in file order.
    pub fn lookup(&self, symbol: &str) -> &[String] {
        self.by_symbol
            .get(&normalize_symbol(symbol))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn lookup_set(&self, symbol: &str) -> HashSet<&str> {
        self.lookup(symbol).iter().map(String::as_str).collect()
    }

    pub fn symbol_for(&self, feature_id: &str) -> Option<&str> {
        self.symbol_by_id.get(feature_id.trim()).map(String::as_str)
    }

    pub fn stats(&self) -> AnnotationStats {
        self.stats
    }
}
