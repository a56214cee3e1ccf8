//! Typed rows of one per-(assay type, cell type) DE result file.

use crate::assay::{FamilyLayout, ThresholdColumn, layout};
use csv::{ReaderBuilder, StringRecord};
use de_atlas_protocol::AssayFamily;
use tracing::debug;

/// A decimal cell as found in the file. The raw text is what gets reported;
/// `value` is what gets compared.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericField {
    pub raw: String,
    pub value: Option<f64>,
}

impl NumericField {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        Self {
            raw: raw.to_string(),
            value: raw.parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DifferentialRecord {
    /// dsRNA ID for the dsRNA family, Ensembl gene ID for mRNA/ncRNA.
    pub feature_id: String,
    pub symbol: Option<String>,
    pub log2_fc: NumericField,
    pub log_cpm: NumericField,
    pub p_value: NumericField,
    pub adjusted_p_value: Option<NumericField>,
    pub base_mean: NumericField,
}

impl DifferentialRecord {
    fn from_record(record: &StringRecord, layout: &FamilyLayout) -> Option<Self> {
        if record.len() < layout.min_columns() {
            return None;
        }
        let feature_id = record[layout.feature_id].trim();
        if feature_id.is_empty() {
            return None;
        }
        Some(Self {
            feature_id: feature_id.to_string(),
            symbol: layout.symbol.map(|c| record[c].trim().to_string()),
            log2_fc: NumericField::parse(&record[layout.log2_fc]),
            log_cpm: NumericField::parse(&record[layout.log_cpm]),
            p_value: NumericField::parse(&record[layout.p_value]),
            adjusted_p_value: layout
                .adjusted_p_value
                .map(|c| NumericField::parse(&record[c])),
            base_mean: NumericField::parse(&record[layout.base_mean]),
        })
    }

    /// The parsed value the significance filter looks at, if it is numeric.
    pub fn threshold_value(&self, column: ThresholdColumn) -> Option<f64> {
        match column {
            ThresholdColumn::PValue => self.p_value.value,
            ThresholdColumn::AdjustedPValue => {
                self.adjusted_p_value.as_ref().and_then(|f| f.value)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeTable {
    pub family: AssayFamily,
    pub records: Vec<DifferentialRecord>,
    pub skipped_rows: usize,
}

/// The first line is a header and is dropped without looking at it; data
/// columns are taken by position from the family layout.
pub fn parse(text: &str, family: AssayFamily) -> DeTable {
    let layout = layout(family);
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let mut table = DeTable {
        family,
        records: Vec::new(),
        skipped_rows: 0,
    };
    for (row_no, result) in rdr.records().enumerate() {
        let parsed = match result {
            Ok(record) => DifferentialRecord::from_record(&record, layout),
            Err(e) => {
                debug!(row = row_no + 2, error = %e, "unreadable DE row");
                None
            }
        };
        match parsed {
            Some(record) => table.records.push(record),
            None => table.skipped_rows += 1,
        }
    }
    if table.skipped_rows > 0 {
        debug!(
            family = family.as_str(),
            skipped = table.skipped_rows,
            kept = table.records.len(),
            "dropped malformed DE rows"
        );
    }
    table
}
