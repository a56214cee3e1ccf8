//! Shapes resolved records into the rows the presentation layer renders.

use crate::de_table::{DifferentialRecord, NumericField};
use de_atlas_protocol::{AssayFamily, DsRnaRow, FormattedRow, TranscriptRow};

fn raw(field: &NumericField) -> String {
    field.raw.clone()
}

pub fn format_record(record: &DifferentialRecord, family: AssayFamily) -> FormattedRow {
    match family {
        AssayFamily::DsRna => FormattedRow::DsRna(DsRnaRow {
            id: record.feature_id.clone(),
            log2_fc: raw(&record.log2_fc),
            pvalue: raw(&record.p_value),
            base_mean: raw(&record.base_mean),
        }),
        AssayFamily::MrnaNcrna => FormattedRow::Transcript(TranscriptRow {
            id: record.symbol.clone().unwrap_or_default(),
            ensg: record.feature_id.clone(),
            log2_fc: raw(&record.log2_fc),
            pvalue: raw(&record.p_value),
            padj: record.adjusted_p_value.as_ref().map(raw).unwrap_or_default(),
            base_mean: raw(&record.base_mean),
        }),
    }
}

/// Numeric values are passed through as the source text.
pub fn format<'a>(
    records: impl IntoIterator<Item = &'a DifferentialRecord>,
    family: AssayFamily,
) -> Vec<FormattedRow> {
    records
        .into_iter()
        .map(|r| format_record(r, family))
        .collect()
}
