//! Per-family column layouts for DE result files.
//!
//! Everything that differs between the dsRNA family and the mRNA/ncRNA
//! family lives in [`FamilyLayout`], so the parser, resolver and formatter
//! never branch on assay names themselves.

use de_atlas_protocol::{AssayFamily, AssayType};

/// Rows whose family statistic is strictly below this value are significant.
pub const SIGNIFICANCE_THRESHOLD: f64 = 0.05;

/// Which statistic the significance filter compares against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdColumn {
    PValue,
    AdjustedPValue,
}

/// Fixed 0-based column positions of one assay family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyLayout {
    pub family: AssayFamily,
    /// Column holding the row key (dsRNA ID or Ensembl gene ID).
    pub feature_id: usize,
    pub symbol: Option<usize>,
    pub log2_fc: usize,
    pub log_cpm: usize,
    pub p_value: usize,
    pub adjusted_p_value: Option<usize>,
    pub base_mean: usize,
    pub threshold: ThresholdColumn,
}

impl FamilyLayout {
    /// Rows with fewer tab-separated fields than this are dropped.
    pub fn min_columns(&self) -> usize {
        [
            Some(self.feature_id),
            self.symbol,
            Some(self.log2_fc),
            Some(self.log_cpm),
            Some(self.p_value),
            self.adjusted_p_value,
            Some(self.base_mean),
        ]
        .into_iter()
        .flatten()
        .max()
        .map(|c| c + 1)
        .unwrap_or(0)
    }
}

// [0]=id [1]=log2FC [2]=logCPM [3]=pValue [4]=unused [5]=baseMean
const DS_RNA_LAYOUT: FamilyLayout = FamilyLayout {
    family: AssayFamily::DsRna,
    feature_id: 0,
    symbol: None,
    log2_fc: 1,
    log_cpm: 2,
    p_value: 3,
    adjusted_p_value: None,
    base_mean: 5,
    threshold: ThresholdColumn::PValue,
};

// [0]=unused [1]=ENSG [2]=symbol [3]=log2FC [4]=logCPM [5]=pValue [6]=padj [7]=baseMean
const MRNA_NCRNA_LAYOUT: FamilyLayout = FamilyLayout {
    family: AssayFamily::MrnaNcrna,
    feature_id: 1,
    symbol: Some(2),
    log2_fc: 3,
    log_cpm: 4,
    p_value: 5,
    adjusted_p_value: Some(6),
    base_mean: 7,
    threshold: ThresholdColumn::AdjustedPValue,
};

pub fn layout(family: AssayFamily) -> &'static FamilyLayout {
    match family {
        AssayFamily::DsRna => &DS_RNA_LAYOUT,
        AssayFamily::MrnaNcrna => &MRNA_NCRNA_LAYOUT,
    }
}

/// Directory (or object key prefix) holding the per-cell-type files of an
/// assay in the published data release.
pub fn default_directory(assay: AssayType) -> &'static str {
    match assay {
        AssayType::DsEer => "dsEER_Differential",
        AssayType::DsRip => "dsRIP_Differential",
        AssayType::NcRna => "ncRNA_Differential",
        AssayType::Mrna => "mRNA_Differential",
    }
}

pub fn storage_key(directory: &str, cell_type: &str) -> String {
    format!("{}/{}.txt", directory.trim_end_matches('/'), cell_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_columns_match_file_layouts() {
        assert_eq!(layout(AssayFamily::DsRna).min_columns(), 6);
        assert_eq!(layout(AssayFamily::MrnaNcrna).min_columns(), 8);
    }

    #[test]
    fn thresholds_are_family_dependent() {
        assert_eq!(
            layout(AssayType::DsRip.family()).threshold,
            ThresholdColumn::PValue
        );
        assert_eq!(
            layout(AssayType::NcRna.family()).threshold,
            ThresholdColumn::AdjustedPValue
        );
    }

    #[test]
    fn storage_key_joins_directory_and_cell_type() {
        assert_eq!(
            storage_key(default_directory(AssayType::DsEer), "Naive B cell"),
            "dsEER_Differential/Naive B cell.txt"
        );
        assert_eq!(storage_key("custom/", "pDC"), "custom/pDC.txt");
    }
}
