//! Shared machine-readable contracts between the DE query engine and its
//! front ends (CLI, MCP, static web UI).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const PROTOCOL_VERSION: &str = "de_atlas.v1";

/// Experimental modality of a DE result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssayType {
    #[serde(rename = "dsEER")]
    DsEer,
    #[serde(rename = "dsRIP")]
    DsRip,
    #[serde(rename = "ncRNA")]
    NcRna,
    #[serde(rename = "mRNA")]
    Mrna,
}

impl AssayType {
    pub const ALL: [AssayType; 4] = [Self::DsEer, Self::DsRip, Self::NcRna, Self::Mrna];

    /// Names are matched exactly (after trimming), as they appear in the
    /// release directory names.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let wanted = raw.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                format!("Unknown assay type '{wanted}' (expected dsEER|dsRIP|ncRNA|mRNA)")
            })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DsEer => "dsEER",
            Self::DsRip => "dsRIP",
            Self::NcRna => "ncRNA",
            Self::Mrna => "mRNA",
        }
    }

    pub fn family(self) -> AssayFamily {
        match self {
            Self::DsEer | Self::DsRip => AssayFamily::DsRna,
            Self::NcRna | Self::Mrna => AssayFamily::MrnaNcrna,
        }
    }
}

impl fmt::Display for AssayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema family shared by several assay types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssayFamily {
    DsRna,
    MrnaNcrna,
}

impl AssayFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DsRna => "ds_rna",
            Self::MrnaNcrna => "mrna_ncrna",
        }
    }
}

/// Query parameters exactly as the presentation layer sends them.
///
/// `limit` is kept as a raw JSON value because browsers hand it over either
/// as a number or as a query-string token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "type", default)]
    pub assay_type: String,
    #[serde(rename = "cellType", default)]
    pub cell_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Value>,
}

impl QueryParams {
    pub fn new(assay_type: &str, cell_type: &str) -> Self {
        Self {
            assay_type: assay_type.to_string(),
            cell_type: cell_type.to_string(),
            ..Self::default()
        }
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(Value::from(limit));
        self
    }
}

/// Output row for the dsRNA family (dsEER, dsRIP). There is no adjusted
/// p-value in these assays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsRnaRow {
    pub id: String,
    #[serde(rename = "log2FC")]
    pub log2_fc: String,
    pub pvalue: String,
    #[serde(rename = "baseMean")]
    pub base_mean: String,
}

/// Output row for the mRNA/ncRNA family. `id` carries the gene symbol and
/// `ensg` the Ensembl gene ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptRow {
    pub id: String,
    pub ensg: String,
    #[serde(rename = "log2FC")]
    pub log2_fc: String,
    pub pvalue: String,
    pub padj: String,
    #[serde(rename = "baseMean")]
    pub base_mean: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormattedRow {
    Transcript(TranscriptRow),
    DsRna(DsRnaRow),
}

impl FormattedRow {
    pub fn id(&self) -> &str {
        match self {
            Self::DsRna(row) => &row.id,
            Self::Transcript(row) => &row.id,
        }
    }

    pub fn pvalue(&self) -> &str {
        match self {
            Self::DsRna(row) => &row.pvalue,
            Self::Transcript(row) => &row.pvalue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub assay_types: Vec<String>,
    pub query_modes: Vec<String>,
    pub significance_threshold: f64,
    pub default_limit: usize,
    pub max_limit: usize,
    pub cell_type_count: usize,
}
