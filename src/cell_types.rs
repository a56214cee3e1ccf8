//! Catalog of cell types with published DE results.

use anyhow::{Context, Result, anyhow};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs};

const BUILTIN_CELL_TYPES_JSON: &str = include_str!("../assets/cell_types.json");
const CELL_TYPE_SCHEMA_PREFIX: &str = "de_atlas.cell_types.v";

#[derive(Debug, Clone, Deserialize)]
struct CellTypeSnapshot {
    schema: String,
    cell_types: Vec<CellType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellType {
    /// Identifier used in file names and queries.
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CellTypeCatalog {
    cell_types: Vec<CellType>,
    by_value: HashMap<String, usize>,
}

impl CellTypeCatalog {
    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: CellTypeSnapshot =
            serde_json::from_str(text).context("Could not parse cell type catalog")?;
        if !snapshot.schema.starts_with(CELL_TYPE_SCHEMA_PREFIX) {
            return Err(anyhow!(
                "Unsupported cell type catalog schema '{}'",
                snapshot.schema
            ));
        }
        let mut ret = Self::default();
        for mut cell_type in snapshot.cell_types {
            cell_type.value = cell_type.value.trim().to_string();
            if cell_type.value.is_empty() {
                continue;
            }
            validate_value(&cell_type.value)?;
            if ret.by_value.contains_key(&cell_type.value) {
                return Err(anyhow!("Duplicate cell type '{}'", cell_type.value));
            }
            ret.by_value
                .insert(cell_type.value.clone(), ret.cell_types.len());
            ret.cell_types.push(cell_type);
        }
        Ok(ret)
    }

    pub fn from_json_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read cell type catalog '{path}'"))?;
        Self::from_json(&text).with_context(|| format!("Invalid cell type catalog '{path}'"))
    }

    pub fn builtin() -> Self {
        BUILTIN_CELL_TYPES.clone()
    }

    /// Exact, case-sensitive match after trimming: `pDC` and `mDC` differ
    /// only in case-significant letters.
    pub fn resolve(&self, value: &str) -> Option<&CellType> {
        let idx = self.by_value.get(value.trim())?;
        self.cell_types.get(*idx)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.resolve(value).is_some()
    }

    pub fn list(&self) -> &[CellType] {
        &self.cell_types
    }

    pub fn len(&self) -> usize {
        self.cell_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_types.is_empty()
    }
}

// Cell type values become file names inside the release directories.
fn validate_value(value: &str) -> Result<()> {
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(anyhow!("Cell type '{value}' cannot be used as a file name"));
    }
    Ok(())
}

lazy_static! {
    static ref BUILTIN_CELL_TYPES: CellTypeCatalog =
        CellTypeCatalog::from_json(BUILTIN_CELL_TYPES_JSON).unwrap_or_default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_all_blood_cell_types() {
        let catalog = CellTypeCatalog::builtin();
        assert_eq!(catalog.len(), 30);
        assert!(catalog.contains("Naive B cell"));
        assert!(catalog.contains("LDG_CD14+"));
        assert!(catalog.contains(" EV "));
        assert_eq!(
            catalog.resolve("pDC").map(|c| c.label.as_str()),
            Some("pDC (Plasmacytoid DC)")
        );
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let catalog = CellTypeCatalog::builtin();
        assert!(!catalog.contains("PDC"));
        assert!(!catalog.contains("naive b cell"));
    }

    #[test]
    fn rejects_path_like_values_and_foreign_schema() {
        let bad_value = r#"{"schema":"de_atlas.cell_types.v1","cell_types":[{"value":"../x","label":"x"}]}"#;
        assert!(CellTypeCatalog::from_json(bad_value).is_err());
        let bad_schema = r#"{"schema":"other.v1","cell_types":[]}"#;
        assert!(CellTypeCatalog::from_json(bad_schema).is_err());
    }

    #[test]
    fn rejects_duplicate_values() {
        let dup = r#"{"schema":"de_atlas.cell_types.v1","cell_types":[
            {"value":"NK cell","label":"a"},{"value":"NK cell ","label":"b"}]}"#;
        let err = CellTypeCatalog::from_json(dup).expect_err("duplicate");
        assert!(err.to_string().contains("Duplicate"), "unexpected error: {err}");
    }
}
