//! Runtime configuration: where the data release lives and how queries are
//! bounded.
//!
//! A JSON file provides the base settings; `DE_ATLAS_DATA_ROOT`,
//! `DE_ATLAS_BASE_URL` and `DE_ATLAS_ANNOTATION` override them. A non-empty
//! base URL wins over a data root when both are set in the environment.

use crate::assay::default_directory;
use crate::cell_types::CellTypeCatalog;
use crate::error::EngineError;
use crate::record_store::{HttpStore, LocalStore, RecordStore};
use crate::resolver::{DEFAULT_LIMIT, DEFAULT_MAX_LIMIT, QueryLimits};
use anyhow::{Context, Result, anyhow};
use de_atlas_protocol::AssayType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DATA_ROOT_ENV: &str = "DE_ATLAS_DATA_ROOT";
pub const BASE_URL_ENV: &str = "DE_ATLAS_BASE_URL";
pub const ANNOTATION_ENV: &str = "DE_ATLAS_ANNOTATION";
pub const DEFAULT_ANNOTATION_KEY: &str = "dsRNA_anno_35257.txt";
pub const DEFAULT_DATA_ROOT: &str = "public/DEres";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    Local { root: PathBuf },
    Http { base_url: String },
}

impl Default for DataSource {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from(DEFAULT_DATA_ROOT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub source: DataSource,
    pub annotation_key: String,
    /// Per-assay directory overrides, keyed by assay type name (`dsEER`, ...).
    pub directories: BTreeMap<String, String>,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Replaces the built-in cell type catalog when set.
    pub cell_types_path: Option<PathBuf>,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            source: DataSource::default(),
            annotation_key: DEFAULT_ANNOTATION_KEY.to_string(),
            directories: BTreeMap::new(),
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            cell_types_path: None,
        }
    }
}

fn normalized_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl AtlasConfig {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            source: DataSource::Local { root: root.into() },
            ..Self::default()
        }
    }

    /// Relative paths inside the file are taken relative to the file's
    /// directory.
    pub fn from_json_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file '{path}'"))?;
        let mut ret: Self = serde_json::from_str(&text)
            .with_context(|| format!("Could not parse config file '{path}'"))?;
        let base = Path::new(path).parent().unwrap_or_else(|| Path::new(""));
        if let DataSource::Local { root } = &mut ret.source {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        if let Some(catalog) = ret.cell_types_path.as_mut() {
            if catalog.is_relative() {
                *catalog = base.join(&*catalog);
            }
        }
        ret.validate()?;
        Ok(ret)
    }

    /// The config file (or the defaults) with the process environment
    /// applied on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut ret = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        ret.apply_env_overrides_with(|name| std::env::var(name).ok());
        ret.validate()?;
        Ok(ret)
    }

    /// `lookup` returns the raw value of an environment variable.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).and_then(|v| normalized_non_empty(&v));
        if let Some(root) = get(DATA_ROOT_ENV) {
            self.source = DataSource::Local {
                root: PathBuf::from(root),
            };
        }
        if let Some(base_url) = get(BASE_URL_ENV) {
            self.source = DataSource::Http { base_url };
        }
        if let Some(key) = get(ANNOTATION_ENV) {
            self.annotation_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 {
            return Err(anyhow!("max_limit must be positive"));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(anyhow!(
                "default_limit {} must be between 1 and max_limit {}",
                self.default_limit,
                self.max_limit
            ));
        }
        if self.annotation_key.trim().is_empty() {
            return Err(anyhow!("annotation_key must not be empty"));
        }
        for name in self.directories.keys() {
            AssayType::parse(name).map_err(|e| anyhow!("Invalid directory override: {e}"))?;
        }
        Ok(())
    }

    pub fn directory_for(&self, assay: AssayType) -> &str {
        self.directories
            .iter()
            .find(|(name, _)| AssayType::parse(name).ok() == Some(assay))
            .map(|(_, dir)| dir.as_str())
            .unwrap_or_else(|| default_directory(assay))
    }

    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }

    pub fn load_cell_types(&self) -> Result<CellTypeCatalog> {
        match &self.cell_types_path {
            Some(path) => CellTypeCatalog::from_json_file(&path.to_string_lossy()),
            None => Ok(CellTypeCatalog::builtin()),
        }
    }

    pub fn open_store(&self) -> Result<Arc<dyn RecordStore>, EngineError> {
        let store: Arc<dyn RecordStore> = match &self.source {
            DataSource::Local { root } => Arc::new(LocalStore::new(root.clone())),
            DataSource::Http { base_url } => Arc::new(HttpStore::new(base_url)?),
        };
        Ok(store)
    }
}
