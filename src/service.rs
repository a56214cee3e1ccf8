//! Request boundary of the DE query engine.
//!
//! [`DeQueryService`] owns the record store, the annotation cache and the
//! request counters. [`DeQueryService::query`] is fail-open: whatever goes
//! wrong below it, the caller gets a (possibly empty) list of rows, and the
//! reason is logged, counted and reported in [`QueryStatus`].

use crate::annotation::{AnnotationIndex, AnnotationStats, normalize_symbol};
use crate::assay::{SIGNIFICANCE_THRESHOLD, storage_key};
use crate::cell_types::CellTypeCatalog;
use crate::config::AtlasConfig;
use crate::de_table;
use crate::error::{EngineError, ErrorCode};
use crate::formatter::format;
use crate::record_store::RecordStore;
use crate::resolver::{Query, QueryMode, distinct_ids, resolve};
use de_atlas_protocol::{
    AssayFamily, AssayType, Capabilities, FormattedRow, PROTOCOL_VERSION, QueryParams,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Lazily built annotation index shared by every request of one service.
///
/// The lock is held for the whole build, so racing first requests build
/// once. A failed build leaves the slot empty for the next request to retry.
#[derive(Debug, Default)]
pub struct AnnotationCache {
    slot: Mutex<Option<Arc<AnnotationIndex>>>,
}

impl AnnotationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build<F>(&self, build: F) -> Result<Arc<AnnotationIndex>, EngineError>
    where
        F: FnOnce() -> Result<AnnotationIndex, EngineError>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(build()?);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    pub fn get(&self) -> Option<Arc<AnnotationIndex>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Default)]
pub struct ServiceStats {
    queries: AtomicU64,
    ok: AtomicU64,
    no_match: AtomicU64,
    degraded: AtomicU64,
    rows_returned: AtomicU64,
    annotation_builds: AtomicU64,
    annotation_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub ok: u64,
    pub no_match: u64,
    pub degraded: u64,
    pub rows_returned: u64,
    pub annotation_builds: u64,
    pub annotation_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationStats>,
}

impl ServiceStats {
    fn record(&self, outcome: &QueryOutcome) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.rows_returned
            .fetch_add(outcome.rows.len() as u64, Ordering::Relaxed);
        let counter = match outcome.status {
            QueryStatus::Ok => &self.ok,
            QueryStatus::NoMatch => &self.no_match,
            QueryStatus::Degraded { .. } => &self.degraded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
            annotation_builds: self.annotation_builds.load(Ordering::Relaxed),
            annotation_failures: self.annotation_failures.load(Ordering::Relaxed),
            annotation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    NoMatch,
    /// The request failed below the boundary; `rows` is empty.
    Degraded { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    pub rows: Vec<FormattedRow>,
    #[serde(flatten)]
    pub status: QueryStatus,
}

impl QueryOutcome {
    fn degraded(e: EngineError) -> Self {
        Self {
            rows: vec![],
            status: QueryStatus::Degraded {
                code: e.code,
                message: e.message,
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, QueryStatus::Degraded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolLookup {
    pub symbol: String,
    pub feature_ids: Vec<String>,
}

pub struct DeQueryService {
    store: Arc<dyn RecordStore>,
    config: AtlasConfig,
    cell_types: CellTypeCatalog,
    annotation: AnnotationCache,
    stats: ServiceStats,
}

impl DeQueryService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        config: AtlasConfig,
        cell_types: CellTypeCatalog,
    ) -> Self {
        Self {
            store,
            config,
            cell_types,
            annotation: AnnotationCache::new(),
            stats: ServiceStats::default(),
        }
    }

    pub fn from_config(config: AtlasConfig) -> anyhow::Result<Self> {
        let store = config.open_store()?;
        let cell_types = config.load_cell_types()?;
        info!(
            store = %store.describe(),
            cell_types = cell_types.len(),
            "DE query service ready"
        );
        Ok(Self::new(store, config, cell_types))
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn cell_types(&self) -> &CellTypeCatalog {
        &self.cell_types
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The query pipeline with errors propagated. Front ends should call
    /// [`Self::query`].
    pub fn try_query(&self, params: &QueryParams) -> Result<Vec<FormattedRow>, EngineError> {
        let query = Query::from_params(params, &self.config.limits(), &self.cell_types)?;
        let family = query.family();
        let locator = storage_key(
            self.config.directory_for(query.assay_type),
            &query.cell_type,
        );
        let text = self.store.load(&locator)?;
        let table = de_table::parse(&text, family);

        let index = match (query.mode(), family) {
            (QueryMode::IdentifierMatch(_), AssayFamily::DsRna) => Some(self.annotation_index()?),
            _ => None,
        };
        let matched = resolve(&query, index.as_deref(), &table.records)?;
        debug!(
            assay = %query.assay_type,
            cell_type = %query.cell_type,
            mode = ?query.mode(),
            rows = table.records.len(),
            matched = matched.len(),
            distinct = distinct_ids(&matched),
            "resolved DE query"
        );
        Ok(format(matched, family))
    }

    pub fn query(&self, params: &QueryParams) -> QueryOutcome {
        let outcome = match self.try_query(params) {
            Ok(rows) if rows.is_empty() => QueryOutcome {
                rows,
                status: QueryStatus::NoMatch,
            },
            Ok(rows) => QueryOutcome {
                rows,
                status: QueryStatus::Ok,
            },
            Err(e) => {
                warn!(
                    code = ?e.code,
                    assay = %params.assay_type,
                    cell_type = %params.cell_type,
                    error = %e.message,
                    "DE query degraded to an empty result"
                );
                QueryOutcome::degraded(e)
            }
        };
        self.stats.record(&outcome);
        outcome
    }

    /// Same as [`Self::query`] for parameters still in their JSON form.
    /// Arguments of the wrong shape degrade like any other invalid query.
    pub fn query_json(&self, raw: &Value) -> QueryOutcome {
        match serde_json::from_value::<QueryParams>(raw.clone()) {
            Ok(params) => self.query(&params),
            Err(e) => {
                let e = EngineError::invalid_query(format!("Could not parse query parameters: {e}"));
                warn!(code = ?e.code, error = %e.message, "DE query degraded to an empty result");
                let outcome = QueryOutcome::degraded(e);
                self.stats.record(&outcome);
                outcome
            }
        }
    }

    /// Rows only, for callers that render the array as is.
    pub fn rows(&self, params: &QueryParams) -> Vec<FormattedRow> {
        self.query(params).rows
    }

    pub fn annotation_index(&self) -> Result<Arc<AnnotationIndex>, EngineError> {
        self.annotation.get_or_build(|| {
            let key = &self.config.annotation_key;
            let built = self
                .store
                .load(key)
                .and_then(|text| AnnotationIndex::build(&text));
            match built {
                Ok(index) => {
                    let stats = index.stats();
                    self.stats.annotation_builds.fetch_add(1, Ordering::Relaxed);
                    info!(
                        annotation = %key,
                        features = stats.feature_count,
                        symbols = stats.symbol_count,
                        skipped = stats.rows_skipped,
                        duplicates = stats.duplicate_ids,
                        "built dsRNA annotation index"
                    );
                    Ok(index)
                }
                Err(e) => {
                    self.stats
                        .annotation_failures
                        .fetch_add(1, Ordering::Relaxed);
                    Err(e)
                }
            }
        })
    }

    pub fn lookup_symbol(&self, symbol: &str) -> Result<SymbolLookup, EngineError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(EngineError::invalid_query("Symbol must not be empty"));
        }
        let index = self.annotation_index()?;
        Ok(SymbolLookup {
            feature_ids: index.lookup(&symbol).to_vec(),
            symbol,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            protocol_version: PROTOCOL_VERSION.to_string(),
            assay_types: AssayType::ALL
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            query_modes: vec![
                "identifier_match".to_string(),
                "significance_filter".to_string(),
            ],
            significance_threshold: SIGNIFICANCE_THRESHOLD,
            default_limit: self.config.default_limit,
            max_limit: self.config.max_limit,
            cell_type_count: self.cell_types.len(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut ret = self.stats.snapshot();
        ret.annotation = self.annotation.get().map(|index| index.stats());
        ret
    }
}
