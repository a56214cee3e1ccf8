pub use de_atlas_protocol as protocol;

pub mod about;
pub mod annotation;
pub mod assay;
pub mod cell_types;
pub mod config;
pub mod de_table;
pub mod error;
pub mod formatter;
pub mod mcp_server;
pub mod record_store;
pub mod resolver;
pub mod service;

pub const DEFAULT_LOG_FILTER: &str = "de_atlas=info";

/// Structured logs go to stderr; stdout carries JSON output and the MCP
/// channel. `RUST_LOG` replaces the default filter.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
