//! MCP stdio server binary for the DE atlas.

use de_atlas::{about, config::AtlasConfig, mcp_server::run_stdio_server, service::DeQueryService};
use std::env;

fn usage() {
    println!(
        "Usage:\n  \
de_atlas_mcp [--config PATH] [--help|-h] [--version|-V]\n\n  \
Starts a MCP stdio server with tools:\n  \
  - capabilities\n  \
  - cell_types\n  \
  - de_query\n  \
  - annotation_lookup\n  \
  - stats\n\n  \
Logs are written to stderr (RUST_LOG controls the filter).\n"
    );
}

fn parse_config_path(args: &[String]) -> Result<Option<String>, String> {
    let mut config_path: Option<String> = None;
    let mut idx = 1usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--config" => {
                if idx + 1 >= args.len() {
                    return Err(format!("Missing PATH after {}", args[idx]));
                }
                config_path = Some(args[idx + 1].clone());
                idx += 2;
            }
            other => {
                return Err(format!("Unknown argument '{other}'. Use --help for usage."));
            }
        }
    }
    Ok(config_path)
}

fn run() -> Result<(), String> {
    let args = env::args().collect::<Vec<_>>();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }
    let config_path = parse_config_path(&args)?;
    let config = AtlasConfig::load(config_path.as_deref()).map_err(|e| format!("{e:#}"))?;
    let service = DeQueryService::from_config(config).map_err(|e| format!("{e:#}"))?;
    run_stdio_server(&service)
}

fn main() {
    de_atlas::init_logging();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
