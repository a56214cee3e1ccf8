use de_atlas::{
    about,
    config::AtlasConfig,
    protocol::QueryParams,
    service::DeQueryService,
};
use serde::Serialize;
use std::env;

fn usage() {
    eprintln!(
        "Usage:\n  \
  de_atlas_cli --version\n  \
  de_atlas_cli [--config PATH] query --type dsEER|dsRIP|ncRNA|mRNA --cell-type CELL [--symbol SYMBOL] [--limit N] [--status]\n  \
  de_atlas_cli [--config PATH] lookup SYMBOL\n  \
  de_atlas_cli [--config PATH] cell-types\n  \
  de_atlas_cli [--config PATH] capabilities\n\n  \
  Environment: DE_ATLAS_DATA_ROOT, DE_ATLAS_BASE_URL, DE_ATLAS_ANNOTATION, RUST_LOG"
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn parse_global_config_arg(args: &[String]) -> (Option<String>, usize) {
    if args.len() >= 3 && args[1] == "--config" {
        return (Some(args[2].clone()), 3);
    }
    (None, 1)
}

/// `--status` prints the whole outcome instead of the bare row array.
fn parse_query_args(args: &[String]) -> Result<(QueryParams, bool), String> {
    let mut params = QueryParams::default();
    let mut with_status = false;
    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        if flag == "--status" {
            with_status = true;
            idx += 1;
            continue;
        }
        let value = args
            .get(idx + 1)
            .cloned()
            .ok_or_else(|| format!("Missing value after {flag}"))?;
        match flag {
            "--type" => params.assay_type = value,
            "--cell-type" => params.cell_type = value,
            "--symbol" => params.symbol = Some(value),
            "--limit" => params.limit = Some(serde_json::Value::String(value)),
            other => {
                return Err(format!("Unknown query argument '{other}'. Use --help for usage."));
            }
        }
        idx += 2;
    }
    if params.assay_type.is_empty() || params.cell_type.is_empty() {
        return Err("query requires --type and --cell-type".to_string());
    }
    Ok((params, with_status))
}

fn main() {
    de_atlas::init_logging();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let (config_path, cmd_idx) = parse_global_config_arg(&args);
    if args.len() <= cmd_idx {
        usage();
        return Err("Missing command".to_string());
    }
    let config = AtlasConfig::load(config_path.as_deref()).map_err(|e| format!("{e:#}"))?;
    let service = DeQueryService::from_config(config).map_err(|e| format!("{e:#}"))?;

    let command = &args[cmd_idx];
    match command.as_str() {
        "query" => {
            let (params, with_status) = parse_query_args(&args[cmd_idx + 1..])?;
            let outcome = service.query(&params);
            if with_status {
                print_json(&outcome)
            } else {
                print_json(&outcome.rows)
            }
        }
        "lookup" => {
            let Some(symbol) = args.get(cmd_idx + 1) else {
                usage();
                return Err("Missing SYMBOL for lookup".to_string());
            };
            let found = service.lookup_symbol(symbol).map_err(|e| e.to_string())?;
            print_json(&found)
        }
        "cell-types" => print_json(&service.cell_types().list()),
        "capabilities" => print_json(&service.capabilities()),
        other => {
            usage();
            Err(format!("Unknown command '{other}'"))
        }
    }
}
