//! MCP stdio server adapter.
//!
//! Exposes the DE query service as MCP tools over Content-Length framed
//! JSON-RPC. One service lives for the whole session, so the annotation
//! index is built at most once per server process.

use crate::{about, service::DeQueryService};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use tracing::debug;

const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "de_atlas_mcp";
const SERVER_TITLE: &str = "DE Atlas MCP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    NoResponse,
    Response,
    Exit,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub fn run_stdio_server(service: &DeQueryService) -> Result<(), String> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());
    run_server_loop(service, &mut reader, &mut writer)
}

fn run_server_loop<R: BufRead, W: Write>(
    service: &DeQueryService,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), String> {
    loop {
        let Some(message) = read_framed_json(reader)? else {
            return Ok(());
        };
        match handle_message(service, &message, writer)? {
            DispatchOutcome::NoResponse | DispatchOutcome::Response => {}
            DispatchOutcome::Exit => return Ok(()),
        }
    }
}

fn read_framed_json<R: BufRead>(reader: &mut R) -> Result<Option<Value>, String> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .map_err(|e| format!("Could not read MCP header line: {e}"))?;
        if bytes_read == 0 {
            return if content_length.is_some() {
                Err("Unexpected EOF while reading MCP headers".to_string())
            } else {
                Ok(None)
            };
        }
        let line_trimmed = line.trim_end_matches(['\r', '\n']);
        if line_trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some(value) = line_trimmed.strip_prefix("Content-Length:") {
            let len = value
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("Invalid Content-Length header '{line_trimmed}': {e}"))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or_else(|| "Missing Content-Length header".to_string())?;
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| format!("Could not read MCP JSON payload body: {e}"))?;
    serde_json::from_slice::<Value>(&body)
        .map(Some)
        .map_err(|e| format!("Could not parse MCP JSON payload: {e}"))
}

fn write_framed_json<W: Write>(writer: &mut W, payload: &Value) -> Result<(), String> {
    let body = serde_json::to_vec(payload)
        .map_err(|e| format!("Could not serialize MCP response JSON: {e}"))?;
    writer
        .write_all(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes())
        .map_err(|e| format!("Could not write MCP response header: {e}"))?;
    writer
        .write_all(&body)
        .map_err(|e| format!("Could not write MCP response body: {e}"))?;
    writer
        .flush()
        .map_err(|e| format!("Could not flush MCP response stream: {e}"))?;
    Ok(())
}

fn empty_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}

fn tool_list() -> Value {
    json!([
        {
            "name": "capabilities",
            "title": "Capabilities",
            "description": "Assay types, query modes, significance threshold and limits.",
            "inputSchema": empty_schema()
        },
        {
            "name": "cell_types",
            "title": "Cell types",
            "description": "List the cell types with published DE results.",
            "inputSchema": empty_schema()
        },
        {
            "name": "de_query",
            "title": "Differential expression query",
            "description": "Return DE rows for one assay type and cell type. With a symbol, all rows for that gene; without, rows below the significance threshold (raw p for dsEER/dsRIP, padj for mRNA/ncRNA). Failures yield empty rows and a degraded status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["dsEER", "dsRIP", "ncRNA", "mRNA"]
                    },
                    "cellType": { "type": "string" },
                    "symbol": { "type": "string" },
                    "limit": {
                        "type": ["integer", "string"],
                        "description": "Positive row limit (default 100)"
                    }
                },
                "required": ["type", "cellType"],
                "additionalProperties": false
            }
        },
        {
            "name": "annotation_lookup",
            "title": "Annotation lookup",
            "description": "Resolve a gene symbol to its annotated dsRNA feature IDs.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "symbol": { "type": "string" }
                },
                "required": ["symbol"],
                "additionalProperties": false
            }
        },
        {
            "name": "stats",
            "title": "Service statistics",
            "description": "Request counters and annotation index build statistics for this session.",
            "inputSchema": empty_schema()
        }
    ])
}

fn jsonrpc_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn jsonrpc_error(id: Option<Value>, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message
    });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "error": error
    })
}

/// Plain-text tool failure, for calls that never reach the service.
fn tool_error_text(text: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": true
    })
}

fn tool_result_json(value: Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ],
        "structuredContent": value,
        "isError": is_error
    })
}

// Degraded queries, malformed arguments included, are still successful
// tool calls with empty rows.
fn de_query_tool_result(service: &DeQueryService, arguments: &Value) -> Value {
    tool_result_json(json!(service.query_json(arguments)), false)
}

fn annotation_lookup_tool_result(service: &DeQueryService, arguments: &Value) -> Value {
    let Some(symbol) = arguments.get("symbol").and_then(Value::as_str) else {
        return tool_error_text("annotation_lookup requires a 'symbol' argument".to_string());
    };
    match service.lookup_symbol(symbol) {
        Ok(found) => tool_result_json(json!(found), false),
        Err(err) => tool_result_json(json!({ "symbol": symbol, "error": err }), true),
    }
}

fn tool_call_result(service: &DeQueryService, params: ToolCallParams) -> Value {
    debug!(tool = %params.name, "MCP tool call");
    match params.name.trim() {
        "capabilities" => tool_result_json(json!(service.capabilities()), false),
        "cell_types" => tool_result_json(
            json!({
                "count": service.cell_types().len(),
                "cell_types": service.cell_types().list(),
            }),
            false,
        ),
        "de_query" => de_query_tool_result(service, &params.arguments),
        "annotation_lookup" => annotation_lookup_tool_result(service, &params.arguments),
        "stats" => tool_result_json(json!(service.stats()), false),
        other => tool_error_text(format!("Unknown MCP tool '{other}'")),
    }
}

fn write_response<W: Write>(writer: &mut W, value: Value) -> Result<DispatchOutcome, String> {
    write_framed_json(writer, &value)?;
    Ok(DispatchOutcome::Response)
}

fn handle_message<W: Write>(
    service: &DeQueryService,
    message: &Value,
    writer: &mut W,
) -> Result<DispatchOutcome, String> {
    let Some(obj) = message.as_object() else {
        return write_response(
            writer,
            jsonrpc_error(None, -32600, "Invalid Request: expected JSON object", None),
        );
    };
    let id = obj.get("id").cloned();
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return write_response(
            writer,
            jsonrpc_error(
                id,
                -32600,
                "Invalid Request: missing method field",
                Some(message.clone()),
            ),
        );
    };

    match method {
        "initialize" => {
            let Some(id) = id else {
                return write_response(
                    writer,
                    jsonrpc_error(
                        None,
                        -32600,
                        "Invalid Request: initialize requires id",
                        None,
                    ),
                );
            };
            let result = json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "title": SERVER_TITLE,
                    "version": about::DE_ATLAS_DISPLAY_VERSION
                }
            });
            write_response(writer, jsonrpc_response(id, result))
        }
        "notifications/initialized" => Ok(DispatchOutcome::NoResponse),
        "ping" | "shutdown" => {
            if let Some(id) = id {
                write_response(writer, jsonrpc_response(id, json!({})))
            } else {
                Ok(DispatchOutcome::NoResponse)
            }
        }
        "tools/list" => {
            let Some(id) = id else {
                return Ok(DispatchOutcome::NoResponse);
            };
            write_response(
                writer,
                jsonrpc_response(id, json!({ "tools": tool_list() })),
            )
        }
        "tools/call" => {
            let Some(id) = id else {
                return Ok(DispatchOutcome::NoResponse);
            };
            let params = obj.get("params").cloned().unwrap_or_else(|| json!({}));
            let call = match serde_json::from_value::<ToolCallParams>(params) {
                Ok(call) => call,
                Err(err) => {
                    return write_response(
                        writer,
                        jsonrpc_error(
                            Some(id),
                            -32602,
                            "Invalid params for tools/call",
                            Some(json!({ "details": err.to_string() })),
                        ),
                    );
                }
            };
            let result = tool_call_result(service, call);
            write_response(writer, jsonrpc_response(id, result))
        }
        "exit" => Ok(DispatchOutcome::Exit),
        _ => {
            if id.is_none() {
                return Ok(DispatchOutcome::NoResponse);
            }
            write_response(
                writer,
                jsonrpc_error(id, -32601, &format!("Method '{method}' not found"), None),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_types::CellTypeCatalog;
    use crate::config::AtlasConfig;
    use crate::record_store::LocalStore;
    use std::io::Cursor;
    use std::sync::Arc;

    fn fixture_service() -> DeQueryService {
        DeQueryService::new(
            Arc::new(LocalStore::new("test_files/DEres")),
            AtlasConfig::local("test_files/DEres"),
            CellTypeCatalog::builtin(),
        )
    }

    fn frame(value: &Value) -> Vec<u8> {
        let body = serde_json::to_vec(value).expect("serialize test message");
        let mut bytes = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        bytes.extend(body);
        bytes
    }

    fn read_response_body(buffer: &[u8]) -> Value {
        let text = String::from_utf8(buffer.to_vec()).expect("utf8 response");
        let marker = "\r\n\r\n";
        let idx = text.find(marker).expect("response header separator");
        let body = &text[idx + marker.len()..];
        serde_json::from_str(body).expect("response body json")
    }

    fn run_single(service: &DeQueryService, request: Value) -> Value {
        let mut reader = Cursor::new(frame(&request));
        let mut writer = Vec::<u8>::new();
        run_server_loop(service, &mut reader, &mut writer).expect("server loop");
        read_response_body(&writer)
    }

    fn call(id: u64, name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {
                "name": name,
                "arguments": arguments
            }
        })
    }

    #[test]
    fn initialize_and_tools_list_roundtrip() {
        let init = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION
            }
        });
        let initialized = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        let list = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/list",
            "params": {}
        });
        let mut input = frame(&init);
        input.extend(frame(&initialized));
        input.extend(frame(&list));
        let mut reader = Cursor::new(input);
        let mut writer = Vec::<u8>::new();

        run_server_loop(&fixture_service(), &mut reader, &mut writer).expect("server loop");

        let output = String::from_utf8(writer).expect("utf8 output");
        let parts = output
            .split("Content-Length:")
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>();
        assert_eq!(parts.len(), 2);
        assert!(parts[1].contains("\"de_query\""));
    }

    #[test]
    fn tool_call_capabilities_returns_structured_payload() {
        let response = run_single(&fixture_service(), call(5, "capabilities", json!({})));
        let protocol = response
            .pointer("/result/structuredContent/protocol_version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        assert_eq!(protocol, de_atlas_protocol::PROTOCOL_VERSION);
    }

    #[test]
    fn de_query_tool_returns_rows_and_status() {
        let response = run_single(
            &fixture_service(),
            call(
                6,
                "de_query",
                json!({"type": "dsEER", "cellType": "Naive B cell", "symbol": "wasf2"}),
            ),
        );
        let content = response
            .pointer("/result/structuredContent")
            .cloned()
            .unwrap_or_default();
        assert_eq!(content["status"], "ok");
        assert_eq!(content["rows"][0]["id"], "dsRNA_001");
        assert_eq!(content["rows"][0]["pvalue"], "0.9");
        assert!(content["rows"][0].get("padj").is_none());
    }

    #[test]
    fn de_query_tool_fails_open_on_unknown_cell_type() {
        let response = run_single(
            &fixture_service(),
            call(7, "de_query", json!({"type": "mRNA", "cellType": "Kupffer cell"})),
        );
        assert_eq!(response.pointer("/result/isError"), Some(&json!(false)));
        let content = &response["result"]["structuredContent"];
        assert_eq!(content["rows"], json!([]));
        assert_eq!(content["status"], "degraded");
        assert_eq!(content["code"], "InvalidQuery");
    }

    #[test]
    fn de_query_tool_degrades_malformed_arguments() {
        let service = fixture_service();
        for (id, arguments) in [
            (14, json!({"type": "mRNA"})),
            (15, json!({"type": "mRNA", "cellType": "NK cell", "symbol": 5})),
        ] {
            let response = run_single(&service, call(id, "de_query", arguments));
            assert_eq!(response.pointer("/result/isError"), Some(&json!(false)));
            let content = &response["result"]["structuredContent"];
            assert_eq!(content["rows"], json!([]));
            assert_eq!(content["status"], "degraded");
            assert_eq!(content["code"], "InvalidQuery");
        }
        assert_eq!(service.stats().degraded, 2);
    }

    #[test]
    fn annotation_lookup_and_stats_share_one_index() {
        let service = fixture_service();
        let lookup = run_single(
            &service,
            call(8, "annotation_lookup", json!({"symbol": "loc100996442"})),
        );
        assert_eq!(
            lookup.pointer("/result/structuredContent/feature_ids"),
            Some(&json!(["dsRNA_003", "dsRNA_005"]))
        );
        let stats = run_single(&service, call(9, "stats", json!({})));
        assert_eq!(
            stats.pointer("/result/structuredContent/annotation_builds"),
            Some(&json!(1))
        );
        assert_eq!(
            stats.pointer("/result/structuredContent/annotation/feature_count"),
            Some(&json!(5))
        );
    }

    #[test]
    fn cell_types_tool_lists_catalog() {
        let response = run_single(&fixture_service(), call(10, "cell_types", json!({})));
        assert_eq!(
            response.pointer("/result/structuredContent/count"),
            Some(&json!(30))
        );
    }

    #[test]
    fn tools_call_unknown_tool_returns_tool_error_payload() {
        let response = run_single(&fixture_service(), call(11, "unknown_tool", json!({})));
        let is_error = response
            .pointer("/result/isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        assert!(is_error);
    }

    #[test]
    fn unknown_method_is_a_jsonrpc_error() {
        let request = json!({"jsonrpc": "2.0", "id": 12, "method": "resources/list"});
        let response = run_single(&fixture_service(), request);
        assert_eq!(response.pointer("/error/code"), Some(&json!(-32601)));
    }

    #[test]
    fn exit_stops_the_loop_before_later_messages() {
        let exit = json!({"jsonrpc": "2.0", "method": "exit"});
        let ping = json!({"jsonrpc": "2.0", "id": 13, "method": "ping"});
        let mut input = frame(&exit);
        input.extend(frame(&ping));
        let mut reader = Cursor::new(input);
        let mut writer = Vec::<u8>::new();
        run_server_loop(&fixture_service(), &mut reader, &mut writer).expect("server loop");
        assert!(writer.is_empty());
    }
}
