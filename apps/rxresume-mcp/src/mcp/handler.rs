//! JSON-RPC dispatch for MCP requests.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::protocol::{
    JsonRpcRequest, JsonRpcResponse, ToolCallParams, INVALID_PARAMS, INVALID_REQUEST,
    JSONRPC_VERSION, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use crate::tools::{tool_result, ToolRegistry};

pub const SERVER_NAME: &str = "rxresume-mcp";

pub struct McpHandler {
    tools: Arc<ToolRegistry>,
}

impl McpHandler {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    /// Handles one JSON-RPC message or batch. Returns `None` when nothing
    /// should be written back (notifications, all-notification batches).
    pub async fn handle(&self, message: Value) -> Option<Value> {
        match message {
            Value::Array(batch) => {
                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(response) = self.handle_single(item).await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then(|| Value::Array(responses))
            }
            single => self.handle_single(single).await,
        }
    }

    async fn handle_single(&self, message: Value) -> Option<Value> {
        let raw_id = message.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid JSON-RPC request: {e}");
                let response = JsonRpcResponse::error(
                    raw_id.unwrap_or(Value::Null),
                    INVALID_REQUEST,
                    format!("Invalid Request: {e}"),
                );
                return serde_json::to_value(response).ok();
            }
        };

        if request.jsonrpc.as_deref().is_some_and(|v| v != JSONRPC_VERSION) {
            let response = JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                format!("Invalid JSON-RPC version, expected '{JSONRPC_VERSION}'"),
            );
            return serde_json::to_value(response).ok();
        }

        if request.is_notification() {
            self.handle_notification(&request);
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let response = self.dispatch(id, &request).await;
        serde_json::to_value(response).ok()
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => debug!("Client finished initialization"),
            "notifications/cancelled" => debug!("Client cancelled a request"),
            other => debug!("Ignoring notification {other}"),
        }
    }

    async fn dispatch(&self, id: Value, request: &JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => {
                debug!("Handling initialize request");
                JsonRpcResponse::success(id, initialize_result())
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                json!({ "tools": self.tools.definitions() }),
            ),
            "tools/call" => self.call_tool(id, request.params.clone()).await,
            method => {
                debug!("Unknown method {method}");
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
            }
        }
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {e}"))
            }
            None => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"),
        };

        let Some(tool) = self.tools.get(&params.name) else {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        };

        let arguments = match params.arguments {
            None | Some(Value::Null) => json!({}),
            Some(args @ Value::Object(_)) => args,
            Some(_) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, "Tool arguments must be an object")
            }
        };

        info!(tool = %params.name, "Calling tool");
        let outcome = tool.call(arguments).await;
        if let Err(e) = &outcome {
            warn!(tool = %params.name, error = %e, "Tool call failed");
        }
        JsonRpcResponse::success(id, tool_result(outcome))
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}
