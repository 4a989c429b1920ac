//! MCP server over line-delimited JSON-RPC.
//!
//! Requests are handled strictly one at a time: the next line is not read
//! until the current response has been written.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::protocol::{self, Request, RequestId, Response, RpcError};
use super::tools::{self, ToolResult};

/// Server information
const SERVER_NAME: &str = "gemini-bridge";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tool handler trait
///
/// Calls take `&mut self`; the server never runs two at once.
#[async_trait::async_trait]
pub trait ToolHandler: Send {
    /// Handle a tool call
    async fn call(&mut self, name: &str, arguments: Value) -> ToolResult;
}

/// MCP Server
pub struct McpServer<H: ToolHandler> {
    handler: H,
    initialized: bool,
}

impl<H: ToolHandler> McpServer<H> {
    /// Create a new MCP server with a tool handler
    pub fn new(handler: H) -> Self {
        McpServer {
            handler,
            initialized: false,
        }
    }

    /// Run the server on stdio
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Starting MCP server on stdio");
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.serve(reader, writer).await
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let message = line.trim();
            if message.is_empty() {
                continue;
            }

            debug!("Received: {}", message);

            let Some(response) = self.handle_message(message).await else {
                continue;
            };
            let response_json = protocol::serialize_response_string(&response)?;

            debug!("Sending: {}", response_json);

            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    /// Handle a single JSON-RPC message; notifications produce no response
    async fn handle_message(&mut self, message: &str) -> Option<Response> {
        match protocol::parse_request_str(message) {
            Ok(request) => self.handle_request(request).await,
            Err(err) => {
                warn!("Rejecting message: {}", err);
                Some(Response::from_error(RequestId::Null, err))
            }
        }
    }

    /// Handle a parsed request
    async fn handle_request(&mut self, request: Request) -> Option<Response> {
        if request.is_notification() {
            debug!("Notification: {}", request.method);
            return None;
        }
        let id = request.id.clone().unwrap_or(RequestId::Null);
        let params = request.params.unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, params).await,
            "ping" => Response::success(id, json!({})),
            method => {
                warn!("Unknown method: {}", method);
                Response::from_error(id, RpcError::MethodNotFound(method.to_string()))
            }
        };
        Some(response)
    }

    /// Handle initialize request
    fn handle_initialize(&mut self, id: RequestId) -> Response {
        self.initialized = true;
        info!("MCP server initialized");

        Response::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION,
                }
            }),
        )
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: RequestId) -> Response {
        Response::success(id, json!({ "tools": tools::all_tools() }))
    }

    /// Handle tools/call request
    async fn handle_tools_call(&mut self, id: RequestId, params: Value) -> Response {
        let Some(name) = params.get("name").and_then(|v| v.as_str()).map(str::to_string) else {
            return Response::from_error(
                id,
                RpcError::InvalidParams("Missing 'name' field".to_string()),
            );
        };

        if tools::get_tool(&name).is_none() {
            return Response::from_error(
                id,
                RpcError::InvalidParams(format!("Unknown tool: {}", name)),
            );
        }

        if !self.initialized {
            debug!("tools/call before initialize");
        }

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        debug!("Calling tool: {} with args: {}", name, arguments);
        let result = self.handler.call(&name, arguments).await;
        if result.is_error() {
            warn!("Tool {} failed: {}", name, result.text_content());
        }

        match serde_json::to_value(result) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::from_error(id, RpcError::InternalError(e.to_string())),
        }
    }
}
