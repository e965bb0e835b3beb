use crate::handlers::initialize::handle_initialize;
use crate::handlers::ping::handle_ping;
use crate::handlers::tool::{get_tool_definitions, handle_tools_call};
use crate::config::ServerConfig;
use crate::credentials::CredentialResolver;
use crate::diagnostics::ErrorLog;
use crate::knowledge::{HttpKnowledgeSearch, SearchToolInvoker};
use crate::mcp::error_codes;
use crate::mcp::types::{
    CallToolParams, ErrorObject, InitializeParams, InitializedNotificationParams, ListToolsParams,
    ListToolsResult, PingParams, Request, Response, JSONRPC_VERSION,
};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, info, instrument, warn};

/// JSON-RPC dispatcher shared by every transport.
pub struct Server {
    invoker: SearchToolInvoker,
}

impl Server {
    pub fn new(invoker: SearchToolInvoker) -> Self {
        Self { invoker }
    }

    /// Wires the production search backend, credential lookup and error log.
    pub fn from_config(config: &ServerConfig) -> Self {
        let backend = HttpKnowledgeSearch::new(&config.api_host);
        let invoker = SearchToolInvoker::new(
            CredentialResolver::from_environment(),
            Arc::new(backend),
            Arc::new(ErrorLog::open(&config.error_log)),
        );
        Self::new(invoker)
    }

    /// Serves newline-delimited JSON-RPC over stdin/stdout until stdin closes.
    pub async fn run(&self) -> Result<()> {
        info!("MCP server reading from stdin and writing to stdout.");
        let reader = BufReader::new(tokio::io::stdin());
        let writer = BufWriter::new(tokio::io::stdout());
        self.serve_lines(reader, writer).await
    }

    /// Line loop behind [`Server::run`], generic so it can be driven from memory.
    pub async fn serve_lines<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let read = reader
                .read_line(&mut line_buf)
                .await
                .context("Error reading from stdin")?;
            if read == 0 {
                info!("Stdin closed, shutting down.");
                break;
            }

            let trimmed_line = line_buf.trim();
            if trimmed_line.is_empty() {
                continue;
            }
            debug!(request = %trimmed_line, "Received request");

            if let Some(response_json) = self.process_json_rpc_request_str(trimmed_line).await {
                debug!(response = %response_json, "Sending response");
                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await.context("Failed to flush stdout")?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(request_id = ?request.id, method = %request.method))]
    pub async fn handle_request(&self, request: Request) -> Result<Option<Value>, ErrorObject> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(ErrorObject {
                code: error_codes::INVALID_REQUEST,
                message: "Invalid jsonrpc version".to_string(),
                data: None,
            });
        }

        match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = deserialize_params(request.params, "initialize")?;
                let result = handle_initialize(params).await?;
                ok_some(result)
            }
            "initialized" | "notifications/initialized" => {
                let _params: InitializedNotificationParams = deserialize_params(request.params, "initialized")?;
                info!("Received initialized notification");
                Ok(None)
            }
            "ping" => {
                let params: PingParams = deserialize_params(request.params, "ping")?;
                let result = handle_ping(params).await?;
                ok_some(result)
            }
            "tools/list" => {
                let _params: ListToolsParams = deserialize_params(request.params, "tools/list")?;
                ok_some(ListToolsResult {
                    tools: get_tool_definitions(),
                })
            }
            "tools/call" => {
                let params: CallToolParams = deserialize_params(request.params, "tools/call")?;
                handle_tools_call(params, &self.invoker).await
            }
            method if method.starts_with("notifications/") => {
                debug!(%method, "Ignoring notification");
                Ok(None)
            }
            _ => Err(ErrorObject {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {}", request.method),
                data: None,
            }),
        }
    }

    /// Parses a raw JSON-RPC request, dispatches it, and serializes the reply.
    ///
    /// Returns `None` for notifications.
    pub async fn process_json_rpc_request_str(&self, json_request_str: &str) -> Option<String> {
        let response = match serde_json::from_str::<Request>(json_request_str) {
            Ok(request) => self.respond(request).await?,
            Err(e) => {
                warn!(error = %e, "Failed to parse JSON-RPC request");
                Response::error(
                    ErrorObject {
                        code: error_codes::PARSE_ERROR,
                        message: format!("Failed to parse request: {e}"),
                        data: None,
                    },
                    None,
                )
            }
        };
        Some(serialize_response(&response))
    }

    /// Dispatches a parsed request and wraps the outcome in a JSON-RPC envelope.
    pub async fn respond(&self, request: Request) -> Option<Response> {
        let request_id = request.id.clone();
        let is_notification = request_id.is_none();
        match self.handle_request(request).await {
            Ok(Some(result)) => Some(Response::success(result, request_id)),
            Ok(None) => None,
            Err(_) if is_notification => None,
            Err(err_obj) => Some(Response::error(err_obj, request_id)),
        }
    }
}

fn serialize_response(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize MCP response");
        format!(
            "{{\"jsonrpc\":\"2.0\",\"error\":{{\"code\":{},\"message\":\"Failed to serialize response\"}},\"id\":null}}",
            error_codes::INTERNAL_ERROR
        )
    })
}

pub fn deserialize_params<T: serde::de::DeserializeOwned + Default>(
    params: Option<Value>,
    method_name: &str,
) -> Result<T, ErrorObject> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(p) => deserialize_value(p, method_name),
    }
}

pub fn deserialize_value<T: serde::de::DeserializeOwned>(value: Value, method_name: &str) -> Result<T, ErrorObject> {
    serde_json::from_value(value).map_err(|e| ErrorObject {
        code: error_codes::INVALID_PARAMS,
        message: format!("Invalid params/arguments for {method_name}: {e}"),
        data: None,
    })
}

pub fn ok_some<T: serde::Serialize>(value: T) -> Result<Option<Value>, ErrorObject> {
    serde_json::to_value(value)
        .map_err(|e| ErrorObject {
            code: error_codes::INTERNAL_ERROR,
            message: format!("Failed to serialize result: {e}"),
            data: None,
        })
        .map(Some)
}
