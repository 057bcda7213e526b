use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

pub mod backend;
pub mod protocol;
pub mod sheets;
pub mod tools;
mod util;

pub use backend::{BackendError, SpreadsheetBackend};
pub use protocol::{MCP_PROTOCOL_VERSION, Outcome, Request, Response, RpcError, SERVER_NAME};
pub use sheets::{DEFAULT_API_BASE_URL, SheetsClient};
pub use tools::{ToolCall, ToolName, ToolRegistry};
pub use util::client as http_client;

use util::to_pretty_json;

/// Responses queued between dispatch tasks and the single stdout writer.
const RESPONSE_QUEUE_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to read MCP message: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write MCP response: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to encode MCP response: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("MCP response writer stopped: {0}")]
    Writer(#[source] tokio::task::JoinError),
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Request dispatcher. Holds only read-only state, so one instance can be
/// shared across concurrent dispatch tasks.
pub struct McpServer {
    registry: ToolRegistry,
    backend: Arc<dyn SpreadsheetBackend>,
}

impl McpServer {
    pub fn new(backend: Arc<dyn SpreadsheetBackend>) -> Self {
        Self {
            registry: ToolRegistry::new(),
            backend,
        }
    }

    pub async fn handle_request(&self, request: Request) -> Response {
        let Request {
            id, method, params, ..
        } = request;
        let outcome = match method.as_str() {
            "initialize" => Ok(initialize_payload()),
            "tools/list" => Ok(self.registry.list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "ping" => Ok(json!({})),
            _ => Err(RpcError::method_not_found(&method)),
        };
        Response::from_outcome(id, outcome)
    }

    /// Decode and dispatch one framed line. Malformed lines yield `None`.
    pub async fn handle_line(&self, line: &[u8]) -> Option<Response> {
        match serde_json::from_slice::<Request>(line) {
            Ok(request) => Some(self.handle_request(request).await),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed MCP request line");
                None
            }
        }
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: ToolCallParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(RpcError::invalid_params)?;

        let Some(tool) = ToolName::parse(&params.name) else {
            return Err(RpcError::tool_not_found(&params.name));
        };

        // Argument shape errors share the execution-failure path.
        let call = ToolCall::decode(tool, params.arguments).map_err(|err| {
            tracing::debug!(tool = %tool, error = %err, "invalid tool arguments");
            RpcError::execution_failed(err.to_string())
        })?;

        let result = call.execute(self.backend.as_ref()).await.map_err(|err| {
            tracing::warn!(tool = %tool, context = err.context(), error = %err, "tool call failed");
            RpcError::execution_failed(err.to_string())
        })?;

        tracing::debug!(tool = %tool, "tool call succeeded");
        Ok(json!({
            "content": [{ "type": "text", "text": to_pretty_json(&result) }]
        }))
    }
}

fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Line-delimited JSON-RPC loop. Each request is dispatched on its own task;
/// responses go through one writer task, one JSON object per line. Returns
/// once the reader hits EOF and every in-flight dispatch has answered.
pub async fn serve<R, W>(server: Arc<McpServer>, reader: R, writer: W) -> Result<(), ServeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Response>(RESPONSE_QUEUE_DEPTH);
    let writer_task = tokio::spawn(write_responses(rx, writer));

    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut inflight = JoinSet::new();
    let mut read_result = Ok(());

    loop {
        if writer_task.is_finished() {
            break;
        }
        // Raw bytes: a line that is not UTF-8 is a framing error, not an I/O error.
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                read_result = Err(ServeError::Read(err));
                break;
            }
        }
        let frame = std::mem::take(&mut line);
        if frame.trim_ascii().is_empty() {
            continue;
        }

        let server = Arc::clone(&server);
        let tx = tx.clone();
        inflight.spawn(async move {
            if let Some(response) = server.handle_line(&frame).await {
                // Receiver is gone only when the writer already failed.
                let _ = tx.send(response).await;
            }
        });
        while let Some(done) = inflight.try_join_next() {
            log_dispatch_panic(done);
        }
    }

    while let Some(done) = inflight.join_next().await {
        log_dispatch_panic(done);
    }
    drop(tx);

    let write_result = writer_task.await.map_err(ServeError::Writer)?;
    read_result.and(write_result)
}

/// Serve on the process's stdin/stdout.
pub async fn serve_stdio(server: Arc<McpServer>) -> Result<(), ServeError> {
    tracing::info!(server = SERVER_NAME, "MCP server listening on stdio");
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

async fn write_responses<W>(mut rx: mpsc::Receiver<Response>, mut writer: W) -> Result<(), ServeError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response).map_err(ServeError::Encode)?;
        line.push(b'\n');
        writer.write_all(&line).await.map_err(ServeError::Write)?;
        writer.flush().await.map_err(ServeError::Write)?;
    }
    Ok(())
}

fn log_dispatch_panic(done: Result<(), tokio::task::JoinError>) {
    if let Err(err) = done {
        tracing::error!(error = %err, "request dispatch task failed");
    }
}
