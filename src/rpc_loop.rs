//! Stdio JSON-RPC loop (§4.1): newline-delimited request/response framing
//! over stdin/stdout, dispatching `initialize`/`tools/list`/`tools/call`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::dispatcher::{Dispatcher, WriteArgs};
use crate::protocol::{
    CallToolParams, CallToolResult, Content, Info, InitializeResult, ListToolsResult,
    JsonRpcResponse, RequestId, ServerCapabilities, Tool, ToolsCapability,
};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RequestId>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

fn is_notification_method(method: &str) -> bool {
    matches!(method, "initialized" | "notifications/initialized")
}

/// Owns the `initialize`/`tools/list` responses and routes `tools/call` to a [`Dispatcher`]
pub struct RpcLoop {
    dispatcher: Arc<Dispatcher>,
    server_info: Info,
    instructions: String,
}

impl RpcLoop {
    /// Build a loop around `dispatcher`, reporting `server_info` in `initialize`
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, server_info: Info, instructions: String) -> Self {
        Self {
            dispatcher,
            server_info,
            instructions,
        }
    }

    fn write_tool_schema() -> Tool {
        Tool {
            name: "write".to_string(),
            title: Some("Write generated code".to_string()),
            description: Some(
                "Generate code for a natural-language instruction and write it to a file, \
                 with optional syntax validation and restore-previous support."
                    .to_string(),
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Absolute destination path"},
                    "prompt": {"type": "string", "description": "Natural-language instruction"},
                    "context_files": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Paths whose contents are concatenated into the generation context"
                    },
                    "write_only": {"type": "boolean", "default": false},
                    "validate": {"type": "boolean", "default": false},
                    "restore_previous": {"type": "boolean", "default": false}
                },
                "required": ["file_path"]
            }),
        }
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: crate::MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                experimental: None,
            },
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        }
    }

    fn list_tools_result(&self) -> ListToolsResult {
        ListToolsResult {
            tools: vec![Self::write_tool_schema()],
        }
    }

    async fn handle_tools_call(&self, params: Option<Value>, cancel: CancellationToken) -> Result<CallToolResult> {
        let params: CallToolParams = params
            .ok_or_else(|| Error::Client("tools/call requires params".to_string()))
            .and_then(|v| serde_json::from_value(v).map_err(|e| Error::Client(e.to_string())))?;

        if params.name != "write" {
            return Err(Error::Client(format!("unknown tool: {}", params.name)));
        }

        let args: WriteArgs = serde_json::from_value(params.arguments)
            .map_err(|e| Error::Client(format!("invalid arguments: {e}")))?;

        match self.dispatcher.handle_write(args, cancel).await {
            Ok(outcome) => {
                let mut text = outcome.message;
                if let Some(diff) = outcome.diff {
                    text.push_str("\n\n");
                    text.push_str(&diff);
                }
                Ok(CallToolResult {
                    content: vec![Content::text(text)],
                    is_error: false,
                })
            }
            Err(Error::Client(message)) => Err(Error::Client(message)),
            Err(e) => Ok(CallToolResult {
                content: vec![Content::text(e.to_string())],
                is_error: true,
            }),
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>, cancel: CancellationToken) -> Result<Value> {
        match method {
            "initialize" => serde_json::to_value(self.initialize_result()).map_err(Error::from),
            "tools/list" => serde_json::to_value(self.list_tools_result()).map_err(Error::from),
            "tools/call" => self
                .handle_tools_call(params, cancel)
                .await
                .and_then(|r| serde_json::to_value(r).map_err(Error::from)),
            other => Err(Error::Client(format!("unknown method: {other}"))),
        }
    }

    /// Run the loop until stdin closes, a parse failure occurs, or `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let stdout = Arc::new(AsyncMutex::new(tokio::io::stdout()));

        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("rpc loop cancelled");
                    return Ok(());
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                debug!("stdin closed, exiting rpc loop");
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: RawMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    error!(error = %e, "malformed JSON-RPC input, terminating");
                    return Ok(());
                }
            };

            if is_notification_method(&message.method) {
                continue;
            }

            let id = message.id.clone();
            let outcome = self.dispatch(&message.method, message.params, cancel.clone()).await;

            let Some(id) = id else {
                if let Err(e) = outcome {
                    debug!(error = %e, "notification-style call failed, nothing to report");
                }
                continue;
            };

            let response = match outcome {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string()),
            };

            let mut body = serde_json::to_string(&response)?;
            body.push('\n');
            let mut stdout = stdout.lock().await;
            stdout.write_all(body.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_and_notification_methods_are_recognized() {
        assert!(is_notification_method("initialized"));
        assert!(is_notification_method("notifications/initialized"));
        assert!(!is_notification_method("initialize"));
        assert!(!is_notification_method("tools/call"));
    }

    #[test]
    fn write_tool_schema_requires_file_path() {
        let tool = RpcLoop::write_tool_schema();
        assert_eq!(tool.name, "write");
        assert_eq!(tool.input_schema["required"][0], "file_path");
    }

    fn rpc_loop_with(content: &str) -> RpcLoop {
        use crate::config::{AppConfig, ProviderConfig};
        use crate::health::HealthMonitor;
        use crate::metrics::MetricsTracker;
        use crate::provider::stub::StubProvider;
        use crate::random::FixedRandomSource;
        use crate::validator::NoopValidator;
        use std::collections::HashMap;
        use std::sync::Arc;

        let provider: Arc<dyn crate::provider::Provider> = Arc::new(StubProvider::succeeding("stub", content));
        let mut providers: HashMap<String, Arc<dyn crate::provider::Provider>> = HashMap::new();
        providers.insert("stub".to_string(), provider);

        let mut config = AppConfig::default();
        config.providers.insert(
            "stub".to_string(),
            ProviderConfig {
                api_keys: vec!["k".to_string()],
                default_model: "stub-model".to_string(),
                ..ProviderConfig::default()
            },
        );
        config.router.order = vec!["stub".to_string()];
        config.server.name = "mcp-code-api".to_string();

        let router = Arc::new(crate::router::Router::new(
            &config,
            providers,
            Arc::new(MetricsTracker::new()),
            Arc::new(HealthMonitor::new(3)),
            Arc::new(FixedRandomSource(0)),
        ));
        let dispatcher = Arc::new(Dispatcher::new(router, Arc::new(NoopValidator)));

        RpcLoop::new(
            dispatcher,
            Info {
                name: config.server.name.clone(),
                version: "0.1.0".to_string(),
            },
            "use the write tool".to_string(),
        )
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version_and_server_name() {
        let rpc = rpc_loop_with("unused");
        let result = rpc.dispatch("initialize", None, CancellationToken::new()).await.unwrap();
        assert_eq!(result["protocolVersion"], crate::MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "mcp-code-api");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_returns_one_write_tool() {
        let rpc = rpc_loop_with("unused");
        let result = rpc.dispatch("tools/list", None, CancellationToken::new()).await.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "write");
    }

    #[tokio::test]
    async fn tools_call_write_only_round_trips_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        let rpc = rpc_loop_with("print('ok')\n");

        let params = serde_json::json!({
            "name": "write",
            "arguments": {
                "file_path": path.to_string_lossy(),
                "prompt": "hello",
                "write_only": true
            }
        });
        let result = rpc.dispatch("tools/call", Some(params), CancellationToken::new()).await.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print('ok')\n");
    }

    #[tokio::test]
    async fn unknown_method_is_a_client_error() {
        let rpc = rpc_loop_with("unused");
        let err = rpc.dispatch("nonexistent", None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Client(_)));
        assert_eq!(err.to_rpc_code(), -1);
    }
}
