//! Stdio transport for MCP
//!
//! Reads JSON-RPC messages from stdin and writes responses to stdout.
//! Uses line-delimited JSON format. Logs must go to stderr.
//!
//! The process is launched by a host that has already authenticated its user,
//! so every request runs under the single [`TenantScope`] fixed at startup.
//! No bearer token is ever looked at here.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, JsonRpcError, Result};
use crate::identity::TenantScope;
use crate::jsonrpc::JsonRpcService;
use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, JsonRpcResponseMessage,
    McpNotification,
};
use crate::router::McpRouter;

use super::{McpService, scoped_service};

/// Stdio transport for MCP servers
///
/// Supports both single requests and batch requests.
///
/// # Example
///
/// ```rust,no_run
/// use calendar_mcp::McpRouter;
/// use calendar_mcp::identity::{TenantIdentity, TenantScope};
/// use calendar_mcp::transport::StdioTransport;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let scope = TenantScope::from(TenantIdentity::from_header("user0").unwrap());
///     let mut transport = StdioTransport::new(McpRouter::new(), scope);
///     transport.run().await?;
///     Ok(())
/// }
/// ```
pub struct StdioTransport {
    service: JsonRpcService<McpService>,
    router: McpRouter,
}

impl StdioTransport {
    pub fn new(router: McpRouter, scope: TenantScope) -> Self {
        let service = scoped_service(router.clone(), scope);
        Self { service, router }
    }

    /// Run over the process's stdin and stdout until EOF.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Process line-delimited messages from `reader` until EOF, writing one
    /// line per response to `writer`.
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        tracing::info!("Stdio transport started, waiting for input");

        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Transport(format!("Failed to read from stdin: {}", e)))?;

            if bytes_read == 0 {
                tracing::info!("Stdin closed, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            tracing::debug!(bytes = trimmed.len(), "Received message");

            let output = match self.process_line(trimmed).await {
                Ok(Some(response)) => serde_json::to_string(&response)?,
                // Notification, no response needed
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Error processing message");
                    let error_response =
                        JsonRpcResponse::error(None, JsonRpcError::parse_error(e.to_string()));
                    serde_json::to_string(&error_response)?
                }
            };

            write_line(&mut writer, &output).await?;
        }

        Ok(())
    }

    async fn process_line(&mut self, line: &str) -> Result<Option<JsonRpcResponseMessage>> {
        let parsed: serde_json::Value = serde_json::from_str(line)?;
        if parsed.get("id").is_none()
            && let Ok(notification) = serde_json::from_value::<JsonRpcNotification>(parsed.clone())
        {
            let notification = McpNotification::from_jsonrpc(&notification)?;
            self.router.handle_notification(notification);
            return Ok(None);
        }

        let message: JsonRpcMessage = serde_json::from_value(parsed)?;
        Ok(Some(self.service.call_message(message).await))
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::Transport(format!("Failed to write to stdout: {}", e)))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| Error::Transport(format!("Failed to write newline: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("Failed to flush stdout: {}", e)))
}
