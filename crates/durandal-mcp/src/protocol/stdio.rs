//! stdio Transport for MCP
//!
//! Line-delimited JSON-RPC over stdin/stdout. A single reader multiplexes
//! frames out to handler tasks, which may run in parallel; a single writer
//! task serializes responses back onto stdout, so a response line is always
//! written whole. stderr is left to the logger.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

/// Bounded time to let in-flight handlers finish after shutdown begins.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Last-resort response when even error serialization fails.
const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// stdio transport for the MCP server.
pub struct StdioTransport {
    shutdown: watch::Receiver<bool>,
}

impl StdioTransport {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self { shutdown }
    }

    /// Run until stdin closes or shutdown is signalled.
    pub async fn run(mut self, server: Arc<McpServer>) -> io::Result<()> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        // Single writer: responses arrive here from handler tasks.
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = rx.recv().await {
                debug!(bytes = line.len(), "sending response");
                if stdout.write_all(line.as_bytes()).await.is_err()
                    || stdout.write_all(b"\n").await.is_err()
                {
                    break;
                }
                let _ = stdout.flush().await;
            }
        });

        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!("shutdown signalled; no longer accepting frames");
                        break;
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            debug!(bytes = line.len(), "received frame");
                            self.dispatch_line(line, &server, &tx, &mut handlers);
                        }
                        Ok(None) => {
                            debug!("stdin closed");
                            break;
                        }
                        Err(e) => {
                            error!("failed to read frame: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        // Give in-flight handlers a bounded window; partial work that misses
        // it is abandoned (its store writes may still land, its response is
        // discarded).
        let drain = async {
            while handlers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("in-flight handlers did not finish in time; aborting them");
            handlers.shutdown().await;
        }

        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    fn dispatch_line(
        &self,
        line: String,
        server: &Arc<McpServer>,
        tx: &mpsc::Sender<String>,
        handlers: &mut JoinSet<()>,
    ) {
        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("unparsable frame: {}", e);
                let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                send_response(tx.clone(), response);
                return;
            }
        };

        let server = Arc::clone(server);
        let tx = tx.clone();
        handlers.spawn(async move {
            if let Some(response) = server.handle_request(request).await {
                send_response(tx, response);
            }
        });
    }
}

fn send_response(tx: mpsc::Sender<String>, response: JsonRpcResponse) {
    let line = serde_json::to_string(&response).unwrap_or_else(|e| {
        error!("failed to serialize response: {}", e);
        FALLBACK_ERROR.to_string()
    });
    // The writer only disappears at shutdown; a failed send means the
    // response has nowhere to go anyway.
    tokio::spawn(async move {
        let _ = tx.send(line).await;
    });
}
