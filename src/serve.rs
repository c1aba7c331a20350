//! Line-delimited JSON front end.
//!
//! Each input line is a request object:
//!
//! ```text
//! {"id": 1, "purpose": "evaluate", "text": "```bash\necho hi\n```", "caller": "alice"}
//! ```
//!
//! and produces exactly one output line, written when that request finishes:
//!
//! ```text
//! {"id": 1, "reply": "```\nhi\n```\n*no stderr*"}
//! ```
//!
//! Requests run concurrently, so replies arrive in completion order. Lines
//! that are not valid requests get `{"id": null, "error": "..."}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::service::{Request, Service};

/// A request line.
#[derive(Debug, Clone, Deserialize)]
pub struct ServeRequest {
    /// Opaque correlation id, echoed back verbatim.
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub request: Request,
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeResponse {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServeResponse {
    fn reply(id: Value, reply: String) -> Self {
        Self {
            id,
            reply: Some(reply),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            id: Value::Null,
            reply: None,
            error: Some(message),
        }
    }
}

/// Serve requests from `input` until EOF, then wait for in-flight ones.
///
/// A failed read stops intake but in-flight requests still get replies.
pub async fn serve<R, W>(service: Service, input: R, output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<ServeResponse>();
    let writer = tokio::spawn(write_responses(rx, output));
    let mut workers = JoinSet::new();

    let mut input = input;
    let mut raw = Vec::new();
    let mut read_error = None;
    loop {
        raw.clear();
        match input.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to read request stream: {}", e);
                read_error = Some(e);
                break;
            }
        }
        let line = match std::str::from_utf8(&raw) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Rejected non UTF-8 request line: {}", e);
                let _ = tx.send(ServeResponse::error(format!("invalid request: {e}")));
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let ServeRequest { id, request } = match serde_json::from_str::<ServeRequest>(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Rejected request line: {}", e);
                let _ = tx.send(ServeResponse::error(format!("invalid request: {e}")));
                continue;
            }
        };

        tracing::info!("Request {} ({}) from {}", id, request.purpose, request.caller);
        let service = service.clone();
        let tx = tx.clone();
        workers.spawn(async move {
            let reply = service.dispatch(request).await;
            let _ = tx.send(ServeResponse::reply(id, reply));
        });
    }

    tracing::debug!("Input closed, waiting for {} in-flight requests", workers.len());
    while workers.join_next().await.is_some() {}
    drop(tx);

    let written = match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    };
    match read_error {
        Some(e) => Err(e),
        None => written,
    }
}

async fn write_responses<W>(
    mut rx: mpsc::UnboundedReceiver<ServeResponse>,
    mut output: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    output.shutdown().await
}
