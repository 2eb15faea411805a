// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Minimal DevTools protocol client over a websocket
//!
//! A reader task routes command responses to their waiting callers by id and
//! forwards every event to a single channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::errors::{ExtractError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;

/// Outgoing command
#[derive(Debug, Clone, Serialize)]
struct CdpCommand<'a> {
    id: u64,
    method: &'a str,
    params: Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// Anything the browser sends: a response when `id` is set, else an event
#[derive(Debug, Clone, Deserialize)]
struct CdpIncoming {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<Value>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Event pushed by the browser
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone)]
pub struct CdpConnection {
    sink: Arc<Mutex<WsSink>>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
    call_timeout: Duration,
    reader: Arc<JoinHandle<()>>,
}

impl std::fmt::Debug for CdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpConnection")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

fn browser_error(what: impl std::fmt::Display) -> ExtractError {
    ExtractError::TransientIo(format!("browser: {}", what))
}

impl CdpConnection {
    /// Connect to a `ws://127.0.0.1:<port>/devtools/browser/<id>` endpoint
    pub async fn connect(
        ws_url: &str,
        call_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CdpEvent>)> {
        let (stream, _) = connect_async(ws_url).await.map_err(browser_error)?;
        let (sink, mut source) = stream.split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "devtools socket closed");
                        break;
                    }
                };
                let incoming: CdpIncoming = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "unparseable devtools message");
                        continue;
                    }
                };
                if let Some(id) = incoming.id {
                    if let Some(waiter) = reader_pending.lock().await.remove(&id) {
                        let outcome = match incoming.error {
                            Some(err) => Err(err["message"].as_str().unwrap_or("error").to_string()),
                            None => Ok(incoming.result.unwrap_or(Value::Null)),
                        };
                        let _ = waiter.send(outcome);
                    }
                } else if let Some(method) = incoming.method {
                    let _ = event_tx.send(CdpEvent {
                        method,
                        params: incoming.params,
                        session_id: incoming.session_id,
                    });
                }
            }
            // Wake every caller still waiting on a dead socket.
            reader_pending.lock().await.clear();
        });

        Ok((
            Self {
                sink: Arc::new(Mutex::new(sink)),
                pending,
                next_id: Arc::new(AtomicU64::new(1)),
                call_timeout,
                reader: Arc::new(reader),
            },
            event_rx,
        ))
    }

    /// Send one command and wait for its response
    pub async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_string(&CdpCommand {
            id,
            method,
            params,
            session_id,
        })
        .map_err(|e| ExtractError::Internal(format!("devtools command: {}", e)))?;
        if let Err(e) = self.sink.lock().await.send(Message::Text(frame)).await {
            self.pending.lock().await.remove(&id);
            return Err(browser_error(e));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(browser_error(format!("{} failed: {}", method, message))),
            Ok(Err(_)) => Err(browser_error("connection closed")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ExtractError::Timeout(format!("browser command {} timed out", method)))
            }
        }
    }

    /// Evaluate an expression in a page session and return its value
    pub async fn evaluate(&self, session_id: &str, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
                Some(session_id),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(browser_error(format!(
                "script error: {}",
                details["text"].as_str().unwrap_or("unknown")
            )));
        }
        Ok(result["result"]["value"].clone())
    }

    pub fn close(&self) {
        self.reader.abort();
    }
}
