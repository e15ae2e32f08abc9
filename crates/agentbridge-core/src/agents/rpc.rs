//! JSON-RPC request/response correlation over line-delimited stdio.
//!
//! Used by the Codex app-server and Copilot ACP adapters. Requests get
//! monotonically increasing integer ids and a pending entry; the adapter
//! offers every incoming line to [`RpcCorrelator::handle_line`], which
//! consumes responses (an `id` without a `method`) and leaves everything
//! else to the protocol's event path.
//!
//! The two dialects are not interchangeable: ACP requires `"jsonrpc":"2.0"`
//! on every message, the Codex app-server expects it to be absent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::error::AgentError;
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcDialect {
    /// No `jsonrpc` member (Codex app-server).
    Bare,
    /// `"jsonrpc":"2.0"` on every message (ACP).
    JsonRpc2,
}

/// Why a pending request did not get a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcFailure {
    Remote { code: i64, message: String },
    Closed(String),
}

impl RpcFailure {
    pub fn message(&self) -> &str {
        match self {
            RpcFailure::Remote { message, .. } | RpcFailure::Closed(message) => message,
        }
    }
}

type Settle = Sender<Result<Value, RpcFailure>>;

/// A request on the wire whose response has not been consumed yet.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: u64,
    pub method: String,
    receiver: Receiver<Result<Value, RpcFailure>>,
}

pub struct RpcCorrelator {
    dialect: RpcDialect,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, (String, Settle)>>,
}

/// Purely numeric string ids are echoed back as numbers.
pub fn coerce_id(id: &str) -> Value {
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = id.parse::<u64>() {
            return Value::from(n);
        }
    }
    Value::String(id.to_string())
}

/// Render a JSON-RPC id (number or string) as the opaque string events carry.
pub fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl RpcCorrelator {
    pub fn new(dialect: RpcDialect) -> Self {
        Self {
            dialect,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> RpcDialect {
        self.dialect
    }

    fn envelope(&self, fields: Vec<(&str, Value)>) -> String {
        let mut map = Map::new();
        if self.dialect == RpcDialect::JsonRpc2 {
            map.insert("jsonrpc".to_string(), json!("2.0"));
        }
        for (key, value) in fields {
            map.insert(key.to_string(), value);
        }
        Value::Object(map).to_string()
    }

    /// Register a request and write it with `write`. If the write fails the
    /// entry is dropped again and the error returned.
    pub fn send_request<W>(
        &self,
        method: &str,
        params: Value,
        write: W,
    ) -> Result<PendingRequest, AgentError>
    where
        W: FnOnce(&str) -> Result<(), AgentError>,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        lock(&self.pending).insert(id, (method.to_string(), tx));

        let line = self.envelope(vec![
            ("id", json!(id)),
            ("method", json!(method)),
            ("params", params),
        ]);
        if let Err(err) = write(&line) {
            lock(&self.pending).remove(&id);
            return Err(err);
        }
        Ok(PendingRequest {
            id,
            method: method.to_string(),
            receiver: rx,
        })
    }

    /// Block until `request` settles. A timeout drops the pending entry so a
    /// late response is ignored.
    pub fn wait(&self, request: PendingRequest, timeout: Duration) -> Result<Value, AgentError> {
        match request.receiver.recv_timeout(timeout) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(failure)) => Err(AgentError::rejected(&request.method, failure.message())),
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.pending).remove(&request.id);
                Err(AgentError::Timeout(request.method))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AgentError::rejected(
                &request.method,
                "request dropped without a response",
            )),
        }
    }

    /// `send_request` followed by `wait`.
    pub fn call<W>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        write: W,
    ) -> Result<Value, AgentError>
    where
        W: FnOnce(&str) -> Result<(), AgentError>,
    {
        let pending = self.send_request(method, params, write)?;
        self.wait(pending, timeout)
    }

    pub fn notification(&self, method: &str, params: Value) -> String {
        self.envelope(vec![("method", json!(method)), ("params", params)])
    }

    /// Reply to a server-initiated request. `id` is echoed as given.
    pub fn response(&self, id: Value, result: Value) -> String {
        self.envelope(vec![("id", id), ("result", result)])
    }

    pub fn error_response(&self, id: Value, code: i64, message: &str) -> String {
        self.envelope(vec![
            ("id", id),
            ("error", json!({"code": code, "message": message})),
        ])
    }

    /// Offer a line from the server. Returns `true` if it was a response and
    /// has been consumed; notifications, server requests and non-JSON lines
    /// return `false`.
    pub fn handle_line(&self, line: &str) -> bool {
        let Ok(Value::Object(message)) = serde_json::from_str::<Value>(line) else {
            return false;
        };
        if message.contains_key("method") {
            return false;
        }
        let Some(id) = message.get("id") else {
            return false;
        };
        let Some(id) = numeric_id(id) else {
            log::debug!("response with non-numeric id ignored: {line}");
            return true;
        };

        let Some((method, settle)) = lock(&self.pending).remove(&id) else {
            log::debug!("response for unknown request {id} ignored");
            return true;
        };

        let outcome = match message.get("error") {
            Some(error) if !error.is_null() => Err(RpcFailure::Remote {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        if let Err(failure) = &outcome {
            log::warn!("`{method}` (id {id}) rejected: {}", failure.message());
        }
        let _ = settle.send(outcome);
        true
    }

    /// Settle every outstanding request with a failure. Used on teardown.
    pub fn reject_all(&self, reason: &str) {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        for (id, (method, settle)) in drained {
            log::debug!("rejecting pending `{method}` (id {id}): {reason}");
            let _ = settle.send(Err(RpcFailure::Closed(reason.to_string())));
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}
