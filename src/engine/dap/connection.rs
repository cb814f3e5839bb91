use super::transport::write_message;
use anyhow::{anyhow, bail};
use log::{debug, trace};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;

pub(super) type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of a connection to a debug adapter, with responses routed back to their requests.
pub(super) struct AdapterConnection {
    writer: tokio::sync::Mutex<Writer>,
    seq: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
}

impl AdapterConnection {
    pub(super) fn new(writer: Writer) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            seq: AtomicI64::new(1),
            pending: Mutex::default(),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<i64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn write(&self, message: &Value) -> anyhow::Result<()> {
        trace!(target: "engine", "-> {message}");
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, message).await
    }

    /// Send a request, the receiver resolves with the raw response.
    pub(super) async fn send(
        &self,
        command: &str,
        arguments: Value,
    ) -> anyhow::Result<oneshot::Receiver<Value>> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(seq, tx);

        let request = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        if let Err(e) = self.write(&request).await {
            self.pending().remove(&seq);
            return Err(e);
        }
        Ok(rx)
    }

    /// Send a request and wait for the body of a successful response.
    pub(super) async fn request(&self, command: &str, arguments: Value) -> anyhow::Result<Value> {
        let rx = self.send(command, arguments).await?;
        let response = rx
            .await
            .map_err(|_| anyhow!("adapter closed the connection before answering `{command}`"))?;
        response_body(command, response)
    }

    /// Answer a reverse request of the adapter.
    pub(super) async fn respond(
        &self,
        request: &Value,
        result: Result<Value, String>,
    ) -> anyhow::Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut response = json!({
            "seq": seq,
            "type": "response",
            "request_seq": request["seq"],
            "command": request["command"],
        });
        match result {
            Ok(body) => {
                response["success"] = json!(true);
                response["body"] = body;
            }
            Err(message) => {
                response["success"] = json!(false);
                response["message"] = json!(message);
            }
        }
        self.write(&response).await
    }

    /// Route a response to the waiting request.
    pub(super) fn complete(&self, response: Value) {
        let Some(seq) = response.get("request_seq").and_then(Value::as_i64) else {
            debug!(target: "engine", "response without request_seq: {response}");
            return;
        };
        match self.pending().remove(&seq) {
            Some(tx) => _ = tx.send(response),
            None => debug!(target: "engine", "unexpected response for request {seq}"),
        }
    }

    /// Fail all outstanding requests.
    pub(super) fn close(&self) {
        self.pending().clear();
    }

    pub(super) async fn shutdown(&self) {
        use tokio::io::AsyncWriteExt;
        let mut writer = self.writer.lock().await;
        _ = writer.shutdown().await;
    }
}

pub(super) fn response_body(command: &str, response: Value) -> anyhow::Result<Value> {
    if response.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(response.get("body").cloned().unwrap_or(Value::Null));
    }

    let message = response["body"]["error"]["format"]
        .as_str()
        .or_else(|| response["message"].as_str())
        .unwrap_or("unknown error");
    bail!("`{command}` failed: {message}")
}
