use crate::common::{setup, ScriptedEngine};
use axum::body::Bytes;
use dapmux::server::Server;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use serial_test::serial;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    base: String,
    server: Arc<Server>,
    stop: Option<oneshot::Sender<()>>,
    client: Client,
}

impl TestServer {
    async fn start() -> Self {
        let engine = ScriptedEngine::new();
        let (_, tools) = setup(engine, &["app"]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = Arc::new(Server::new(Arc::new(tools), None));
        let (stop, stop_rx) = oneshot::channel::<()>();

        let serving = server.clone();
        tokio::spawn(async move {
            serving
                .serve(listener, async move {
                    _ = stop_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            base,
            server,
            stop: Some(stop),
            client: Client::new(),
        }
    }

    async fn rpc(&self, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}/mcp", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let text = response.text().await.unwrap();
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };
        (status, value)
    }

    async fn open_stream(&self) -> (String, EventReader) {
        let response = self
            .client
            .get(format!("{}/mcp", self.base))
            .header("accept", "text/event-stream")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()["mcp-session-id"]
            .to_str()
            .unwrap()
            .to_string();

        let mut events = EventReader {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        };
        let (event, endpoint) = events.next().await.unwrap();
        assert_eq!(event, "endpoint");
        assert_eq!(endpoint, format!("/mcp?sessionId={id}"));
        (id, events)
    }
}

struct EventReader {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
}

impl EventReader {
    /// Next `(event, data)` pair, `None` once the stream ends.
    async fn next(&mut self) -> Option<(String, String)> {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..pos + 2).collect();
                let mut event = "message".to_string();
                let mut data = String::new();
                for line in block.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        event = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push_str(v.trim_start());
                    }
                }
                if data.is_empty() {
                    // keep-alive comment
                    continue;
                }
                return Some((event, data));
            }

            let chunk = tokio::time::timeout(READ_TIMEOUT, self.stream.next())
                .await
                .expect("no server-sent event in time")?
                .unwrap();
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    async fn message(&mut self) -> Value {
        let (event, data) = self.next().await.unwrap();
        assert_eq!(event, "message");
        serde_json::from_str(&data).unwrap()
    }
}

#[tokio::test]
#[serial]
async fn test_single_shot_requests() {
    let server = TestServer::start().await;

    let (status, response) = server
        .rpc(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": { "protocolVersion": "2025-03-26" } }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "dapmux");
    assert_eq!(response["result"]["protocolVersion"], "2025-03-26");

    let (status, response) = server
        .rpc(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response, Value::Null);

    let (_, response) = server
        .rpc(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await;
    assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 24);

    let (_, response) = server
        .rpc(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "get_debug_state", "arguments": {} },
        }))
        .await;
    let result = &response["result"];
    assert_eq!(result["isError"], false);
    assert_eq!(result["content"][0]["type"], "text");
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("no_active_session"));

    let (_, response) = server
        .rpc(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": { "name": "stop_debug" },
        }))
        .await;
    assert_eq!(response["result"]["isError"], true);
    assert_eq!(response["result"]["content"][0]["text"], "no active debug session");

    let (_, response) = server
        .rpc(json!({ "jsonrpc": "2.0", "id": 5, "method": "resources/list" }))
        .await;
    assert_eq!(response["error"]["code"], -32601);

    let (_, response) = server
        .rpc(json!({ "jsonrpc": "2.0", "id": 6, "method": "tools/call", "params": {} }))
        .await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
#[serial]
async fn test_malformed_body() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(format!("{}/mcp", server.base))
        .header("content-type", "application/json")
        .body("{\"jsonrpc\": \"2.0\", \"id\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], Value::Null);
    assert_eq!(body["error"]["code"], -32603);
}

#[tokio::test]
#[serial]
async fn test_unknown_connection_rejected() {
    let server = TestServer::start().await;
    let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });

    let response = server
        .client
        .post(format!(
            "{}/mcp?sessionId=6f1e3c52-1d5a-4b8e-9d0a-3c2b1a0f9e8d",
            server.base
        ))
        .json(&ping)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .client
        .post(format!("{}/mcp", server.base))
        .header("mcp-session-id", "not-a-connection")
        .json(&ping)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .client
        .delete(format!("{}/mcp?sessionId=nope", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
async fn test_streaming_connection() {
    let server = TestServer::start().await;
    let (id, mut events) = server.open_stream().await;
    assert_eq!(server.server.connections().len(), 1);

    let response = server
        .client
        .post(format!("{}/mcp?sessionId={id}", server.base))
        .json(&json!({ "jsonrpc": "2.0", "id": 7, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let message = events.message().await;
    assert_eq!(message, json!({ "jsonrpc": "2.0", "id": 7, "result": {} }));

    let response = server
        .client
        .post(format!("{}/mcp", server.base))
        .header("mcp-session-id", &id)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "tools/call",
            "params": { "name": "list_debug_configurations" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let message = events.message().await;
    assert_eq!(message["id"], "call-1");
    assert!(message["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("\"app\""));

    let health: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);

    let response = server
        .client
        .delete(format!("{}/mcp?sessionId={id}", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(events.next().await.is_none());

    let response = server
        .client
        .post(format!("{}/mcp?sessionId={id}", server.base))
        .json(&json!({ "jsonrpc": "2.0", "id": 8, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
async fn test_cors_headers() {
    let server = TestServer::start().await;

    let response = server
        .client
        .request(reqwest::Method::OPTIONS, format!("{}/mcp", server.base))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type,mcp-session-id")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    let allowed = headers["access-control-allow-headers"].to_str().unwrap();
    assert!(allowed.contains("mcp-session-id"));
    let methods = headers["access-control-allow-methods"].to_str().unwrap();
    assert!(methods.contains("DELETE"));

    let response = server
        .client
        .get(format!("{}/health", server.base))
        .header("origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response.headers()["access-control-expose-headers"]
        .to_str()
        .unwrap()
        .contains("mcp-session-id"));
}

#[tokio::test]
#[serial]
async fn test_shutdown_closes_streams() {
    let mut server = TestServer::start().await;
    let (_, mut events) = server.open_stream().await;

    server.stop.take().unwrap().send(()).unwrap();
    assert!(events.next().await.is_none());
    assert!(server.server.connections().is_empty());
}
