//! HTTP transport of the tool surface.
//!
//! One endpoint path, `/mcp`, serves two flows:
//!
//! * single-shot: `POST /mcp` with a JSON-RPC message, the response is the HTTP body;
//! * streaming: `GET /mcp` opens a server-sent-events stream whose first `endpoint` event names
//!   the connection (`/mcp?sessionId=<id>`). Messages posted with that id (query parameter or
//!   `Mcp-Session-Id` header) are accepted with `202` and answered on the stream.
//!
//! Tool calls are spawned, so a client that goes away does not cancel a call already queued for
//! the debuggee; its answer is dropped instead.

mod connection;
pub mod protocol;

pub use connection::Connections;

use crate::error::Error;
use crate::tools::Tools;
use crate::tracer::FileTracer;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use log::{debug, info, warn};
use protocol::{RpcResponse, INTERNAL_ERROR};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

pub const MCP_SESSION_ID: &str = "mcp-session-id";

#[derive(Clone)]
struct AppState {
    tools: Arc<Tools>,
    connections: Connections,
    rpc_tracer: Option<FileTracer>,
}

impl AppState {
    fn trace(&self, connection: &str, direction: &str, message: &Value) {
        if let Some(tracer) = &self.rpc_tracer {
            tracer.rpc(connection, direction, message);
        }
    }
}

pub struct Server {
    state: AppState,
}

impl Server {
    /// Create server, with `rpc_tracer` every JSON-RPC message is written to the trace file.
    pub fn new(tools: Arc<Tools>, rpc_tracer: Option<FileTracer>) -> Self {
        Self {
            state: AppState {
                tools,
                connections: Connections::default(),
                rpc_tracer,
            },
        }
    }

    pub fn connections(&self) -> &Connections {
        &self.state.connections
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp", get(open_stream).post(post_message).delete(close_stream))
            .route("/health", get(health))
            .layer(cors())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then close every open stream and release the listener.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(target: "server", "listening on http://{addr}/mcp");
        }

        let connections = self.state.connections.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = connections.close_all();
                info!(target: "server", "shutting down, {closed} stream(s) closed");
            })
            .await?;
        Ok(())
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static(MCP_SESSION_ID),
        ])
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)])
}

#[derive(Debug, Default, Deserialize)]
struct ConnectionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

fn correlation_id(query: ConnectionQuery, headers: &HeaderMap) -> Option<String> {
    query.session_id.or_else(|| {
        headers
            .get(MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    })
}

fn unknown_connection(raw: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown connection `{raw}`") })),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.connections.len(),
        "sessions": state.tools.registry().len(),
    }))
}

async fn open_stream(State(state): State<AppState>) -> impl IntoResponse {
    let (id, rx) = state.connections.open();
    info!(target: "server", "stream {id} opened");

    let guard = state.connections.guard(id);
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/mcp?sessionId={id}"));
    let messages = UnboundedReceiverStream::new(rx).map(move |message: Value| {
        let _guard = &guard;
        Ok::<_, Infallible>(Event::default().event("message").data(message.to_string()))
    });
    let stream = futures::stream::once(async move { Ok(endpoint) }).chain(messages);

    (
        [(HeaderName::from_static(MCP_SESSION_ID), id.to_string())],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
}

async fn close_stream(
    State(state): State<AppState>,
    Query(query): Query<ConnectionQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(raw) = correlation_id(query, &headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing sessionId" })),
        )
            .into_response();
    };

    match Uuid::parse_str(&raw) {
        Ok(id) if state.connections.close(&id) => {
            info!(target: "server", "stream {id} closed by client");
            StatusCode::NO_CONTENT.into_response()
        }
        _ => unknown_connection(&raw),
    }
}

async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<ConnectionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = match correlation_id(query, &headers) {
        Some(raw) => match Uuid::parse_str(&raw)
            .ok()
            .filter(|id| state.connections.contains(id))
        {
            Some(id) => Some(id),
            None => {
                debug!(target: "server", "message for unknown connection {raw}");
                return unknown_connection(&raw);
            }
        },
        None => None,
    };
    let label = target
        .map(|id| id.to_string())
        .unwrap_or_else(|| "inline".to_string());

    let request = match protocol::parse_request(&body) {
        Ok(request) => request,
        Err(response) => {
            warn!(target: "server", "malformed message on {label}");
            let response = response.to_value();
            state.trace(&label, "->", &response);
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };
    state.trace(
        &label,
        "<-",
        &json!({ "id": request.id, "method": request.method, "params": request.params }),
    );

    let request_id = request.id.clone().unwrap_or(Value::Null);
    let handler_state = state.clone();
    let task = tokio::spawn(async move { protocol::handle(&handler_state.tools, request).await });

    match target {
        Some(id) => {
            tokio::spawn(async move {
                let response = match task.await {
                    Ok(Some(response)) => response,
                    Ok(None) => return,
                    Err(e) => internal_error(request_id, e),
                };
                let response = response.to_value();
                state.trace(&label, "->", &response);
                if !state.connections.send(&id, response) {
                    debug!(target: "server", "stream {id} is gone, response dropped");
                }
            });
            StatusCode::ACCEPTED.into_response()
        }
        None => match task.await {
            Ok(Some(response)) => {
                let response = response.to_value();
                state.trace(&label, "->", &response);
                Json(response).into_response()
            }
            Ok(None) => StatusCode::ACCEPTED.into_response(),
            Err(e) => {
                let response = internal_error(request_id, e).to_value();
                state.trace(&label, "->", &response);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
            }
        },
    }
}

fn internal_error(id: Value, e: tokio::task::JoinError) -> RpcResponse {
    warn!(target: "server", "message handler failed: {e}");
    RpcResponse::failure(
        id,
        INTERNAL_ERROR,
        Error::TransportInternalError(e.to_string()).to_string(),
    )
}
