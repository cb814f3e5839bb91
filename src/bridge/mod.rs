//! Protocol bridge: turns a loosely targeted tool call into a request against one concrete
//! session, thread and frame.

mod resolve;

pub use resolve::{FrameStrategy, FrameTarget};

use crate::engine::{DebugEngine, FrameId, SessionId, StepKind, ThreadId};
use crate::error::{Error, Result};
use crate::session::SessionRegistry;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// Stack frames requested per stack trace.
pub const STACK_TRACE_LEVELS: i64 = 50;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StackFrame {
    pub id: FrameId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: i64,
    pub column: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    #[serde(default)]
    pub expensive: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Handle for lazily fetching nested values, zero for leaves.
    #[serde(default)]
    pub variables_reference: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLocation {
    pub thread_id: ThreadId,
    pub thread_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: i64,
    pub column: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

/// Context an expression is evaluated in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EvalContext {
    Watch,
    #[default]
    Repl,
    Hover,
}

#[derive(Deserialize)]
struct RawSource {
    path: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawStackFrame {
    id: FrameId,
    name: String,
    source: Option<RawSource>,
    #[serde(default)]
    line: i64,
    #[serde(default)]
    column: i64,
}

impl From<RawStackFrame> for StackFrame {
    fn from(raw: RawStackFrame) -> Self {
        StackFrame {
            id: raw.id,
            name: raw.name,
            file: raw.source.and_then(|s| s.path.or(s.name)),
            line: raw.line,
            column: raw.column,
        }
    }
}

/// Extract a list from a response body, an absent list is empty.
fn list<T: DeserializeOwned>(command: &str, body: &Value, key: &str) -> Result<Vec<T>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(vec![]),
        Some(items) => serde_json::from_value(items.clone()).map_err(|e| {
            Error::Engine(anyhow::anyhow!("malformed `{command}` response: {e}"))
        }),
    }
}

pub struct Bridge {
    engine: Arc<dyn DebugEngine>,
    registry: Arc<SessionRegistry>,
}

impl Bridge {
    pub fn new(engine: Arc<dyn DebugEngine>, registry: Arc<SessionRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Explicit session if given, otherwise the active one.
    pub fn resolve_session(&self, session: Option<&str>) -> Result<SessionId> {
        match session {
            Some(id) if self.registry.contains(id) => Ok(id.to_string()),
            Some(id) => Err(Error::SessionNotFound(id.to_string())),
            None => self.engine.active_session().ok_or(Error::NoActiveSession),
        }
    }

    /// Run the frame resolution pipeline for `target`.
    pub async fn resolve_frame(&self, session: &str, target: FrameTarget) -> Result<FrameId> {
        for strategy in target.strategies() {
            if let Some(frame) = self.try_strategy(session, strategy).await? {
                debug!(target: "bridge", "session {session}: frame {frame} resolved by {strategy:?}");
                return Ok(frame);
            }
        }
        Err(Error::NoPausedThread(None))
    }

    async fn try_strategy(&self, session: &str, strategy: FrameStrategy) -> Result<Option<FrameId>> {
        match strategy {
            FrameStrategy::Explicit(frame) => Ok(Some(frame)),
            FrameStrategy::ThreadTop(thread) => self.top_frame_id(session, thread).await.map(Some),
            FrameStrategy::Selected => {
                let Some(selected) = self
                    .engine
                    .selected_frame()
                    .filter(|selected| selected.session == session)
                else {
                    return Ok(None);
                };
                match selected.frame_id {
                    Some(frame) => Ok(Some(frame)),
                    None => self.top_frame_id(session, selected.thread_id).await.map(Some),
                }
            }
            FrameStrategy::FirstThreadTop => {
                let threads = self.threads(session).await.map_err(|e| {
                    debug!(target: "bridge", "session {session}: threads request failed: {e}");
                    Error::NoPausedThread(None)
                })?;
                let first = threads.first().ok_or(Error::NoPausedThread(None))?;
                self.top_frame_id(session, first.id).await.map(Some)
            }
        }
    }

    async fn top_frame_id(&self, session: &str, thread: ThreadId) -> Result<FrameId> {
        match self.top_frame(session, thread).await {
            Ok(Some(frame)) => Ok(frame.id),
            Ok(None) => Err(Error::NoPausedThread(Some(thread))),
            Err(e) => {
                debug!(target: "bridge", "session {session}: stack of thread {thread}: {e}");
                Err(Error::NoPausedThread(Some(thread)))
            }
        }
    }

    async fn top_frame(&self, session: &str, thread: ThreadId) -> Result<Option<StackFrame>> {
        let frames = self.stack_frames(session, thread, 1).await?;
        Ok(frames.into_iter().next())
    }

    async fn call(&self, session: &str, command: &str, arguments: Value) -> Result<Value> {
        self.engine
            .call(session, command, arguments)
            .await
            .map_err(|e| Error::Engine(e.context(format!("`{command}` request"))))
    }

    pub async fn threads(&self, session: &str) -> Result<Vec<Thread>> {
        let body = self.call(session, "threads", json!({})).await?;
        list("threads", &body, "threads")
    }

    /// Up to [`STACK_TRACE_LEVELS`] frames of a thread, empty if the thread has none.
    pub async fn stack_trace(&self, session: &str, thread: ThreadId) -> Result<Vec<StackFrame>> {
        self.stack_frames(session, thread, STACK_TRACE_LEVELS).await
    }

    async fn stack_frames(
        &self,
        session: &str,
        thread: ThreadId,
        levels: i64,
    ) -> Result<Vec<StackFrame>> {
        let body = self
            .call(
                session,
                "stackTrace",
                json!({ "threadId": thread, "startFrame": 0, "levels": levels }),
            )
            .await?;
        let frames: Vec<RawStackFrame> = list("stackTrace", &body, "stackFrames")?;
        Ok(frames.into_iter().map(StackFrame::from).collect())
    }

    pub async fn scopes(&self, session: &str, frame: FrameId) -> Result<Vec<Scope>> {
        let body = self
            .call(session, "scopes", json!({ "frameId": frame }))
            .await?;
        list("scopes", &body, "scopes")
    }

    pub async fn variables(&self, session: &str, reference: i64) -> Result<Vec<Variable>> {
        let body = self
            .call(
                session,
                "variables",
                json!({ "variablesReference": reference }),
            )
            .await?;
        list("variables", &body, "variables")
    }

    pub async fn evaluate(
        &self,
        session: &str,
        expression: &str,
        frame: FrameId,
        context: EvalContext,
    ) -> Result<EvaluateResult> {
        let body = self
            .call(
                session,
                "evaluate",
                json!({
                    "expression": expression,
                    "frameId": frame,
                    "context": context.to_string(),
                }),
            )
            .await?;
        serde_json::from_value(body)
            .map_err(|e| Error::Engine(anyhow::anyhow!("malformed `evaluate` response: {e}")))
    }

    /// Paused location of every thread. Threads that fail or have no frames are skipped.
    pub async fn current_locations(&self, session: &str) -> Result<Vec<DebugLocation>> {
        let threads = self.threads(session).await?;

        let mut locations = Vec::with_capacity(threads.len());
        for thread in threads {
            match self.top_frame(session, thread.id).await {
                Ok(Some(frame)) => locations.push(DebugLocation {
                    thread_id: thread.id,
                    thread_name: thread.name,
                    file: frame.file,
                    line: frame.line,
                    column: frame.column,
                }),
                Ok(None) => {
                    debug!(target: "bridge", "session {session}: thread {} has no frames", thread.id)
                }
                Err(e) => {
                    debug!(target: "bridge", "session {session}: skip thread {}: {e}", thread.id)
                }
            }
        }
        Ok(locations)
    }

    pub async fn step(&self, session: &str, kind: StepKind) -> Result<()> {
        self.engine
            .control(session, kind)
            .await
            .map_err(|e| Error::Engine(e.context(format!("`{kind}`"))))
    }
}
