//! Debug engine abstraction.
//!
//! The engine owns the actual debuggee: it starts and stops sessions, answers generic protocol
//! requests (threads, stack traces, scopes, variables, evaluate) and keeps the breakpoint list.
//! Everything above this module talks to the engine only through [`DebugEngine`].

pub mod dap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString, IntoStaticStr};
use tokio::sync::broadcast;

/// Opaque session identifier, unique for the session lifetime.
pub type SessionId = String;
/// Thread identifier, meaningful only inside one session.
pub type ThreadId = i64;
/// Frame identifier, valid until the owning thread resumes.
pub type FrameId = i64;

/// Coarse session state.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Idle,
    Launching,
    Running,
    Paused,
    Stopped,
}

/// Named launch configuration, as listed in the workspace configuration file.
///
/// Only `name`, `type` and `request` are interpreted, any other key is forwarded to the debug
/// adapter untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugConfiguration {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_request")]
    pub request: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_request() -> String {
    "launch".to_string()
}

impl DebugConfiguration {
    /// Arguments of the adapter `launch`/`attach` request.
    pub fn adapter_arguments(&self) -> Value {
        let mut args = self.extra.clone();
        args.insert("name".to_string(), Value::String(self.name.clone()));
        args.insert("type".to_string(), Value::String(self.kind.clone()));
        args.insert("request".to_string(), Value::String(self.request.clone()));
        Value::Object(args)
    }
}

/// How a child session console relates to its parent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleMode {
    #[default]
    Separate,
    MergeWithParent,
}

/// Request to start a new session.
#[derive(Clone, Debug)]
pub struct StartRequest {
    pub configuration: DebugConfiguration,
    pub parent: Option<SessionId>,
    pub console_mode: ConsoleMode,
    pub lifecycle_managed_by_parent: bool,
}

impl StartRequest {
    pub fn root(configuration: DebugConfiguration) -> Self {
        Self {
            configuration,
            parent: None,
            console_mode: ConsoleMode::default(),
            lifecycle_managed_by_parent: false,
        }
    }
}

/// Session description, reported by the engine when a session starts.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub name: String,
    pub kind: String,
    /// Workspace folder (or other scope) the session belongs to.
    pub scope: Option<String>,
    pub parent: Option<SessionId>,
}

/// Session lifecycle notifications.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    SessionStarted(SessionDescriptor),
    SessionTerminated(SessionId),
    SessionStateChanged(SessionId, SessionState),
}

/// Execution control action.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum StepKind {
    Continue,
    Pause,
    StepOver,
    StepInto,
    StepOut,
}

impl StepKind {
    /// Debug adapter protocol command implementing this action.
    pub fn command(self) -> &'static str {
        match self {
            StepKind::Continue => "continue",
            StepKind::Pause => "pause",
            StepKind::StepOver => "next",
            StepKind::StepInto => "stepIn",
            StepKind::StepOut => "stepOut",
        }
    }
}

/// Thread and (optionally) frame currently selected by whoever drives the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedFrame {
    pub session: SessionId,
    pub thread_id: ThreadId,
    pub frame_id: Option<FrameId>,
}

/// Breakpoint as kept by the engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: String,
    pub file: String,
    /// 1-based line.
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
    pub enabled: bool,
    pub verified: bool,
}

impl Breakpoint {
    pub fn is_at(&self, file: &str, line: u32) -> bool {
        self.file == file && self.line == line
    }
}

/// Breakpoint to be installed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceBreakpoint {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub enabled: bool,
}

impl From<&Breakpoint> for SourceBreakpoint {
    fn from(bp: &Breakpoint) -> Self {
        Self {
            file: bp.file.clone(),
            line: bp.line,
            column: bp.column,
            condition: bp.condition.clone(),
            hit_condition: bp.hit_condition.clone(),
            log_message: bp.log_message.clone(),
            enabled: bp.enabled,
        }
    }
}

#[async_trait]
pub trait DebugEngine: Send + Sync {
    /// Subscribe to session lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Ask the engine to start a session.
    ///
    /// Returns `false` if the engine declines the request. The identity of the resulting
    /// session is only known from the following [`EngineEvent::SessionStarted`].
    async fn start_session(&self, request: StartRequest) -> anyhow::Result<bool>;

    async fn stop_session(&self, session: &str) -> anyhow::Result<()>;

    /// Session the engine considers active (focused), if any.
    fn active_session(&self) -> Option<SessionId>;

    /// Ambient thread/frame selection, if the engine exposes one.
    fn selected_frame(&self) -> Option<SelectedFrame>;

    /// Generic request/response call against a session.
    async fn call(&self, session: &str, command: &str, arguments: Value) -> anyhow::Result<Value>;

    /// Execution control primitive.
    async fn control(&self, session: &str, kind: StepKind) -> anyhow::Result<()>;

    /// Engine breakpoint list in engine order.
    fn breakpoints(&self) -> Vec<Breakpoint>;

    async fn add_breakpoints(
        &self,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> anyhow::Result<Vec<Breakpoint>>;

    async fn remove_breakpoints(&self, ids: &[String]) -> anyhow::Result<()>;
}
