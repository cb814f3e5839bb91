//! Tool calls exposed to remote agents.
//!
//! Every call runs under the [`RequestSerializer`]. Failures never escape as errors: they become
//! a tool result flagged `isError` with a readable message.

mod args;
mod catalog;

pub use catalog::{catalog, ToolDescriptor, ToolName, MAX_BATCH_BREAKPOINTS};

use crate::breakpoint::{BreakpointOptions, BreakpointStore};
use crate::bridge::{Bridge, FrameTarget};
use crate::config::LaunchConfigurations;
use crate::engine::{DebugEngine, SessionState, StepKind, ThreadId};
use crate::error::{Error, Result};
use crate::serializer::RequestSerializer;
use crate::session::{ChildOptions, Session, SessionRegistry};
use args::*;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

/// Text content item of a tool result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

/// Result of a `tools/call`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<TextContent>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![TextContent {
                kind: "text",
                text: text.into(),
            }],
            is_error: false,
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
    }

    pub fn error(error: &Error) -> Self {
        Self {
            is_error: true,
            ..Self::text(error.to_string())
        }
    }

    /// Concatenated text of all content items.
    pub fn message(&self) -> String {
        self.content.iter().map(|c| c.text.as_str()).collect()
    }
}

/// Flat session description.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    parent_id: Option<String>,
    child_ids: Vec<String>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            kind: s.kind.clone(),
            state: s.state,
            scope: s.scope.clone(),
            parent_id: s.parent.clone(),
            child_ids: s.children.iter().cloned().collect(),
        }
    }
}

fn parse<T: DeserializeOwned>(arguments: &Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other.clone(),
    };
    Ok(serde_json::from_value(arguments)?)
}

fn to_value(value: impl Serialize) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::TransportInternalError(e.to_string()))
}

pub struct Tools {
    engine: Arc<dyn DebugEngine>,
    registry: Arc<SessionRegistry>,
    breakpoints: BreakpointStore,
    bridge: Bridge,
    configurations: Arc<LaunchConfigurations>,
    serializer: RequestSerializer,
}

impl Tools {
    pub fn new(
        engine: Arc<dyn DebugEngine>,
        registry: Arc<SessionRegistry>,
        configurations: Arc<LaunchConfigurations>,
    ) -> Self {
        Self {
            breakpoints: BreakpointStore::new(engine.clone()),
            bridge: Bridge::new(engine.clone(), registry.clone()),
            engine,
            registry,
            configurations,
            serializer: RequestSerializer::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run one tool call under exclusive access to the debuggee.
    pub async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let result = self
            .serializer
            .run_exclusive(|| self.dispatch(name, arguments))
            .await;

        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => {
                warn!(target: "bridge", "tool `{name}` failed: {e}");
                ToolResult::error(&e)
            }
        }
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = ToolName::from_str(name).map_err(|_| Error::UnknownTool(name.to_string()))?;
        debug!(target: "bridge", "tool `{tool}`: {arguments}");

        match tool {
            ToolName::LaunchDebug => self.launch(parse(&arguments)?).await,
            ToolName::LaunchChildDebug => self.launch_child(parse(&arguments)?).await,
            ToolName::StopDebug => {
                let args: SessionArgs = parse(&arguments)?;
                let id = self.registry.terminate(args.session_id.as_deref()).await?;
                Ok(json!({ "sessionId": id, "stopped": true }))
            }
            ToolName::GetDebugState => self.debug_state(),
            ToolName::ListDebugSessions => {
                let sessions: Vec<_> = self
                    .registry
                    .list()
                    .iter()
                    .map(SessionSummary::from)
                    .collect();
                Ok(json!({ "count": sessions.len(), "sessions": to_value(sessions)? }))
            }
            ToolName::GetSessionHierarchy => to_value(self.registry.tree()),
            ToolName::GetSessionInfo => {
                let args: SessionInfoArgs = parse(&arguments)?;
                self.session_info(&args.session_id)
            }
            ToolName::ListDebugConfigurations => {
                let configurations: Vec<_> = self
                    .configurations
                    .all()
                    .into_iter()
                    .map(|c| json!({ "name": c.name, "type": c.kind, "request": c.request }))
                    .collect();
                Ok(json!({ "configurations": configurations }))
            }
            ToolName::SetBreakpoint => {
                let args: BreakpointArgs = parse(&arguments)?;
                to_value(self.set_breakpoint(args).await?)
            }
            ToolName::SetBreakpoints => self.set_breakpoints(parse(&arguments)?).await,
            ToolName::RemoveBreakpoint => {
                let args: LocationArgs = parse(&arguments)?;
                let removed = self.breakpoints.remove(&args.file, args.line).await?;
                Ok(json!({ "file": args.file, "line": args.line, "removed": removed }))
            }
            ToolName::ToggleBreakpoint => {
                let args: ToggleArgs = parse(&arguments)?;
                to_value(
                    self.breakpoints
                        .toggle(&args.file, args.line, args.enabled)
                        .await?,
                )
            }
            ToolName::ListBreakpoints => {
                let args: FileFilterArgs = parse(&arguments)?;
                let breakpoints = match args.file {
                    Some(file) => self.breakpoints.by_file(&file),
                    None => self.breakpoints.all(),
                };
                Ok(json!({ "count": breakpoints.len(), "breakpoints": to_value(breakpoints)? }))
            }
            ToolName::ClearAllBreakpoints => {
                let args: FileFilterArgs = parse(&arguments)?;
                let removed = match args.file {
                    Some(file) => self.breakpoints.clear_file(&file).await?,
                    None => self.breakpoints.clear_all().await?,
                };
                Ok(json!({ "removed": removed }))
            }
            ToolName::ContinueExecution => self.step(&arguments, StepKind::Continue).await,
            ToolName::PauseExecution => self.step(&arguments, StepKind::Pause).await,
            ToolName::StepOver => self.step(&arguments, StepKind::StepOver).await,
            ToolName::StepInto => self.step(&arguments, StepKind::StepInto).await,
            ToolName::StepOut => self.step(&arguments, StepKind::StepOut).await,
            ToolName::EvaluateExpression => self.evaluate(parse(&arguments)?).await,
            ToolName::ListThreads => {
                let args: SessionArgs = parse(&arguments)?;
                let session = self.bridge.resolve_session(args.session_id.as_deref())?;
                let threads = self.bridge.threads(&session).await?;
                Ok(json!({ "sessionId": session, "threads": to_value(threads)? }))
            }
            ToolName::GetStackFrames => self.stack_frames(parse(&arguments)?).await,
            ToolName::GetVariables => self.variables(parse(&arguments)?).await,
            ToolName::GetCurrentLocation => {
                let args: SessionArgs = parse(&arguments)?;
                let session = self.bridge.resolve_session(args.session_id.as_deref())?;
                let locations = self.bridge.current_locations(&session).await?;
                Ok(json!({ "sessionId": session, "locations": to_value(locations)? }))
            }
        }
    }

    async fn launch(&self, args: LaunchArgs) -> Result<Value> {
        let configuration = self.configurations.find(&args.configuration)?;
        let name = configuration.name.clone();
        let id = self.registry.launch(configuration).await?;
        Ok(json!({ "sessionId": id, "configuration": name }))
    }

    async fn launch_child(&self, args: LaunchChildArgs) -> Result<Value> {
        if !self.registry.contains(&args.parent_session_id) {
            return Err(Error::ParentNotFound(args.parent_session_id));
        }

        let configuration = match args.configuration {
            ConfigurationRef::Name(name) => self.configurations.find(&name)?,
            ConfigurationRef::Inline(configuration) => configuration,
        };
        let options = ChildOptions {
            console_mode: args.console_mode,
            lifecycle_managed_by_parent: args.lifecycle_managed_by_parent,
        };

        let id = self
            .registry
            .launch_child(&args.parent_session_id, configuration, options)
            .await?;
        Ok(json!({ "sessionId": id, "parentSessionId": args.parent_session_id }))
    }

    fn debug_state(&self) -> Result<Value> {
        let total = self.registry.len();
        match self.registry.active() {
            Some(session) => Ok(json!({
                "status": "active",
                "session": to_value(SessionSummary::from(&session))?,
                "totalSessions": total,
            })),
            None => Ok(json!({ "status": "no_active_session", "totalSessions": total })),
        }
    }

    fn session_info(&self, id: &str) -> Result<Value> {
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        let mut info = to_value(SessionSummary::from(&session))?;
        info["startedAt"] = json!(session.started_at.to_rfc3339());
        info["durationSeconds"] = json!(session.duration().num_milliseconds() as f64 / 1000.0);
        Ok(info)
    }

    async fn set_breakpoint(&self, args: BreakpointArgs) -> Result<crate::engine::Breakpoint> {
        if args.line == 0 {
            return Err(Error::InvalidArguments("line numbers start at 1".to_string()));
        }

        let options = BreakpointOptions {
            condition: args.condition,
            hit_condition: args.hit_condition,
            log_message: args.log_message,
        };
        self.breakpoints.set(&args.file, args.line, options).await
    }

    async fn set_breakpoints(&self, args: BreakpointBatchArgs) -> Result<Value> {
        if args.breakpoints.len() > MAX_BATCH_BREAKPOINTS {
            return Err(Error::InvalidArguments(format!(
                "at most {MAX_BATCH_BREAKPOINTS} breakpoints per call, got {}",
                args.breakpoints.len()
            )));
        }

        let mut results = Vec::with_capacity(args.breakpoints.len());
        let mut succeeded = 0;
        for item in args.breakpoints {
            let (file, line) = (item.file.clone(), item.line);
            match self.set_breakpoint(item).await {
                Ok(bp) => {
                    succeeded += 1;
                    results.push(json!({
                        "file": file, "line": line, "success": true, "breakpoint": to_value(bp)?,
                    }));
                }
                Err(e) => results.push(json!({
                    "file": file, "line": line, "success": false, "error": e.to_string(),
                })),
            }
        }

        Ok(json!({
            "succeeded": succeeded,
            "failed": results.len() - succeeded,
            "results": results,
        }))
    }

    async fn step(&self, arguments: &Value, kind: StepKind) -> Result<Value> {
        let args: SessionArgs = parse(arguments)?;
        let session = self.bridge.resolve_session(args.session_id.as_deref())?;
        self.bridge.step(&session, kind).await?;
        Ok(json!({ "sessionId": session, "action": kind.to_string() }))
    }

    async fn evaluate(&self, args: EvaluateArgs) -> Result<Value> {
        let session = self.bridge.resolve_session(args.session_id.as_deref())?;
        let frame = self
            .bridge
            .resolve_frame(&session, FrameTarget::new(args.frame_id, args.thread_id))
            .await?;
        let result = self
            .bridge
            .evaluate(&session, &args.expression, frame, args.context)
            .await?;

        let mut value = to_value(result)?;
        value["frameId"] = json!(frame);
        Ok(value)
    }

    async fn stack_frames(&self, args: StackArgs) -> Result<Value> {
        let session = self.bridge.resolve_session(args.session_id.as_deref())?;
        let thread = match args.thread_id {
            Some(thread) => thread,
            None => self.default_thread(&session).await?,
        };

        let frames = self.bridge.stack_trace(&session, thread).await?;
        Ok(json!({
            "sessionId": session,
            "threadId": thread,
            "frames": to_value(frames)?,
        }))
    }

    /// Selected thread of the session, otherwise its first thread.
    async fn default_thread(&self, session: &str) -> Result<ThreadId> {
        if let Some(selected) = self
            .engine
            .selected_frame()
            .filter(|selected| selected.session == session)
        {
            return Ok(selected.thread_id);
        }

        let threads = self.bridge.threads(session).await?;
        threads
            .first()
            .map(|t| t.id)
            .ok_or(Error::NoPausedThread(None))
    }

    async fn variables(&self, args: VariablesArgs) -> Result<Value> {
        let session = self.bridge.resolve_session(args.session_id.as_deref())?;

        if let Some(reference) = args.variables_reference {
            let variables = self.bridge.variables(&session, reference).await?;
            return Ok(json!({
                "variablesReference": reference,
                "variables": to_value(variables)?,
            }));
        }

        let frame = self
            .bridge
            .resolve_frame(&session, FrameTarget::new(args.frame_id, args.thread_id))
            .await?;

        let mut scopes = vec![];
        for scope in self.bridge.scopes(&session, frame).await? {
            let variables = if scope.variables_reference > 0 {
                self.bridge
                    .variables(&session, scope.variables_reference)
                    .await?
            } else {
                vec![]
            };
            scopes.push(json!({
                "name": scope.name,
                "variablesReference": scope.variables_reference,
                "variables": to_value(variables)?,
            }));
        }

        Ok(json!({ "sessionId": session, "frameId": frame, "scopes": scopes }))
    }
}
