use serde::Serialize;
use serde_json::{json, Value};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Maximum breakpoints in one `set_breakpoints` call.
pub const MAX_BATCH_BREAKPOINTS: usize = 50;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ToolName {
    LaunchDebug,
    LaunchChildDebug,
    StopDebug,
    GetDebugState,
    ListDebugSessions,
    GetSessionHierarchy,
    GetSessionInfo,
    ListDebugConfigurations,
    SetBreakpoint,
    SetBreakpoints,
    RemoveBreakpoint,
    ToggleBreakpoint,
    ListBreakpoints,
    ClearAllBreakpoints,
    ContinueExecution,
    PauseExecution,
    StepOver,
    StepInto,
    StepOut,
    EvaluateExpression,
    ListThreads,
    GetStackFrames,
    GetVariables,
    GetCurrentLocation,
}

/// Entry of the `tools/list` answer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn catalog() -> Vec<ToolDescriptor> {
    ToolName::iter()
        .map(|tool| ToolDescriptor {
            name: tool.into(),
            description: tool.description(),
            input_schema: tool.input_schema(),
        })
        .collect()
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn session_only() -> Value {
    object(
        json!({ "sessionId": { "type": "string", "description": "Target session, the active session if omitted" } }),
        &[],
    )
}

fn breakpoint_properties() -> Value {
    json!({
        "file": { "type": "string", "description": "Absolute source file path" },
        "line": { "type": "integer", "minimum": 1, "description": "1-based line number" },
        "condition": { "type": "string", "description": "Expression that must be true to stop" },
        "hitCondition": { "type": "string", "description": "Hit count condition, e.g. `>= 3`" },
        "logMessage": { "type": "string", "description": "Log this message instead of stopping" },
    })
}

impl ToolName {
    pub fn description(self) -> &'static str {
        match self {
            ToolName::LaunchDebug => "Start a debug session from a named launch configuration of the workspace.",
            ToolName::LaunchChildDebug => "Start a debug session nested under an existing session (sub-process debugging).",
            ToolName::StopDebug => "Stop a debug session, the active session if none is given.",
            ToolName::GetDebugState => "Summary of the active debug session, or `no_active_session`.",
            ToolName::ListDebugSessions => "Flat list of all debug sessions with parent and children ids.",
            ToolName::GetSessionHierarchy => "Debug sessions as a tree of parent and child sessions.",
            ToolName::GetSessionInfo => "Details of one debug session, including time since start.",
            ToolName::ListDebugConfigurations => "Launch configurations available to `launch_debug`.",
            ToolName::SetBreakpoint => "Set a breakpoint at a source line, replacing one already there.",
            ToolName::SetBreakpoints => "Set up to 50 breakpoints at once, reporting success per breakpoint.",
            ToolName::RemoveBreakpoint => "Remove the breakpoint at a source line.",
            ToolName::ToggleBreakpoint => "Enable or disable the breakpoint at a source line.",
            ToolName::ListBreakpoints => "List breakpoints, optionally of one file.",
            ToolName::ClearAllBreakpoints => "Remove all breakpoints, optionally of one file.",
            ToolName::ContinueExecution => "Resume execution of a paused session.",
            ToolName::PauseExecution => "Pause a running session.",
            ToolName::StepOver => "Step over the current line.",
            ToolName::StepInto => "Step into the call at the current line.",
            ToolName::StepOut => "Run until the current function returns.",
            ToolName::EvaluateExpression => "Evaluate an expression in the context of a stack frame.",
            ToolName::ListThreads => "List threads of a session.",
            ToolName::GetStackFrames => "Stack trace (up to 50 frames) of a thread.",
            ToolName::GetVariables => "Variables of a stack frame grouped by scope, or children of a structured variable.",
            ToolName::GetCurrentLocation => "Source location of every paused thread of a session.",
        }
    }

    pub fn input_schema(self) -> Value {
        match self {
            ToolName::LaunchDebug => object(
                json!({ "configuration": { "type": "string", "description": "Launch configuration name" } }),
                &["configuration"],
            ),
            ToolName::LaunchChildDebug => object(
                json!({
                    "parentSessionId": { "type": "string" },
                    "configuration": {
                        "description": "Launch configuration name or inline configuration object",
                        "oneOf": [{ "type": "string" }, { "type": "object" }],
                    },
                    "consoleMode": { "type": "string", "enum": ["separate", "mergeWithParent"] },
                    "lifecycleManagedByParent": { "type": "boolean" },
                }),
                &["parentSessionId", "configuration"],
            ),
            ToolName::StopDebug
            | ToolName::ContinueExecution
            | ToolName::PauseExecution
            | ToolName::StepOver
            | ToolName::StepInto
            | ToolName::StepOut
            | ToolName::ListThreads
            | ToolName::GetCurrentLocation => session_only(),
            ToolName::GetDebugState
            | ToolName::ListDebugSessions
            | ToolName::GetSessionHierarchy
            | ToolName::ListDebugConfigurations => object(json!({}), &[]),
            ToolName::GetSessionInfo => object(
                json!({ "sessionId": { "type": "string" } }),
                &["sessionId"],
            ),
            ToolName::SetBreakpoint => object(breakpoint_properties(), &["file", "line"]),
            ToolName::SetBreakpoints => object(
                json!({
                    "breakpoints": {
                        "type": "array",
                        "maxItems": MAX_BATCH_BREAKPOINTS,
                        "items": object(breakpoint_properties(), &["file", "line"]),
                    }
                }),
                &["breakpoints"],
            ),
            ToolName::RemoveBreakpoint => object(
                json!({
                    "file": { "type": "string" },
                    "line": { "type": "integer", "minimum": 1 },
                }),
                &["file", "line"],
            ),
            ToolName::ToggleBreakpoint => object(
                json!({
                    "file": { "type": "string" },
                    "line": { "type": "integer", "minimum": 1 },
                    "enabled": { "type": "boolean" },
                }),
                &["file", "line", "enabled"],
            ),
            ToolName::ListBreakpoints | ToolName::ClearAllBreakpoints => object(
                json!({ "file": { "type": "string", "description": "Restrict to this file" } }),
                &[],
            ),
            ToolName::EvaluateExpression => object(
                json!({
                    "expression": { "type": "string" },
                    "frameId": { "type": "integer" },
                    "threadId": { "type": "integer" },
                    "sessionId": { "type": "string" },
                    "context": { "type": "string", "enum": ["watch", "repl", "hover"] },
                }),
                &["expression"],
            ),
            ToolName::GetStackFrames => object(
                json!({
                    "threadId": { "type": "integer" },
                    "sessionId": { "type": "string" },
                }),
                &[],
            ),
            ToolName::GetVariables => object(
                json!({
                    "frameId": { "type": "integer" },
                    "threadId": { "type": "integer" },
                    "sessionId": { "type": "string" },
                    "variablesReference": { "type": "integer", "description": "Expand this structured variable" },
                }),
                &[],
            ),
        }
    }
}
