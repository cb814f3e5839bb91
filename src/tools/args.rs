use crate::bridge::EvalContext;
use crate::engine::{ConsoleMode, DebugConfiguration, FrameId, ThreadId};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LaunchArgs {
    pub configuration: String,
}

/// Child configuration, by name or inline.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ConfigurationRef {
    Name(String),
    Inline(DebugConfiguration),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchChildArgs {
    pub parent_session_id: String,
    pub configuration: ConfigurationRef,
    #[serde(default)]
    pub console_mode: ConsoleMode,
    #[serde(default)]
    pub lifecycle_managed_by_parent: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionArgs {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoArgs {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointArgs {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BreakpointBatchArgs {
    pub breakpoints: Vec<BreakpointArgs>,
}

#[derive(Debug, Deserialize)]
pub struct LocationArgs {
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Deserialize)]
pub struct ToggleArgs {
    pub file: String,
    pub line: u32,
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileFilterArgs {
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArgs {
    pub expression: String,
    pub frame_id: Option<FrameId>,
    pub thread_id: Option<ThreadId>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: EvalContext,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackArgs {
    pub thread_id: Option<ThreadId>,
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArgs {
    pub frame_id: Option<FrameId>,
    pub thread_id: Option<ThreadId>,
    pub session_id: Option<String>,
    pub variables_reference: Option<i64>,
}
