use crate::engine::{SessionId, ThreadId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- session targeting errors ---------------------------------
    #[error("no active debug session")]
    NoActiveSession,
    #[error("debug session `{0}` not found")]
    SessionNotFound(SessionId),
    #[error("parent debug session `{0}` not found")]
    ParentNotFound(SessionId),

    // --------------------------------- launch errors --------------------------------------------
    #[error("launch rejected: {0}")]
    LaunchRejected(String),
    #[error("debug session `{0}` did not start within {1} seconds")]
    LaunchTimeout(String, u64),
    #[error("launch configuration `{name}` not found, available: {}", available_list(.available))]
    ConfigurationNotFound {
        name: String,
        available: Vec<String>,
    },

    // --------------------------------- frame resolution errors ----------------------------------
    #[error("no paused thread{}", thread_suffix(.0))]
    NoPausedThread(Option<ThreadId>),

    // --------------------------------- breakpoint errors ----------------------------------------
    #[error("no breakpoint at {file}:{line}")]
    BreakpointNotFound { file: String, line: u32 },

    // --------------------------------- tool call errors -----------------------------------------
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    // --------------------------------- transport errors -----------------------------------------
    #[error("parse error: {0}")]
    TransportParseError(String),
    #[error("internal server error: {0}")]
    TransportInternalError(String),

    // --------------------------------- third party errors ---------------------------------------
    #[error("debug engine: {0:#}")]
    Engine(anyhow::Error),
    #[error("configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn available_list(names: &[String]) -> String {
    if names.is_empty() {
        "<none>".to_string()
    } else {
        names.join(", ")
    }
}

fn thread_suffix(thread: &Option<ThreadId>) -> String {
    match thread {
        Some(id) => format!(" (thread {id} has no frames)"),
        None => String::new(),
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        // keep typed errors that travelled through anyhow context
        match e.downcast::<Error>() {
            Ok(typed) => typed,
            Err(e) => Error::Engine(e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidArguments(e.to_string())
    }
}
