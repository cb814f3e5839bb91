use async_trait::async_trait;
use dapmux::config::LaunchConfigurations;
use dapmux::engine::dap::transport::{read_message, write_message};
use dapmux::engine::{
    Breakpoint, DebugConfiguration, DebugEngine, EngineEvent, SelectedFrame, SessionDescriptor,
    SessionId, SourceBreakpoint, StartRequest, StepKind,
};
use dapmux::session::SessionRegistry;
use dapmux::tools::{ToolResult, Tools};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

type Responder = Box<dyn Fn(&str, &Value) -> anyhow::Result<Value> + Send + Sync>;

/// What the scripted engine saw and will answer.
pub struct Script {
    /// `start_session` answer, `Err` text makes the call fail.
    pub accept: Result<bool, String>,
    /// Report started sessions with a start event.
    pub announce: bool,
    pub started: Vec<StartRequest>,
    pub stopped: Vec<SessionId>,
    pub calls: Vec<(SessionId, String, Value)>,
    pub controls: Vec<(SessionId, StepKind)>,
    pub active: Option<SessionId>,
    pub selected: Option<SelectedFrame>,
    pub breakpoints: Vec<Breakpoint>,
    /// Number of upcoming `add_breakpoints` calls that fail.
    pub fail_adds: usize,
    next_session: u32,
    next_breakpoint: u32,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            accept: Ok(true),
            announce: true,
            started: vec![],
            stopped: vec![],
            calls: vec![],
            controls: vec![],
            active: None,
            selected: None,
            breakpoints: vec![],
            fail_adds: 0,
            next_session: 1,
            next_breakpoint: 1,
        }
    }
}

/// Engine whose sessions and answers are scripted by the test.
pub struct ScriptedEngine {
    events: broadcast::Sender<EngineEvent>,
    pub script: Mutex<Script>,
    responder: Mutex<Responder>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            script: Mutex::default(),
            responder: Mutex::new(Box::new(|command, _| {
                Err(anyhow::anyhow!("no answer scripted for `{command}`"))
            })),
        })
    }

    pub fn respond_with(
        &self,
        responder: impl Fn(&str, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    pub fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn emit(&self, event: EngineEvent) {
        _ = self.events.send(event);
    }
}

#[async_trait]
impl DebugEngine for ScriptedEngine {
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn start_session(&self, request: StartRequest) -> anyhow::Result<bool> {
        let descriptor = {
            let mut script = self.script();
            script.started.push(request.clone());
            match script.accept.clone() {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => return Err(anyhow::anyhow!(e)),
            }
            if !script.announce {
                return Ok(true);
            }

            let id = format!("session-{}", script.next_session);
            script.next_session += 1;
            script.active = Some(id.clone());
            SessionDescriptor {
                id,
                name: request.configuration.name.clone(),
                kind: request.configuration.kind.clone(),
                scope: None,
                parent: request.parent.clone(),
            }
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            _ = events.send(EngineEvent::SessionStarted(descriptor));
        });
        Ok(true)
    }

    async fn stop_session(&self, session: &str) -> anyhow::Result<()> {
        {
            let mut script = self.script();
            script.stopped.push(session.to_string());
            if script.active.as_deref() == Some(session) {
                script.active = None;
            }
        }
        self.emit(EngineEvent::SessionTerminated(session.to_string()));
        Ok(())
    }

    fn active_session(&self) -> Option<SessionId> {
        self.script().active.clone()
    }

    fn selected_frame(&self) -> Option<SelectedFrame> {
        self.script().selected.clone()
    }

    async fn call(&self, session: &str, command: &str, arguments: Value) -> anyhow::Result<Value> {
        self.script()
            .calls
            .push((session.to_string(), command.to_string(), arguments.clone()));
        let responder = self.responder.lock().unwrap();
        responder(command, &arguments)
    }

    async fn control(&self, session: &str, kind: StepKind) -> anyhow::Result<()> {
        self.script().controls.push((session.to_string(), kind));
        Ok(())
    }

    fn breakpoints(&self) -> Vec<Breakpoint> {
        self.script().breakpoints.clone()
    }

    async fn add_breakpoints(
        &self,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> anyhow::Result<Vec<Breakpoint>> {
        let mut script = self.script();
        if script.fail_adds > 0 {
            script.fail_adds -= 1;
            anyhow::bail!("breakpoint list is read-only");
        }
        let mut added = vec![];
        for source in breakpoints {
            let bp = Breakpoint {
                id: format!("bp-{}", script.next_breakpoint),
                file: source.file,
                line: source.line,
                column: source.column,
                condition: source.condition,
                hit_condition: source.hit_condition,
                log_message: source.log_message,
                enabled: source.enabled,
                verified: source.enabled,
            };
            script.next_breakpoint += 1;
            script.breakpoints.push(bp.clone());
            added.push(bp);
        }
        Ok(added)
    }

    async fn remove_breakpoints(&self, ids: &[String]) -> anyhow::Result<()> {
        self.script().breakpoints.retain(|bp| !ids.contains(&bp.id));
        Ok(())
    }
}

pub fn configuration(name: &str) -> DebugConfiguration {
    serde_json::from_value(json!({
        "name": name,
        "type": "fake",
        "program": format!("./target/debug/{name}"),
    }))
    .unwrap()
}

/// Registry with a running event loop and a tool dispatcher, over `engine`.
pub fn setup(engine: Arc<dyn DebugEngine>, configurations: &[&str]) -> (Arc<SessionRegistry>, Tools) {
    let registry = Arc::new(SessionRegistry::new(engine.clone()));
    registry.spawn_event_loop();
    let configurations = LaunchConfigurations::new(
        configurations.iter().map(|name| configuration(name)).collect(),
    );
    let tools = Tools::new(engine, registry.clone(), Arc::new(configurations));
    (registry, tools)
}

/// Successful tool result as JSON.
pub fn ok_json(result: ToolResult) -> Value {
    assert!(!result.is_error, "tool failed: {}", result.message());
    serde_json::from_str(&result.message()).unwrap()
}

/// Failed tool result message.
pub fn err_text(result: ToolResult) -> String {
    assert!(result.is_error, "tool succeeded: {}", result.message());
    result.message()
}

/// Wait until `condition` holds, panics after a second.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Minimal debug adapter speaking DAP over TCP.
///
/// Sessions launched with `"spawnChild": true` ask for a child session through `startDebugging`.
/// After `configurationDone` and after every step, the session reports a stop of thread 1 right
/// behind the response.
pub struct FakeAdapter {
    pub addr: SocketAddr,
    pub connections: Arc<Mutex<usize>>,
}

impl FakeAdapter {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(Mutex::new(0));

        let counter = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                *counter.lock().unwrap() += 1;
                tokio::spawn(serve_adapter(stream));
            }
        });
        Self { addr, connections }
    }
}

async fn serve_adapter(stream: TcpStream) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut seq = 0;
    let mut next = move || {
        seq += 1;
        seq
    };

    while let Ok(Some(message)) = read_message(&mut reader).await {
        if message["type"] != "request" {
            continue;
        }
        let command = message["command"].as_str().unwrap_or_default().to_string();
        let arguments = &message["arguments"];

        let body = match command.as_str() {
            "initialize" => json!({ "supportsConfigurationDoneRequest": true }),
            "setBreakpoints" => {
                let count = arguments["breakpoints"].as_array().map(Vec::len).unwrap_or(0);
                let verified: Vec<_> = (0..count).map(|_| json!({ "verified": true })).collect();
                json!({ "breakpoints": verified })
            }
            "threads" => json!({ "threads": [{ "id": 1, "name": "main" }] }),
            "stackTrace" => json!({
                "stackFrames": [{
                    "id": 100,
                    "name": "main",
                    "source": { "path": "/src/main.rs" },
                    "line": 12,
                    "column": 1,
                }]
            }),
            _ => json!({}),
        };
        let response = json!({
            "seq": next(),
            "type": "response",
            "request_seq": message["seq"],
            "command": command,
            "success": true,
            "body": body,
        });
        write_message(&mut writer, &response).await.unwrap();

        match command.as_str() {
            "initialize" => {
                let event = json!({ "seq": next(), "type": "event", "event": "initialized" });
                write_message(&mut writer, &event).await.unwrap();
            }
            "launch" if arguments["spawnChild"] == true => {
                let request = json!({
                    "seq": next(),
                    "type": "request",
                    "command": "startDebugging",
                    "arguments": {
                        "request": "launch",
                        "configuration": { "name": "worker", "program": "./worker" },
                    },
                });
                write_message(&mut writer, &request).await.unwrap();
            }
            "configurationDone" | "next" | "stepIn" | "stepOut" => {
                let reason = if command == "configurationDone" { "breakpoint" } else { "step" };
                let event = json!({
                    "seq": next(),
                    "type": "event",
                    "event": "stopped",
                    "body": { "reason": reason, "threadId": 1 },
                });
                write_message(&mut writer, &event).await.unwrap();
            }
            "disconnect" => break,
            _ => {}
        }
    }
}
