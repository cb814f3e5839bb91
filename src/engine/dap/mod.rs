//! [`DebugEngine`] backed by debug adapters listening on TCP.
//!
//! Every session owns one adapter connection. The connection is driven by a reader task that
//! routes responses to waiting requests, turns adapter events into [`EngineEvent`]s and answers
//! `startDebugging` reverse requests by opening a child session on the same adapter.

mod connection;
pub mod transport;

use crate::engine::{
    Breakpoint, DebugConfiguration, DebugEngine, EngineEvent, SelectedFrame, SessionDescriptor,
    SessionId, SessionState, SourceBreakpoint, StartRequest, StepKind, ThreadId,
};
use crate::error::Error;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use connection::{response_body, AdapterConnection};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use transport::read_message;
use uuid::Uuid;

/// How long a `disconnect` may take before the connection is dropped anyway.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct AdapterSession {
    id: SessionId,
    name: String,
    kind: String,
    scope: Option<String>,
    parent: Option<SessionId>,
    /// Adapter address, child sessions connect to the same one.
    address: String,
    managed_by_parent: bool,
    connection: AdapterConnection,
    initialized: Mutex<Option<oneshot::Sender<()>>>,
    /// Session announced and ready to receive breakpoints.
    ready: AtomicBool,
    /// Last reported execution state was a stop.
    paused: AtomicBool,
    stopped_thread: Mutex<Option<ThreadId>>,
}

#[derive(Default)]
struct Focus {
    /// Announced live sessions in start order.
    started: Vec<SessionId>,
    active: Option<SessionId>,
    selected: Option<(SessionId, ThreadId)>,
}

struct Inner {
    adapters: RwLock<HashMap<String, String>>,
    sessions: Mutex<HashMap<SessionId, Arc<AdapterSession>>>,
    events: broadcast::Sender<EngineEvent>,
    breakpoints: Mutex<Vec<Breakpoint>>,
    next_breakpoint: AtomicU64,
    focus: Mutex<Focus>,
}

/// Engine talking the debug adapter protocol to adapters reached over TCP.
pub struct DapEngine {
    inner: Arc<Inner>,
}

impl DapEngine {
    /// Create engine, `adapters` maps configuration type to adapter `host:port`.
    pub fn new(adapters: HashMap<String, String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                adapters: RwLock::new(adapters),
                sessions: Mutex::default(),
                events,
                breakpoints: Mutex::default(),
                next_breakpoint: AtomicU64::new(1),
                focus: Mutex::default(),
            }),
        }
    }

    /// Replace adapter addresses, running sessions keep their connection.
    pub fn set_adapters(&self, adapters: HashMap<String, String>) {
        *self
            .inner
            .adapters
            .write()
            .unwrap_or_else(|e| e.into_inner()) = adapters;
    }
}

impl Inner {
    fn adapter_address(&self, configuration: &DebugConfiguration) -> anyhow::Result<String> {
        match configuration.extra.get("debugServer") {
            Some(Value::Number(port)) => return Ok(format!("127.0.0.1:{port}")),
            Some(Value::String(address)) => return Ok(address.clone()),
            Some(other) => bail!("invalid `debugServer` value {other}"),
            None => {}
        }

        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&configuration.kind)
            .cloned()
            .ok_or_else(|| anyhow!("no debug adapter configured for type `{}`", configuration.kind))
    }

    fn session(&self, id: &str) -> anyhow::Result<Arc<AdapterSession>> {
        lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()).into())
    }

    fn emit(&self, event: EngineEvent) {
        // no receivers is fine
        _ = self.events.send(event);
    }

    async fn connect(self: &Arc<Self>, request: StartRequest, address: String) -> anyhow::Result<bool> {
        if let Some(parent) = &request.parent {
            if !lock(&self.sessions).contains_key(parent) {
                debug!(target: "engine", "decline child session, parent {parent} is gone");
                return Ok(false);
            }
        }

        let stream = TcpStream::connect(&address)
            .await
            .with_context(|| format!("connect to debug adapter at {address}"))?;
        let (reader, writer) = stream.into_split();

        let configuration = request.configuration;
        let session = Arc::new(AdapterSession {
            id: Uuid::new_v4().to_string(),
            name: configuration.name.clone(),
            kind: configuration.kind.clone(),
            scope: configuration
                .extra
                .get("cwd")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            parent: request.parent,
            address,
            managed_by_parent: request.lifecycle_managed_by_parent,
            connection: AdapterConnection::new(Box::new(writer)),
            initialized: Mutex::default(),
            ready: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stopped_thread: Mutex::default(),
        });
        debug!(
            target: "engine",
            "session {} connected to {}, console mode {:?}",
            session.id, session.address, request.console_mode
        );

        lock(&self.sessions).insert(session.id.clone(), session.clone());
        tokio::spawn(self.clone().read_loop(session.clone(), BufReader::new(reader)));
        tokio::spawn(self.clone().handshake(session, configuration));
        Ok(true)
    }

    async fn handshake(self: Arc<Self>, session: Arc<AdapterSession>, configuration: DebugConfiguration) {
        if let Err(e) = self.try_handshake(&session, configuration).await {
            warn!(target: "engine", "session `{}` failed to start: {e:#}", session.name);
            self.finish(&session.id);
        }
    }

    async fn try_handshake(
        &self,
        session: &AdapterSession,
        configuration: DebugConfiguration,
    ) -> anyhow::Result<()> {
        let (tx, mut initialized) = oneshot::channel();
        *lock(&session.initialized) = Some(tx);

        let capabilities = session
            .connection
            .request(
                "initialize",
                json!({
                    "clientID": "dapmux",
                    "clientName": "dapmux",
                    "adapterID": configuration.kind,
                    "pathFormat": "path",
                    "linesStartAt1": true,
                    "columnsStartAt1": true,
                    "supportsVariableType": true,
                    "supportsStartDebuggingRequest": true,
                }),
            )
            .await?;
        self.announce(session);

        let command = if configuration.request == "attach" {
            "attach"
        } else {
            "launch"
        };
        let mut launch = session
            .connection
            .send(command, configuration.adapter_arguments())
            .await?;

        // adapters may answer the launch request before or after `initialized`
        let early_response = tokio::select! {
            done = &mut initialized => {
                done.map_err(|_| anyhow!("adapter closed the connection before `initialized`"))?;
                None
            }
            response = &mut launch => Some(response.map_err(|_| anyhow!("adapter closed the connection"))?),
        };
        if let Some(response) = early_response.clone() {
            response_body(command, response)?;
            initialized
                .await
                .map_err(|_| anyhow!("adapter closed the connection before `initialized`"))?;
        }

        session.ready.store(true, Ordering::Release);
        let files: Vec<String> = lock(&self.breakpoints)
            .iter()
            .map(|bp| bp.file.clone())
            .unique()
            .collect();
        for file in files {
            self.push_file(session, &file).await;
        }

        if capabilities["supportsConfigurationDoneRequest"].as_bool() == Some(true) {
            session
                .connection
                .request("configurationDone", json!({}))
                .await?;
        }

        if early_response.is_none() {
            let response = launch
                .await
                .map_err(|_| anyhow!("adapter closed the connection before answering `{command}`"))?;
            response_body(command, response)?;
        }
        info!(target: "engine", "session `{}` ({}) is running", session.name, session.id);
        Ok(())
    }

    fn announce(&self, session: &AdapterSession) {
        {
            let mut focus = lock(&self.focus);
            focus.started.push(session.id.clone());
            focus.active = Some(session.id.clone());
        }
        self.emit(EngineEvent::SessionStarted(SessionDescriptor {
            id: session.id.clone(),
            name: session.name.clone(),
            kind: session.kind.clone(),
            scope: session.scope.clone(),
            parent: session.parent.clone(),
        }));
    }

    /// Forget the session, children with a lifecycle bound to it are stopped too.
    fn finish(self: &Arc<Self>, id: &str) {
        let Some(session) = lock(&self.sessions).remove(id) else {
            return;
        };
        session.connection.close();
        lock(&session.initialized).take();

        let announced = {
            let mut focus = lock(&self.focus);
            let announced = focus.started.iter().any(|s| s == id);
            focus.started.retain(|s| s != id);
            if focus.active.as_deref() == Some(id) {
                focus.active = focus.started.last().cloned();
            }
            if matches!(&focus.selected, Some((s, _)) if s == id) {
                focus.selected = None;
            }
            announced
        };
        if announced {
            info!(target: "engine", "session `{}` ({id}) terminated", session.name);
            self.emit(EngineEvent::SessionTerminated(id.to_string()));
        }

        tokio::spawn(async move { session.connection.shutdown().await });

        let managed: Vec<SessionId> = lock(&self.sessions)
            .values()
            .filter(|s| s.managed_by_parent && s.parent.as_deref() == Some(id))
            .map(|s| s.id.clone())
            .collect();
        for child in managed {
            let inner = self.clone();
            tokio::spawn(async move {
                if let Err(e) = inner.stop(&child).await {
                    debug!(target: "engine", "stop child session {child}: {e:#}");
                }
            });
        }
    }

    async fn stop(self: &Arc<Self>, id: &str) -> anyhow::Result<()> {
        let session = self.session(id)?;
        let disconnect = session.connection.request(
            "disconnect",
            json!({ "restart": false, "terminateDebuggee": true }),
        );
        match tokio::time::timeout(DISCONNECT_TIMEOUT, disconnect).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(target: "engine", "disconnect {id}: {e:#}"),
            Err(_) => debug!(target: "engine", "disconnect {id}: no answer"),
        }
        self.finish(id);
        Ok(())
    }

    async fn read_loop(
        self: Arc<Self>,
        session: Arc<AdapterSession>,
        mut reader: BufReader<OwnedReadHalf>,
    ) {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(message)) => {
                    trace!(target: "engine", "<- {message}");
                    match message["type"].as_str() {
                        Some("response") => session.connection.complete(message),
                        Some("event") => self.on_event(&session, &message),
                        Some("request") => self.on_reverse_request(&session, &message).await,
                        _ => debug!(target: "engine", "unknown message: {message}"),
                    }
                }
                Ok(None) => {
                    debug!(target: "engine", "adapter of {} closed the connection", session.id);
                    break;
                }
                Err(e) => {
                    warn!(target: "engine", "read from adapter of {}: {e:#}", session.id);
                    break;
                }
            }
        }
        self.finish(&session.id);
    }

    fn on_event(self: &Arc<Self>, session: &AdapterSession, message: &Value) {
        let body = &message["body"];
        match message["event"].as_str().unwrap_or_default() {
            "initialized" => {
                if let Some(tx) = lock(&session.initialized).take() {
                    _ = tx.send(());
                }
            }
            "stopped" => {
                let thread = body["threadId"].as_i64();
                debug!(
                    target: "engine",
                    "session {} stopped ({}), thread {thread:?}",
                    session.id,
                    body["reason"].as_str().unwrap_or("unknown")
                );
                if let Some(thread) = thread {
                    *lock(&session.stopped_thread) = Some(thread);
                }
                session.paused.store(true, Ordering::Release);
                {
                    let mut focus = lock(&self.focus);
                    focus.active = Some(session.id.clone());
                    if let Some(thread) = thread {
                        focus.selected = Some((session.id.clone(), thread));
                    }
                }
                self.emit(EngineEvent::SessionStateChanged(
                    session.id.clone(),
                    SessionState::Paused,
                ));
            }
            "continued" => {
                session.paused.store(false, Ordering::Release);
                self.emit(EngineEvent::SessionStateChanged(
                    session.id.clone(),
                    SessionState::Running,
                ));
            }
            "exited" => {
                info!(
                    target: "engine",
                    "debuggee of `{}` exited with code {}",
                    session.name, body["exitCode"]
                );
                self.emit(EngineEvent::SessionStateChanged(
                    session.id.clone(),
                    SessionState::Stopped,
                ));
            }
            "terminated" => {
                let inner = self.clone();
                let id = session.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = inner.stop(&id).await {
                        debug!(target: "engine", "stop terminated session {id}: {e:#}");
                    }
                });
            }
            "output" => {
                if let Some(output) = body["output"].as_str() {
                    debug!(target: "engine", "[{}] {}", session.name, output.trim_end());
                }
            }
            other => trace!(target: "engine", "ignore `{other}` event"),
        }
    }

    async fn on_reverse_request(self: &Arc<Self>, session: &AdapterSession, request: &Value) {
        let result = match request["command"].as_str() {
            Some("startDebugging") => self.start_child(session, &request["arguments"]),
            Some(command) => Err(format!("unsupported request `{command}`")),
            None => Err("request without command".to_string()),
        };
        if let Err(e) = session.connection.respond(request, result).await {
            warn!(target: "engine", "answer adapter request: {e:#}");
        }
    }

    /// Child session requested by the adapter itself.
    fn start_child(
        self: &Arc<Self>,
        parent: &AdapterSession,
        arguments: &Value,
    ) -> Result<Value, String> {
        let Some(Value::Object(configuration)) = arguments.get("configuration") else {
            return Err("`startDebugging` without configuration".to_string());
        };

        let mut extra = configuration.clone();
        let mut take_string = |key: &str| {
            extra
                .remove(key)
                .and_then(|v| v.as_str().map(ToString::to_string))
        };
        let name = take_string("name").unwrap_or_else(|| format!("{} (child)", parent.name));
        let kind = take_string("type").unwrap_or_else(|| parent.kind.clone());
        take_string("request");

        let request = StartRequest {
            configuration: DebugConfiguration {
                name,
                kind,
                request: arguments["request"].as_str().unwrap_or("launch").to_string(),
                extra,
            },
            parent: Some(parent.id.clone()),
            console_mode: Default::default(),
            lifecycle_managed_by_parent: true,
        };

        let inner = self.clone();
        let address = parent.address.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.connect(request, address).await {
                warn!(target: "engine", "start child session: {e:#}");
            }
        });
        Ok(json!({}))
    }

    /// Send enabled breakpoints of `file` to the session adapter and record verification.
    async fn push_file(&self, session: &AdapterSession, file: &str) {
        let (ids, wire): (Vec<String>, Vec<Value>) = lock(&self.breakpoints)
            .iter()
            .filter(|bp| bp.file == file && bp.enabled)
            .map(|bp| (bp.id.clone(), wire_breakpoint(bp)))
            .unzip();

        let arguments = json!({
            "source": { "path": file },
            "breakpoints": wire,
        });
        match session.connection.request("setBreakpoints", arguments).await {
            Ok(body) => {
                let verified = body["breakpoints"]
                    .as_array()
                    .map(|list| {
                        list.iter()
                            .map(|bp| bp["verified"].as_bool().unwrap_or(false))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                let mut breakpoints = lock(&self.breakpoints);
                for (id, verified) in ids.iter().zip(verified) {
                    if let Some(bp) = breakpoints.iter_mut().find(|bp| &bp.id == id) {
                        bp.verified |= verified;
                    }
                }
            }
            Err(e) => warn!(target: "engine", "set breakpoints of {file} in {}: {e:#}", session.id),
        }
    }

    async fn sync_file(&self, file: &str) {
        let sessions: Vec<Arc<AdapterSession>> = lock(&self.sessions)
            .values()
            .filter(|s| s.ready.load(Ordering::Acquire))
            .cloned()
            .collect();
        for session in sessions {
            self.push_file(&session, file).await;
        }
    }

    async fn first_thread(&self, session: &AdapterSession) -> anyhow::Result<ThreadId> {
        let body = session.connection.request("threads", json!({})).await?;
        body["threads"][0]["id"]
            .as_i64()
            .ok_or_else(|| anyhow!("session {} has no threads", session.id))
    }
}

fn wire_breakpoint(bp: &Breakpoint) -> Value {
    let mut value = json!({ "line": bp.line });
    if let Some(column) = bp.column {
        value["column"] = json!(column);
    }
    if let Some(condition) = &bp.condition {
        value["condition"] = json!(condition);
    }
    if let Some(hit_condition) = &bp.hit_condition {
        value["hitCondition"] = json!(hit_condition);
    }
    if let Some(log_message) = &bp.log_message {
        value["logMessage"] = json!(log_message);
    }
    value
}

#[async_trait]
impl DebugEngine for DapEngine {
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    async fn start_session(&self, request: StartRequest) -> anyhow::Result<bool> {
        let address = self.inner.adapter_address(&request.configuration)?;
        self.inner.connect(request, address).await
    }

    async fn stop_session(&self, session: &str) -> anyhow::Result<()> {
        self.inner.stop(session).await
    }

    fn active_session(&self) -> Option<SessionId> {
        lock(&self.inner.focus).active.clone()
    }

    fn selected_frame(&self) -> Option<SelectedFrame> {
        lock(&self.inner.focus)
            .selected
            .clone()
            .map(|(session, thread_id)| SelectedFrame {
                session,
                thread_id,
                frame_id: None,
            })
    }

    async fn call(&self, session: &str, command: &str, arguments: Value) -> anyhow::Result<Value> {
        let session = self.inner.session(session)?;
        session.connection.request(command, arguments).await
    }

    async fn control(&self, session: &str, kind: StepKind) -> anyhow::Result<()> {
        let session = self.inner.session(session)?;
        let stopped = *lock(&session.stopped_thread);
        let thread = match stopped {
            Some(thread) => thread,
            None => self.inner.first_thread(&session).await?,
        };

        let mut arguments = json!({ "threadId": thread });
        if kind == StepKind::Continue {
            arguments["singleThread"] = json!(false);
        }

        // must precede the request: the `stopped` ending a step can arrive right behind the response
        let resumed = kind != StepKind::Pause && session.paused.swap(false, Ordering::AcqRel);
        if resumed {
            self.inner.emit(EngineEvent::SessionStateChanged(
                session.id.clone(),
                SessionState::Running,
            ));
        }

        if let Err(e) = session.connection.request(kind.command(), arguments).await {
            if resumed && !session.paused.swap(true, Ordering::AcqRel) {
                self.inner.emit(EngineEvent::SessionStateChanged(
                    session.id.clone(),
                    SessionState::Paused,
                ));
            }
            return Err(e);
        }
        Ok(())
    }

    fn breakpoints(&self) -> Vec<Breakpoint> {
        lock(&self.inner.breakpoints).clone()
    }

    async fn add_breakpoints(
        &self,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> anyhow::Result<Vec<Breakpoint>> {
        let added: Vec<Breakpoint> = breakpoints
            .into_iter()
            .map(|source| Breakpoint {
                id: format!(
                    "bp-{}",
                    self.inner.next_breakpoint.fetch_add(1, Ordering::Relaxed)
                ),
                file: source.file,
                line: source.line,
                column: source.column,
                condition: source.condition,
                hit_condition: source.hit_condition,
                log_message: source.log_message,
                enabled: source.enabled,
                verified: false,
            })
            .collect();
        lock(&self.inner.breakpoints).extend(added.iter().cloned());

        let files: Vec<String> = added.iter().map(|bp| bp.file.clone()).unique().collect();
        for file in files {
            self.inner.sync_file(&file).await;
        }

        let breakpoints = lock(&self.inner.breakpoints);
        Ok(added
            .iter()
            .filter_map(|bp| breakpoints.iter().find(|b| b.id == bp.id).cloned())
            .collect())
    }

    async fn remove_breakpoints(&self, ids: &[String]) -> anyhow::Result<()> {
        let files: Vec<String> = {
            let mut breakpoints = lock(&self.inner.breakpoints);
            let files = breakpoints
                .iter()
                .filter(|bp| ids.contains(&bp.id))
                .map(|bp| bp.file.clone())
                .unique()
                .collect();
            breakpoints.retain(|bp| !ids.contains(&bp.id));
            files
        };

        for file in files {
            self.inner.sync_file(&file).await;
        }
        Ok(())
    }
}
