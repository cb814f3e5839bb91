//! Live debug session registry.
//!
//! The registry is the single source of truth for which sessions exist and how they are nested.
//! It is fed by engine lifecycle events (which are not ordered relative to tool calls), so all
//! mutation happens under one lock and never across an await point.

mod tree;

pub use tree::{SessionNode, SessionTree};

use crate::engine::{
    ConsoleMode, DebugConfiguration, DebugEngine, EngineEvent, SessionDescriptor, SessionId,
    SessionState, StartRequest,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// How long `launch` waits for the engine to report the new session.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracked debug session.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub kind: String,
    pub scope: Option<String>,
    pub parent: Option<SessionId>,
    pub children: IndexSet<SessionId>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

impl Session {
    fn new(descriptor: SessionDescriptor, parent: Option<SessionId>) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name,
            kind: descriptor.kind,
            scope: descriptor.scope,
            parent,
            children: IndexSet::new(),
            state: SessionState::Running,
            started_at: Utc::now(),
        }
    }

    /// Time elapsed since the session was registered.
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// Options of a child session launch.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChildOptions {
    pub console_mode: ConsoleMode,
    pub lifecycle_managed_by_parent: bool,
}

pub struct SessionRegistry {
    engine: Arc<dyn DebugEngine>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    /// Fires after a session is inserted into `sessions`.
    started: broadcast::Sender<SessionDescriptor>,
    launch_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn DebugEngine>) -> Self {
        let (started, _) = broadcast::channel(64);
        Self {
            engine,
            sessions: Mutex::default(),
            started,
            launch_timeout: LAUNCH_TIMEOUT,
        }
    }

    pub fn with_launch_timeout(self, launch_timeout: Duration) -> Self {
        Self {
            launch_timeout,
            ..self
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consume engine lifecycle events until the engine goes away.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.engine.subscribe();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => registry.handle_event(event),
                    Err(RecvError::Lagged(n)) => {
                        warn!(target: "session", "{n} engine events lost, registry may be stale");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(target: "session", "engine event loop finished");
        })
    }

    pub fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::SessionStarted(descriptor) => self.on_session_started(descriptor),
            EngineEvent::SessionTerminated(id) => self.on_session_terminated(&id),
            EngineEvent::SessionStateChanged(id, state) => self.update_state(&id, state),
        }
    }

    pub fn on_session_started(&self, descriptor: SessionDescriptor) {
        {
            let mut sessions = self.sessions();
            if sessions.contains_key(&descriptor.id) {
                return;
            }

            let parent = match descriptor.parent.as_ref() {
                Some(parent_id) => match sessions.get_mut(parent_id) {
                    Some(parent) => {
                        parent.children.insert(descriptor.id.clone());
                        Some(parent_id.clone())
                    }
                    None => {
                        warn!(
                            target: "session",
                            "session `{}` reports unknown parent `{parent_id}`, tracked as root",
                            descriptor.id
                        );
                        None
                    }
                },
                None => None,
            };

            info!(target: "session", "session started: {} ({})", descriptor.id, descriptor.name);
            sessions.insert(
                descriptor.id.clone(),
                Session::new(descriptor.clone(), parent),
            );
        }

        // no receivers is fine: nobody is waiting for a launch
        _ = self.started.send(descriptor);
    }

    /// Forget a session. Its children stay registered until their own termination arrives.
    pub fn on_session_terminated(&self, id: &str) {
        let mut sessions = self.sessions();
        let Some(session) = sessions.remove(id) else {
            return;
        };

        if let Some(parent) = session
            .parent
            .as_ref()
            .and_then(|parent_id| sessions.get_mut(parent_id))
        {
            parent.children.shift_remove(id);
        }

        info!(target: "session", "session terminated: {id} ({})", session.name);
    }

    /// Overwrite session state, ids of unknown sessions are ignored.
    pub fn update_state(&self, id: &str, state: SessionState) {
        if let Some(session) = self.sessions().get_mut(id) {
            debug!(target: "session", "session {id}: {} -> {state}", session.state);
            session.state = state;
        }
    }

    /// Start a root session and wait until the engine reports it.
    pub async fn launch(&self, configuration: DebugConfiguration) -> Result<SessionId> {
        self.start_and_wait(StartRequest::root(configuration)).await
    }

    /// Start a session nested under `parent`.
    pub async fn launch_child(
        &self,
        parent: &str,
        configuration: DebugConfiguration,
        options: ChildOptions,
    ) -> Result<SessionId> {
        if !self.contains(parent) {
            return Err(Error::ParentNotFound(parent.to_string()));
        }

        self.start_and_wait(StartRequest {
            configuration,
            parent: Some(parent.to_string()),
            console_mode: options.console_mode,
            lifecycle_managed_by_parent: options.lifecycle_managed_by_parent,
        })
        .await
    }

    async fn start_and_wait(&self, request: StartRequest) -> Result<SessionId> {
        // subscribe before the request goes out, the start event may beat the engine answer
        let mut started = self.started.subscribe();
        let name = request.configuration.name.clone();
        let parent = request.parent.clone();

        match self.engine.start_session(request).await {
            Ok(true) => {}
            Ok(false) => return Err(Error::LaunchRejected(format!("`{name}`"))),
            Err(e) => return Err(Error::LaunchRejected(format!("`{name}`: {e:#}"))),
        }

        let wait = async {
            loop {
                match started.recv().await {
                    Ok(descriptor) => {
                        // a root launch must not pick up an adapter-spawned child
                        if descriptor.parent == parent {
                            return Some(descriptor.id);
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(self.launch_timeout, wait).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) | Err(_) => Err(Error::LaunchTimeout(
                name,
                self.launch_timeout.as_secs(),
            )),
        }
    }

    /// Stop the given session, or the active one.
    pub async fn terminate(&self, id: Option<&str>) -> Result<SessionId> {
        let id = match id {
            Some(id) if self.contains(id) => id.to_string(),
            Some(id) => return Err(Error::SessionNotFound(id.to_string())),
            None => self.engine.active_session().ok_or(Error::NoActiveSession)?,
        };

        self.engine
            .stop_session(&id)
            .await
            .map_err(Error::from)?;
        Ok(id)
    }

    pub fn tree(&self) -> SessionTree {
        tree::build(&self.sessions())
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All sessions ordered by start time.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<_> = self.sessions().values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Tracked session the engine considers active.
    pub fn active(&self) -> Option<Session> {
        self.engine
            .active_session()
            .and_then(|id| self.get(&id))
    }
}
