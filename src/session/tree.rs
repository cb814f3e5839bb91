use super::Session;
use crate::engine::{SessionId, SessionState};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Forest view over the session registry, rebuilt on every request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTree {
    pub roots: Vec<SessionNode>,
    pub total_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionNode {
    pub id: SessionId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub children: Vec<SessionNode>,
}

impl SessionTree {
    /// Depth-first search for a node.
    pub fn find(&self, id: &str) -> Option<&SessionNode> {
        let mut stack: Vec<&SessionNode> = self.roots.iter().collect();
        while let Some(node) = stack.pop() {
            if node.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }
}

/// Build the forest. A session whose parent is no longer registered (orphaned by parent
/// termination) is shown as a root. Every session is visited once.
pub(super) fn build(sessions: &HashMap<SessionId, Session>) -> SessionTree {
    let mut roots: Vec<&Session> = sessions
        .values()
        .filter(|s| {
            s.parent
                .as_ref()
                .map_or(true, |parent| !sessions.contains_key(parent))
        })
        .collect();
    roots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));

    let mut visited = HashSet::with_capacity(sessions.len());
    let roots = roots
        .into_iter()
        .filter_map(|root| node(root, sessions, &mut visited))
        .collect();

    SessionTree {
        roots,
        total_sessions: sessions.len(),
    }
}

fn node(
    session: &Session,
    sessions: &HashMap<SessionId, Session>,
    visited: &mut HashSet<SessionId>,
) -> Option<SessionNode> {
    if !visited.insert(session.id.clone()) {
        return None;
    }

    let children = session
        .children
        .iter()
        .filter_map(|child_id| sessions.get(child_id))
        .filter_map(|child| node(child, sessions, visited))
        .collect();

    Some(SessionNode {
        id: session.id.clone(),
        name: session.name.clone(),
        kind: session.kind.clone(),
        state: session.state,
        scope: session.scope.clone(),
        children,
    })
}
