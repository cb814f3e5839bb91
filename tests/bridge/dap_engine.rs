use crate::common::{configuration, eventually, ok_json, FakeAdapter};
use dapmux::config::LaunchConfigurations;
use dapmux::engine::dap::DapEngine;
use dapmux::engine::{DebugEngine, SessionState};
use dapmux::session::SessionRegistry;
use dapmux::tools::Tools;
use serde_json::{json, Value};
use serial_test::serial;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn dap_tools(adapter: &FakeAdapter, configurations: Vec<Value>) -> (Arc<SessionRegistry>, Tools) {
    let adapters = HashMap::from([("fake".to_string(), adapter.addr.to_string())]);
    let engine: Arc<dyn DebugEngine> = Arc::new(DapEngine::new(adapters));
    let registry = Arc::new(SessionRegistry::new(engine.clone()));
    registry.spawn_event_loop();

    let configurations = configurations
        .into_iter()
        .map(|c| serde_json::from_value(c).unwrap())
        .collect();
    let tools = Tools::new(
        engine,
        registry.clone(),
        Arc::new(LaunchConfigurations::new(configurations)),
    );
    (registry, tools)
}

#[tokio::test]
#[serial]
async fn test_adapter_session_lifecycle() {
    let adapter = FakeAdapter::start().await;
    let app = serde_json::to_value(configuration("app")).unwrap();
    let (registry, tools) = dap_tools(&adapter, vec![app]);

    let bp = ok_json(
        tools
            .call("set_breakpoint", json!({ "file": "/src/main.rs", "line": 12 }))
            .await,
    );
    assert_eq!(bp["verified"], false);

    let launched = ok_json(
        tools
            .call("launch_debug", json!({ "configuration": "app" }))
            .await,
    );
    let session = launched["sessionId"].as_str().unwrap().to_string();
    assert_eq!(*adapter.connections.lock().unwrap(), 1);

    eventually(|| {
        registry
            .get(&session)
            .is_some_and(|s| s.state == SessionState::Paused)
    })
    .await;

    let list = ok_json(tools.call("list_breakpoints", json!({})).await);
    assert_eq!(list["breakpoints"][0]["verified"], true);

    let state = ok_json(tools.call("get_debug_state", json!({})).await);
    assert_eq!(state["status"], "active");
    assert_eq!(state["session"]["id"], session.as_str());

    let location = ok_json(tools.call("get_current_location", json!({})).await);
    assert_eq!(location["sessionId"], session.as_str());
    let top = &location["locations"][0];
    assert_eq!(top["threadId"], 1);
    assert_eq!(top["file"], "/src/main.rs");
    assert_eq!(top["line"], 12);

    let stopped = ok_json(tools.call("stop_debug", json!({})).await);
    assert_eq!(stopped["sessionId"], session.as_str());
    eventually(|| registry.is_empty()).await;

    let state = ok_json(tools.call("get_debug_state", json!({})).await);
    assert_eq!(state["status"], "no_active_session");
}

#[tokio::test]
#[serial]
async fn test_adapter_started_child_session() {
    let adapter = FakeAdapter::start().await;
    let api = json!({
        "name": "api",
        "type": "fake",
        "program": "./target/debug/api",
        "spawnChild": true,
    });
    let (registry, tools) = dap_tools(&adapter, vec![api]);

    let launched = ok_json(
        tools
            .call("launch_debug", json!({ "configuration": "api" }))
            .await,
    );
    let parent = launched["sessionId"].as_str().unwrap().to_string();

    eventually(|| registry.len() == 2).await;
    assert_eq!(*adapter.connections.lock().unwrap(), 2);

    let tree = ok_json(tools.call("get_session_hierarchy", json!({})).await);
    assert_eq!(tree["totalSessions"], 2);
    let roots = tree["roots"].as_array().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["id"], parent.as_str());
    assert_eq!(roots[0]["children"][0]["name"], "worker");

    // children started by the adapter go down with their parent
    ok_json(
        tools
            .call("stop_debug", json!({ "sessionId": parent }))
            .await,
    );
    eventually(|| registry.is_empty()).await;
}

#[tokio::test]
#[serial]
async fn test_session_paused_after_step() {
    let adapter = FakeAdapter::start().await;
    let app = serde_json::to_value(configuration("app")).unwrap();
    let (registry, tools) = dap_tools(&adapter, vec![app]);

    let launched = ok_json(
        tools
            .call("launch_debug", json!({ "configuration": "app" }))
            .await,
    );
    let session = launched["sessionId"].as_str().unwrap().to_string();
    let state = || registry.get(&session).map(|s| s.state);
    eventually(|| state() == Some(SessionState::Paused)).await;

    for _ in 0..5 {
        for tool in ["step_over", "step_into", "step_out"] {
            let stepped = ok_json(tools.call(tool, json!({})).await);
            assert_eq!(stepped["sessionId"], session.as_str());

            // adapter stop arrives right behind the step response
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(state(), Some(SessionState::Paused), "after {tool}");
        }
    }

    ok_json(tools.call("continue_execution", json!({})).await);
    eventually(|| state() == Some(SessionState::Running)).await;

    ok_json(tools.call("stop_debug", json!({})).await);
    eventually(|| registry.is_empty()).await;
}
