//! End-to-end behaviour of registry, gate, orchestrator and bridge together.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use policy::{CapabilityKind, Policy};
use pretty_assertions::assert_eq;
use runtime::{
    ApprovalGate, ApprovalRequest, ChannelApprover, DENIED_RESULT, InvocationBridge,
    InvocationState, Message, NOTIFICATION_CAPACITY, Orchestrator, OrchestratorSettings, Part,
    Role, Sentinel, SessionStatus, StaticProvider, ToolDefinition, ToolError, ToolHandler,
    ToolInvocation, ToolOutput, ToolRegistry, handler_fn,
};
use serde_json::{Value, json};
use storage::EventStore;

fn read_file_schema() -> Value {
    json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]})
}

fn tagged(name: &str, tag: &'static str) -> ToolDefinition {
    ToolDefinition::new(name, format!("{name} ({tag})"), json!({"type": "object"}))
        .with_handler(handler_fn(move |_| async move { Ok(ToolOutput::new(json!(tag))) }))
}

/// A `run_command` tool that counts its invocations.
fn counted_command(calls: Arc<AtomicUsize>) -> ToolDefinition {
    ToolDefinition::new("run_command", "Run a shell command", json!({"type": "object"}))
        .with_capability(CapabilityKind::Exec)
        .with_handler(handler_fn(move |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ToolOutput::new(json!({"exit_code": 0})))
            }
        }))
}

async fn registry_with(provider: &str, tools: Vec<ToolDefinition>) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register_provider(provider, tools).await;
    registry
}

#[tokio::test]
async fn read_file_scenario() {
    let read_file = ToolDefinition::new("read_file", "Read a file", read_file_schema())
        .with_handler(handler_fn(|_| async { Ok(ToolOutput::new(json!({"content": "hi"}))) }));
    let registry = registry_with("fs", vec![read_file]).await;

    let described = registry.get_describable().await;
    assert_eq!(described.keys().collect::<Vec<_>>(), vec!["read_file"]);
    assert_eq!(Value::from(&described["read_file"].parameters), read_file_schema());

    let mut orch = Orchestrator::new(
        registry,
        ApprovalGate::new(Policy::restrictive()),
        OrchestratorSettings::default(),
    );
    orch.start_session("read");
    let result = orch.execute_tool("read_file", json!({"path": "/a.txt"})).await;

    assert!(result.success);
    assert_eq!(result.data, Some(json!({"content": "hi"})));
    let session = orch.session();
    assert_eq!(session.tool_calls.len(), 1);
    assert_eq!(session.tool_calls[0].name, "read_file");
    assert_eq!(session.tool_calls[0].params, json!({"path": "/a.txt"}));
    assert!(session.files_created.is_empty());
    assert!(session.files_modified.is_empty());
}

#[tokio::test]
async fn later_provider_wins_and_removal_does_not_restore() {
    let registry = ToolRegistry::new();
    registry.register_provider("a", [tagged("run", "a")]).await;
    registry.register_provider("b", [tagged("run", "b")]).await;

    let run = registry.get_executable("run").await.unwrap();
    assert_eq!(run.provider_id, "b");
    let handler = run.definition.handler.unwrap();
    assert_eq!(handler.call(Value::Null).await.unwrap().data, json!("b"));

    let conflicts = registry.conflicts().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!((conflicts[0].overridden.as_str(), conflicts[0].winner.as_str()), ("a", "b"));

    registry.unregister_provider("b").await;
    assert!(registry.get_executable("run").await.is_none());
}

#[tokio::test]
async fn no_channel_fails_closed_without_running_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with("local", vec![counted_command(Arc::clone(&calls))]).await;
    let mut orch = Orchestrator::new(
        registry,
        ApprovalGate::new(Policy::restrictive()),
        OrchestratorSettings::default(),
    );
    orch.start_session("t");

    let result = orch.execute_tool("run_command", json!({"command": "ls"})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not approved"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Recorded as a zero-duration failure.
    let record = &orch.session().tool_calls[0];
    assert_eq!(record.duration_ms, 0);
    assert!(!record.result.success);
}

#[tokio::test]
async fn declined_confirmation_is_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let asked = Arc::new(AtomicUsize::new(0));
    let registry = registry_with("local", vec![counted_command(Arc::clone(&calls))]).await;

    let counter = Arc::clone(&asked);
    let gate = ApprovalGate::new(Policy::restrictive()).with_channel(Arc::new(
        move |request: &ApprovalRequest| {
            assert_eq!(request.tool_name, "run_command");
            counter.fetch_add(1, Ordering::SeqCst);
            false
        },
    ));
    let mut orch = Orchestrator::new(registry, gate, OrchestratorSettings::default());
    orch.start_session("cleanup");

    let result = orch.execute_tool("run_command", json!({"command": "rm -rf /"})).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("not approved"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(orch.session().status, SessionStatus::Thinking);
    assert!(orch.session().pending_approval.is_none());
}

#[tokio::test]
async fn approval_through_channel_approver() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with("local", vec![counted_command(Arc::clone(&calls))]).await;
    let (approver, mut announced) = ChannelApprover::new();

    let ui = {
        let approver = approver.clone();
        tokio::spawn(async move {
            let request = announced.recv().await.unwrap();
            assert_eq!(request.params, json!({"command": "cargo build"}));
            approver.resolve(&request.id, true).unwrap();
        })
    };

    let gate = ApprovalGate::new(Policy::restrictive()).with_channel(Arc::new(approver));
    let mut orch = Orchestrator::new(registry, gate, OrchestratorSettings::default());
    orch.start_session("build");
    let result = orch.execute_tool("run_command", json!({"command": "cargo build"})).await;
    ui.await.unwrap();

    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn denied_capability_skips_the_channel() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with("local", vec![counted_command(Arc::clone(&calls))]).await;
    let policy = Policy::parse("[deny]\nall = [\"exec\"]").unwrap();
    let gate = ApprovalGate::new(policy).with_channel(Arc::new(|_: &ApprovalRequest| -> bool {
        panic!("channel must not be consulted")
    }));
    let mut orch = Orchestrator::new(registry, gate, OrchestratorSettings::default());
    orch.start_session("t");

    let result = orch.execute_tool("run_command", json!({"command": "ls"})).await;
    assert!(!result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn iteration_bound_stops_the_loop() {
    let registry = registry_with("local", vec![tagged("lookup", "local")]).await;
    let settings = OrchestratorSettings {
        max_iterations: 4,
        ..OrchestratorSettings::default()
    };
    let mut orch = Orchestrator::new(registry, ApprovalGate::new(Policy::restrictive()), settings);
    orch.start_session("loop");

    let mut dispatched = 0;
    let mut continues = Vec::new();
    for _ in 0..10 {
        if !orch.can_continue() {
            break;
        }
        orch.execute_tool("lookup", json!({})).await;
        dispatched += 1;
        continues.push(orch.increment_iteration());
    }

    assert_eq!(continues, vec![true, true, true, false]);
    assert_eq!(dispatched, 4);
    assert_eq!(orch.session().iteration, 4);
    assert!(!orch.can_continue());
    assert_eq!(orch.session().total_tool_calls, 4);
}

#[tokio::test]
async fn handler_errors_are_recorded() {
    let failing = ToolDefinition::new("lookup", "", json!({})).with_handler(handler_fn(|_| async {
        Err(ToolError::Execution("index missing".into()))
    }));
    let registry = registry_with("local", vec![failing]).await;
    let mut orch = Orchestrator::new(
        registry,
        ApprovalGate::new(Policy::restrictive()),
        OrchestratorSettings::default(),
    );
    orch.start_session("t");
    let result = orch.execute_tool("lookup", json!({})).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("execution failed: index missing"));
    assert_eq!(orch.session().tool_calls.len(), 1);
    assert!(orch.get_session_summary().contains("Tool calls: 1 (1 failed)"));
}

#[tokio::test]
async fn audit_log_survives_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let registry = registry_with("local", vec![tagged("lookup", "local")]).await;

    let session_id = {
        let mut orch = Orchestrator::new(
            registry,
            ApprovalGate::new(Policy::restrictive()),
            OrchestratorSettings::default(),
        )
        .with_store(EventStore::open(&path).unwrap());
        orch.start_session("persist");
        orch.execute_tool("lookup", json!({})).await;
        orch.execute_tool("write_file", json!({"path": "x"})).await; // unknown, not logged
        orch.complete();
        orch.session().id
    };

    let store = EventStore::open(&path).unwrap();
    let sessions = store.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, session_id);
    assert_eq!(sessions[0].task, "persist");
    assert_eq!(sessions[0].tool_calls, 1);
}

fn invocation(id: &str, tool: &str, state: InvocationState) -> Part {
    Part::invocation(ToolInvocation {
        tool_call_id: id.into(),
        tool_name: tool.into(),
        args: json!({"command": "ls"}),
        state,
    })
}

fn decided(id: &str, tool: &str, sentinel: Sentinel) -> Part {
    invocation(id, tool, InvocationState::Result {
        result: sentinel.to_value(),
    })
}

fn transcript(last_parts: Vec<Part>) -> Vec<Arc<Message>> {
    vec![
        Arc::new(Message::new("m1", Role::User, vec![Part::text("list files")])),
        Arc::new(Message::new("m2", Role::Assistant, last_parts)),
    ]
}

#[tokio::test]
async fn bridge_passes_unresolved_parts_through() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with("local", vec![counted_command(Arc::clone(&calls))]).await;
    let bridge = InvocationBridge::new(registry);

    let input = transcript(vec![
        Part::text("checking"),
        invocation("c1", "run_command", InvocationState::Call),
        invocation("c2", "run_command", InvocationState::PartialCall),
        invocation("c3", "run_command", InvocationState::Result {
            result: json!({"exit_code": 0}),
        }),
        decided("c4", "unknown_tool", Sentinel::Approve),
    ]);
    let output = bridge.process(&input).await;

    assert_eq!(output.len(), 2);
    assert!(Arc::ptr_eq(&output[0], &input[0]));
    assert!(Arc::ptr_eq(&output[1], &input[1]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bridge_resolves_decisions_and_notifies() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with("local", vec![
        counted_command(Arc::clone(&calls)),
        ToolDefinition::new("describe_only", "No handler", json!({})),
    ])
    .await;
    let bridge = InvocationBridge::new(registry);
    let mut notifications = bridge.subscribe();

    let input = transcript(vec![
        decided("c1", "run_command", Sentinel::Approve),
        decided("c2", "run_command", Sentinel::Deny),
        decided("c3", "describe_only", Sentinel::Approve),
        invocation("c4", "run_command", InvocationState::Call),
    ]);
    let output = bridge.process(&input).await;

    assert!(Arc::ptr_eq(&output[0], &input[0]));
    assert!(!Arc::ptr_eq(&output[1], &input[1]));
    assert_eq!(output[1].id, "m2");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let results: Vec<Option<Value>> = output[1]
        .invocations()
        .map(|i| i.result().cloned())
        .collect();
    assert_eq!(results, vec![
        Some(json!({"exit_code": 0})),
        Some(json!(DENIED_RESULT)),
        Some(Sentinel::NoHandler.to_value()),
        None,
    ]);

    let mut seen = Vec::new();
    while let Ok(n) = notifications.try_recv() {
        seen.push((n.tool_call_id, n.source, n.tool_name));
    }
    assert_eq!(seen, vec![
        ("c1".to_string(), "local".to_string(), "run_command".to_string()),
        ("c2".to_string(), "local".to_string(), "run_command".to_string()),
        ("c3".to_string(), "local".to_string(), "describe_only".to_string()),
    ]);

    // A second pass finds nothing left to do.
    let again = bridge.process(&output).await;
    assert!(Arc::ptr_eq(&again[1], &output[1]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bridge_reports_every_resolution_beyond_the_channel_buffer() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with("local", vec![counted_command(Arc::clone(&calls))]).await;
    let bridge = InvocationBridge::new(registry);
    let mut live = bridge.subscribe();

    let count = NOTIFICATION_CAPACITY + 36;
    let parts = (0..count)
        .map(|i| decided(&format!("c{i}"), "run_command", Sentinel::Approve))
        .collect();
    let resolution = bridge.resolve_transcript(&transcript(parts)).await;

    assert_eq!(calls.load(Ordering::SeqCst), count);
    assert_eq!(resolution.notifications.len(), count);
    assert_eq!(resolution.notifications[0].tool_call_id, "c0");
    assert_eq!(
        resolution.notifications[count - 1].tool_call_id,
        format!("c{}", count - 1)
    );

    // The live channel only keeps the newest messages.
    assert!(matches!(
        live.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Lagged(36))
    ));
    let mut tail = 0;
    while live.try_recv().is_ok() {
        tail += 1;
    }
    assert_eq!(tail, NOTIFICATION_CAPACITY);
}

#[tokio::test]
async fn bridge_converts_handler_failures() {
    let panicky = ToolDefinition::new("run_command", "", json!({})).with_handler(handler_fn(|_| async {
        Err(ToolError::Execution("exit status 2".into()))
    }));
    let slow = ToolDefinition::new("slow", "", json!({})).with_handler(handler_fn(|_| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(ToolOutput::new(Value::Null))
    }));
    let registry = registry_with("local", vec![panicky, slow]).await;
    let bridge = InvocationBridge::new(registry).with_timeout(Duration::from_millis(20));

    let output = bridge
        .process(&transcript(vec![
            decided("c1", "run_command", Sentinel::Approve),
            decided("c2", "slow", Sentinel::Approve),
        ]))
        .await;
    let results: Vec<Value> = output[1]
        .invocations()
        .filter_map(|i| i.result().cloned())
        .collect();
    assert_eq!(results, vec![
        Sentinel::ExecutionError.to_value(),
        Sentinel::ExecutionError.to_value()
    ]);
}

#[tokio::test]
async fn static_provider_connects() {
    let registry = ToolRegistry::new();
    registry
        .connect(Arc::new(
            StaticProvider::new("builtin").with_tools([tagged("a", "builtin"), tagged("b", "builtin")]),
        ))
        .await;
    let providers = registry.providers().await;
    assert_eq!(providers[0].tools, vec!["a", "b"]);
}
