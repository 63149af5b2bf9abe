//! End-to-end tests for the agent loop against a scripted provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deckhand_agent::{AgentLoop, AgentStreamEvent, SubagentSettings, SubagentTool, ToolCallStatus};
use deckhand_config::{DEFAULT_SUBAGENT_SYSTEM_PROMPT, ToolsConfig};
use deckhand_core::error::{AgentError, ProviderError, ToolError};
use deckhand_core::message::{ContentBlock, Role};
use deckhand_core::provider::{
    FinalMessage, Provider, ProviderRequest, ProviderStream, StopReason, StreamChunk, Usage,
};
use deckhand_core::tool::{FnTool, ToolRegistry};
use deckhand_sandbox::Sandbox;
use deckhand_tools::default_registry;
use tokio::sync::{Barrier, mpsc};

/// One item a scripted stream delivers.
enum Step {
    Text(&'static str),
    Final(FinalMessage),
    Fail(ProviderError),
}

/// What the provider does for one request.
enum Script {
    Open(Vec<Step>),
    Refuse(ProviderError),
}

/// Replays scripts in order, one per request, and records every request.
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("provider called more often than scripted");

        let steps = match script {
            Script::Refuse(err) => return Err(err),
            Script::Open(steps) => steps,
        };

        let (tx, rx) = mpsc::channel(steps.len().max(1));
        for step in steps {
            let item = match step {
                Step::Text(t) => Ok(StreamChunk::Text(t.to_string())),
                Step::Final(message) => Ok(StreamChunk::Final(message)),
                Step::Fail(err) => Err(err),
            };
            tx.send(item).await.unwrap();
        }
        Ok(rx)
    }
}

fn final_message(content: Vec<ContentBlock>, stop_reason: StopReason) -> FinalMessage {
    FinalMessage {
        content,
        stop_reason,
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    }
}

fn answer(text: &'static str) -> Script {
    Script::Open(vec![
        Step::Text(text),
        Step::Final(final_message(vec![ContentBlock::text(text)], StopReason::EndTurn)),
    ])
}

fn tool_round(uses: Vec<ContentBlock>) -> Script {
    Script::Open(vec![Step::Final(final_message(uses, StopReason::ToolUse))])
}

fn project() -> (tempfile::TempDir, Arc<ToolRegistry>) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.py"), "x = 1\n").unwrap();
    let sandbox = Arc::new(Sandbox::new(dir.path()).unwrap());
    let registry = default_registry(sandbox, &ToolsConfig::default());
    (dir, Arc::new(registry))
}

/// Run one turn and collect every event it emitted.
async fn run(
    agent: &mut AgentLoop,
    content: &str,
) -> (Result<(), AgentError>, Vec<AgentStreamEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    let outcome = agent.stream_message(content, tx).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

fn statuses(events: &[AgentStreamEvent]) -> Vec<(&str, ToolCallStatus)> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentStreamEvent::ToolCall { name, status, .. } => Some((name.as_str(), *status)),
            _ => None,
        })
        .collect()
}

// ── Tool rounds ─────────────────────────────────────────────────────────

#[tokio::test]
async fn read_file_round_trip() {
    let (_dir, registry) = project();
    let provider = ScriptedProvider::new(vec![
        Script::Open(vec![
            Step::Text("Let me read it."),
            Step::Final(final_message(
                vec![
                    ContentBlock::text("Let me read it."),
                    ContentBlock::tool_use("toolu_1", "read_file", serde_json::json!({"path": "x.py"})),
                ],
                StopReason::ToolUse,
            )),
        ]),
        answer("It sets x to 1."),
    ]);

    let mut agent = AgentLoop::new(provider.clone(), "mock-model").with_tools(registry);
    let (outcome, events) = run(&mut agent, "What does x.py do?").await;
    outcome.unwrap();

    let messages = &agent.conversation().messages;
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::User, Role::Assistant]);

    match messages[2].blocks() {
        [ContentBlock::ToolResult { tool_use_id, content, is_error }] => {
            assert_eq!(tool_use_id, "toolu_1");
            assert!(content.contains('x'));
            assert!(content.contains("x = 1"));
            assert!(!*is_error);
        }
        other => panic!("expected a single tool result, got {other:?}"),
    }
    assert_eq!(messages[3].text(), "It sets x to 1.");

    assert_eq!(
        events,
        vec![
            AgentStreamEvent::Text { content: "Let me read it.".into() },
            AgentStreamEvent::PreambleEnd,
            AgentStreamEvent::ToolCall {
                name: "read_file".into(),
                status: ToolCallStatus::Started,
                summary: "Reading file x.py".into(),
                error: None,
            },
            AgentStreamEvent::ToolCall {
                name: "read_file".into(),
                status: ToolCallStatus::Completed,
                summary: "Reading file x.py".into(),
                error: None,
            },
            AgentStreamEvent::Text { content: "It sets x to 1.".into() },
        ]
    );

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[1].messages.len(), 3);
    assert!(requests[0].tools.iter().any(|t| t.name == "read_file"));
    assert_eq!(agent.usage().unwrap().requests, 2);
}

#[tokio::test]
async fn no_preamble_end_without_streamed_text() {
    let (_dir, registry) = project();
    let provider = ScriptedProvider::new(vec![
        tool_round(vec![ContentBlock::tool_use(
            "toolu_1",
            "list_files",
            serde_json::json!({}),
        )]),
        answer("One file."),
    ]);

    let mut agent = AgentLoop::new(provider, "mock-model").with_tools(registry);
    let (outcome, events) = run(&mut agent, "list").await;
    outcome.unwrap();
    assert!(!events.contains(&AgentStreamEvent::PreambleEnd));
}

#[tokio::test]
async fn tool_failures_do_not_abort_siblings() {
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::from_sync(
        "works",
        "always succeeds",
        serde_json::json!({"type": "object"}),
        |_| Ok(serde_json::json!({"ok": true})),
    ));
    registry.register(FnTool::from_sync(
        "breaks",
        "always fails",
        serde_json::json!({"type": "object"}),
        |_| {
            Err(ToolError::ExecutionFailed {
                tool_name: "breaks".into(),
                reason: "boom".into(),
            })
        },
    ));

    let provider = ScriptedProvider::new(vec![
        tool_round(vec![
            ContentBlock::tool_use("t1", "breaks", serde_json::json!({})),
            ContentBlock::tool_use("t2", "works", serde_json::json!({})),
            ContentBlock::tool_use("t3", "missing", serde_json::json!({})),
        ]),
        answer("Partly done."),
    ]);

    let mut agent = AgentLoop::new(provider, "mock-model").with_tools(Arc::new(registry));
    let (outcome, events) = run(&mut agent, "go").await;
    outcome.unwrap();

    let results: Vec<(String, String, bool)> = agent.conversation().messages[2]
        .blocks()
        .iter()
        .map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                (tool_use_id.clone(), content.clone(), *is_error)
            }
            other => panic!("unexpected block {other:?}"),
        })
        .collect();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "t1");
    assert!(results[0].1.contains("boom"));
    assert!(results[0].2);
    assert_eq!(
        results[1],
        (String::from("t2"), String::from(r#"{"ok":true}"#), false)
    );
    assert_eq!(results[2].0, "t3");
    assert!(results[2].1.contains("Unknown tool"));
    assert!(results[2].2);

    let statuses = statuses(&events);
    assert_eq!(
        statuses,
        vec![
            ("breaks", ToolCallStatus::Started),
            ("works", ToolCallStatus::Started),
            ("missing", ToolCallStatus::Started),
            ("breaks", ToolCallStatus::Failed),
            ("works", ToolCallStatus::Completed),
            ("missing", ToolCallStatus::Failed),
        ]
    );
    let failed_error = events.iter().find_map(|e| match e {
        AgentStreamEvent::ToolCall {
            status: ToolCallStatus::Failed,
            error,
            ..
        } => error.clone(),
        _ => None,
    });
    assert!(failed_error.unwrap().contains("boom"));
}

#[tokio::test]
async fn tool_calls_in_one_round_run_concurrently() {
    // Each handler waits for the other; sequential dispatch would never finish.
    let barrier = Arc::new(Barrier::new(2));
    let mut registry = ToolRegistry::new();
    for name in ["left", "right"] {
        let barrier = Arc::clone(&barrier);
        registry.register(FnTool::new(
            name,
            "waits at the barrier",
            serde_json::json!({"type": "object"}),
            move |_| {
                let barrier = Arc::clone(&barrier);
                async move {
                    barrier.wait().await;
                    Ok(serde_json::json!("through"))
                }
            },
        ));
    }

    let provider = ScriptedProvider::new(vec![
        tool_round(vec![
            ContentBlock::tool_use("t1", "left", serde_json::json!({})),
            ContentBlock::tool_use("t2", "right", serde_json::json!({})),
        ]),
        answer("Both done."),
    ]);

    let mut agent = AgentLoop::new(provider, "mock-model").with_tools(Arc::new(registry));
    let text = tokio::time::timeout(Duration::from_secs(5), agent.collect_text("go"))
        .await
        .expect("tool calls were not dispatched concurrently")
        .unwrap();
    assert_eq!(text, "Both done.");
}

#[tokio::test]
async fn tool_requests_without_registry_end_the_turn() {
    let provider = ScriptedProvider::new(vec![tool_round(vec![ContentBlock::tool_use(
        "t1",
        "read_file",
        serde_json::json!({"path": "x.py"}),
    )])]);

    let mut agent = AgentLoop::new(provider.clone(), "mock-model");
    let (outcome, events) = run(&mut agent, "read x.py").await;
    outcome.unwrap();

    assert_eq!(agent.conversation().len(), 2);
    assert!(events.is_empty());
    assert!(provider.requests()[0].tools.is_empty());
}

fn read_x(id: &'static str) -> Script {
    tool_round(vec![ContentBlock::tool_use(
        id,
        "read_file",
        serde_json::json!({"path": "x.py"}),
    )])
}

#[tokio::test]
async fn endless_tool_requests_stop_at_the_round_limit() {
    let (_dir, registry) = project();
    let provider = ScriptedProvider::new(vec![read_x("t1"), read_x("t2"), read_x("t3")]);

    let mut agent = AgentLoop::new(provider.clone(), "mock-model")
        .with_tools(registry)
        .with_max_tool_iterations(2);
    let (outcome, events) = run(&mut agent, "keep reading").await;

    assert!(matches!(outcome, Err(AgentError::ToolRoundLimit(2))));
    assert_eq!(provider.requests().len(), 3);
    assert_eq!(
        statuses(&events),
        vec![
            ("read_file", ToolCallStatus::Started),
            ("read_file", ToolCallStatus::Completed),
            ("read_file", ToolCallStatus::Started),
            ("read_file", ToolCallStatus::Completed),
        ]
    );

    // Every tool use still gets a result, the refused one flagged as an error.
    let messages = &agent.conversation().messages;
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
        ]
    );
    match messages[6].blocks() {
        [ContentBlock::ToolResult { tool_use_id, content, is_error }] => {
            assert_eq!(tool_use_id, "t3");
            assert!(*is_error);
            assert!(content.contains("2 tool rounds"));
        }
        other => panic!("expected a single tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn round_limit_allows_a_final_answer() {
    let (_dir, registry) = project();
    let provider = ScriptedProvider::new(vec![read_x("t1"), answer("x is one.")]);

    let mut agent = AgentLoop::new(provider, "mock-model")
        .with_tools(registry)
        .with_max_tool_iterations(1);
    let text = agent.collect_text("read it").await.unwrap();

    assert_eq!(text, "x is one.");
    assert_eq!(agent.conversation().len(), 4);
}

// ── Provider failures ───────────────────────────────────────────────────

#[tokio::test]
async fn connection_loss_keeps_partial_text() {
    let provider = ScriptedProvider::new(vec![Script::Open(vec![
        Step::Text("He"),
        Step::Text("llo"),
        Step::Fail(ProviderError::Connection("reset by peer".into())),
    ])]);

    let mut agent = AgentLoop::new(provider, "mock-model");
    let (outcome, events) = run(&mut agent, "Hi").await;

    assert!(matches!(outcome, Err(AgentError::Connection(_))));
    let messages = &agent.conversation().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), "Hello");
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn stream_closing_early_is_a_connection_error() {
    let provider = ScriptedProvider::new(vec![Script::Open(vec![Step::Text("partial")])]);

    let mut agent = AgentLoop::new(provider, "mock-model");
    let (outcome, _) = run(&mut agent, "Hi").await;

    assert!(matches!(outcome, Err(AgentError::Connection(_))));
    assert_eq!(agent.conversation().last().unwrap().text(), "partial");
}

#[tokio::test]
async fn timeout_without_text_discards_the_user_turn() {
    let provider = ScriptedProvider::new(vec![
        answer("First answer."),
        Script::Open(vec![Step::Fail(ProviderError::Timeout("no data".into()))]),
    ]);

    let mut agent = AgentLoop::new(provider, "mock-model");
    agent.collect_text("first").await.unwrap();

    let err = agent.collect_text("second").await.unwrap_err();
    assert!(matches!(err, AgentError::Timeout(_)));
    assert_eq!(agent.conversation().len(), 2);
    assert_eq!(agent.conversation().last().unwrap().text(), "First answer.");
}

#[tokio::test]
async fn authentication_failure_discards_the_user_turn() {
    let provider = ScriptedProvider::new(vec![Script::Refuse(ProviderError::AuthenticationFailed(
        "invalid x-api-key".into(),
    ))]);

    let mut agent = AgentLoop::new(provider, "mock-model");
    let err = agent.collect_text("Hi").await.unwrap_err();

    assert!(matches!(err, AgentError::Credentials(_)));
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn status_error_carries_status_and_message() {
    let provider = ScriptedProvider::new(vec![Script::Open(vec![
        Step::Text("Working on"),
        Step::Fail(ProviderError::Status {
            status_code: 529,
            message: "Overloaded".into(),
        }),
    ])]);

    let mut agent = AgentLoop::new(provider, "mock-model");
    let err = agent.collect_text("Hi").await.unwrap_err();

    match err {
        AgentError::Provider { status, message } => {
            assert_eq!(status, 529);
            assert_eq!(message, "Overloaded");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn failure_after_a_tool_round_leaves_no_dangling_tool_use() {
    let (_dir, registry) = project();
    let provider = ScriptedProvider::new(vec![
        tool_round(vec![ContentBlock::tool_use(
            "toolu_1",
            "read_file",
            serde_json::json!({"path": "x.py"}),
        )]),
        Script::Refuse(ProviderError::Status {
            status_code: 500,
            message: "Internal error".into(),
        }),
    ]);

    let mut agent = AgentLoop::new(provider, "mock-model").with_tools(registry);
    let err = agent.collect_text("read it").await.unwrap_err();

    assert!(matches!(err, AgentError::Provider { status: 500, .. }));
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn timeout_after_a_tool_round_keeps_partial_text() {
    let (_dir, registry) = project();
    let provider = ScriptedProvider::new(vec![
        read_x("toolu_1"),
        Script::Open(vec![
            Step::Text("x is "),
            Step::Text("one"),
            Step::Fail(ProviderError::Timeout("idle stream".into())),
        ]),
    ]);

    let mut agent = AgentLoop::new(provider, "mock-model").with_tools(registry);
    let (outcome, events) = run(&mut agent, "read it").await;

    assert!(matches!(outcome, Err(AgentError::Timeout(_))));
    let messages = &agent.conversation().messages;
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::User, Role::Assistant]);
    match messages[2].blocks() {
        [ContentBlock::ToolResult { tool_use_id, is_error, .. }] => {
            assert_eq!(tool_use_id, "toolu_1");
            assert!(!*is_error);
        }
        other => panic!("expected a single tool result, got {other:?}"),
    }
    assert_eq!(messages[3].text(), "x is one");
    assert_eq!(
        statuses(&events),
        vec![
            ("read_file", ToolCallStatus::Started),
            ("read_file", ToolCallStatus::Completed),
        ]
    );
}

// ── Sub-agents ──────────────────────────────────────────────────────────

fn with_subagent(
    registry: &ToolRegistry,
    provider: Arc<ScriptedProvider>,
) -> Arc<ToolRegistry> {
    let mut parent = registry.clone_excluding(&[]);
    parent.register(SubagentTool::new(provider, SubagentSettings::new("mock-model")));
    Arc::new(parent)
}

#[tokio::test]
async fn subagent_runs_in_isolation() {
    let (_dir, base) = project();
    let provider = ScriptedProvider::new(vec![
        // parent delegates
        tool_round(vec![ContentBlock::tool_use(
            "toolu_p",
            "create_subagent",
            serde_json::json!({"task": "Inspect x.py"}),
        )]),
        // child reads the file, then answers
        tool_round(vec![ContentBlock::tool_use(
            "toolu_c",
            "read_file",
            serde_json::json!({"path": "x.py"}),
        )]),
        answer("done"),
        // parent wraps up
        answer("The sub-agent finished."),
    ]);

    let registry = with_subagent(&base, provider.clone());
    let mut agent = AgentLoop::new(provider.clone(), "mock-model").with_tools(Arc::clone(&registry));
    let (outcome, events) = run(&mut agent, "Delegate the inspection").await;
    outcome.unwrap();

    let messages = &agent.conversation().messages;
    assert_eq!(messages.len(), 4);
    match messages[2].blocks() {
        [ContentBlock::ToolResult { tool_use_id, content, is_error }] => {
            assert_eq!(tool_use_id, "toolu_p");
            assert_eq!(content, r#"{"result":"done"}"#);
            assert!(!*is_error);
        }
        other => panic!("expected a single tool result, got {other:?}"),
    }

    // Child text never reaches the parent's event stream.
    assert!(!events.contains(&AgentStreamEvent::Text { content: "done".into() }));

    let requests = provider.requests();
    assert_eq!(requests.len(), 4);
    let child = &requests[1];
    assert_eq!(child.system, DEFAULT_SUBAGENT_SYSTEM_PROMPT);
    assert_eq!(child.messages.len(), 1);
    assert_eq!(child.messages[0].text(), "Inspect x.py");
    assert!(child.tools.iter().any(|t| t.name == "read_file"));
    assert!(child.tools.iter().all(|t| t.name != "create_subagent"));
    assert!(requests[0].tools.iter().any(|t| t.name == "create_subagent"));

    // The parent's registry still offers delegation; only the parent is metered.
    assert!(registry.contains("create_subagent"));
    assert_eq!(agent.usage().unwrap().requests, 2);
}

#[tokio::test]
async fn subagent_failure_becomes_an_error_result() {
    let (_dir, base) = project();
    let provider = ScriptedProvider::new(vec![
        tool_round(vec![ContentBlock::tool_use(
            "toolu_p",
            "create_subagent",
            serde_json::json!({"task": "Inspect x.py"}),
        )]),
        Script::Refuse(ProviderError::Status {
            status_code: 529,
            message: "Overloaded".into(),
        }),
        answer("The sub-agent could not run."),
    ]);

    let registry = with_subagent(&base, provider.clone());
    let mut agent = AgentLoop::new(provider, "mock-model").with_tools(registry);
    agent.collect_text("Delegate").await.unwrap();

    match agent.conversation().messages[2].blocks() {
        [ContentBlock::ToolResult { content, is_error, .. }] => {
            assert!(*is_error);
            assert!(content.contains("Overloaded"));
        }
        other => panic!("expected a single tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn subagent_inherits_the_round_limit() {
    let (_dir, base) = project();
    let provider = ScriptedProvider::new(vec![
        // parent delegates
        tool_round(vec![ContentBlock::tool_use(
            "toolu_p",
            "create_subagent",
            serde_json::json!({"task": "Keep reading x.py"}),
        )]),
        // child: one allowed round, then a refused one
        read_x("toolu_c1"),
        read_x("toolu_c2"),
        // parent wraps up
        answer("The sub-agent gave up."),
    ]);

    let mut settings = SubagentSettings::new("mock-model");
    settings.max_tool_iterations = 1;
    let mut parent = base.clone_excluding(&[]);
    parent.register(SubagentTool::new(provider.clone(), settings));

    let mut agent = AgentLoop::new(provider.clone(), "mock-model").with_tools(Arc::new(parent));
    agent.collect_text("Delegate").await.unwrap();

    assert_eq!(provider.requests().len(), 4);
    match agent.conversation().messages[2].blocks() {
        [ContentBlock::ToolResult { content, is_error, .. }] => {
            assert!(*is_error);
            assert!(content.contains("1 tool rounds"));
        }
        other => panic!("expected a single tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn subagent_rejects_empty_task() {
    let (_dir, base) = project();
    let provider = ScriptedProvider::new(vec![]);
    let registry = with_subagent(&base, provider);

    let err = registry
        .execute("create_subagent", serde_json::json!({"task": "  "}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));
}
