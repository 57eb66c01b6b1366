//! Engine Tests
//!
//! Tool call step, dispatcher concurrency and the agent loop, exercised
//! through the public API.
//!
//! Run: cargo nextest run --test engine_tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use agent_runtime::agent::{RecordingSink, ToolCallStep};
use agent_runtime::session::{Conversation, MemoryThreadStore, ThreadRef, ThreadStore};
use agent_runtime::suspension::SuspensionMetadata;
use agent_runtime::tools::{FnTool, ToolRegistry};
use agent_runtime::types::{Message, MessagePart, ToolCallRequest};
use serde_json::{Value, json};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn assistant_turn() -> Conversation {
    Conversation::from_messages([
        Message::user("please help"),
        Message::assistant(vec![MessagePart::text("on it")]),
    ])
}

fn step(registry: ToolRegistry) -> (ToolCallStep, RecordingSink) {
    let sink = RecordingSink::new();
    let step = ToolCallStep::new(
        Arc::new(registry),
        SuspensionMetadata::new(assistant_turn()),
        "run-1",
    )
    .with_events(Arc::new(sink.clone()));
    (step, sink)
}

fn counter_tool(name: &str, calls: &Arc<AtomicUsize>) -> FnTool {
    let calls = Arc::clone(calls);
    FnTool::new(name, "counts executions").with_handler(move |args, _| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(args)
        }
    })
}

// =============================================================================
// Tool call step
// =============================================================================

mod step_tests {
    use super::*;
    use agent_runtime::agent::{AgentEvent, StepOutcome};
    use agent_runtime::suspension::SuspensionKind;
    use agent_runtime::tools::RequestContext;
    use agent_runtime::types::{NOT_APPROVED_MESSAGE, ToolError};

    #[tokio::test]
    async fn test_end_to_end_search() {
        init_tracing();
        let registry = ToolRegistry::new().with_tool(
            FnTool::new("search", "Search")
                .with_requires_approval(false)
                .with_handler(|_, _| async { Ok(json!({"hits": 3})) }),
        );
        let (step, sink) = step(registry);

        let request = ToolCallRequest::new("c1", "search", json!({"q": "x"}));
        let StepOutcome::Completed(outcome) = step.run(&request, None).await else {
            panic!("search should not park");
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "toolCallId": "c1",
                "toolName": "search",
                "args": {"q": "x"},
                "result": {"hits": 3}
            })
        );
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_args_report_guidance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (step, _) = step(ToolRegistry::new().with_tool(counter_tool("search", &calls)));

        for request in [
            ToolCallRequest::malformed("c1", "search"),
            ToolCallRequest::new("c2", "search", Value::Null),
        ] {
            let outcome = step.run(&request, None).await.completed().unwrap();
            let message = outcome.error().unwrap().to_string().to_lowercase();
            assert!(
                ["invalid", "malformed", "json", "args", "arguments"]
                    .iter()
                    .any(|needle| message.contains(needle)),
                "unexpected message: {}",
                message
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_found_lists_every_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new()
            .with_tool(counter_tool("read_file", &calls))
            .with_tool(counter_tool("write_file", &calls))
            .with_tool(counter_tool("search", &calls));
        let (step, _) = step(registry);

        let outcome = step
            .run(&ToolCallRequest::new("c1", "fs.read_file", json!({})), None)
            .await
            .completed()
            .unwrap();
        let message = outcome.error().unwrap().to_string();
        for name in ["read_file", "write_file", "search"] {
            assert!(message.contains(name), "{} missing from {}", name, message);
        }
        assert!(matches!(outcome.error(), Some(ToolError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_approval_parks_with_label_and_record() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new()
            .with_tool(counter_tool("deploy", &calls).with_requires_approval(true));
        let conversation = assistant_turn();
        let store = Arc::new(MemoryThreadStore::new());
        let sink = RecordingSink::new();
        let step = ToolCallStep::new(
            Arc::new(registry),
            SuspensionMetadata::new(conversation.clone())
                .with_store(store.clone(), ThreadRef::new("thread-1")),
            "run-1",
        )
        .with_events(Arc::new(sink.clone()));

        let request = ToolCallRequest::new("call-42", "deploy", json!({"env": "prod"}));
        let parked = step.run(&request, None).await.parked().unwrap();

        assert_eq!(parked.resume_label, "call-42");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let events = sink.events();
        let [AgentEvent::ToolCallApproval(event)] = events.as_slice() else {
            panic!("expected one approval event, got {:?}", events);
        };
        assert_eq!(event.tool_name, "deploy");
        assert_eq!(event.args, json!({"env": "prod"}));
        assert_eq!(event.resume_schema["properties"]["approved"]["type"], "boolean");

        let record = step
            .metadata()
            .find("deploy", SuspensionKind::Approval)
            .await
            .unwrap();
        assert_eq!(record.tool_call_id, "call-42");

        assert!(store.get_thread("thread-1").await.unwrap().is_some());
        let persisted = store.load_messages("thread-1").await.unwrap();
        assert!(persisted.iter().any(|m| {
            m.message
                .metadata
                .pending_tool_approvals
                .as_ref()
                .is_some_and(|records| records.contains_key("deploy"))
        }));
    }

    #[tokio::test]
    async fn test_decline_never_executes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (step, _) = step(
            ToolRegistry::new().with_tool(counter_tool("deploy", &calls).with_requires_approval(true)),
        );
        let request = ToolCallRequest::new("c1", "deploy", json!({"env": "prod"}));

        assert!(step.run(&request, None).await.is_parked());
        let outcome = step
            .run(&request, Some(&json!({"approved": false})))
            .await
            .completed()
            .unwrap();

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "toolCallId": "c1",
                "toolName": "deploy",
                "args": {"env": "prod"},
                "result": NOT_APPROVED_MESSAGE
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug, PartialEq)]
    struct Session {
        user: String,
        scopes: Vec<String>,
    }

    #[tokio::test]
    async fn test_approve_executes_once_with_request_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = ToolRegistry::new().with_tool(
            FnTool::new("deploy", "Deploy")
                .with_requires_approval(true)
                .with_handler(move |args, ctx| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let session = ctx.request_context().extension::<Session>().unwrap();
                        Ok(json!({
                            "args": args,
                            "user": session.user,
                            "scopes": session.scopes,
                            "trace": ctx.request_context().get("trace"),
                        }))
                    }
                }),
        );
        let request_context = RequestContext::new()
            .with_value("trace", json!({"id": "abc", "spans": [1, 2]}))
            .with_extension(Session {
                user: "ada".to_string(),
                scopes: vec!["deploy".to_string()],
            });
        let (step, _) = step(registry);
        let step = step.with_request_context(request_context);
        let request = ToolCallRequest::new("c1", "deploy", json!({"env": "prod"}));

        assert!(step.run(&request, None).await.is_parked());
        let outcome = step
            .run(&request, Some(&json!({"approved": true})))
            .await
            .completed()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome.value().unwrap(),
            &json!({
                "args": {"env": "prod"},
                "user": "ada",
                "scopes": ["deploy"],
                "trace": {"id": "abc", "spans": [1, 2]}
            })
        );
    }

    #[tokio::test]
    async fn test_provider_executed_results() {
        let (step, _) = step(ToolRegistry::new());

        let without = ToolCallRequest::new("c1", "code_interpreter", json!({})).provider_executed(None);
        assert_eq!(
            step.run(&without, None).await.completed().unwrap().value(),
            Some(&json!({"providerExecuted": true, "toolName": "code_interpreter"}))
        );

        let output = json!({"stdout": "42\n"});
        let with = ToolCallRequest::new("c2", "code_interpreter", json!({}))
            .provider_executed(Some(output.clone()));
        assert_eq!(
            step.run(&with, None).await.completed().unwrap().value(),
            Some(&output)
        );
    }

    #[tokio::test]
    async fn test_failures_carry_error_only() {
        let registry = ToolRegistry::new()
            .with_tool(
                FnTool::new("fails", "f")
                    .with_handler(|_, _| async { Err(ToolError::execution_failed("disk full")) }),
            )
            .with_tool(FnTool::new("panics", "p").with_handler(|args: Value, _| async move {
                if args.is_object() {
                    panic!("index out of bounds");
                }
                Ok(args)
            }));
        let (step, _) = step(registry);

        for name in ["fails", "panics"] {
            let outcome = step
                .run(&ToolCallRequest::new("c1", name, json!({})), None)
                .await
                .completed()
                .unwrap();
            let value = serde_json::to_value(&outcome).unwrap();
            assert!(value.get("error").is_some());
            assert!(value.get("result").is_none());
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

mod dispatcher_tests {
    use super::*;
    use agent_runtime::agent::{ConcurrencyPolicy, DispatchOutcome, ToolCallDispatcher};

    #[test]
    fn test_concurrency_forced_to_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let plain = ToolRegistry::new().with_tool(counter_tool("search", &calls));

        assert_eq!(ConcurrencyPolicy::for_tools(&plain, false, 32).limit(), 32);
        assert_eq!(ConcurrencyPolicy::for_tools(&plain, false, 0).limit(), 10);

        let with_approval = plain
            .clone()
            .with_tool(counter_tool("deploy", &calls).with_requires_approval(true));
        assert_eq!(ConcurrencyPolicy::for_tools(&with_approval, false, 32).limit(), 1);

        let with_suspend = plain.clone().with_tool(
            counter_tool("wait", &calls).with_suspend_schema(json!({"type": "object"})),
        );
        assert_eq!(ConcurrencyPolicy::for_tools(&with_suspend, false, 32).limit(), 1);

        assert_eq!(ConcurrencyPolicy::for_tools(&plain, true, 32).limit(), 1);
    }

    #[tokio::test]
    async fn test_sequential_park_blocks_later_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new()
            .with_tool(counter_tool("search", &calls))
            .with_tool(counter_tool("deploy", &calls).with_requires_approval(true));
        let dispatcher = ToolCallDispatcher::new(ConcurrencyPolicy::for_tools(&registry, false, 10));
        let (step, _) = step(registry);

        let requests = vec![
            ToolCallRequest::new("c1", "deploy", json!({})),
            ToolCallRequest::new("c2", "search", json!({})),
            ToolCallRequest::new("c3", "search", json!({})),
        ];
        let DispatchOutcome::Parked(state) = dispatcher.dispatch(&step, requests).await else {
            panic!("expected the batch to park");
        };
        assert!(state.completed.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let DispatchOutcome::Completed(outcomes) = dispatcher
            .resume(&step, state, json!({"approved": true}))
            .await
        else {
            panic!("expected the batch to complete");
        };
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcomes.len(), 3);
    }
}

// =============================================================================
// Agent loop
// =============================================================================

mod loop_tests {
    use super::*;
    use agent_runtime::agent::testing::ScriptedModel;
    use agent_runtime::agent::{AgentEvent, AgentLoop, ExecutionConfig};
    use agent_runtime::suspension::ResumeRequest;
    use agent_runtime::types::{MessageSource, Role};

    #[tokio::test]
    async fn test_only_new_response_messages_are_recorded() {
        init_tracing();
        let calls = Arc::new(AtomicUsize::new(0));
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_calls([
                    ("c1", "search", json!({"q": "a"})),
                    ("c2", "search", json!({"q": "b"})),
                ])
                .then_text("done"),
        );
        let agent = AgentLoop::new(model.clone())
            .with_tools(ToolRegistry::new().with_tool(counter_tool("search", &calls)));

        let result = agent.run("search twice").await.unwrap().result().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let responses = agent
            .conversation()
            .read(|list| {
                list.stored()
                    .iter()
                    .filter(|m| m.source == MessageSource::Response)
                    .count()
            })
            .await;
        assert_eq!(responses, 3);
        assert_eq!(result.messages.len(), 4);

        let second = &model.requests()[1];
        assert_eq!(second.response_messages.len(), 2);
        assert_eq!(second.messages.last().unwrap().role, Role::Tool);
    }

    #[tokio::test]
    async fn test_global_approval_flag_parks_plain_tools() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = RecordingSink::new();
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_call("c1", "search", json!({"q": "x"}))
                .then_text("ok"),
        );
        let agent = AgentLoop::new(model)
            .with_tools(ToolRegistry::new().with_tool(counter_tool("search", &calls)))
            .with_config(ExecutionConfig::default().with_require_tool_approval(true))
            .with_events(Arc::new(sink.clone()));

        let snapshot = agent.run("go").await.unwrap().snapshot().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            sink.suspensions().as_slice(),
            [AgentEvent::ToolCallApproval(_)]
        ));

        let result = agent
            .resume(snapshot, ResumeRequest::decline("c1"))
            .await
            .unwrap()
            .result()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.text, "ok");
        assert!(sink.events().iter().any(|e| matches!(
            e,
            AgentEvent::StepFinish { is_continued: false, .. }
        )));
    }
}
