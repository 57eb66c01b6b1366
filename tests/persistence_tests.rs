//! Persistence Tests
//!
//! Parked runs surviving a restart through the JSONL store, and suspension
//! metadata in both of its encodings.
//!
//! Run: cargo nextest run --test persistence_tests

use std::sync::Arc;

use agent_runtime::session::{Conversation, ThreadRef, ThreadStore};
use agent_runtime::suspension::{SuspensionKind, SuspensionMetadata, SuspensionRecord};
use agent_runtime::types::{Message, MessagePart};
use serde_json::json;

fn record(tool: &str, call: &str, kind: SuspensionKind, run_id: &str) -> SuspensionRecord {
    SuspensionRecord {
        tool_call_id: call.to_string(),
        tool_name: tool.to_string(),
        args: json!({}),
        kind,
        run_id: run_id.to_string(),
        resume_schema: json!({"type": "object"}),
        suspend_payload: None,
    }
}

// =============================================================================
// Restart via the JSONL store
// =============================================================================

#[cfg(feature = "jsonl")]
mod jsonl_resume_tests {
    use super::*;
    use agent_runtime::agent::testing::ScriptedModel;
    use agent_runtime::agent::{AgentLoop, RunOutcome};
    use agent_runtime::session::{JsonlConfig, JsonlThreadStore};
    use agent_runtime::suspension::ResumeRequest;
    use agent_runtime::tools::{FnTool, SuspendOptions, ToolRegistry};
    use tempfile::TempDir;

    fn webhook_tools() -> ToolRegistry {
        ToolRegistry::new().with_tool(
            FnTool::new("await_payment", "Wait for the payment webhook")
                .with_suspend_schema(json!({"type": "object"}))
                .with_resume_schema(json!({
                    "type": "object",
                    "properties": {"paid": {"type": "boolean"}}
                }))
                .with_handler(|args, ctx| async move {
                    match ctx.resume_data() {
                        Some(data) => Ok(json!({"order": args["order"], "paid": data["paid"]})),
                        None => Err(ctx.suspend(
                            json!({"webhook": "/payments/42"}),
                            SuspendOptions::new(),
                        )),
                    }
                }),
        )
    }

    async fn open_store(dir: &TempDir) -> Arc<JsonlThreadStore> {
        let config = JsonlConfig::builder().base_dir(dir.path()).build();
        Arc::new(tokio_test::assert_ok!(JsonlThreadStore::new(config).await))
    }

    #[tokio::test]
    async fn test_parked_run_resumes_in_fresh_loop() {
        let dir = TempDir::new().unwrap();
        let thread = ThreadRef::new("orders-42").with_resource("customer-7");

        let run_id = {
            let store = open_store(&dir).await;
            let model = ScriptedModel::new().then_tool_call(
                "c1",
                "await_payment",
                json!({"order": 42}),
            );
            let agent = AgentLoop::new(Arc::new(model))
                .with_tools(webhook_tools())
                .with_store(store, thread.clone());

            let RunOutcome::Suspended(snapshot) = agent.run("charge order 42").await.unwrap()
            else {
                panic!("run should park on the webhook");
            };
            assert_eq!(snapshot.resume_label(), "c1");
            assert_eq!(snapshot.kind(), SuspensionKind::Suspension);
            snapshot.run_id
        };

        let store = open_store(&dir).await;
        let saved = store.load_snapshot(&run_id).await.unwrap().unwrap();
        assert_eq!(saved.dispatch.parked.suspend_payload, Some(json!({"webhook": "/payments/42"})));

        let model = Arc::new(ScriptedModel::new().then_text("Order 42 is paid."));
        let agent = AgentLoop::new(model.clone())
            .with_tools(webhook_tools())
            .with_store(store.clone(), thread.clone());

        let result = agent
            .resume_from_store(&run_id, ResumeRequest::new("c1", json!({"paid": true})))
            .await
            .unwrap()
            .result()
            .unwrap();

        assert_eq!(result.text, "Order 42 is paid.");
        assert_eq!(result.metrics.resumes, 1);
        assert_eq!(result.metrics.suspensions, 1);
        assert!(store.load_snapshot(&run_id).await.unwrap().is_none());

        // The restored conversation reached the model with the tool result.
        let request = &model.requests()[0];
        assert_eq!(request.messages[0].text(), "charge order 42");
        assert!(request.messages.iter().any(|m| m.parts.iter().any(|p| matches!(
            p,
            MessagePart::ToolResult { output, is_error: false, .. }
                if output == &json!({"order": 42, "paid": true})
        ))));

        let persisted = store.load_messages("orders-42").await.unwrap();
        assert!(persisted.iter().all(|m| m.message.metadata.suspended_tools.is_none()));
    }

    #[tokio::test]
    async fn test_resume_from_store_errors() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let agent = AgentLoop::new(Arc::new(ScriptedModel::new()))
            .with_store(store, ThreadRef::new("t1"));

        let err = agent
            .resume_from_store("missing", ResumeRequest::approve("c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, agent_runtime::Error::SnapshotNotFound { .. }));

        let no_store = AgentLoop::new(Arc::new(ScriptedModel::new()));
        let err = no_store
            .resume_from_store("missing", ResumeRequest::approve("c1"))
            .await
            .unwrap_err();
        assert!(err.is_configuration_error());
    }
}

// =============================================================================
// Suspension metadata encodings
// =============================================================================

mod metadata_tests {
    use super::*;
    use agent_runtime::session::MemoryThreadStore;
    use agent_runtime::types::MessageMetadata;

    #[tokio::test]
    async fn test_remove_handles_both_encodings() {
        let mut mapped = Message::assistant(vec![MessagePart::text("first")]);
        mapped.metadata = MessageMetadata {
            pending_tool_approvals: Some(
                [(
                    "deploy".to_string(),
                    record("deploy", "c1", SuspensionKind::Approval, "run-1"),
                )]
                .into_iter()
                .collect(),
            ),
            suspended_tools: None,
        };
        let inline = Message::assistant(vec![
            MessagePart::text("second"),
            MessagePart::ToolSuspended {
                record: record("agent-writer", "c2", SuspensionKind::Suspension, "nested-9"),
            },
        ]);
        let conversation = Conversation::from_messages([Message::user("go"), mapped, inline]);
        let store = Arc::new(MemoryThreadStore::new());
        let metadata = SuspensionMetadata::new(conversation.clone())
            .with_store(store.clone(), ThreadRef::new("t1"));

        assert_eq!(
            metadata.recover_run_id("agent-writer").await.as_deref(),
            Some("nested-9")
        );

        let removed = metadata
            .remove("agent-writer", SuspensionKind::Suspension)
            .await
            .unwrap();
        assert_eq!(removed.tool_call_id, "c2");

        let removed = metadata
            .remove("deploy", SuspensionKind::Approval)
            .await
            .unwrap();
        assert_eq!(removed.tool_call_id, "c1");

        let all = conversation.all().await;
        assert!(all.iter().all(|m| m.metadata.is_empty()));
        assert!(all.iter().all(|m| !m.parts.iter().any(|p| matches!(
            p,
            MessagePart::ToolSuspended { .. } | MessagePart::ToolApproval { .. }
        ))));

        let persisted = store.load_messages("t1").await.unwrap();
        assert!(persisted.iter().all(|m| m.message.metadata.is_empty()));
    }

    #[tokio::test]
    async fn test_write_replaces_per_tool_name() {
        let conversation = Conversation::from_messages([Message::assistant(vec![])]);
        let metadata = SuspensionMetadata::new(conversation);

        assert!(metadata.write("deploy", record("deploy", "c1", SuspensionKind::Approval, "r")).await);
        assert!(metadata.write("deploy", record("deploy", "c2", SuspensionKind::Approval, "r")).await);

        let pending = metadata.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_call_id, "c2");
    }
}
