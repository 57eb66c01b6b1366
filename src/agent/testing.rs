//! Test doubles for driving an [`AgentLoop`](super::AgentLoop) without a real model.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::model::{LanguageModel, ModelRequest, ModelTurn};
use crate::types::{Message, MessagePart};

enum Scripted {
    Reply(Vec<MessagePart>),
    Fail(String),
}

/// Replays a fixed sequence of assistant turns and records every request.
///
/// ```rust
/// use agent_runtime::agent::testing::ScriptedModel;
/// use serde_json::json;
///
/// let model = ScriptedModel::new()
///     .then_tool_call("c1", "search", json!({"q": "rust"}))
///     .then_text("Found it.");
/// ```
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl std::fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedModel")
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, turn: Scripted) -> Self {
        match self.script.lock() {
            Ok(mut script) => script.push_back(turn),
            Err(poisoned) => poisoned.into_inner().push_back(turn),
        }
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(vec![MessagePart::text(text)]))
    }

    pub fn then_tool_call(
        self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
    ) -> Self {
        self.push(Scripted::Reply(vec![MessagePart::tool_call(
            tool_call_id,
            tool_name,
            args,
        )]))
    }

    /// One turn requesting several tool calls at once.
    pub fn then_tool_calls<I, S>(self, calls: I) -> Self
    where
        I: IntoIterator<Item = (S, S, Value)>,
        S: Into<String>,
    {
        self.push(Scripted::Reply(
            calls
                .into_iter()
                .map(|(id, name, args)| MessagePart::tool_call(id, name, args))
                .collect(),
        ))
    }

    pub fn then_parts(self, parts: Vec<MessagePart>) -> Self {
        self.push(Scripted::Reply(parts))
    }

    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()))
    }

    pub fn remaining(&self) -> usize {
        match self.script.lock() {
            Ok(script) => script.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ModelRequest) -> crate::Result<ModelTurn> {
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }

        match next {
            Some(Scripted::Reply(parts)) => {
                Ok(ModelTurn::from_assistant(&request, Message::assistant(parts)))
            }
            Some(Scripted::Fail(message)) => Err(crate::Error::Model { message }),
            None => Err(crate::Error::Model {
                message: "scripted model has no turns left".to_string(),
            }),
        }
    }
}
