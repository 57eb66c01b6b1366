//! Closure-backed tools.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::context::ToolExecutionContext;
use super::traits::{Tool, ToolInputEvent, ToolOutputEvent};
use crate::types::ToolError;

type Handler = Arc<
    dyn Fn(Value, ToolExecutionContext) -> BoxFuture<'static, Result<Value, ToolError>>
        + Send
        + Sync,
>;
type ApprovalFn = Arc<dyn Fn(&Value) -> Result<bool, ToolError> + Send + Sync>;
type InputHook = Arc<dyn Fn(&ToolInputEvent) -> Result<(), ToolError> + Send + Sync>;
type OutputHook = Arc<dyn Fn(&ToolOutputEvent) -> Result<(), ToolError> + Send + Sync>;

/// A tool assembled from closures.
///
/// Without a handler the tool is client-side: the step returns the request
/// unchanged and the caller supplies the result.
#[derive(Clone)]
pub struct FnTool {
    name: String,
    id: Option<String>,
    description: String,
    input_schema: Value,
    handler: Option<Handler>,
    requires_approval: bool,
    approval: Option<ApprovalFn>,
    suspend_schema: Option<Value>,
    resume_schema: Option<Value>,
    on_input: Option<InputHook>,
    on_output: Option<OutputHook>,
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("client_side", &self.handler.is_none())
            .field("requires_approval", &self.requires_approval)
            .field("can_suspend", &self.suspend_schema.is_some())
            .finish_non_exhaustive()
    }
}

impl FnTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            handler: None,
            requires_approval: false,
            approval: None,
            suspend_schema: None,
            resume_schema: None,
            on_input: None,
            on_output: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args, ctx| Box::pin(handler(args, ctx))));
        self
    }

    pub fn with_requires_approval(mut self, requires: bool) -> Self {
        self.requires_approval = requires;
        self
    }

    pub fn with_approval_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> Result<bool, ToolError> + Send + Sync + 'static,
    {
        self.approval = Some(Arc::new(predicate));
        self
    }

    pub fn with_suspend_schema(mut self, schema: Value) -> Self {
        self.suspend_schema = Some(schema);
        self
    }

    pub fn with_resume_schema(mut self, schema: Value) -> Self {
        self.resume_schema = Some(schema);
        self
    }

    pub fn on_input_available<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ToolInputEvent) -> Result<(), ToolError> + Send + Sync + 'static,
    {
        self.on_input = Some(Arc::new(hook));
        self
    }

    pub fn on_output<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ToolOutputEvent) -> Result<(), ToolError> + Send + Sync + 'static,
    {
        self.on_output = Some(Arc::new(hook));
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn has_execute(&self) -> bool {
        self.handler.is_some()
    }

    fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    async fn needs_approval(&self, args: &Value) -> Result<bool, ToolError> {
        match &self.approval {
            Some(predicate) => predicate(args),
            None => Ok(false),
        }
    }

    fn suspend_schema(&self) -> Option<Value> {
        self.suspend_schema.clone()
    }

    fn resume_schema(&self) -> Option<Value> {
        self.resume_schema.clone()
    }

    async fn on_input_available(&self, event: &ToolInputEvent) -> Result<(), ToolError> {
        match &self.on_input {
            Some(hook) => hook(event),
            None => Ok(()),
        }
    }

    async fn on_output(&self, event: &ToolOutputEvent) -> Result<(), ToolError> {
        match &self.on_output {
            Some(hook) => hook(event),
            None => Ok(()),
        }
    }

    async fn execute(
        &self,
        args: Value,
        context: &ToolExecutionContext,
    ) -> Result<Value, ToolError> {
        match &self.handler {
            Some(handler) => handler(args, context.clone()).await,
            None => Err(ToolError::execution_failed(format!(
                "tool \"{}\" executes on the client",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_receives_args_and_context() {
        let tool = FnTool::new("echo", "Echo input").with_handler(|args, ctx| async move {
            Ok(json!({"args": args, "call": ctx.tool_call_id()}))
        });
        let ctx = ToolExecutionContext::new("c1", "echo", "run-1");

        let out = tool.execute(json!({"x": 1}), &ctx).await.unwrap();
        assert_eq!(out, json!({"args": {"x": 1}, "call": "c1"}));
        assert!(tool.has_execute());
    }

    #[tokio::test]
    async fn test_client_side_tool_has_no_execute() {
        let tool = FnTool::new("pick_color", "Ask the user for a color");
        assert!(!tool.has_execute());
        let ctx = ToolExecutionContext::new("c1", "pick_color", "run-1");
        assert!(tool.execute(json!({}), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_approval_predicate() {
        let tool = FnTool::new("transfer", "Move money").with_approval_predicate(|args| {
            Ok(args["amount"].as_f64().unwrap_or(0.0) > 100.0)
        });

        assert!(!tool.needs_approval(&json!({"amount": 5})).await.unwrap());
        assert!(tool.needs_approval(&json!({"amount": 500})).await.unwrap());
    }
}
