//! Tool trait definitions.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::context::ToolExecutionContext;
use crate::types::{Message, ToolDefinition, ToolError};

/// Passed to [`Tool::on_input_available`] before approval and execution.
#[derive(Debug, Clone)]
pub struct ToolInputEvent {
    pub tool_call_id: String,
    pub args: Value,
    pub messages: Vec<Message>,
}

/// Passed to [`Tool::on_output`] after a successful execution.
#[derive(Debug, Clone)]
pub struct ToolOutputEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub output: Value,
}

/// Capability set of a tool.
///
/// Only `name`, `description`, `input_schema` and `execute` are required;
/// approval, suspension and lifecycle hooks are opt-in through the default
/// methods.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Secondary identifier matched when no tool is registered under the
    /// requested name.
    fn id(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> &str;

    fn input_schema(&self) -> Value;

    /// `false` for client-side tools whose result is supplied out of band.
    fn has_execute(&self) -> bool {
        true
    }

    fn requires_approval(&self) -> bool {
        false
    }

    /// Per-call approval predicate.
    async fn needs_approval(&self, _args: &Value) -> Result<bool, ToolError> {
        Ok(false)
    }

    /// Schema of the payload this tool suspends with. Tools that can suspend
    /// return `Some`, which forces sequential dispatch.
    fn suspend_schema(&self) -> Option<Value> {
        None
    }

    /// Schema of the data expected when a suspended call resumes.
    fn resume_schema(&self) -> Option<Value> {
        None
    }

    async fn on_input_available(&self, _event: &ToolInputEvent) -> Result<(), ToolError> {
        Ok(())
    }

    async fn on_output(&self, _event: &ToolOutputEvent) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(
        &self,
        args: Value,
        context: &ToolExecutionContext,
    ) -> Result<Value, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.input_schema())
            .with_requires_approval(self.requires_approval())
    }
}

/// Schema-based tool trait with automatic JSON schema generation.
///
/// Provides a higher-level abstraction over `Tool` with typed inputs
/// and automatic schema derivation via schemars.
#[async_trait]
pub trait SchemaTool: Send + Sync {
    type Input: JsonSchema + DeserializeOwned + Send;
    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    const REQUIRES_APPROVAL: bool = false;

    async fn handle(
        &self,
        input: Self::Input,
        context: &ToolExecutionContext,
    ) -> Result<Value, ToolError>;

    fn input_schema() -> Value {
        let schema = schemars::schema_for!(Self::Input);
        let mut value =
            serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));

        if let Some(obj) = value.as_object_mut()
            && !obj.contains_key("properties")
        {
            obj.insert("properties".to_string(), Value::Object(serde_json::Map::new()));
        }

        value
    }
}

#[async_trait]
impl<T: SchemaTool + 'static> Tool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        T::DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        T::input_schema()
    }

    fn requires_approval(&self) -> bool {
        T::REQUIRES_APPROVAL
    }

    async fn execute(
        &self,
        args: Value,
        context: &ToolExecutionContext,
    ) -> Result<Value, ToolError> {
        match serde_json::from_value::<T::Input>(args) {
            Ok(typed) => SchemaTool::handle(self, typed, context).await,
            Err(e) => Err(ToolError::invalid_arguments(T::NAME, e.to_string())),
        }
    }
}
