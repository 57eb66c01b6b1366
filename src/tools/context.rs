//! Execution context handed to a tool call.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::session::ThreadRef;
use crate::types::{Message, ToolError};

/// Caller-supplied values forwarded untouched to every tool call of a run.
///
/// JSON values are keyed by name; arbitrary Rust values are stored as typed
/// extensions and shared by reference.
#[derive(Clone, Default)]
pub struct RequestContext {
    values: Arc<BTreeMap<String, Value>>,
    extensions: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert_extension(value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.values).insert(key.into(), value);
    }

    pub fn insert_extension<T: Any + Send + Sync>(&mut self, value: T) {
        Arc::make_mut(&mut self.extensions).insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn extension_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extensions
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.extensions.is_empty()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("values", &self.values)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Options a tool passes to [`ToolExecutionContext::suspend`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuspendOptions {
    /// Schema of the data expected on resume. Falls back to the tool's
    /// `resume_schema()`.
    pub resume_schema: Option<Value>,
    /// Park as an approval request instead of a plain suspension.
    pub require_tool_approval: bool,
    /// Run id of a nested run that should be resumed with this call.
    pub run_id: Option<String>,
}

impl SuspendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume_schema(mut self, schema: Value) -> Self {
        self.resume_schema = Some(schema);
        self
    }

    pub fn require_approval(mut self) -> Self {
        self.require_tool_approval = true;
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// A suspension requested by a tool during execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendRequest {
    pub payload: Value,
    pub options: SuspendOptions,
}

#[derive(Clone)]
pub struct ToolExecutionContext {
    tool_call_id: String,
    tool_name: String,
    run_id: String,
    thread: Option<ThreadRef>,
    messages: Arc<Vec<Message>>,
    request_context: RequestContext,
    resume_data: Option<Value>,
    cancellation: CancellationToken,
    suspend_slot: Arc<Mutex<Option<SuspendRequest>>>,
}

impl std::fmt::Debug for ToolExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionContext")
            .field("tool_call_id", &self.tool_call_id)
            .field("tool_name", &self.tool_name)
            .field("run_id", &self.run_id)
            .field("messages", &self.messages.len())
            .field("resume_data", &self.resume_data)
            .finish_non_exhaustive()
    }
}

impl ToolExecutionContext {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            run_id: run_id.into(),
            thread: None,
            messages: Arc::new(Vec::new()),
            request_context: RequestContext::default(),
            resume_data: None,
            cancellation: CancellationToken::new(),
            suspend_slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_thread(mut self, thread: Option<ThreadRef>) -> Self {
        self.thread = thread;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Arc::new(messages);
        self
    }

    pub fn with_request_context(mut self, request_context: RequestContext) -> Self {
        self.request_context = request_context;
        self
    }

    pub fn with_resume_data(mut self, resume_data: Option<Value>) -> Self {
        self.resume_data = resume_data;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn thread(&self) -> Option<&ThreadRef> {
        self.thread.as_ref()
    }

    /// Conversation visible to this tool.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    /// Data supplied when this call resumes a suspension.
    pub fn resume_data(&self) -> Option<&Value> {
        self.resume_data.as_ref()
    }

    pub fn is_resumed(&self) -> bool {
        self.resume_data.is_some()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Requests that the run park on this call until resumed.
    ///
    /// Return the error from `execute`:
    ///
    /// ```ignore
    /// return Err(ctx.suspend(json!({"waitingFor": "webhook"}), SuspendOptions::new()));
    /// ```
    pub fn suspend(&self, payload: Value, options: SuspendOptions) -> ToolError {
        let request = SuspendRequest { payload, options };
        match self.suspend_slot.lock() {
            Ok(mut slot) => *slot = Some(request),
            Err(poisoned) => *poisoned.into_inner() = Some(request),
        }
        ToolError::Suspended {
            tool_call_id: self.tool_call_id.clone(),
        }
    }

    pub(crate) fn take_suspend_request(&self) -> Option<SuspendRequest> {
        match self.suspend_slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}
