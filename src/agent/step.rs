//! Resolution of a single tool call.
//!
//! [`ToolCallStep::run`] is the error boundary of tool execution: whatever the
//! tool does, the step resolves to a [`StepOutcome`]. Panics in the tool, its
//! hooks or its approval predicate are contained here.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::events::{AgentEvent, EventSink, NoopSink, SuspensionEvent};
use crate::session::ThreadRef;
use crate::suspension::{
    SuspensionKind, SuspensionMetadata, SuspensionRecord, approval_decision,
    approval_resume_schema, is_approval_envelope, is_sub_run_tool,
};
use crate::tools::{
    RequestContext, SuspendOptions, SuspendRequest, Tool, ToolExecutionContext, ToolInputEvent,
    ToolOutputEvent, ToolRegistry,
};
use crate::types::{Message, NOT_APPROVED_MESSAGE, ToolCallOutcome, ToolCallRequest, ToolError};

/// Field of a tool's args that carries tool-driven resume data.
const INLINE_RESUME_FIELD: &str = "resumeData";

/// A tool call waiting for approval or an external event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkedCall {
    pub request: ToolCallRequest,
    #[serde(rename = "type")]
    pub kind: SuspensionKind,
    /// Always the parked call's `tool_call_id`.
    pub resume_label: String,
    pub resume_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(ToolCallOutcome),
    Parked(ParkedCall),
}

impl StepOutcome {
    pub fn is_parked(&self) -> bool {
        matches!(self, Self::Parked(_))
    }

    pub fn completed(self) -> Option<ToolCallOutcome> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            Self::Parked(_) => None,
        }
    }

    pub fn parked(self) -> Option<ParkedCall> {
        match self {
            Self::Parked(parked) => Some(parked),
            Self::Completed(_) => None,
        }
    }
}

/// Everything one tool call needs from its run.
#[derive(Clone)]
pub struct ToolCallStep {
    registry: Arc<ToolRegistry>,
    metadata: SuspensionMetadata,
    events: Arc<dyn EventSink>,
    run_id: String,
    thread: Option<ThreadRef>,
    require_tool_approval: bool,
    request_context: RequestContext,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for ToolCallStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallStep")
            .field("run_id", &self.run_id)
            .field("tools", &self.registry.names())
            .field("require_tool_approval", &self.require_tool_approval)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs tool-supplied code, turning a panic into [`ToolError::Panicked`].
async fn contained<T, F>(fut: F) -> Result<T, ToolError>
where
    F: Future<Output = Result<T, ToolError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ToolError::panicked(panic_message(panic.as_ref()))),
    }
}

/// Removes the inline `resumeData` field from an args object.
fn take_inline_resume(args: &mut Value) -> Option<Value> {
    args.as_object_mut()?.remove(INLINE_RESUME_FIELD)
}

fn completed(request: &ToolCallRequest, result: Result<Value, ToolError>) -> StepOutcome {
    StepOutcome::Completed(match result {
        Ok(value) => ToolCallOutcome::success(request.clone(), value),
        Err(error) => ToolCallOutcome::failure(request.clone(), error),
    })
}

/// How a call re-enters the step after a park.
struct Resume {
    /// Data handed to the tool's context.
    data: Option<Value>,
    /// Run id of a nested run to continue.
    sub_run_id: Option<String>,
}

impl ToolCallStep {
    pub fn new(
        registry: Arc<ToolRegistry>,
        metadata: SuspensionMetadata,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            metadata,
            events: Arc::new(NoopSink),
            run_id: run_id.into(),
            thread: None,
            require_tool_approval: false,
            request_context: RequestContext::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_thread(mut self, thread: Option<ThreadRef>) -> Self {
        self.thread = thread;
        self
    }

    pub fn with_require_tool_approval(mut self, required: bool) -> Self {
        self.require_tool_approval = required;
        self
    }

    pub fn with_request_context(mut self, request_context: RequestContext) -> Self {
        self.request_context = request_context;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn metadata(&self) -> &SuspensionMetadata {
        &self.metadata
    }

    /// Resolves `request` to an outcome or parks it.
    ///
    /// `resume_data` is present when the run resumes this call.
    #[instrument(
        skip_all,
        fields(tool = %request.tool_name, tool_call_id = %request.tool_call_id)
    )]
    pub async fn run(&self, request: &ToolCallRequest, resume_data: Option<&Value>) -> StepOutcome {
        match AssertUnwindSafe(self.resolve(request, resume_data))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(error = %message, "Tool call step panicked");
                completed(request, Err(ToolError::panicked(message)))
            }
        }
    }

    async fn resolve(&self, request: &ToolCallRequest, resume_data: Option<&Value>) -> StepOutcome {
        if request.provider_executed {
            let result = request.output.clone().unwrap_or_else(|| {
                json!({"providerExecuted": true, "toolName": request.tool_name})
            });
            debug!("Provider executed tool call");
            return completed(request, Ok(result));
        }

        let Some(tool) = self.registry.get(&request.tool_name).cloned() else {
            warn!("Tool not found");
            return completed(
                request,
                Err(ToolError::not_found(
                    &request.tool_name,
                    self.registry.names(),
                )),
            );
        };

        let mut args = match &request.args {
            Some(args) if !args.is_null() => args.clone(),
            _ => {
                warn!("Tool call arguments are missing or malformed");
                return completed(
                    request,
                    Err(ToolError::malformed_arguments(&request.tool_name)),
                );
            }
        };

        let messages = self.message_view(&request.tool_name).await;
        let input_event = ToolInputEvent {
            tool_call_id: request.tool_call_id.clone(),
            args: args.clone(),
            messages: messages.clone(),
        };
        if let Err(e) = contained(tool.on_input_available(&input_event)).await {
            warn!(error = %e, "Input hook failed");
        }

        if !tool.has_execute() {
            debug!("Client-side tool, deferring result");
            return StepOutcome::Completed(ToolCallOutcome::deferred(request.clone()));
        }

        let requires_approval = self.requires_approval(tool.as_ref(), &args).await;
        if requires_approval && resume_data.is_none() {
            return self
                .park(
                    request,
                    args,
                    SuspensionKind::Approval,
                    approval_resume_schema(),
                    None,
                    self.run_id.clone(),
                )
                .await;
        }

        let resume = match self
            .settle_resume(request, &mut args, resume_data, requires_approval)
            .await
        {
            Ok(resume) => resume,
            Err(declined) => return declined,
        };

        if let Some(run_id) = resume.sub_run_id
            && let Some(obj) = args.as_object_mut()
        {
            obj.insert("runId".to_string(), Value::String(run_id));
        }

        if self.cancellation.is_cancelled() {
            return completed(request, Err(ToolError::Cancelled));
        }

        let context = ToolExecutionContext::new(
            &request.tool_call_id,
            &request.tool_name,
            &self.run_id,
        )
        .with_thread(self.thread.clone())
        .with_messages(messages)
        .with_request_context(self.request_context.clone())
        .with_resume_data(resume.data)
        .with_cancellation(self.cancellation.clone());

        let result = contained(tool.execute(args.clone(), &context)).await;

        let suspend = match (context.take_suspend_request(), &result) {
            (Some(suspend), _) => Some(suspend),
            (None, Err(e)) if e.is_suspension() => Some(SuspendRequest {
                payload: Value::Null,
                options: SuspendOptions::default(),
            }),
            _ => None,
        };
        if let Some(suspend) = suspend {
            return self
                .park_requested(request, args, tool.as_ref(), suspend)
                .await;
        }

        match result {
            Ok(output) => {
                let event = ToolOutputEvent {
                    tool_call_id: request.tool_call_id.clone(),
                    tool_name: request.tool_name.clone(),
                    output: output.clone(),
                };
                if let Err(e) = contained(tool.on_output(&event)).await {
                    warn!(error = %e, "Output hook failed");
                }
                debug!("Tool call completed");
                completed(request, Ok(output))
            }
            Err(e) => {
                warn!(error = %e, "Tool execution failed");
                completed(request, Err(e))
            }
        }
    }

    /// Tools in the `agent-`/`workflow-` namespaces see the full conversation
    /// including cross-agent context; everything else sees model input only.
    async fn message_view(&self, tool_name: &str) -> Vec<Message> {
        let conversation = self.metadata.conversation();
        if is_sub_run_tool(tool_name) {
            conversation.all().await
        } else {
            conversation.model_input().await
        }
    }

    async fn requires_approval(&self, tool: &dyn Tool, args: &Value) -> bool {
        if self.require_tool_approval || tool.requires_approval() {
            return true;
        }
        match contained(tool.needs_approval(args)).await {
            Ok(required) => required,
            Err(e) => {
                warn!(error = %e, "Approval predicate failed, requiring approval");
                true
            }
        }
    }

    /// Clears suspension records that this resume satisfies.
    ///
    /// Returns the declined outcome when the human said no.
    async fn settle_resume(
        &self,
        request: &ToolCallRequest,
        args: &mut Value,
        resume_data: Option<&Value>,
        requires_approval: bool,
    ) -> Result<Resume, StepOutcome> {
        let inline = take_inline_resume(args);
        let tool_name = request.tool_name.as_str();

        if resume_data.is_none() && inline.is_none() {
            return Ok(Resume {
                data: None,
                sub_run_id: None,
            });
        }

        let sub_run_id = if is_sub_run_tool(tool_name) {
            self.metadata.recover_run_id(tool_name).await
        } else {
            None
        };

        let approval_resume = match resume_data {
            Some(_) if requires_approval => true,
            Some(_) => self
                .metadata
                .find(tool_name, SuspensionKind::Approval)
                .await
                .is_some(),
            None => false,
        };

        let approval_only = resume_data.is_some_and(is_approval_envelope);
        if approval_resume {
            self.metadata
                .remove(tool_name, SuspensionKind::Approval)
                .await;
            if resume_data.and_then(approval_decision) == Some(false) {
                info!("Tool call declined");
                return Err(completed(
                    request,
                    Ok(Value::String(NOT_APPROVED_MESSAGE.to_string())),
                ));
            }
        }

        let suspension_resume =
            inline.is_some() || (resume_data.is_some() && !(approval_resume && approval_only));
        if suspension_resume {
            self.metadata
                .remove(tool_name, SuspensionKind::Suspension)
                .await;
        }

        // The approval envelope is for the engine when approval came from
        // configuration; a tool that asked for approval itself gets it back.
        let data = match inline {
            Some(data) => Some(data),
            None if requires_approval && approval_only => None,
            None => resume_data.cloned(),
        };

        debug!(
            approval_resume,
            suspension_resume,
            sub_run = sub_run_id.is_some(),
            "Resuming tool call"
        );
        Ok(Resume { data, sub_run_id })
    }

    /// Parks on a suspension the tool requested during execution.
    async fn park_requested(
        &self,
        request: &ToolCallRequest,
        args: Value,
        tool: &dyn Tool,
        suspend: SuspendRequest,
    ) -> StepOutcome {
        let SuspendRequest { payload, options } = suspend;
        let kind = if options.require_tool_approval {
            SuspensionKind::Approval
        } else {
            SuspensionKind::Suspension
        };
        let resume_schema = options
            .resume_schema
            .or_else(|| tool.resume_schema())
            .unwrap_or_else(|| match kind {
                SuspensionKind::Approval => approval_resume_schema(),
                SuspensionKind::Suspension => json!({"type": "object"}),
            });
        let run_id = options.run_id.unwrap_or_else(|| self.run_id.clone());
        let payload = (!payload.is_null()).then_some(payload);

        self.park(request, args, kind, resume_schema, payload, run_id)
            .await
    }

    /// Write the record, flush, emit, then park.
    async fn park(
        &self,
        request: &ToolCallRequest,
        args: Value,
        kind: SuspensionKind,
        resume_schema: Value,
        suspend_payload: Option<Value>,
        run_id: String,
    ) -> StepOutcome {
        let record = SuspensionRecord {
            tool_call_id: request.tool_call_id.clone(),
            tool_name: request.tool_name.clone(),
            args,
            kind,
            run_id,
            resume_schema: resume_schema.clone(),
            suspend_payload: suspend_payload.clone(),
        };

        if !self.metadata.write(&request.tool_name, record.clone()).await {
            self.metadata.flush().await;
        }

        let event = SuspensionEvent::from(&record);
        self.events.enqueue(match kind {
            SuspensionKind::Approval => AgentEvent::ToolCallApproval(event),
            SuspensionKind::Suspension => AgentEvent::ToolCallSuspended(event),
        });

        info!(kind = %kind, "Tool call parked");
        StepOutcome::Parked(ParkedCall {
            request: request.clone(),
            kind,
            resume_label: request.tool_call_id.clone(),
            resume_schema,
            suspend_payload,
        })
    }
}
