//! The iteration loop: model turn, tool calls, results, repeat.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::ExecutionConfig;
use super::dispatcher::{ConcurrencyPolicy, DispatchOutcome, DispatchState, ToolCallDispatcher};
use super::events::{AgentEvent, EventSink, NoopSink};
use super::model::{DefaultStopCondition, LanguageModel, ModelRequest, StopCondition};
use super::snapshot::{RunOutcome, RunResult, RunSnapshot};
use super::state::RunMetrics;
use super::step::ToolCallStep;
use crate::session::{Conversation, ThreadRef, ThreadStore};
use crate::suspension::{ResumeRequest, SuspensionMetadata};
use crate::tools::{RequestContext, ToolRegistry};
use crate::types::{
    IterationData, IterationMessages, Message, MessageSource, ToolCallOutcome, ToolCallResult,
};
use crate::{Error, Result};

/// Where a call to [`AgentLoop::drive`] picks up.
struct Cursor {
    run_id: String,
    iteration: usize,
    metrics: RunMetrics,
    /// A parked batch to continue before the next model turn.
    resume: Option<(IterationData, DispatchState, Value)>,
}

/// Drives one agent run over a shared conversation.
pub struct AgentLoop {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    config: ExecutionConfig,
    conversation: Conversation,
    store: Option<Arc<dyn ThreadStore>>,
    thread: Option<ThreadRef>,
    events: Arc<dyn EventSink>,
    stop_condition: Arc<dyn StopCondition>,
    request_context: RequestContext,
    cancellation: CancellationToken,
    parked: Mutex<Option<RunSnapshot>>,
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("model", &self.model.name())
            .field("tools", &self.tools.names())
            .field("config", &self.config)
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            tools: Arc::new(ToolRegistry::new()),
            config: ExecutionConfig::default(),
            conversation: Conversation::new(),
            store: None,
            thread: None,
            events: Arc::new(NoopSink),
            stop_condition: Arc::new(DefaultStopCondition),
            request_context: RequestContext::default(),
            cancellation: CancellationToken::new(),
            parked: Mutex::new(None),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    /// Persist messages and snapshots of this loop's runs to `thread`.
    pub fn with_store(mut self, store: Arc<dyn ThreadStore>, thread: ThreadRef) -> Self {
        self.store = Some(store);
        self.thread = Some(thread);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_stop_condition(mut self, condition: impl StopCondition + 'static) -> Self {
        self.stop_condition = Arc::new(condition);
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

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Snapshot of the run this loop last parked, if it has not been resumed.
    pub async fn parked(&self) -> Option<RunSnapshot> {
        self.parked.lock().await.clone()
    }

    /// Starts a run with `input` as the user turn.
    pub async fn run(&self, input: impl Into<String>) -> Result<RunOutcome> {
        self.run_with_messages(vec![Message::user(input)]).await
    }

    /// Starts a run after appending `messages` as input.
    pub async fn run_with_messages(&self, messages: Vec<Message>) -> Result<RunOutcome> {
        self.conversation.add(messages, MessageSource::Input).await;
        let cursor = Cursor {
            run_id: Uuid::new_v4().to_string(),
            iteration: 0,
            metrics: RunMetrics::default(),
            resume: None,
        };
        self.with_timeout(self.drive(cursor)).await
    }

    /// Continues a parked run.
    ///
    /// `request.resume_label` must name the call the run parked on, and that
    /// call must still hold its suspension record. A snapshot that was already
    /// resumed fails with [`Error::NotSuspended`].
    pub async fn resume(&self, snapshot: RunSnapshot, request: ResumeRequest) -> Result<RunOutcome> {
        if request.resume_label != snapshot.resume_label() {
            return Err(Error::ResumeMismatch {
                expected: snapshot.resume_label().to_string(),
                got: request.resume_label,
            });
        }

        let pending = self
            .metadata()
            .find(snapshot.tool_name(), snapshot.kind())
            .await;
        if !pending.is_some_and(|record| record.tool_call_id == snapshot.resume_label()) {
            warn!(
                run_id = %snapshot.run_id,
                resume_label = %request.resume_label,
                "Parked call has no live suspension record"
            );
            return Err(Error::NotSuspended);
        }

        {
            let mut parked = self.parked.lock().await;
            if parked.as_ref().is_some_and(|p| p.run_id == snapshot.run_id) {
                *parked = None;
            }
        }

        let RunSnapshot {
            run_id,
            iteration,
            data,
            dispatch,
            mut metrics,
            ..
        } = snapshot;
        metrics.resumes += 1;
        info!(
            run_id = %run_id,
            resume_label = %request.resume_label,
            "Resuming run"
        );

        let cursor = Cursor {
            run_id,
            iteration,
            metrics,
            resume: Some((data, dispatch, request.resume_data)),
        };
        self.with_timeout(self.drive(cursor)).await
    }

    /// Continues the run this loop last parked.
    pub async fn resume_latest(&self, request: ResumeRequest) -> Result<RunOutcome> {
        let snapshot = self.parked().await.ok_or(Error::NotSuspended)?;
        self.resume(snapshot, request).await
    }

    /// Loads a parked run from the thread store and continues it.
    ///
    /// When this loop's conversation is empty, it is restored from the
    /// snapshot's thread first, so a fresh process can pick the run up.
    pub async fn resume_from_store(
        &self,
        run_id: &str,
        request: ResumeRequest,
    ) -> Result<RunOutcome> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("no thread store configured".to_string()))?;
        let snapshot =
            store
                .load_snapshot(run_id)
                .await?
                .ok_or_else(|| Error::SnapshotNotFound {
                    run_id: run_id.to_string(),
                })?;

        if self.conversation.is_empty().await
            && let Some(thread) = snapshot.thread.as_ref().or(self.thread.as_ref())
        {
            let messages = store.load_messages(&thread.thread_id).await?;
            debug!(
                thread_id = %thread.thread_id,
                messages = messages.len(),
                "Restored conversation"
            );
            self.conversation
                .write(|list| list.restore(messages))
                .await;
        }

        self.resume(snapshot, request).await
    }

    async fn with_timeout<F>(&self, fut: F) -> Result<RunOutcome>
    where
        F: Future<Output = Result<RunOutcome>>,
    {
        match self.config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => fut.await,
        }
    }

    fn metadata(&self) -> SuspensionMetadata {
        let metadata = SuspensionMetadata::new(self.conversation.clone());
        match (&self.store, &self.thread) {
            (Some(store), Some(thread)) => metadata.with_store(Arc::clone(store), thread.clone()),
            _ => metadata,
        }
    }

    fn step(&self, run_id: &str, metadata: SuspensionMetadata) -> ToolCallStep {
        ToolCallStep::new(Arc::clone(&self.tools), metadata, run_id)
            .with_events(Arc::clone(&self.events))
            .with_thread(self.thread.clone())
            .with_require_tool_approval(self.config.require_tool_approval)
            .with_request_context(self.request_context.clone())
            .with_cancellation(self.cancellation.clone())
    }

    #[instrument(skip_all, fields(run_id = %cursor.run_id))]
    async fn drive(&self, cursor: Cursor) -> Result<RunOutcome> {
        let Cursor {
            run_id,
            mut iteration,
            mut metrics,
            mut resume,
        } = cursor;
        let started = Instant::now();
        let metadata = self.metadata();
        let step = self.step(&run_id, metadata.clone());
        let dispatcher = ToolCallDispatcher::new(ConcurrencyPolicy::for_tools(
            &self.tools,
            self.config.require_tool_approval,
            self.config.effective_concurrency(),
        ));
        let mut last = IterationData::default();

        loop {
            let (data, dispatched) = match resume.take() {
                Some((data, state, resume_data)) => {
                    let data = data.with_messages(self.iteration_messages().await);
                    let dispatched = dispatcher.resume(&step, state, resume_data).await;
                    (data, dispatched)
                }
                None => {
                    if iteration >= self.config.max_iterations {
                        warn!(max = self.config.max_iterations, "Max iterations reached");
                        last.step_result.is_continued = false;
                        last.step_result
                            .warnings
                            .push(format!("stopped after {} iterations", iteration));
                        break;
                    }
                    if self.cancellation.is_cancelled() {
                        return Err(Error::Cancelled);
                    }

                    let data = self.execute_model(&run_id, iteration, &mut metrics).await?;
                    let dispatched = if data.has_tool_calls() {
                        dispatcher
                            .dispatch(&step, data.output.tool_calls.clone())
                            .await
                    } else {
                        DispatchOutcome::Completed(Vec::new())
                    };
                    (data, dispatched)
                }
            };

            let outcomes = match dispatched {
                DispatchOutcome::Completed(outcomes) => outcomes,
                DispatchOutcome::Parked(state) => {
                    metrics.execution_time_ms += started.elapsed().as_millis() as u64;
                    return Ok(self
                        .park(&metadata, run_id, iteration, data, state, metrics)
                        .await);
                }
            };

            for outcome in &outcomes {
                metrics.record_outcome(outcome);
            }
            self.record_results(&outcomes).await;

            let step_result = self.stop_condition.evaluate(&data, &outcomes);
            self.events.enqueue(AgentEvent::StepFinish {
                run_id: run_id.clone(),
                iteration,
                tool_calls: outcomes.len(),
                is_continued: step_result.is_continued,
                reason: step_result.reason.clone(),
            });
            metadata.flush().await;

            iteration += 1;
            metrics.iterations = iteration;
            let is_continued = step_result.is_continued;
            last = data.with_step_result(step_result);
            debug!(iteration, is_continued, "Iteration finished");
            if !is_continued {
                break;
            }
        }

        metrics.execution_time_ms += started.elapsed().as_millis() as u64;
        Ok(RunOutcome::Completed(
            self.complete(&metadata, run_id, iteration, last, metrics)
                .await,
        ))
    }

    /// Runs one model turn and records only the response messages it added.
    async fn execute_model(
        &self,
        run_id: &str,
        iteration: usize,
        metrics: &mut RunMetrics,
    ) -> Result<IterationData> {
        let (baseline, response_messages, messages) = self
            .conversation
            .read(|list| (list.response_len(), list.response(), list.model_input()))
            .await;

        let request = ModelRequest {
            run_id: run_id.to_string(),
            iteration,
            messages,
            tools: self.tools.definitions(),
            response_messages,
        };

        let model_start = Instant::now();
        let turn = self.model.generate(request).await?;
        metrics.model_calls += 1;

        let new_messages: Vec<Message> = turn.response_messages.into_iter().skip(baseline).collect();
        debug!(
            iteration,
            model_time_ms = model_start.elapsed().as_millis() as u64,
            new_messages = new_messages.len(),
            tool_calls = turn.output.tool_calls.len(),
            "Model turn completed"
        );
        self.conversation
            .add(new_messages, MessageSource::Response)
            .await;

        Ok(IterationData {
            messages: self.iteration_messages().await,
            output: turn.output,
            ..IterationData::default()
        })
    }

    async fn iteration_messages(&self) -> IterationMessages {
        self.conversation
            .read(|list| IterationMessages {
                all: list.all(),
                user: list.user(),
                non_user: list.non_user(),
            })
            .await
    }

    /// Feeds outcomes back to the model as one tool message.
    async fn record_results(&self, outcomes: &[ToolCallOutcome]) {
        for outcome in outcomes {
            let event = match &outcome.result {
                ToolCallResult::Result(result) => AgentEvent::ToolResult {
                    tool_call_id: outcome.tool_call_id().to_string(),
                    tool_name: outcome.tool_name().to_string(),
                    result: result.clone(),
                },
                ToolCallResult::Error(error) => AgentEvent::ToolError {
                    tool_call_id: outcome.tool_call_id().to_string(),
                    tool_name: outcome.tool_name().to_string(),
                    error: error.clone(),
                },
                ToolCallResult::Deferred => continue,
            };
            self.events.enqueue(event);
        }

        let parts: Vec<_> = outcomes
            .iter()
            .filter_map(ToolCallOutcome::to_model_part)
            .collect();
        if !parts.is_empty() {
            self.conversation
                .add([Message::tool(parts)], MessageSource::Response)
                .await;
        }
    }

    async fn park(
        &self,
        metadata: &SuspensionMetadata,
        run_id: String,
        iteration: usize,
        data: IterationData,
        dispatch: DispatchState,
        mut metrics: RunMetrics,
    ) -> RunOutcome {
        metrics.suspensions += 1;
        let snapshot = RunSnapshot {
            run_id,
            thread: self.thread.clone(),
            iteration,
            // Messages are rebuilt from the conversation on resume.
            data: data.with_messages(IterationMessages::default()),
            dispatch,
            metrics,
            created_at: Utc::now(),
        };

        metadata.flush().await;
        if let Some(store) = &self.store
            && let Err(e) = store.save_snapshot(&snapshot).await
        {
            warn!(run_id = %snapshot.run_id, error = %e, "Failed to save run snapshot");
        }

        info!(
            run_id = %snapshot.run_id,
            resume_label = %snapshot.resume_label(),
            kind = %snapshot.kind(),
            "Run suspended"
        );
        *self.parked.lock().await = Some(snapshot.clone());
        RunOutcome::Suspended(snapshot)
    }

    async fn complete(
        &self,
        metadata: &SuspensionMetadata,
        run_id: String,
        iterations: usize,
        data: IterationData,
        metrics: RunMetrics,
    ) -> RunResult {
        metadata.flush().await;
        if let Some(store) = &self.store
            && let Err(e) = store.delete_snapshot(&run_id).await
        {
            warn!(run_id = %run_id, error = %e, "Failed to delete run snapshot");
        }

        let (text, messages) = self
            .conversation
            .read(|list| {
                let text = list.last_assistant().map(Message::text).unwrap_or_default();
                (text, list.all())
            })
            .await;

        info!(
            run_id = %run_id,
            iterations,
            tool_calls = metrics.tool_calls,
            tool_errors = metrics.tool_errors,
            "Run completed"
        );
        RunResult {
            run_id,
            text,
            iterations,
            data,
            metrics,
            messages,
        }
    }
}
