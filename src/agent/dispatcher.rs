//! Fan-out of one model turn's tool calls.

use std::collections::HashMap;

use futures::StreamExt;
use futures::stream::FuturesOrdered;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::config::DEFAULT_TOOL_CONCURRENCY;
use super::step::{ParkedCall, StepOutcome, ToolCallStep};
use crate::tools::ToolRegistry;
use crate::types::{ToolCallOutcome, ToolCallRequest};

/// How many tool calls of one turn may run at once.
///
/// Decided once per turn from the tool set, not adapted while the batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    Sequential,
    Parallel(usize),
}

impl ConcurrencyPolicy {
    /// Sequential whenever approval is forced globally or any tool can ask for
    /// approval or suspend; a park racing sibling calls would reorder writes
    /// to the shared conversation.
    pub fn for_tools(registry: &ToolRegistry, require_tool_approval: bool, configured: usize) -> Self {
        if require_tool_approval || registry.any_can_suspend() || registry.any_requires_approval() {
            Self::Sequential
        } else if configured == 0 {
            Self::Parallel(DEFAULT_TOOL_CONCURRENCY)
        } else {
            Self::Parallel(configured)
        }
    }

    pub fn limit(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel(n) => (*n).max(1),
        }
    }
}

/// Progress of a batch that parked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchState {
    /// The whole batch, in request order.
    pub requests: Vec<ToolCallRequest>,
    pub completed: Vec<ToolCallOutcome>,
    pub parked: ParkedCall,
}

impl DispatchState {
    /// Requests that still have to run, in order.
    pub fn remaining(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.requests.iter().filter(|r| {
            !self
                .completed
                .iter()
                .any(|o| o.tool_call_id() == r.tool_call_id)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Every call finished; outcomes are in request order.
    Completed(Vec<ToolCallOutcome>),
    Parked(DispatchState),
}

impl DispatchOutcome {
    pub fn is_parked(&self) -> bool {
        matches!(self, Self::Parked(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToolCallDispatcher {
    policy: ConcurrencyPolicy,
}

impl ToolCallDispatcher {
    pub fn new(policy: ConcurrencyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    pub async fn dispatch(
        &self,
        step: &ToolCallStep,
        requests: Vec<ToolCallRequest>,
    ) -> DispatchOutcome {
        self.execute(step, requests, Vec::new(), None).await
    }

    /// Continues a parked batch: the parked call runs with `resume_data`, then
    /// every call that had not completed.
    pub async fn resume(
        &self,
        step: &ToolCallStep,
        state: DispatchState,
        resume_data: Value,
    ) -> DispatchOutcome {
        let DispatchState {
            requests,
            completed,
            parked,
        } = state;
        debug!(
            resume_label = %parked.resume_label,
            completed = completed.len(),
            "Resuming tool call batch"
        );
        self.execute(step, requests, completed, Some((parked.resume_label, resume_data)))
            .await
    }

    async fn execute(
        &self,
        step: &ToolCallStep,
        requests: Vec<ToolCallRequest>,
        mut completed: Vec<ToolCallOutcome>,
        resume: Option<(String, Value)>,
    ) -> DispatchOutcome {
        let pending: Vec<&ToolCallRequest> = requests
            .iter()
            .filter(|r| {
                !completed
                    .iter()
                    .any(|o| o.tool_call_id() == r.tool_call_id)
            })
            .collect();
        let resume_for = |request: &ToolCallRequest| {
            resume
                .as_ref()
                .filter(|(label, _)| *label == request.tool_call_id)
                .map(|(_, data)| data)
        };

        debug!(
            calls = pending.len(),
            policy = ?self.policy,
            "Dispatching tool calls"
        );

        let mut parked = None;
        match self.policy {
            ConcurrencyPolicy::Sequential => {
                for request in pending {
                    match step.run(request, resume_for(request)).await {
                        StepOutcome::Completed(outcome) => completed.push(outcome),
                        StepOutcome::Parked(call) => {
                            parked = Some(call);
                            break;
                        }
                    }
                }
            }
            ConcurrencyPolicy::Parallel(_) => {
                let semaphore = Semaphore::new(self.policy.limit());
                let mut running: FuturesOrdered<_> = pending
                    .into_iter()
                    .map(|request| {
                        let semaphore = &semaphore;
                        let resume_data = resume_for(request);
                        async move {
                            let _permit = semaphore.acquire().await.ok();
                            step.run(request, resume_data).await
                        }
                    })
                    .collect();
                while let Some(outcome) = running.next().await {
                    match outcome {
                        StepOutcome::Completed(outcome) => completed.push(outcome),
                        // Later parks rerun on resume.
                        StepOutcome::Parked(call) => {
                            if parked.is_none() {
                                parked = Some(call);
                            }
                        }
                    }
                }
            }
        }

        let completed = in_request_order(&requests, completed);
        match parked {
            Some(parked) => {
                info!(
                    resume_label = %parked.resume_label,
                    completed = completed.len(),
                    total = requests.len(),
                    "Tool call batch parked"
                );
                DispatchOutcome::Parked(DispatchState {
                    requests,
                    completed,
                    parked,
                })
            }
            None => DispatchOutcome::Completed(completed),
        }
    }
}

fn in_request_order(
    requests: &[ToolCallRequest],
    mut outcomes: Vec<ToolCallOutcome>,
) -> Vec<ToolCallOutcome> {
    let position: HashMap<&str, usize> = requests
        .iter()
        .enumerate()
        .map(|(i, r)| (r.tool_call_id.as_str(), i))
        .collect();
    outcomes.sort_by_key(|o| position.get(o.tool_call_id()).copied().unwrap_or(usize::MAX));
    outcomes
}
