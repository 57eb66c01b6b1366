//! Run metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ToolCallOutcome;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub calls: usize,
    pub errors: usize,
}

/// Counters carried across suspensions inside the run snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub iterations: usize,
    pub model_calls: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    pub suspensions: usize,
    pub resumes: usize,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_stats: BTreeMap<String, ToolStats>,
}

impl RunMetrics {
    pub fn record_outcome(&mut self, outcome: &ToolCallOutcome) {
        self.tool_calls += 1;
        let stats = self
            .tool_stats
            .entry(outcome.tool_name().to_string())
            .or_default();
        stats.calls += 1;
        if outcome.is_error() {
            self.tool_errors += 1;
            stats.errors += 1;
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.tool_calls == 0 {
            0.0
        } else {
            self.tool_errors as f64 / self.tool_calls as f64
        }
    }
}
