//! # Workflow Events
//!
//! Progress events streamed to the CLI and the SSE endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pipeline::WorkflowStage;

/// Kind of workflow event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    RunStarted,
    StageStarted,
    StageCompleted,
    /// A branch failed but the run continues
    StageDegraded,
    StageFailed,
    /// Reviewer asked for another search
    SearchRetried,
    /// The run is suspended until the reviewer replies
    InteractionRequired,
    InteractionResolved,
    /// Checkpoint written
    CheckpointSaved,
    RunResumed,
    RunCompleted,
    RunFailed,
}

/// An event in a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Unique event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: WorkflowEventKind,
    pub stage: WorkflowStage,
    pub run_id: String,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl WorkflowEvent {
    /// Create a new event
    pub fn new(kind: WorkflowEventKind, stage: WorkflowStage, run_id: &str) -> Self {
        Self {
            id: new_id(),
            timestamp: Utc::now(),
            kind,
            stage,
            run_id: run_id.to_string(),
            data: None,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Time-ordered identifier for runs, events and interactions
pub fn new_id() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:08x}", nanos, rand_u32())
}

/// Simple random number (not cryptographic)
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
