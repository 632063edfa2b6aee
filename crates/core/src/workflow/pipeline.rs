//! # Pipeline Stages
//!
//! The workflow's state machine. `HumanApproval → Search` is a bounded
//! self-loop, never recursion.

use serde::{Deserialize, Serialize};

/// Stage of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    /// Criteria validated and frozen
    Init,
    /// Research crew running
    Search,
    /// Waiting on the reviewer
    HumanApproval,
    /// Narrowing research to the approved ids
    Filter,
    /// Location and Design crews running concurrently
    Analysis,
    /// Building the final report
    Compile,
    Done,
    Failed,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Search => "search",
            Self::HumanApproval => "human_approval",
            Self::Filter => "filter",
            Self::Analysis => "analysis",
            Self::Compile => "compile",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "search" => Self::Search,
            "human_approval" => Self::HumanApproval,
            "filter" => Self::Filter,
            "analysis" => Self::Analysis,
            "compile" => Self::Compile,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Init,
        }
    }
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Current stage
    pub stage: WorkflowStage,
    /// Number of reviewer-requested search retries so far
    pub search_retries: u32,
    /// Maximum search retries before failing
    pub max_search_retries: u32,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stage: WorkflowStage::Init,
            search_retries: 0,
            max_search_retries: 3,
        }
    }
}

impl Pipeline {
    pub fn new(max_search_retries: u32) -> Self {
        Self {
            max_search_retries,
            ..Self::default()
        }
    }

    /// Pipeline positioned at a persisted stage
    pub fn resume_at(stage: WorkflowStage, search_retries: u32, max_search_retries: u32) -> Self {
        Self {
            stage,
            search_retries,
            max_search_retries,
        }
    }

    /// Advance to the next stage
    pub fn advance(&mut self, human_in_loop: bool) {
        self.stage = match self.stage {
            WorkflowStage::Init => WorkflowStage::Search,
            WorkflowStage::Search if human_in_loop => WorkflowStage::HumanApproval,
            WorkflowStage::Search => WorkflowStage::Filter,
            WorkflowStage::HumanApproval => WorkflowStage::Filter,
            WorkflowStage::Filter => WorkflowStage::Analysis,
            WorkflowStage::Analysis => WorkflowStage::Compile,
            WorkflowStage::Compile => WorkflowStage::Done,
            WorkflowStage::Done => WorkflowStage::Done,
            WorkflowStage::Failed => WorkflowStage::Failed,
        };
    }

    /// Reviewer asked for another search - loop back to Search
    pub fn request_search_retry(&mut self) -> bool {
        self.search_retries += 1;
        if self.search_retries > self.max_search_retries {
            self.stage = WorkflowStage::Failed;
            false
        } else {
            self.stage = WorkflowStage::Search;
            true
        }
    }

    /// Fail the pipeline
    pub fn fail(&mut self) {
        self.stage = WorkflowStage::Failed;
    }

    /// Check if pipeline is complete
    pub fn is_complete(&self) -> bool {
        matches!(self.stage, WorkflowStage::Done | WorkflowStage::Failed)
    }

    /// Check if pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.stage == WorkflowStage::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_without_review() {
        let mut pipeline = Pipeline::new(3);
        assert_eq!(pipeline.stage, WorkflowStage::Init);

        pipeline.advance(false);
        assert_eq!(pipeline.stage, WorkflowStage::Search);

        pipeline.advance(false);
        assert_eq!(pipeline.stage, WorkflowStage::Filter);

        pipeline.advance(false);
        pipeline.advance(false);
        pipeline.advance(false);
        assert!(pipeline.is_success());
    }

    #[test]
    fn test_advance_with_review() {
        let mut pipeline = Pipeline::new(3);
        pipeline.stage = WorkflowStage::Search;

        pipeline.advance(true);
        assert_eq!(pipeline.stage, WorkflowStage::HumanApproval);

        pipeline.advance(true);
        assert_eq!(pipeline.stage, WorkflowStage::Filter);
    }

    #[test]
    fn test_search_retry_loop_is_bounded() {
        let mut pipeline = Pipeline::new(2);

        pipeline.stage = WorkflowStage::HumanApproval;
        assert!(pipeline.request_search_retry());
        assert_eq!(pipeline.stage, WorkflowStage::Search);

        pipeline.stage = WorkflowStage::HumanApproval;
        assert!(pipeline.request_search_retry());

        // Third retry exceeds the bound of 2
        pipeline.stage = WorkflowStage::HumanApproval;
        assert!(!pipeline.request_search_retry());
        assert_eq!(pipeline.stage, WorkflowStage::Failed);
        assert!(pipeline.is_complete());
        assert!(!pipeline.is_success());
    }

    #[test]
    fn test_terminal_stages_are_sticky() {
        let mut pipeline = Pipeline::new(3);
        pipeline.fail();
        pipeline.advance(false);
        assert_eq!(pipeline.stage, WorkflowStage::Failed);
    }

    #[test]
    fn test_stage_names_round_trip() {
        for stage in [
            WorkflowStage::HumanApproval,
            WorkflowStage::Analysis,
            WorkflowStage::Done,
        ] {
            assert_eq!(WorkflowStage::from_str(stage.as_str()), stage);
        }
    }
}
