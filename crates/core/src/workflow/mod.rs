//! # Workflow
//!
//! The stateful pipeline that chains the research, location and design
//! crews, with optional human approval between search and analysis.

pub mod approval;
pub mod coordinator;
pub mod events;
pub mod filter;
pub mod pipeline;
pub mod report;
pub mod state;

pub use approval::{
    AutoApprove, CoordinatorCommand, FeedbackBroker, FeedbackRequest, FeedbackResult, InboxBroker,
};
pub use coordinator::{RunOutcome, Workflow};
pub use events::{WorkflowEvent, WorkflowEventKind};
pub use filter::{filter_research, FilterOutcome};
pub use pipeline::{Pipeline, WorkflowStage};
pub use report::{FileReportSink, FinalReport, ReportSink};
pub use state::{Counters, SearchCriteria, StageFailure, StageKey, WorkflowState};
