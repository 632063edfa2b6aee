//! # Workflow Coordinator
//!
//! Drives one run through the [`Pipeline`]:
//!
//! ```text
//! Init → Search ─┬─────────────────→ Filter → [Location ‖ Design] → Compile → Done
//!                └→ HumanApproval ─┘
//!                     │ retry (bounded)
//!                     └──→ Search
//! ```
//!
//! Crews, the reviewer, the checkpoint store and the report sink are all
//! injected, so every collaborator can be replaced in tests.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::approval::{
    AutoApprove, FeedbackBroker, FeedbackRequest, FeedbackResult, OPTION_APPROVE, OPTION_RETRY,
};
use super::events::{new_id, WorkflowEvent, WorkflowEventKind};
use super::filter::{filter_research, FilterOutcome};
use super::pipeline::{Pipeline, WorkflowStage};
use super::report::{FileReportSink, FinalReport, ReportSink};
use super::state::{SearchCriteria, StageKey, WorkflowState};
use crate::config::WorkflowConfig;
use crate::crews::{
    keys, property_records, record_id, Crew, DesignCrew, LocationCrew, ResearchCrew, TaskInputs,
};
use crate::error::{StageError, StageResult};
use crate::guardrail::{run_guarded, RawStageOutput, ResearchReportGuardrail};
use crate::state::{CheckpointStore, HomeScoutDb, RunStatus};

/// Result of a finished run
#[derive(Debug)]
pub struct RunOutcome {
    pub state: WorkflowState,
    pub report: FinalReport,
    /// Events that occurred
    pub events: Vec<WorkflowEvent>,
}

/// The workflow coordinator
pub struct Workflow {
    config: WorkflowConfig,
    research: Arc<dyn Crew>,
    location: Arc<dyn Crew>,
    design: Arc<dyn Crew>,
    broker: Arc<dyn FeedbackBroker>,
    db: Option<Arc<HomeScoutDb>>,
    sink: Option<Arc<dyn ReportSink>>,
    events: Vec<WorkflowEvent>,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
}

impl Workflow {
    pub fn new(
        config: WorkflowConfig,
        research: Arc<dyn Crew>,
        location: Arc<dyn Crew>,
        design: Arc<dyn Crew>,
    ) -> Self {
        Self {
            config,
            research,
            location,
            design,
            broker: Arc::new(AutoApprove),
            db: None,
            sink: None,
            events: Vec::new(),
            event_tx: None,
        }
    }

    /// Workflow over the real crews, writing the final report to `output_dir`
    pub fn from_config(config: WorkflowConfig) -> anyhow::Result<Self> {
        let research = Arc::new(ResearchCrew::new(config.clone()));
        let location = Arc::new(LocationCrew::new(config.clone()));
        let design = Arc::new(DesignCrew::from_env(config.clone())?);
        let sink = Arc::new(FileReportSink::new(config.output_dir.clone()));
        Ok(Self::new(config, research, location, design).with_report_sink(sink))
    }

    /// Set the reviewer consulted at `HumanApproval`
    pub fn with_broker(mut self, broker: Arc<dyn FeedbackBroker>) -> Self {
        self.broker = broker;
        self
    }

    /// Persist checkpoints so runs can be resumed
    pub fn with_checkpoints(mut self, db: Arc<HomeScoutDb>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set event channel for streaming events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Emit an event
    async fn emit(&mut self, event: WorkflowEvent) {
        self.events.push(event.clone());
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    async fn emit_stage(&mut self, kind: WorkflowEventKind, state: &WorkflowState, data: Value) {
        self.emit(WorkflowEvent::new(kind, state.stage, &state.run_id).with_data(data))
            .await;
    }

    fn checkpoint(&self, state: &WorkflowState, status: RunStatus) -> anyhow::Result<()> {
        match &self.db {
            Some(db) => CheckpointStore::new(db).save(state, status),
            None => Ok(()),
        }
    }

    /// Start a new run
    #[tracing::instrument(skip(self, criteria), fields(location = %criteria.location))]
    pub async fn run(
        &mut self,
        criteria: SearchCriteria,
        design_style: &str,
    ) -> StageResult<RunOutcome> {
        let state = WorkflowState::new(new_id(), criteria, design_style);
        tracing::info!(run_id = %state.run_id, "Run started");
        self.emit_stage(
            WorkflowEventKind::RunStarted,
            &state,
            json!({"search_criteria": state.search_criteria, "design_style": state.design_style}),
        )
        .await;
        self.drive(state).await
    }

    /// Continue a checkpointed run from the stage it stopped at
    #[tracing::instrument(skip(self))]
    pub async fn resume(&mut self, run_id: &str) -> StageResult<RunOutcome> {
        let db = self
            .db
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Checkpoints not configured - use with_checkpoints()"))?;
        let checkpoint = CheckpointStore::new(&db).load(run_id)?;

        if matches!(checkpoint.status, RunStatus::Completed | RunStatus::Failed) {
            return Err(anyhow::anyhow!(
                "Run {} already finished ({})",
                run_id,
                checkpoint.status.as_str()
            )
            .into());
        }

        tracing::info!(run_id, stage = checkpoint.state.stage.as_str(), "Run resumed");
        self.emit_stage(WorkflowEventKind::RunResumed, &checkpoint.state, json!({}))
            .await;
        self.drive(checkpoint.state).await
    }

    async fn drive(&mut self, mut state: WorkflowState) -> StageResult<RunOutcome> {
        let mut pipeline = Pipeline::resume_at(
            state.stage,
            state.search_attempt,
            self.config.max_search_retries,
        );

        match self.step_all(&mut pipeline, &mut state).await {
            Ok(report) => {
                state.stage = WorkflowStage::Done;
                if let Err(e) = self.checkpoint(&state, RunStatus::Completed) {
                    tracing::warn!(run_id = %state.run_id, "Failed to save checkpoint: {}", e);
                }
                self.emit_stage(
                    WorkflowEventKind::RunCompleted,
                    &state,
                    json!({"summary": state.counters}),
                )
                .await;
                tracing::info!(run_id = %state.run_id, "Run completed");

                Ok(RunOutcome {
                    state,
                    report,
                    events: std::mem::take(&mut self.events),
                })
            }
            Err(e) => {
                let failed_at = state.stage;
                pipeline.fail();
                state.record_failure(failed_at.as_str(), e.to_string());
                state.stage = WorkflowStage::Failed;
                if let Err(save_err) = self.checkpoint(&state, RunStatus::Failed) {
                    tracing::warn!(
                        run_id = %state.run_id,
                        "Failed to save checkpoint: {}",
                        save_err
                    );
                }
                self.emit(
                    WorkflowEvent::new(WorkflowEventKind::RunFailed, failed_at, &state.run_id)
                        .with_data(json!({"error": e.to_string()})),
                )
                .await;
                tracing::error!(
                    run_id = %state.run_id,
                    stage = failed_at.as_str(),
                    "Run failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn step_all(
        &mut self,
        pipeline: &mut Pipeline,
        state: &mut WorkflowState,
    ) -> StageResult<FinalReport> {
        let human_in_loop = self.config.human_in_loop;
        let mut final_report = None;

        while !pipeline.is_complete() {
            state.stage = pipeline.stage;
            tracing::info!(run_id = %state.run_id, stage = state.stage.as_str(), "Stage started");
            self.emit_stage(WorkflowEventKind::StageStarted, state, json!({})).await;

            match pipeline.stage {
                WorkflowStage::Init => {
                    state.search_criteria.validate()?;
                    pipeline.advance(human_in_loop);
                }
                WorkflowStage::Search => {
                    self.search(state).await?;
                    pipeline.advance(human_in_loop);
                }
                WorkflowStage::HumanApproval => match self.human_approval(state).await? {
                    FeedbackResult::Approved(ids) => {
                        tracing::info!(
                            run_id = %state.run_id,
                            approved = ids.len(),
                            "Listings approved"
                        );
                        state.approved_ids = Some(ids);
                        pipeline.advance(human_in_loop);
                    }
                    FeedbackResult::Retry { feedback } => {
                        if !pipeline.request_search_retry() {
                            return Err(StageError::RetriesExhausted(state.search_attempt + 1));
                        }
                        state.search_attempt = pipeline.search_retries;
                        state.reviewer_feedback = Some(feedback.clone()).filter(|f| !f.is_empty());
                        self.emit_stage(
                            WorkflowEventKind::SearchRetried,
                            state,
                            json!({"attempt": state.search_attempt, "feedback": feedback}),
                        )
                        .await;
                    }
                },
                WorkflowStage::Filter => {
                    self.filter(state)?;
                    pipeline.advance(human_in_loop);
                }
                WorkflowStage::Analysis => {
                    self.analysis(state).await?;
                    pipeline.advance(human_in_loop);
                }
                WorkflowStage::Compile => {
                    final_report = Some(self.compile(state).await?);
                    pipeline.advance(human_in_loop);
                }
                WorkflowStage::Done | WorkflowStage::Failed => break,
            }

            state.refresh_counters();
            self.emit_stage(
                WorkflowEventKind::StageCompleted,
                state,
                json!({"counters": state.counters, "next": pipeline.stage}),
            )
            .await;

            state.stage = pipeline.stage;
            if !pipeline.is_complete() {
                if let Err(e) = self.checkpoint(state, RunStatus::Running) {
                    tracing::warn!(run_id = %state.run_id, "Failed to save checkpoint: {}", e);
                }
            }
        }

        match final_report {
            Some(report) => Ok(report),
            // Resumed past Compile; rebuild from state
            None => Ok(FinalReport::from_state(state)),
        }
    }

    /// Inputs shared by every research attempt of this run
    fn research_inputs(state: &WorkflowState) -> TaskInputs {
        let criteria = &state.search_criteria;
        let mut inputs = TaskInputs::new();
        inputs.insert(keys::SEARCH_QUERY.to_string(), criteria.to_query());
        inputs.insert(keys::LOCATION.to_string(), criteria.location.clone());
        inputs.insert(keys::PROPERTY_TYPE.to_string(), criteria.property_type.clone());
        inputs.insert(keys::RENT_FREQUENCY.to_string(), criteria.rent_frequency.clone());
        if let Some(bedrooms) = criteria.bedrooms {
            inputs.insert(keys::BEDROOMS.to_string(), bedrooms.to_string());
        }
        if let Some(max_price) = criteria.max_price {
            inputs.insert(keys::MAX_PRICE.to_string(), max_price.to_string());
        }
        if let Some(feedback) = &state.reviewer_feedback {
            inputs.insert(keys::REVIEWER_FEEDBACK.to_string(), feedback.clone());
        }
        inputs
    }

    async fn search(&mut self, state: &mut WorkflowState) -> StageResult<()> {
        state.clear_output(StageKey::Research);
        let inputs = Self::research_inputs(state);
        let crew = self.research.clone();

        let raw = if self.config.guard_research_report {
            let guard = ResearchReportGuardrail::new(&self.config.guardrails);
            let payload = run_guarded(
                "search",
                &guard,
                self.config.retry_budgets.research_report,
                |feedback| {
                    let mut inputs = inputs.clone();
                    if let Some(reason) = feedback {
                        inputs.insert(keys::GUARDRAIL_FEEDBACK.to_string(), reason);
                    }
                    let crew = crew.clone();
                    async move {
                        let result = crew.kickoff(&inputs).await?;
                        Ok(RawStageOutput::Text(result.raw))
                    }
                },
            )
            .await?;
            serde_json::to_string_pretty(&payload).map_err(anyhow::Error::from)?
        } else {
            crew.kickoff(&inputs)
                .await
                .map_err(|e| StageError::crew(crew.name(), e))?
                .raw
        };

        state.write_output(StageKey::Research, raw)?;
        state.refresh_counters();
        tracing::info!(
            run_id = %state.run_id,
            attempt = state.search_attempt,
            properties_found = state.counters.properties_found,
            "Search finished"
        );
        Ok(())
    }

    async fn human_approval(&mut self, state: &mut WorkflowState) -> StageResult<FeedbackResult> {
        let candidate_ids: Vec<String> = state
            .output(StageKey::Research)
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .map(|report| {
                property_records(&report)
                    .iter()
                    .filter_map(|record| record_id(record).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let prompt = format!(
            "Search \"{}\" found {} listing(s): {}.\n\
             Reply \"{}\" with the ids to analyze, or \"{}\" with feedback for a new search.",
            state.search_criteria.to_query(),
            candidate_ids.len(),
            candidate_ids.join(", "),
            OPTION_APPROVE,
            OPTION_RETRY
        );

        // The run must be resumable before anyone is asked anything
        self.checkpoint(state, RunStatus::Suspended)?;
        self.emit_stage(
            WorkflowEventKind::CheckpointSaved,
            state,
            json!({"status": RunStatus::Suspended.as_str()}),
        )
        .await;

        let request = FeedbackRequest {
            run_id: state.run_id.clone(),
            attempt: state.search_attempt,
            prompt,
            candidate_ids,
            allowed_outcomes: vec![OPTION_APPROVE.to_string(), OPTION_RETRY.to_string()],
        };

        self.broker
            .request_feedback(request)
            .await
            .map_err(|e| StageError::Aborted(format!("{:#}", e)))
    }

    fn filter(&mut self, state: &mut WorkflowState) -> StageResult<()> {
        let research = state.output(StageKey::Research).unwrap_or_default().to_string();
        let (filtered, outcome) = filter_research(&research, state.approved_ids.as_ref());

        match &outcome {
            FilterOutcome::Filtered { kept } => {
                tracing::info!(run_id = %state.run_id, kept, "Research filtered to approved ids");
            }
            FilterOutcome::PassThrough { reason } if state.approved_ids.is_some() => {
                state.record_failure(
                    WorkflowStage::Filter.as_str(),
                    format!("Approved ids not applied: {}", reason),
                );
            }
            FilterOutcome::PassThrough { .. } => {}
        }

        state.write_output(StageKey::Filtered, filtered)
    }

    async fn analysis(&mut self, state: &mut WorkflowState) -> StageResult<()> {
        let filtered = state
            .output(StageKey::Filtered)
            .or_else(|| state.output(StageKey::Research))
            .unwrap_or_default()
            .to_string();

        let mut location_inputs = TaskInputs::new();
        location_inputs.insert(keys::PROPERTIES.to_string(), filtered.clone());
        let mut design_inputs = location_inputs.clone();
        design_inputs.insert(keys::DESIGN_STYLE.to_string(), state.design_style.clone());

        let location = self.location.clone();
        let design = self.design.clone();

        // Both branches read the same input and return their own output
        let (location_result, design_result) = tokio::join!(
            run_branch(location.as_ref(), &location_inputs),
            run_branch(design.as_ref(), &design_inputs),
        );

        for (key, result) in [
            (StageKey::Location, location_result),
            (StageKey::Design, design_result),
        ] {
            match result {
                Ok(raw) => state.write_output(key, raw)?,
                Err(e) => {
                    tracing::warn!(
                        run_id = %state.run_id,
                        branch = key.as_str(),
                        "Analysis branch failed, continuing: {}",
                        e
                    );
                    state.record_failure(key.as_str(), e.to_string());
                    self.emit_stage(
                        WorkflowEventKind::StageDegraded,
                        state,
                        json!({"branch": key.as_str(), "error": e.to_string()}),
                    )
                    .await;
                }
            }
        }

        Ok(())
    }

    async fn compile(&mut self, state: &mut WorkflowState) -> StageResult<FinalReport> {
        state.refresh_counters();
        let report = FinalReport::from_state(state);
        if let Some(sink) = &self.sink {
            sink.deliver(&report).await?;
        }
        Ok(report)
    }
}

async fn run_branch(crew: &dyn Crew, inputs: &TaskInputs) -> StageResult<String> {
    crew.kickoff(inputs)
        .await
        .map(|result| result.raw)
        .map_err(|e| StageError::crew(crew.name(), e))
}
