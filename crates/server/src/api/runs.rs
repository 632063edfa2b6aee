//! # Runs API
//!
//! Start a run from a trigger payload, inspect its checkpoint, resume it
//! after a restart or abort it while it waits on the reviewer.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use homescout_core::state::{CheckpointStore, RunStatus};
use homescout_core::workflow::state::default_design_style;
use homescout_core::workflow::{
    AutoApprove, CoordinatorCommand, FeedbackBroker, InboxBroker, SearchCriteria, Workflow,
    WorkflowEvent, WorkflowEventKind,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use utoipa::ToSchema;

use super::{ApiError, ApiResponse, SharedState};

/// Trigger payload: `{search_criteria, design_style}`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RunPayload {
    #[schema(value_type = Object)]
    pub search_criteria: SearchCriteria,
    #[serde(default = "default_design_style")]
    pub design_style: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartRunResponse {
    pub run_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunItem {
    pub run_id: String,
    pub stage: String,
    pub status: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunListResponse {
    pub runs: Vec<RunItem>,
}

/// What a spawned run should do
pub enum RunTarget {
    Start(RunPayload),
    Resume(String),
}

/// Rebroadcast a run's events, keeping its command channel registered in
/// `run_channels` from its first start/resume event until every event
/// sender is dropped
pub(crate) async fn forward_events(
    state: SharedState,
    mut event_rx: mpsc::Receiver<WorkflowEvent>,
    command_tx: mpsc::Sender<CoordinatorCommand>,
    mut started_tx: Option<oneshot::Sender<String>>,
) {
    let mut registered: Option<String> = None;

    while let Some(event) = event_rx.recv().await {
        if matches!(
            event.kind,
            WorkflowEventKind::RunStarted | WorkflowEventKind::RunResumed
        ) && registered.is_none()
        {
            state
                .run_channels
                .write()
                .await
                .insert(event.run_id.clone(), command_tx.clone());
            registered = Some(event.run_id.clone());
            if let Some(tx) = started_tx.take() {
                let _ = tx.send(event.run_id.clone());
            }
        }
        let _ = state.event_tx.send(event);
    }

    // Every sender is gone: the run has finished
    if let Some(run_id) = registered {
        state.run_channels.write().await.remove(&run_id);
    }
}

/// Run a workflow in the background and return its id once it has started.
///
/// Events are forwarded to the broadcast channel. While the run is live its
/// command sender is registered in `run_channels`, so inbox replies and
/// aborts can reach the waiting broker.
pub async fn spawn_run(state: SharedState, target: RunTarget) -> anyhow::Result<String> {
    let (event_tx, event_rx) = mpsc::channel::<WorkflowEvent>(100);
    let (command_tx, command_rx) = mpsc::channel::<CoordinatorCommand>(10);

    let broker: Arc<dyn FeedbackBroker> = if state.config.human_in_loop {
        Arc::new(
            InboxBroker::new(state.db.clone(), command_rx).with_event_channel(event_tx.clone()),
        )
    } else {
        Arc::new(AutoApprove)
    };

    let mut workflow = Workflow::from_config(state.config.clone())?
        .with_broker(broker)
        .with_checkpoints(state.db.clone())
        .with_event_channel(event_tx);

    let (started_tx, started_rx) = oneshot::channel::<String>();

    // Bridge events to broadcast
    tokio::spawn(forward_events(
        state.clone(),
        event_rx,
        command_tx,
        Some(started_tx),
    ));

    tokio::spawn(async move {
        let result = match target {
            RunTarget::Start(payload) => {
                workflow
                    .run(payload.search_criteria, &payload.design_style)
                    .await
            }
            RunTarget::Resume(run_id) => workflow.resume(&run_id).await,
        };
        match result {
            Ok(outcome) => tracing::info!(
                run_id = %outcome.state.run_id,
                properties = outcome.state.counters.properties_analyzed,
                "Run finished"
            ),
            Err(e) => tracing::error!("Run failed: {}", e),
        }
    });

    started_rx
        .await
        .map_err(|_| anyhow::anyhow!("Run stopped before it started"))
}

/// Start a new run
#[utoipa::path(
    post,
    path = "/api/v1/runs",
    tag = "runs",
    request_body = RunPayload,
    responses(
        (status = 200, description = "Run started", body = StartRunResponse),
        (status = 400, description = "Invalid search criteria", body = ApiResponse)
    )
)]
pub async fn start_run(
    State(state): State<SharedState>,
    Json(payload): Json<RunPayload>,
) -> Result<Json<StartRunResponse>, ApiError> {
    if let Err(e) = payload.search_criteria.validate() {
        return Err(ApiResponse::error(StatusCode::BAD_REQUEST, e.to_string()));
    }

    let location = payload.search_criteria.location.clone();
    let run_id = spawn_run(state, RunTarget::Start(payload))
        .await
        .map_err(|e| ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(StartRunResponse {
        message: format!("Searching rentals in {}", location),
        run_id,
    }))
}

/// List recent runs
#[utoipa::path(
    get,
    path = "/api/v1/runs",
    tag = "runs",
    responses(
        (status = 200, description = "Most recent runs", body = RunListResponse)
    )
)]
pub async fn list_runs(State(state): State<SharedState>) -> Json<RunListResponse> {
    let store = CheckpointStore::new(&state.db);
    match store.list_recent(50) {
        Ok(runs) => Json(RunListResponse {
            runs: runs
                .into_iter()
                .map(|r| RunItem {
                    run_id: r.run_id,
                    stage: r.stage.as_str().to_string(),
                    status: r.status.as_str().to_string(),
                    updated_at: r.updated_at.to_rfc3339(),
                })
                .collect(),
        }),
        Err(e) => {
            tracing::warn!("Failed to list runs: {}", e);
            Json(RunListResponse { runs: vec![] })
        }
    }
}

/// Get a run's checkpointed state
#[utoipa::path(
    get,
    path = "/api/v1/runs/{id}",
    tag = "runs",
    params(
        ("id" = String, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Checkpoint with the full workflow state", body = Object),
        (status = 404, description = "Unknown run", body = ApiResponse)
    )
)]
pub async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let checkpoint = CheckpointStore::new(&state.db)
        .load(&id)
        .map_err(|e| ApiResponse::error(StatusCode::NOT_FOUND, e.to_string()))?;

    serde_json::to_value(&checkpoint)
        .map(Json)
        .map_err(|e| ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Resume a suspended or interrupted run
#[utoipa::path(
    post,
    path = "/api/v1/runs/{id}/resume",
    tag = "runs",
    params(
        ("id" = String, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run resumed", body = StartRunResponse),
        (status = 404, description = "Unknown run", body = ApiResponse),
        (status = 409, description = "Run is live or already finished", body = ApiResponse)
    )
)]
pub async fn resume_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<StartRunResponse>, ApiError> {
    let checkpoint = CheckpointStore::new(&state.db)
        .load(&id)
        .map_err(|e| ApiResponse::error(StatusCode::NOT_FOUND, e.to_string()))?;

    if matches!(checkpoint.status, RunStatus::Completed | RunStatus::Failed) {
        return Err(ApiResponse::error(
            StatusCode::CONFLICT,
            format!("Run {} already {}", id, checkpoint.status.as_str()),
        ));
    }
    if state.run_channels.read().await.contains_key(&id) {
        return Err(ApiResponse::error(
            StatusCode::CONFLICT,
            format!("Run {} is already running", id),
        ));
    }

    let run_id = spawn_run(state, RunTarget::Resume(id))
        .await
        .map_err(|e| ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(StartRunResponse {
        message: format!("Resumed at {}", checkpoint.state.stage.as_str()),
        run_id,
    }))
}

/// Abort a run waiting on the reviewer
#[utoipa::path(
    post,
    path = "/api/v1/runs/{id}/abort",
    tag = "runs",
    params(
        ("id" = String, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Abort sent", body = ApiResponse),
        (status = 404, description = "Run is not live in this process", body = ApiResponse)
    )
)]
pub async fn abort_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    let sent = match state.run_channels.read().await.get(&id).cloned() {
        Some(tx) => tx.send(CoordinatorCommand::Abort).await.is_ok(),
        None => false,
    };

    if sent {
        Ok(ApiResponse::ok(format!("Abort sent to {}", id)))
    } else {
        Err(ApiResponse::error(
            StatusCode::NOT_FOUND,
            format!("Run {} is not waiting on a reviewer", id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_state;
    use homescout_core::workflow::WorkflowStage;
    use std::fs;

    #[tokio::test]
    async fn test_forwarder_registers_started_run_until_it_ends() {
        let path = ".homescout/test_forward_started.db";
        let state = test_state(path);
        let mut broadcast_rx = state.event_tx.subscribe();

        let (event_tx, event_rx) = mpsc::channel(8);
        let (command_tx, mut command_rx) = mpsc::channel(1);
        let (started_tx, started_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_events(
            state.clone(),
            event_rx,
            command_tx,
            Some(started_tx),
        ));

        event_tx
            .send(WorkflowEvent::new(
                WorkflowEventKind::RunStarted,
                WorkflowStage::Init,
                "run-x",
            ))
            .await
            .unwrap();
        assert_eq!(started_rx.await.unwrap(), "run-x");
        assert_eq!(broadcast_rx.recv().await.unwrap().run_id, "run-x");

        let registered = state.run_channels.read().await.get("run-x").cloned();
        registered
            .expect("run-x is live")
            .send(CoordinatorCommand::Abort)
            .await
            .unwrap();
        assert!(matches!(
            command_rx.recv().await,
            Some(CoordinatorCommand::Abort)
        ));

        drop(event_tx);
        forwarder.await.unwrap();
        assert!(!state.run_channels.read().await.contains_key("run-x"));

        drop(state);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_forwarder_registers_resumed_run() {
        let path = ".homescout/test_forward_resumed.db";
        let state = test_state(path);

        let (event_tx, event_rx) = mpsc::channel(8);
        let (command_tx, _command_rx) = mpsc::channel(1);
        let forwarder = tokio::spawn(forward_events(state.clone(), event_rx, command_tx, None));

        event_tx
            .send(WorkflowEvent::new(
                WorkflowEventKind::StageStarted,
                WorkflowStage::Search,
                "run-y",
            ))
            .await
            .unwrap();
        event_tx
            .send(WorkflowEvent::new(
                WorkflowEventKind::RunResumed,
                WorkflowStage::HumanApproval,
                "run-y",
            ))
            .await
            .unwrap();

        // Wait for the forwarder to catch up
        for _ in 0..50 {
            if state.run_channels.read().await.contains_key("run-y") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(state.run_channels.read().await.contains_key("run-y"));

        drop(event_tx);
        forwarder.await.unwrap();
        assert!(state.run_channels.read().await.is_empty());

        drop(state);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_payload_defaults_design_style() {
        let payload: RunPayload =
            serde_json::from_str(r#"{"search_criteria": {"location": "Ikeja, Lagos"}}"#).unwrap();
        assert_eq!(payload.design_style, "modern minimalist");
        assert_eq!(payload.search_criteria.property_type, "apartment");
        assert_eq!(payload.search_criteria.rent_frequency, "monthly");
    }

    #[test]
    fn test_payload_requires_criteria() {
        let result = serde_json::from_str::<RunPayload>(r#"{"design_style": "boho"}"#);
        assert!(result.is_err());
    }
}
