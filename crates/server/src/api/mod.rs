//! # HTTP API
//!
//! Routes for starting and resuming runs, answering the reviewer inbox and
//! streaming workflow events over SSE.

pub mod inbox;
pub mod runs;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream};
use homescout_core::config::WorkflowConfig;
use homescout_core::state::HomeScoutDb;
use homescout_core::workflow::{CoordinatorCommand, WorkflowEvent};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc, RwLock};
use utoipa::{OpenApi, ToSchema};

/// Application state
pub struct AppState {
    pub config: WorkflowConfig,
    pub db: Arc<HomeScoutDb>,
    pub event_tx: broadcast::Sender<WorkflowEvent>,
    /// Command senders of runs executing in this process, by run id
    pub run_channels: RwLock<HashMap<String, mpsc::Sender<CoordinatorCommand>>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: WorkflowConfig, db: Arc<HomeScoutDb>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            db,
            event_tx,
            run_channels: RwLock::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                message: message.into(),
            }),
        )
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse>);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HomeScout API",
        version = "1.0.0",
        description = "Rental search, neighborhood scoring and room redesign workflow"
    ),
    paths(
        runs::start_run,
        runs::list_runs,
        runs::get_run,
        runs::resume_run,
        runs::abort_run,
        inbox::list_inbox,
        inbox::reply_to_inbox,
        inbox::list_inbox_history
    ),
    components(
        schemas(
            ApiResponse,
            runs::RunPayload,
            runs::StartRunResponse,
            runs::RunListResponse,
            runs::RunItem,
            inbox::InboxItem,
            inbox::InboxListResponse,
            inbox::InboxReplyRequest
        )
    ),
    tags(
        (name = "runs", description = "Workflow runs"),
        (name = "inbox", description = "Human review of search results")
    )
)]
pub struct ApiDoc;

pub fn router(state: SharedState) -> Router {
    let run_routes = Router::new()
        .route("/", get(runs::list_runs).post(runs::start_run))
        .route("/:id", get(runs::get_run))
        .route("/:id/resume", post(runs::resume_run))
        .route("/:id/abort", post(runs::abort_run));

    let inbox_routes = Router::new()
        .route("/", get(inbox::list_inbox))
        .route("/:id/reply", post(inbox::reply_to_inbox))
        .route("/history", get(inbox::list_inbox_history));

    Router::new()
        .nest("/api/v1/runs", run_routes)
        .nest("/api/v1/inbox", inbox_routes)
        .route("/api/v1/events", get(events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only stream events of this run
    run_id: Option<String>,
}

/// SSE endpoint for workflow events with heartbeat
async fn events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold((rx, query.run_id), |(mut rx, run_id)| async move {
        loop {
            match tokio::time::timeout(Duration::from_secs(15), rx.recv()).await {
                Ok(Ok(event)) => {
                    if run_id.as_deref().is_some_and(|id| id != event.run_id) {
                        continue;
                    }
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(json)), (rx, run_id)));
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "SSE subscriber lagged");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => {
                    return Some((Ok(Event::default().comment("heartbeat")), (rx, run_id)));
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(spec),
    )
}

#[cfg(test)]
pub(crate) fn test_state(path: &str) -> SharedState {
    let _ = std::fs::remove_file(path);
    let db = HomeScoutDb::open_at(path).expect("test database");
    Arc::new(AppState::new(WorkflowConfig::default(), Arc::new(db)))
}
