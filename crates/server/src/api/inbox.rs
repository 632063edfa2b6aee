//! # Reviewer Inbox API
//!
//! Pending approvals raised by runs waiting at human review, and the reply
//! endpoint that records a decision and wakes the waiting run.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use homescout_core::state::{Interaction, InteractionManager, InteractionResponse};
use homescout_core::workflow::approval::{OPTION_APPROVE, OPTION_RETRY};
use homescout_core::workflow::CoordinatorCommand;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ApiError, ApiResponse, SharedState};

#[derive(Debug, Serialize, ToSchema)]
pub struct InboxItem {
    pub id: String,
    pub run_id: String,
    pub kind: String,
    pub status: String,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    /// Property ids the reviewer can approve
    pub candidates: Vec<String>,
    pub created_at: String,
}

impl From<Interaction> for InboxItem {
    fn from(i: Interaction) -> Self {
        Self {
            kind: i.kind.as_str().to_string(),
            status: i.status.as_str().to_string(),
            created_at: i.created_at.to_rfc3339(),
            id: i.id,
            run_id: i.run_id,
            title: i.title,
            description: i.description,
            options: i.options,
            candidates: i.candidates,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InboxListResponse {
    pub items: Vec<InboxItem>,
}

/// `{approved_ids}` to continue with those listings (empty approves all),
/// or `{retry: true, feedback}` to search again.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct InboxReplyRequest {
    #[serde(default)]
    pub approved_ids: Vec<String>,
    #[serde(default)]
    pub retry: bool,
    pub feedback: Option<String>,
}

impl InboxReplyRequest {
    pub fn into_response(self) -> InteractionResponse {
        let selected_option = if self.retry {
            OPTION_RETRY
        } else {
            OPTION_APPROVE
        };
        InteractionResponse {
            selected_option: selected_option.to_string(),
            approved_ids: if self.retry { vec![] } else { self.approved_ids },
            feedback: self.feedback,
            responded_by: "user".to_string(),
        }
    }
}

fn to_list(result: anyhow::Result<Vec<Interaction>>) -> Json<InboxListResponse> {
    match result {
        Ok(interactions) => Json(InboxListResponse {
            items: interactions.into_iter().map(InboxItem::from).collect(),
        }),
        Err(e) => {
            tracing::warn!("Failed to list interactions: {}", e);
            Json(InboxListResponse { items: vec![] })
        }
    }
}

/// List pending inbox interactions
#[utoipa::path(
    get,
    path = "/api/v1/inbox",
    tag = "inbox",
    responses(
        (status = 200, description = "List of pending interactions", body = InboxListResponse)
    )
)]
pub async fn list_inbox(State(state): State<SharedState>) -> Json<InboxListResponse> {
    to_list(InteractionManager::new(&state.db).list_pending())
}

/// List resolved inbox interactions (history)
#[utoipa::path(
    get,
    path = "/api/v1/inbox/history",
    tag = "inbox",
    responses(
        (status = 200, description = "List of resolved interactions", body = InboxListResponse)
    )
)]
pub async fn list_inbox_history(State(state): State<SharedState>) -> Json<InboxListResponse> {
    to_list(InteractionManager::new(&state.db).list_history(50))
}

/// Reply to an inbox interaction
#[utoipa::path(
    post,
    path = "/api/v1/inbox/{id}/reply",
    tag = "inbox",
    params(
        ("id" = String, Path, description = "Interaction ID")
    ),
    request_body = InboxReplyRequest,
    responses(
        (status = 200, description = "Reply recorded", body = ApiResponse),
        (status = 400, description = "Reply rejected", body = ApiResponse),
        (status = 404, description = "Unknown interaction", body = ApiResponse)
    )
)]
pub async fn reply_to_inbox(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<InboxReplyRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let manager = InteractionManager::new(&state.db);

    let interaction = manager
        .load(&id)
        .map_err(|e| ApiResponse::error(StatusCode::NOT_FOUND, e.to_string()))?;

    let unknown: Vec<&String> = req
        .approved_ids
        .iter()
        .filter(|pid| !interaction.candidates.contains(*pid))
        .collect();
    if !unknown.is_empty() {
        return Err(ApiResponse::error(
            StatusCode::BAD_REQUEST,
            format!("Not a candidate of this review: {:?}", unknown),
        ));
    }

    // 1. Record the decision
    manager
        .resolve(&id, req.into_response())
        .map_err(|e| ApiResponse::error(StatusCode::BAD_REQUEST, e.to_string()))?;

    // 2. Wake the run if it is live in this process
    let tx = state
        .run_channels
        .read()
        .await
        .get(&interaction.run_id)
        .cloned();
    let woke = match tx {
        Some(tx) => tx.send(CoordinatorCommand::Resume(id.clone())).await.is_ok(),
        None => false,
    };

    Ok(ApiResponse::ok(if woke {
        format!("Run {} resumed", interaction.run_id)
    } else {
        format!(
            "Reply recorded; resume run {} to continue",
            interaction.run_id
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_state;
    use chrono::Utc;
    use homescout_core::state::{InteractionKind, InteractionStatus};
    use std::fs;
    use tokio::sync::mpsc;

    fn pending_review(state: &SharedState, id: &str, run_id: &str) {
        InteractionManager::new(&state.db)
            .save(&Interaction {
                id: id.to_string(),
                run_id: run_id.to_string(),
                kind: InteractionKind::Approval,
                status: InteractionStatus::Pending,
                from_stage: "human_approval".to_string(),
                title: "Review 2 listing(s)".to_string(),
                description: "Approve listings p1, p2".to_string(),
                options: vec![OPTION_APPROVE.to_string(), OPTION_RETRY.to_string()],
                candidates: vec!["p1".to_string(), "p2".to_string()],
                created_at: Utc::now(),
                resolved_at: None,
                response: None,
            })
            .unwrap();
    }

    fn approve(ids: &[&str]) -> Json<InboxReplyRequest> {
        Json(InboxReplyRequest {
            approved_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_reply_rejects_non_candidate() {
        let path = ".homescout/test_inbox_non_candidate.db";
        let state = test_state(path);
        pending_review(&state, "r1-approval-0", "r1");

        let (status, Json(body)) = reply_to_inbox(
            State(state.clone()),
            Path("r1-approval-0".to_string()),
            approve(&["p1", "p9"]),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.message.contains("Not a candidate of this review"));

        let stored = InteractionManager::new(&state.db)
            .load("r1-approval-0")
            .unwrap();
        assert_eq!(stored.status, InteractionStatus::Pending);

        drop(state);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_reply_unknown_interaction() {
        let path = ".homescout/test_inbox_unknown.db";
        let state = test_state(path);

        let (status, _) = reply_to_inbox(
            State(state.clone()),
            Path("nope".to_string()),
            approve(&[]),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        drop(state);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_reply_wakes_live_run() {
        let path = ".homescout/test_inbox_live.db";
        let state = test_state(path);
        pending_review(&state, "r2-approval-0", "r2");

        let (tx, mut rx) = mpsc::channel(4);
        state.run_channels.write().await.insert("r2".to_string(), tx);

        let Json(body) = reply_to_inbox(
            State(state.clone()),
            Path("r2-approval-0".to_string()),
            approve(&["p2"]),
        )
        .await
        .unwrap();
        assert!(body.success);
        assert_eq!(body.message, "Run r2 resumed");
        assert!(matches!(
            rx.try_recv(),
            Ok(CoordinatorCommand::Resume(id)) if id == "r2-approval-0"
        ));

        let stored = InteractionManager::new(&state.db)
            .load("r2-approval-0")
            .unwrap();
        assert_eq!(stored.status, InteractionStatus::Responded);
        assert_eq!(stored.response.unwrap().approved_ids, vec!["p2"]);

        drop(state);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_reply_to_idle_run_is_recorded() {
        let path = ".homescout/test_inbox_idle.db";
        let state = test_state(path);
        pending_review(&state, "r3-approval-0", "r3");

        let Json(body) = reply_to_inbox(
            State(state.clone()),
            Path("r3-approval-0".to_string()),
            approve(&[]),
        )
        .await
        .unwrap();
        assert!(body.success);
        assert!(body.message.contains("Reply recorded"));
        assert_eq!(
            InteractionManager::new(&state.db).list_pending().unwrap().len(),
            0
        );

        drop(state);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_reply_approve_subset() {
        let req: InboxReplyRequest =
            serde_json::from_str(r#"{"approved_ids": ["p1", "p3"]}"#).unwrap();
        let response = req.into_response();
        assert_eq!(response.selected_option, "approve");
        assert_eq!(response.approved_ids, vec!["p1", "p3"]);
        assert_eq!(response.responded_by, "user");
    }

    #[test]
    fn test_reply_retry_drops_ids() {
        let req: InboxReplyRequest = serde_json::from_str(
            r#"{"retry": true, "feedback": "closer to the bus park", "approved_ids": ["p1"]}"#,
        )
        .unwrap();
        let response = req.into_response();
        assert_eq!(response.selected_option, "retry");
        assert!(response.approved_ids.is_empty());
        assert_eq!(response.feedback.as_deref(), Some("closer to the bus park"));
    }

    #[test]
    fn test_empty_reply_approves_all() {
        let response = InboxReplyRequest::default().into_response();
        assert_eq!(response.selected_option, "approve");
        assert!(response.approved_ids.is_empty());
    }
}
