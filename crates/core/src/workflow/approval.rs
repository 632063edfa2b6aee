//! # Human Approval
//!
//! The boundary between the workflow and whoever reviews search results.
//! [`AutoApprove`] is used when no reviewer is configured; [`InboxBroker`]
//! persists the request as an [`Interaction`] and blocks until the API
//! posts a reply and signals it over the command channel.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::events::{WorkflowEvent, WorkflowEventKind};
use super::pipeline::WorkflowStage;
use crate::state::{
    HomeScoutDb, Interaction, InteractionKind, InteractionManager, InteractionResponse,
    InteractionStatus,
};

pub const OPTION_APPROVE: &str = "approve";
pub const OPTION_RETRY: &str = "retry";

/// What the reviewer is asked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub run_id: String,
    /// Search attempt the candidates came from
    pub attempt: u32,
    pub prompt: String,
    pub candidate_ids: Vec<String>,
    pub allowed_outcomes: Vec<String>,
}

/// The reviewer's answer
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackResult {
    Approved(BTreeSet<String>),
    Retry { feedback: String },
}

/// Commands sent from the API to a waiting [`InboxBroker`]
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// The interaction with this id has a reply in the database
    Resume(String),
    /// Abort the current run
    Abort,
}

#[async_trait]
pub trait FeedbackBroker: Send + Sync {
    async fn request_feedback(&self, request: FeedbackRequest) -> Result<FeedbackResult>;
}

/// Approves every candidate without asking anyone
pub struct AutoApprove;

#[async_trait]
impl FeedbackBroker for AutoApprove {
    async fn request_feedback(&self, request: FeedbackRequest) -> Result<FeedbackResult> {
        Ok(FeedbackResult::Approved(
            request.candidate_ids.into_iter().collect(),
        ))
    }
}

/// Turn a stored reply into a result; "approve" with no ids approves every candidate
pub fn feedback_from_response(
    response: &InteractionResponse,
    candidates: &[String],
) -> Result<FeedbackResult> {
    match response.selected_option.as_str() {
        OPTION_APPROVE if response.approved_ids.is_empty() => {
            Ok(FeedbackResult::Approved(candidates.iter().cloned().collect()))
        }
        OPTION_APPROVE => Ok(FeedbackResult::Approved(
            response.approved_ids.iter().cloned().collect(),
        )),
        OPTION_RETRY => Ok(FeedbackResult::Retry {
            feedback: response.feedback.clone().unwrap_or_default(),
        }),
        other => anyhow::bail!("Unknown reply option: {}", other),
    }
}

/// Reviewer inbox backed by SQLite
pub struct InboxBroker {
    db: Arc<HomeScoutDb>,
    command_rx: Mutex<mpsc::Receiver<CoordinatorCommand>>,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
}

impl InboxBroker {
    pub fn new(db: Arc<HomeScoutDb>, command_rx: mpsc::Receiver<CoordinatorCommand>) -> Self {
        Self {
            db,
            command_rx: Mutex::new(command_rx),
            event_tx: None,
        }
    }

    /// Set event channel for interaction events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Interaction ids are stable per run and attempt, so a restarted run
    /// finds the request it left behind.
    pub fn interaction_id(run_id: &str, attempt: u32) -> String {
        format!("{}-approval-{}", run_id, attempt)
    }

    async fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl FeedbackBroker for InboxBroker {
    async fn request_feedback(&self, request: FeedbackRequest) -> Result<FeedbackResult> {
        let id = Self::interaction_id(&request.run_id, request.attempt);
        let mgr = InteractionManager::new(&self.db);

        // 1. Reuse the stored request, or persist a new one
        match mgr.find(&id)? {
            Some(existing) if existing.status == InteractionStatus::Responded => {
                if let Some(response) = &existing.response {
                    tracing::info!(interaction_id = %id, "Reply already recorded");
                    return feedback_from_response(response, &existing.candidates);
                }
            }
            Some(_) => tracing::info!(interaction_id = %id, "Waiting on existing interaction"),
            None => {
                mgr.save(&Interaction {
                    id: id.clone(),
                    run_id: request.run_id.clone(),
                    kind: InteractionKind::Approval,
                    status: InteractionStatus::Pending,
                    from_stage: WorkflowStage::HumanApproval.as_str().to_string(),
                    title: format!("Review {} listing(s)", request.candidate_ids.len()),
                    description: request.prompt.clone(),
                    options: request.allowed_outcomes.clone(),
                    candidates: request.candidate_ids.clone(),
                    created_at: Utc::now(),
                    resolved_at: None,
                    response: None,
                })?;
            }
        }

        // 2. Tell the UI
        self.emit(
            WorkflowEvent::new(
                WorkflowEventKind::InteractionRequired,
                WorkflowStage::HumanApproval,
                &request.run_id,
            )
            .with_data(serde_json::json!({
                "interaction_id": id,
                "candidates": request.candidate_ids,
                "options": request.allowed_outcomes,
            })),
        )
        .await;

        // 3. Wait for the API signal
        let mut rx = self.command_rx.lock().await;
        loop {
            match rx.recv().await {
                Some(CoordinatorCommand::Resume(resumed)) if resumed == id => {
                    let updated = InteractionManager::new(&self.db).load(&id)?;
                    let response = updated.response.ok_or_else(|| {
                        anyhow::anyhow!("Interaction resolved but no response found")
                    })?;

                    self.emit(
                        WorkflowEvent::new(
                            WorkflowEventKind::InteractionResolved,
                            WorkflowStage::HumanApproval,
                            &request.run_id,
                        )
                        .with_data(serde_json::json!({"interaction_id": id})),
                    )
                    .await;

                    return feedback_from_response(&response, &updated.candidates);
                }
                Some(CoordinatorCommand::Abort) => anyhow::bail!("Reviewer aborted the run"),
                None => anyhow::bail!("Inbox command channel closed"),
                // Ignore signals meant for other interactions
                Some(CoordinatorCommand::Resume(_)) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn request(run_id: &str) -> FeedbackRequest {
        FeedbackRequest {
            run_id: run_id.to_string(),
            attempt: 0,
            prompt: "Approve listings p1, p2".to_string(),
            candidate_ids: vec!["p1".to_string(), "p2".to_string()],
            allowed_outcomes: vec![OPTION_APPROVE.to_string(), OPTION_RETRY.to_string()],
        }
    }

    fn reply(option: &str, ids: &[&str], feedback: Option<&str>) -> InteractionResponse {
        InteractionResponse {
            selected_option: option.to_string(),
            approved_ids: ids.iter().map(|s| s.to_string()).collect(),
            feedback: feedback.map(str::to_string),
            responded_by: "reviewer".to_string(),
        }
    }

    #[tokio::test]
    async fn test_auto_approve_takes_all_candidates() {
        let result = AutoApprove.request_feedback(request("r1")).await.unwrap();
        let expected: BTreeSet<String> = ["p1", "p2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(result, FeedbackResult::Approved(expected));
    }

    #[test]
    fn test_feedback_from_response() {
        let candidates = vec!["p1".to_string(), "p2".to_string()];

        let approved = feedback_from_response(&reply("approve", &["p2"], None), &candidates);
        assert_eq!(
            approved.unwrap(),
            FeedbackResult::Approved(["p2".to_string()].into_iter().collect())
        );

        let everything = feedback_from_response(&reply("approve", &[], None), &candidates);
        assert!(matches!(everything.unwrap(), FeedbackResult::Approved(ids) if ids.len() == 2));

        let retry = feedback_from_response(&reply("retry", &[], Some("cheaper")), &candidates);
        assert_eq!(
            retry.unwrap(),
            FeedbackResult::Retry {
                feedback: "cheaper".to_string()
            }
        );

        assert!(feedback_from_response(&reply("maybe", &[], None), &candidates).is_err());
    }

    #[tokio::test]
    async fn test_inbox_broker_waits_for_reply() {
        let path = ".homescout/test_inbox_broker.db";
        let _ = fs::remove_file(path);

        let db = Arc::new(HomeScoutDb::open_at(path).unwrap());
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let broker = InboxBroker::new(db.clone(), cmd_rx).with_event_channel(event_tx);

        let waiter = tokio::spawn(async move { broker.request_feedback(request("r1")).await });

        // The interaction is announced, then answered through the database
        let announced = event_rx.recv().await.unwrap();
        assert_eq!(announced.kind, WorkflowEventKind::InteractionRequired);
        let id = InboxBroker::interaction_id("r1", 0);

        InteractionManager::new(&db)
            .resolve(&id, reply("approve", &["p1"], None))
            .unwrap();
        cmd_tx
            .send(CoordinatorCommand::Resume("unrelated".to_string()))
            .await
            .unwrap();
        cmd_tx.send(CoordinatorCommand::Resume(id)).await.unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(
            result,
            FeedbackResult::Approved(["p1".to_string()].into_iter().collect())
        );

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_inbox_broker_uses_reply_recorded_while_down() {
        let path = ".homescout/test_inbox_broker_restart.db";
        let _ = fs::remove_file(path);

        let db = Arc::new(HomeScoutDb::open_at(path).unwrap());
        let mgr = InteractionManager::new(&db);
        let id = InboxBroker::interaction_id("r2", 0);
        mgr.save(&Interaction {
            id: id.clone(),
            run_id: "r2".to_string(),
            kind: InteractionKind::Approval,
            status: InteractionStatus::Pending,
            from_stage: "human_approval".to_string(),
            title: "Review 2 listing(s)".to_string(),
            description: String::new(),
            options: vec![OPTION_APPROVE.to_string(), OPTION_RETRY.to_string()],
            candidates: vec!["p1".to_string(), "p2".to_string()],
            created_at: Utc::now(),
            resolved_at: None,
            response: None,
        })
        .unwrap();
        mgr.resolve(&id, reply("retry", &[], Some("closer to Berger")))
            .unwrap();

        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let broker = InboxBroker::new(db.clone(), cmd_rx);
        let result = broker.request_feedback(request("r2")).await.unwrap();
        assert_eq!(
            result,
            FeedbackResult::Retry {
                feedback: "closer to Berger".to_string()
            }
        );

        drop(broker);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_inbox_broker_abort() {
        let path = ".homescout/test_inbox_broker_abort.db";
        let _ = fs::remove_file(path);

        let db = Arc::new(HomeScoutDb::open_at(path).unwrap());
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let broker = InboxBroker::new(db.clone(), cmd_rx);
        cmd_tx.send(CoordinatorCommand::Abort).await.unwrap();

        let err = broker.request_feedback(request("r3")).await.unwrap_err();
        assert!(err.to_string().contains("aborted"));

        drop(broker);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_inbox_broker_surfaces_unreadable_interaction() {
        let path = ".homescout/test_inbox_broker_unreadable.db";
        let _ = fs::remove_file(path);

        let db = Arc::new(HomeScoutDb::open_at(path).unwrap());
        let id = InboxBroker::interaction_id("r4", 0);
        InteractionManager::new(&db)
            .save(&Interaction {
                id: id.clone(),
                run_id: "r4".to_string(),
                kind: InteractionKind::Approval,
                status: InteractionStatus::Pending,
                from_stage: "human_approval".to_string(),
                title: "Review 2 listing(s)".to_string(),
                description: String::new(),
                options: vec![OPTION_APPROVE.to_string()],
                candidates: vec!["p1".to_string(), "p2".to_string()],
                created_at: Utc::now(),
                resolved_at: None,
                response: None,
            })
            .unwrap();
        {
            let conn = db.connection();
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE interactions SET created_at = 42 WHERE id = ?1",
                rusqlite::params![id],
            )
            .unwrap();
        }

        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let broker = InboxBroker::new(db.clone(), cmd_rx);
        let err = broker.request_feedback(request("r4")).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read interaction"));

        // The unreadable row is left alone rather than replaced
        {
            let conn = db.connection();
            let conn = conn.lock().unwrap();
            let stored: String = conn
                .query_row(
                    "SELECT typeof(created_at) FROM interactions WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(stored, "integer");
        }

        drop(broker);
        drop(db);
        let _ = fs::remove_file(path);
    }
}
