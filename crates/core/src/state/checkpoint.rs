//! # Run Checkpoints
//!
//! One row per workflow run holding the full serialized state. Written
//! before every suspension point and after every stage, so a run can be
//! resumed by id after a restart.

use super::db::HomeScoutDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::workflow::{WorkflowStage, WorkflowState};

/// Lifecycle of a stored run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Waiting on the reviewer
    Suspended,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "suspended" => Self::Suspended,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// A stored run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: WorkflowState,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry without the state payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub stage: WorkflowStage,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed checkpoint store
pub struct CheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl CheckpointStore {
    pub fn new(db: &HomeScoutDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Upsert the run's state
    pub fn save(&self, state: &WorkflowState, status: RunStatus) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let state_json = serde_json::to_string(state)?;

        conn.execute(
            r#"
            INSERT INTO workflow_runs (run_id, stage, status, state_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(run_id) DO UPDATE SET
                stage = ?2,
                status = ?3,
                state_json = ?4,
                updated_at = ?5
            "#,
            params![
                state.run_id,
                state.stage.as_str(),
                status.as_str(),
                state_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to save checkpoint")?;

        tracing::debug!(run_id = %state.run_id, stage = state.stage.as_str(), "Checkpoint saved");
        Ok(())
    }

    /// Load a run by id
    pub fn load(&self, run_id: &str) -> Result<Checkpoint> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let (state_json, status, updated_at): (String, String, String) = conn
            .query_row(
                "SELECT state_json, status, updated_at FROM workflow_runs WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .with_context(|| format!("Run not found: {}", run_id))?;

        let state: WorkflowState =
            serde_json::from_str(&state_json).context("Corrupt checkpoint state")?;

        Ok(Checkpoint {
            state,
            status: RunStatus::from_str(&status),
            updated_at: parse_time(&updated_at),
        })
    }

    /// Runs waiting on the reviewer, newest first
    pub fn list_suspended(&self) -> Result<Vec<RunSummary>> {
        self.list_where(Some(RunStatus::Suspended), 100)
    }

    /// Most recent runs of any status
    pub fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        self.list_where(None, limit)
    }

    fn list_where(&self, status: Option<RunStatus>, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT run_id, stage, status, updated_at FROM workflow_runs
            WHERE ?1 IS NULL OR status = ?1
            ORDER BY updated_at DESC
            LIMIT ?2
            "#,
        )?;

        let runs = stmt
            .query_map(params![status.map(|s| s.as_str()), limit as i64], |row| {
                Ok(RunSummary {
                    run_id: row.get(0)?,
                    stage: WorkflowStage::from_str(&row.get::<_, String>(1)?),
                    status: RunStatus::from_str(&row.get::<_, String>(2)?),
                    updated_at: parse_time(&row.get::<_, String>(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list runs")?;

        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{SearchCriteria, StageKey};
    use std::fs;

    #[test]
    fn test_checkpoint_round_trip() {
        let path = ".homescout/test_checkpoints.db";
        let _ = fs::remove_file(path);

        let db = HomeScoutDb::open_at(path).unwrap();
        let store = CheckpointStore::new(&db);

        let mut state = WorkflowState::new(
            "run-ckpt",
            SearchCriteria::new("Ojodu, Lagos, Nigeria"),
            "modern minimalist",
        );
        state.stage = WorkflowStage::HumanApproval;
        state.search_attempt = 1;
        state.reviewer_feedback = Some("closer to Berger".to_string());
        state
            .write_output(StageKey::Research, r#"{"properties":[{"id":"p1"}]}"#.to_string())
            .unwrap();
        store.save(&state, RunStatus::Suspended).unwrap();

        let loaded = store.load("run-ckpt").unwrap();
        assert_eq!(loaded.status, RunStatus::Suspended);
        assert_eq!(loaded.state.stage, WorkflowStage::HumanApproval);
        assert_eq!(loaded.state.search_attempt, 1);
        assert_eq!(loaded.state.reviewer_feedback, state.reviewer_feedback);
        assert_eq!(loaded.state.output(StageKey::Research), state.output(StageKey::Research));
        assert_eq!(loaded.state.search_criteria, state.search_criteria);

        drop(store);
        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_list_suspended() {
        let path = ".homescout/test_checkpoints_list.db";
        let _ = fs::remove_file(path);

        let db = HomeScoutDb::open_at(path).unwrap();
        let store = CheckpointStore::new(&db);
        let criteria = SearchCriteria::new("Ikeja");

        let waiting = WorkflowState::new("waiting", criteria.clone(), "");
        let done = WorkflowState::new("done", criteria, "");
        store.save(&waiting, RunStatus::Suspended).unwrap();
        store.save(&done, RunStatus::Completed).unwrap();

        let suspended = store.list_suspended().unwrap();
        assert_eq!(suspended.len(), 1);
        assert_eq!(suspended[0].run_id, "waiting");
        assert_eq!(store.list_recent(10).unwrap().len(), 2);

        // Saving again updates the same row
        store.save(&waiting, RunStatus::Completed).unwrap();
        assert!(store.list_suspended().unwrap().is_empty());
        assert_eq!(store.list_recent(10).unwrap().len(), 2);

        assert!(store.load("missing").is_err());

        drop(store);
        drop(db);
        let _ = fs::remove_file(path);
    }
}
