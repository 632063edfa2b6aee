//! # Interaction State Manager
//!
//! Persistent storage for reviewer interactions using SQLite.
//! An approval request survives a restart; the reply is written here by the
//! API and picked up by the waiting workflow.

use super::db::HomeScoutDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Kind of interaction required from the reviewer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Pick the listings to analyze, or ask for another search
    Approval,
    /// A blocking notice (e.g. "Search retries exhausted")
    Alert,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Alert => "alert",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "alert" => Self::Alert,
            _ => Self::Approval,
        }
    }
}

/// Status of an interaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Pending,
    Responded,
    Ignored,
}

impl InteractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Responded => "responded",
            Self::Ignored => "ignored",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "responded" => Self::Responded,
            "ignored" => Self::Ignored,
            _ => Self::Pending,
        }
    }
}

/// A reviewer interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub run_id: String,
    pub kind: InteractionKind,
    pub status: InteractionStatus,
    pub from_stage: String,
    pub title: String,
    pub description: String,
    /// Allowed outcomes, e.g. `["approve", "retry"]`
    pub options: Vec<String>,
    /// Property ids the reviewer may approve
    #[serde(default)]
    pub candidates: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<InteractionResponse>,
}

/// Reply to an interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponse {
    /// One of the interaction's `options`
    pub selected_option: String,
    #[serde(default)]
    pub approved_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub responded_by: String,
}

/// SQLite-backed interaction manager
pub struct InteractionManager {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, run_id, kind, status, from_stage, title, description,
           options_json, candidates_json, created_at, resolved_at, response_json
    FROM interactions
"#;

impl InteractionManager {
    /// Create from shared HomeScoutDb connection
    pub fn new(db: &HomeScoutDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Save an interaction
    pub fn save(&self, interaction: &Interaction) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let options_json = serde_json::to_string(&interaction.options)?;
        let candidates_json = serde_json::to_string(&interaction.candidates)?;
        let response_json = interaction
            .response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO interactions
            (id, run_id, kind, status, from_stage, title, description,
             options_json, candidates_json, created_at, resolved_at, response_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                interaction.id,
                interaction.run_id,
                interaction.kind.as_str(),
                interaction.status.as_str(),
                interaction.from_stage,
                interaction.title,
                interaction.description,
                options_json,
                candidates_json,
                interaction.created_at.to_rfc3339(),
                interaction.resolved_at.map(|t| t.to_rfc3339()),
                response_json,
            ],
        )
        .context("Failed to save interaction")?;

        Ok(())
    }

    /// Load an interaction by ID
    pub fn load(&self, id: &str) -> Result<Interaction> {
        self.find(id)?
            .ok_or_else(|| anyhow::anyhow!("Interaction not found: {}", id))
    }

    /// Look up an interaction, `None` when no row has this ID
    pub fn find(&self, id: &str) -> Result<Option<Interaction>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;

        match stmt.query_row(params![id], Self::row_to_interaction) {
            Ok(interaction) => Ok(Some(interaction)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read interaction {}", id)),
        }
    }

    /// Resolve an interaction with a response
    pub fn resolve(&self, id: &str, response: InteractionResponse) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let response_json = serde_json::to_string(&response)?;
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            r#"
            UPDATE interactions
            SET status = 'responded', resolved_at = ?1, response_json = ?2
            WHERE id = ?3 AND status = 'pending'
            "#,
            params![now, response_json, id],
        )?;

        if affected == 0 {
            anyhow::bail!("No pending interaction: {}", id);
        }

        Ok(())
    }

    /// The open interaction of a run, if it is waiting on the reviewer
    pub fn pending_for_run(&self, run_id: &str) -> Result<Option<Interaction>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!(
            "{} WHERE run_id = ?1 AND status = 'pending' ORDER BY created_at DESC LIMIT 1",
            SELECT_COLUMNS
        ))?;

        let mut rows = stmt.query_map(params![run_id], Self::row_to_interaction)?;
        rows.next()
            .transpose()
            .context("Failed to read pending interaction")
    }

    /// List all pending interactions
    pub fn list_pending(&self) -> Result<Vec<Interaction>> {
        self.list_by_status("pending", 100)
    }

    /// List resolved interactions (history)
    pub fn list_history(&self, limit: usize) -> Result<Vec<Interaction>> {
        self.list_by_status("responded", limit)
    }

    fn list_by_status(&self, status: &str, limit: usize) -> Result<Vec<Interaction>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!(
            "{} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
            SELECT_COLUMNS
        ))?;

        let interactions = stmt
            .query_map(params![status, limit as i64], Self::row_to_interaction)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list interactions")?;

        Ok(interactions)
    }

    fn row_to_interaction(row: &rusqlite::Row) -> rusqlite::Result<Interaction> {
        let options_json: String = row.get(7)?;
        let candidates_json: String = row.get(8)?;
        let created_at_str: String = row.get(9)?;
        let resolved_at_str: Option<String> = row.get(10)?;
        let response_json: Option<String> = row.get(11)?;

        Ok(Interaction {
            id: row.get(0)?,
            run_id: row.get(1)?,
            kind: InteractionKind::from_str(&row.get::<_, String>(2)?),
            status: InteractionStatus::from_str(&row.get::<_, String>(3)?),
            from_stage: row.get(4)?,
            title: row.get(5)?,
            description: row.get(6)?,
            options: serde_json::from_str(&options_json).unwrap_or_default(),
            candidates: serde_json::from_str(&candidates_json).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            resolved_at: resolved_at_str.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .ok()
            }),
            response: response_json.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_interaction() -> Interaction {
        Interaction {
            id: "test-001".to_string(),
            run_id: "run-001".to_string(),
            kind: InteractionKind::Approval,
            status: InteractionStatus::Pending,
            from_stage: "human_approval".to_string(),
            title: "Approve listings".to_string(),
            description: "Which properties should be analyzed?".to_string(),
            options: vec!["approve".to_string(), "retry".to_string()],
            candidates: vec!["p1".to_string(), "p2".to_string()],
            created_at: Utc::now(),
            resolved_at: None,
            response: None,
        }
    }

    #[test]
    fn test_interaction_save_and_load() {
        let path = ".homescout/test_interactions.db";
        let _ = fs::remove_file(path);

        let db = HomeScoutDb::open_at(path).unwrap();
        let manager = InteractionManager::new(&db);
        let interaction = test_interaction();

        manager.save(&interaction).unwrap();

        assert!(manager.find("missing").unwrap().is_none());
        assert!(manager.load("missing").is_err());

        let loaded = manager.load(&interaction.id).unwrap();
        assert_eq!(loaded.id, interaction.id);
        assert_eq!(loaded.title, interaction.title);
        assert_eq!(loaded.kind, InteractionKind::Approval);
        assert_eq!(loaded.status, InteractionStatus::Pending);
        assert_eq!(loaded.candidates, vec!["p1", "p2"]);

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_interaction_resolve_once() {
        let path = ".homescout/test_interactions_resolve.db";
        let _ = fs::remove_file(path);

        let db = HomeScoutDb::open_at(path).unwrap();
        let manager = InteractionManager::new(&db);
        let interaction = test_interaction();
        manager.save(&interaction).unwrap();

        let response = InteractionResponse {
            selected_option: "approve".to_string(),
            approved_ids: vec!["p1".to_string()],
            feedback: None,
            responded_by: "reviewer".to_string(),
        };
        manager.resolve(&interaction.id, response.clone()).unwrap();

        let loaded = manager.load(&interaction.id).unwrap();
        assert_eq!(loaded.status, InteractionStatus::Responded);
        assert!(loaded.resolved_at.is_some());
        assert_eq!(loaded.response.unwrap().approved_ids, vec!["p1"]);

        // A second reply is refused
        assert!(manager.resolve(&interaction.id, response).is_err());

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_pending_for_run_and_history() {
        let path = ".homescout/test_interactions_list.db";
        let _ = fs::remove_file(path);

        let db = HomeScoutDb::open_at(path).unwrap();
        let manager = InteractionManager::new(&db);

        let mut open = test_interaction();
        open.id = "pending-001".to_string();

        let mut done = test_interaction();
        done.id = "resolved-001".to_string();
        done.run_id = "run-002".to_string();
        done.status = InteractionStatus::Responded;

        manager.save(&open).unwrap();
        manager.save(&done).unwrap();

        let pending = manager.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "pending-001");

        let history = manager.list_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "resolved-001");

        let for_run = manager.pending_for_run("run-001").unwrap();
        assert_eq!(for_run.map(|i| i.id), Some("pending-001".to_string()));
        assert!(manager.pending_for_run("run-002").unwrap().is_none());

        drop(db);
        let _ = fs::remove_file(path);
    }
}
