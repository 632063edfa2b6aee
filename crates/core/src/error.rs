//! # Workflow Errors
//!
//! Typed failures raised by the stage pipeline. Collaborator seams
//! (crews, providers, persistence) stay on `anyhow::Result`; the workflow
//! converts those into a [`StageError`] at the point where the stage
//! decides whether the failure is fatal.

use thiserror::Error;

/// A failure that ends a stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage output was rejected on every allowed attempt.
    #[error("{stage} failed guardrail after {attempts} attempt(s): {reason}")]
    GuardrailExhausted {
        stage: String,
        attempts: u32,
        reason: String,
    },

    /// The crew itself failed (transport, provider, runtime).
    #[error("{stage} crew failed: {source}")]
    Crew {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// Search criteria rejected at `Init`.
    #[error("Invalid search criteria: {0}")]
    InvalidCriteria(String),

    /// A stage tried to write an output key it already wrote this attempt.
    #[error("Stage output '{0}' was already written")]
    DuplicateWrite(String),

    /// The human reviewer (or the inbox channel) stopped the run.
    #[error("Run aborted: {0}")]
    Aborted(String),

    /// Retry loop through human review exceeded its bound.
    #[error("Search retries exhausted after {0} attempt(s)")]
    RetriesExhausted(u32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    pub fn crew(stage: &str, source: anyhow::Error) -> Self {
        Self::Crew {
            stage: stage.to_string(),
            source,
        }
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;
