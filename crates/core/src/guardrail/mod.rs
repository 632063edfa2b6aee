//! # Output Guardrails
//!
//! Every crew task's output passes through a [`Guardrail`] before anything
//! downstream may read it. A guardrail either accepts the output (possibly
//! repaired, see [`research::ValidatedListingsGuardrail`]) or rejects it
//! with a message listing every violation it found.
//!
//! ## Flow
//!
//! ```text
//! RawStageOutput ──canonicalize──▶ serde_json::Value ──check──▶ Validation
//!                      │                                          │
//!                      └─ "Output must be valid JSON"             ├─ Accepted { payload }
//!                                                                 └─ Rejected { reason }
//! ```
//!
//! [`run_guarded`] re-invokes the producing task with the rejection reason
//! as feedback until it is accepted or the retry budget runs out.

pub mod design;
pub mod location;
pub mod research;

pub use design::{DesignReportGuardrail, RoomAnalysisGuardrail};
pub use location::{LocationReportGuardrail, PropertyLocationGuardrail};
pub use research::{
    ExtractedListingsGuardrail, ResearchReportGuardrail, SearchResultsGuardrail,
    ValidatedListingsGuardrail,
};

use serde::Serialize;
use serde_json::Value;
use std::future::Future;

use crate::error::{StageError, StageResult};

/// What a task handed back, before any parsing
#[derive(Debug, Clone, PartialEq)]
pub enum RawStageOutput {
    /// Free text from an agent, possibly fenced or wrapped in prose
    Text(String),
    /// Already-structured output (typed LLM output, deterministic compile)
    Structured(Value),
}

impl RawStageOutput {
    pub fn from_typed<T: Serialize>(output: &T) -> anyhow::Result<Self> {
        Ok(Self::Structured(serde_json::to_value(output)?))
    }
}

/// Guardrail verdict
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accepted { payload: Value },
    Rejected { reason: String },
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted { .. })
    }

    /// Rejection reason, if rejected
    pub fn reason(&self) -> Option<&str> {
        match self {
            Validation::Rejected { reason } => Some(reason),
            Validation::Accepted { .. } => None,
        }
    }
}

pub const INVALID_JSON: &str = "Output must be valid JSON";

/// The one parse step every guardrail shares.
///
/// Strips markdown fences, falls back to the outermost `{...}` span when
/// the JSON is wrapped in prose, and unwraps structured outputs that are
/// themselves a JSON string.
pub fn canonicalize(raw: &RawStageOutput) -> Result<Value, String> {
    match raw {
        RawStageOutput::Structured(Value::String(text)) => parse_text(text),
        RawStageOutput::Structured(value) => Ok(value.clone()),
        RawStageOutput::Text(text) => parse_text(text),
    }
}

fn parse_text(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let stripped = match trimmed.strip_prefix("```") {
        Some(rest) => rest
            .trim_start_matches("json")
            .trim_end()
            .trim_end_matches("```")
            .trim(),
        None => trimmed,
    };

    if let Ok(value) = serde_json::from_str::<Value>(stripped) {
        return Ok(value);
    }

    match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&stripped[start..=end])
            .map_err(|_| INVALID_JSON.to_string()),
        _ => Err(INVALID_JSON.to_string()),
    }
}

/// Accumulates every problem found in one output
#[derive(Debug, Default)]
pub struct Violations {
    items: Vec<String>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: impl Into<String>) {
        self.items.push(violation.into());
    }

    pub fn extend(&mut self, violations: impl IntoIterator<Item = String>) {
        self.items.extend(violations);
    }

    /// Add violations under a prefix, e.g. `"Property 2: "`
    pub fn extend_prefixed(&mut self, prefix: &str, violations: impl IntoIterator<Item = String>) {
        self.items
            .extend(violations.into_iter().map(|v| format!("{}{}", prefix, v)));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.items
    }

    /// `Accepted` when empty, else `Rejected("<header>:\n<one per line>")`
    pub fn into_validation(self, header: &str, payload: Value) -> Validation {
        if self.items.is_empty() {
            Validation::Accepted { payload }
        } else {
            Validation::Rejected {
                reason: format!("{}:\n{}", header, self.items.join("\n")),
            }
        }
    }
}

pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    /// Domain checks on an already-parsed output
    fn check(&self, value: Value) -> Validation;

    fn validate(&self, raw: &RawStageOutput) -> Validation {
        match canonicalize(raw) {
            Ok(value) => self.check(value),
            Err(reason) => Validation::Rejected { reason },
        }
    }
}

/// Run a task under a guardrail with a bounded number of retries.
///
/// `attempt` receives `None` on the first call and the previous rejection
/// reason afterwards. A task error counts as a failed attempt. Up to
/// `1 + retry_budget` attempts are made.
pub async fn run_guarded<F, Fut>(
    stage: &str,
    guardrail: &dyn Guardrail,
    retry_budget: u32,
    mut attempt: F,
) -> StageResult<Value>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = anyhow::Result<RawStageOutput>>,
{
    let max_attempts = retry_budget.saturating_add(1);
    let mut feedback: Option<String> = None;
    let mut last_error: Option<anyhow::Error> = None;

    for n in 1..=max_attempts {
        match attempt(feedback.take()).await {
            Ok(raw) => match guardrail.validate(&raw) {
                Validation::Accepted { payload } => {
                    tracing::debug!(
                        stage,
                        guardrail = guardrail.name(),
                        attempt = n,
                        "Output accepted"
                    );
                    return Ok(payload);
                }
                Validation::Rejected { reason } => {
                    tracing::warn!(
                        stage,
                        guardrail = guardrail.name(),
                        attempt = n,
                        max_attempts,
                        "Output rejected: {}",
                        reason
                    );
                    last_error = None;
                    feedback = Some(reason);
                }
            },
            Err(e) => {
                tracing::warn!(stage, attempt = n, max_attempts, "Task failed: {}", e);
                feedback = Some(format!("The previous attempt failed: {}", e));
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(source) => Err(StageError::crew(stage, source)),
        None => Err(StageError::GuardrailExhausted {
            stage: stage.to_string(),
            attempts: max_attempts,
            reason: feedback.unwrap_or_default(),
        }),
    }
}

/// Feedback block appended to a task prompt on retry
pub fn retry_instructions(feedback: Option<&str>) -> String {
    match feedback {
        Some(reason) => format!(
            "\n\nYour previous answer was rejected. Fix every problem listed below and answer again:\n{}\n",
            reason
        ),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RequiresName;

    impl Guardrail for RequiresName {
        fn name(&self) -> &str {
            "requires_name"
        }

        fn check(&self, value: Value) -> Validation {
            let mut violations = Violations::new();
            if value.get("name").is_none() {
                violations.push("Missing name");
            }
            if value.get("id").is_none() {
                violations.push("Missing id");
            }
            violations.into_validation("Validation failed", value)
        }
    }

    #[test]
    fn test_canonicalize_strips_fences() {
        let raw = RawStageOutput::Text("```json\n{\"name\": \"a\"}\n```".to_string());
        assert_eq!(canonicalize(&raw).unwrap(), json!({"name": "a"}));
    }

    #[test]
    fn test_canonicalize_keeps_backticks_inside_values() {
        let raw = RawStageOutput::Text(
            "```json\n{\"description\": \"Run ```make``` to build\", \"id\": \"p1\"}\n```"
                .to_string(),
        );
        assert_eq!(
            canonicalize(&raw).unwrap(),
            json!({"description": "Run ```make``` to build", "id": "p1"})
        );

        let unfenced = RawStageOutput::Text("{\"note\": \"use ```json blocks\"}".to_string());
        assert_eq!(
            canonicalize(&unfenced).unwrap(),
            json!({"note": "use ```json blocks"})
        );
    }

    #[test]
    fn test_canonicalize_extracts_object_from_prose() {
        let raw = RawStageOutput::Text(
            "Here are the results you asked for: {\"name\": \"a\"} Let me know!".to_string(),
        );
        assert_eq!(canonicalize(&raw).unwrap(), json!({"name": "a"}));
    }

    #[test]
    fn test_canonicalize_rejects_prose() {
        let raw = RawStageOutput::Text("I found several great apartments in Ojodu.".to_string());
        assert_eq!(canonicalize(&raw).unwrap_err(), INVALID_JSON);
    }

    #[test]
    fn test_canonicalize_structured_string() {
        let raw = RawStageOutput::Structured(json!("{\"name\": \"a\"}"));
        assert_eq!(canonicalize(&raw).unwrap(), json!({"name": "a"}));
    }

    #[test]
    fn test_all_violations_reported() {
        let verdict = RequiresName.validate(&RawStageOutput::Structured(json!({})));
        assert_eq!(
            verdict.reason(),
            Some("Validation failed:\nMissing name\nMissing id")
        );
    }

    #[tokio::test]
    async fn test_run_guarded_retries_with_feedback() {
        let calls = AtomicU32::new(0);
        let seen_feedback = std::sync::Mutex::new(Vec::new());

        let result = run_guarded("test", &RequiresName, 2, |feedback| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            seen_feedback.lock().unwrap().push(feedback.clone());
            async move {
                if n == 0 {
                    Ok(RawStageOutput::Text("not json".to_string()))
                } else {
                    Ok(RawStageOutput::Structured(json!({"name": "a", "id": "p1"})))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result["id"], "p1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let seen = seen_feedback.lock().unwrap();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1].as_deref(), Some(INVALID_JSON));
    }

    #[tokio::test]
    async fn test_run_guarded_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let err = run_guarded("search", &RequiresName, 2, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(RawStageOutput::Text("still prose".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            StageError::GuardrailExhausted {
                stage,
                attempts,
                reason,
            } => {
                assert_eq!(stage, "search");
                assert_eq!(attempts, 3);
                assert_eq!(reason, INVALID_JSON);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_guarded_task_error_surfaces_as_crew_error() {
        let err = run_guarded("design", &RequiresName, 0, |_| async {
            Err::<RawStageOutput, _>(anyhow::anyhow!("provider unavailable"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::Crew { .. }));
        assert!(err.to_string().contains("provider unavailable"));
    }

    #[tokio::test]
    async fn test_run_guarded_max_budget_does_not_overflow() {
        let result = run_guarded("search", &RequiresName, u32::MAX, |_| async {
            Ok(RawStageOutput::Structured(json!({"name": "a", "id": "p1"})))
        })
        .await
        .unwrap();
        assert_eq!(result["id"], "p1");
    }
}
