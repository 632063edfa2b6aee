//! Command-line entry points: the demo run, triggered runs from a JSON
//! payload, resuming a checkpointed run and a terminal reviewer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use homescout_core::config::WorkflowConfig;
use homescout_core::state::HomeScoutDb;
use homescout_core::workflow::{
    AutoApprove, FeedbackBroker, FeedbackRequest, FeedbackResult, FileReportSink, RunOutcome,
    SearchCriteria, Workflow, WorkflowEvent,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::api::runs::RunPayload;

/// Criteria of the `demo` command
pub fn demo_payload() -> RunPayload {
    RunPayload {
        search_criteria: SearchCriteria {
            bedrooms: Some(2),
            max_price: Some(3_000_000.0),
            rent_frequency: "yearly".to_string(),
            ..SearchCriteria::new("Ojodu, Lagos, Nigeria")
        },
        design_style: "modern minimalist".to_string(),
    }
}

/// Parse `--payload`: inline JSON, or `@path` to read it from a file
pub async fn load_payload(arg: &str) -> Result<RunPayload> {
    let content = match arg.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read payload file {}", path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&content).context("Payload must be {search_criteria, design_style}")
}

/// Reviewer that asks on the terminal.
///
/// `approve` (or an empty line) keeps every candidate, `approve p1 p3` keeps
/// those, `retry <feedback>` searches again.
pub struct StdinBroker;

pub fn parse_reply(line: &str, candidates: &[String]) -> Result<FeedbackResult> {
    let line = line.trim();
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    match command.to_lowercase().as_str() {
        "" | "approve" | "a" | "y" | "yes" => {
            let ids: BTreeSet<String> = rest
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                return Ok(FeedbackResult::Approved(candidates.iter().cloned().collect()));
            }
            if let Some(unknown) = ids.iter().find(|id| !candidates.contains(*id)) {
                anyhow::bail!("{} is not one of {:?}", unknown, candidates);
            }
            Ok(FeedbackResult::Approved(ids))
        }
        "retry" | "r" => Ok(FeedbackResult::Retry {
            feedback: rest.trim().to_string(),
        }),
        other => anyhow::bail!(
            "Unknown reply '{}': use approve [ids] or retry <feedback>",
            other
        ),
    }
}

#[async_trait]
impl FeedbackBroker for StdinBroker {
    async fn request_feedback(&self, request: FeedbackRequest) -> Result<FeedbackResult> {
        println!("\n🔎 {}", request.prompt);
        println!("   Candidates: {}", request.candidate_ids.join(", "));
        println!("   Reply: approve [ids...] | retry <feedback>");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = lines
                .next_line()
                .await?
                .ok_or_else(|| anyhow::anyhow!("stdin closed before a reply"))?;
            match parse_reply(&line, &request.candidate_ids) {
                Ok(result) => return Ok(result),
                Err(e) => println!("   {}", e),
            }
        }
    }
}

fn print_event(event: &WorkflowEvent) {
    let kind = serde_json::to_value(&event.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    println!("   [{}] {} {:?}", event.stage.as_str(), kind, event.data);
}

fn print_outcome(outcome: &RunOutcome, config: &WorkflowConfig) {
    let summary = &outcome.state.counters;
    println!("\n✅ Run {} completed", outcome.state.run_id);
    println!("   Properties found:    {}", summary.properties_found);
    println!("   Properties approved: {}", summary.properties_approved);
    println!("   Properties analyzed: {}", summary.properties_analyzed);
    println!("   Rooms redesigned:    {}", summary.rooms_redesigned);
    for failure in &outcome.state.errors {
        println!("   ⚠️ {}: {}", failure.stage, failure.message);
    }
    println!("   Report: {}", FileReportSink::new(&config.output_dir).path().display());
}

/// Run in the foreground, printing progress to stdout
pub async fn run_local(
    config: WorkflowConfig,
    payload: Option<RunPayload>,
    resume: Option<String>,
) -> Result<()> {
    let db = Arc::new(HomeScoutDb::open()?);
    let broker: Arc<dyn FeedbackBroker> = if config.human_in_loop {
        Arc::new(StdinBroker)
    } else {
        Arc::new(AutoApprove)
    };

    let (event_tx, mut event_rx) = mpsc::channel::<WorkflowEvent>(100);
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let mut workflow = Workflow::from_config(config.clone())?
        .with_broker(broker)
        .with_checkpoints(db)
        .with_event_channel(event_tx);

    let result = match (payload, resume) {
        (_, Some(run_id)) => workflow.resume(&run_id).await,
        (Some(payload), None) => {
            println!("🚀 Searching: {}", payload.search_criteria.to_query());
            workflow
                .run(payload.search_criteria, &payload.design_style)
                .await
        }
        (None, None) => anyhow::bail!("Nothing to run"),
    };
    drop(workflow);
    let _ = printer.await;

    match result {
        Ok(outcome) => {
            print_outcome(&outcome, &config);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Run failed: {}", e);
            Err(e.into())
        }
    }
}
