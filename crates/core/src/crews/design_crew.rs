//! # Design Crew
//!
//! 1. `analyze_room_images` - the room analyst picks redesignable rooms from
//!    each property's photos ([`RoomAnalysisGuardrail`])
//! 2. `generate_redesigns` - one image per room through an [`ImageGenerator`],
//!    saved under `<output_dir>/designs/`
//! 3. `compile_design_report` - deterministic ([`DesignReportGuardrail`]),
//!    written to `<output_dir>/design_results.json`
//!
//! A room whose image fails to generate is listed under `failed_rooms`; it
//! does not fail the crew.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use super::images::{GeminiImageGenerator, ImageGenerator};
use super::{
    keys, prompts, property_records, record_id, required_input, Crew, TaskInputs, TaskResult,
};
use crate::config::WorkflowConfig;
use crate::error::StageError;
use crate::guardrail::{
    retry_instructions, run_guarded, DesignReportGuardrail, Guardrail, RawStageOutput,
    RoomAnalysisGuardrail, Validation,
};
use crate::models::AgentRole;
use crate::run_llm_function;
use crate::schema::design::{
    DesignMetadata, DesignReport, FailedRoom, PropertyDesign, RedesignedRoom, RoomAnalysisOutput,
    ROOM_ANALYSIS_SCHEMA,
};
use crate::state::io;

pub const REPORT_FILE: &str = "design_results.json";
const DESIGNS_DIR: &str = "designs";
/// Photos offered to the analyst per property
const MAX_IMAGES_PER_PROPERTY: usize = 8;
const MAX_ROOMS_PER_PROPERTY: usize = 3;

pub struct DesignCrew {
    config: WorkflowConfig,
    images: Arc<dyn ImageGenerator>,
}

impl DesignCrew {
    pub fn new(config: WorkflowConfig, images: Arc<dyn ImageGenerator>) -> Self {
        Self { config, images }
    }

    /// Design crew backed by the Gemini image model
    pub fn from_env(config: WorkflowConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config, Arc::new(GeminiImageGenerator::from_env()?)))
    }

    async fn analyze_rooms(
        &self,
        properties: &[Value],
        style: &str,
    ) -> anyhow::Result<RoomAnalysisOutput> {
        let model = self.config.model_for(AgentRole::DesignCoordinator);
        let listing_photos: Vec<Value> = properties
            .iter()
            .filter_map(|p| {
                let id = record_id(p)?;
                let images: Vec<Value> = p
                    .get("images")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().take(MAX_IMAGES_PER_PROPERTY).cloned().collect())
                    .unwrap_or_default();
                Some(json!({
                    "property_id": id,
                    "description": p.get("description").cloned().unwrap_or(Value::Null),
                    "images": images,
                }))
            })
            .collect();
        let guard = RoomAnalysisGuardrail::from_properties(&listing_photos);

        let base_prompt = format!(
            "Design style: {}\n\nListings and their photos:\n{}\n\n\
             Pick at most {} rooms per property.\n\n{}",
            style,
            serde_json::to_string_pretty(&listing_photos)?,
            MAX_ROOMS_PER_PROPERTY,
            ROOM_ANALYSIS_SCHEMA.instructions()
        );

        let payload = run_guarded(
            "analyze_room_images",
            &guard,
            self.config.retry_budgets.room_analysis,
            |feedback| {
                let prompt = format!("{}{}", base_prompt, retry_instructions(feedback.as_deref()));
                let model = model.clone();
                async move {
                    let output = run_llm_function!(
                        &model,
                        RoomAnalysisOutput,
                        prompts::ROOM_ANALYST,
                        prompt
                    )?;
                    RawStageOutput::from_typed(&output)
                }
            },
        )
        .await?;

        Ok(serde_json::from_value(payload)?)
    }

    async fn generate_redesigns(
        &self,
        analysis: &RoomAnalysisOutput,
        style: &str,
    ) -> Vec<PropertyDesign> {
        let mut designs = Vec::with_capacity(analysis.properties.len());

        for property in &analysis.properties {
            let mut design = PropertyDesign {
                property_id: property.property_id.clone(),
                rooms: Vec::new(),
                failed_rooms: Vec::new(),
            };

            for (n, room) in property.rooms.iter().take(MAX_ROOMS_PER_PROPERTY).enumerate() {
                let prompt =
                    prompts::redesign_prompt(&room.room_type, style, &room.suggested_changes);
                let file_name = format!(
                    "{}/{}_{}_{}.png",
                    DESIGNS_DIR,
                    sanitize(&property.property_id),
                    sanitize(&room.room_type),
                    n + 1
                );

                let result = async {
                    let bytes = self.images.redesign(&room.image_url, &prompt).await?;
                    io::write_output_file(&self.config.output_dir, &file_name, &bytes).await
                }
                .await;

                match result {
                    Ok(path) => {
                        tracing::info!(
                            crew = "design",
                            property_id = %property.property_id,
                            room = %room.room_type,
                            "Redesign saved to {:?}",
                            path
                        );
                        design.rooms.push(RedesignedRoom {
                            room_type: room.room_type.clone(),
                            before_image: room.image_url.clone(),
                            after_image: path.display().to_string(),
                            design_notes: room.suggested_changes.clone(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            crew = "design",
                            property_id = %property.property_id,
                            room = %room.room_type,
                            "Redesign failed: {}",
                            e
                        );
                        design.failed_rooms.push(FailedRoom {
                            room_type: room.room_type.clone(),
                            before_image: room.image_url.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            designs.push(design);
        }

        designs
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Assemble the report; `total_rooms_redesigned` counts generated rooms only
pub fn compile_design_report(design_style: &str, properties: Vec<PropertyDesign>) -> DesignReport {
    let total_rooms_redesigned = properties.iter().map(|p| p.rooms.len()).sum();
    DesignReport {
        metadata: DesignMetadata {
            design_style: design_style.to_string(),
            total_properties: properties.len(),
            total_rooms_redesigned,
            generated_at: Utc::now().to_rfc3339(),
        },
        properties,
    }
}

#[async_trait]
impl Crew for DesignCrew {
    fn name(&self) -> &str {
        "design"
    }

    async fn kickoff(&self, inputs: &TaskInputs) -> anyhow::Result<TaskResult> {
        let style = required_input(inputs, keys::DESIGN_STYLE)?;
        let report: Value = serde_json::from_str(required_input(inputs, keys::PROPERTIES)?)?;
        let properties = property_records(&report);

        tracing::info!(
            crew = "design",
            properties = properties.len(),
            style,
            "Analyzing room photos"
        );
        let analysis = self.analyze_rooms(&properties, style).await?;

        let designs = self.generate_redesigns(&analysis, style).await;
        let report = serde_json::to_value(compile_design_report(style, designs))?;

        let verdict = DesignReportGuardrail.validate(&RawStageOutput::Structured(report.clone()));
        if let Validation::Rejected { reason } = verdict {
            return Err(StageError::GuardrailExhausted {
                stage: "compile_design_report".to_string(),
                attempts: 1,
                reason,
            }
            .into());
        }

        let path = io::write_json_file(&self.config.output_dir, REPORT_FILE, &report).await?;
        tracing::info!(
            crew = "design",
            rooms = report["metadata"]["total_rooms_redesigned"].as_u64().unwrap_or(0),
            "Design report written to {:?}",
            path
        );

        Ok(TaskResult::new(serde_json::to_string_pretty(&report)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::design::{AnalyzedRoom, PropertyRooms};
    use std::sync::Mutex;

    /// Fails for any photo whose URL contains "broken"
    struct FakeImages {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageGenerator for FakeImages {
        async fn redesign(
            &self,
            source_image_url: &str,
            prompt: &str,
        ) -> anyhow::Result<Vec<u8>> {
            self.calls.lock().unwrap().push(prompt.to_string());
            if source_image_url.contains("broken") {
                anyhow::bail!("image model refused the request");
            }
            Ok(b"\x89PNG".to_vec())
        }
    }

    fn room(room_type: &str, url: &str) -> AnalyzedRoom {
        AnalyzedRoom {
            room_type: room_type.to_string(),
            image_url: url.to_string(),
            description: None,
            current_style: None,
            suggested_changes: vec!["Warm white lighting".to_string()],
        }
    }

    #[tokio::test]
    async fn test_generate_redesigns_records_failures() {
        let mut config = WorkflowConfig::default();
        config.output_dir = ".homescout/test_design_output".into();
        let images = Arc::new(FakeImages {
            calls: Mutex::new(Vec::new()),
        });
        let crew = DesignCrew::new(config, images.clone());

        let analysis = RoomAnalysisOutput {
            properties: vec![PropertyRooms {
                property_id: "p1".to_string(),
                rooms: vec![
                    room("living_room", "https://images.example.ng/1.jpg"),
                    room("kitchen", "https://images.example.ng/broken.jpg"),
                ],
            }],
        };

        let designs = crew.generate_redesigns(&analysis, "modern minimalist").await;
        assert_eq!(designs.len(), 1);
        assert_eq!(designs[0].rooms.len(), 1);
        assert_eq!(designs[0].failed_rooms.len(), 1);
        assert!(designs[0].rooms[0].after_image.ends_with("p1_living_room_1.png"));
        assert!(images.calls.lock().unwrap()[0].contains("modern minimalist"));

        let report = compile_design_report("modern minimalist", designs);
        assert_eq!(report.metadata.total_rooms_redesigned, 1);
        let value = serde_json::to_value(&report).unwrap();
        assert!(DesignReportGuardrail
            .validate(&RawStageOutput::Structured(value))
            .is_accepted());

        let _ = std::fs::remove_dir_all(".homescout/test_design_output");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("p1"), "p1");
        assert_eq!(sanitize("living room/2"), "living_room_2");
    }
}
