//! Design-crew output shapes: room analysis and the before/after report.

use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{FieldSpec, FieldType, StageSchema};

/// One photographed room
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct AnalyzedRoom {
    /// living_room, bedroom, kitchen, bathroom, dining_room, ...
    pub room_type: String,
    /// The listing photo this room was identified in
    pub image_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub current_style: Option<String>,
    /// Concrete changes for the redesign prompt
    #[serde(default)]
    pub suggested_changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct PropertyRooms {
    pub property_id: String,
    #[serde(default)]
    pub rooms: Vec<AnalyzedRoom>,
}

/// Output of the `analyze_room_images` task
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct RoomAnalysisOutput {
    #[serde(default)]
    pub properties: Vec<PropertyRooms>,
}

/// A room with its generated redesign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedesignedRoom {
    pub room_type: String,
    pub before_image: String,
    /// Path of the generated image under the output directory
    pub after_image: String,
    pub design_notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRoom {
    pub room_type: String,
    pub before_image: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDesign {
    pub property_id: String,
    pub rooms: Vec<RedesignedRoom>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_rooms: Vec<FailedRoom>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignMetadata {
    pub design_style: String,
    pub total_properties: usize,
    pub total_rooms_redesigned: usize,
    pub generated_at: String,
}

/// The design crew's final output; the workflow stores it under `design`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignReport {
    pub metadata: DesignMetadata,
    pub properties: Vec<PropertyDesign>,
}

const ANALYZED_ROOM_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("room_type", FieldType::String, "Kind of room"),
    FieldSpec::required("image_url", FieldType::String, "Source photo URL"),
    FieldSpec::optional("description", FieldType::String, "What the photo shows"),
    FieldSpec::optional("current_style", FieldType::String, "Current decor style"),
    FieldSpec::optional(
        "suggested_changes",
        FieldType::Array(&FieldType::String),
        "Changes to make in the redesign",
    ),
];

const PROPERTY_ROOMS_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("property_id", FieldType::String, "Id from the research report"),
    FieldSpec::required(
        "rooms",
        FieldType::Array(&FieldType::Record(ANALYZED_ROOM_FIELDS)),
        "Rooms identified in the listing photos",
    ),
];

const REDESIGNED_ROOM_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("room_type", FieldType::String, "Kind of room"),
    FieldSpec::required("before_image", FieldType::String, "Original photo"),
    FieldSpec::required("after_image", FieldType::String, "Generated redesign"),
    FieldSpec::optional(
        "design_notes",
        FieldType::Array(&FieldType::String),
        "What changed",
    ),
];

const PROPERTY_DESIGN_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("property_id", FieldType::String, "Id from the research report"),
    FieldSpec::required(
        "rooms",
        FieldType::Array(&FieldType::Record(REDESIGNED_ROOM_FIELDS)),
        "Redesigned rooms",
    ),
];

const DESIGN_METADATA_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("design_style", FieldType::String, "Requested style"),
    FieldSpec::required(
        "total_rooms_redesigned",
        FieldType::Integer,
        "Rooms with a generated image",
    ),
    FieldSpec::optional("total_properties", FieldType::Integer, "Properties covered"),
    FieldSpec::optional("generated_at", FieldType::String, "RFC 3339 timestamp"),
];

pub const ROOM_ANALYSIS_SCHEMA: StageSchema = StageSchema {
    stage: "analyze_room_images",
    fields: &[FieldSpec::required(
        "properties",
        FieldType::Array(&FieldType::Record(PROPERTY_ROOMS_FIELDS)),
        "One entry per property",
    )],
};

pub const DESIGN_REPORT_SCHEMA: StageSchema = StageSchema {
    stage: "design_report",
    fields: &[
        FieldSpec::required(
            "metadata",
            FieldType::Record(DESIGN_METADATA_FIELDS),
            "Report metadata",
        ),
        FieldSpec::required(
            "properties",
            FieldType::Array(&FieldType::Record(PROPERTY_DESIGN_FIELDS)),
            "Per-property redesigns",
        ),
    ],
};
