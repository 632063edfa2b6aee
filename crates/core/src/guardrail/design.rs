use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::{Guardrail, Validation, Violations};
use crate::crews::record_id;
use crate::schema::design::{DESIGN_REPORT_SCHEMA, ROOM_ANALYSIS_SCHEMA};

/// Output of `analyze_room_images`: every room must point at one of the
/// photos its property was listed with
pub struct RoomAnalysisGuardrail {
    /// Property id to the image URLs offered for it
    photos: BTreeMap<String, BTreeSet<String>>,
}

impl RoomAnalysisGuardrail {
    pub fn new(photos: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { photos }
    }

    /// Candidates are property records carrying `id` (or `property_id`) and `images`
    pub fn from_properties(properties: &[Value]) -> Self {
        let photos = properties
            .iter()
            .filter_map(|p| {
                let images = p
                    .get("images")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Some((record_id(p)?.to_string(), images))
            })
            .collect();
        Self::new(photos)
    }
}

impl Guardrail for RoomAnalysisGuardrail {
    fn name(&self) -> &str {
        "room_analysis"
    }

    fn check(&self, value: Value) -> Validation {
        let mut violations = Violations::new();
        violations.extend(ROOM_ANALYSIS_SCHEMA.check_shape(&value));

        let properties = value
            .get("properties")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for (i, property) in properties.iter().enumerate() {
            let id = property.get("property_id").and_then(Value::as_str);
            let label = id.map(str::to_string).unwrap_or_else(|| (i + 1).to_string());
            let listed = id.and_then(|id| self.photos.get(id));
            if let (Some(id), None) = (id, listed) {
                violations.push(format!("Property {}: unknown property_id", id));
            }

            let rooms = property
                .get("rooms")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for (j, room) in rooms.iter().enumerate() {
                let Some(url) = room.get("image_url").and_then(Value::as_str) else {
                    continue;
                };
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    violations.push(format!(
                        "Property {} room {}: image_url is not an http(s) URL",
                        label,
                        j + 1
                    ));
                } else if listed.is_some_and(|images| !images.contains(url)) {
                    violations.push(format!(
                        "Property {} room {}: image_url not among listing images",
                        label,
                        j + 1
                    ));
                }
            }
        }

        violations.into_validation("Validation failed", value)
    }
}

/// The compiled before/after design report
pub struct DesignReportGuardrail;

impl Guardrail for DesignReportGuardrail {
    fn name(&self) -> &str {
        "design_report"
    }

    fn check(&self, value: Value) -> Validation {
        let mut violations = Violations::new();
        violations.extend(DESIGN_REPORT_SCHEMA.check_shape(&value));

        let declared = value
            .get("metadata")
            .and_then(|m| m.get("total_rooms_redesigned"))
            .and_then(Value::as_u64);
        let counted: usize = value
            .get("properties")
            .and_then(Value::as_array)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|p| p.get("rooms").and_then(Value::as_array))
                    .map(Vec::len)
                    .sum()
            })
            .unwrap_or(0);

        if let Some(declared) = declared {
            if declared as usize != counted {
                violations.push(format!(
                    "metadata.total_rooms_redesigned is {} but {} room(s) are listed",
                    declared, counted
                ));
            }
        }

        violations.into_validation("Report validation failed", value)
    }
}
