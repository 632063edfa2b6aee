//! Guardrails for the location crew: each per-property analysis, then the
//! compiled report.

use serde_json::Value;
use std::collections::BTreeSet;

use super::{Guardrail, Validation, Violations};
use crate::geo::AmenityCategory;
use crate::schema::location::{LOCATION_REPORT_SCHEMA, PROPERTY_LOCATION_SCHEMA};

/// Problems with one property analysis, without a header
fn check_property(value: &Value) -> Vec<String> {
    let mut problems = PROPERTY_LOCATION_SCHEMA.check_shape(value);
    if !value.is_object() {
        return problems;
    }

    // An address that could not be geocoded carries no scores.
    let geocoded = value.get("geocoded").and_then(Value::as_bool).unwrap_or(true);
    if !geocoded {
        return problems;
    }

    match value.get("coordinates") {
        Some(coords) if coords.is_object() => {
            let lat = coords.get("lat").and_then(Value::as_f64);
            let lng = coords.get("lng").and_then(Value::as_f64);
            if let (Some(lat), Some(lng)) = (lat, lng) {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                    problems.push(format!("Coordinates out of range: ({}, {})", lat, lng));
                }
            }
        }
        _ => problems.push("Missing coordinates (lat/lng)".to_string()),
    }

    let amenities = value
        .get("amenities")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut seen = BTreeSet::new();
    for amenity in amenities {
        let Some(category) = amenity.get("category").and_then(Value::as_str) else {
            continue;
        };
        if AmenityCategory::parse(category).is_none() {
            problems.push(format!("Unknown amenity category: {}", category));
            continue;
        }
        if !seen.insert(category) {
            problems.push(format!("Duplicate amenity category: {}", category));
        }
        if let Some(score) = amenity.get("score").and_then(Value::as_f64) {
            if !(0.0..=10.0).contains(&score) {
                problems.push(format!(
                    "Score for {} must be between 0 and 10, got {}",
                    category, score
                ));
            }
        }
    }
    for category in AmenityCategory::ALL {
        if !seen.contains(category.as_str()) {
            problems.push(format!("Missing amenity category: {}", category.as_str()));
        }
    }

    match value.get("overall_score").and_then(Value::as_f64) {
        Some(score) if !(0.0..=10.0).contains(&score) => problems.push(format!(
            "overall_score must be between 0 and 10, got {}",
            score
        )),
        Some(_) => {}
        None => problems.push("Missing overall_score".to_string()),
    }

    problems
}

/// Output of one `analyze_property` task
pub struct PropertyLocationGuardrail;

impl Guardrail for PropertyLocationGuardrail {
    fn name(&self) -> &str {
        "property_location"
    }

    fn check(&self, value: Value) -> Validation {
        let mut violations = Violations::new();
        violations.extend(check_property(&value));
        violations.into_validation("Validation failed", value)
    }
}

/// The compiled location intelligence report
pub struct LocationReportGuardrail;

impl Guardrail for LocationReportGuardrail {
    fn name(&self) -> &str {
        "location_report"
    }

    fn check(&self, value: Value) -> Validation {
        let mut violations = Violations::new();
        violations.extend(LOCATION_REPORT_SCHEMA.check_shape(&value));

        if let Some(properties) = value.get("properties").and_then(Value::as_array) {
            if properties.is_empty() {
                violations.push("Properties array is empty");
            }
            for (i, property) in properties.iter().enumerate() {
                let prefix = format!("Property {}: ", i + 1);
                violations.extend_prefixed(&prefix, check_property(property));
            }
            let has_comparison = value.get("comparison").map(Value::is_object).unwrap_or(false);
            if properties.len() > 1 && !has_comparison {
                violations.push("Missing comparison section for multiple properties");
            }
        }

        violations.into_validation("Report validation failed", value)
    }
}
