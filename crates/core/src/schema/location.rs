//! Location-crew output shapes: per-property amenity analysis and the
//! compiled location intelligence report.

use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{FieldSpec, FieldType, StageSchema};
use crate::geo::Coordinates;

/// A matched place near a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct PointOfInterest {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Great-circle distance from the property, rounded to centimetres
    pub distance_meters: f64,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub maps_url: Option<String>,
}

/// One amenity category for one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct AmenityScore {
    /// One of: markets, gyms, bus_stations, railway_terminals, stadiums, malls, airports, seaports
    pub category: String,
    /// 0.0 (nothing nearby) to 10.0
    pub score: f64,
    /// Search radius used for this category
    #[serde(default)]
    pub radius_meters: f64,
    #[serde(default)]
    pub nearest_distance_meters: Option<f64>,
    #[serde(default)]
    pub pois: Vec<PointOfInterest>,
}

/// Amenity analysis for one property
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct PropertyLocation {
    pub property_id: String,
    #[serde(default)]
    pub address: String,
    /// False when the address could not be geocoded; such properties carry no scores
    #[serde(default = "default_true")]
    pub geocoded: bool,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub formatted_address: Option<String>,
    /// Exactly one entry per category when geocoded
    #[serde(default)]
    pub amenities: Vec<AmenityScore>,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub advantages: Vec<String>,
    #[serde(default)]
    pub disadvantages: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedProperty {
    pub rank: usize,
    pub property_id: String,
    pub overall_score: f64,
}

/// The property scoring highest in one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryLeader {
    pub category: String,
    pub property_id: String,
    pub score: f64,
}

/// Cross-property comparison, present when more than one property was analyzed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationComparison {
    pub ranking: Vec<RankedProperty>,
    pub best_overall: Option<String>,
    pub best_by_category: Vec<CategoryLeader>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationMetadata {
    pub total_properties: usize,
    pub geocoded_properties: usize,
    pub search_radius_km: f64,
    pub airport_radius_km: f64,
    pub generated_at: String,
}

/// The location crew's final output; the workflow stores it under `location`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationReport {
    pub metadata: LocationMetadata,
    pub properties: Vec<PropertyLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<LocationComparison>,
}

const COORDINATE_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("lat", FieldType::Number, "Latitude"),
    FieldSpec::required("lng", FieldType::Number, "Longitude"),
];

const POI_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("name", FieldType::String, "Place name"),
    FieldSpec::required("distance_meters", FieldType::Number, "Distance from the property"),
    FieldSpec::optional("rating", FieldType::Number, "Provider rating"),
];

const AMENITY_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("category", FieldType::String, "Amenity category"),
    FieldSpec::required("score", FieldType::Number, "0-10 category score"),
    FieldSpec::optional(
        "pois",
        FieldType::Array(&FieldType::Record(POI_FIELDS)),
        "Nearest matching places",
    ),
];

const PROPERTY_LOCATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("property_id", FieldType::String, "Id from the research report"),
    FieldSpec::optional("address", FieldType::String, "Address that was geocoded"),
    FieldSpec::optional("geocoded", FieldType::Bool, "False when geocoding failed"),
    FieldSpec::optional(
        "coordinates",
        FieldType::Record(COORDINATE_FIELDS),
        "Geocoded position",
    ),
    FieldSpec::optional(
        "amenities",
        FieldType::Array(&FieldType::Record(AMENITY_FIELDS)),
        "One entry per amenity category",
    ),
    FieldSpec::optional("overall_score", FieldType::Number, "0-10 overall score"),
    FieldSpec::required(
        "advantages",
        FieldType::Array(&FieldType::String),
        "Location strengths",
    ),
    FieldSpec::required(
        "disadvantages",
        FieldType::Array(&FieldType::String),
        "Location weaknesses",
    ),
];

pub const PROPERTY_LOCATION_SCHEMA: StageSchema = StageSchema {
    stage: "analyze_property",
    fields: PROPERTY_LOCATION_FIELDS,
};

pub const LOCATION_REPORT_SCHEMA: StageSchema = StageSchema {
    stage: "location_report",
    fields: &[
        FieldSpec::required("metadata", FieldType::Object, "Report metadata"),
        FieldSpec::required(
            "properties",
            FieldType::Array(&FieldType::Object),
            "Per-property analyses",
        ),
        FieldSpec::optional(
            "comparison",
            FieldType::Object,
            "Ranking across properties (required for more than one)",
        ),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_location_defaults() {
        let parsed: PropertyLocation =
            serde_json::from_value(json!({"property_id": "p1"})).unwrap();
        assert!(parsed.geocoded);
        assert!(parsed.amenities.is_empty());
        assert!(parsed.coordinates.is_none());
    }

    #[test]
    fn test_report_omits_absent_comparison() {
        let report = LocationReport {
            metadata: LocationMetadata {
                total_properties: 0,
                geocoded_properties: 0,
                search_radius_km: 6.0,
                airport_radius_km: 50.0,
                generated_at: "2026-01-01T00:00:00Z".to_string(),
            },
            properties: vec![],
            comparison: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("comparison").is_none());
    }
}
