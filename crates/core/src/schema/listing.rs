//! Research-crew output shapes: search hits, extracted listings,
//! validated listings and the compiled research report.

use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{FieldSpec, FieldType, StageSchema};

/// Output of the `search_listings` task
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SearchListingsOutput {
    /// Direct URLs of individual listing pages
    #[serde(default)]
    pub urls: Vec<String>,
    /// Platforms the URLs were found on (e.g. "propertypro", "nigeriapropertycentre")
    #[serde(default)]
    pub platforms: Vec<String>,
}

/// How to reach the landlord or agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub agency: Option<String>,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        [&self.name, &self.phone, &self.email, &self.agency]
            .iter()
            .all(|f| f.as_deref().map(str::trim).unwrap_or("").is_empty())
    }
}

/// A listing as pulled out of a listing page
///
/// Every field deserializes leniently; the guardrails decide what is
/// required at each stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ExtractedListing {
    /// Stable identifier, assigned when the research report is compiled
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Asking price exactly as shown, including currency
    #[serde(default)]
    pub price: Option<String>,
    /// "monthly", "yearly", ...
    #[serde(default)]
    pub price_frequency: Option<String>,
    #[serde(default)]
    pub bedrooms: Option<f64>,
    #[serde(default)]
    pub bathrooms: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Absolute image URLs from the listing gallery
    #[serde(default)]
    pub images: Vec<String>,
    /// "key: value" facts (parking, furnishing, serviced, ...)
    #[serde(default)]
    pub facts_and_features: Vec<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ExtractionSummary {
    #[serde(default)]
    pub total_urls_processed: u32,
    #[serde(default)]
    pub successful_extractions: u32,
    #[serde(default)]
    pub failed_extractions: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Output of the `extract_listings` task
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ExtractListingsOutput {
    #[serde(default)]
    pub listings: Vec<ExtractedListing>,
    #[serde(default)]
    pub summary: ExtractionSummary,
}

/// An extracted listing after quality review
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ValidatedListing {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub price_frequency: Option<String>,
    #[serde(default)]
    pub bedrooms: Option<f64>,
    #[serde(default)]
    pub bathrooms: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub facts_and_features: Vec<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
    /// 0-100, completeness and plausibility of the listing
    #[serde(default)]
    pub quality_score: Option<u32>,
    #[serde(default)]
    pub validation_notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ValidationSummary {
    #[serde(default)]
    pub total_listings: u32,
    #[serde(default)]
    pub valid_listings: u32,
    #[serde(default)]
    pub average_quality_score: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Output of the `validate_data` task
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ValidateListingsOutput {
    #[serde(default)]
    pub listings: Vec<ValidatedListing>,
    #[serde(default)]
    pub summary: ValidationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchMetadata {
    pub search_query: String,
    pub total_properties: usize,
    pub platforms: Vec<String>,
    pub generated_at: String,
}

/// The research crew's final output; the workflow stores it under `research`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub metadata: ResearchMetadata,
    pub properties: Vec<ValidatedListing>,
}

const CONTACT_FIELDS: &[FieldSpec] = &[
    FieldSpec::optional("name", FieldType::String, "Agent or landlord name"),
    FieldSpec::optional("phone", FieldType::String, "Phone number"),
    FieldSpec::optional("email", FieldType::String, "Email address"),
    FieldSpec::optional("agency", FieldType::String, "Agency name"),
];

const EXTRACTED_LISTING_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("listing_url", FieldType::String, "URL of the listing page"),
    FieldSpec::optional("platform", FieldType::String, "Listing platform"),
    FieldSpec::required("address", FieldType::String, "Street address or area"),
    FieldSpec::required("price", FieldType::Scalar, "Asking price with currency"),
    FieldSpec::optional("price_frequency", FieldType::String, "monthly, yearly, ..."),
    FieldSpec::optional("bedrooms", FieldType::Number, "Bedroom count"),
    FieldSpec::optional("bathrooms", FieldType::Number, "Bathroom count"),
    FieldSpec::optional("description", FieldType::String, "Listing description"),
    FieldSpec::required("images", FieldType::Array(&FieldType::String), "Image URLs"),
    FieldSpec::optional(
        "facts_and_features",
        FieldType::Array(&FieldType::String),
        "\"key: value\" facts",
    ),
    FieldSpec::required("contact", FieldType::Record(CONTACT_FIELDS), "Contact details"),
];

const VALIDATED_LISTING_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("listing_url", FieldType::String, "URL of the listing page"),
    FieldSpec::optional("platform", FieldType::String, "Listing platform"),
    FieldSpec::required("address", FieldType::String, "Street address or area"),
    FieldSpec::required("price", FieldType::Scalar, "Asking price with currency"),
    FieldSpec::optional("price_frequency", FieldType::String, "monthly, yearly, ..."),
    FieldSpec::optional("bedrooms", FieldType::Number, "Bedroom count"),
    FieldSpec::optional("bathrooms", FieldType::Number, "Bathroom count"),
    FieldSpec::optional("description", FieldType::String, "Listing description"),
    FieldSpec::required("images", FieldType::Array(&FieldType::String), "Image URLs"),
    FieldSpec::optional(
        "facts_and_features",
        FieldType::Array(&FieldType::String),
        "\"key: value\" facts",
    ),
    FieldSpec::required("contact", FieldType::Record(CONTACT_FIELDS), "Contact details"),
    FieldSpec::required("quality_score", FieldType::Integer, "0-100 quality score"),
    FieldSpec::optional(
        "validation_notes",
        FieldType::Array(&FieldType::String),
        "Problems found during review",
    ),
];

const REPORT_PROPERTY_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("id", FieldType::String, "Stable property id (p1, p2, ...)"),
    FieldSpec::required("listing_url", FieldType::String, "URL of the listing page"),
    FieldSpec::required("address", FieldType::String, "Street address or area"),
    FieldSpec::required("price", FieldType::Scalar, "Asking price with currency"),
    FieldSpec::required("images", FieldType::Array(&FieldType::String), "Image URLs"),
    FieldSpec::required("contact", FieldType::Record(CONTACT_FIELDS), "Contact details"),
    FieldSpec::optional("quality_score", FieldType::Integer, "0-100 quality score"),
];

const RESEARCH_METADATA_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("search_query", FieldType::String, "Query the search ran with"),
    FieldSpec::required("total_properties", FieldType::Integer, "Number of properties"),
    FieldSpec::optional("generated_at", FieldType::String, "RFC 3339 timestamp"),
];

pub const SEARCH_SCHEMA: StageSchema = StageSchema {
    stage: "search_listings",
    fields: &[
        FieldSpec::required(
            "urls",
            FieldType::Array(&FieldType::String),
            "Direct listing page URLs",
        ),
        FieldSpec::required(
            "platforms",
            FieldType::Array(&FieldType::String),
            "Platforms the URLs come from",
        ),
    ],
};

pub const EXTRACT_SCHEMA: StageSchema = StageSchema {
    stage: "extract_listings",
    fields: &[
        FieldSpec::required(
            "listings",
            FieldType::Array(&FieldType::Record(EXTRACTED_LISTING_FIELDS)),
            "One entry per listing page",
        ),
        FieldSpec::required("summary", FieldType::Object, "Extraction counts and notes"),
    ],
};

pub const VALIDATE_SCHEMA: StageSchema = StageSchema {
    stage: "validate_data",
    fields: &[
        FieldSpec::required(
            "listings",
            FieldType::Array(&FieldType::Record(VALIDATED_LISTING_FIELDS)),
            "Reviewed listings",
        ),
        FieldSpec::required("summary", FieldType::Object, "Validation counts and notes"),
    ],
};

pub const RESEARCH_REPORT_SCHEMA: StageSchema = StageSchema {
    stage: "research_report",
    fields: &[
        FieldSpec::required(
            "metadata",
            FieldType::Record(RESEARCH_METADATA_FIELDS),
            "Report metadata",
        ),
        FieldSpec::required(
            "properties",
            FieldType::Array(&FieldType::Record(REPORT_PROPERTY_FIELDS)),
            "Final property records",
        ),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracted_listing_tolerates_missing_fields() {
        let listing: ExtractedListing =
            serde_json::from_value(json!({"listing_url": "https://example.com/1"})).unwrap();
        assert!(listing.images.is_empty());
        assert!(listing.contact.is_none());
    }

    #[test]
    fn test_contact_is_empty() {
        assert!(Contact::default().is_empty());
        let contact = Contact {
            phone: Some("+234 800 000 0000".to_string()),
            ..Contact::default()
        };
        assert!(!contact.is_empty());
    }

    #[test]
    fn test_search_schema_flags_missing_platforms() {
        let problems = SEARCH_SCHEMA.check_shape(&json!({"urls": ["https://a.com"]}));
        assert_eq!(problems, vec!["Missing required field: platforms"]);
    }
}
