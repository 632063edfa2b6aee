//! Guardrails for the research crew's four tasks.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use super::{Guardrail, Validation, Violations};
use crate::config::GuardrailConfig;
use crate::schema::listing::{
    EXTRACT_SCHEMA, RESEARCH_REPORT_SCHEMA, SEARCH_SCHEMA, VALIDATE_SCHEMA,
};

fn markup_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)<\s*(html|head|body|div|script|span|table)\b").ok())
        .as_ref()
}

fn is_http_url(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("http://") || s.starts_with("https://")
}

/// First blocked name contained in `text`, case-insensitive
fn blocked_match<'a>(text: &str, blocked: &'a [String]) -> Option<&'a str> {
    let lower = text.to_lowercase();
    blocked
        .iter()
        .map(String::as_str)
        .find(|b| !b.is_empty() && lower.contains(&b.to_lowercase()))
}

/// True when any object key in the tree is `raw_content` or any string
/// value looks like page markup
fn leaks_markup(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k == "raw_content" || leaks_markup(v)),
        Value::Array(items) => items.iter().any(leaks_markup),
        Value::String(s) => markup_pattern().map(|re| re.is_match(s)).unwrap_or(false),
        _ => false,
    }
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Search output: enough listing URLs, named platforms, nothing blocked
pub struct SearchResultsGuardrail {
    min_urls: usize,
    blocked_platforms: Vec<String>,
}

impl SearchResultsGuardrail {
    pub fn new(config: &GuardrailConfig) -> Self {
        Self {
            min_urls: config.min_urls,
            blocked_platforms: config.blocked_platforms.clone(),
        }
    }
}

impl Guardrail for SearchResultsGuardrail {
    fn name(&self) -> &str {
        "search_results"
    }

    fn check(&self, value: Value) -> Validation {
        let mut violations = Violations::new();
        violations.extend(SEARCH_SCHEMA.check_shape(&value));

        let urls: Vec<&str> = value
            .get("urls")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let platforms: Vec<&str> = value
            .get("platforms")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        // Blocklist first: a blocked source rejects regardless of anything else.
        for platform in &platforms {
            if let Some(name) = blocked_match(platform, &self.blocked_platforms) {
                violations.push(format!("Blocked platform: {}", name));
            }
        }
        for url in &urls {
            if let Some(name) = blocked_match(url, &self.blocked_platforms) {
                violations.push(format!("URL from blocked platform {}: {}", name, url));
            }
        }

        let mut valid = 0;
        for (i, url) in urls.iter().enumerate() {
            if is_http_url(url) {
                valid += 1;
            } else {
                violations.push(format!("URL {} is not an http(s) URL: {}", i + 1, url));
            }
        }
        if value.get("urls").map(Value::is_array).unwrap_or(false) && valid < self.min_urls {
            violations.push(format!(
                "Expected at least {} listing URLs, found {}",
                self.min_urls, valid
            ));
        }

        if value.get("platforms").map(Value::is_array).unwrap_or(false) && platforms.is_empty() {
            violations.push("No platforms listed");
        }

        violations.into_validation("Search validation failed", value)
    }
}

/// Per-listing provenance checks shared by the extract and validate stages
fn check_listings(
    listings: &[Value],
    config: &ListingChecks,
    violations: &mut Violations,
) {
    for (i, listing) in listings.iter().enumerate() {
        let label = format!("Listing {}", i + 1);

        let images: Vec<&str> = listing
            .get("images")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if listing.get("images").map(Value::is_array).unwrap_or(false)
            && images.len() < config.min_images
        {
            violations.push(format!(
                "{}: expected at least {} image(s), found {}",
                label,
                config.min_images,
                images.len()
            ));
        }
        for (j, image) in images.iter().enumerate() {
            if !is_http_url(image) {
                violations.push(format!("{}: image {} is not an http(s) URL", label, j + 1));
            }
        }

        if let Some(description) = listing.get("description").and_then(Value::as_str) {
            let words = word_count(description);
            if words < config.min_description_words {
                violations.push(format!(
                    "{}: description too short ({} words, minimum {})",
                    label, words, config.min_description_words
                ));
            }
        }

        if let Some(contact) = listing.get("contact").and_then(Value::as_object) {
            let has_any = ["name", "phone", "email", "agency"].iter().any(|k| {
                contact
                    .get(*k)
                    .and_then(Value::as_str)
                    .map(|s| !s.trim().is_empty())
                    .unwrap_or(false)
            });
            if !has_any {
                violations.push(format!(
                    "{}: contact has no name, phone, email or agency",
                    label
                ));
            }
        }

        for field in ["platform", "listing_url"] {
            if let Some(text) = listing.get(field).and_then(Value::as_str) {
                if let Some(name) = blocked_match(text, &config.blocked_platforms) {
                    violations.push(format!("{}: blocked platform {}", label, name));
                    break;
                }
            }
        }

        if let Some(score) = listing.get("quality_score").and_then(Value::as_f64) {
            if !(0.0..=100.0).contains(&score) {
                violations.push(format!(
                    "{}: quality_score must be between 0 and 100, got {}",
                    label, score
                ));
            }
        }
    }
}

struct ListingChecks {
    min_images: usize,
    min_description_words: usize,
    blocked_platforms: Vec<String>,
}

impl From<&GuardrailConfig> for ListingChecks {
    fn from(config: &GuardrailConfig) -> Self {
        Self {
            min_images: config.min_images,
            min_description_words: config.min_description_words,
            blocked_platforms: config.blocked_platforms.clone(),
        }
    }
}

fn listings_of(value: &Value) -> &[Value] {
    value
        .get("listings")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Extraction output: structured listings, no leaked page markup
pub struct ExtractedListingsGuardrail {
    checks: ListingChecks,
}

impl ExtractedListingsGuardrail {
    pub fn new(config: &GuardrailConfig) -> Self {
        Self {
            checks: config.into(),
        }
    }
}

impl Guardrail for ExtractedListingsGuardrail {
    fn name(&self) -> &str {
        "extracted_listings"
    }

    fn check(&self, value: Value) -> Validation {
        let mut violations = Violations::new();

        if leaks_markup(&value) {
            violations.push("Raw HTML leaked into output");
        }
        violations.extend(EXTRACT_SCHEMA.check_shape(&value));

        let listings = listings_of(&value);
        if value.get("listings").map(Value::is_array).unwrap_or(false) && listings.is_empty() {
            violations.push("No listings extracted");
        }
        check_listings(listings, &self.checks, &mut violations);

        violations.into_validation("Extraction validation failed", value)
    }
}

/// Validated listings: same checks plus quality scores, and the one
/// repairing guardrail: more than `max_listings` entries are truncated
/// (original order kept) and the summary annotated, instead of rejected.
pub struct ValidatedListingsGuardrail {
    checks: ListingChecks,
    max_listings: usize,
}

impl ValidatedListingsGuardrail {
    pub fn new(config: &GuardrailConfig) -> Self {
        Self {
            checks: config.into(),
            max_listings: config.max_listings,
        }
    }

    fn truncate(&self, value: &mut Value) {
        let Some(listings) = value.get_mut("listings").and_then(Value::as_array_mut) else {
            return;
        };
        let original = listings.len();
        if original <= self.max_listings {
            return;
        }
        listings.truncate(self.max_listings);
        tracing::info!(
            original,
            kept = self.max_listings,
            "Truncated validated listings"
        );

        match value.get_mut("summary").and_then(Value::as_object_mut) {
            Some(summary) => {
                summary.insert("original_count".to_string(), json!(original));
                summary.insert("truncated_to".to_string(), json!(self.max_listings));
            }
            None => {
                value["summary"] = json!({
                    "original_count": original,
                    "truncated_to": self.max_listings,
                });
            }
        }
    }
}

impl Guardrail for ValidatedListingsGuardrail {
    fn name(&self) -> &str {
        "validated_listings"
    }

    fn check(&self, mut value: Value) -> Validation {
        if value.is_object() {
            self.truncate(&mut value);
        }

        let mut violations = Violations::new();
        if leaks_markup(&value) {
            violations.push("Raw HTML leaked into output");
        }
        violations.extend(VALIDATE_SCHEMA.check_shape(&value));

        let listings = listings_of(&value);
        if value.get("listings").map(Value::is_array).unwrap_or(false) && listings.is_empty() {
            violations.push("No listings passed validation");
        }
        check_listings(listings, &self.checks, &mut violations);

        violations.into_validation("Validation failed", value)
    }
}

/// The compiled research report handed to the workflow
pub struct ResearchReportGuardrail {
    blocked_platforms: Vec<String>,
}

impl ResearchReportGuardrail {
    pub fn new(config: &GuardrailConfig) -> Self {
        Self {
            blocked_platforms: config.blocked_platforms.clone(),
        }
    }
}

impl Guardrail for ResearchReportGuardrail {
    fn name(&self) -> &str {
        "research_report"
    }

    fn check(&self, value: Value) -> Validation {
        let mut violations = Violations::new();
        violations.extend(RESEARCH_REPORT_SCHEMA.check_shape(&value));

        if let Some(properties) = value.get("properties").and_then(Value::as_array) {
            if properties.is_empty() {
                violations.push("No properties in research report");
            }

            let mut seen = std::collections::BTreeSet::new();
            for (i, property) in properties.iter().enumerate() {
                if let Some(id) = property.get("id").and_then(Value::as_str) {
                    if !seen.insert(id) {
                        violations.push(format!("Duplicate property id: {}", id));
                    }
                }
                let image_count = property
                    .get("images")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                if property.get("images").is_some() && image_count == 0 {
                    violations.push(format!("Property {} has no images", i + 1));
                }
                if let Some(url) = property.get("listing_url").and_then(Value::as_str) {
                    if let Some(name) = blocked_match(url, &self.blocked_platforms) {
                        violations.push(format!("Property {}: blocked platform {}", i + 1, name));
                    }
                }
            }
        }

        violations.into_validation("Research report validation failed", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::RawStageOutput;

    fn config() -> GuardrailConfig {
        GuardrailConfig::default()
    }

    fn listing(n: usize) -> Value {
        json!({
            "listing_url": format!("https://www.propertypro.ng/property/{}", n),
            "platform": "propertypro",
            "address": "Ojodu Berger, Lagos",
            "price": "₦2,500,000",
            "price_frequency": "yearly",
            "bedrooms": 2,
            "description": "Newly built two bedroom flat with POP ceilings, prepaid meter and ample parking space.",
            "images": [format!("https://images.propertypro.ng/{}.jpg", n)],
            "contact": {"name": "Ade Realty", "phone": "+2348000000000"},
            "quality_score": 82
        })
    }

    #[test]
    fn test_search_accepts_valid_output() {
        let output = json!({
            "urls": [
                "https://www.propertypro.ng/property/1",
                "https://nigeriapropertycentre.com/for-rent/2",
                "https://www.privateproperty.com.ng/3"
            ],
            "platforms": ["propertypro", "nigeriapropertycentre", "privateproperty"]
        });
        let verdict = SearchResultsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict.is_accepted(), "{:?}", verdict);
    }

    #[test]
    fn test_search_requires_min_urls() {
        let output = json!({
            "urls": ["https://www.propertypro.ng/property/1"],
            "platforms": ["propertypro"]
        });
        let verdict = SearchResultsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        let reason = verdict.reason().unwrap();
        assert!(reason.contains("Expected at least 3 listing URLs, found 1"));
    }

    #[test]
    fn test_search_blocklist_rejects_otherwise_valid_output() {
        let output = json!({
            "urls": [
                "https://www.propertypro.ng/property/1",
                "https://nigeriapropertycentre.com/for-rent/2",
                "https://www.privateproperty.com.ng/3"
            ],
            "platforms": ["propertypro", "Zillow"]
        });
        let verdict = SearchResultsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict.reason().unwrap().contains("Blocked platform: zillow"));
    }

    #[test]
    fn test_search_rejects_prose() {
        let verdict = SearchResultsGuardrail::new(&config()).validate(&RawStageOutput::Text(
            "I searched and found lots of listings.".to_string(),
        ));
        assert_eq!(verdict.reason(), Some("Output must be valid JSON"));
    }

    #[test]
    fn test_extract_accepts_clean_listings() {
        let output = json!({
            "listings": [listing(1), listing(2)],
            "summary": {"total_urls_processed": 2}
        });
        let verdict = ExtractedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict.is_accepted(), "{:?}", verdict);
    }

    #[test]
    fn test_extract_names_missing_key() {
        let mut bad = listing(1);
        bad.as_object_mut().unwrap().remove("price");
        let output = json!({"listings": [bad], "summary": {}});
        let verdict = ExtractedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict
            .reason()
            .unwrap()
            .contains("Missing required field: listings[0].price"));
    }

    #[test]
    fn test_extract_missing_listings_key() {
        let verdict = ExtractedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Text("{\"summary\": {}}".to_string()));
        assert!(verdict
            .reason()
            .unwrap()
            .contains("Missing required field: listings"));
    }

    #[test]
    fn test_extract_rejects_markup_and_raw_content() {
        let mut leaky = listing(1);
        leaky["description"] = json!("<div class=\"listing\">Lovely flat</div>");
        let output = json!({"listings": [leaky], "summary": {}});
        let verdict = ExtractedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict.reason().unwrap().contains("Raw HTML leaked into output"));

        let mut raw = listing(2);
        raw["raw_content"] = json!("page text");
        let output = json!({"listings": [raw], "summary": {}});
        let verdict = ExtractedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict.reason().unwrap().contains("Raw HTML leaked into output"));
    }

    #[test]
    fn test_extract_provenance_heuristics() {
        let mut thin = listing(1);
        thin["images"] = json!([]);
        thin["description"] = json!("Nice flat.");
        thin["contact"] = json!({"name": ""});
        let output = json!({"listings": [thin], "summary": {}});
        let verdict = ExtractedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        let reason = verdict.reason().unwrap();
        assert!(reason.starts_with("Extraction validation failed:\n"));
        assert!(reason.contains("Listing 1: expected at least 1 image(s), found 0"));
        assert!(reason.contains("Listing 1: description too short (2 words, minimum 10)"));
        assert!(reason.contains("Listing 1: contact has no name, phone, email or agency"));
    }

    #[test]
    fn test_validated_listings_truncated_to_max() {
        let listings: Vec<Value> = (1..=9).map(listing).collect();
        let output = json!({"listings": listings, "summary": {"total_listings": 9}});
        let verdict = ValidatedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));

        match verdict {
            Validation::Accepted { payload } => {
                let kept = payload["listings"].as_array().unwrap();
                assert_eq!(kept.len(), 6);
                assert_eq!(kept[0]["listing_url"], "https://www.propertypro.ng/property/1");
                assert_eq!(payload["summary"]["original_count"], 9);
                assert_eq!(payload["summary"]["truncated_to"], 6);
                assert_eq!(payload["summary"]["total_listings"], 9);
            }
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[test]
    fn test_validated_listings_at_limit_not_annotated() {
        let listings: Vec<Value> = (1..=6).map(listing).collect();
        let output = json!({"listings": listings, "summary": {}});
        let verdict = ValidatedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        match verdict {
            Validation::Accepted { payload } => {
                assert!(payload["summary"].get("original_count").is_none());
            }
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[test]
    fn test_validated_listings_quality_range() {
        let mut bad = listing(1);
        bad["quality_score"] = json!(140);
        let output = json!({"listings": [bad], "summary": {}});
        let verdict = ValidatedListingsGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict
            .reason()
            .unwrap()
            .contains("quality_score must be between 0 and 100"));
    }

    #[test]
    fn test_research_report_checks() {
        let mut p1 = listing(1);
        p1["id"] = json!("p1");
        let mut p2 = listing(2);
        p2["id"] = json!("p1");
        let output = json!({
            "metadata": {"search_query": "2 bedroom apartment in Ojodu", "total_properties": 2},
            "properties": [p1, p2]
        });
        let verdict = ResearchReportGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(output));
        assert!(verdict.reason().unwrap().contains("Duplicate property id: p1"));

        let empty = json!({
            "metadata": {"search_query": "q", "total_properties": 0},
            "properties": []
        });
        let verdict = ResearchReportGuardrail::new(&config())
            .validate(&RawStageOutput::Structured(empty));
        assert!(verdict.reason().unwrap().contains("No properties in research report"));
    }
}
