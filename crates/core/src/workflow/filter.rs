//! Narrow the research report to the properties the reviewer approved.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::crews::record_id;

/// How the filtered output was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Only approved records were kept
    Filtered { kept: usize },
    /// The research output was passed through unchanged
    PassThrough { reason: String },
}

/// Keep only the records whose `id` (or `property_id`) is approved.
///
/// Never fails: if the research output cannot be read, it is returned as-is
/// and the outcome says why.
pub fn filter_research(
    raw: &str,
    approved: Option<&BTreeSet<String>>,
) -> (String, FilterOutcome) {
    let Some(approved) = approved else {
        return (
            raw.to_string(),
            FilterOutcome::PassThrough {
                reason: "No approval step ran".to_string(),
            },
        );
    };

    match try_filter(raw, approved) {
        Ok((filtered, kept)) => (filtered, FilterOutcome::Filtered { kept }),
        Err(e) => {
            tracing::warn!(stage = "filter", "Passing research through unfiltered: {:#}", e);
            (
                raw.to_string(),
                FilterOutcome::PassThrough {
                    reason: format!("{:#}", e),
                },
            )
        }
    }
}

fn try_filter(raw: &str, approved: &BTreeSet<String>) -> Result<(String, usize)> {
    let mut report: Value = serde_json::from_str(raw).context("Research output is not JSON")?;

    let key = ["properties", "listings"]
        .into_iter()
        .find(|key| report.get(*key).map(Value::is_array).unwrap_or(false))
        .context("Research output has no properties or listings array")?;

    let records = report
        .get_mut(key)
        .and_then(Value::as_array_mut)
        .context("Research records are not an array")?;

    records.retain(|record| {
        record_id(record)
            .map(|id| approved.contains(id))
            .unwrap_or(false)
    });
    let kept = records.len();

    if let Some(metadata) = report.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert("total_properties".to_string(), Value::from(kept));
    }

    Ok((serde_json::to_string_pretty(&report)?, kept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn research() -> String {
        json!({
            "metadata": {"search_query": "q", "total_properties": 2},
            "properties": [
                {"id": "p1", "address": "Ojodu Berger"},
                {"id": "p2", "address": "Omole Phase 1"}
            ]
        })
        .to_string()
    }

    #[test]
    fn test_keeps_only_approved() {
        let (filtered, outcome) = filter_research(&research(), Some(&ids(&["p1"])));
        assert_eq!(outcome, FilterOutcome::Filtered { kept: 1 });

        let value: Value = serde_json::from_str(&filtered).unwrap();
        assert_eq!(value["properties"].as_array().unwrap().len(), 1);
        assert_eq!(value["properties"][0]["id"], "p1");
        assert_eq!(value["metadata"]["total_properties"], 1);
    }

    #[test]
    fn test_matches_property_id_in_listings() {
        let raw = json!({"listings": [{"property_id": "a"}, {"property_id": "b"}]}).to_string();
        let (filtered, outcome) = filter_research(&raw, Some(&ids(&["b"])));
        assert_eq!(outcome, FilterOutcome::Filtered { kept: 1 });
        assert!(filtered.contains("\"b\""));
    }

    #[test]
    fn test_unreadable_output_passes_through() {
        let (filtered, outcome) = filter_research("not json", Some(&ids(&["p1"])));
        assert_eq!(filtered, "not json");
        assert!(matches!(outcome, FilterOutcome::PassThrough { .. }));
    }

    #[test]
    fn test_no_approval_passes_through() {
        let raw = research();
        let (filtered, outcome) = filter_research(&raw, None);
        assert_eq!(filtered, raw);
        assert!(matches!(outcome, FilterOutcome::PassThrough { .. }));
    }
}
