//! System prompts bundled at compile time.

/// Listing Scout - finds individual listing page URLs
pub const SCRAPER: &str = include_str!("defaults/scraper.md");

/// Listing Extractor - structured records from listing pages
pub const EXTRACTOR: &str = include_str!("defaults/extractor.md");

/// Listing Validator - dedupes, filters and scores listings
pub const VALIDATOR: &str = include_str!("defaults/validator.md");

/// Location Analyst - amenity analysis for one property
pub const LOCATION_ANALYZER: &str = include_str!("defaults/location_analyzer.md");

/// Room Analyst - identifies redesignable rooms in listing photos
pub const ROOM_ANALYST: &str = include_str!("defaults/room_analyst.md");

/// Prompt sent to the image model for one room
pub fn redesign_prompt(room_type: &str, design_style: &str, changes: &[String]) -> String {
    let mut prompt = format!(
        "Redesign this {} in a {} style. Keep the room's layout, walls, windows and \
         camera angle unchanged; change only furniture, decor, colours and lighting.",
        room_type.replace('_', " "),
        design_style
    );
    if !changes.is_empty() {
        prompt.push_str("\nApply these changes:\n");
        for change in changes {
            prompt.push_str("- ");
            prompt.push_str(change);
            prompt.push('\n');
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_bundled() {
        assert!(SCRAPER.contains("tavily_search"));
        assert!(EXTRACTOR.contains("tavily_extract"));
        assert!(LOCATION_ANALYZER.contains("score_amenities"));
    }

    #[test]
    fn test_redesign_prompt() {
        let prompt = redesign_prompt(
            "living_room",
            "modern minimalist",
            &["Replace the curtains with linen blinds".to_string()],
        );
        assert!(prompt.starts_with("Redesign this living room in a modern minimalist style."));
        assert!(prompt.contains("- Replace the curtains with linen blinds"));
    }
}
