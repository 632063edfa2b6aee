//! # Search Tools
//!
//! Web search and page extraction through the Tavily API
//! (`TAVILY_API_KEY`).

use radkit::macros::tool;
use radkit::tools::ToolResult;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const TAVILY_BASE_URL: &str = "https://api.tavily.com";
const DEFAULT_MAX_RESULTS: u32 = 6;
/// Page text handed back to the agent is cut at this many characters
const MAX_PAGE_CHARS: usize = 12_000;

fn tavily_base_url() -> String {
    std::env::var("TAVILY_BASE_URL").unwrap_or_else(|_| TAVILY_BASE_URL.to_string())
}

async fn tavily_post(endpoint: &str, body: Value) -> Result<Value, String> {
    let api_key = std::env::var("TAVILY_API_KEY")
        .map_err(|_| "TAVILY_API_KEY environment variable not set".to_string())?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

    let response = client
        .post(format!("{}/{}", tavily_base_url(), endpoint))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("Tavily request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(format!("Tavily returned {}: {}", status, text));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| format!("Invalid Tavily response: {}", e))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Arguments for listing search
#[derive(Deserialize, JsonSchema)]
pub struct TavilySearchArgs {
    /// Search query, e.g. "2 bedroom apartment for rent in Ojodu Lagos"
    pub query: String,
    /// Maximum number of results (default: 6)
    pub max_results: Option<u32>,
}

#[tool(
    description = "Search the web for rental listings. Returns result URLs, titles and snippets."
)]
pub async fn tavily_search(args: TavilySearchArgs) -> ToolResult {
    let body = json!({
        "query": args.query,
        "max_results": args.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
        "search_depth": "advanced",
        "include_raw_content": false,
    });

    match tavily_post("search", body).await {
        Ok(response) => {
            let results: Vec<Value> = response
                .get("results")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .map(|r| {
                            json!({
                                "title": r.get("title").and_then(Value::as_str).unwrap_or(""),
                                "url": r.get("url").and_then(Value::as_str).unwrap_or(""),
                                "snippet": r.get("content").and_then(Value::as_str).unwrap_or(""),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            ToolResult::success(json!({
                "query": args.query,
                "results": results,
            }))
        }
        Err(e) => ToolResult::error(e),
    }
}

/// Arguments for page extraction
#[derive(Deserialize, JsonSchema)]
pub struct TavilyExtractArgs {
    /// Listing page URLs to read
    pub urls: Vec<String>,
}

#[tool(
    description = "Read listing pages. Returns the text content and image URLs of each page."
)]
pub async fn tavily_extract(args: TavilyExtractArgs) -> ToolResult {
    if args.urls.is_empty() {
        return ToolResult::error("No URLs given".to_string());
    }

    let body = json!({
        "urls": args.urls,
        "include_images": true,
    });

    match tavily_post("extract", body).await {
        Ok(response) => {
            // Page text goes back as `text`; `raw_content` must never reach the agent's output.
            let pages: Vec<Value> = response
                .get("results")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .map(|page| {
                            let text = page
                                .get("raw_content")
                                .and_then(Value::as_str)
                                .unwrap_or("");
                            json!({
                                "url": page.get("url").and_then(Value::as_str).unwrap_or(""),
                                "text": truncate_chars(text, MAX_PAGE_CHARS),
                                "images": page.get("images").cloned().unwrap_or_else(|| json!([])),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            let failed: Vec<Value> = response
                .get("failed_results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            ToolResult::success(json!({
                "pages": pages,
                "failed": failed,
            }))
        }
        Err(e) => ToolResult::error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("₦₦₦₦", 2), "₦₦…");
    }
}
