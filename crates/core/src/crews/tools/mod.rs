//! # Crew Tools
//!
//! `#[tool]` functions the crew agents may call.

pub mod geo_tools;
pub mod search_tools;
