//! # HomeScout Core
//!
//! Workflow engine for the HomeScout rental search pipeline: research
//! crews find and validate listings, location crews score neighborhood
//! amenities, design crews redesign room photos.
//!
//! ## Architecture
//!
//! - `workflow/` - Stage pipeline, shared run state, human approval, final report
//! - `crews/` - Research, Location and Design crews behind the `Crew` trait
//! - `guardrail/` - Parse, validate and repair agent output before it moves on
//! - `schema/` - Typed stage outputs and their declarative contracts
//! - `geo/` - Distance, places provider and amenity scoring
//! - `models/` - Centralized LLM provider configuration
//! - `state/` - SQLite checkpoints, reviewer inbox, output files
//!
//! ## Usage
//!
//! ```rust,ignore
//! use homescout_core::config::WorkflowConfig;
//! use homescout_core::workflow::{SearchCriteria, Workflow};
//!
//! let mut workflow = Workflow::from_config(WorkflowConfig::default())?;
//! let outcome = workflow
//!     .run(SearchCriteria::new("Ojodu, Lagos, Nigeria"), "modern minimalist")
//!     .await?;
//! println!("{} properties found", outcome.state.counters.properties_found);
//! ```

pub mod config;
pub mod crews;
pub mod error;
pub mod geo;
pub mod guardrail;
pub mod models;
pub mod schema;
pub mod state;
pub mod workflow;

pub use error::{StageError, StageResult};
