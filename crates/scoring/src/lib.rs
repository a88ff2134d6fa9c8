//! Scoring crate.
//!
//! Turns events and a category's weight vector into ranked predictions.

pub mod engine;
pub mod integrity;
pub mod models;

pub use engine::{ContextMap, ScoringEngine};
pub use integrity::{sanitize_events, SanitizeReport};
pub use models::{CategoryModel, FactorScore, ScoringModel};
