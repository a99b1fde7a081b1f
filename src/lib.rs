//! Root Cause Classification Engine — deterministic, rule-based.
//!
//! Ingests normalized CI log lines, tokenizes and groups them into scored
//! segments, classifies failures with contextual rules and heuristic
//! fallbacks, coordinates competing predictions, and emits ranked
//! RootCausePrediction JSON plus a traceable summary report.
//!
//! No AI, no DB, no network; pure computation + in-memory state.

pub mod classifier;
pub mod config;
pub mod confidence;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod grouping;
pub mod pipeline;
pub mod report;
pub mod rules;
pub mod scoring;
pub mod tokenizer;
pub mod types;

pub use config::EngineConfig;
pub use engine::RootCauseAnalysisEngine;
pub use error::EngineError;
pub use pipeline::Pipeline;
pub use report::SummaryReport;
pub use types::{LogLine, PredictionBundle, RootCausePrediction, Segment};
