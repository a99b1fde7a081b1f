//! Core types for the classification engine (JSON contracts + internal models).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::report::SegmentReference;

/// Free-form metadata attached to predictions and cause labels.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract — what ingestion sends)
// ---------------------------------------------------------------------------

/// One normalized log-line record from ingestion. Unknown fields are silently
/// ignored; provider-specific framing (ANSI, raw section markers) is assumed
/// to be already collapsed upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct LogLine {
  pub line_number: u32,
  pub raw_text: String,
  pub provider: String,
  #[serde(default)]
  pub level: Option<String>,
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub section: Option<String>,
  #[serde(default)]
  pub step_name: Option<String>,
  #[serde(default)]
  pub stream_type: Option<String>,
  #[serde(default)]
  pub job_id: Option<String>,
  #[serde(default)]
  pub metadata: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Token taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenCategory {
  Structural,
  Command,
  Output,
  Diagnostic,
  Failure,
  Performance,
  System,
  Metadata,
  Unknown,
}

/// Token kinds with an immutable (severity, category) pair. Severity ordering
/// is the tie-break for ambiguous single-line classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
  SectionStart,
  SectionEnd,
  Step,
  Command,
  Debug,
  Info,
  Warning,
  CiWarning,
  Error,
  AssertionFail,
  TestFailure,
  TestError,
  StackTraceContinuation,
  StackTrace,
  ExitCode,
  ExitCodeNonZero,
  CiError,
  Default,
}

impl TokenKind {
  pub fn severity(self) -> u32 {
    match self {
      Self::SectionStart | Self::SectionEnd | Self::Step | Self::Command | Self::Default => 0,
      Self::Debug => 20,
      Self::Info => 30,
      Self::Warning => 50,
      Self::CiWarning => 55,
      Self::Error => 100,
      Self::AssertionFail => 150,
      Self::TestFailure => 160,
      Self::TestError => 170,
      Self::StackTraceContinuation => 185,
      Self::StackTrace => 190,
      Self::ExitCode => 200,
      Self::ExitCodeNonZero => 201,
      Self::CiError => 210,
    }
  }

  pub fn category(self) -> TokenCategory {
    match self {
      Self::SectionStart | Self::SectionEnd | Self::Step => TokenCategory::Structural,
      Self::Command => TokenCategory::Command,
      Self::Debug | Self::Info => TokenCategory::Diagnostic,
      Self::Warning
      | Self::CiWarning
      | Self::Error
      | Self::AssertionFail
      | Self::TestFailure
      | Self::TestError
      | Self::StackTraceContinuation
      | Self::StackTrace
      | Self::ExitCode
      | Self::ExitCodeNonZero
      | Self::CiError => TokenCategory::Failure,
      Self::Default => TokenCategory::Unknown,
    }
  }

  pub fn is_failure(self) -> bool {
    self.category() == TokenCategory::Failure
  }

  pub fn is_error(self) -> bool {
    self.severity() >= 100
  }

  pub fn is_warning(self) -> bool {
    (50..100).contains(&self.severity())
  }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// One typed token produced from a single normalized log line. Created once
/// per line and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub line_number: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub section: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stream: Option<String>,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub metadata: HashMap<String, String>,
}

impl Token {
  pub fn severity(&self) -> u32 {
    self.kind.severity()
  }
}

// ---------------------------------------------------------------------------
// Segment + context enrichment
// ---------------------------------------------------------------------------

/// Summary of neighboring segments attached by the context analyzer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSummary {
  pub segment_ids: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dominant_kind: Option<TokenKind>,
  pub max_severity: u32,
  pub failure_count: usize,
}

/// A contiguous run of tokens treated as one unit of evidence. Created by a
/// grouper, enriched by the context analyzer, scored exactly once, and then
/// read-only through classification.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
  pub id: String,
  pub tokens: Vec<Token>,
  pub text: String,
  pub start_line: u32,
  pub end_line: u32,
  pub provider: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub section: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stream: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub job_id: Option<String>,
  /// Mean token severity (raw scale, ~0-210), rounded to 2 decimals.
  pub score: f64,
  /// Shannon entropy (base 2) of the raw character distribution.
  pub entropy: f64,
  /// Derived confidence in [0, 1].
  pub confidence_level: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub preceding_context: Option<ContextSummary>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub following_context: Option<ContextSummary>,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub metadata: HashMap<String, String>,
}

impl Segment {
  /// Segment score mapped onto [0, 1] for confidence arithmetic.
  pub fn score_normalized(&self) -> f64 {
    (self.score / 100.0).clamp(0.0, 1.0)
  }

  pub fn max_severity(&self) -> u32 {
    self.tokens.iter().map(|t| t.severity()).max().unwrap_or(0)
  }

  pub fn contains_kind(&self, kind: TokenKind) -> bool {
    self.tokens.iter().any(|t| t.kind == kind)
  }

  pub fn count_kind(&self, kind: TokenKind) -> usize {
    self.tokens.iter().filter(|t| t.kind == kind).count()
  }

  pub fn kind_counts(&self) -> HashMap<TokenKind, usize> {
    let mut counts = HashMap::new();
    for token in &self.tokens {
      *counts.entry(token.kind).or_insert(0) += 1;
    }
    counts
  }
}

// ---------------------------------------------------------------------------
// Cause labels + prediction bundles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CauseKind {
  Primary,
  Secondary,
  Symptom,
  Context,
}

/// A structured cause label with kind information and evidence.
#[derive(Debug, Clone, Serialize)]
pub struct CauseLabel {
  pub label: String,
  pub kind: CauseKind,
  pub confidence: f64,
  pub supporting_segment_ids: Vec<String>,
  pub supporting_tokens: Vec<String>,
  #[serde(default, skip_serializing_if = "Metadata::is_empty")]
  pub metadata: Metadata,
}

/// A primary root cause plus secondary causes, symptoms, and contextual
/// factors — the complete analysis of one failure.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionBundle {
  pub id: String,
  pub primary_cause: CauseLabel,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub secondary_causes: Vec<CauseLabel>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub symptoms: Vec<CauseLabel>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub context_factors: Vec<CauseLabel>,
  pub aggregate_confidence: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub job_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub classifier_id: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub segment_references: Vec<SegmentReference>,
}

impl PredictionBundle {
  /// Aggregate confidence: the primary cause plus a bounded boost from
  /// aligned secondary evidence, capped at 1.0.
  pub fn compute_aggregate_confidence(&self) -> f64 {
    let primary = self.primary_cause.confidence;
    if self.secondary_causes.is_empty() {
      return primary.min(1.0);
    }
    let secondary_avg = self.secondary_causes.iter().map(|c| c.confidence).sum::<f64>()
      / self.secondary_causes.len() as f64;
    let boost = if secondary_avg > 0.7 {
      0.05
    } else if secondary_avg > 0.5 {
      0.02
    } else {
      0.0
    };
    let count_factor = (self.secondary_causes.len() as f64 * 0.01).min(0.05);
    (primary + boost + count_factor).min(1.0)
  }
}

// ---------------------------------------------------------------------------
// Flat prediction (JSON contract — what we emit)
// ---------------------------------------------------------------------------

/// Structured output for root cause classification. Created by a classifier,
/// possibly merged or dropped by the coordinator, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RootCausePrediction {
  pub label: String,
  pub confidence: f64,
  pub segment_ids: Vec<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub segment_references: Vec<SegmentReference>,
  pub supporting_tokens: Vec<String>,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub provider_context: HashMap<String, String>,
  #[serde(default, skip_serializing_if = "Metadata::is_empty")]
  pub metadata: Metadata,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub classifier_id: Option<String>,
}

impl RootCausePrediction {
  /// Flatten a bundle to its primary cause. The flat view always carries the
  /// primary label and confidence unchanged.
  pub fn from_bundle(bundle: &PredictionBundle) -> Self {
    let mut metadata = bundle.primary_cause.metadata.clone();
    if !bundle.secondary_causes.is_empty() {
      metadata.insert(
        "secondary_causes".into(),
        serde_json::json!(bundle
          .secondary_causes
          .iter()
          .map(|c| serde_json::json!({ "label": c.label, "confidence": c.confidence }))
          .collect::<Vec<_>>()),
      );
    }
    if !bundle.symptoms.is_empty() {
      metadata.insert(
        "symptoms".into(),
        serde_json::json!(bundle
          .symptoms
          .iter()
          .map(|c| serde_json::json!({ "label": c.label, "confidence": c.confidence }))
          .collect::<Vec<_>>()),
      );
    }
    metadata.insert("bundle_id".into(), serde_json::json!(bundle.id));

    let mut provider_context = HashMap::new();
    if let Some(provider) = &bundle.provider {
      provider_context.insert("provider".to_string(), provider.clone());
    }

    Self {
      label: bundle.primary_cause.label.clone(),
      confidence: bundle.primary_cause.confidence,
      segment_ids: bundle.primary_cause.supporting_segment_ids.clone(),
      segment_references: bundle.segment_references.clone(),
      supporting_tokens: bundle.primary_cause.supporting_tokens.clone(),
      provider_context,
      metadata,
      classifier_id: bundle.classifier_id.clone(),
    }
  }
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
