//! Orchestration: classifiers, fallback, last resort, coordination.

use tracing::debug;

use crate::classifier::{bundle_from_prediction, default_registry, ClassifierRegistry};
use crate::config::EngineConfig;
use crate::coordinator::ClassifierCoordinator;
use crate::error::EngineError;
use crate::fallback::FallbackClassifier;
use crate::report::{generate_summary_report, SegmentReference, SummaryReport};
use crate::types::{Metadata, PredictionBundle, RootCausePrediction, Segment};

pub const LAST_RESORT_CLASSIFIER_ID: &str = "last_resort";

/// Runs each analysis as a fixed sequence: classifiers, then fallback if
/// they produced nothing that survived coordination, then a last-resort
/// prediction. Never returns zero predictions for a non-empty segment list.
pub struct RootCauseAnalysisEngine {
  registry: ClassifierRegistry,
  coordinator: ClassifierCoordinator,
  fallback: FallbackClassifier,
}

impl RootCauseAnalysisEngine {
  /// Engine with the built-in classifier set.
  pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
    let registry = default_registry(&config.weights)?;
    Self::with_registry(config, registry)
  }

  pub fn with_registry(
    config: EngineConfig,
    registry: ClassifierRegistry,
  ) -> Result<Self, EngineError> {
    Ok(Self {
      registry,
      coordinator: ClassifierCoordinator::new(config.coordinator),
      fallback: FallbackClassifier::new(config.fallback)?,
    })
  }

  /// Ranked predictions, confidence descending, enriched and referenced.
  pub fn analyze(&self, segments: &[Segment]) -> Vec<RootCausePrediction> {
    if segments.is_empty() {
      return Vec::new();
    }

    let rule_predictions = self.registry.classify(segments);
    let mut coordinated = self.coordinator.coordinate(rule_predictions);

    if coordinated.is_empty() {
      debug!("no rule prediction survived, invoking fallback");
      // Fallback confidences sit below the coordinator's floor by
      // construction, so they skip the threshold filter.
      let fallback_predictions = self.fallback.classify(segments);
      coordinated = self.coordinator.resolve_overlaps(fallback_predictions);
    }
    if coordinated.is_empty() {
      debug!("fallback produced nothing, emitting last-resort prediction");
      coordinated.extend(last_resort(segments));
    }

    let mut enriched: Vec<RootCausePrediction> = coordinated
      .iter()
      .map(|p| {
        let mut prediction = self.coordinator.enrich(p, segments);
        prediction.segment_references = prediction
          .segment_ids
          .iter()
          .filter_map(|id| segments.iter().find(|s| &s.id == id))
          .map(SegmentReference::from_segment)
          .collect();
        prediction
      })
      .collect();
    enriched.sort_by(|a, b| {
      b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    enriched
  }

  /// Multi-label analysis. Classifiers without bundle support contribute
  /// primary-only bundles derived from their flat predictions.
  pub fn analyze_bundles(&self, segments: &[Segment]) -> Vec<PredictionBundle> {
    if segments.is_empty() {
      return Vec::new();
    }
    let mut bundles = self.registry.classify_bundles(segments);
    if bundles.is_empty() {
      bundles = self
        .analyze(segments)
        .iter()
        .enumerate()
        .map(|(i, prediction)| bundle_from_prediction(prediction, i, segments))
        .collect();
    }
    bundles.sort_by(|a, b| {
      b.aggregate_confidence
        .partial_cmp(&a.aggregate_confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    bundles
  }

  pub fn summary_report(&self, predictions: &[RootCausePrediction]) -> SummaryReport {
    generate_summary_report(predictions)
  }
}

/// Absolute last resort: an UNCLASSIFIED prediction on the best-scored
/// segment (earliest on ties) at fixed low confidence.
fn last_resort(segments: &[Segment]) -> Option<RootCausePrediction> {
  let best = segments.iter().reduce(|best, candidate| {
    if candidate.score > best.score {
      candidate
    } else {
      best
    }
  })?;
  let mut metadata = Metadata::new();
  metadata.insert("is_fallback".into(), serde_json::json!(true));
  metadata.insert("fallback_reason".into(), serde_json::json!("last_resort"));
  Some(RootCausePrediction {
    label: "UNCLASSIFIED".to_string(),
    confidence: 0.3,
    segment_ids: vec![best.id.clone()],
    segment_references: Vec::new(),
    supporting_tokens: Vec::new(),
    provider_context: std::collections::HashMap::new(),
    metadata,
    classifier_id: Some(LAST_RESORT_CLASSIFIER_ID.to_string()),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scoring;
  use crate::types::{Token, TokenKind};
  use std::collections::HashMap;

  fn segment(id: &str, text: &str, kind: TokenKind, line: u32) -> Segment {
    let mut seg = Segment {
      id: id.to_string(),
      tokens: vec![Token {
        kind,
        text: text.to_string(),
        line_number: line,
        section: None,
        stream: None,
        metadata: HashMap::new(),
      }],
      text: text.to_string(),
      start_line: line,
      end_line: line,
      provider: "github".into(),
      section: None,
      stream: None,
      job_id: None,
      score: 0.0,
      entropy: 0.0,
      confidence_level: 0.0,
      preceding_context: None,
      following_context: None,
      metadata: HashMap::new(),
    };
    scoring::score_segment(&mut seg);
    seg
  }

  fn engine() -> RootCauseAnalysisEngine {
    RootCauseAnalysisEngine::new(EngineConfig::default()).unwrap()
  }

  #[test]
  fn empty_input_yields_empty_output() {
    assert!(engine().analyze(&[]).is_empty());
  }

  #[test]
  fn never_zero_predictions_for_nonempty_input() {
    let segments = vec![segment("s0", "nothing remarkable", TokenKind::Default, 1)];
    let out = engine().analyze(&segments);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].label, "UNCLASSIFIED");
    assert!((out[0].confidence - 0.3).abs() < 1e-9);
    assert_eq!(out[0].segment_ids, vec!["s0"]);
  }

  #[test]
  fn rule_match_wins_over_fallback() {
    let segments = vec![segment(
      "s0",
      "error: compilation failed with exit code 1",
      TokenKind::Error,
      7,
    )];
    let out = engine().analyze(&segments);
    assert!(!out.is_empty());
    assert_eq!(out[0].label, "BUILD_FAILURE");
    assert_eq!(out[0].classifier_id.as_deref(), Some("build_failure"));
  }

  #[test]
  fn fallback_used_when_rules_stay_silent() {
    let segments = vec![segment(
      "s0",
      "rm: cannot remove '/var/cache': Permission denied",
      TokenKind::Error,
      3,
    )];
    let out = engine().analyze(&segments);
    assert_eq!(out[0].label, "PERMISSION_DENIED");
    assert_eq!(out[0].classifier_id.as_deref(), Some("fallback"));
    assert!(out[0].confidence < 0.6);
  }

  #[test]
  fn predictions_are_sorted_and_enriched() {
    let segments = vec![
      segment("s0", "error: compilation failed hard", TokenKind::Error, 1),
      segment("s1", "FAIL: test_login assertion failed", TokenKind::TestFailure, 40),
    ];
    let out = engine().analyze(&segments);
    for pair in out.windows(2) {
      assert!(pair[0].confidence >= pair[1].confidence);
    }
    for prediction in &out {
      assert!(prediction.metadata.contains_key("line_range"));
      assert!(!prediction.segment_references.is_empty());
    }
  }

  #[test]
  fn analyze_is_idempotent() {
    let segments = vec![
      segment("s0", "error: compilation failed hard", TokenKind::Error, 1),
      segment("s1", "FAIL: test_login assertion failed", TokenKind::TestFailure, 40),
    ];
    let e = engine();
    let first = serde_json::to_string(&e.analyze(&segments)).unwrap();
    let second = serde_json::to_string(&e.analyze(&segments)).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn bundles_fall_back_to_primary_only() {
    let segments = vec![segment(
      "s0",
      "rm: cannot remove '/var/cache': Permission denied",
      TokenKind::Error,
      3,
    )];
    let bundles = engine().analyze_bundles(&segments);
    assert!(!bundles.is_empty());
    assert_eq!(bundles[0].primary_cause.label, "PERMISSION_DENIED");
    assert!(bundles[0].secondary_causes.is_empty());
  }
}
