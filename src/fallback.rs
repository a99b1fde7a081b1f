//! Heuristic best-effort classification when no rule produced a prediction.

use std::collections::HashMap;

use regex::RegexBuilder;

use crate::config::FallbackConfig;
use crate::error::EngineError;
use crate::types::{Metadata, RootCausePrediction, Segment, TokenKind};

pub const FALLBACK_CLASSIFIER_ID: &str = "fallback";

struct Heuristic {
  regex: regex::Regex,
  label: &'static str,
}

fn heuristics() -> Result<Vec<Heuristic>, EngineError> {
  let table: &[(&str, &str)] = &[
    (
      r"permission denied|access denied|not authorized",
      "PERMISSION_DENIED",
    ),
    (
      r"out of memory|java\.lang\.OutOfMemoryError|Killed.*\(Out of memory\)",
      "OUT_OF_MEMORY",
    ),
    (
      r"No such file or directory|file not found|cannot find|missing file",
      "MISSING_FILE",
    ),
    (
      r"connection timed out|deadline exceeded|operation timed out",
      "TIMEOUT",
    ),
    (
      r"curl: \(\d+\)|wget: .*failed|unable to download",
      "DOWNLOAD_FAILURE",
    ),
    (
      r"syntax error|unexpected token|unexpected end of input",
      "SYNTAX_ERROR",
    ),
    (
      r"version conflict|incompatible version|wrong version",
      "VERSION_CONFLICT",
    ),
    (
      r"config(?:uration)? (?:invalid|error|incorrect)",
      "CONFIGURATION_ERROR",
    ),
    (
      r"not enough (?:disk|space)|no space left on device",
      "DISK_SPACE",
    ),
    (
      r"network (?:error|unreachable|failure)|failed to connect",
      "NETWORK_ERROR",
    ),
  ];
  table
    .iter()
    .map(|(pattern, label)| {
      RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|regex| Heuristic { regex, label })
        .map_err(|source| EngineError::malformed_rule("fallback-heuristic", pattern, source))
    })
    .collect()
}

/// Activates only when the registry produced nothing. Confidence stays
/// strictly below the configured ceiling.
pub struct FallbackClassifier {
  config: FallbackConfig,
  heuristics: Vec<Heuristic>,
}

impl FallbackClassifier {
  pub fn new(config: FallbackConfig) -> Result<Self, EngineError> {
    Ok(Self {
      config,
      heuristics: heuristics()?,
    })
  }

  pub fn classify(&self, segments: &[Segment]) -> Vec<RootCausePrediction> {
    if segments.is_empty() {
      return Vec::new();
    }

    let mut significant: Vec<&Segment> = segments
      .iter()
      .filter(|s| s.score_normalized() >= self.config.score_threshold)
      .collect();
    if significant.is_empty() {
      significant = segments.iter().collect();
    }
    // Highest-scoring segments first, however many crossed the threshold.
    significant.sort_by(|a, b| {
      b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    significant.truncate(self.config.max_segments);

    let mut predictions: Vec<RootCausePrediction> = significant
      .iter()
      .map(|segment| self.predict(segment))
      .collect();
    predictions.sort_by(|a, b| {
      b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    predictions.truncate(self.config.max_segments);
    predictions
  }

  fn predict(&self, segment: &Segment) -> RootCausePrediction {
    let (label, heuristic_confidence) = self.suggest_label(segment);

    // Strictly below the ceiling, even at a perfect segment score.
    let cap = self.config.confidence_ceiling - 0.01;
    let base_confidence = (0.3 + segment.score_normalized() * 0.3).min(cap);
    let confidence = if label == "UNCLASSIFIED" {
      base_confidence
    } else {
      (base_confidence + heuristic_confidence * 0.2).min(cap)
    };

    let mut provider_context = HashMap::new();
    provider_context.insert("provider".to_string(), segment.provider.clone());
    let mut metadata = Metadata::new();
    metadata.insert("is_fallback".into(), serde_json::json!(true));
    metadata.insert(
      "fallback_reason".into(),
      serde_json::json!("no_explicit_rule_match"),
    );
    metadata.insert("segment_score".into(), serde_json::json!(segment.score));

    RootCausePrediction {
      label: label.to_string(),
      confidence,
      segment_ids: vec![segment.id.clone()],
      segment_references: Vec::new(),
      supporting_tokens: diagnostic_tokens(segment),
      provider_context,
      metadata,
      classifier_id: Some(FALLBACK_CLASSIFIER_ID.to_string()),
    }
  }

  fn suggest_label(&self, segment: &Segment) -> (&'static str, f64) {
    let mut best_label = "UNCLASSIFIED";
    let mut best_confidence = 0.0;
    if !segment.text.is_empty() {
      for heuristic in &self.heuristics {
        if let Some(found) = heuristic.regex.find(&segment.text) {
          let ratio = found.len() as f64 / segment.text.len() as f64;
          let confidence = 0.4 + ratio * 0.3 + 0.3;
          if confidence > best_confidence {
            best_confidence = confidence;
            best_label = heuristic.label;
          }
        }
      }
    }

    if best_label == "UNCLASSIFIED" {
      let errors = segment.count_kind(TokenKind::Error) + segment.count_kind(TokenKind::CiError);
      let commands = segment.count_kind(TokenKind::Command);
      let traces = segment.count_kind(TokenKind::StackTrace)
        + segment.count_kind(TokenKind::StackTraceContinuation);
      let warnings =
        segment.count_kind(TokenKind::Warning) + segment.count_kind(TokenKind::CiWarning);
      if errors > 0 && commands > 0 {
        return ("COMMAND_FAILURE", 0.3);
      }
      if errors > 0 && traces > 0 {
        return ("RUNTIME_ERROR", 0.4);
      }
      if warnings > 3 {
        return ("CONFIGURATION_WARNING", 0.25);
      }
    }
    (best_label, best_confidence)
  }
}

/// Error texts first, then warnings, then an exit code, then a snippet.
fn diagnostic_tokens(segment: &Segment) -> Vec<String> {
  let mut diagnostics: Vec<String> = segment
    .tokens
    .iter()
    .filter(|t| matches!(t.kind, TokenKind::Error | TokenKind::CiError))
    .take(2)
    .map(|t| t.text.clone())
    .collect();
  if diagnostics.is_empty() {
    diagnostics.extend(
      segment
        .tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::Warning | TokenKind::CiWarning))
        .take(2)
        .map(|t| t.text.clone()),
    );
  }
  diagnostics.extend(
    segment
      .tokens
      .iter()
      .filter(|t| {
        matches!(t.kind, TokenKind::ExitCode | TokenKind::ExitCodeNonZero)
      })
      .take(1)
      .map(|t| t.text.clone()),
  );
  if diagnostics.is_empty() && !segment.text.is_empty() {
    let snippet: String = segment.text.chars().take(100).collect();
    let truncated = segment.text.chars().count() > 100;
    diagnostics.push(if truncated {
      format!("{}...", snippet.trim())
    } else {
      snippet.trim().to_string()
    });
  }
  diagnostics
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Token;

  fn segment(id: &str, text: &str, kind: TokenKind, score: f64) -> Segment {
    Segment {
      id: id.to_string(),
      tokens: vec![Token {
        kind,
        text: text.to_string(),
        line_number: 1,
        section: None,
        stream: None,
        metadata: HashMap::new(),
      }],
      text: text.to_string(),
      start_line: 1,
      end_line: 1,
      provider: "github".into(),
      section: None,
      stream: None,
      job_id: None,
      score,
      entropy: 3.0,
      confidence_level: 0.5,
      preceding_context: None,
      following_context: None,
      metadata: HashMap::new(),
    }
  }

  fn classifier() -> FallbackClassifier {
    FallbackClassifier::new(FallbackConfig::default()).unwrap()
  }

  #[test]
  fn heuristic_labels_permission_problems() {
    let out = classifier().classify(&[segment(
      "s0",
      "mkdir: cannot create directory: Permission denied",
      TokenKind::Error,
      100.0,
    )]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].label, "PERMISSION_DENIED");
    assert!(out[0].confidence < 0.6);
  }

  #[test]
  fn confidence_stays_strictly_below_ceiling() {
    let out = classifier().classify(&[segment(
      "s0",
      "out of memory: killed",
      TokenKind::CiError,
      210.0,
    )]);
    assert!(out[0].confidence < FallbackConfig::default().confidence_ceiling);
  }

  #[test]
  fn token_kind_heuristics_back_up_the_regex_ladder() {
    let mut seg = segment("s0", "$ make all\nerror: something odd", TokenKind::Command, 65.0);
    seg.tokens.push(Token {
      kind: TokenKind::Error,
      text: "error: something odd".into(),
      line_number: 2,
      section: None,
      stream: None,
      metadata: HashMap::new(),
    });
    let out = classifier().classify(&[seg]);
    assert_eq!(out[0].label, "COMMAND_FAILURE");
  }

  #[test]
  fn unmatched_segments_fall_back_to_unclassified() {
    let out = classifier().classify(&[segment(
      "s0",
      "something unusual happened here",
      TokenKind::Default,
      55.0,
    )]);
    assert_eq!(out[0].label, "UNCLASSIFIED");
    assert!(!out[0].supporting_tokens.is_empty());
  }

  #[test]
  fn highest_scoring_segments_win_when_many_are_significant() {
    // All four clear the significance threshold; the best-scored one sits
    // last in input order and must still make the cut.
    let segments = vec![
      segment("s0", "warning: deprecated flag", TokenKind::Warning, 50.0),
      segment("s1", "warning: old toolchain", TokenKind::Warning, 55.0),
      segment("s2", "error: boom", TokenKind::Error, 100.0),
      segment("s3", "##[error]job failed hard", TokenKind::CiError, 210.0),
    ];
    let out = classifier().classify(&segments);
    assert_eq!(out.len(), 3);
    assert!(out.iter().any(|p| p.segment_ids == vec!["s3".to_string()]));
    assert!(!out.iter().any(|p| p.segment_ids == vec!["s0".to_string()]));
  }

  #[test]
  fn low_scores_still_produce_top_three() {
    let segments = vec![
      segment("s0", "info a", TokenKind::Info, 10.0),
      segment("s1", "info b", TokenKind::Info, 30.0),
      segment("s2", "info c", TokenKind::Info, 20.0),
      segment("s3", "info d", TokenKind::Info, 5.0),
    ];
    let out = classifier().classify(&segments);
    assert_eq!(out.len(), 3);
    // Best-scored segments considered first.
    assert!(out.iter().any(|p| p.segment_ids == vec!["s1".to_string()]));
  }

  #[test]
  fn empty_input_produces_nothing() {
    assert!(classifier().classify(&[]).is_empty());
  }
}
