//! Eight-signal confidence scoring for rule matches.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::config::MetricWeights;
use crate::types::{Segment, TokenKind};

/// Per-classifier, per-pattern historical accuracy, consumed read-only.
pub type FeedbackHistory = HashMap<String, HashMap<String, f64>>;

/// The eight signals, each in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct ConfidenceMetrics {
  pub token_entropy: f64,
  pub pattern_specificity: f64,
  pub segment_coverage: f64,
  pub segment_score: f64,
  pub context_support: f64,
  pub historical_accuracy: f64,
  pub cross_segment_coherence: f64,
  pub provider_reliability: f64,
}

impl ConfidenceMetrics {
  pub fn weighted(&self, weights: &MetricWeights) -> f64 {
    let sum = self.token_entropy * weights.token_entropy
      + self.pattern_specificity * weights.pattern_specificity
      + self.segment_coverage * weights.segment_coverage
      + self.segment_score * weights.segment_score
      + self.context_support * weights.context_support
      + self.historical_accuracy * weights.historical_accuracy
      + self.cross_segment_coherence * weights.cross_segment_coherence
      + self.provider_reliability * weights.provider_reliability;
    sum.clamp(0.0, 1.0)
  }
}

fn token_importance(kind: TokenKind) -> f64 {
  match kind {
    TokenKind::Error | TokenKind::CiError => 1.0,
    TokenKind::StackTrace
    | TokenKind::StackTraceContinuation
    | TokenKind::TestFailure
    | TokenKind::TestError
    | TokenKind::AssertionFail => 0.9,
    TokenKind::ExitCode | TokenKind::ExitCodeNonZero => 0.8,
    TokenKind::Warning | TokenKind::CiWarning => 0.7,
    TokenKind::Command => 0.6,
    TokenKind::Info | TokenKind::Debug => 0.3,
    TokenKind::SectionStart | TokenKind::SectionEnd | TokenKind::Step => 0.3,
    TokenKind::Default => 0.5,
  }
}

fn default_provider_reliability() -> HashMap<String, f64> {
  let mut table = HashMap::new();
  table.insert("github".to_string(), 0.95);
  table.insert("gitlab".to_string(), 0.90);
  table.insert("jenkins".to_string(), 0.85);
  table.insert("travis".to_string(), 0.85);
  table.insert("circleci".to_string(), 0.85);
  table.insert("azure_pipelines".to_string(), 0.85);
  table.insert("unknown".to_string(), 0.75);
  table
}

/// Computes the eight signals and their weighted combination for one rule
/// match. Pattern specificity is pure per pattern string and cached.
pub struct ConfidenceScorer {
  weights: MetricWeights,
  feedback_history: FeedbackHistory,
  provider_reliability: HashMap<String, f64>,
  specificity_cache: RefCell<HashMap<String, f64>>,
}

impl ConfidenceScorer {
  pub fn new(weights: MetricWeights) -> Self {
    Self {
      weights,
      feedback_history: FeedbackHistory::new(),
      provider_reliability: default_provider_reliability(),
      specificity_cache: RefCell::new(HashMap::new()),
    }
  }

  pub fn with_feedback_history(mut self, history: FeedbackHistory) -> Self {
    self.feedback_history = history;
    self
  }

  pub fn calculate(
    &self,
    matched: &Segment,
    context: &[&Segment],
    pattern: &str,
    matched_text: Option<&str>,
    classifier_id: &str,
  ) -> ConfidenceMetrics {
    ConfidenceMetrics {
      token_entropy: self.token_entropy(matched),
      pattern_specificity: self.pattern_specificity(pattern),
      segment_coverage: Self::segment_coverage(matched, matched_text),
      segment_score: matched.score_normalized(),
      context_support: Self::context_support(matched, context),
      historical_accuracy: self.historical_accuracy(classifier_id, pattern),
      cross_segment_coherence: Self::cross_segment_coherence(matched, context),
      provider_reliability: self
        .provider_reliability
        .get(&matched.provider.to_ascii_lowercase())
        .copied()
        .unwrap_or(0.75),
    }
  }

  pub fn confidence(
    &self,
    matched: &Segment,
    context: &[&Segment],
    pattern: &str,
    matched_text: Option<&str>,
    classifier_id: &str,
  ) -> f64 {
    self
      .calculate(matched, context, pattern, matched_text, classifier_id)
      .weighted(&self.weights)
  }

  /// Rewards a diverse mix of high-importance token kinds.
  fn token_entropy(&self, segment: &Segment) -> f64 {
    if segment.tokens.is_empty() {
      return 0.5;
    }
    let counts = segment.kind_counts();
    let total: usize = counts.values().sum();
    let weighted: f64 = counts
      .iter()
      .map(|(kind, count)| (*count as f64 / total as f64) * token_importance(*kind))
      .sum();
    let diversity = (counts.len() as f64 / 5.0).min(1.0);
    (0.3 + 0.7 * weighted * diversity).min(1.0)
  }

  /// Longer, more anchored, more capture-rich patterns score higher.
  fn pattern_specificity(&self, pattern: &str) -> f64 {
    if let Some(cached) = self.specificity_cache.borrow().get(pattern) {
      return *cached;
    }
    let length_factor = (pattern.len() as f64 / 100.0).min(1.0);
    let meta = r"^$.*+?()[]{}|\";
    let char_class_count = pattern.chars().filter(|c| meta.contains(*c)).count();
    let char_class_factor = (char_class_count as f64 / 10.0).min(1.0);
    let anchors =
      pattern.matches(r"\b").count() + pattern.matches('^').count() + pattern.matches('$').count();
    let anchor_factor = (anchors as f64 / 3.0).min(1.0);
    let captures = pattern.matches('(').count().saturating_sub(pattern.matches("(?:").count());
    let capture_factor = (captures as f64 / 5.0).min(1.0);
    let specificity = 0.4
      + 0.6
        * (0.3 * length_factor
          + 0.3 * char_class_factor
          + 0.2 * anchor_factor
          + 0.2 * capture_factor);
    self
      .specificity_cache
      .borrow_mut()
      .insert(pattern.to_string(), specificity);
    specificity
  }

  /// U-shaped: tiny precise matches and near-total matches both beat vague
  /// mid-range coverage.
  fn segment_coverage(segment: &Segment, matched_text: Option<&str>) -> f64 {
    let matched_len = match matched_text {
      Some(text) if !segment.text.is_empty() => text.len() as f64,
      _ => return 0.5,
    };
    let coverage = matched_len / segment.text.len() as f64;
    if coverage < 0.05 {
      (0.3 + coverage * 4.0).min(1.0)
    } else if coverage > 0.9 {
      (0.7 + (coverage - 0.9) * 3.0).min(1.0)
    } else {
      (0.5 + coverage * 0.5).min(1.0)
    }
  }

  /// Rewards 1-5 correlated segments, high-value kinds among them, and
  /// line proximity to the match.
  fn context_support(matched: &Segment, context: &[&Segment]) -> f64 {
    if context.is_empty() {
      return 0.5;
    }
    let count_factor = (context.len() as f64 / 5.0).min(1.0);
    let high_value_present = context
      .iter()
      .any(|s| s.tokens.iter().any(|t| t.kind.is_error()));
    let close = context
      .iter()
      .filter(|s| s.start_line.abs_diff(matched.start_line) <= 10)
      .count();
    let proximity = 0.3 + 0.7 * ((close as f64 / context.len() as f64).min(1.0));
    let hv = if high_value_present { 0.7 } else { 0.3 };
    (0.5 + 0.5 * (0.4 * count_factor + 0.4 * hv + 0.2 * proximity)).min(1.0)
  }

  fn historical_accuracy(&self, classifier_id: &str, pattern: &str) -> f64 {
    match self.feedback_history.get(classifier_id) {
      Some(history) if !history.is_empty() => history
        .get(pattern)
        .copied()
        .unwrap_or_else(|| history.values().sum::<f64>() / history.len() as f64),
      _ => 0.7,
    }
  }

  /// Rewards section consistency, a dominant shared kind, and a tight
  /// line span across the matched + correlated segments.
  fn cross_segment_coherence(matched: &Segment, context: &[&Segment]) -> f64 {
    if context.is_empty() {
      return 0.5;
    }
    let section_consistent = context.iter().all(|s| s.section == matched.section);
    let section_factor = if section_consistent { 1.0 } else { 0.5 };

    let mut kind_counts: HashMap<TokenKind, usize> = HashMap::new();
    let mut total = 0usize;
    for segment in std::iter::once(&matched).chain(context.iter()) {
      for token in &segment.tokens {
        *kind_counts.entry(token.kind).or_insert(0) += 1;
        total += 1;
      }
    }
    let primary_ratio = if total == 0 {
      0.5
    } else {
      kind_counts.values().max().copied().unwrap_or(0) as f64 / total as f64
    };
    let type_coherence = 0.3 + 0.7 * primary_ratio;

    let min_line = context
      .iter()
      .map(|s| s.start_line)
      .chain(std::iter::once(matched.start_line))
      .min()
      .unwrap_or(0);
    let max_line = context
      .iter()
      .map(|s| s.end_line)
      .chain(std::iter::once(matched.end_line))
      .max()
      .unwrap_or(0);
    let span = max_line - min_line;
    let line_proximity = if span <= 5 {
      0.9
    } else if span <= 20 {
      0.7
    } else if span <= 50 {
      0.5
    } else {
      0.3
    };

    (0.3 + 0.7 * (0.4 * section_factor + 0.4 * type_coherence + 0.2 * line_proximity)).min(1.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Token;

  fn segment(id: &str, text: &str, kinds: &[TokenKind], line: u32) -> Segment {
    let tokens: Vec<Token> = kinds
      .iter()
      .enumerate()
      .map(|(i, kind)| Token {
        kind: *kind,
        text: text.to_string(),
        line_number: line + i as u32,
        section: None,
        stream: None,
        metadata: HashMap::new(),
      })
      .collect();
    Segment {
      id: id.to_string(),
      text: text.to_string(),
      start_line: line,
      end_line: line + kinds.len().saturating_sub(1) as u32,
      tokens,
      provider: "github".into(),
      section: None,
      stream: None,
      job_id: None,
      score: 80.0,
      entropy: 3.0,
      confidence_level: 0.5,
      preceding_context: None,
      following_context: None,
      metadata: HashMap::new(),
    }
  }

  fn scorer() -> ConfidenceScorer {
    ConfidenceScorer::new(MetricWeights::default())
  }

  #[test]
  fn all_metrics_stay_in_unit_range() {
    let s = scorer();
    let matched = segment(
      "s0",
      "error: out of memory while linking",
      &[TokenKind::Error, TokenKind::StackTrace],
      10,
    );
    let ctx_seg = segment("s1", "Traceback (most recent call last):", &[TokenKind::StackTrace], 12);
    let context = vec![&ctx_seg];
    let metrics = s.calculate(&matched, &context, r"out of memory", Some("out of memory"), "oom");
    for value in [
      metrics.token_entropy,
      metrics.pattern_specificity,
      metrics.segment_coverage,
      metrics.segment_score,
      metrics.context_support,
      metrics.historical_accuracy,
      metrics.cross_segment_coherence,
      metrics.provider_reliability,
    ] {
      assert!((0.0..=1.0).contains(&value), "metric out of range: {value}");
    }
    let final_confidence = metrics.weighted(&MetricWeights::default());
    assert!((0.0..=1.0).contains(&final_confidence));
  }

  #[test]
  fn anchored_pattern_is_more_specific_than_bare_word() {
    let s = scorer();
    let vague = s.pattern_specificity("error");
    let anchored = s.pattern_specificity(r"^##\[error\].*(exit code \d+)$");
    assert!(anchored > vague);
  }

  #[test]
  fn specificity_is_cached_and_stable() {
    let s = scorer();
    let first = s.pattern_specificity(r"\berror\b");
    let second = s.pattern_specificity(r"\berror\b");
    assert_eq!(first, second);
    assert_eq!(s.specificity_cache.borrow().len(), 1);
  }

  #[test]
  fn historical_accuracy_defaults_and_averages() {
    let mut history = FeedbackHistory::new();
    history.insert(
      "oom".to_string(),
      HashMap::from([("a".to_string(), 0.9), ("b".to_string(), 0.5)]),
    );
    let s = scorer().with_feedback_history(history);
    // Unknown classifier -> flat default.
    assert!((s.historical_accuracy("other", "a") - 0.7).abs() < 1e-9);
    // Known pattern -> its own accuracy.
    assert!((s.historical_accuracy("oom", "a") - 0.9).abs() < 1e-9);
    // Known classifier, unseen pattern -> history mean.
    assert!((s.historical_accuracy("oom", "zzz") - 0.7).abs() < 1e-9);
  }

  #[test]
  fn unknown_provider_gets_floor_reliability() {
    let s = scorer();
    let mut matched = segment("s0", "error", &[TokenKind::Error], 1);
    matched.provider = "somewhere".into();
    let metrics = s.calculate(&matched, &[], "error", None, "x");
    assert!((metrics.provider_reliability - 0.75).abs() < 1e-9);
  }

  #[test]
  fn nearby_error_context_raises_support() {
    let s = scorer();
    let matched = segment("s0", "error: boom", &[TokenKind::Error], 10);
    let near = segment("s1", "Traceback (most recent call last):", &[TokenKind::StackTrace], 12);
    let far = segment("s2", "info: cleanup", &[TokenKind::Info], 500);
    let strong = s.calculate(&matched, &[&near], "boom", None, "x").context_support;
    let weak = s.calculate(&matched, &[&far], "boom", None, "x").context_support;
    assert!(strong > weak);
  }
}
