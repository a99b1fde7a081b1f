//! Segment scoring: entropy, mean severity, derived confidence level.

use std::collections::HashMap;

use crate::types::Segment;

/// Shannon entropy (base 2) of the character distribution of `text`.
/// Empty text has entropy 0.
pub fn shannon_entropy(text: &str) -> f64 {
  if text.is_empty() {
    return 0.0;
  }
  let mut counts: HashMap<char, usize> = HashMap::new();
  let mut total = 0usize;
  for ch in text.chars() {
    *counts.entry(ch).or_insert(0) += 1;
    total += 1;
  }
  let total = total as f64;
  let mut entropy = 0.0;
  for &count in counts.values() {
    let p = count as f64 / total;
    entropy -= p * p.log2();
  }
  entropy
}

fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

/// Scores one segment in place. A segment is scored exactly once, after
/// context enrichment; the scorer is the only writer of these fields.
pub fn score_segment(segment: &mut Segment) {
  let severity_sum: u32 = segment.tokens.iter().map(|t| t.severity()).sum();
  let count = segment.tokens.len().max(1) as f64;
  segment.score = round2(severity_sum as f64 / count);

  segment.entropy = shannon_entropy(&segment.text);

  let noise_factor = (1.0 - segment.entropy / 10.0).max(0.0);
  segment.confidence_level = round2((segment.score / 100.0 * noise_factor).min(1.0));
}

/// Scores every segment in the batch.
pub fn score_all(segments: &mut [Segment]) {
  for segment in segments.iter_mut() {
    score_segment(segment);
  }
}
