//! Sliding-window context enrichment over a stream of segments.

use std::collections::{HashMap, VecDeque};

use crate::config::ContextConfig;
use crate::types::{ContextSummary, Segment, TokenKind};

fn summarize(neighbors: &[&Segment]) -> Option<ContextSummary> {
  if neighbors.is_empty() {
    return None;
  }
  let mut kind_counts: HashMap<TokenKind, usize> = HashMap::new();
  let mut max_severity = 0;
  let mut failure_count = 0;
  for segment in neighbors {
    for token in &segment.tokens {
      *kind_counts.entry(token.kind).or_insert(0) += 1;
      max_severity = max_severity.max(token.severity());
      if token.kind.is_failure() {
        failure_count += 1;
      }
    }
  }
  // Most frequent kind; ties go to the more severe one.
  let dominant_kind = kind_counts
    .iter()
    .max_by(|a, b| a.1.cmp(b.1).then(a.0.severity().cmp(&b.0.severity())))
    .map(|(kind, _)| *kind);
  Some(ContextSummary {
    segment_ids: neighbors.iter().map(|s| s.id.clone()).collect(),
    dominant_kind,
    max_severity,
    failure_count,
  })
}

/// Lazy single-pass analyzer: yields every input segment exactly once, in
/// order, with up to `window_size / 2` neighbors summarized on each side.
/// Buffers at most `window_size` segments at a time.
pub struct ContextAnalyzer<I>
where
  I: Iterator<Item = Segment>,
{
  inner: I,
  buf: VecDeque<Segment>,
  /// Number of already-yielded segments kept at the front as preceding
  /// context for the next yield.
  emitted: usize,
  half: usize,
  done: bool,
}

impl<I> ContextAnalyzer<I>
where
  I: Iterator<Item = Segment>,
{
  pub fn new(inner: I, config: &ContextConfig) -> Self {
    let half = (config.window_size / 2).max(1);
    Self {
      inner,
      buf: VecDeque::with_capacity(config.window_size.max(3)),
      emitted: 0,
      half,
      done: false,
    }
  }
}

impl<I> Iterator for ContextAnalyzer<I>
where
  I: Iterator<Item = Segment>,
{
  type Item = Segment;

  fn next(&mut self) -> Option<Segment> {
    // Fill until the current segment has a full following window or the
    // input runs dry (tail segments get a shrinking window).
    while !self.done && self.buf.len() < self.emitted + 1 + self.half {
      match self.inner.next() {
        Some(segment) => self.buf.push_back(segment),
        None => self.done = true,
      }
    }
    if self.emitted >= self.buf.len() {
      return None;
    }

    let preceding: Vec<&Segment> = self
      .buf
      .range(self.emitted.saturating_sub(self.half)..self.emitted)
      .collect();
    let following_end = (self.emitted + 1 + self.half).min(self.buf.len());
    let following: Vec<&Segment> = self.buf.range(self.emitted + 1..following_end).collect();

    let mut current = self.buf[self.emitted].clone();
    current.preceding_context = summarize(&preceding);
    current.following_context = summarize(&following);

    self.emitted += 1;
    while self.emitted > self.half {
      self.buf.pop_front();
      self.emitted -= 1;
    }
    Some(current)
  }
}

/// Convenience wrapper for already-collected batches.
pub fn enrich(segments: Vec<Segment>, config: &ContextConfig) -> Vec<Segment> {
  ContextAnalyzer::new(segments.into_iter(), config).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Token;

  fn segment(id: &str, kind: TokenKind, line: u32) -> Segment {
    Segment {
      id: id.to_string(),
      tokens: vec![Token {
        kind,
        text: format!("line {line}"),
        line_number: line,
        section: None,
        stream: None,
        metadata: HashMap::new(),
      }],
      text: format!("line {line}"),
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
    }
  }

  fn ids(summary: &Option<ContextSummary>) -> Vec<String> {
    summary.as_ref().map(|s| s.segment_ids.clone()).unwrap_or_default()
  }

  #[test]
  fn yields_every_segment_once_in_order() {
    let input: Vec<Segment> = (0..7)
      .map(|i| segment(&format!("s{i}"), TokenKind::Info, i as u32))
      .collect();
    let out = enrich(input, &ContextConfig { window_size: 5 });
    assert_eq!(out.len(), 7);
    for (i, seg) in out.iter().enumerate() {
      assert_eq!(seg.id, format!("s{i}"));
    }
  }

  #[test]
  fn middle_segment_sees_both_sides() {
    let input: Vec<Segment> = (0..5)
      .map(|i| segment(&format!("s{i}"), TokenKind::Info, i as u32))
      .collect();
    let out = enrich(input, &ContextConfig { window_size: 5 });
    let mid = &out[2];
    assert_eq!(ids(&mid.preceding_context), vec!["s0", "s1"]);
    assert_eq!(ids(&mid.following_context), vec!["s3", "s4"]);
  }

  #[test]
  fn edges_get_shrunk_windows() {
    let input: Vec<Segment> = (0..4)
      .map(|i| segment(&format!("s{i}"), TokenKind::Info, i as u32))
      .collect();
    let out = enrich(input, &ContextConfig { window_size: 5 });
    assert!(out[0].preceding_context.is_none());
    assert_eq!(ids(&out[0].following_context), vec!["s1", "s2"]);
    assert_eq!(ids(&out[3].preceding_context), vec!["s1", "s2"]);
    assert!(out[3].following_context.is_none());
  }

  #[test]
  fn summary_counts_failures_and_severity() {
    let input = vec![
      segment("s0", TokenKind::Error, 1),
      segment("s1", TokenKind::Info, 2),
      segment("s2", TokenKind::StackTrace, 3),
    ];
    let out = enrich(input, &ContextConfig { window_size: 5 });
    let summary = out[1].following_context.as_ref().unwrap();
    assert_eq!(summary.max_severity, TokenKind::StackTrace.severity());
    assert_eq!(summary.failure_count, 1);
    let preceding = out[1].preceding_context.as_ref().unwrap();
    assert_eq!(preceding.dominant_kind, Some(TokenKind::Error));
  }

  #[test]
  fn empty_input_yields_nothing() {
    let out = enrich(vec![], &ContextConfig::default());
    assert!(out.is_empty());
  }
}
