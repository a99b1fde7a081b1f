//! Composable match conditions and contextual classification rules.

use regex::{Regex, RegexBuilder};

use crate::error::EngineError;
use crate::types::{Segment, TokenKind};

/// A compiled text pattern. Case-insensitive and multiline; compilation
/// failures surface at construction, never during evaluation.
pub struct PatternCondition {
  pub pattern: String,
  regex: Regex,
}

impl PatternCondition {
  pub fn new(pattern: &str) -> Result<Self, EngineError> {
    let regex = RegexBuilder::new(pattern)
      .case_insensitive(true)
      .multi_line(true)
      .build()
      .map_err(|source| EngineError::malformed_rule("pattern", pattern, source))?;
    Ok(Self {
      pattern: pattern.to_string(),
      regex,
    })
  }

  /// All matched spans in the segment text.
  pub fn find_evidence(&self, text: &str) -> Vec<String> {
    self
      .regex
      .find_iter(text)
      .map(|m| m.as_str().to_string())
      .collect()
  }

  pub fn is_match(&self, text: &str) -> bool {
    self.regex.is_match(text)
  }
}

/// A composable predicate over one segment. Combinators build a tree;
/// evaluation is pure and short-circuiting.
pub enum Condition {
  Pattern(PatternCondition),
  /// At least `min_count` tokens of any listed kind; with `min_fraction`
  /// set, that share of the segment's tokens must also match.
  TokenKindPresent {
    kinds: Vec<TokenKind>,
    min_count: usize,
    min_fraction: Option<f64>,
  },
  Section(Vec<Regex>),
  Stream(Vec<String>),
  And(Box<Condition>, Box<Condition>),
  Or(Box<Condition>, Box<Condition>),
  Not(Box<Condition>),
}

impl Condition {
  pub fn pattern(pattern: &str) -> Result<Self, EngineError> {
    Ok(Self::Pattern(PatternCondition::new(pattern)?))
  }

  pub fn token_kind(kinds: Vec<TokenKind>, min_count: usize) -> Self {
    Self::TokenKindPresent {
      kinds,
      min_count: min_count.max(1),
      min_fraction: None,
    }
  }

  pub fn token_kind_fraction(
    kinds: Vec<TokenKind>,
    min_count: usize,
    min_fraction: f64,
  ) -> Self {
    Self::TokenKindPresent {
      kinds,
      min_count: min_count.max(1),
      min_fraction: Some(min_fraction),
    }
  }

  pub fn section(patterns: &[&str]) -> Result<Self, EngineError> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for p in patterns {
      let regex = RegexBuilder::new(p)
        .case_insensitive(true)
        .build()
        .map_err(|source| EngineError::malformed_rule("section", p, source))?;
      compiled.push(regex);
    }
    Ok(Self::Section(compiled))
  }

  pub fn stream(streams: &[&str]) -> Self {
    Self::Stream(streams.iter().map(|s| s.to_string()).collect())
  }

  pub fn and(self, other: Condition) -> Self {
    Self::And(Box::new(self), Box::new(other))
  }

  pub fn or(self, other: Condition) -> Self {
    Self::Or(Box::new(self), Box::new(other))
  }

  pub fn negate(self) -> Self {
    Self::Not(Box::new(self))
  }

  pub fn evaluate(&self, segment: &Segment) -> bool {
    match self {
      Self::Pattern(p) => p.is_match(&segment.text),
      Self::TokenKindPresent {
        kinds,
        min_count,
        min_fraction,
      } => {
        let count: usize = kinds.iter().map(|k| segment.count_kind(*k)).sum();
        if count < *min_count {
          return false;
        }
        match min_fraction {
          Some(fraction) => {
            count as f64 / segment.tokens.len().max(1) as f64 >= *fraction
          }
          None => true,
        }
      }
      Self::Section(patterns) => segment
        .section
        .as_deref()
        .map(|section| patterns.iter().any(|p| p.is_match(section)))
        .unwrap_or(false),
      Self::Stream(streams) => segment
        .stream
        .as_deref()
        .map(|stream| streams.iter().any(|s| s == stream))
        .unwrap_or(false),
      Self::And(a, b) => a.evaluate(segment) && b.evaluate(segment),
      Self::Or(a, b) => a.evaluate(segment) || b.evaluate(segment),
      Self::Not(inner) => !inner.evaluate(segment),
    }
  }

  /// Matched text spans supporting a positive evaluation. Negations
  /// contribute no evidence.
  pub fn evidence(&self, segment: &Segment) -> Vec<String> {
    match self {
      Self::Pattern(p) => p.find_evidence(&segment.text),
      Self::TokenKindPresent { kinds, .. } => segment
        .tokens
        .iter()
        .filter(|t| kinds.contains(&t.kind))
        .map(|t| t.text.clone())
        .collect(),
      Self::Section(_) | Self::Stream(_) | Self::Not(_) => Vec::new(),
      Self::And(a, b) => {
        let mut evidence = a.evidence(segment);
        evidence.extend(b.evidence(segment));
        evidence
      }
      Self::Or(a, b) => {
        if a.evaluate(segment) {
          a.evidence(segment)
        } else {
          b.evidence(segment)
        }
      }
    }
  }

  /// First pattern string in declaration order; the default confidence
  /// scorer keys its specificity cache on this.
  pub fn primary_pattern(&self) -> Option<&str> {
    match self {
      Self::Pattern(p) => Some(&p.pattern),
      Self::And(a, b) | Self::Or(a, b) => {
        a.primary_pattern().or_else(|| b.primary_pattern())
      }
      Self::Not(inner) => inner.primary_pattern(),
      _ => None,
    }
  }
}

/// Picks related segment indices for a matched segment.
pub type ContextResolver = Box<dyn Fn(usize, &[Segment]) -> Vec<usize> + Send + Sync>;
/// Overrides the default confidence scoring for a rule.
pub type ConfidenceCalculator = Box<dyn Fn(&Segment, &[Segment]) -> f64 + Send + Sync>;
/// Overrides the default evidence extraction for a rule.
pub type TokenExtractor = Box<dyn Fn(&Segment) -> Vec<String> + Send + Sync>;

/// One match emitted by a rule: the segment, its related context, optional
/// rule-supplied confidence, and the textual evidence.
pub struct RuleMatch {
  pub segment_index: usize,
  pub related_indices: Vec<usize>,
  pub confidence: Option<f64>,
  pub evidence: Vec<String>,
}

/// A named rule binding a condition tree to a cause label. Optional hooks
/// resolve related segments, compute confidence, and extract tokens; absent
/// hooks fall back to the owning classifier's defaults.
pub struct ContextualRule {
  pub name: String,
  pub label: String,
  pub condition: Condition,
  pub context_resolver: Option<ContextResolver>,
  pub confidence_calculator: Option<ConfidenceCalculator>,
  pub token_extractor: Option<TokenExtractor>,
}

impl ContextualRule {
  pub fn new(name: &str, label: &str, condition: Condition) -> Self {
    Self {
      name: name.to_string(),
      label: label.to_string(),
      condition,
      context_resolver: None,
      confidence_calculator: None,
      token_extractor: None,
    }
  }

  pub fn with_context_resolver(mut self, resolver: ContextResolver) -> Self {
    self.context_resolver = Some(resolver);
    self
  }

  pub fn with_confidence_calculator(mut self, calculator: ConfidenceCalculator) -> Self {
    self.confidence_calculator = Some(calculator);
    self
  }

  pub fn with_token_extractor(mut self, extractor: TokenExtractor) -> Self {
    self.token_extractor = Some(extractor);
    self
  }

  pub fn evaluate(&self, segments: &[Segment]) -> Vec<RuleMatch> {
    let mut matches = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
      if !self.condition.evaluate(segment) {
        continue;
      }
      let related_indices = self
        .context_resolver
        .as_ref()
        .map(|resolve| resolve(index, segments))
        .unwrap_or_default();
      let confidence = self
        .confidence_calculator
        .as_ref()
        .map(|calc| calc(segment, segments).clamp(0.0, 1.0));
      let evidence = match &self.token_extractor {
        Some(extract) => extract(segment),
        None => self.condition.evidence(segment),
      };
      matches.push(RuleMatch {
        segment_index: index,
        related_indices,
        confidence,
        evidence,
      });
    }
    matches
  }
}

/// Resolver: all other segments sharing the matched segment's section.
pub fn same_section() -> ContextResolver {
  Box::new(|index, segments| {
    let section = segments[index].section.clone();
    if section.is_none() {
      return Vec::new();
    }
    segments
      .iter()
      .enumerate()
      .filter(|(i, s)| *i != index && s.section == section)
      .map(|(i, _)| i)
      .collect()
  })
}

/// Resolver: segments containing `kind` within `max_lines` of the match.
pub fn kind_within_lines(kind: TokenKind, max_lines: u32) -> ContextResolver {
  Box::new(move |index, segments| {
    let anchor = &segments[index];
    segments
      .iter()
      .enumerate()
      .filter(|(i, s)| {
        *i != index
          && s.contains_kind(kind)
          && line_distance(anchor, s) <= max_lines
      })
      .map(|(i, _)| i)
      .collect()
  })
}

fn line_distance(a: &Segment, b: &Segment) -> u32 {
  if b.start_line > a.end_line {
    b.start_line - a.end_line
  } else if a.start_line > b.end_line {
    a.start_line - b.end_line
  } else {
    0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Token;
  use std::collections::HashMap;

  fn segment(id: &str, text: &str, kind: TokenKind, line: u32) -> Segment {
    Segment {
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
    }
  }

  #[test]
  fn pattern_condition_is_case_insensitive() {
    let cond = Condition::pattern(r"out of memory").unwrap();
    let seg = segment("s0", "FATAL: Out Of Memory in worker", TokenKind::Error, 1);
    assert!(cond.evaluate(&seg));
    assert_eq!(cond.evidence(&seg), vec!["Out Of Memory".to_string()]);
  }

  #[test]
  fn malformed_pattern_fails_at_construction() {
    assert!(Condition::pattern("(unclosed").is_err());
  }

  #[test]
  fn combinators_short_circuit() {
    let seg = segment("s0", "error: compilation failed", TokenKind::Error, 1);
    let both = Condition::pattern("error").unwrap().and(
      Condition::pattern("compilation").unwrap(),
    );
    assert!(both.evaluate(&seg));

    let either = Condition::pattern("nope").unwrap().or(
      Condition::pattern("compilation").unwrap(),
    );
    assert!(either.evaluate(&seg));
    assert_eq!(either.evidence(&seg), vec!["compilation".to_string()]);

    let negated = Condition::pattern("nope").unwrap().negate();
    assert!(negated.evaluate(&seg));
    assert!(negated.evidence(&seg).is_empty());
  }

  #[test]
  fn token_kind_condition_respects_min_count() {
    let mut seg = segment("s0", "warn warn", TokenKind::Warning, 1);
    seg.tokens.push(seg.tokens[0].clone());
    let one = Condition::token_kind(vec![TokenKind::Warning], 1);
    let three = Condition::token_kind(vec![TokenKind::Warning], 3);
    assert!(one.evaluate(&seg));
    assert!(!three.evaluate(&seg));
  }

  #[test]
  fn section_condition_matches_section_name() {
    let mut seg = segment("s0", "error: boom", TokenKind::Error, 1);
    seg.section = Some("Build and test".into());
    let cond = Condition::section(&["build"]).unwrap();
    assert!(cond.evaluate(&seg));
    let other = Condition::section(&["deploy"]).unwrap();
    assert!(!other.evaluate(&seg));
  }

  #[test]
  fn rule_emits_match_with_evidence() {
    let rule = ContextualRule::new(
      "oom",
      "OUT_OF_MEMORY",
      Condition::pattern(r"out of memory|oom[- ]?kill").unwrap(),
    );
    let segments = vec![
      segment("s0", "all good", TokenKind::Info, 1),
      segment("s1", "container oom-killed", TokenKind::Error, 2),
    ];
    let matches = rule.evaluate(&segments);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].segment_index, 1);
    assert!(matches[0].confidence.is_none());
    assert_eq!(matches[0].evidence, vec!["oom-kill".to_string()]);
  }

  #[test]
  fn kind_within_lines_finds_nearby_traces() {
    let rule = ContextualRule::new(
      "oom",
      "OUT_OF_MEMORY",
      Condition::pattern("out of memory").unwrap(),
    )
    .with_context_resolver(kind_within_lines(TokenKind::StackTrace, 10));
    let segments = vec![
      segment("s0", "error: out of memory", TokenKind::Error, 1),
      segment("s1", "Traceback (most recent call last):", TokenKind::StackTrace, 5),
      segment("s2", "Traceback (most recent call last):", TokenKind::StackTrace, 40),
    ];
    let matches = rule.evaluate(&segments);
    assert_eq!(matches[0].related_indices, vec![1]);
  }

  #[test]
  fn primary_pattern_walks_the_tree() {
    let cond = Condition::token_kind(vec![TokenKind::Error], 1)
      .and(Condition::pattern("exit code").unwrap());
    assert_eq!(cond.primary_pattern(), Some("exit code"));
  }
}
