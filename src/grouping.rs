//! Token grouping: structural (section-marker) and buffered (fixed-window)
//! groupers producing scored-later segments plus non-fatal validation issues.

use std::collections::HashMap;

use crate::config::GroupingConfig;
use crate::error::{ValidationIssue, ValidationLevel};
use crate::types::{Segment, Token, TokenKind};

/// Segments plus any structural anomalies found while building them.
#[derive(Debug, Default)]
pub struct GroupingOutcome {
  pub segments: Vec<Segment>,
  pub issues: Vec<ValidationIssue>,
}

/// Deterministic segment id from provider + line span.
pub fn segment_id(provider: &str, start_line: u32, end_line: u32) -> String {
  let hash = blake3::hash(format!("{provider}|{start_line}|{end_line}").as_bytes());
  format!("seg-{}", &hash.to_hex()[..16])
}

fn merged_metadata(tokens: &[Token]) -> HashMap<String, String> {
  let mut merged = HashMap::new();
  for token in tokens {
    for (key, value) in &token.metadata {
      merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
  }
  merged
}

fn build_segment(tokens: Vec<Token>, section: Option<String>) -> Option<Segment> {
  let first = tokens.first()?;
  let start_line = first.line_number;
  let end_line = tokens.last().map(|t| t.line_number).unwrap_or(start_line);
  let metadata = merged_metadata(&tokens);
  let provider = metadata.get("provider").cloned().unwrap_or_default();
  let job_id = metadata.get("job_id").cloned();
  let stream = first.stream.clone();
  let text = tokens
    .iter()
    .map(|t| t.text.as_str())
    .collect::<Vec<_>>()
    .join("\n");
  Some(Segment {
    id: segment_id(&provider, start_line, end_line),
    text,
    start_line,
    end_line,
    tokens,
    provider,
    section,
    stream,
    job_id,
    score: 0.0,
    entropy: 0.0,
    confidence_level: 0.0,
    preceding_context: None,
    following_context: None,
    metadata,
  })
}

fn section_name(token: &Token) -> String {
  if let Some(section) = &token.section {
    return section.clone();
  }
  let text = token.text.trim();
  if let Some(rest) = text.strip_prefix("##[group]") {
    return rest.trim().to_string();
  }
  if let Some(rest) = text.strip_prefix("##[endgroup]") {
    return rest.trim().to_string();
  }
  if let Some(rest) = text.strip_prefix("section_start:") {
    return rest.splitn(2, ':').nth(1).unwrap_or(rest).trim().to_string();
  }
  if let Some(rest) = text.strip_prefix("section_end:") {
    return rest.splitn(2, ':').nth(1).unwrap_or(rest).trim().to_string();
  }
  text.to_string()
}

struct OpenSection {
  name: String,
  tokens: Vec<Token>,
}

/// Groups tokens by explicit section markers. Duplicate starts nest with a
/// WARNING issue; orphan ends are dropped with an ERROR issue; sections left
/// open at end of input are auto-closed with an INFO issue.
pub struct StructuralGrouper;

impl StructuralGrouper {
  pub fn group(tokens: Vec<Token>) -> GroupingOutcome {
    let mut outcome = GroupingOutcome::default();
    let mut stack: Vec<OpenSection> = Vec::new();

    for token in tokens {
      match token.kind {
        TokenKind::SectionStart => {
          let name = section_name(&token);
          if stack.iter().any(|open| open.name == name) {
            outcome.issues.push(
              ValidationIssue::new(
                ValidationLevel::Warning,
                format!("duplicate section start: {name}"),
                token.line_number,
              )
              .with_section(name.clone()),
            );
          }
          stack.push(OpenSection {
            name,
            tokens: vec![token],
          });
        }
        TokenKind::SectionEnd => {
          let name = section_name(&token);
          let matches_top = stack
            .last()
            .map(|open| open.name == name || name.is_empty())
            .unwrap_or(false);
          if matches_top {
            if let Some(mut open) = stack.pop() {
              open.tokens.push(token);
              if let Some(seg) = build_segment(open.tokens, Some(open.name)) {
                outcome.segments.push(seg);
              }
            }
          } else {
            outcome.issues.push(
              ValidationIssue::new(
                ValidationLevel::Error,
                format!("orphan section end: {name}"),
                token.line_number,
              )
              .with_section(name),
            );
          }
        }
        _ => {
          if let Some(open) = stack.last_mut() {
            open.tokens.push(token);
          } else if let Some(seg) = build_segment(vec![token], None) {
            outcome.segments.push(seg);
          }
        }
      }
    }

    while let Some(open) = stack.pop() {
      let last_line = open.tokens.last().map(|t| t.line_number).unwrap_or(0);
      outcome.issues.push(
        ValidationIssue::new(
          ValidationLevel::Info,
          format!("section auto-closed at end of input: {}", open.name),
          last_line,
        )
        .with_section(open.name.clone()),
      );
      if let Some(seg) = build_segment(open.tokens, Some(open.name)) {
        outcome.segments.push(seg);
      }
    }

    outcome.segments.sort_by_key(|s| s.start_line);
    outcome
  }
}

/// Groups tokens into fixed-size windows, breaking early on section or
/// stream changes. Two adjacent high-severity failure tokens bridge a
/// boundary so that one failure is not split across segments.
pub struct BufferedGrouper {
  window: usize,
}

impl BufferedGrouper {
  pub fn new(config: &GroupingConfig) -> Self {
    Self {
      window: config.buffered_window.max(1),
    }
  }

  fn bridges(previous: &Token, next: &Token) -> bool {
    previous.kind.is_error() && next.kind.is_error()
  }

  fn boundary(previous: &Token, next: &Token) -> bool {
    (previous.section != next.section || previous.stream != next.stream)
      && !Self::bridges(previous, next)
  }

  pub fn group(&self, tokens: Vec<Token>) -> GroupingOutcome {
    let mut outcome = GroupingOutcome::default();
    let mut buffer: Vec<Token> = Vec::new();

    for token in tokens {
      let flush = match buffer.last() {
        Some(previous) => buffer.len() >= self.window || Self::boundary(previous, &token),
        None => false,
      };
      if flush {
        let section = buffer.first().and_then(|t| t.section.clone());
        if let Some(seg) = build_segment(std::mem::take(&mut buffer), section) {
          outcome.segments.push(seg);
        }
      }
      buffer.push(token);
    }
    let section = buffer.first().and_then(|t| t.section.clone());
    if let Some(seg) = build_segment(buffer, section) {
      outcome.segments.push(seg);
    }

    outcome
  }
}
