//! Line tokenization: provider pattern tables + single-line conflict resolution.

use std::collections::{HashMap, VecDeque};

use regex::Regex;

use crate::config::TokenizerConfig;
use crate::error::EngineError;
use crate::types::{LogLine, Token, TokenKind};

fn pattern(kind: TokenKind, re: &str) -> Result<(TokenKind, Regex), EngineError> {
  Regex::new(re)
    .map(|regex| (kind, regex))
    .map_err(|source| EngineError::malformed_rule("tokenizer-pattern", re, source))
}

fn github_patterns() -> Result<Vec<(TokenKind, Regex)>, EngineError> {
  Ok(vec![
    pattern(TokenKind::SectionStart, r"^##\[group\]")?,
    pattern(TokenKind::SectionEnd, r"^##\[endgroup\]")?,
    pattern(TokenKind::CiError, r"##\[error\]")?,
    pattern(TokenKind::CiWarning, r"##\[warning\]")?,
    pattern(TokenKind::Command, r"^\[command\]")?,
  ])
}

fn gitlab_patterns() -> Result<Vec<(TokenKind, Regex)>, EngineError> {
  Ok(vec![
    pattern(TokenKind::SectionStart, r"^section_start:\d+:")?,
    pattern(TokenKind::SectionEnd, r"^section_end:\d+:")?,
    pattern(TokenKind::CiError, r"^ERROR: ")?,
    pattern(TokenKind::Command, r"^\$ ")?,
  ])
}

fn generic_patterns() -> Result<Vec<(TokenKind, Regex)>, EngineError> {
  Ok(vec![
    pattern(
      TokenKind::StackTrace,
      r"(?i)Traceback \(most recent call last\)|Exception in thread|panicked at",
    )?,
    pattern(TokenKind::TestError, r"(?i)tests? errored|^ERROR: test_")?,
    pattern(
      TokenKind::TestFailure,
      r"(?i)^FAIL(ED)?[:\s]|tests? failed",
    )?,
    pattern(
      TokenKind::AssertionFail,
      r"(?i)AssertionError|assertion failed",
    )?,
    pattern(
      TokenKind::ExitCodeNonZero,
      r"(?i)exit(ed)?\s+(with\s+)?code\s+[1-9]\d*|job failed",
    )?,
    pattern(TokenKind::ExitCode, r"(?i)exit(ed)?\s+(with\s+)?code\s+0\b")?,
    pattern(TokenKind::Command, r"^\s*\$\s")?,
    pattern(TokenKind::Error, r"(?i)\berror\b")?,
    pattern(TokenKind::Warning, r"(?i)\bwarn(ing)?\b")?,
    pattern(TokenKind::Info, r"(?i)\binfo\b")?,
    pattern(TokenKind::Debug, r"(?i)\bdebug\b")?,
  ])
}

fn kind_for_level(level: &str) -> Option<TokenKind> {
  match level.to_ascii_lowercase().as_str() {
    "error" | "err" | "fatal" => Some(TokenKind::Error),
    "warning" | "warn" => Some(TokenKind::Warning),
    "info" | "notice" => Some(TokenKind::Info),
    "debug" | "trace" => Some(TokenKind::Debug),
    _ => None,
  }
}

/// Picks the single winning kind for one line from the set of pattern
/// candidates, with provider markers taking absolute precedence and a rolling
/// history of resolved kinds driving stack-trace continuation.
pub struct ConflictResolver {
  history: VecDeque<TokenKind>,
  depth: usize,
  frame_shape: Regex,
}

impl ConflictResolver {
  pub fn new(depth: usize) -> Result<Self, EngineError> {
    let frame_shape = Regex::new(r#"^(at\s+\S|Caused by|\.\.\.\s|File ")"#)
      .map_err(|source| EngineError::malformed_rule("frame-shape", "frame-shape", source))?;
    Ok(Self {
      history: VecDeque::with_capacity(depth),
      depth,
      frame_shape,
    })
  }

  /// Tie-break rank for kinds that share a severity value. Lower wins.
  fn rank(kind: TokenKind) -> u32 {
    match kind {
      TokenKind::StackTrace => 1,
      TokenKind::TestError => 2,
      TokenKind::TestFailure => 3,
      TokenKind::Error => 4,
      TokenKind::CiError => 5,
      TokenKind::AssertionFail => 6,
      TokenKind::ExitCodeNonZero => 7,
      TokenKind::Warning => 8,
      TokenKind::Info => 9,
      TokenKind::SectionStart | TokenKind::SectionEnd => 10,
      TokenKind::Step | TokenKind::Command => 11,
      TokenKind::Default => 99,
      _ => 50,
    }
  }

  fn is_continuation(&self, text: &str) -> bool {
    if text.trim().is_empty() {
      return false;
    }
    if text.starts_with(char::is_whitespace) {
      return true;
    }
    self.frame_shape.is_match(text.trim_start())
  }

  fn in_stack_trace(&self) -> bool {
    matches!(
      self.history.back(),
      Some(TokenKind::StackTrace) | Some(TokenKind::StackTraceContinuation)
    )
  }

  pub fn resolve(&mut self, provider: &str, text: &str, candidates: &[TokenKind]) -> TokenKind {
    let resolved = self.resolve_inner(provider, text, candidates);
    if self.history.len() == self.depth {
      self.history.pop_front();
    }
    self.history.push_back(resolved);
    resolved
  }

  fn resolve_inner(&self, provider: &str, text: &str, candidates: &[TokenKind]) -> TokenKind {
    // Provider literal markers short-circuit everything else.
    match provider {
      "github" | "github_actions" => {
        if text.contains("##[error]") {
          return TokenKind::CiError;
        }
        if text.contains("##[warning]") {
          return TokenKind::CiWarning;
        }
      }
      "gitlab" | "gitlab_ci" => {
        if text.starts_with("ERROR:") {
          return TokenKind::CiError;
        }
      }
      _ => {}
    }

    // A stack-trace opener keeps claiming indented / frame-shaped lines
    // until a blank or ordinary line breaks the run.
    if candidates.iter().all(|k| *k != TokenKind::StackTrace)
      && self.in_stack_trace()
      && self.is_continuation(text)
    {
      return TokenKind::StackTraceContinuation;
    }

    candidates
      .iter()
      .copied()
      .min_by(|a, b| {
        b.severity()
          .cmp(&a.severity())
          .then(Self::rank(*a).cmp(&Self::rank(*b)))
      })
      .unwrap_or(TokenKind::Default)
  }
}

/// Provider-aware tokenizer: one token per line, always. Unmatched lines
/// become `Default` tokens, never errors.
pub struct Tokenizer {
  provider_tables: HashMap<&'static str, Vec<(TokenKind, Regex)>>,
  generic: Vec<(TokenKind, Regex)>,
  resolver: ConflictResolver,
}

impl Tokenizer {
  pub fn new(config: &TokenizerConfig) -> Result<Self, EngineError> {
    let mut provider_tables = HashMap::new();
    provider_tables.insert("github", github_patterns()?);
    provider_tables.insert("gitlab", gitlab_patterns()?);
    Ok(Self {
      provider_tables,
      generic: generic_patterns()?,
      resolver: ConflictResolver::new(config.history_depth)?,
    })
  }

  fn table_for(&self, provider: &str) -> Option<&Vec<(TokenKind, Regex)>> {
    match provider {
      "github" | "github_actions" => self.provider_tables.get("github"),
      "gitlab" | "gitlab_ci" => self.provider_tables.get("gitlab"),
      _ => None,
    }
  }

  /// Tokenizes one line. Collects every matching kind as a candidate, then
  /// lets the resolver pick the winner.
  pub fn tokenize_line(&mut self, line: &LogLine) -> Token {
    let mut candidates: Vec<TokenKind> = Vec::new();
    if let Some(table) = self.table_for(&line.provider) {
      for (kind, regex) in table {
        if regex.is_match(&line.raw_text) {
          candidates.push(*kind);
        }
      }
    }
    for (kind, regex) in &self.generic {
      if regex.is_match(&line.raw_text) && !candidates.contains(kind) {
        candidates.push(*kind);
      }
    }
    if candidates.is_empty() {
      if let Some(kind) = line.level.as_deref().and_then(kind_for_level) {
        candidates.push(kind);
      }
    }

    let kind = self
      .resolver
      .resolve(&line.provider, &line.raw_text, &candidates);

    let mut metadata = line.metadata.clone();
    metadata.insert("provider".to_string(), line.provider.clone());
    if let Some(job_id) = &line.job_id {
      metadata.insert("job_id".to_string(), job_id.clone());
    }
    if let Some(step) = &line.step_name {
      metadata.insert("step_name".to_string(), step.clone());
    }
    if let Some(ts) = &line.timestamp {
      metadata.insert("timestamp".to_string(), ts.clone());
    }

    Token {
      kind,
      text: line.raw_text.clone(),
      line_number: line.line_number,
      section: line.section.clone(),
      stream: line.stream_type.clone(),
      metadata,
    }
  }

  pub fn tokenize(&mut self, lines: &[LogLine]) -> Vec<Token> {
    lines.iter().map(|l| self.tokenize_line(l)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn line(provider: &str, n: u32, text: &str) -> LogLine {
    LogLine {
      line_number: n,
      raw_text: text.to_string(),
      provider: provider.to_string(),
      level: None,
      timestamp: None,
      section: None,
      step_name: None,
      stream_type: None,
      job_id: None,
      metadata: HashMap::new(),
    }
  }

  fn tokenizer() -> Tokenizer {
    Tokenizer::new(&TokenizerConfig::default()).unwrap()
  }

  #[test]
  fn github_error_marker_wins_over_everything() {
    let mut t = tokenizer();
    // "error" + "failed" both match; the CI marker short-circuits.
    let tok = t.tokenize_line(&line("github", 1, "##[error]Tests failed with error"));
    assert_eq!(tok.kind, TokenKind::CiError);
  }

  #[test]
  fn gitlab_error_prefix_maps_to_ci_error() {
    let mut t = tokenizer();
    let tok = t.tokenize_line(&line("gitlab", 1, "ERROR: Job failed: exit code 1"));
    assert_eq!(tok.kind, TokenKind::CiError);
  }

  #[test]
  fn highest_severity_candidate_wins() {
    let mut t = tokenizer();
    // Matches both TestFailure (160) and Error (100).
    let tok = t.tokenize_line(&line("github", 1, "FAIL: test_api raised an error"));
    assert_eq!(tok.kind, TokenKind::TestFailure);
  }

  #[test]
  fn unmatched_line_is_default_not_error() {
    let mut t = tokenizer();
    let tok = t.tokenize_line(&line("github", 1, "Fetching origin"));
    assert_eq!(tok.kind, TokenKind::Default);
  }

  #[test]
  fn level_field_backstops_pattern_misses() {
    let mut t = tokenizer();
    let mut l = line("jenkins", 1, "something odd happened");
    l.level = Some("warning".to_string());
    assert_eq!(t.tokenize_line(&l).kind, TokenKind::Warning);
  }

  #[test]
  fn stack_trace_continuation_follows_opener() {
    let mut t = tokenizer();
    let opener = t.tokenize_line(&line(
      "github",
      1,
      "Traceback (most recent call last):",
    ));
    assert_eq!(opener.kind, TokenKind::StackTrace);

    let frame = t.tokenize_line(&line("github", 2, "  File \"app.py\", line 3"));
    assert_eq!(frame.kind, TokenKind::StackTraceContinuation);

    let deeper = t.tokenize_line(&line("github", 3, "    raise ValueError(\"boom\")"));
    assert_eq!(deeper.kind, TokenKind::StackTraceContinuation);

    // Blank line breaks the run.
    let blank = t.tokenize_line(&line("github", 4, ""));
    assert_eq!(blank.kind, TokenKind::Default);
    let after = t.tokenize_line(&line("github", 5, "  indented but out of trace"));
    assert_ne!(after.kind, TokenKind::StackTraceContinuation);
  }

  #[test]
  fn section_markers_are_structural() {
    let mut t = tokenizer();
    assert_eq!(
      t.tokenize_line(&line("github", 1, "##[group]Build")).kind,
      TokenKind::SectionStart
    );
    assert_eq!(
      t.tokenize_line(&line("github", 2, "##[endgroup]")).kind,
      TokenKind::SectionEnd
    );
    assert_eq!(
      t.tokenize_line(&line("gitlab", 3, "section_start:1700000000:build")).kind,
      TokenKind::SectionStart
    );
  }

  #[test]
  fn provider_metadata_rides_on_tokens() {
    let mut t = tokenizer();
    let mut l = line("github", 7, "error: boom");
    l.job_id = Some("job-42".to_string());
    let tok = t.tokenize_line(&l);
    assert_eq!(tok.metadata.get("provider").unwrap(), "github");
    assert_eq!(tok.metadata.get("job_id").unwrap(), "job-42");
  }
}
