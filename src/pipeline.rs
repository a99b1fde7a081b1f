//! Line-to-segment pipeline: tokenize, group, enrich, score.

use tracing::warn;

use crate::config::EngineConfig;
use crate::context;
use crate::error::{EngineError, ValidationIssue};
use crate::grouping::{BufferedGrouper, StructuralGrouper};
use crate::scoring;
use crate::tokenizer::Tokenizer;
use crate::types::{LogLine, Segment, TokenKind};

/// Scored, context-enriched segments plus grouping anomalies.
pub struct PipelineOutput {
  pub segments: Vec<Segment>,
  pub issues: Vec<ValidationIssue>,
}

/// One pass from normalized log lines to classification-ready segments.
/// The grouper is picked per batch: structural when section markers are
/// present, buffered otherwise.
pub struct Pipeline {
  tokenizer: Tokenizer,
  buffered: BufferedGrouper,
  config: EngineConfig,
}

impl Pipeline {
  pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
    Ok(Self {
      tokenizer: Tokenizer::new(&config.tokenizer)?,
      buffered: BufferedGrouper::new(&config.grouping),
      config,
    })
  }

  pub fn process(&mut self, lines: &[LogLine]) -> PipelineOutput {
    let tokens = self.tokenizer.tokenize(lines);

    let has_sections = tokens.iter().any(|t| t.kind == TokenKind::SectionStart);
    let outcome = if has_sections {
      StructuralGrouper::group(tokens)
    } else {
      self.buffered.group(tokens)
    };
    for issue in &outcome.issues {
      warn!(level = ?issue.level, line = issue.line_number, "{}", issue.message);
    }

    let mut segments = context::enrich(outcome.segments, &self.config.context);
    scoring::score_all(&mut segments);

    PipelineOutput {
      segments,
      issues: outcome.issues,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn line(n: u32, text: &str) -> LogLine {
    LogLine {
      line_number: n,
      raw_text: text.to_string(),
      provider: "github".to_string(),
      level: None,
      timestamp: None,
      section: None,
      step_name: None,
      stream_type: None,
      job_id: None,
      metadata: HashMap::new(),
    }
  }

  #[test]
  fn sectioned_logs_use_structural_grouping() {
    let mut pipeline = Pipeline::new(EngineConfig::default()).unwrap();
    let lines = vec![
      line(1, "##[group]Build"),
      line(2, "error: compilation failed"),
      line(3, "##[endgroup]"),
      line(4, "##[group]Test"),
      line(5, "all tests passed"),
      line(6, "##[endgroup]"),
    ];
    let out = pipeline.process(&lines);
    assert_eq!(out.segments.len(), 2);
    assert_eq!(out.segments[0].section.as_deref(), Some("Build"));
    assert!(out.issues.is_empty());
    // Scored and enriched.
    assert!(out.segments[0].score > 0.0);
    assert!(out.segments[0].following_context.is_some());
  }

  #[test]
  fn plain_logs_use_buffered_grouping() {
    let mut pipeline = Pipeline::new(EngineConfig::default()).unwrap();
    let lines: Vec<LogLine> = (1..=5)
      .map(|n| line(n, &format!("info: step {n}")))
      .collect();
    let out = pipeline.process(&lines);
    assert_eq!(out.segments.len(), 1);
    assert_eq!(out.segments[0].tokens.len(), 5);
  }

  #[test]
  fn empty_input_produces_no_segments() {
    let mut pipeline = Pipeline::new(EngineConfig::default()).unwrap();
    let out = pipeline.process(&[]);
    assert!(out.segments.is_empty());
  }
}
