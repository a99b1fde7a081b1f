//! Structured error types for the classification engine.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// A rule referenced an invalid regular expression. Raised at rule
  /// construction, never during evaluation.
  #[error("malformed rule {rule}: pattern {pattern:?}: {source}")]
  MalformedRule {
    rule: String,
    pattern: String,
    #[source]
    source: Box<regex::Error>,
  },

  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn malformed_rule(rule: &str, pattern: &str, source: regex::Error) -> Self {
    Self::MalformedRule {
      rule: rule.to_string(),
      pattern: pattern.to_string(),
      source: Box::new(source),
    }
  }

  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// Severity of a non-fatal structural problem found while grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevel {
  Info,
  Warning,
  Error,
}

/// A structural anomaly recorded during grouping. These never abort the
/// pipeline; they ride along with the grouping outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
  pub level: ValidationLevel,
  pub message: String,
  pub line_number: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub section: Option<String>,
}

impl ValidationIssue {
  pub fn new(level: ValidationLevel, message: impl Into<String>, line_number: u32) -> Self {
    Self {
      level,
      message: message.into(),
      line_number,
      section: None,
    }
  }

  pub fn with_section(mut self, section: impl Into<String>) -> Self {
    self.section = Some(section.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn malformed_rule_names_the_offender() {
    let err = regex::Regex::new("(unclosed").unwrap_err();
    let engine_err = EngineError::malformed_rule("oom", "(unclosed", err);
    let msg = engine_err.to_string();
    assert!(msg.contains("oom"));
    assert!(msg.contains("unclosed"));
  }
}
