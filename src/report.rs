//! Traceable segment references and the end-of-run summary report.

use serde::Serialize;

use crate::types::{RootCausePrediction, Segment};

/// Rich reference to a log segment, with a provider deep link when one can
/// be constructed from the segment's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReference {
  pub segment_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub job_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub section: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub step_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub line_range: Option<[u32; 2]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timestamp_range: Option<[String; 2]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stream: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

impl SegmentReference {
  pub fn from_segment(segment: &Segment) -> Self {
    let timestamps: Vec<&String> = segment
      .tokens
      .iter()
      .filter_map(|t| t.metadata.get("timestamp"))
      .collect();
    let timestamp_range = match (timestamps.first(), timestamps.last()) {
      (Some(first), Some(last)) => Some([(*first).clone(), (*last).clone()]),
      _ => None,
    };
    Self {
      segment_id: segment.id.clone(),
      job_id: segment.job_id.clone(),
      section: segment.section.clone(),
      step_name: segment.metadata.get("step_name").cloned(),
      line_range: Some([segment.start_line, segment.end_line]),
      timestamp_range,
      stream: segment.stream.clone(),
      url: deep_link(segment),
    }
  }
}

/// Provider deep link to the exact log location, when the segment metadata
/// carries enough identifiers. Unknown providers get no link.
fn deep_link(segment: &Segment) -> Option<String> {
  let meta = &segment.metadata;
  match segment.provider.to_ascii_lowercase().as_str() {
    "github" | "github_actions" => {
      let repo = meta.get("repository")?;
      let run_id = meta.get("run_id")?;
      let job_id = segment.job_id.as_ref()?;
      let step = meta.get("step_id").map(String::as_str).unwrap_or("");
      Some(format!(
        "https://github.com/{repo}/actions/runs/{run_id}/jobs/{job_id}#step:{step}"
      ))
    }
    "gitlab" | "gitlab_ci" => {
      let project_id = meta.get("project_id")?;
      let pipeline_id = meta.get("pipeline_id")?;
      let job_id = segment.job_id.as_ref()?;
      Some(format!(
        "https://gitlab.com/api/v4/projects/{project_id}/pipelines/{pipeline_id}/jobs/{job_id}"
      ))
    }
    "jenkins" => meta.get("build_url").map(|base| format!("{base}console")),
    "travis" => {
      let build_id = meta.get("build_id")?;
      let job_id = segment.job_id.as_ref()?;
      Some(format!(
        "https://travis-ci.org/builds/{build_id}/jobs/{job_id}"
      ))
    }
    _ => None,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
  NoIssues,
  IssuesDetected,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrimaryIssue {
  pub label: String,
  pub confidence: f64,
  pub description: String,
  pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueSummary {
  pub label: String,
  pub confidence: f64,
  pub references: Vec<SegmentReference>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceLink {
  pub label: String,
  pub url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub job_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub section: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub line_range: Option<[u32; 2]>,
}

/// End-of-run summary: primary issue plus traceability back to the logs.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
  pub status: ReportStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub primary_issue: Option<PrimaryIssue>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub affected_jobs: Vec<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub affected_sections: Vec<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub all_issues: Vec<IssueSummary>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub trace_urls: Vec<TraceLink>,
}

fn describe(prediction: &RootCausePrediction) -> String {
  let base = match prediction.label.as_str() {
    "BUILD_FAILURE" => "Build process failed during compilation",
    "COMPILATION_ERROR" => "Source code failed to compile",
    "TEST_FAILURE" => "One or more tests failed during execution",
    "OUT_OF_MEMORY" => "Process terminated due to memory exhaustion",
    "MISSING_DEPENDENCY" => "Required dependency was not found",
    "MISSING_FILE" => "A required file was not found",
    "PERMISSION_DENIED" => "Process lacked required permissions",
    "TIMEOUT" => "Operation exceeded the maximum allowed time",
    "DOWNLOAD_FAILURE" => "A download could not be completed",
    "SYNTAX_ERROR" => "Invalid syntax was encountered",
    "VERSION_CONFLICT" => "Conflicting versions were requested",
    "CONFIGURATION_ERROR" => "Incorrect or invalid configuration",
    "CONFIGURATION_WARNING" => "Configuration produced repeated warnings",
    "DISK_SPACE" => "Insufficient disk space",
    "NETWORK_ERROR" => "A network operation failed",
    "COMMAND_FAILURE" => "A command exited unsuccessfully",
    "RUNTIME_ERROR" => "A runtime error occurred during execution",
    "UNCLASSIFIED" => "An issue was detected but could not be classified",
    _ => "An issue was detected in the CI process",
  };
  match prediction.supporting_tokens.first() {
    Some(token) => {
      let mut snippet = token.clone();
      if snippet.len() > 100 {
        snippet.truncate(97);
        snippet.push_str("...");
      }
      format!("{base}: {snippet}")
    }
    None => base.to_string(),
  }
}

/// Builds the summary from an already-sorted prediction list.
pub fn generate_summary_report(predictions: &[RootCausePrediction]) -> SummaryReport {
  let Some(primary) = predictions.first() else {
    return SummaryReport {
      status: ReportStatus::NoIssues,
      primary_issue: None,
      affected_jobs: Vec::new(),
      affected_sections: Vec::new(),
      all_issues: Vec::new(),
      trace_urls: Vec::new(),
    };
  };

  let mut affected_jobs: Vec<String> = Vec::new();
  let mut affected_sections: Vec<String> = Vec::new();
  let mut trace_urls = Vec::new();
  for prediction in predictions {
    for reference in &prediction.segment_references {
      if let Some(job_id) = &reference.job_id {
        if !affected_jobs.contains(job_id) {
          affected_jobs.push(job_id.clone());
        }
      }
      if let Some(section) = &reference.section {
        if !affected_sections.contains(section) {
          affected_sections.push(section.clone());
        }
      }
      if let Some(url) = &reference.url {
        trace_urls.push(TraceLink {
          label: prediction.label.clone(),
          url: url.clone(),
          job_id: reference.job_id.clone(),
          section: reference.section.clone(),
          line_range: reference.line_range,
        });
      }
    }
  }

  SummaryReport {
    status: ReportStatus::IssuesDetected,
    primary_issue: Some(PrimaryIssue {
      label: primary.label.clone(),
      confidence: primary.confidence,
      description: describe(primary),
      evidence: primary.supporting_tokens.iter().take(5).cloned().collect(),
    }),
    affected_jobs,
    affected_sections,
    all_issues: predictions
      .iter()
      .map(|p| IssueSummary {
        label: p.label.clone(),
        confidence: p.confidence,
        references: p.segment_references.iter().take(3).cloned().collect(),
      })
      .collect(),
    trace_urls,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Token, TokenKind};
  use std::collections::HashMap;

  fn segment_with_meta(meta: &[(&str, &str)], job_id: Option<&str>, provider: &str) -> Segment {
    let metadata: HashMap<String, String> = meta
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    Segment {
      id: "seg-abc".into(),
      tokens: vec![Token {
        kind: TokenKind::Error,
        text: "error: boom".into(),
        line_number: 10,
        section: None,
        stream: None,
        metadata: HashMap::new(),
      }],
      text: "error: boom".into(),
      start_line: 10,
      end_line: 12,
      provider: provider.to_string(),
      section: Some("build".into()),
      stream: None,
      job_id: job_id.map(|s| s.to_string()),
      score: 100.0,
      entropy: 3.0,
      confidence_level: 0.7,
      preceding_context: None,
      following_context: None,
      metadata,
    }
  }

  #[test]
  fn github_reference_builds_deep_link() {
    let seg = segment_with_meta(
      &[("repository", "acme/app"), ("run_id", "991"), ("step_id", "4")],
      Some("77"),
      "github",
    );
    let reference = SegmentReference::from_segment(&seg);
    assert_eq!(
      reference.url.as_deref(),
      Some("https://github.com/acme/app/actions/runs/991/jobs/77#step:4")
    );
    assert_eq!(reference.line_range, Some([10, 12]));
  }

  #[test]
  fn missing_identifiers_omit_the_link() {
    let seg = segment_with_meta(&[], Some("77"), "github");
    let reference = SegmentReference::from_segment(&seg);
    assert!(reference.url.is_none());
  }

  #[test]
  fn jenkins_link_appends_console() {
    let seg = segment_with_meta(
      &[("build_url", "https://ci.example.com/job/app/42/")],
      None,
      "jenkins",
    );
    let reference = SegmentReference::from_segment(&seg);
    assert_eq!(
      reference.url.as_deref(),
      Some("https://ci.example.com/job/app/42/console")
    );
  }

  #[test]
  fn empty_predictions_yield_no_issues() {
    let report = generate_summary_report(&[]);
    assert_eq!(report.status, ReportStatus::NoIssues);
    assert!(report.primary_issue.is_none());
  }

  #[test]
  fn report_aggregates_jobs_and_sections() {
    let seg = segment_with_meta(
      &[("repository", "acme/app"), ("run_id", "991")],
      Some("77"),
      "github",
    );
    let reference = SegmentReference::from_segment(&seg);
    let prediction = RootCausePrediction {
      label: "BUILD_FAILURE".into(),
      confidence: 0.82,
      segment_ids: vec![seg.id.clone()],
      segment_references: vec![reference],
      supporting_tokens: vec!["error: boom".into()],
      provider_context: HashMap::new(),
      metadata: crate::types::Metadata::new(),
      classifier_id: Some("build_failure".into()),
    };
    let report = generate_summary_report(&[prediction]);
    assert_eq!(report.status, ReportStatus::IssuesDetected);
    let primary = report.primary_issue.unwrap();
    assert_eq!(primary.label, "BUILD_FAILURE");
    assert!(primary.description.contains("error: boom"));
    assert_eq!(report.affected_jobs, vec!["77"]);
    assert_eq!(report.affected_sections, vec!["build"]);
    assert_eq!(report.trace_urls.len(), 1);
  }
}
