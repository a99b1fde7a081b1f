//! Rule-based classifiers, multi-label bundles, and the classifier registry.

use std::collections::HashMap;

use tracing::debug;

use crate::config::MetricWeights;
use crate::confidence::ConfidenceScorer;
use crate::error::EngineError;
use crate::report::SegmentReference;
use crate::rules::{kind_within_lines, Condition, ContextualRule};
use crate::types::{
  CauseKind, CauseLabel, Metadata, PredictionBundle, RootCausePrediction, Segment, TokenKind,
};

/// A root-cause classifier over scored segments.
pub trait Classifier {
  fn id(&self) -> &str;

  fn classify(&self, segments: &[Segment]) -> Vec<RootCausePrediction>;

  /// Multi-label view. Classifiers without structured secondary causes
  /// wrap each flat prediction as a primary-only bundle.
  fn classify_bundles(&self, segments: &[Segment]) -> Vec<PredictionBundle> {
    self
      .classify(segments)
      .iter()
      .enumerate()
      .map(|(i, prediction)| bundle_from_prediction(prediction, i, segments))
      .collect()
  }
}

pub(crate) fn bundle_from_prediction(
  prediction: &RootCausePrediction,
  index: usize,
  segments: &[Segment],
) -> PredictionBundle {
  let references = references_for(&prediction.segment_ids, segments);
  PredictionBundle {
    id: format!(
      "bundle-{}-{index}",
      prediction.classifier_id.as_deref().unwrap_or("anon")
    ),
    primary_cause: CauseLabel {
      label: prediction.label.clone(),
      kind: CauseKind::Primary,
      confidence: prediction.confidence,
      supporting_segment_ids: prediction.segment_ids.clone(),
      supporting_tokens: prediction.supporting_tokens.clone(),
      metadata: prediction.metadata.clone(),
    },
    secondary_causes: Vec::new(),
    symptoms: Vec::new(),
    context_factors: Vec::new(),
    aggregate_confidence: prediction.confidence,
    provider: prediction.provider_context.get("provider").cloned(),
    job_id: references.first().and_then(|r| r.job_id.clone()),
    classifier_id: prediction.classifier_id.clone(),
    segment_references: references,
  }
}

fn references_for(segment_ids: &[String], segments: &[Segment]) -> Vec<SegmentReference> {
  segment_ids
    .iter()
    .filter_map(|id| segments.iter().find(|s| &s.id == id))
    .map(SegmentReference::from_segment)
    .collect()
}

/// Evaluates contextual rules and scores each match with the eight-signal
/// scorer unless the rule brings its own calculator.
pub struct RuleBasedClassifier {
  id: String,
  rules: Vec<ContextualRule>,
  scorer: ConfidenceScorer,
  confidence_threshold: f64,
}

impl RuleBasedClassifier {
  pub fn new(id: &str, scorer: ConfidenceScorer) -> Self {
    Self {
      id: id.to_string(),
      rules: Vec::new(),
      scorer,
      confidence_threshold: 0.5,
    }
  }

  pub fn with_threshold(mut self, threshold: f64) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn add_rule(&mut self, rule: ContextualRule) {
    self.rules.push(rule);
  }

  fn prediction_for(
    &self,
    rule: &ContextualRule,
    segments: &[Segment],
    segment_index: usize,
    related_indices: &[usize],
    rule_confidence: Option<f64>,
    evidence: Vec<String>,
  ) -> Option<RootCausePrediction> {
    let matched = &segments[segment_index];
    let confidence = match rule_confidence {
      Some(value) => value,
      None => {
        let context: Vec<&Segment> = related_indices.iter().map(|i| &segments[*i]).collect();
        self.scorer.confidence(
          matched,
          &context,
          rule.condition.primary_pattern().unwrap_or(""),
          evidence.first().map(String::as_str),
          &self.id,
        )
      }
    };
    if confidence < self.confidence_threshold {
      debug!(
        rule = %rule.name,
        segment = %matched.id,
        confidence,
        "match below classifier threshold, skipped"
      );
      return None;
    }
    let mut segment_ids = vec![matched.id.clone()];
    segment_ids.extend(related_indices.iter().map(|i| segments[*i].id.clone()));

    let mut provider_context = HashMap::new();
    provider_context.insert("provider".to_string(), matched.provider.clone());
    let mut metadata = Metadata::new();
    metadata.insert("rule_name".into(), serde_json::json!(rule.name));

    Some(RootCausePrediction {
      label: rule.label.clone(),
      confidence: confidence.clamp(0.0, 1.0),
      segment_ids,
      segment_references: Vec::new(),
      supporting_tokens: evidence,
      provider_context,
      metadata,
      classifier_id: Some(self.id.clone()),
    })
  }
}

impl Classifier for RuleBasedClassifier {
  fn id(&self) -> &str {
    &self.id
  }

  fn classify(&self, segments: &[Segment]) -> Vec<RootCausePrediction> {
    let mut predictions = Vec::new();
    for rule in &self.rules {
      for matched in rule.evaluate(segments) {
        if let Some(prediction) = self.prediction_for(
          rule,
          segments,
          matched.segment_index,
          &matched.related_indices,
          matched.confidence,
          matched.evidence,
        ) {
          predictions.push(prediction);
        }
      }
    }
    predictions
  }
}

/// Pattern detector for secondary causes, symptoms, and contextual factors.
pub struct PatternDetector {
  pub name: String,
  pub label: String,
  pub kind: CauseKind,
  patterns: Vec<(Condition, f64)>,
  confidence_threshold: f64,
}

impl PatternDetector {
  pub fn new(name: &str, label: &str, kind: CauseKind, threshold: f64) -> Self {
    Self {
      name: name.to_string(),
      label: label.to_string(),
      kind,
      patterns: Vec::new(),
      confidence_threshold: threshold,
    }
  }

  pub fn add_pattern(&mut self, pattern: &str, boost: f64) -> Result<(), EngineError> {
    self.patterns.push((Condition::pattern(pattern)?, boost));
    Ok(())
  }

  pub fn detect(&self, segments: &[Segment]) -> Option<CauseLabel> {
    let mut matching_ids = Vec::new();
    let mut supporting_tokens = Vec::new();
    let mut max_confidence: f64 = 0.0;

    for segment in segments {
      for (condition, boost) in &self.patterns {
        if !condition.evaluate(segment) {
          continue;
        }
        for span in condition.evidence(segment) {
          if !supporting_tokens.contains(&span) {
            supporting_tokens.push(span);
          }
        }
        if !matching_ids.contains(&segment.id) {
          matching_ids.push(segment.id.clone());
        }
        let confidence = (0.7 + boost + segment.score_normalized() * 0.1).min(0.95);
        max_confidence = max_confidence.max(confidence);
      }
    }

    if max_confidence >= self.confidence_threshold && !matching_ids.is_empty() {
      let mut metadata = Metadata::new();
      metadata.insert("detector_name".into(), serde_json::json!(self.name));
      Some(CauseLabel {
        label: self.label.clone(),
        kind: self.kind,
        confidence: max_confidence,
        supporting_segment_ids: matching_ids,
        supporting_tokens,
        metadata,
      })
    } else {
      None
    }
  }
}

/// Multi-label classifier: primary rules plus detectors for secondary
/// causes, symptoms, and contextual factors.
pub struct MultiLabelClassifier {
  id: String,
  primary: RuleBasedClassifier,
  secondary_detectors: Vec<PatternDetector>,
  symptom_detectors: Vec<PatternDetector>,
  context_detectors: Vec<PatternDetector>,
}

impl MultiLabelClassifier {
  pub fn new(id: &str, primary: RuleBasedClassifier) -> Self {
    Self {
      id: id.to_string(),
      primary,
      secondary_detectors: Vec::new(),
      symptom_detectors: Vec::new(),
      context_detectors: Vec::new(),
    }
  }

  pub fn add_secondary_detector(&mut self, detector: PatternDetector) {
    self.secondary_detectors.push(detector);
  }

  pub fn add_symptom_detector(&mut self, detector: PatternDetector) {
    self.symptom_detectors.push(detector);
  }

  pub fn add_context_detector(&mut self, detector: PatternDetector) {
    self.context_detectors.push(detector);
  }
}

impl Classifier for MultiLabelClassifier {
  fn id(&self) -> &str {
    &self.id
  }

  fn classify(&self, segments: &[Segment]) -> Vec<RootCausePrediction> {
    self
      .classify_bundles(segments)
      .iter()
      .map(RootCausePrediction::from_bundle)
      .collect()
  }

  fn classify_bundles(&self, segments: &[Segment]) -> Vec<PredictionBundle> {
    let mut bundles: Vec<PredictionBundle> = self
      .primary
      .classify(segments)
      .iter()
      .enumerate()
      .map(|(i, prediction)| {
        let mut bundle = bundle_from_prediction(prediction, i, segments);
        bundle.classifier_id = Some(self.id.clone());

        for detector in &self.secondary_detectors {
          if let Some(cause) = detector.detect(segments) {
            extend_references(&mut bundle, &cause.supporting_segment_ids, segments);
            bundle.secondary_causes.push(cause);
          }
        }
        for detector in &self.symptom_detectors {
          if let Some(symptom) = detector.detect(segments) {
            extend_references(&mut bundle, &symptom.supporting_segment_ids, segments);
            bundle.symptoms.push(symptom);
          }
        }
        for detector in &self.context_detectors {
          if let Some(factor) = detector.detect(segments) {
            extend_references(&mut bundle, &factor.supporting_segment_ids, segments);
            bundle.context_factors.push(factor);
          }
        }

        bundle.aggregate_confidence = bundle.compute_aggregate_confidence();
        bundle
      })
      .collect();

    bundles.sort_by(|a, b| {
      b.aggregate_confidence
        .partial_cmp(&a.aggregate_confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    bundles
  }
}

fn extend_references(bundle: &mut PredictionBundle, segment_ids: &[String], segments: &[Segment]) {
  for id in segment_ids {
    if bundle.segment_references.iter().any(|r| &r.segment_id == id) {
      continue;
    }
    if let Some(segment) = segments.iter().find(|s| &s.id == id) {
      bundle
        .segment_references
        .push(SegmentReference::from_segment(segment));
    }
  }
}

/// Explicit classifier registry. Order of registration is the order of
/// evaluation; there is no global state.
#[derive(Default)]
pub struct ClassifierRegistry {
  classifiers: Vec<Box<dyn Classifier>>,
}

impl ClassifierRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, classifier: Box<dyn Classifier>) {
    self.classifiers.push(classifier);
  }

  pub fn is_empty(&self) -> bool {
    self.classifiers.is_empty()
  }

  pub fn classify(&self, segments: &[Segment]) -> Vec<RootCausePrediction> {
    self
      .classifiers
      .iter()
      .flat_map(|c| c.classify(segments))
      .collect()
  }

  pub fn classify_bundles(&self, segments: &[Segment]) -> Vec<PredictionBundle> {
    self
      .classifiers
      .iter()
      .flat_map(|c| c.classify_bundles(segments))
      .collect()
  }
}

fn build_failure_classifier(weights: &MetricWeights) -> Result<RuleBasedClassifier, EngineError> {
  let mut classifier =
    RuleBasedClassifier::new("build_failure", ConfidenceScorer::new(weights.clone()));
  classifier.add_rule(ContextualRule::new(
    "compilation_failed",
    "BUILD_FAILURE",
    Condition::pattern(r"compilation (?:failed|error)|build failed|cannot build")?
      .and(Condition::token_kind(
        vec![TokenKind::Error, TokenKind::CiError, TokenKind::ExitCodeNonZero],
        1,
      )),
  ));
  classifier.add_rule(ContextualRule::new(
    "compiler_diagnostic",
    "COMPILATION_ERROR",
    Condition::pattern(r"error\[E\d+\]|error C\d{4}|fatal error: .*\.h")?,
  ));
  Ok(classifier)
}

fn test_failure_classifier(weights: &MetricWeights) -> Result<RuleBasedClassifier, EngineError> {
  let mut classifier =
    RuleBasedClassifier::new("test_failure", ConfidenceScorer::new(weights.clone()));
  classifier.add_rule(
    ContextualRule::new(
      "failing_tests",
      "TEST_FAILURE",
      Condition::pattern(r"\d+ (?:tests? )?failed|FAIL(?:ED)?[:\s]|assertion failed")?
        .and(Condition::token_kind(
          vec![
            TokenKind::TestFailure,
            TokenKind::TestError,
            TokenKind::AssertionFail,
            TokenKind::Error,
          ],
          1,
        )),
    )
    .with_context_resolver(kind_within_lines(TokenKind::StackTrace, 30)),
  );
  Ok(classifier)
}

fn missing_dependency_classifier(
  weights: &MetricWeights,
) -> Result<RuleBasedClassifier, EngineError> {
  let mut classifier = RuleBasedClassifier::new(
    "missing_dependency",
    ConfidenceScorer::new(weights.clone()),
  );
  classifier.add_rule(ContextualRule::new(
    "unresolved_dependency",
    "MISSING_DEPENDENCY",
    Condition::pattern(
      r"(?:cannot find|could not resolve|unable to locate|no matching distribution for) (?:module|package|crate|dependency|artifact)?|ModuleNotFoundError",
    )?,
  ));
  Ok(classifier)
}

fn oom_classifier(weights: &MetricWeights) -> Result<MultiLabelClassifier, EngineError> {
  let mut primary = RuleBasedClassifier::new("oom", ConfidenceScorer::new(weights.clone()));
  primary.add_rule(
    ContextualRule::new(
      "out_of_memory",
      "OUT_OF_MEMORY",
      Condition::pattern(r"out of memory|java\.lang\.OutOfMemoryError|oom[- ]?kill")?,
    )
    .with_context_resolver(kind_within_lines(TokenKind::StackTrace, 20))
    .with_confidence_calculator(Box::new(|segment, segments| {
      let mut confidence: f64 = 0.85;
      let trace_nearby = segments.iter().any(|s| {
        s.id != segment.id
          && s.contains_kind(TokenKind::StackTrace)
          && s.start_line.abs_diff(segment.start_line) <= 20
      });
      if trace_nearby {
        confidence += 0.1;
      }
      if segment.text.to_ascii_lowercase().contains("heap")
        || segment.text.to_ascii_lowercase().contains("memory limit")
      {
        confidence += 0.05;
      }
      confidence.min(1.0)
    })),
  );

  let mut classifier = MultiLabelClassifier::new("oom_multi_label", primary);

  let mut memory_limit = PatternDetector::new(
    "memory_limit",
    "MEMORY_LIMIT_TOO_LOW",
    CauseKind::Secondary,
    0.7,
  );
  memory_limit.add_pattern(r"Limiting container memory to:? (\d+[KMG]?)", 0.15)?;
  memory_limit.add_pattern(r"Memory limit set to (\d+[KMG]B)", 0.1)?;
  classifier.add_secondary_detector(memory_limit);

  let mut large_alloc = PatternDetector::new(
    "large_heap_object",
    "LARGE_OBJECT_ALLOCATION",
    CauseKind::Secondary,
    0.65,
  );
  large_alloc.add_pattern(r"Failed to allocate a (\d+[KMG]B) \S+ object", 0.1)?;
  large_alloc.add_pattern(r"Could not allocate enough memory for object of size (\d+)", 0.05)?;
  classifier.add_secondary_detector(large_alloc);

  let mut process_killed = PatternDetector::new(
    "process_killed",
    "PROCESS_KILLED",
    CauseKind::Symptom,
    0.75,
  );
  process_killed.add_pattern(r"Killed process \d+ \((.*?)\)", 0.2)?;
  process_killed.add_pattern(r"process has been killed due to memory pressure", 0.15)?;
  classifier.add_symptom_detector(process_killed);

  let mut container_limits = PatternDetector::new(
    "container_limits",
    "CONTAINER_MEMORY_LIMITS",
    CauseKind::Context,
    0.7,
  );
  container_limits.add_pattern(r"container (?:memory|resource) limits?", 0.1)?;
  classifier.add_context_detector(container_limits);

  Ok(classifier)
}

/// The built-in classifier set: build failures, out-of-memory (multi-label),
/// test failures, and missing dependencies.
pub fn default_registry(weights: &MetricWeights) -> Result<ClassifierRegistry, EngineError> {
  let mut registry = ClassifierRegistry::new();
  registry.register(Box::new(build_failure_classifier(weights)?));
  registry.register(Box::new(oom_classifier(weights)?));
  registry.register(Box::new(test_failure_classifier(weights)?));
  registry.register(Box::new(missing_dependency_classifier(weights)?));
  Ok(registry)
}
