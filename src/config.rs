//! Engine configuration with sane defaults.

use std::collections::HashMap;

/// Weights for the eight confidence signals. Defaults sum to 1.0.
#[derive(Debug, Clone)]
pub struct MetricWeights {
  pub token_entropy: f64,
  pub pattern_specificity: f64,
  pub segment_coverage: f64,
  pub segment_score: f64,
  pub context_support: f64,
  pub historical_accuracy: f64,
  pub cross_segment_coherence: f64,
  pub provider_reliability: f64,
}

impl Default for MetricWeights {
  fn default() -> Self {
    Self {
      token_entropy: 0.25,
      pattern_specificity: 0.20,
      segment_coverage: 0.10,
      segment_score: 0.15,
      context_support: 0.10,
      historical_accuracy: 0.10,
      cross_segment_coherence: 0.05,
      provider_reliability: 0.05,
    }
  }
}

/// How the coordinator picks a winner among overlapping predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
  HighestConfidence,
  PriorityLabel,
  WeightedScore,
}

/// Tunables for prediction coordination and conflict resolution.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  /// Predictions below this confidence are dropped before resolution.
  pub confidence_threshold: f64,
  /// Jaccard similarity over segment-id sets at or above which two
  /// predictions are considered overlapping.
  pub overlap_threshold: f64,
  pub strategy: ResolutionStrategy,
  /// Per-label priority multipliers used by priority/weighted strategies.
  pub label_priorities: HashMap<String, f64>,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.6,
      overlap_threshold: 0.5,
      strategy: ResolutionStrategy::WeightedScore,
      label_priorities: default_label_priorities(),
    }
  }
}

pub fn default_label_priorities() -> HashMap<String, f64> {
  let mut priorities = HashMap::new();
  priorities.insert("SECURITY_VIOLATION".to_string(), 5.0);
  priorities.insert("OUT_OF_MEMORY".to_string(), 4.5);
  priorities.insert("BUILD_FAILURE".to_string(), 4.0);
  priorities.insert("MISSING_DEPENDENCY".to_string(), 3.8);
  priorities.insert("COMPILATION_ERROR".to_string(), 3.8);
  priorities.insert("TEST_FAILURE".to_string(), 3.5);
  priorities.insert("RUNTIME_ERROR".to_string(), 3.2);
  priorities.insert("PERMISSION_DENIED".to_string(), 3.0);
  priorities.insert("NETWORK_ERROR".to_string(), 2.8);
  priorities.insert("TIMEOUT".to_string(), 2.5);
  priorities.insert("COMMAND_FAILURE".to_string(), 2.2);
  priorities.insert("CONFIGURATION_WARNING".to_string(), 1.5);
  priorities.insert("UNCLASSIFIED".to_string(), 1.0);
  priorities.insert("UNKNOWN".to_string(), 1.0);
  priorities
}

/// Tunables for the heuristic fallback classifier.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
  /// Fallback confidences stay strictly below this ceiling.
  pub confidence_ceiling: f64,
  /// Minimum normalized segment score for a segment to be considered.
  pub score_threshold: f64,
  /// Max segments inspected per invocation.
  pub max_segments: usize,
}

impl Default for FallbackConfig {
  fn default() -> Self {
    Self {
      confidence_ceiling: 0.6,
      score_threshold: 0.4,
      max_segments: 3,
    }
  }
}

/// Top-level tunables for the full analysis pipeline.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
  pub tokenizer: TokenizerConfig,
  pub grouping: GroupingConfig,
  pub context: ContextConfig,
  pub coordinator: CoordinatorConfig,
  pub fallback: FallbackConfig,
  pub weights: MetricWeights,
}

#[derive(Debug, Clone)]
pub struct TokenizerConfig {
  /// Resolved-kind history depth for continuation tracking.
  pub history_depth: usize,
}

impl Default for TokenizerConfig {
  fn default() -> Self {
    Self { history_depth: 8 }
  }
}

#[derive(Debug, Clone)]
pub struct GroupingConfig {
  /// Max tokens per segment for the buffered grouper.
  pub buffered_window: usize,
}

impl Default for GroupingConfig {
  fn default() -> Self {
    Self {
      buffered_window: 50,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
  /// Total sliding-window size for the context analyzer.
  pub window_size: usize,
}

impl Default for ContextConfig {
  fn default() -> Self {
    Self { window_size: 5 }
  }
}
