//! Conflict resolution between predictions from competing classifiers.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::{CoordinatorConfig, ResolutionStrategy};
use crate::types::{RootCausePrediction, Segment, TokenKind};

const RECOGNIZED_PROVIDERS: &[&str] = &[
  "github",
  "github_actions",
  "gitlab",
  "gitlab_ci",
  "jenkins",
  "travis",
  "circleci",
  "azure_pipelines",
];

pub struct ClassifierCoordinator {
  config: CoordinatorConfig,
}

impl ClassifierCoordinator {
  pub fn new(config: CoordinatorConfig) -> Self {
    Self { config }
  }

  /// Full coordination: threshold filter, overlap resolution, sort.
  pub fn coordinate(&self, predictions: Vec<RootCausePrediction>) -> Vec<RootCausePrediction> {
    let filtered: Vec<RootCausePrediction> = predictions
      .into_iter()
      .filter(|p| p.confidence >= self.config.confidence_threshold)
      .collect();
    self.resolve_overlaps(filtered)
  }

  /// Overlap resolution without the confidence floor. Fallback and
  /// last-resort predictions sit below the floor by construction and go
  /// through this path.
  pub fn resolve_overlaps(
    &self,
    predictions: Vec<RootCausePrediction>,
  ) -> Vec<RootCausePrediction> {
    let groups = self.group_by_overlap(&predictions);

    let mut survivors: Vec<RootCausePrediction> = Vec::new();
    for group in groups {
      if group.len() == 1 {
        survivors.push(predictions[group[0]].clone());
        continue;
      }
      let winner = self.pick_winner(&group, &predictions);
      debug!(
        winner = %predictions[winner].label,
        losers = ?group
          .iter()
          .filter(|i| **i != winner)
          .map(|i| predictions[*i].label.as_str())
          .collect::<Vec<_>>(),
        strategy = ?self.config.strategy,
        "resolved overlapping predictions"
      );
      survivors.push(predictions[winner].clone());
    }

    // Stable sort keeps first-appearance order among equal confidences.
    survivors.sort_by(|a, b| {
      b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    survivors
  }

  /// Single left-to-right scan: each prediction joins the first existing
  /// group it overlaps with. Intentionally not connected components, so a
  /// chain of pairwise overlaps can split across groups.
  fn group_by_overlap(&self, predictions: &[RootCausePrediction]) -> Vec<Vec<usize>> {
    let sets: Vec<HashSet<&str>> = predictions
      .iter()
      .map(|p| p.segment_ids.iter().map(String::as_str).collect())
      .collect();

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for index in 0..predictions.len() {
      let joined = groups.iter_mut().find(|group| {
        group
          .iter()
          .any(|other| jaccard(&sets[index], &sets[*other]) >= self.config.overlap_threshold)
      });
      match joined {
        Some(group) => group.push(index),
        None => groups.push(vec![index]),
      }
    }
    groups
  }

  fn pick_winner(&self, group: &[usize], predictions: &[RootCausePrediction]) -> usize {
    let key = |index: usize| -> f64 {
      let p = &predictions[index];
      match self.config.strategy {
        ResolutionStrategy::HighestConfidence => p.confidence,
        ResolutionStrategy::PriorityLabel => self.label_priority(&p.label),
        ResolutionStrategy::WeightedScore => self.weighted_score(p),
      }
    };
    // First-seen wins ties.
    let mut winner = group[0];
    let mut best = key(winner);
    for &index in &group[1..] {
      let score = key(index);
      if score > best {
        best = score;
        winner = index;
      }
    }
    winner
  }

  fn label_priority(&self, label: &str) -> f64 {
    self.config.label_priorities.get(label).copied().unwrap_or(1.0)
  }

  fn weighted_score(&self, prediction: &RootCausePrediction) -> f64 {
    let evidence_strength = (0.8
      + 0.05 * prediction.supporting_tokens.len() as f64
      + 0.02 * prediction.segment_ids.len() as f64)
      .min(1.0);
    let provider_factor = prediction
      .provider_context
      .get("provider")
      .map(|p| {
        if RECOGNIZED_PROVIDERS.contains(&p.to_ascii_lowercase().as_str()) {
          1.05
        } else {
          1.0
        }
      })
      .unwrap_or(1.0);
    prediction.confidence * self.label_priority(&prediction.label) * evidence_strength
      * provider_factor
  }

  /// Produces an enriched copy with aggregated metadata from the
  /// prediction's constituent segments. Never edits in place.
  pub fn enrich(
    &self,
    prediction: &RootCausePrediction,
    segments: &[Segment],
  ) -> RootCausePrediction {
    let mut enriched = prediction.clone();
    let constituent: Vec<&Segment> = prediction
      .segment_ids
      .iter()
      .filter_map(|id| segments.iter().find(|s| &s.id == id))
      .collect();
    if constituent.is_empty() {
      return enriched;
    }

    let mut sections: Vec<String> = Vec::new();
    let mut kind_counts: HashMap<TokenKind, usize> = HashMap::new();
    let mut min_line = u32::MAX;
    let mut max_line = 0;
    for segment in &constituent {
      if let Some(section) = &segment.section {
        if !sections.contains(section) {
          sections.push(section.clone());
        }
      }
      for (kind, count) in segment.kind_counts() {
        *kind_counts.entry(kind).or_insert(0) += count;
      }
      min_line = min_line.min(segment.start_line);
      max_line = max_line.max(segment.end_line);
    }

    enriched
      .metadata
      .insert("sections".into(), serde_json::json!(sections));
    let counts_json: HashMap<String, usize> = kind_counts
      .into_iter()
      .filter_map(|(kind, count)| {
        serde_json::to_value(kind)
          .ok()
          .and_then(|v| v.as_str().map(|s| (s.to_string(), count)))
      })
      .collect();
    enriched
      .metadata
      .insert("token_type_counts".into(), serde_json::json!(counts_json));
    enriched
      .metadata
      .insert("line_range".into(), serde_json::json!([min_line, max_line]));
    enriched
  }
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
  if a.is_empty() && b.is_empty() {
    return 0.0;
  }
  let intersection = a.intersection(b).count() as f64;
  let union = a.union(b).count() as f64;
  intersection / union
}
