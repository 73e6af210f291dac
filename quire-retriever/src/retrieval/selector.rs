//! Adaptive context selection.
//!
//! The cutoff is computed per query from the score distribution of the
//! candidates instead of being a fixed threshold:
//!
//! ```text
//! cutoff = max(min_similarity, max_ratio * max, median_ratio * median)
//! ```
//!
//! The constants are empirical and live in [`SelectorConfig`] so they can be
//! tuned per deployment.

use crate::retrieval::retriever::Hit;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Tuning surface for [`AdaptiveSelector`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Absolute floor for the cutoff
    pub min_similarity: f32,
    /// Fraction of the best score a hit must reach
    pub max_ratio: f32,
    /// Fraction of the median score a hit must reach
    pub median_ratio: f32,
    /// Upper bound on the number of selected hits
    pub cite_top_k: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.05,
            max_ratio: 0.35,
            median_ratio: 0.5,
            cite_top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveSelector {
    config: SelectorConfig,
}

fn by_score_desc(a: &Hit, b: &Hit) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

fn median(sorted_desc: &[f32]) -> f32 {
    let n = sorted_desc.len();
    if n % 2 == 1 {
        sorted_desc[n / 2]
    } else {
        (sorted_desc[n / 2 - 1] + sorted_desc[n / 2]) / 2.0
    }
}

impl AdaptiveSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// The cutoff for a set of scores. `None` when there are no scores.
    pub fn cutoff(&self, scores: &[f32]) -> Option<f32> {
        if scores.is_empty() {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        let max = sorted[0];
        let median = median(&sorted);
        Some(
            self.config
                .min_similarity
                .max(self.config.max_ratio * max)
                .max(self.config.median_ratio * median),
        )
    }

    /// Picks the hits strong enough to cite.
    ///
    /// Never returns an empty list when `hits` is non-empty: if nothing clears
    /// the cutoff, the best `cite_top_k` hits are returned as they are.
    pub fn select_strong(&self, hits: &[Hit]) -> Vec<Hit> {
        let mut sorted = hits.to_vec();
        // Stable, so equal scores keep retrieval order.
        sorted.sort_by(by_score_desc);

        let scores: Vec<f32> = sorted.iter().map(|h| h.score).collect();
        let Some(cutoff) = self.cutoff(&scores) else {
            return Vec::new();
        };
        let limit = self.config.cite_top_k.max(1);

        let strong: Vec<Hit> = sorted
            .iter()
            .filter(|h| h.score >= cutoff)
            .take(limit)
            .cloned()
            .collect();

        if strong.is_empty() {
            debug!(
                "No hit reached cutoff {:.3}; keeping the top {} unconditionally",
                cutoff, limit
            );
            sorted.truncate(limit);
            return sorted;
        }

        debug!(
            "Selected {} of {} hits at cutoff {:.3}",
            strong.len(),
            sorted.len(),
            cutoff
        );
        strong
    }
}
