//! Scorer (C5): the opaque scoring artifact. Loading is atomic — a new
//! Scorer is built aside and swapped under `ArcSwapOption`; a failed
//! build never reaches `reload`, so the prior Scorer stays in place.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::error::{CoreError, CoreResult};

/// The feature positions a Scorer expects, fixed at load time
/// (spec.md §4.5/§4.7): viewer vector, then item vector, then context
/// features, concatenated in that order.
#[derive(Debug, Clone, Copy)]
pub struct FeatureLayout {
    pub viewer_dim: usize,
    pub item_dim: usize,
    pub context_dim: usize,
}

impl FeatureLayout {
    pub fn total_dim(&self) -> usize {
        self.viewer_dim + self.item_dim + self.context_dim
    }
}

pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;
    fn feature_layout(&self) -> FeatureLayout;
    /// `batchScore(features: float[N][F]) -> float[N]`, values in `[0,1]`.
    fn batch_score(&self, features: &[Vec<f64>]) -> CoreResult<Vec<f64>>;
}

/// A deterministic linear-plus-sigmoid stand-in for a real model
/// artifact. Exercises the same contract a learned Scorer would.
pub struct LinearScorer {
    name: String,
    layout: FeatureLayout,
    weights: Vec<f64>,
    bias: f64,
}

impl LinearScorer {
    pub fn new(name: impl Into<String>, layout: FeatureLayout) -> Self {
        let total = layout.total_dim();
        let weights = (0..total).map(|i| ((i % 7) as f64 - 3.0) * 0.05).collect();
        Self {
            name: name.into(),
            layout,
            weights,
            bias: 0.0,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Scorer for LinearScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_layout(&self) -> FeatureLayout {
        self.layout
    }

    fn batch_score(&self, features: &[Vec<f64>]) -> CoreResult<Vec<f64>> {
        let expected = self.layout.total_dim();
        features
            .iter()
            .map(|row| {
                if row.len() != expected {
                    return Err(CoreError::inference_error(format!(
                        "feature row has {} components, expected {}",
                        row.len(),
                        expected
                    )));
                }
                let dot: f64 = row.iter().zip(&self.weights).map(|(a, b)| a * b).sum();
                Ok(sigmoid(dot + self.bias).clamp(0.0, 1.0))
            })
            .collect()
    }
}

/// Atomically swappable Scorer handle, read-dominant.
#[derive(Default)]
pub struct ScorerHandle {
    current: ArcSwapOption<Box<dyn Scorer>>,
}

impl ScorerHandle {
    pub fn empty() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub fn loaded(scorer: Box<dyn Scorer>) -> Self {
        Self {
            current: ArcSwapOption::from_pointee(scorer),
        }
    }

    pub fn current(&self) -> Option<Arc<Box<dyn Scorer>>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// Swaps in an already-built Scorer. Callers must build the new
    /// Scorer fully (fallibly) before calling this, so a failed build
    /// never reaches the swap and the prior Scorer stays in place.
    pub fn reload(&self, scorer: Box<dyn Scorer>) {
        self.current.store(Some(Arc::new(scorer)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_scorer_outputs_are_bounded() {
        let layout = FeatureLayout {
            viewer_dim: 2,
            item_dim: 2,
            context_dim: 1,
        };
        let scorer = LinearScorer::new("test", layout);
        let scores = scorer.batch_score(&[vec![1.0, -1.0, 0.5, 0.5, 1.0]]).unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[0] >= 0.0 && scores[0] <= 1.0);
    }

    #[test]
    fn mismatched_row_length_is_inference_error() {
        let layout = FeatureLayout {
            viewer_dim: 2,
            item_dim: 2,
            context_dim: 1,
        };
        let scorer = LinearScorer::new("test", layout);
        let err = scorer.batch_score(&[vec![1.0, 2.0]]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InferenceError);
    }

    #[test]
    fn reload_replaces_the_loaded_scorer() {
        let layout = FeatureLayout {
            viewer_dim: 1,
            item_dim: 1,
            context_dim: 1,
        };
        let handle = ScorerHandle::loaded(Box::new(LinearScorer::new("v1", layout)));
        assert_eq!(handle.current().unwrap().name(), "v1");
        handle.reload(Box::new(LinearScorer::new("v2", layout)));
        assert_eq!(handle.current().unwrap().name(), "v2");
    }
}
