//! Bagged ensemble of weighted CART trees

use ndarray::{Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decision_tree::{DecisionTree, TreeParams};
use crate::config::ForestProfile;
use crate::error::{Result, ScoringError};

/// How class frequencies weigh into impurity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassBalance {
    Unweighted,
    /// weight_c = n / (k * count_c)
    Balanced,
}

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub profile: ForestProfile,
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split (floor(sqrt(n_features)) if None)
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub class_balance: ClassBalance,
    pub seed: u64,
}

impl ForestConfig {
    pub fn resolved_max_features(&self, n_features: usize) -> usize {
        self.max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    n_classes: usize,
    n_features: usize,
    class_weights: Vec<f64>,
    trees: Vec<DecisionTree>,
    feature_importances: Vec<f64>,
    oob_accuracy: Option<f64>,
}

impl RandomForest {
    /// Train on `x` (rows = samples) with labels `y` in `0..n_classes`
    pub fn fit(config: ForestConfig, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples == 0 || n_samples != y.len() {
            return Err(ScoringError::InsufficientData {
                reason: format!("{} feature rows for {} labels", n_samples, y.len()),
                rows: n_samples,
            });
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(ScoringError::InsufficientData {
                reason: format!("label index {} outside {} classes", bad, n_classes),
                rows: n_samples,
            });
        }

        let class_weights = class_weights(y, n_classes, config.class_balance);
        let params = TreeParams {
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_features: config.resolved_max_features(n_features),
        };

        debug!(
            "Growing {} trees on {} samples ({} features, {} per split)",
            config.n_trees, n_samples, n_features, params.max_features
        );

        // Tree i draws from seed + i, independent of thread scheduling
        let grown: Vec<(DecisionTree, Vec<usize>)> = (0..config.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let sample = if config.bootstrap {
                    bootstrap_indices(n_samples, &mut rng)
                } else {
                    (0..n_samples).collect()
                };
                let tree = DecisionTree::fit(x, y, sample.clone(), &class_weights, params, &mut rng);
                (tree, sample)
            })
            .collect();

        let oob_accuracy = if config.bootstrap {
            oob_accuracy(&grown, x, y, n_classes)
        } else {
            None
        };
        let trees: Vec<DecisionTree> = grown.into_iter().map(|(tree, _)| tree).collect();

        let n_grown = trees.len().max(1) as f64;
        debug!(
            "Grew {} trees: mean depth {:.1}, mean leaves {:.1}",
            trees.len(),
            trees.iter().map(|t| t.root().depth()).sum::<usize>() as f64 / n_grown,
            trees.iter().map(|t| t.root().n_leaves()).sum::<usize>() as f64 / n_grown
        );

        let mut feature_importances = vec![0.0; n_features];
        for tree in &trees {
            for (i, &imp) in tree.feature_importances().iter().enumerate() {
                feature_importances[i] += imp;
            }
        }
        let sum: f64 = feature_importances.iter().sum();
        if sum > 0.0 {
            for imp in &mut feature_importances {
                *imp /= sum;
            }
        }

        Ok(Self {
            config,
            n_classes,
            n_features,
            class_weights,
            trees,
            feature_importances,
            oob_accuracy,
        })
    }

    /// Mean of the per-tree leaf distributions
    pub fn predict_proba_one(&self, row: ArrayView1<f64>) -> Vec<f64> {
        let mut probs = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (p, q) in probs.iter_mut().zip(tree.predict_proba(row)) {
                *p += q;
            }
        }
        let n = self.trees.len().max(1) as f64;
        probs.iter_mut().for_each(|p| *p /= n);
        probs
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Vec<Vec<f64>> {
        (0..x.nrows())
            .into_par_iter()
            .map(|i| self.predict_proba_one(x.row(i)))
            .collect()
    }

    /// Arg-max class per row; the lowest index wins ties
    pub fn predict(&self, x: &Array2<f64>) -> Vec<usize> {
        self.predict_proba(x).iter().map(|p| argmax(p)).collect()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    /// Feature indices sorted by importance, most important first
    pub fn feature_importance_ranking(&self) -> Vec<(usize, f64)> {
        let mut ranking: Vec<(usize, f64)> =
            self.feature_importances.iter().copied().enumerate().collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranking
    }

    pub fn class_weights(&self) -> &[f64] {
        &self.class_weights
    }

    pub fn oob_accuracy(&self) -> Option<f64> {
        self.oob_accuracy
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Per-class weights; classes absent from `y` get weight 0
pub fn class_weights(y: &[usize], n_classes: usize, balance: ClassBalance) -> Vec<f64> {
    match balance {
        ClassBalance::Unweighted => vec![1.0; n_classes],
        ClassBalance::Balanced => {
            let mut counts = vec![0usize; n_classes];
            for &c in y {
                counts[c] += 1;
            }
            let present = counts.iter().filter(|&&c| c > 0).count().max(1);
            counts
                .iter()
                .map(|&c| {
                    if c == 0 {
                        0.0
                    } else {
                        y.len() as f64 / (present as f64 * c as f64)
                    }
                })
                .collect()
        }
    }
}

fn bootstrap_indices(n: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

/// Accuracy on rows each tree never saw, voting only with those trees
fn oob_accuracy(
    grown: &[(DecisionTree, Vec<usize>)],
    x: &Array2<f64>,
    y: &[usize],
    n_classes: usize,
) -> Option<f64> {
    let n = x.nrows();
    let mut votes = vec![vec![0.0; n_classes]; n];
    let mut seen = vec![false; n];

    for (tree, sample) in grown {
        let mut in_bag = vec![false; n];
        for &i in sample {
            in_bag[i] = true;
        }
        for i in (0..n).filter(|&i| !in_bag[i]) {
            for (v, p) in votes[i].iter_mut().zip(tree.predict_proba(x.row(i))) {
                *v += p;
            }
            seen[i] = true;
        }
    }

    let scored: Vec<usize> = (0..n).filter(|&i| seen[i]).collect();
    if scored.is_empty() {
        return None;
    }
    let correct = scored.iter().filter(|&&i| argmax(&votes[i]) == y[i]).count();
    Some(correct as f64 / scored.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_trees: 25,
            max_depth: 6,
            min_samples_split: 2,
            ..ForestConfig::reference()
        }
    }

    /// Three well-separated bands on feature 0, noise elsewhere
    fn banded(n_per_class: usize, seed: u64) -> (Array2<f64>, Vec<usize>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = n_per_class * 3;
        let y: Vec<usize> = (0..n).map(|i| i % 3).collect();
        let x = Array2::from_shape_fn((n, 4), |(i, j)| {
            if j == 0 {
                y[i] as f64 * 10.0 + rng.gen_range(-1.0..1.0)
            } else {
                rng.gen_range(0.0..1.0)
            }
        });
        (x, y)
    }

    #[test]
    fn test_forest_learns_bands() {
        let (x, y) = banded(30, 7);
        let forest = RandomForest::fit(small_config(), &x, &y, 3).unwrap();

        assert_eq!(forest.n_trees(), 25);
        let predictions = forest.predict(&x);
        let correct = predictions.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct as f64 / y.len() as f64 > 0.95);

        for probs in forest.predict_proba(&x) {
            assert_eq!(probs.len(), 3);
            assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }

        let ranking = forest.feature_importance_ranking();
        assert_eq!(ranking[0].0, 0);
        let total: f64 = forest.feature_importances().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(forest.oob_accuracy().unwrap() > 0.8);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = banded(20, 11);
        let a = RandomForest::fit(small_config(), &x, &y, 3).unwrap();
        let b = RandomForest::fit(small_config(), &x, &y, 3).unwrap();
        assert_eq!(a.predict_proba(&x), b.predict_proba(&x));
        assert_eq!(a.feature_importances(), b.feature_importances());
    }

    #[test]
    fn test_balanced_class_weights() {
        let y = vec![0, 0, 0, 0, 0, 0, 1, 1, 2, 2];
        let weights = class_weights(&y, 3, ClassBalance::Balanced);
        assert!((weights[0] - 10.0 / 18.0).abs() < 1e-12);
        assert!((weights[1] - 10.0 / 6.0).abs() < 1e-12);
        assert_eq!(weights[1], weights[2]);

        let missing = class_weights(&[0, 0, 1], 3, ClassBalance::Balanced);
        assert_eq!(missing[2], 0.0);
        assert!((missing[0] - 0.75).abs() < 1e-12);

        assert_eq!(class_weights(&y, 3, ClassBalance::Unweighted), vec![1.0; 3]);
    }

    #[test]
    fn test_max_features_default() {
        let config = ForestConfig::reference();
        assert_eq!(config.resolved_max_features(7), 2);
        assert_eq!(config.resolved_max_features(1), 1);

        let wide = ForestConfig {
            max_features: Some(50),
            ..ForestConfig::reference()
        };
        assert_eq!(wide.resolved_max_features(7), 7);
    }

    #[test]
    fn test_fit_rejects_mismatched_labels() {
        let x = Array2::zeros((4, 2));
        assert!(RandomForest::fit(small_config(), &x, &[0, 1, 2], 3).is_err());
        assert!(RandomForest::fit(small_config(), &x, &[0, 1, 2, 3], 3).is_err());
    }

    #[test]
    fn test_argmax_prefers_lowest_index_on_tie() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), 0);
        assert_eq!(argmax(&[0.1, 0.3, 0.6]), 2);
    }
}
