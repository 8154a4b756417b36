//! Weighted multi-class CART tree (Gini impurity)

use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Smallest impurity decrease accepted as a real split
const MIN_GAIN: f64 = 1e-12;

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn (without replacement) at each node
    pub max_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        /// Weighted class distribution of the training rows in this leaf
        probabilities: Vec<f64>,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: TreeNode,
    /// Normalized impurity decrease per feature
    feature_importances: Vec<f64>,
}

impl DecisionTree {
    /// Grow a tree on the rows listed in `sample` (duplicates allowed for bootstrap)
    pub fn fit(
        x: &Array2<f64>,
        y: &[usize],
        sample: Vec<usize>,
        class_weights: &[f64],
        params: TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut builder = TreeBuilder {
            x,
            y,
            class_weights,
            params,
            importances: vec![0.0; x.ncols()],
            rng,
        };
        let root = builder.build(sample, 0);

        let mut feature_importances = builder.importances;
        let sum: f64 = feature_importances.iter().sum();
        if sum > 0.0 {
            for imp in &mut feature_importances {
                *imp /= sum;
            }
        }

        Self {
            root,
            feature_importances,
        }
    }

    pub fn predict_proba(&self, row: ArrayView1<f64>) -> &[f64] {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { probabilities, .. } => return probabilities,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a [usize],
    class_weights: &'a [f64],
    params: TreeParams,
    importances: Vec<f64>,
    rng: &'a mut ChaCha8Rng,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Weighted child impurity: w_left * gini_left + w_right * gini_right
    child_impurity: f64,
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: Vec<usize>, depth: usize) -> TreeNode {
        let counts = self.weighted_counts(&indices);
        let total: f64 = counts.iter().sum();
        let impurity = gini(&counts, total);

        if depth >= self.params.max_depth
            || indices.len() < self.params.min_samples_split
            || impurity <= MIN_GAIN
        {
            return leaf(counts, total, indices.len());
        }

        let split = match self.best_split(&indices, total * impurity) {
            Some(split) => split,
            None => return leaf(counts, total, indices.len()),
        };

        self.importances[split.feature] += total * impurity - split.child_impurity;

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[[i, split.feature]] <= split.threshold);

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(left, depth + 1)),
            right: Box::new(self.build(right, depth + 1)),
        }
    }

    fn weighted_counts(&self, indices: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.class_weights.len()];
        for &i in indices {
            counts[self.y[i]] += self.class_weights[self.y[i]];
        }
        counts
    }

    /// Best threshold over a random feature subset, by sorted sweep
    fn best_split(&mut self, indices: &[usize], parent_impurity: f64) -> Option<SplitCandidate> {
        let n_classes = self.class_weights.len();
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut *self.rng);
        features.truncate(self.params.max_features);

        let mut best: Option<SplitCandidate> = None;

        for &feature in &features {
            let mut rows: Vec<(f64, usize)> = indices
                .iter()
                .map(|&i| (self.x[[i, feature]], self.y[i]))
                .collect();
            rows.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0.0; n_classes];
            let mut right = self.weighted_counts(indices);
            let total: f64 = right.iter().sum();
            let mut left_weight = 0.0;

            for k in 0..rows.len().saturating_sub(1) {
                let (value, class) = rows[k];
                let w = self.class_weights[class];
                left[class] += w;
                right[class] -= w;
                left_weight += w;

                let next_value = rows[k + 1].0;
                if value >= next_value {
                    continue;
                }
                let n_left = k + 1;
                if n_left < self.params.min_samples_leaf
                    || rows.len() - n_left < self.params.min_samples_leaf
                {
                    continue;
                }

                let right_weight = total - left_weight;
                let child_impurity =
                    left_weight * gini(&left, left_weight) + right_weight * gini(&right, right_weight);

                if parent_impurity - child_impurity <= MIN_GAIN {
                    continue;
                }
                if best.as_ref().map_or(true, |b| child_impurity < b.child_impurity) {
                    let mut threshold = (value + next_value) / 2.0;
                    if threshold >= next_value {
                        threshold = value;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        child_impurity,
                    });
                }
            }
        }

        best
    }
}

fn leaf(counts: Vec<f64>, total: f64, samples: usize) -> TreeNode {
    let probabilities = if total > 0.0 {
        counts.iter().map(|c| c / total).collect()
    } else {
        vec![1.0 / counts.len() as f64; counts.len()]
    };
    TreeNode::Leaf {
        probabilities,
        samples,
    }
}

/// Gini impurity of weighted class counts
pub fn gini(counts: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>()
}
