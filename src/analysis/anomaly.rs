// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Isolation forest over multivariate features
//!
//! Each tree isolates a subsample with random axis-aligned splits. Points
//! that are isolated after few splits are anomalous: the score
//! `2^(-E[h(x)] / c(ψ))` approaches 1 for outliers and sits below 0.5 for
//! dense regions. The decision threshold is the `1 - contamination` quantile
//! of the training scores and is fixed once the forest is fitted.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{MonitorError, Result};

/// Euler-Mascheroni constant
const EULER_GAMMA: f64 = 0.5772156649;

/// Feature spans below this are treated as constant
const MIN_SPAN: f64 = 1e-12;

/// Forest hyper-parameters
#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated quantile, `q` in [0, 1]
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build<R: Rng>(data: &DMatrix<f64>, rows: &mut [usize], max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: Self::grow(data, rows, 0, max_depth, rng),
        }
    }

    fn grow<R: Rng>(
        data: &DMatrix<f64>,
        rows: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Node {
        if rows.len() <= 1 || depth >= max_depth {
            return Node::Leaf { size: rows.len() };
        }

        // Only features that still vary inside this node can split it
        let spans: Vec<(usize, f64, f64)> = (0..data.ncols())
            .filter_map(|feature| {
                let (min, max) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &r| {
                    let x = data[(r, feature)];
                    (lo.min(x), hi.max(x))
                });
                (max - min > MIN_SPAN).then_some((feature, min, max))
            })
            .collect();

        if spans.is_empty() {
            return Node::Leaf { size: rows.len() };
        }

        let (feature, min, max) = spans[rng.gen_range(0..spans.len())];
        let threshold = rng.gen_range(min..max);

        let mut split = 0;
        for i in 0..rows.len() {
            if data[(rows[i], feature)] <= threshold {
                rows.swap(i, split);
                split += 1;
            }
        }

        let (left, right) = rows.split_at_mut(split);
        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::grow(data, left, depth + 1, max_depth, rng)),
            right: Box::new(Self::grow(data, right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;

        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] <= *threshold { &**left } else { &**right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Isolation forest with a threshold frozen at fit time
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    threshold: f64,
    contamination: f64,
}

impl IsolationForest {
    /// Fit on the rows of `data`
    pub fn fit(data: &DMatrix<f64>, params: &ForestParams) -> Result<Self> {
        let n = data.nrows();
        if n < 2 {
            return Err(MonitorError::InsufficientData {
                required: 2,
                actual: n,
            });
        }
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(MonitorError::InvalidParameter(format!(
                "contamination must be in (0, 0.5], got {}",
                params.contamination
            )));
        }
        if params.n_estimators == 0 || params.max_samples < 2 {
            return Err(MonitorError::InvalidParameter(
                "isolation forest needs at least one tree and two samples per tree".to_string(),
            ));
        }

        let sample_size = params.max_samples.min(n);
        let max_depth = ((sample_size as f64).log2().ceil() as usize).max(1);

        // One seed per tree so trees can be grown in parallel reproducibly
        let mut master = ChaCha8Rng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.gen()).collect();

        let trees: Vec<IsolationTree> = seeds
            .into_par_iter()
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut rows = index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::build(data, &mut rows, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features: data.ncols(),
            threshold: f64::INFINITY,
            contamination: params.contamination,
        };

        let scores = forest.score_matrix(data);
        forest.threshold = quantile(&scores, 1.0 - params.contamination);

        debug!(
            "Isolation forest: {} trees, ψ={}, depth≤{}, threshold={:.4}",
            forest.trees.len(),
            sample_size,
            max_depth,
            forest.threshold
        );

        Ok(forest)
    }

    /// Anomaly score in (0, 1]; higher is more anomalous
    pub fn score(&self, point: &[f64]) -> f64 {
        let mean_depth = self
            .trees
            .iter()
            .map(|tree| tree.path_length(point))
            .sum::<f64>()
            / self.trees.len() as f64;

        2.0_f64.powf(-mean_depth / average_path_length(self.sample_size))
    }

    /// Score every row of `data`
    pub fn score_matrix(&self, data: &DMatrix<f64>) -> Vec<f64> {
        (0..data.nrows())
            .map(|r| {
                let row: Vec<f64> = data.row(r).iter().copied().collect();
                self.score(&row)
            })
            .collect()
    }

    /// Whether a point scores strictly above the frozen threshold
    pub fn is_anomaly(&self, point: &[f64]) -> bool {
        self.score(point) > self.threshold
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}
