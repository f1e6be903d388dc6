//! Column Sampler
//!
//! Features considered for a node are drawn in three nested stages: once per
//! tree, once per depth level from the tree set, and once per node from the
//! level set.
use crate::config::TrainParam;
use log::trace;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct ColumnSampler {
    colsample_bytree: f32,
    colsample_bylevel: f32,
    colsample_bynode: f32,
    tree_features: Vec<usize>,
    /// Level sets, drawn the first time a depth is queried.
    level_features: Vec<Option<Vec<usize>>>,
    rng: StdRng,
}

impl ColumnSampler {
    pub fn new(colsample_bytree: f32, colsample_bylevel: f32, colsample_bynode: f32) -> Self {
        ColumnSampler {
            colsample_bytree,
            colsample_bylevel,
            colsample_bynode,
            tree_features: Vec::new(),
            level_features: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn from_param(param: &TrainParam) -> Self {
        ColumnSampler::new(param.colsample_bytree, param.colsample_bylevel, param.colsample_bynode)
    }

    /// Start a new tree over `n_features` features.
    pub fn init(&mut self, n_features: usize, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        let all: Vec<usize> = (0..n_features).collect();
        self.tree_features = sample_features(&all, self.colsample_bytree, &mut self.rng);
        self.level_features.clear();
        trace!("Column sampler kept {} of {} features for the tree", self.tree_features.len(), n_features);
    }

    pub fn tree_features(&self) -> &[usize] {
        &self.tree_features
    }

    /// Features a node at `depth` may split on, in ascending order.
    pub fn feature_set(&mut self, depth: usize) -> Vec<usize> {
        if self.level_features.len() <= depth {
            self.level_features.resize(depth + 1, None);
        }
        if self.level_features[depth].is_none() {
            let level = sample_features(&self.tree_features, self.colsample_bylevel, &mut self.rng);
            self.level_features[depth] = Some(level);
        }
        let level = self.level_features[depth].as_deref().unwrap_or(&[]);
        if self.colsample_bynode >= 1.0 {
            return level.to_vec();
        }
        sample_features(level, self.colsample_bynode, &mut self.rng)
    }
}

/// Keep a `rate` fraction of `features`, at least one when any are given.
fn sample_features(features: &[usize], rate: f32, rng: &mut StdRng) -> Vec<usize> {
    if rate >= 1.0 || features.is_empty() {
        return features.to_vec();
    }
    let n = ((rate * features.len() as f32) as usize).max(1);
    let mut chosen: Vec<usize> = sample(rng, features.len(), n).into_iter().map(|i| features[i]).collect();
    chosen.sort_unstable();
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_sampling_keeps_everything() {
        let mut sampler = ColumnSampler::new(1.0, 1.0, 1.0);
        sampler.init(5, 0);
        assert_eq!(sampler.feature_set(0), vec![0, 1, 2, 3, 4]);
        assert_eq!(sampler.feature_set(3), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cascade_is_nested() {
        let mut sampler = ColumnSampler::new(0.5, 0.5, 0.5);
        sampler.init(40, 7);
        let tree = sampler.tree_features().to_vec();
        assert_eq!(tree.len(), 20);
        let level = sampler.level_features_for_test(2);
        assert_eq!(level.len(), 10);
        assert!(level.iter().all(|f| tree.contains(f)));
        let node = sampler.feature_set(2);
        assert_eq!(node.len(), 5);
        assert!(node.iter().all(|f| level.contains(f)));
        assert!(node.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_level_set_is_cached_and_at_least_one() {
        let mut sampler = ColumnSampler::new(1.0, 0.01, 1.0);
        sampler.init(10, 3);
        let first = sampler.feature_set(1);
        assert_eq!(first.len(), 1);
        assert_eq!(sampler.feature_set(1), first);
    }

    #[test]
    fn test_same_seed_same_features() {
        let mut a = ColumnSampler::new(0.3, 1.0, 1.0);
        let mut b = ColumnSampler::new(0.3, 1.0, 1.0);
        a.init(50, 11);
        b.init(50, 11);
        assert_eq!(a.tree_features(), b.tree_features());
    }

    impl ColumnSampler {
        fn level_features_for_test(&mut self, depth: usize) -> Vec<usize> {
            let before = self.colsample_bynode;
            self.colsample_bynode = 1.0;
            let level = self.feature_set(depth);
            self.colsample_bynode = before;
            level
        }
    }
}
