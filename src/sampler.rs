//! Sampler
//!
//! Selects the rows taking part in a boosting round, allowing for stochastic
//! gradient boosting. Rows with a negative hessian are never selected.
use crate::data::GradientPair;
use crate::errors::HistError;
use log::debug;
use rand::distributions::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleMethod {
    Uniform,
    GradientBased,
}

/// A sampler chooses the row subset prior to building a tree.
pub trait Sampler {
    /// Return the chosen rows in ascending order, and the seed counter to use next round.
    fn sample(&self, gpair: &[GradientPair], seed: u64, pool: &ThreadPool) -> (Vec<usize>, u64);
}

/// Bernoulli subsampling, one independent draw per row.
///
/// Row `i` draws from a stream seeded with `seed + i`, so the outcome of a row
/// does not depend on which thread evaluates it.
pub struct UniformSampler {
    subsample: f32,
    coin: Bernoulli,
}

impl UniformSampler {
    pub fn new(method: SampleMethod, subsample: f32) -> Result<Self, HistError> {
        if method != SampleMethod::Uniform {
            return Err(HistError::UnsupportedSampling(format!("{:?}", method)));
        }
        let coin = Bernoulli::new(f64::from(subsample)).map_err(|_| {
            HistError::InvalidParameter(
                "subsample".to_string(),
                "real value within range 0 and 1".to_string(),
                subsample.to_string(),
            )
        })?;
        Ok(UniformSampler { subsample, coin })
    }
}

impl Sampler for UniformSampler {
    fn sample(&self, gpair: &[GradientPair], seed: u64, pool: &ThreadPool) -> (Vec<usize>, u64) {
        let num_rows = gpair.len();
        let next_seed = seed.wrapping_add(num_rows as u64);
        let coin = &self.coin;
        let rows = pool.install(|| {
            compact(num_rows, |i| {
                if gpair[i].hess < 0.0 {
                    return false;
                }
                let mut engine = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                coin.sample(&mut engine)
            })
        });
        debug!("Sampled {} of {} rows, subsample {}", rows.len(), num_rows, self.subsample);
        (rows, next_seed)
    }
}

/// All rows with a non-negative hessian, in their original order.
///
/// The common case where every hessian is valid costs a single pass.
pub fn valid_rows(gpair: &[GradientPair], pool: &ThreadPool) -> Vec<usize> {
    let num_rows = gpair.len();
    let has_neg_hess = AtomicU8::new(0);
    let mut rows = vec![0usize; num_rows];
    pool.install(|| {
        rows.par_iter_mut().enumerate().for_each(|(idx, r)| {
            *r = idx;
            if gpair[idx].hess < 0.0 {
                has_neg_hess.fetch_max(1, Ordering::Relaxed);
            }
        });
    });
    if has_neg_hess.into_inner() == 0 {
        return rows;
    }
    let rows = pool.install(|| compact(num_rows, |i| gpair[i].hess >= 0.0));
    debug!("Excluded {} rows with negative hessian", num_rows - rows.len());
    rows
}

/// Parallel stream compaction of `0..num_rows` through an atomic write cursor.
/// Slots are claimed in arbitrary order, so the result is sorted afterwards.
fn compact<F>(num_rows: usize, keep: F) -> Vec<usize>
where
    F: Fn(usize) -> bool + Sync,
{
    let cursor = AtomicUsize::new(0);
    let out: Vec<AtomicUsize> = (0..num_rows).map(|_| AtomicUsize::new(0)).collect();
    (0..num_rows).into_par_iter().for_each(|i| {
        if keep(i) {
            let pos = cursor.fetch_add(1, Ordering::Relaxed);
            out[pos].store(i, Ordering::Relaxed);
        }
    });
    let n_kept = cursor.into_inner();
    let mut rows: Vec<usize> = out.into_iter().take(n_kept).map(AtomicUsize::into_inner).collect();
    rows.par_sort_unstable();
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    fn unit_gpair(n: usize) -> Vec<GradientPair> {
        (0..n).map(|i| GradientPair::new(i as f32, 1.0)).collect()
    }

    #[test]
    fn test_uniform_sampler() {
        let pool = pool();
        let gpair = unit_gpair(1000);
        let sampler = UniformSampler::new(SampleMethod::Uniform, 0.5).unwrap();
        let (chosen, next_seed) = sampler.sample(&gpair, 42, &pool);
        assert_eq!(next_seed, 1042);
        assert!(!chosen.is_empty());
        assert!(chosen.len() < gpair.len());
        assert!(chosen.windows(2).all(|w| w[0] < w[1]));

        // The seed counter alone decides the outcome.
        let (again, _) = sampler.sample(&gpair, 42, &pool);
        assert_eq!(chosen, again);
        let single = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let (serial, _) = sampler.sample(&gpair, 42, &single);
        assert_eq!(chosen, serial);
        let (other, _) = sampler.sample(&gpair, next_seed, &pool);
        assert_ne!(chosen, other);
    }

    #[test]
    fn test_uniform_sampler_extremes() {
        let pool = pool();
        let gpair = unit_gpair(100);
        let none = UniformSampler::new(SampleMethod::Uniform, 0.0).unwrap();
        assert!(none.sample(&gpair, 0, &pool).0.is_empty());
        let all = UniformSampler::new(SampleMethod::Uniform, 1.0).unwrap();
        assert_eq!(all.sample(&gpair, 0, &pool).0, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_sampler_skips_negative_hessian() {
        let pool = pool();
        let mut gpair = unit_gpair(50);
        gpair[3].hess = -1.0;
        gpair[40].hess = -1.0;
        let all = UniformSampler::new(SampleMethod::Uniform, 1.0).unwrap();
        let (rows, _) = all.sample(&gpair, 7, &pool);
        assert_eq!(rows.len(), 48);
        assert!(!rows.contains(&3) && !rows.contains(&40));
    }

    #[test]
    fn test_valid_rows() {
        let pool = pool();
        let mut gpair = unit_gpair(5000);
        assert_eq!(valid_rows(&gpair, &pool), (0..5000).collect::<Vec<_>>());
        gpair[0].hess = -1.0;
        gpair[4999].hess = -0.5;
        let rows = valid_rows(&gpair, &pool);
        assert_eq!(rows, (1..4999).collect::<Vec<_>>());
    }

    #[test]
    fn test_gradient_based_rejected() {
        assert!(matches!(
            UniformSampler::new(SampleMethod::GradientBased, 0.5),
            Err(HistError::UnsupportedSampling(_))
        ));
        assert!(UniformSampler::new(SampleMethod::Uniform, 1.5).is_err());
    }
}
