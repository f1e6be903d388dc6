//! Evaluator
//!
//! Leaf weight and gain formulas. The updater treats them as pure functions of
//! the node aggregates; callers may plug in their own through [`SplitEvaluator`].
use crate::config::TrainParam;
use crate::data::GradStats;

pub trait SplitEvaluator: Send + Sync {
    /// Optimal leaf weight of a node with aggregate `stats`.
    fn calc_weight(&self, parent: Option<usize>, stats: &GradStats<f64>) -> f32;
    /// Loss reduction of turning a node with aggregate `stats` into a leaf.
    fn calc_gain(&self, parent: Option<usize>, stats: &GradStats<f64>) -> f32;
    /// Combined gain of the two children of a candidate split of `nid` on `fid`.
    fn calc_split_gain(&self, nid: usize, fid: usize, left: &GradStats<f64>, right: &GradStats<f64>) -> f32 {
        self.calc_gain(Some(nid), left) + self.calc_gain(Some(nid), right)
    }
}

/// Second order gain with L1 / L2 penalties and an optional cap on the step size.
#[derive(Debug, Clone, Copy)]
pub struct TreeEvaluator {
    pub reg_lambda: f32,
    pub reg_alpha: f32,
    pub max_delta_step: f32,
    pub min_child_weight: f32,
}

impl TreeEvaluator {
    pub fn from_param(param: &TrainParam) -> Self {
        TreeEvaluator {
            reg_lambda: param.reg_lambda,
            reg_alpha: param.reg_alpha,
            max_delta_step: param.max_delta_step,
            min_child_weight: param.min_child_weight,
        }
    }

    #[inline]
    fn threshold_l1(&self, w: f64) -> f64 {
        let alpha = f64::from(self.reg_alpha);
        if w > alpha {
            w - alpha
        } else if w < -alpha {
            w + alpha
        } else {
            0.0
        }
    }

    fn is_too_light(&self, stats: &GradStats<f64>) -> bool {
        stats.sum_hess < f64::from(self.min_child_weight) || stats.sum_hess <= 0.0
    }

    /// Gain of a node whose weight was fixed to `w`.
    #[inline]
    fn gain_given_weight(&self, stats: &GradStats<f64>, w: f64) -> f64 {
        let lambda = f64::from(self.reg_lambda);
        let alpha = f64::from(self.reg_alpha);
        -(2.0 * stats.sum_grad * w + (stats.sum_hess + lambda) * (w * w) + 2.0 * alpha * w.abs())
    }
}

impl SplitEvaluator for TreeEvaluator {
    fn calc_weight(&self, _parent: Option<usize>, stats: &GradStats<f64>) -> f32 {
        if self.is_too_light(stats) {
            return 0.0;
        }
        let mut w = -self.threshold_l1(stats.sum_grad) / (stats.sum_hess + f64::from(self.reg_lambda));
        let max_delta_step = f64::from(self.max_delta_step);
        if max_delta_step != 0.0 && w.abs() > max_delta_step {
            w = max_delta_step.copysign(w);
        }
        w as f32
    }

    fn calc_gain(&self, parent: Option<usize>, stats: &GradStats<f64>) -> f32 {
        if self.is_too_light(stats) {
            return 0.0;
        }
        if self.max_delta_step == 0.0 {
            let g = self.threshold_l1(stats.sum_grad);
            (g * g / (stats.sum_hess + f64::from(self.reg_lambda))) as f32
        } else {
            let w = f64::from(self.calc_weight(parent, stats));
            self.gain_given_weight(stats, w) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn evaluator() -> TreeEvaluator {
        TreeEvaluator {
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            max_delta_step: 0.0,
            min_child_weight: 1.0,
        }
    }

    #[test]
    fn test_weight_and_gain() {
        let e = evaluator();
        let s = GradStats::new(-4.0, 3.0);
        assert_relative_eq!(e.calc_weight(None, &s), 1.0);
        assert_relative_eq!(e.calc_gain(None, &s), 4.0);
        let light = GradStats::new(-4.0, 0.5);
        assert_eq!(e.calc_weight(None, &light), 0.0);
        assert_eq!(e.calc_gain(None, &light), 0.0);
    }

    #[test]
    fn test_l1_and_max_delta_step() {
        let mut e = evaluator();
        e.reg_alpha = 1.0;
        let s = GradStats::new(-4.0, 3.0);
        assert_relative_eq!(e.calc_weight(None, &s), 0.75);
        assert_relative_eq!(e.calc_gain(None, &s), 2.25);
        let small = GradStats::new(0.5, 3.0);
        assert_eq!(e.calc_weight(None, &small), 0.0);

        let mut capped = evaluator();
        capped.max_delta_step = 0.5;
        assert_relative_eq!(capped.calc_weight(None, &s), 0.5);
        // -(2 * -4 * 0.5 + 4 * 0.25)
        assert_relative_eq!(capped.calc_gain(None, &s), 3.0);
    }

    #[test]
    fn test_split_gain_sums_children() {
        let e = evaluator();
        let l = GradStats::new(-4.0, 3.0);
        let r = GradStats::new(2.0, 1.0);
        assert_relative_eq!(e.calc_split_gain(0, 0, &l, &r), 6.0);
    }
}
