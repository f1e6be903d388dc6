//! Splitter
//!
//! Enumerates the candidate thresholds of one (node, feature) pair over the
//! node histogram and keeps the best one.
use crate::constants::{NO_SPLIT_INDEX, SPLIT_INDEX_MASK};
use crate::data::{FloatData, GradStats, HistogramCuts};
use crate::evaluator::SplitEvaluator;
use crate::node::NodeEntry;
use serde::{Deserialize, Serialize};

/// Best split found so far for a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitEntry<T> {
    /// Loss reduction over keeping the node as a leaf.
    pub loss_chg: f32,
    /// Feature id in the low 31 bits, the top bit is set when missing values go left.
    pub sindex: u32,
    /// Rows with a value below this threshold go left.
    pub split_value: f32,
    /// First global bin routed right.
    pub split_bin: u32,
    pub left_sum: GradStats<T>,
    pub right_sum: GradStats<T>,
}

impl<T: FloatData<T>> Default for SplitEntry<T> {
    fn default() -> Self {
        SplitEntry {
            loss_chg: f32::NEG_INFINITY,
            sindex: 0,
            split_value: 0.0,
            split_bin: 0,
            left_sum: GradStats::default(),
            right_sum: GradStats::default(),
        }
    }
}

impl<T: FloatData<T>> SplitEntry<T> {
    pub fn split_index(&self) -> u32 {
        self.sindex & SPLIT_INDEX_MASK
    }

    pub fn default_left(&self) -> bool {
        (self.sindex >> 31) != 0
    }

    /// Whether any candidate has been recorded.
    pub fn is_valid(&self) -> bool {
        self.loss_chg.is_finite()
    }

    /// Greater loss wins; on a tie the smaller split index wins.
    pub fn need_replace(&self, new_loss_chg: f32, split_index: u32) -> bool {
        if !new_loss_chg.is_finite() {
            return false;
        }
        if self.split_index() <= split_index {
            new_loss_chg > self.loss_chg
        } else {
            !(self.loss_chg > new_loss_chg)
        }
    }

    /// Merge another entry into this one, returning true if it replaced it.
    pub fn update(&mut self, other: &SplitEntry<T>) -> bool {
        if self.need_replace(other.loss_chg, other.split_index()) {
            *self = *other;
            true
        } else {
            false
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_with(
        &mut self,
        loss_chg: f32,
        fid: usize,
        split_value: f32,
        split_bin: u32,
        default_left: bool,
        left_sum: GradStats<T>,
        right_sum: GradStats<T>,
    ) -> bool {
        let split_index = fid as u32 & SPLIT_INDEX_MASK;
        if !self.need_replace(loss_chg, split_index) {
            return false;
        }
        self.loss_chg = loss_chg;
        self.sindex = if default_left { split_index | (1u32 << 31) } else { split_index };
        self.split_value = split_value;
        self.split_bin = split_bin;
        self.left_sum = left_sum;
        self.right_sum = right_sum;
        true
    }
}

/// One (node, feature) pair to evaluate this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitQuery {
    pub nid: usize,
    pub fid: usize,
}

/// Direction of the scan, which also decides where missing values go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Prefix sums from the lowest bin, missing values go right.
    Forward,
    /// Suffix sums from the highest bin, missing values go left.
    Backward,
}

/// Best candidate held by one lane of the group.
#[derive(Clone, Copy)]
struct LaneBest<T> {
    best: SplitEntry<T>,
    position: usize,
}

/// Shared inputs of every split query of a round.
pub struct EnumerateContext<'a> {
    pub cuts: &'a HistogramCuts,
    pub evaluator: &'a dyn SplitEvaluator,
    pub min_child_weight: f32,
    pub sub_group_size: usize,
}

/// Scan the bins of `fid` in groups of `sub_group_size` lanes and merge the best
/// candidate into `p_best`.
///
/// Lane `l` handles bins `begin + l`, `begin + l + G`, ... and keeps its own best
/// candidate. Running sums are carried strictly in bin order, so the group size
/// never changes the sums a candidate sees. The group then reduces to the highest
/// loss, then the smallest split index, then the earliest bin in scan order.
pub fn enumerate_split<T: FloatData<T>>(
    ctx: &EnumerateContext,
    hist: &[GradStats<T>],
    snode: &NodeEntry<T>,
    p_best: &mut SplitEntry<T>,
    fid: usize,
    nid: usize,
    direction: ScanDirection,
) {
    let range = ctx.cuts.feature_bins(fid);
    if range.is_empty() {
        return;
    }
    let cut_val = ctx.cuts.values();
    let group = ctx.sub_group_size.max(1);
    let min_child_weight = T::from_f32(ctx.min_child_weight);
    let mut lanes = vec![
        LaneBest {
            best: SplitEntry::default(),
            position: usize::MAX,
        };
        group
    ];

    let mut sum = GradStats::<T>::default();
    let n_bins = range.len();
    for step in 0..n_bins {
        let local_id = step % group;
        let i = match direction {
            ScanDirection::Forward => range.start + step,
            ScanDirection::Backward => range.end - 1 - step,
        };
        sum += hist[i];
        if sum.sum_hess < min_child_weight {
            continue;
        }
        let c = snode.stats - sum;
        if c.sum_hess < min_child_weight {
            continue;
        }
        let (left, right) = match direction {
            ScanDirection::Forward => (sum, c),
            ScanDirection::Backward => (c, sum),
        };
        let loss_chg = ctx.evaluator.calc_split_gain(nid, fid, &left.to_f64(), &right.to_f64()) - snode.root_gain;
        let (split_value, split_bin) = match direction {
            ScanDirection::Forward => (cut_val[i], (i + 1) as u32),
            ScanDirection::Backward if i == range.start => (ctx.cuts.min_values()[fid], i as u32),
            ScanDirection::Backward => (cut_val[i - 1], i as u32),
        };
        let lane = &mut lanes[local_id];
        if lane.best.update_with(
            loss_chg,
            fid,
            split_value,
            split_bin,
            direction == ScanDirection::Backward,
            left,
            right,
        ) {
            lane.position = step;
        }
    }

    let total_loss_chg = lanes.iter().map(|l| l.best.loss_chg).fold(f32::NEG_INFINITY, f32::max);
    let total_split_index = lanes
        .iter()
        .map(|l| {
            if l.best.loss_chg == total_loss_chg {
                l.best.sindex
            } else {
                NO_SPLIT_INDEX
            }
        })
        .min()
        .unwrap_or(NO_SPLIT_INDEX);
    let winner = lanes
        .iter()
        .filter(|l| l.best.loss_chg == total_loss_chg && l.best.sindex == total_split_index)
        .min_by_key(|l| l.position);
    if let Some(w) = winner {
        p_best.update(&w.best);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::TreeEvaluator;
    use approx::assert_relative_eq;

    fn evaluator(min_child_weight: f32) -> TreeEvaluator {
        TreeEvaluator {
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            max_delta_step: 0.0,
            min_child_weight,
        }
    }

    fn node(hist: &[GradStats<f64>], e: &TreeEvaluator) -> NodeEntry<f64> {
        let stats: GradStats<f64> = hist.iter().copied().sum();
        NodeEntry::new(stats, e.calc_weight(None, &stats), e.calc_gain(None, &stats))
    }

    fn scan(
        cuts: &HistogramCuts,
        hist: &[GradStats<f64>],
        fid: usize,
        mcw: f32,
        group: usize,
        direction: ScanDirection,
    ) -> SplitEntry<f64> {
        let e = evaluator(mcw);
        let ctx = EnumerateContext {
            cuts,
            evaluator: &e,
            min_child_weight: mcw,
            sub_group_size: group,
        };
        let snode = node(&hist[cuts.feature_bins(fid)], &e);
        let mut best = SplitEntry::default();
        enumerate_split(&ctx, hist, &snode, &mut best, fid, 0, direction);
        best
    }

    fn one_feature(hist_len: usize) -> HistogramCuts {
        let cuts: Vec<f32> = (1..=hist_len).map(|c| c as f32).collect();
        HistogramCuts::from_feature_cuts(&[cuts], &[0.0]).unwrap()
    }

    #[test]
    fn test_split_entry_tie_break() {
        let mut best = SplitEntry::<f64>::default();
        assert!(best.update_with(1.0, 3, 0.5, 1, false, GradStats::default(), GradStats::default()));
        // Same loss, larger feature loses.
        assert!(!best.update_with(1.0, 5, 0.5, 1, false, GradStats::default(), GradStats::default()));
        // Same loss, smaller feature wins.
        assert!(best.update_with(1.0, 2, 0.5, 1, false, GradStats::default(), GradStats::default()));
        assert_eq!(best.split_index(), 2);
        // Infinite and NaN losses never win.
        assert!(!best.update_with(f32::INFINITY, 0, 0.5, 1, false, GradStats::default(), GradStats::default()));
        assert!(!best.update_with(f32::NAN, 0, 0.5, 1, false, GradStats::default(), GradStats::default()));
        assert!(best.update_with(2.0, 9, 0.5, 1, true, GradStats::default(), GradStats::default()));
        assert!(best.default_left());
        assert_eq!(best.split_index(), 9);
    }

    #[test]
    fn test_forward_scan_finds_best_threshold() {
        let cuts = one_feature(4);
        let hist = vec![
            GradStats::new(-3.0, 2.0),
            GradStats::new(-2.0, 2.0),
            GradStats::new(2.0, 2.0),
            GradStats::new(3.0, 2.0),
        ];
        let best = scan(&cuts, &hist, 0, 1.0, 4, ScanDirection::Forward);
        assert_eq!(best.split_index(), 0);
        assert!(!best.default_left());
        assert_eq!(best.split_bin, 2);
        assert_eq!(best.split_value, 2.0);
        assert_eq!(best.left_sum, GradStats::new(-5.0, 4.0));
        assert_eq!(best.right_sum, GradStats::new(5.0, 4.0));
        // 25/5 + 25/5 - 0/9
        assert_relative_eq!(best.loss_chg, 10.0);
    }

    #[test]
    fn test_group_size_does_not_change_result() {
        let cuts = one_feature(37);
        let hist: Vec<GradStats<f64>> = (0..37)
            .map(|i| GradStats::new(((i * 7) % 11) as f64 - 5.0, 1.0 + (i % 3) as f64))
            .collect();
        let reference = scan(&cuts, &hist, 0, 1.0, 1, ScanDirection::Forward);
        for group in [2, 3, 8, 16, 32, 64] {
            assert_eq!(scan(&cuts, &hist, 0, 1.0, group, ScanDirection::Forward), reference);
        }
        let reference = scan(&cuts, &hist, 0, 1.0, 1, ScanDirection::Backward);
        for group in [2, 5, 16, 64] {
            assert_eq!(scan(&cuts, &hist, 0, 1.0, group, ScanDirection::Backward), reference);
        }
    }

    #[test]
    fn test_min_child_weight_boundary() {
        let cuts = one_feature(2);
        let hist = vec![GradStats::new(-2.0, 2.0), GradStats::new(2.0, 2.0)];
        // Left hessian equals the threshold exactly.
        let accepted = scan(&cuts, &hist, 0, 2.0, 4, ScanDirection::Forward);
        assert!(accepted.is_valid());
        assert_eq!(accepted.left_sum.sum_hess, 2.0);
        // Just above the available hessian on either side.
        let rejected = scan(&cuts, &hist, 0, 2.0001, 4, ScanDirection::Forward);
        assert!(!rejected.is_valid());
    }

    #[test]
    fn test_no_qualifying_bin_leaves_best_unchanged() {
        let cuts = one_feature(3);
        let hist = vec![GradStats::new(1.0, 0.5), GradStats::new(-1.0, 0.5), GradStats::new(1.0, 0.5)];
        let e = evaluator(1.0);
        let ctx = EnumerateContext {
            cuts: &cuts,
            evaluator: &e,
            min_child_weight: 1.0,
            sub_group_size: 2,
        };
        let snode = node(&hist, &e);
        let mut best = SplitEntry::default();
        best.update_with(0.25, 7, 9.0, 1, false, GradStats::default(), GradStats::default());
        let before = best;
        enumerate_split(&ctx, &hist, &snode, &mut best, 0, 0, ScanDirection::Forward);
        assert_eq!(best, before);
    }

    #[test]
    fn test_backward_scan_sends_missing_left() {
        let cuts = HistogramCuts::from_feature_cuts(&[vec![1.0, 2.0, 3.0]], &[0.5]).unwrap();
        let hist = vec![GradStats::new(-1.0, 1.0), GradStats::new(-1.0, 1.0), GradStats::new(4.0, 2.0)];
        let e = evaluator(0.0);
        let ctx = EnumerateContext {
            cuts: &cuts,
            evaluator: &e,
            min_child_weight: 0.0,
            sub_group_size: 2,
        };
        // Two missing rows with gradient -3 belong to the node but to no bin.
        let stats = GradStats::new(-1.0, 6.0);
        let snode = NodeEntry::new(stats, e.calc_weight(None, &stats), e.calc_gain(None, &stats));
        let mut best = SplitEntry::default();
        enumerate_split(&ctx, &hist, &snode, &mut best, 0, 0, ScanDirection::Backward);
        assert!(best.default_left());
        assert_eq!(best.split_bin, 2);
        assert_eq!(best.split_value, 2.0);
        assert_eq!(best.right_sum, GradStats::new(4.0, 2.0));
        assert_eq!(best.left_sum, GradStats::new(-5.0, 4.0));
    }
}
