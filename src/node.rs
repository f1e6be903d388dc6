use crate::data::{FloatData, GradStats};
use crate::splitter::SplitEntry;
use serde::{Deserialize, Serialize};

/// Statistics of a node taking part in split evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry<T> {
    /// Gradient and hessian sums of the rows in the node.
    pub stats: GradStats<T>,
    /// Optimal leaf weight if the node is not split.
    pub weight: f32,
    /// Gain of the node as a leaf, subtracted from every candidate split.
    pub root_gain: f32,
    pub best: SplitEntry<T>,
}

impl<T: FloatData<T>> Default for NodeEntry<T> {
    fn default() -> Self {
        NodeEntry {
            stats: GradStats::default(),
            weight: 0.0,
            root_gain: 0.0,
            best: SplitEntry::default(),
        }
    }
}

impl<T: FloatData<T>> NodeEntry<T> {
    pub fn new(stats: GradStats<T>, weight: f32, root_gain: f32) -> Self {
        NodeEntry {
            stats,
            weight,
            root_gain,
            best: SplitEntry::default(),
        }
    }
}
