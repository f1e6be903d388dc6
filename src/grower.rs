use crate::tree::TreeView;
use serde::{Deserialize, Serialize};

/// Policy for growing the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowPolicy {
    /// Depth-wise growth (level-wise).
    DepthWise,
    /// Loss-guided growth (leaf-wise).
    LossGuide,
}

/// A node waiting to be expanded, handed in by the growth policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandEntry {
    pub nid: usize,
    pub depth: usize,
}

impl ExpandEntry {
    pub fn new(nid: usize, depth: usize) -> Self {
        ExpandEntry { nid, depth }
    }

    pub fn sibling_id(&self, tree: &dyn TreeView) -> Option<usize> {
        tree.sibling(self.nid)
    }
}
