use serde::{Deserialize, Serialize};

/// Structural queries the updater needs from the tree being grown.
pub trait TreeView {
    fn num_nodes(&self) -> usize;
    fn parent(&self, nid: usize) -> Option<usize>;
    fn left_child(&self, nid: usize) -> Option<usize>;
    fn right_child(&self, nid: usize) -> Option<usize>;
    fn depth(&self, nid: usize) -> usize;

    fn is_root(&self, nid: usize) -> bool {
        self.parent(nid).is_none()
    }

    fn is_left_child(&self, nid: usize) -> bool {
        self.parent(nid).and_then(|p| self.left_child(p)) == Some(nid)
    }

    /// The other child of this node's parent.
    fn sibling(&self, nid: usize) -> Option<usize> {
        let parent = self.parent(nid)?;
        if self.is_left_child(nid) {
            self.right_child(parent)
        } else {
            self.left_child(parent)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub parent: Option<usize>,
    pub left_child: Option<usize>,
    pub right_child: Option<usize>,
    pub depth: usize,
}

/// Bare tree topology, node `0` is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegTree {
    pub nodes: Vec<TreeNode>,
}

impl Default for RegTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RegTree {
    pub fn new() -> Self {
        RegTree {
            nodes: vec![TreeNode {
                parent: None,
                left_child: None,
                right_child: None,
                depth: 0,
            }],
        }
    }

    /// Give `nid` two children, returning their ids.
    pub fn expand_node(&mut self, nid: usize) -> (usize, usize) {
        let depth = self.nodes[nid].depth + 1;
        let left = self.nodes.len();
        let right = left + 1;
        for _ in 0..2 {
            self.nodes.push(TreeNode {
                parent: Some(nid),
                left_child: None,
                right_child: None,
                depth,
            });
        }
        self.nodes[nid].left_child = Some(left);
        self.nodes[nid].right_child = Some(right);
        (left, right)
    }
}

impl TreeView for RegTree {
    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
    fn parent(&self, nid: usize) -> Option<usize> {
        self.nodes.get(nid).and_then(|n| n.parent)
    }
    fn left_child(&self, nid: usize) -> Option<usize> {
        self.nodes.get(nid).and_then(|n| n.left_child)
    }
    fn right_child(&self, nid: usize) -> Option<usize> {
        self.nodes.get(nid).and_then(|n| n.right_child)
    }
    fn depth(&self, nid: usize) -> usize {
        self.nodes.get(nid).map_or(0, |n| n.depth)
    }
}
