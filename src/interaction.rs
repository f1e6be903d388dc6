//! Interaction Constraints
//!
//! Restricts which features may appear together on a root-to-leaf path. A node
//! may split on any feature belonging to a constraint set that contains every
//! feature already used on its path.
use crate::errors::HistError;
use hashbrown::HashSet;

#[derive(Debug, Clone, Default)]
pub struct InteractionConstraints {
    sets: Vec<HashSet<usize>>,
    /// Features used on the path to each node.
    node_path: Vec<Option<HashSet<usize>>>,
    /// Features each node may split on.
    node_allowed: Vec<Option<HashSet<usize>>>,
}

impl InteractionConstraints {
    /// Parse constraints such as `"[[0, 1], [2, 3, 4]]"`. `None` or an empty list disables them.
    pub fn new(constraints: Option<&str>, n_features: usize) -> Result<Self, HistError> {
        let sets: Vec<Vec<usize>> = match constraints {
            None => Vec::new(),
            Some(s) => serde_json::from_str(s).map_err(|e| HistError::ParseConstraints(format!("{}: {}", s, e)))?,
        };
        if let Some(fid) = sets.iter().flatten().find(|f| **f >= n_features) {
            return Err(HistError::ParseConstraints(format!(
                "feature {} is out of range, there are {} features",
                fid, n_features
            )));
        }
        let mut constraints = InteractionConstraints {
            sets: sets.into_iter().map(|s| s.into_iter().collect()).collect(),
            node_path: Vec::new(),
            node_allowed: Vec::new(),
        };
        constraints.reset();
        Ok(constraints)
    }

    pub fn enabled(&self) -> bool {
        !self.sets.is_empty()
    }

    /// Forget every node but the root.
    pub fn reset(&mut self) {
        self.node_path.clear();
        self.node_allowed.clear();
        if !self.enabled() {
            return;
        }
        let root_allowed: HashSet<usize> = self.sets.iter().flatten().copied().collect();
        self.node_path.push(Some(HashSet::new()));
        self.node_allowed.push(Some(root_allowed));
    }

    /// Whether `nid` may split on `fid`.
    pub fn query(&self, nid: usize, fid: usize) -> bool {
        if !self.enabled() {
            return true;
        }
        match self.node_allowed.get(nid) {
            Some(Some(allowed)) => allowed.contains(&fid),
            _ => false,
        }
    }

    /// Record that `nid` was split on `fid` into `left` and `right`.
    pub fn split(&mut self, nid: usize, fid: usize, left: usize, right: usize) -> Result<(), HistError> {
        if !self.enabled() {
            return Ok(());
        }
        let mut path = match self.node_path.get(nid) {
            Some(Some(path)) => path.clone(),
            _ => return Err(HistError::UnknownNode(nid)),
        };
        path.insert(fid);
        let allowed: HashSet<usize> = self
            .sets
            .iter()
            .filter(|set| path.is_subset(set))
            .flatten()
            .copied()
            .collect();

        let needed = left.max(right) + 1;
        if self.node_path.len() < needed {
            self.node_path.resize(needed, None);
            self.node_allowed.resize(needed, None);
        }
        for child in [left, right] {
            self.node_path[child] = Some(path.clone());
            self.node_allowed[child] = Some(allowed.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_allows_everything() {
        let c = InteractionConstraints::new(None, 3).unwrap();
        assert!(!c.enabled());
        assert!(c.query(0, 2));
        assert!(c.query(17, 0));
        let empty = InteractionConstraints::new(Some("[]"), 3).unwrap();
        assert!(!empty.enabled());
    }

    #[test]
    fn test_children_inherit_sets() {
        let mut c = InteractionConstraints::new(Some("[[0, 1], [1, 2, 3]]"), 5).unwrap();
        assert!(c.query(0, 0));
        assert!(c.query(0, 3));
        assert!(!c.query(0, 4));

        // Feature 1 belongs to both sets.
        c.split(0, 1, 1, 2).unwrap();
        for f in 0..4 {
            assert!(c.query(1, f));
        }
        // Feature 0 only belongs to the first one.
        c.split(1, 0, 3, 4).unwrap();
        assert!(c.query(3, 1));
        assert!(!c.query(3, 2));
        assert!(!c.query(4, 3));
        // Feature 3 only belongs to the second one.
        c.split(2, 3, 5, 6).unwrap();
        assert!(c.query(5, 2));
        assert!(!c.query(6, 0));
        assert!(!c.query(9, 0));
    }

    #[test]
    fn test_bad_constraints() {
        assert!(matches!(
            InteractionConstraints::new(Some("[[0, 1"), 3),
            Err(HistError::ParseConstraints(_))
        ));
        assert!(matches!(
            InteractionConstraints::new(Some("[[0, 7]]"), 3),
            Err(HistError::ParseConstraints(_))
        ));
        let mut c = InteractionConstraints::new(Some("[[0, 1]]"), 3).unwrap();
        assert!(matches!(c.split(4, 0, 5, 6), Err(HistError::UnknownNode(4))));
    }
}
