//! Histogram synchronization
//!
//! Strategies chosen once per updater: how histogram rows are allocated for a
//! round, and how the histograms of the round are completed across workers.
use crate::data::FloatData;
use crate::errors::HistError;
use crate::histogram::allreduce_hist;
use crate::tree::TreeView;
use crate::updater::HistUpdater;
use log::trace;

/// Completes the histograms of a round once the local ones are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistSynchronizer {
    /// Single worker, only the subtraction trick runs.
    NoOp,
    /// Explicitly built histograms are summed across workers before subtraction.
    Distributed,
}

impl HistSynchronizer {
    pub fn sync_histograms<T: FloatData<T>>(
        &self,
        updater: &mut HistUpdater<T>,
        sync_ids: &[usize],
        tree: &dyn TreeView,
    ) -> Result<(), HistError> {
        if let HistSynchronizer::Distributed = self {
            for nid in sync_ids {
                let hist = updater.hist.get_mut(*nid)?;
                allreduce_hist(hist, updater.collective.as_ref())?;
            }
            trace!("Synchronized {} histograms across workers", sync_ids.len());
        }
        subtract_siblings(updater, tree)?;
        release_parents(updater, tree);
        Ok(())
    }
}

/// Derive each subtraction node from its parent and its built sibling.
fn subtract_siblings<T: FloatData<T>>(updater: &mut HistUpdater<T>, tree: &dyn TreeView) -> Result<(), HistError> {
    let nodes = std::mem::take(&mut updater.nodes_for_subtraction_trick);
    let result = nodes.iter().try_for_each(|entry| -> Result<(), HistError> {
        let parent = tree.parent(entry.nid).ok_or(HistError::UnknownNode(entry.nid))?;
        let sibling = entry.sibling_id(tree).ok_or(HistError::UnknownNode(entry.nid))?;
        updater.hist.subtract(entry.nid, parent, sibling, &updater.pool)?;
        Ok(())
    });
    updater.nodes_for_subtraction_trick = nodes;
    result
}

/// Every child of the round now has its own histogram, including the ones
/// whose sibling is not expanded, so the parents go back to the pool.
fn release_parents<T: FloatData<T>>(updater: &mut HistUpdater<T>, tree: &dyn TreeView) {
    let HistUpdater {
        hist,
        nodes_for_explicit_hist_build,
        nodes_for_subtraction_trick,
        ..
    } = updater;
    for entry in nodes_for_explicit_hist_build.iter().chain(nodes_for_subtraction_trick.iter()) {
        if let Some(parent) = tree.parent(entry.nid) {
            hist.release(parent);
        }
    }
}

/// Allocates the histogram rows of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistRowsAdder {
    /// Any number of nodes per round.
    DepthWise,
    /// At most one built node and one derived node per round.
    LossGuided,
}

impl HistRowsAdder {
    /// Returns the nodes whose histograms are built explicitly, the ones to synchronize.
    pub fn add_hist_rows<T: FloatData<T>>(
        &self,
        updater: &mut HistUpdater<T>,
        tree: &dyn TreeView,
    ) -> Result<Vec<usize>, HistError> {
        if let HistRowsAdder::LossGuided = self {
            if updater.nodes_for_explicit_hist_build.len() > 1 || updater.nodes_for_subtraction_trick.len() > 1 {
                return Err(HistError::InvalidExpansion(format!(
                    "loss guided growth builds one node at a time, got {} built and {} derived",
                    updater.nodes_for_explicit_hist_build.len(),
                    updater.nodes_for_subtraction_trick.len()
                )));
            }
        }

        for entry in updater.nodes_for_subtraction_trick.iter() {
            let parent = tree.parent(entry.nid).ok_or(HistError::UnknownNode(entry.nid))?;
            if !updater.hist.contains(parent) {
                return Err(HistError::MissingHistogram(parent));
            }
            let sibling = entry.sibling_id(tree).ok_or(HistError::UnknownNode(entry.nid))?;
            if !updater.nodes_for_explicit_hist_build.iter().any(|e| e.nid == sibling) {
                return Err(HistError::InvalidExpansion(format!(
                    "node {} is derived but its sibling {} is not built",
                    entry.nid, sibling
                )));
            }
        }

        let mut sync_ids = Vec::with_capacity(updater.nodes_for_explicit_hist_build.len());
        for entry in updater.nodes_for_explicit_hist_build.iter() {
            updater.hist.add_hist_row(entry.nid);
            sync_ids.push(entry.nid);
        }
        for entry in updater.nodes_for_subtraction_trick.iter() {
            updater.hist.add_hist_row(entry.nid);
        }
        Ok(sync_ids)
    }
}
