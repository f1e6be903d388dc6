//! Hist Updater
//!
//! Drives one tree's worth of histogram rounds: row selection, histogram
//! building with the subtraction trick, node statistics and split evaluation.
//! Which nodes to expand, and when to stop, is left to the caller.
use crate::collective::Collective;
use crate::column_sampler::ColumnSampler;
use crate::config::TrainParam;
use crate::constants::HIST_BLOCK_ROWS;
use crate::data::{DataLayout, FloatData, GHistIndexMatrix, GradStats, GradientPair};
use crate::errors::HistError;
use crate::evaluator::{SplitEvaluator, TreeEvaluator};
use crate::grower::{ExpandEntry, GrowPolicy};
use crate::hist_sync::{HistRowsAdder, HistSynchronizer};
use crate::histogram::{build_hist, HistBuffer, HistCollection};
use crate::interaction::InteractionConstraints;
use crate::node::NodeEntry;
use crate::row_set::RowSetCollection;
use crate::sampler::{valid_rows, Sampler, UniformSampler};
use crate::splitter::{enumerate_split, EnumerateContext, ScanDirection, SplitEntry, SplitQuery};
use crate::tree::{RegTree, TreeView};
use hashbrown::HashSet;
use log::{debug, trace, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

pub struct HistUpdater<T> {
    param: TrainParam,
    pub(crate) pool: ThreadPool,
    pub(crate) collective: Arc<dyn Collective>,
    evaluator: Box<dyn SplitEvaluator>,
    sampler: UniformSampler,
    column_sampler: ColumnSampler,
    interaction_constraints: InteractionConstraints,
    hist_synchronizer: HistSynchronizer,
    hist_rows_adder: HistRowsAdder,
    row_set_collection: RowSetCollection,
    pub(crate) hist: HistCollection<T>,
    hist_buffer: HistBuffer<T>,
    snode: Vec<NodeEntry<T>>,
    data_layout: DataLayout,
    fid_least_bins: usize,
    /// Counter-based seed, advanced by the number of rows every subsampled round.
    seed: u64,
    /// Trees started so far. Column sampling is seeded from it, as every worker counts the same.
    n_trees: u64,
    pub(crate) nodes_for_explicit_hist_build: Vec<ExpandEntry>,
    pub(crate) nodes_for_subtraction_trick: Vec<ExpandEntry>,
}

impl<T: FloatData<T>> HistUpdater<T> {
    pub fn new(param: TrainParam, collective: Arc<dyn Collective>) -> Result<Self, HistError> {
        param.validate()?;
        let sampler = UniformSampler::new(param.sampling_method, param.subsample)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(param.num_threads.unwrap_or(0))
            .build()
            .map_err(|e| HistError::Device(e.to_string()))?;
        let hist_synchronizer = if collective.world_size() > 1 {
            HistSynchronizer::Distributed
        } else {
            HistSynchronizer::NoOp
        };
        let hist_rows_adder = match param.grow_policy {
            GrowPolicy::DepthWise => HistRowsAdder::DepthWise,
            GrowPolicy::LossGuide => HistRowsAdder::LossGuided,
        };
        debug!(
            "Hist updater on {} threads, rank {} of {}, {:?} / {:?}",
            pool.current_num_threads(),
            collective.rank(),
            collective.world_size(),
            hist_synchronizer,
            hist_rows_adder
        );
        Ok(HistUpdater {
            evaluator: Box::new(TreeEvaluator::from_param(&param)),
            column_sampler: ColumnSampler::from_param(&param),
            interaction_constraints: InteractionConstraints::default(),
            seed: param.seed,
            n_trees: 0,
            param,
            pool,
            collective,
            sampler,
            hist_synchronizer,
            hist_rows_adder,
            row_set_collection: RowSetCollection::new(),
            hist: HistCollection::default(),
            hist_buffer: HistBuffer::default(),
            snode: Vec::new(),
            data_layout: DataLayout::Dense,
            fid_least_bins: 0,
            nodes_for_explicit_hist_build: Vec::new(),
            nodes_for_subtraction_trick: Vec::new(),
        })
    }

    /// Replace the default gain and weight formulas.
    pub fn with_evaluator(mut self, evaluator: Box<dyn SplitEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn param(&self) -> &TrainParam {
        &self.param
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn data_layout(&self) -> DataLayout {
        self.data_layout
    }

    pub fn row_set(&self) -> &RowSetCollection {
        &self.row_set_collection
    }

    pub fn histogram(&self, nid: usize) -> Result<&[GradStats<T>], HistError> {
        self.hist.get(nid)
    }

    pub fn node_entry(&self, nid: usize) -> Result<&NodeEntry<T>, HistError> {
        self.snode.get(nid).ok_or(HistError::UnknownNode(nid))
    }

    /// Prepare a new tree: select the rows, reset histograms and node statistics,
    /// and inspect the layout of the matrix.
    pub fn init_data(&mut self, gmat: &GHistIndexMatrix, gpair: &[GradientPair]) -> Result<(), HistError> {
        self.param.validate()?;
        if gpair.len() != gmat.n_rows() {
            return Err(HistError::InvalidMatrix(format!(
                "{} gradient pairs provided for {} rows",
                gpair.len(),
                gmat.n_rows()
            )));
        }
        let nbins = gmat.cut.total_bins();
        let n_features = gmat.n_cols();
        self.row_set_collection.clear();
        self.hist.init(nbins);
        self.hist_buffer.init(nbins);

        let rows = if self.param.subsample < 1.0 {
            let (rows, next_seed) = self.sampler.sample(gpair, self.seed, &self.pool);
            self.seed = next_seed;
            rows
        } else {
            valid_rows(gpair, &self.pool)
        };
        if rows.is_empty() && !gpair.is_empty() {
            warn!("No rows selected out of {}, every histogram of this tree will be empty", gpair.len());
        }
        *self.row_set_collection.data_mut() = rows;
        self.row_set_collection.init();

        self.data_layout = self.global_layout(gmat)?;
        if self.data_layout == DataLayout::Dense {
            self.fid_least_bins = (0..n_features)
                .filter(|fid| !gmat.cut.feature_bins(*fid).is_empty())
                .min_by_key(|fid| gmat.cut.feature_bins(*fid).len())
                .ok_or_else(|| HistError::InvalidMatrix("no feature has any bin".to_string()))?;
        }

        self.column_sampler.init(n_features, self.param.seed.wrapping_add(self.n_trees));
        self.n_trees += 1;
        self.interaction_constraints =
            InteractionConstraints::new(self.param.interaction_constraints.as_deref(), n_features)?;
        self.snode.clear();
        self.nodes_for_explicit_hist_build.clear();
        self.nodes_for_subtraction_trick.clear();
        debug!(
            "Initialized tree with {} of {} rows, {} bins, {:?} layout",
            self.row_set_collection.data().len(),
            gmat.n_rows(),
            nbins,
            self.data_layout
        );
        Ok(())
    }

    /// Sparse as soon as one worker holds a missing value, so that every worker
    /// scans the same directions and reaches the same collective calls.
    fn global_layout(&self, gmat: &GHistIndexMatrix) -> Result<DataLayout, HistError> {
        let local = gmat.layout();
        if self.hist_synchronizer == HistSynchronizer::NoOp {
            return Ok(local);
        }
        let mut n_sparse = [if local == DataLayout::Sparse { 1.0 } else { 0.0 }];
        self.collective.allreduce_sum(&mut n_sparse)?;
        Ok(if n_sparse[0] > 0.0 {
            DataLayout::Sparse
        } else {
            DataLayout::Dense
        })
    }

    /// Build the histogram of one expanded node, deriving its sibling by subtraction.
    pub fn build_histograms_loss_guide(
        &mut self,
        entry: ExpandEntry,
        gmat: &GHistIndexMatrix,
        tree: &dyn TreeView,
        gpair: &[GradientPair],
    ) -> Result<(), HistError> {
        self.nodes_for_explicit_hist_build.clear();
        self.nodes_for_subtraction_trick.clear();
        self.nodes_for_explicit_hist_build.push(entry);
        if !tree.is_root(entry.nid) {
            let sibling = entry.sibling_id(tree).ok_or(HistError::UnknownNode(entry.nid))?;
            self.nodes_for_subtraction_trick
                .push(ExpandEntry::new(sibling, tree.depth(sibling)));
        }
        self.build_histograms(gmat, tree, gpair)
    }

    /// Build the histograms of a whole frontier. Of two siblings, the one with
    /// fewer rows is built and the other derived.
    pub fn build_histograms_depth_wise(
        &mut self,
        entries: &[ExpandEntry],
        gmat: &GHistIndexMatrix,
        tree: &dyn TreeView,
        gpair: &[GradientPair],
    ) -> Result<(), HistError> {
        self.nodes_for_explicit_hist_build.clear();
        self.nodes_for_subtraction_trick.clear();
        let frontier: HashSet<usize> = entries.iter().map(|e| e.nid).collect();
        let mut handled: HashSet<usize> = HashSet::with_capacity(entries.len());
        for entry in entries {
            if !handled.insert(entry.nid) {
                continue;
            }
            let sibling = match entry.sibling_id(tree) {
                Some(s) if frontier.contains(&s) => s,
                _ => {
                    self.nodes_for_explicit_hist_build.push(*entry);
                    continue;
                }
            };
            handled.insert(sibling);
            let sibling_entry = ExpandEntry::new(sibling, tree.depth(sibling));
            let (small, large) = if self.row_set_collection.size(entry.nid)? <= self.row_set_collection.size(sibling)? {
                (*entry, sibling_entry)
            } else {
                (sibling_entry, *entry)
            };
            self.nodes_for_explicit_hist_build.push(small);
            self.nodes_for_subtraction_trick.push(large);
        }
        self.build_histograms(gmat, tree, gpair)
    }

    fn build_histograms(
        &mut self,
        gmat: &GHistIndexMatrix,
        tree: &dyn TreeView,
        gpair: &[GradientPair],
    ) -> Result<(), HistError> {
        debug!(
            "Building {} histograms, deriving {} by subtraction",
            self.nodes_for_explicit_hist_build.len(),
            self.nodes_for_subtraction_trick.len()
        );
        let adder = self.hist_rows_adder;
        let sync_ids = adder.add_hist_rows(self, tree)?;
        self.build_local_histograms(gmat, gpair)?;
        let synchronizer = self.hist_synchronizer;
        synchronizer.sync_histograms(self, &sync_ids, tree)
    }

    /// Histograms of the explicitly built nodes over this worker's rows only.
    pub fn build_local_histograms(&mut self, gmat: &GHistIndexMatrix, gpair: &[GradientPair]) -> Result<(), HistError> {
        for entry in self.nodes_for_explicit_hist_build.iter() {
            let rows = self.row_set_collection.elements(entry.nid)?;
            let hist = self.hist.get_mut(entry.nid)?;
            build_hist(gpair, rows, gmat, hist, &mut self.hist_buffer, &self.pool);
        }
        Ok(())
    }

    /// Compute the statistics, weight and gain of a node whose histogram is ready.
    pub fn init_new_node(
        &mut self,
        nid: usize,
        gmat: &GHistIndexMatrix,
        gpair: &[GradientPair],
        tree: &dyn TreeView,
    ) -> Result<(), HistError> {
        if self.snode.len() < tree.num_nodes() {
            self.snode.resize(tree.num_nodes(), NodeEntry::default());
        }
        if nid >= self.snode.len() {
            return Err(HistError::UnknownNode(nid));
        }
        let parent = tree.parent(nid);
        let stats = match parent {
            None => self.root_stats(nid, gmat, gpair)?,
            Some(p) => {
                let best = &self.snode[p].best;
                if tree.is_left_child(nid) {
                    best.left_sum
                } else {
                    best.right_sum
                }
            }
        };
        let stats64 = stats.to_f64();
        let weight = self.evaluator.calc_weight(parent, &stats64);
        let root_gain = self.evaluator.calc_gain(parent, &stats64);
        self.snode[nid] = NodeEntry::new(stats, weight, root_gain);
        trace!(
            "Node {}: grad {}, hess {}, weight {}, gain {}",
            nid,
            stats.sum_grad,
            stats.sum_hess,
            weight,
            root_gain
        );
        Ok(())
    }

    /// Aggregate of every row at the root, summed across workers.
    fn root_stats(&self, nid: usize, gmat: &GHistIndexMatrix, gpair: &[GradientPair]) -> Result<GradStats<T>, HistError> {
        let local: GradStats<T> = match (self.data_layout, self.hist_synchronizer) {
            (DataLayout::Dense, HistSynchronizer::NoOp) => {
                let hist = self.hist.get(nid)?;
                hist[gmat.cut.feature_bins(self.fid_least_bins)].iter().copied().sum()
            }
            // A synchronized histogram already holds every worker's rows, sum the local ones.
            _ => {
                let rows = self.row_set_collection.elements(nid)?;
                let partials: Vec<GradStats<T>> = self.pool.install(|| {
                    rows.par_chunks(HIST_BLOCK_ROWS)
                        .map(|chunk| {
                            let mut acc = GradStats::default();
                            for &r in chunk {
                                acc.add_pair(&gpair[r]);
                            }
                            acc
                        })
                        .collect()
                });
                partials.into_iter().sum()
            }
        };
        let mut lanes = [local.sum_grad.to_f64(), local.sum_hess.to_f64()];
        self.collective.allreduce_sum(&mut lanes)?;
        Ok(GradStats::from_f64(&GradStats::new(lanes[0], lanes[1])))
    }

    /// Find the best split of every node in `nodes`, merging into each node's best.
    pub fn evaluate_splits(
        &mut self,
        nodes: &[ExpandEntry],
        gmat: &GHistIndexMatrix,
        tree: &dyn TreeView,
    ) -> Result<(), HistError> {
        let mut queries: Vec<SplitQuery> = Vec::new();
        for entry in nodes {
            if entry.nid >= self.snode.len() {
                return Err(HistError::UnknownNode(entry.nid));
            }
            self.hist.get(entry.nid)?;
            let features = self.column_sampler.feature_set(tree.depth(entry.nid));
            queries.extend(
                features
                    .into_iter()
                    .filter(|fid| self.interaction_constraints.query(entry.nid, *fid))
                    .map(|fid| SplitQuery { nid: entry.nid, fid }),
            );
        }
        debug!("Evaluating {} split queries over {} nodes", queries.len(), nodes.len());

        let ctx = EnumerateContext {
            cuts: &gmat.cut,
            evaluator: self.evaluator.as_ref(),
            min_child_weight: self.param.min_child_weight,
            sub_group_size: self.param.sub_group_size,
        };
        let snode = &self.snode;
        let hist = &self.hist;
        let sparse = self.data_layout == DataLayout::Sparse;
        let best_splits: Vec<SplitEntry<T>> = self.pool.install(|| {
            queries
                .par_iter()
                .map(|q| -> Result<SplitEntry<T>, HistError> {
                    let node = &snode[q.nid];
                    let hist_data = hist.get(q.nid)?;
                    let mut best = node.best;
                    enumerate_split(&ctx, hist_data, node, &mut best, q.fid, q.nid, ScanDirection::Forward);
                    if sparse {
                        enumerate_split(&ctx, hist_data, node, &mut best, q.fid, q.nid, ScanDirection::Backward);
                    }
                    Ok(best)
                })
                .collect::<Result<Vec<_>, HistError>>()
        })?;

        for (q, best) in queries.iter().zip(best_splits.iter()) {
            self.snode[q.nid].best.update(best);
        }
        for entry in nodes {
            let best = &self.snode[entry.nid].best;
            trace!(
                "Node {}: best split on feature {} at {} with loss change {}",
                entry.nid,
                best.split_index(),
                best.split_value,
                best.loss_chg
            );
        }
        Ok(())
    }

    /// Mark `nid` as a leaf of the tree. Its histogram goes back to the pool.
    pub fn finalize_leaf(&mut self, nid: usize) {
        self.hist.release(nid);
        trace!("Node {} is a leaf", nid);
    }

    /// Split `nid` by its best split: grow the tree, partition the rows and
    /// record the feature for interaction constraints. Returns the children.
    pub fn apply_split(&mut self, nid: usize, gmat: &GHistIndexMatrix, tree: &mut RegTree) -> Result<(usize, usize), HistError> {
        let best = self.node_entry(nid)?.best;
        if !best.is_valid() {
            return Err(HistError::NoSplit(nid));
        }
        let fid = best.split_index() as usize;
        let (left, right) = tree.expand_node(nid);
        self.row_set_collection.add_split(nid, left, right, |row| match gmat.feature_bin(row, fid) {
            Some(bin) => bin < best.split_bin,
            None => best.default_left(),
        })?;
        self.interaction_constraints.split(nid, fid, left, right)?;
        if self.snode.len() < tree.num_nodes() {
            self.snode.resize(tree.num_nodes(), NodeEntry::default());
        }
        trace!("Split node {} on feature {} into {} and {}", nid, fid, left, right);
        Ok((left, right))
    }
}
