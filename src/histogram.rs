//! Histogram
//!
//! Per-node gradient histograms. A node histogram is a dense array of
//! [`GradStats`] over every global bin; the bins of feature `f` are given by the
//! cut pointers of the quantized matrix.
use crate::collective::Collective;
use crate::constants::{HIST_BLOCK_ROWS, MIN_PARALLEL_ROWS};
use crate::data::{FloatData, GHistIndexMatrix, GradStats, GradientPair};
use crate::errors::HistError;
use log::trace;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Histograms of the nodes currently tracked, indexed by node id.
///
/// Released histograms go back to a free pool and are reused by the next node
/// that needs one, so a tree only allocates as many buffers as are alive at once.
#[derive(Debug, Default)]
pub struct HistCollection<T> {
    nbins: usize,
    data: Vec<Option<Vec<GradStats<T>>>>,
    free: Vec<Vec<GradStats<T>>>,
}

impl<T: FloatData<T>> HistCollection<T> {
    pub fn new(nbins: usize) -> Self {
        HistCollection {
            nbins,
            data: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Drop every tracked histogram, keeping buffers of the right size for reuse.
    pub fn init(&mut self, nbins: usize) {
        if nbins != self.nbins {
            self.free.clear();
            self.data.clear();
            self.nbins = nbins;
            return;
        }
        let nodes = std::mem::take(&mut self.data);
        self.free.extend(nodes.into_iter().flatten());
    }

    pub fn contains(&self, nid: usize) -> bool {
        matches!(self.data.get(nid), Some(Some(_)))
    }

    /// Start tracking `nid` with a zeroed histogram. A node already tracked is zeroed.
    pub fn add_hist_row(&mut self, nid: usize) {
        if let Some(Some(row)) = self.data.get_mut(nid) {
            init_hist(row);
            return;
        }
        let row = match self.free.pop() {
            Some(mut row) => {
                init_hist(&mut row);
                row
            }
            None => vec![GradStats::default(); self.nbins],
        };
        if self.data.len() <= nid {
            self.data.resize_with(nid + 1, || None);
        }
        self.data[nid] = Some(row);
    }

    pub fn get(&self, nid: usize) -> Result<&[GradStats<T>], HistError> {
        match self.data.get(nid) {
            Some(Some(row)) => Ok(row),
            _ => Err(HistError::MissingHistogram(nid)),
        }
    }

    pub fn get_mut(&mut self, nid: usize) -> Result<&mut [GradStats<T>], HistError> {
        match self.data.get_mut(nid) {
            Some(Some(row)) => Ok(row),
            _ => Err(HistError::MissingHistogram(nid)),
        }
    }

    /// Stop tracking `nid`, its buffer goes back to the pool.
    pub fn release(&mut self, nid: usize) {
        if let Some(slot) = self.data.get_mut(nid) {
            if let Some(row) = slot.take() {
                self.free.push(row);
            }
        }
    }

    /// `hist[target] = hist[parent] - hist[sibling]`.
    pub fn subtract(&mut self, target: usize, parent: usize, sibling: usize, pool: &ThreadPool) -> Result<(), HistError> {
        self.get(parent)?;
        self.get(sibling)?;
        let mut out = self.data.get_mut(target).and_then(Option::take).ok_or(HistError::MissingHistogram(target))?;
        subtraction_trick(&mut out, self.get(sibling)?, self.get(parent)?, pool);
        self.data[target] = Some(out);
        Ok(())
    }
}

/// Scratch space holding one partial histogram per block of rows.
#[derive(Debug, Default)]
pub struct HistBuffer<T> {
    nbins: usize,
    blocks: Vec<Vec<GradStats<T>>>,
}

impl<T: FloatData<T>> HistBuffer<T> {
    pub fn init(&mut self, nbins: usize) {
        if nbins != self.nbins {
            self.blocks.clear();
            self.nbins = nbins;
        }
    }

    /// Make sure at least `n_blocks` partial histograms are available.
    pub fn reset(&mut self, n_blocks: usize) {
        let nbins = self.nbins;
        if self.blocks.len() < n_blocks {
            self.blocks.resize_with(n_blocks, || vec![GradStats::default(); nbins]);
        }
    }
}

/// Zero a histogram.
pub fn init_hist<T: FloatData<T>>(hist: &mut [GradStats<T>]) {
    hist.iter_mut().for_each(|b| *b = GradStats::default());
}

#[inline]
fn accumulate_rows<T: FloatData<T>>(hist: &mut [GradStats<T>], gpair: &[GradientPair], rows: &[usize], gmat: &GHistIndexMatrix) {
    for &r in rows {
        let pair = &gpair[r];
        for &bin in gmat.row(r) {
            hist[bin as usize].add_pair(pair);
        }
    }
}

/// Build the histogram of a row set.
///
/// Rows are split in blocks of [`HIST_BLOCK_ROWS`]; each block is reduced into its
/// own partial histogram and the partials are summed in block order. The block
/// layout does not depend on the number of threads, so neither does the result.
pub fn build_hist<T: FloatData<T>>(
    gpair: &[GradientPair],
    rows: &[usize],
    gmat: &GHistIndexMatrix,
    hist: &mut [GradStats<T>],
    buffer: &mut HistBuffer<T>,
    pool: &ThreadPool,
) {
    if rows.len() < MIN_PARALLEL_ROWS {
        init_hist(hist);
        accumulate_rows(hist, gpair, rows, gmat);
        return;
    }

    let n_blocks = rows.len().div_ceil(HIST_BLOCK_ROWS);
    buffer.reset(n_blocks);
    let blocks = &mut buffer.blocks[..n_blocks];
    trace!("Building histogram of {} rows in {} blocks", rows.len(), n_blocks);

    pool.install(|| {
        blocks
            .par_iter_mut()
            .zip(rows.par_chunks(HIST_BLOCK_ROWS))
            .for_each(|(local, chunk)| {
                init_hist(local);
                accumulate_rows(local, gpair, chunk, gmat);
            });

        let blocks = &*blocks;
        hist.par_iter_mut().enumerate().for_each(|(bin, out)| {
            let mut acc = GradStats::default();
            for block in blocks {
                acc += block[bin];
            }
            *out = acc;
        });
    });
}

/// `self_hist = parent - sibling`, bin by bin.
pub fn subtraction_trick<T: FloatData<T>>(
    self_hist: &mut [GradStats<T>],
    sibling: &[GradStats<T>],
    parent: &[GradStats<T>],
    pool: &ThreadPool,
) {
    pool.install(|| {
        self_hist
            .par_iter_mut()
            .zip(sibling.par_iter().zip(parent.par_iter()))
            .for_each(|(out, (s, p))| *out = *p - *s);
    });
}

/// Sum a histogram across every worker of the collective.
pub fn allreduce_hist<T: FloatData<T>>(hist: &mut [GradStats<T>], collective: &dyn Collective) -> Result<(), HistError> {
    let mut lanes: Vec<f64> = Vec::with_capacity(hist.len() * 2);
    for b in hist.iter() {
        lanes.push(b.sum_grad.to_f64());
        lanes.push(b.sum_hess.to_f64());
    }
    collective.allreduce_sum(&mut lanes)?;
    for (b, l) in hist.iter_mut().zip(lanes.chunks_exact(2)) {
        b.sum_grad = T::from_f64(l[0]);
        b.sum_hess = T::from_f64(l[1]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HistogramCuts;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn random_problem(n_rows: usize, seed: u64) -> (GHistIndexMatrix, Vec<GradientPair>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let cuts = HistogramCuts::from_feature_cuts(
            &[vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 2.0], vec![1.0, 2.0, 3.0]],
            &[0.0, 0.0, 0.0],
        )
        .unwrap();
        let bins: Vec<Option<u32>> = (0..n_rows)
            .flat_map(|_| {
                vec![
                    Some(rng.gen_range(0..4)),
                    if rng.gen_bool(0.8) { Some(rng.gen_range(0..2)) } else { None },
                    Some(rng.gen_range(0..3)),
                ]
            })
            .collect();
        let gmat = GHistIndexMatrix::from_local_bins(cuts, &bins, 3).unwrap();
        // Halves and small integers keep every partial sum exact.
        let gpair = (0..n_rows)
            .map(|_| GradientPair::new(rng.gen_range(-8..8) as f32 * 0.5, rng.gen_range(1..4) as f32))
            .collect();
        (gmat, gpair)
    }

    fn naive_hist(gmat: &GHistIndexMatrix, gpair: &[GradientPair], rows: &[usize]) -> Vec<GradStats<f64>> {
        let mut hist = vec![GradStats::default(); gmat.cut.total_bins()];
        for &r in rows {
            for &b in gmat.row(r) {
                hist[b as usize].add_pair(&gpair[r]);
            }
        }
        hist
    }

    fn pool(n: usize) -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(n).build().unwrap()
    }

    #[test]
    fn test_build_hist_matches_naive() {
        let (gmat, gpair) = random_problem(10_000, 0);
        let rows: Vec<usize> = (0..10_000).filter(|r| r % 3 != 0).collect();
        let mut hist = vec![GradStats::<f64>::default(); gmat.cut.total_bins()];
        let mut buffer = HistBuffer::default();
        buffer.init(gmat.cut.total_bins());
        build_hist(&gpair, &rows, &gmat, &mut hist, &mut buffer, &pool(4));
        assert_eq!(hist, naive_hist(&gmat, &gpair, &rows));
    }

    #[test]
    fn test_build_hist_order_independent() {
        let (gmat, gpair) = random_problem(6000, 1);
        let mut rows: Vec<usize> = (0..6000).collect();
        let nbins = gmat.cut.total_bins();
        let mut buffer = HistBuffer::default();
        buffer.init(nbins);

        let mut first = vec![GradStats::<f64>::default(); nbins];
        build_hist(&gpair, &rows, &gmat, &mut first, &mut buffer, &pool(3));
        rows.shuffle(&mut StdRng::seed_from_u64(9));
        let mut shuffled = vec![GradStats::<f64>::default(); nbins];
        build_hist(&gpair, &rows, &gmat, &mut shuffled, &mut buffer, &pool(1));
        assert_eq!(first, shuffled);
    }

    #[test]
    fn test_build_hist_single_precision() {
        let (gmat, gpair) = random_problem(3000, 2);
        let rows: Vec<usize> = (0..3000).collect();
        let nbins = gmat.cut.total_bins();
        let mut buffer = HistBuffer::default();
        buffer.init(nbins);
        let mut hist = vec![GradStats::<f32>::default(); nbins];
        build_hist(&gpair, &rows, &gmat, &mut hist, &mut buffer, &pool(2));
        let expected = naive_hist(&gmat, &gpair, &rows);
        for (h, e) in hist.iter().zip(expected.iter()) {
            assert_relative_eq!(f64::from(h.sum_grad), e.sum_grad, epsilon = 1e-3);
            assert_relative_eq!(f64::from(h.sum_hess), e.sum_hess, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_subtraction_trick() {
        let (gmat, gpair) = random_problem(4000, 3);
        let nbins = gmat.cut.total_bins();
        let left: Vec<usize> = (0..4000).filter(|r| r % 4 == 0).collect();
        let right: Vec<usize> = (0..4000).filter(|r| r % 4 != 0).collect();
        let all: Vec<usize> = (0..4000).collect();

        let pool = pool(2);
        let mut collection = HistCollection::new(nbins);
        let mut buffer = HistBuffer::default();
        buffer.init(nbins);
        for nid in 0..3 {
            collection.add_hist_row(nid);
        }
        build_hist(&gpair, &all, &gmat, collection.get_mut(0).unwrap(), &mut buffer, &pool);
        build_hist(&gpair, &left, &gmat, collection.get_mut(1).unwrap(), &mut buffer, &pool);
        collection.subtract(2, 0, 1, &pool).unwrap();
        assert_eq!(collection.get(2).unwrap(), &naive_hist(&gmat, &gpair, &right)[..]);
    }

    #[test]
    fn test_collection_recycles_buffers() {
        let mut collection = HistCollection::<f64>::new(4);
        collection.add_hist_row(0);
        collection.get_mut(0).unwrap()[1] = GradStats::new(1.0, 2.0);
        collection.release(0);
        assert!(!collection.contains(0));
        assert!(matches!(collection.get(0), Err(HistError::MissingHistogram(0))));
        collection.add_hist_row(5);
        assert_eq!(collection.get(5).unwrap(), &[GradStats::default(); 4][..]);
        assert!(collection.subtract(6, 0, 5, &pool(1)).is_err());
    }
}
