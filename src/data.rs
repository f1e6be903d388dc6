use crate::errors::HistError;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Range, Sub, SubAssign};

/// Data trait used throughout the package
/// to control for the precision of gradient sums.
pub trait FloatData<T>:
    Display
    + Add<Output = T>
    + Neg<Output = T>
    + Copy
    + Debug
    + Default
    + PartialEq
    + PartialOrd
    + AddAssign
    + Sub<Output = T>
    + SubAssign
    + Sum
    + std::marker::Send
    + std::marker::Sync
{
    /// Convert from f32.
    fn from_f32(v: f32) -> T;
    /// Convert from f64.
    fn from_f64(v: f64) -> T;
    /// Widen to f64.
    fn to_f64(self) -> f64;
}

impl FloatData<f64> for f64 {
    fn from_f32(v: f32) -> f64 {
        f64::from(v)
    }
    fn from_f64(v: f64) -> f64 {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
}

impl FloatData<f32> for f32 {
    fn from_f32(v: f32) -> f32 {
        v
    }
    fn from_f64(v: f64) -> f32 {
        v as f32
    }
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

/// First and second order derivative of the loss for one row.
///
/// A negative hessian marks a row that must not take part in the current round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientPair {
    pub grad: f32,
    pub hess: f32,
}

impl GradientPair {
    pub fn new(grad: f32, hess: f32) -> Self {
        GradientPair { grad, hess }
    }
}

/// Accumulated gradient and hessian, used for histogram bins and node aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GradStats<T> {
    pub sum_grad: T,
    pub sum_hess: T,
}

impl<T: FloatData<T>> GradStats<T> {
    pub fn new(sum_grad: T, sum_hess: T) -> Self {
        GradStats { sum_grad, sum_hess }
    }

    #[inline]
    pub fn add_pair(&mut self, pair: &GradientPair) {
        self.sum_grad += T::from_f32(pair.grad);
        self.sum_hess += T::from_f32(pair.hess);
    }

    pub fn to_f64(&self) -> GradStats<f64> {
        GradStats::new(self.sum_grad.to_f64(), self.sum_hess.to_f64())
    }

    pub fn from_f64(stats: &GradStats<f64>) -> Self {
        GradStats::new(T::from_f64(stats.sum_grad), T::from_f64(stats.sum_hess))
    }
}

impl<T: FloatData<T>> Add for GradStats<T> {
    type Output = GradStats<T>;
    fn add(self, rhs: Self) -> Self::Output {
        GradStats::new(self.sum_grad + rhs.sum_grad, self.sum_hess + rhs.sum_hess)
    }
}

impl<T: FloatData<T>> Sub for GradStats<T> {
    type Output = GradStats<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        GradStats::new(self.sum_grad - rhs.sum_grad, self.sum_hess - rhs.sum_hess)
    }
}

impl<T: FloatData<T>> AddAssign for GradStats<T> {
    fn add_assign(&mut self, rhs: Self) {
        self.sum_grad += rhs.sum_grad;
        self.sum_hess += rhs.sum_hess;
    }
}

impl<T: FloatData<T>> SubAssign for GradStats<T> {
    fn sub_assign(&mut self, rhs: Self) {
        self.sum_grad -= rhs.sum_grad;
        self.sum_hess -= rhs.sum_hess;
    }
}

impl<T: FloatData<T>> Sum for GradStats<T> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(GradStats::default(), |acc, s| acc + s)
    }
}

/// Bin boundaries produced by the quantile sketch.
///
/// Feature `f` owns the global bins `ptrs[f]..ptrs[f + 1]`, and `values[b]` is the
/// upper bound of bin `b`: a value `v` falls in bin `b` when `values[b - 1] <= v < values[b]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramCuts {
    ptrs: Vec<u32>,
    values: Vec<f32>,
    min_values: Vec<f32>,
}

impl HistogramCuts {
    pub fn new(ptrs: Vec<u32>, values: Vec<f32>, min_values: Vec<f32>) -> Result<Self, HistError> {
        if ptrs.first() != Some(&0) {
            return Err(HistError::InvalidMatrix("cut pointers must start at 0".to_string()));
        }
        if ptrs.windows(2).any(|w| w[0] > w[1]) {
            return Err(HistError::InvalidMatrix("cut pointers must be non-decreasing".to_string()));
        }
        let last = *ptrs.last().unwrap_or(&0) as usize;
        if last != values.len() {
            return Err(HistError::InvalidMatrix(format!(
                "last cut pointer is {} but there are {} cut values",
                last,
                values.len()
            )));
        }
        if min_values.len() != ptrs.len() - 1 {
            return Err(HistError::InvalidMatrix(format!(
                "{} minimum values provided for {} features",
                min_values.len(),
                ptrs.len() - 1
            )));
        }
        Ok(HistogramCuts {
            ptrs,
            values,
            min_values,
        })
    }

    /// Build cuts from one vector of upper bounds per feature.
    pub fn from_feature_cuts(cuts: &[Vec<f32>], min_values: &[f32]) -> Result<Self, HistError> {
        let mut ptrs = Vec::with_capacity(cuts.len() + 1);
        ptrs.push(0u32);
        let mut values = Vec::new();
        for c in cuts {
            values.extend_from_slice(c);
            ptrs.push(values.len() as u32);
        }
        HistogramCuts::new(ptrs, values, min_values.to_vec())
    }

    pub fn ptrs(&self) -> &[u32] {
        &self.ptrs
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn min_values(&self) -> &[f32] {
        &self.min_values
    }

    pub fn n_features(&self) -> usize {
        self.ptrs.len() - 1
    }

    pub fn total_bins(&self) -> usize {
        self.values.len()
    }

    /// Global bin range of a feature.
    #[inline]
    pub fn feature_bins(&self, fid: usize) -> Range<usize> {
        self.ptrs[fid] as usize..self.ptrs[fid + 1] as usize
    }
}

/// How the quantized matrix stores its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLayout {
    /// Every row has a bin for every feature.
    Dense,
    /// Some entries are missing.
    Sparse,
}

/// Quantized feature matrix, stored as compressed rows of global bin ids.
///
/// Within a row, bins are strictly increasing, so each feature appears at most once.
#[derive(Debug, Clone)]
pub struct GHistIndexMatrix {
    pub cut: HistogramCuts,
    row_ptr: Vec<usize>,
    index: Vec<u32>,
}

impl GHistIndexMatrix {
    pub fn new(cut: HistogramCuts, row_ptr: Vec<usize>, index: Vec<u32>) -> Result<Self, HistError> {
        if row_ptr.first() != Some(&0) || row_ptr.last() != Some(&index.len()) {
            return Err(HistError::InvalidMatrix(
                "row pointers must start at 0 and end at the number of entries".to_string(),
            ));
        }
        let total_bins = cut.total_bins() as u32;
        for w in row_ptr.windows(2) {
            if w[0] > w[1] {
                return Err(HistError::InvalidMatrix("row pointers must be non-decreasing".to_string()));
            }
            let row = &index[w[0]..w[1]];
            if row.iter().any(|b| *b >= total_bins) {
                return Err(HistError::InvalidMatrix(format!(
                    "bin id out of range, there are {} bins",
                    total_bins
                )));
            }
            if row.windows(2).any(|b| b[0] >= b[1]) {
                return Err(HistError::InvalidMatrix(
                    "bins within a row must be strictly increasing".to_string(),
                ));
            }
        }
        // Strictly increasing bins can still hit one feature twice.
        for r in 0..row_ptr.len() - 1 {
            let row = &index[row_ptr[r]..row_ptr[r + 1]];
            let mut last_fid: Option<usize> = None;
            for b in row {
                let fid = feature_of_bin(cut.ptrs(), *b);
                if last_fid == Some(fid) {
                    return Err(HistError::InvalidMatrix(format!(
                        "row {} has more than one bin for feature {}",
                        r, fid
                    )));
                }
                last_fid = Some(fid);
            }
        }
        Ok(GHistIndexMatrix { cut, row_ptr, index })
    }

    /// Build from per-feature (local) bin numbers, row-major, `None` marking a missing value.
    pub fn from_local_bins(cut: HistogramCuts, local_bins: &[Option<u32>], n_cols: usize) -> Result<Self, HistError> {
        if n_cols != cut.n_features() || (n_cols > 0 && local_bins.len() % n_cols != 0) {
            return Err(HistError::InvalidMatrix(format!(
                "{} values do not form rows of {} features",
                local_bins.len(),
                cut.n_features()
            )));
        }
        let n_rows = if n_cols == 0 { 0 } else { local_bins.len() / n_cols };
        let mut row_ptr = Vec::with_capacity(n_rows + 1);
        let mut index = Vec::with_capacity(local_bins.len());
        row_ptr.push(0);
        for r in 0..n_rows {
            for fid in 0..n_cols {
                if let Some(b) = local_bins[r * n_cols + fid] {
                    let range = cut.feature_bins(fid);
                    if b as usize >= range.len() {
                        return Err(HistError::InvalidMatrix(format!(
                            "bin {} out of range for feature {} with {} bins",
                            b,
                            fid,
                            range.len()
                        )));
                    }
                    index.push(range.start as u32 + b);
                }
            }
            row_ptr.push(index.len());
        }
        GHistIndexMatrix::new(cut, row_ptr, index)
    }

    /// Build from a dense row-major matrix of per-feature bin numbers.
    pub fn from_dense(cut: HistogramCuts, local_bins: &[u32], n_cols: usize) -> Result<Self, HistError> {
        let bins: Vec<Option<u32>> = local_bins.iter().map(|b| Some(*b)).collect();
        GHistIndexMatrix::from_local_bins(cut, &bins, n_cols)
    }

    pub fn n_rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.cut.n_features()
    }

    pub fn num_nonzero(&self) -> usize {
        self.index.len()
    }

    /// Global bins present in a row.
    #[inline]
    pub fn row(&self, row: usize) -> &[u32] {
        &self.index[self.row_ptr[row]..self.row_ptr[row + 1]]
    }

    /// Global bin of a feature in a row, `None` when the value is missing.
    pub fn feature_bin(&self, row: usize, fid: usize) -> Option<u32> {
        let range = self.cut.feature_bins(fid);
        let bins = self.row(row);
        let pos = bins.partition_point(|b| (*b as usize) < range.start);
        bins.get(pos).copied().filter(|b| (*b as usize) < range.end)
    }

    pub fn layout(&self) -> DataLayout {
        if self.n_rows() * self.n_cols() == self.num_nonzero() {
            DataLayout::Dense
        } else {
            DataLayout::Sparse
        }
    }
}

/// Feature owning a global bin.
fn feature_of_bin(ptrs: &[u32], bin: u32) -> usize {
    ptrs.partition_point(|p| *p <= bin) - 1
}
