//! Errors
//!
//! Custom error types used throughout the `histsplit` crate.
use thiserror::Error;

/// Failure reported by a collective-communication backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollectiveError {
    /// Workers contributed buffers of different lengths.
    #[error("Allreduce buffer length mismatch on rank {rank}: expected {expected}, got {got}.")]
    LengthMismatch { rank: usize, expected: usize, got: usize },
    /// A peer left the group, or the shared state was poisoned.
    #[error("Collective group is broken: {0}")]
    Broken(String),
}

/// Errors that can occur while building histograms and evaluating splits.
#[derive(Debug, Error)]
pub enum HistError {
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Depth and leaf limits that cannot describe a finite tree.
    #[error("Invalid tree limits: {0}")]
    InvalidTreeLimits(String),
    /// Only uniform row sampling is supported.
    #[error("Unsupported sampling method {0}, only uniform sampling is supported.")]
    UnsupportedSampling(String),
    /// A node id that the row partition or the node statistics do not know about.
    #[error("Node {0} is unknown.")]
    UnknownNode(usize),
    /// A histogram was required (for example as a subtraction parent) but never built.
    #[error("Histogram for node {0} has not been built.")]
    MissingHistogram(usize),
    /// The quantized matrix or cuts are malformed.
    #[error("Invalid quantized matrix: {0}")]
    InvalidMatrix(String),
    /// Configuration could not be read.
    #[error("Unable to read {0}")]
    UnableToRead(String),
    /// The nodes handed to a histogram round do not fit the growth policy.
    #[error("Invalid expansion round: {0}")]
    InvalidExpansion(String),
    /// A node was asked to split without a valid candidate.
    #[error("Node {0} has no valid split.")]
    NoSplit(usize),
    /// Interaction constraints could not be parsed.
    #[error("Unable to parse interaction constraints {0}")]
    ParseConstraints(String),
    /// The parallel backend failed.
    #[error("Device failure: {0}")]
    Device(String),
    /// The collective-communication layer failed, the round must be aborted.
    #[error("Collective communication failed: {0}")]
    Collective(#[from] CollectiveError),
}
