/// Rows reduced into one private partial histogram before merging.
pub const HIST_BLOCK_ROWS: usize = 2048;
/// Below this many rows a histogram is built on the calling thread.
pub const MIN_PARALLEL_ROWS: usize = 512;
/// Default number of lanes in a split-enumeration group.
pub const DEFAULT_SUB_GROUP_SIZE: usize = 16;
/// Mask clearing the default-left bit from a split index.
pub const SPLIT_INDEX_MASK: u32 = (1u32 << 31) - 1;
/// Sentinel split index used by the group reduction for lanes that found nothing.
pub const NO_SPLIT_INDEX: u32 = (1u32 << 31) - 1;
