mod node;

// Modules
pub mod collective;
pub mod column_sampler;
pub mod config;
pub mod constants;
pub mod data;
pub mod errors;
pub mod evaluator;
pub mod grower;
pub mod hist_sync;
pub mod histogram;
pub mod interaction;
pub mod row_set;
pub mod sampler;
pub mod splitter;
pub mod tree;
pub mod updater;

// Individual classes, and functions
pub use config::TrainParam;
pub use node::NodeEntry;
pub use updater::HistUpdater;
