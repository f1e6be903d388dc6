//! Collective
//!
//! The all-reduce primitive shared by the workers of a distributed training run.
//! The updater only ever sums; anything else (retries, transport) belongs to the
//! implementation behind the trait.
use crate::errors::CollectiveError;
use std::sync::{Arc, Barrier, Mutex};

pub trait Collective: Send + Sync {
    /// Number of workers taking part.
    fn world_size(&self) -> usize;
    /// Index of this worker.
    fn rank(&self) -> usize;
    /// Replace `buf` with the elementwise sum of every worker's `buf`. Blocks until
    /// all workers have contributed.
    fn allreduce_sum(&self, buf: &mut [f64]) -> Result<(), CollectiveError>;
}

/// Single process training, the all-reduce is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleWorker;

impl Collective for SingleWorker {
    fn world_size(&self) -> usize {
        1
    }
    fn rank(&self) -> usize {
        0
    }
    fn allreduce_sum(&self, _buf: &mut [f64]) -> Result<(), CollectiveError> {
        Ok(())
    }
}

struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// Workers living in the same process, one per thread.
///
/// Contributions are summed in rank order, so every worker sees bit-identical results.
pub struct InProcessGroup;

impl InProcessGroup {
    /// Create the handles of a group of `n` workers. Hand each one to its own thread.
    pub fn new(n: usize) -> Vec<InProcessCollective> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(n),
            slots: Mutex::new(vec![Vec::new(); n]),
        });
        (0..n)
            .map(|rank| InProcessCollective {
                rank,
                world_size: n,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

pub struct InProcessCollective {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl Collective for InProcessCollective {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn allreduce_sum(&self, buf: &mut [f64]) -> Result<(), CollectiveError> {
        {
            let mut slots = self
                .shared
                .slots
                .lock()
                .map_err(|e| CollectiveError::Broken(e.to_string()))?;
            slots[self.rank].clear();
            slots[self.rank].extend_from_slice(buf);
        }
        self.shared.barrier.wait();
        // Every rank reads here, nobody writes until the second barrier.
        let result = {
            let slots = self
                .shared
                .slots
                .lock()
                .map_err(|e| CollectiveError::Broken(e.to_string()))?;
            match slots.iter().position(|s| s.len() != buf.len()) {
                Some(rank) => Err(CollectiveError::LengthMismatch {
                    rank,
                    expected: buf.len(),
                    got: slots[rank].len(),
                }),
                None => {
                    buf.iter_mut().for_each(|b| *b = 0.0);
                    for contribution in slots.iter() {
                        for (b, c) in buf.iter_mut().zip(contribution.iter()) {
                            *b += *c;
                        }
                    }
                    Ok(())
                }
            }
        };
        self.shared.barrier.wait();
        result
    }
}
