//! Worker allocation for the scanning stages
//!
//! Three pools share the CPU and memory budget: automaton workers (prefix
//! pre-filter), index workers (exact confirmation) and match workers
//! (relation extraction and spilling). Counts follow a 1:2:4
//! automaton:match:index ratio, scaled to the largest multiple that fits,
//! and any remaining capacity goes to index, match and automaton workers in
//! that order.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use tracing::info;

/// Bytes assumed per queued read in a batch
const READ_BYTES: u64 = 512;

/// Memory needed by the shared index and by one worker of each pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCosts {
    pub shared: u64,
    pub automaton: u64,
    pub index: u64,
    pub matching: u64,
}

impl WorkerCosts {
    /// Estimate from the index size and the batch and spill settings
    pub fn estimate(config: &IndexConfig, index_bytes: u64) -> Self {
        let batch = config.batch_size.max(1) as u64 * READ_BYTES;
        // two batches in flight per worker, and three bucket sets per match worker
        let spill = 3 * config.num_buckets.max(1) as u64 * 64 * 1024;
        Self {
            shared: index_bytes,
            automaton: 2 * batch,
            index: 2 * batch,
            matching: 2 * batch + spill,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPlan {
    pub automaton: usize,
    pub index: usize,
    pub matching: usize,
}

impl WorkerPlan {
    /// Plan for a build whose shared index takes `index_bytes`
    pub fn allocate(config: &IndexConfig, index_bytes: u64) -> Result<Self> {
        Self::allocate_with(
            config.maximum_processes,
            config.maximum_memory,
            WorkerCosts::estimate(config, index_bytes),
        )
    }

    /// Largest worker counts within `max_processes` and `max_memory`
    pub fn allocate_with(max_processes: usize, max_memory: u64, costs: WorkerCosts) -> Result<Self> {
        let minimum = costs.shared + costs.automaton + costs.index + costs.matching;
        if minimum > max_memory {
            return Err(IndexError::NotEnoughMemory {
                required: minimum,
                available: max_memory,
            });
        }

        let processes = max_processes.max(3);
        let unit_cost = costs.automaton + 2 * costs.matching + 4 * costs.index;
        let by_memory = ((max_memory - costs.shared) / unit_cost.max(1)) as usize;
        let unit = (processes / 7).min(by_memory);

        let mut plan = if unit == 0 {
            WorkerPlan {
                automaton: 1,
                index: 1,
                matching: 1,
            }
        } else {
            WorkerPlan {
                automaton: unit,
                index: 4 * unit,
                matching: 2 * unit,
            }
        };

        loop {
            let mut grew = false;
            for pool in 0..3 {
                let cost = match pool {
                    0 => costs.index,
                    1 => costs.matching,
                    _ => costs.automaton,
                };
                if plan.total() < processes && plan.memory(&costs) + cost <= max_memory {
                    match pool {
                        0 => plan.index += 1,
                        1 => plan.matching += 1,
                        _ => plan.automaton += 1,
                    }
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        info!(
            "Worker plan: {} automaton, {} index, {} match workers ({:.2} GB of {:.2} GB)",
            plan.automaton,
            plan.index,
            plan.matching,
            plan.memory(&costs) as f64 / 1e9,
            max_memory as f64 / 1e9
        );
        Ok(plan)
    }

    pub fn total(&self) -> usize {
        self.automaton + self.index + self.matching
    }

    pub fn memory(&self, costs: &WorkerCosts) -> u64 {
        costs.shared
            + self.automaton as u64 * costs.automaton
            + self.index as u64 * costs.index
            + self.matching as u64 * costs.matching
    }
}
