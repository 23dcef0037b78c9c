//! Build pipeline: worker planning, streaming scan and the phase orchestrator

pub mod build;
pub mod scan;
pub mod workers;

pub use build::{build_index, IndexBuilder};
pub use scan::{scan_reads, ReadInputs, ScanOutput};
pub use workers::{WorkerCosts, WorkerPlan};
