//! Splitting k-mer relation index
//!
//! Builds, from a (k+1)-mer count list and sequencing reads, an index of the
//! branch points of the implied De Bruijn graph together with the direct,
//! repeat and indirect relations between them, and persists it as a single
//! column store.

pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod io;
pub mod kmer;
pub mod pipeline;
pub mod relations;
pub mod stats;
pub mod store;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use pipeline::{build_index, IndexBuilder, ReadInputs};
pub use stats::BuildStats;
pub use store::Store;
