//! Graph-level analysis of the resolved relations

pub mod connections;
pub mod partition;

pub use connections::{Adjacency, ConnectedSet, ConnectionAggregator, FilteredRun, PairedRelation};
pub use partition::{partition_graph, PartitionGraph, Partitioning};
