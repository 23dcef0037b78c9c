//! Direct, cycle and reversal relations between splitting k-mers

pub mod extract;
pub mod resolve;

pub use extract::{DirectObservation, ReadRuns, RepeatObservation, RepeatSummary};
pub use resolve::{finalize_relations, group_observations, DirectRelation, RelationGroup, Removal, RemovalReason, Resolution};
