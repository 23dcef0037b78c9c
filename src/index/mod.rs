//! Multi-pattern matching of splitting k-mers in reads

pub mod automaton;
pub mod scanner;

pub use automaton::{Lookup, MatchIndex, Pattern};
pub use scanner::{merge_mates, scan_sequence, Match, ScannedSequence};
