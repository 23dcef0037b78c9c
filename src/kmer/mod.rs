//! K-mer utilities: canonical form, splitting k-mer extraction and the
//! Ckmer/Base tables

pub mod kmer;
pub mod splits;
pub mod table;

pub use kmer::{canonical, is_canonical, reverse_complement, Orientation, Side};
pub use splits::{extract_from_counts, extract_splitting_kmers, SplitTables};
pub use table::{BaseTable, Branch, KmerTable, Link, SplitType};
