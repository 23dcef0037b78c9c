//! Persisted index store
//!
//! One file holding a JSON attribute block followed by named columns. Every
//! numeric column is a [`UIntArray`] whose width is chosen from the largest
//! value it holds, so the writer always computes a column's maximum before
//! allocating it. Columns indexed by Ckmer or Base link give O(1) random
//! access; sequence columns are sorted for binary search.

pub mod reader;
pub mod uint;
pub mod writer;

pub use reader::Store;
pub use uint::UIntArray;
pub use writer::write_store;

use crate::config::IndexConfig;
use crate::graph::{ConnectedSet, PairedRelation, Partitioning};
use crate::kmer::table::{BaseTable, Branch, KmerTable, Link, SplitType};
use crate::relations::{DirectRelation, RepeatSummary};
use crate::stats::BuildStats;
use serde::{Deserialize, Serialize};

pub(crate) const MAGIC: &[u8; 8] = b"SPLTMER\0";
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Frequency histograms as sorted (value, count) pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histograms {
    pub kmer: Vec<(u64, u64)>,
    pub splitting_kmer: Vec<(u64, u64)>,
    pub base: Vec<(u64, u64)>,
    pub distance: Vec<(u64, u64)>,
}

/// Global attributes of a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attributes {
    pub format_version: u32,
    pub k: usize,
    pub minimum_frequency: u64,
    pub automaton_kmer_size: usize,
    pub min_read_length: u64,
    pub max_read_length: u64,
    pub num_kmers: u64,
    pub num_bases: u64,
    pub num_direct_relations: u64,
    pub num_cycles: u64,
    pub num_reversals: u64,
    pub num_connected_sets: u64,
    pub num_paired_relations: u64,
    pub num_partitions: u64,
    pub histograms: Histograms,
    pub stats: BuildStats,
    pub config: IndexConfig,
}

impl Attributes {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            k: config.k,
            minimum_frequency: config.minimum_frequency,
            automaton_kmer_size: config.automaton_size(),
            min_read_length: 0,
            max_read_length: 0,
            num_kmers: 0,
            num_bases: 0,
            num_direct_relations: 0,
            num_cycles: 0,
            num_reversals: 0,
            num_connected_sets: 0,
            num_paired_relations: 0,
            num_partitions: 0,
            histograms: Histograms::default(),
            stats: BuildStats::default(),
            config: config.clone(),
        }
    }
}

/// Everything a build hands to the store writer
pub struct StoreContents {
    pub attributes: Attributes,
    pub kmers: KmerTable,
    pub bases: BaseTable,
    /// Sorted by (from, from side, to, to side, distance)
    pub relations: Vec<DirectRelation>,
    pub cycles: Vec<(Link, RepeatSummary)>,
    pub reversals: Vec<(Link, RepeatSummary)>,
    pub partitioning: Partitioning,
    /// Sorted by hash
    pub connected: Vec<ConnectedSet>,
    /// Sorted by (from, to)
    pub paired: Vec<PairedRelation>,
}

/// Number of distinct relations and their summed count on one side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectSummary {
    pub distinct: u64,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CkmerRecord {
    pub link: Link,
    pub sequence: String,
    pub split: SplitType,
    pub number: u64,
    pub left_base: Option<Link>,
    pub right_base: Option<Link>,
    pub direct_left: DirectSummary,
    pub direct_right: DirectSummary,
    pub partition: u32,
    pub cycles: u64,
    pub reversals: u64,
    pub connected_sets: u64,
    pub paired: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseRecord {
    pub link: Link,
    pub sequence: String,
    pub number: u64,
    /// Slots for A, C, G, T
    pub branches: [Branch; 4],
}

/// Store a link as link + 1 so that zero means "none"
pub(crate) fn encode_link(link: Option<Link>) -> u64 {
    link.map_or(0, |l| l as u64 + 1)
}

pub(crate) fn decode_link(v: u64) -> Option<Link> {
    v.checked_sub(1).map(|l| l as Link)
}
