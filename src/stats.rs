use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sorted (value, count) pairs for a stream of values
pub fn histogram<I: Iterator<Item = u64>>(values: I) -> Vec<(u64, u64)> {
    let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

/// Counters gathered over a whole build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStats {
    pub kmer_list_lines: u64,
    pub malformed_kmer_lines: u64,
    pub splitting_kmers: u64,
    pub bases: u64,
    pub reads: u64,
    pub read_pairs: u64,
    pub merged_pairs: u64,
    pub bases_scanned: u64,
    pub min_read_length: u64,
    pub max_read_length: u64,
    pub matches: u64,
    pub lookup_mismatches: u64,
    pub aborted_files: u64,
    pub direct_observations: u64,
    pub direct_relations: u64,
    pub deleted_relations: u64,
    /// Stored direct relations per problem code 0..=5
    pub problem_counts: [u64; 6],
    pub cycles: u64,
    pub reversals: u64,
    pub connected_sets: u64,
    pub paired_relations: u64,
    pub partitions: u64,
}

impl BuildStats {
    pub fn record_read_length(&mut self, len: usize) {
        let len = len as u64;
        if self.max_read_length == 0 || len < self.min_read_length {
            self.min_read_length = len;
        }
        self.max_read_length = self.max_read_length.max(len);
    }

    /// Fold another worker's counters into these
    pub fn absorb(&mut self, other: &BuildStats) {
        if other.max_read_length > 0 {
            if self.max_read_length == 0 || other.min_read_length < self.min_read_length {
                self.min_read_length = other.min_read_length;
            }
            self.max_read_length = self.max_read_length.max(other.max_read_length);
        }
        self.reads += other.reads;
        self.read_pairs += other.read_pairs;
        self.merged_pairs += other.merged_pairs;
        self.bases_scanned += other.bases_scanned;
        self.matches += other.matches;
        self.lookup_mismatches += other.lookup_mismatches;
        self.direct_observations += other.direct_observations;
    }
}

impl std::fmt::Display for BuildStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Index Statistics ===")?;
        writeln!(f, "K-mer list: {} lines, {} malformed", self.kmer_list_lines, self.malformed_kmer_lines)?;
        writeln!(f, "Splitting k-mers: {}, bases: {}", self.splitting_kmers, self.bases)?;
        writeln!(
            f,
            "Reads: {} unpaired, {} pairs ({} merged), {} bases, lengths {}..={}",
            self.reads, self.read_pairs, self.merged_pairs, self.bases_scanned, self.min_read_length, self.max_read_length
        )?;
        writeln!(f, "Matches: {} ({} lookup mismatches)", self.matches, self.lookup_mismatches)?;
        if self.aborted_files > 0 {
            writeln!(f, "Aborted files: {}", self.aborted_files)?;
        }
        writeln!(
            f,
            "Direct relations: {} stored from {} observations, {} deleted",
            self.direct_relations, self.direct_observations, self.deleted_relations
        )?;
        writeln!(f, "Problem codes 0-5: {:?}", self.problem_counts)?;
        writeln!(f, "Cycles: {}, reversals: {}", self.cycles, self.reversals)?;
        writeln!(f, "Connected sets: {}, paired relations: {}", self.connected_sets, self.paired_relations)?;
        write!(f, "Partitions: {}", self.partitions)
    }
}
