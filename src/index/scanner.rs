//! Read scanning against the match index
//!
//! Scanning runs in two steps so the pipeline can spread them over separate
//! worker pools:
//! 1. `find_candidates`: rolling pre-filter over the read and its reverse
//!    complement, yielding prefix hits.
//! 2. `confirm_candidates`: exact confirmation of every hit, cross-validation
//!    of the two strands, and splitting into runs at ambiguous bases.

use crate::index::automaton::{Lookup, MatchIndex, Pattern, PrefixScanner};
use crate::kmer::kmer::{reverse_complement_unchecked, Orientation};
use crate::kmer::table::Link;

/// One confirmed occurrence of a Ckmer in a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Match {
    pub position: u32,
    pub link: Link,
    pub orientation: Orientation,
}

/// Pre-filter hit on one strand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub position: u32,
    pub segment: u32,
    pub key: u64,
}

/// Pre-filter hits of a read on both strands
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub forward: Vec<Hit>,
    pub reverse: Vec<Hit>,
}

/// Confirmed matches of one sequence, split at ambiguous bases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedSequence {
    /// Ordered runs; matches of different runs were separated by non-ACGT characters
    pub runs: Vec<Vec<Match>>,
    /// Hits confirmed on one strand only
    pub mismatches: u64,
}

impl ScannedSequence {
    pub fn num_matches(&self) -> usize {
        self.runs.iter().map(Vec::len).sum()
    }
}

fn collect_hits(index: &MatchIndex, seq: &[u8]) -> Vec<Hit> {
    PrefixScanner::new(index, seq)
        .filter(|&(start, _, _)| start + index.k() <= seq.len())
        .map(|(start, segment, key)| Hit {
            position: start as u32,
            segment,
            key,
        })
        .collect()
}

pub fn find_candidates(index: &MatchIndex, seq: &[u8]) -> Candidates {
    if seq.len() < index.k() {
        return Candidates::default();
    }
    let rc = reverse_complement_unchecked(seq);
    Candidates {
        forward: collect_hits(index, seq),
        reverse: collect_hits(index, &rc),
    }
}

fn confirm_hit(index: &MatchIndex, seq: &[u8], hit: &Hit) -> Option<Pattern> {
    let start = hit.position as usize;
    let window = seq.get(start..start + index.k())?;
    match index.confirm(window, hit.key) {
        Lookup::Confirmed(pattern) => Some(pattern),
        Lookup::NotFound | Lookup::Ambiguous => None,
    }
}

/// Confirm hits on both strands and keep the matches the strands agree on
pub fn confirm_candidates(index: &MatchIndex, seq: &[u8], candidates: &Candidates) -> ScannedSequence {
    let k = index.k();
    if seq.len() < k {
        return ScannedSequence::default();
    }
    let rc = reverse_complement_unchecked(seq);

    let forward: Vec<(Match, u32)> = candidates
        .forward
        .iter()
        .filter_map(|hit| {
            confirm_hit(index, seq, hit).map(|p| {
                (
                    Match {
                        position: hit.position,
                        link: p.link,
                        orientation: p.orientation,
                    },
                    hit.segment,
                )
            })
        })
        .collect();

    // a reverse-strand hit at q covers forward positions len-q-k..len-q
    let mut reverse: Vec<Match> = candidates
        .reverse
        .iter()
        .filter_map(|hit| {
            confirm_hit(index, &rc, hit).map(|p| Match {
                position: (seq.len() - hit.position as usize - k) as u32,
                link: p.link,
                orientation: if index.is_palindrome(p.link) {
                    Orientation::Forward
                } else {
                    p.orientation.flip()
                },
            })
        })
        .collect();
    reverse.sort_unstable();

    let mut runs: Vec<Vec<Match>> = Vec::new();
    let mut current_segment = None;
    let mut agreed = 0u64;
    for (m, segment) in &forward {
        if reverse.binary_search(m).is_err() {
            continue;
        }
        agreed += 1;
        if current_segment != Some(*segment) {
            runs.push(Vec::new());
            current_segment = Some(*segment);
        }
        if let Some(run) = runs.last_mut() {
            run.push(*m);
        }
    }

    ScannedSequence {
        runs,
        mismatches: (forward.len() as u64 - agreed) + (reverse.len() as u64 - agreed),
    }
}

/// Both scanning steps on one sequence
pub fn scan_sequence(index: &MatchIndex, seq: &[u8]) -> ScannedSequence {
    let candidates = find_candidates(index, seq);
    confirm_candidates(index, seq, &candidates)
}

/// Merge two mates (mate 2 already reverse-complemented) into one sequence
///
/// Mates merge when one contains the other, or when mate 1's last k bases
/// occur in mate 2 and everything of mate 2 before that occurrence matches
/// the end of mate 1.
pub fn merge_mates(mate1: &[u8], mate2: &[u8], k: usize) -> Option<Vec<u8>> {
    if mate1.len() < k || mate2.len() < k {
        return None;
    }
    if contains(mate1, mate2) {
        return Some(mate1.to_vec());
    }
    if contains(mate2, mate1) {
        return Some(mate2.to_vec());
    }
    let suffix = &mate1[mate1.len() - k..];
    for q in 0..=mate2.len() - k {
        if &mate2[q..q + k] != suffix {
            continue;
        }
        let overlap = q + k;
        if overlap <= mate1.len() && mate2[..overlap] == mate1[mate1.len() - overlap..] {
            let mut merged = Vec::with_capacity(mate1.len() + mate2.len() - overlap);
            merged.extend_from_slice(mate1);
            merged.extend_from_slice(&mate2[overlap..]);
            return Some(merged);
        }
    }
    None
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::splits::extract_from_counts;
    use std::sync::Arc;

    fn small_index() -> MatchIndex {
        // splitting k-mers ACGA and ACGT (k=4)
        let tables = extract_from_counts(4, 1, vec![(b"AACGA".to_vec(), 5), (b"AACGT".to_vec(), 3)]);
        MatchIndex::build(Arc::new(tables.kmers), 2)
    }

    #[test]
    fn test_scan_orientations_and_runs() {
        let index = small_index();
        let acga = index.kmers().find(b"ACGA").unwrap();
        let acgt = index.kmers().find(b"ACGT").unwrap();

        let scanned = scan_sequence(&index, b"GGACGAGGTCGTN");
        assert_eq!(scanned.mismatches, 0);
        assert_eq!(
            scanned.runs,
            vec![vec![
                Match { position: 2, link: acga, orientation: Orientation::Forward },
                Match { position: 8, link: acga, orientation: Orientation::Backward },
            ]]
        );

        let split = scan_sequence(&index, b"ACGTNACGA");
        assert_eq!(split.runs.len(), 2);
        assert_eq!(split.runs[0][0].link, acgt);
        assert_eq!(split.runs[1][0], Match { position: 5, link: acga, orientation: Orientation::Forward });
    }

    #[test]
    fn test_short_and_empty_reads() {
        let index = small_index();
        assert_eq!(scan_sequence(&index, b"ACG"), ScannedSequence::default());
        assert_eq!(scan_sequence(&index, b""), ScannedSequence::default());
        assert_eq!(scan_sequence(&index, b"NNNNNNNN").num_matches(), 0);
    }

    #[test]
    fn test_merge_mates_overlap() {
        let m1 = b"AAAACCCCGGGG";
        let m2 = b"CCGGGGTTTT";
        assert_eq!(merge_mates(m1, m2, 4).unwrap(), b"AAAACCCCGGGGTTTT".to_vec());
        // containment
        assert_eq!(merge_mates(m1, b"ACCCCG", 4).unwrap(), m1.to_vec());
        // suffix present but earlier bases disagree
        assert_eq!(merge_mates(m1, b"TTGGGGAAAA", 4), None);
        assert_eq!(merge_mates(m1, b"TTTTTTTT", 4), None);
    }
}
