//! Match index over the splitting k-mer set
//!
//! Patterns are the canonical k-mers plus, for non-palindromes, their reverse
//! complements tagged `Backward`. All patterns share the same length, so the
//! multi-pattern automaton reduces to a rolling window: the pre-filter keys
//! every pattern by the 2-bit code of its first `prefix_len` bases, and a
//! sorted positional index maps each key to the patterns sharing that prefix
//! for exact confirmation.

use crate::kmer::kmer::{base_code, complement, reverse_complement_unchecked, Orientation};
use crate::kmer::table::{KmerTable, Link};
use rayon::prelude::*;
use std::sync::Arc;

/// A pattern of the index: a Ckmer in one orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub link: Link,
    pub orientation: Orientation,
}

/// Outcome of confirming a pre-filter hit against full-length patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    NotFound,
    Ambiguous,
    Confirmed(Pattern),
}

pub struct MatchIndex {
    kmers: Arc<KmerTable>,
    prefix_len: usize,
    keys: Vec<u64>,
    patterns: Vec<Pattern>,
}

impl MatchIndex {
    pub fn build(kmers: Arc<KmerTable>, prefix_len: usize) -> Self {
        let prefix_len = prefix_len.clamp(1, kmers.k.min(32));
        let mut keyed: Vec<(u64, Pattern)> = (0..kmers.len() as Link)
            .into_par_iter()
            .flat_map_iter(|link| {
                let seq = kmers.seq(link);
                let rc = reverse_complement_unchecked(seq);
                let mut out = Vec::with_capacity(2);
                if let Some(key) = prefix_key(&seq[..prefix_len]) {
                    out.push((key, Pattern { link, orientation: Orientation::Forward }));
                }
                if rc != seq {
                    if let Some(key) = prefix_key(&rc[..prefix_len]) {
                        out.push((key, Pattern { link, orientation: Orientation::Backward }));
                    }
                }
                out
            })
            .collect();
        keyed.par_sort_unstable_by_key(|&(key, p)| (key, p.link, p.orientation));

        let (keys, patterns) = keyed.into_iter().unzip();
        Self {
            kmers,
            prefix_len,
            keys,
            patterns,
        }
    }

    pub fn k(&self) -> usize {
        self.kmers.k
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn kmers(&self) -> &Arc<KmerTable> {
        &self.kmers
    }

    pub fn num_patterns(&self) -> usize {
        self.patterns.len()
    }

    /// Patterns whose prefix encodes to `key`
    pub fn candidates(&self, key: u64) -> &[Pattern] {
        let start = self.keys.partition_point(|&k| k < key);
        let end = start + self.keys[start..].partition_point(|&k| k == key);
        &self.patterns[start..end]
    }

    pub fn has_prefix(&self, key: u64) -> bool {
        self.keys.binary_search(&key).is_ok()
    }

    /// Exact confirmation of a k-length window whose prefix encodes to `key`
    pub fn confirm(&self, window: &[u8], key: u64) -> Lookup {
        let mut found = None;
        for &pattern in self.candidates(key) {
            if self.pattern_matches(window, pattern) {
                if found.is_some() {
                    return Lookup::Ambiguous;
                }
                found = Some(pattern);
            }
        }
        match found {
            Some(p) => Lookup::Confirmed(p),
            None => Lookup::NotFound,
        }
    }

    /// A k-mer equal to its own reverse complement only has a forward pattern
    pub fn is_palindrome(&self, link: Link) -> bool {
        let seq = self.kmers.seq(link);
        seq.iter().zip(seq.iter().rev()).all(|(&a, &b)| a == complement(b))
    }

    fn pattern_matches(&self, window: &[u8], pattern: Pattern) -> bool {
        let seq = self.kmers.seq(pattern.link);
        if window.len() != seq.len() {
            return false;
        }
        match pattern.orientation {
            Orientation::Forward => window == seq,
            Orientation::Backward => window
                .iter()
                .zip(seq.iter().rev())
                .all(|(&w, &s)| w == complement(s)),
        }
    }

    /// Approximate memory held by one copy of the index in bytes
    pub fn memory_bytes(&self) -> usize {
        self.keys.len() * 8 + self.patterns.len() * std::mem::size_of::<Pattern>() + self.kmers.memory_bytes()
    }
}

/// 2-bit code of a pre-filter prefix
pub fn prefix_key(prefix: &[u8]) -> Option<u64> {
    crate::kmer::kmer::encode_kmer(prefix)
}

/// Rolling pre-filter over one strand of a read
///
/// Yields `(start, segment, key)` for every window of `prefix_len` ACGT bases
/// whose key is present in the index. `segment` counts the ambiguous stretches
/// seen so far, so windows in different segments were separated by non-ACGT
/// characters.
pub struct PrefixScanner<'a> {
    index: &'a MatchIndex,
    seq: &'a [u8],
    pos: usize,
    valid: usize,
    code: u64,
    segment: u32,
    mask: u64,
}

impl<'a> PrefixScanner<'a> {
    pub fn new(index: &'a MatchIndex, seq: &'a [u8]) -> Self {
        let bits = 2 * index.prefix_len as u32;
        let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
        Self {
            index,
            seq,
            pos: 0,
            valid: 0,
            code: 0,
            segment: 0,
            mask,
        }
    }
}

impl<'a> Iterator for PrefixScanner<'a> {
    type Item = (usize, u32, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let p = self.index.prefix_len;
        while self.pos < self.seq.len() {
            let b = self.seq[self.pos];
            self.pos += 1;
            match base_code(b) {
                Some(c) => {
                    self.code = ((self.code << 2) | c) & self.mask;
                    self.valid += 1;
                }
                None => {
                    if self.valid > 0 || self.pos == 1 {
                        self.segment += 1;
                    }
                    self.valid = 0;
                    self.code = 0;
                    continue;
                }
            }
            if self.valid >= p && self.index.has_prefix(self.code) {
                return Some((self.pos - p, self.segment, self.code));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::splits::extract_from_counts;

    fn index_for(k: usize, counts: &[(&str, u64)], prefix_len: usize) -> MatchIndex {
        let tables = extract_from_counts(k, 1, counts.iter().map(|(s, c)| (s.as_bytes().to_vec(), *c)));
        MatchIndex::build(Arc::new(tables.kmers), prefix_len)
    }

    #[test]
    fn test_confirm_both_orientations() {
        // splitting k-mers ACGA and ACGT
        let index = index_for(4, &[("AACGA", 5), ("AACGT", 3)], 2);
        // ACGT is a palindrome: one pattern; ACGA adds TCGT
        assert_eq!(index.num_patterns(), 3);

        let acga = index.kmers().find(b"ACGA").unwrap();
        let key = prefix_key(b"TC").unwrap();
        assert_eq!(
            index.confirm(b"TCGT", key),
            Lookup::Confirmed(Pattern { link: acga, orientation: Orientation::Backward })
        );
        assert_eq!(index.confirm(b"TCGA", key), Lookup::NotFound);
    }

    #[test]
    fn test_prefix_scanner_segments() {
        let index = index_for(4, &[("AACGA", 5), ("AACGT", 3)], 2);
        let hits: Vec<_> = PrefixScanner::new(&index, b"ACGANTCGT").collect();
        let starts: Vec<(usize, u32)> = hits.iter().map(|&(p, s, _)| (p, s)).collect();
        // AC at 0 in segment 0, TC at 5 in segment 1
        assert!(starts.contains(&(0, 0)));
        assert!(starts.contains(&(5, 1)));
        assert!(!starts.iter().any(|&(p, _)| p == 3 || p == 4));
    }
}
