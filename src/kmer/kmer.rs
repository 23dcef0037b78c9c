//! Canonical form utilities.
//!
//! Every k-mer is stored in the orientation that compares smaller against its
//! reverse complement. The comparison walks the sequence from both ends
//! inward so the canonical test never needs to build the reverse complement.

use crate::error::{IndexError, Result};
use serde::Serialize;

/// Complement table for A, C, G, T and N; every other byte maps to 0.
const COMPLEMENT: [u8; 256] = {
    let mut table = [0u8; 256];
    table[b'A' as usize] = b'T';
    table[b'C' as usize] = b'G';
    table[b'G' as usize] = b'C';
    table[b'T' as usize] = b'A';
    table[b'N' as usize] = b'N';
    table
};

/// Read orientation of a k-mer occurrence relative to its canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Forward,
    Backward,
}

impl Orientation {
    pub fn flip(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Backward,
            Orientation::Backward => Orientation::Forward,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Orientation::Forward => 0,
            Orientation::Backward => 1,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        if v == 0 {
            Orientation::Forward
        } else {
            Orientation::Backward
        }
    }
}

/// Side of a canonical k-mer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        if v == 0 {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// Side through which a read enters an occurrence with this orientation
    pub fn entry(orientation: Orientation) -> Self {
        match orientation {
            Orientation::Forward => Side::Left,
            Orientation::Backward => Side::Right,
        }
    }

    /// Side through which a read leaves an occurrence with this orientation
    pub fn exit(orientation: Orientation) -> Self {
        Side::entry(orientation).opposite()
    }
}

#[inline]
pub fn complement(base: u8) -> u8 {
    COMPLEMENT[base as usize]
}

#[inline]
pub fn is_acgt(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T')
}

/// 2-bit code of an ACGT byte
#[inline]
pub fn base_code(base: u8) -> Option<u64> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Encodes a DNA k-mer to a 64-bit integer (2 bits per nucleotide, max 32-mer)
pub fn encode_kmer(seq: &[u8]) -> Option<u64> {
    let mut val: u64 = 0;
    for &b in seq {
        val = (val << 2) | base_code(b)?;
    }
    Some(val)
}

/// Returns the reverse complement of a DNA sequence over {A,C,G,T,N}
pub fn reverse_complement(seq: &[u8]) -> Result<Vec<u8>> {
    let mut rc = Vec::with_capacity(seq.len());
    for &b in seq.iter().rev() {
        let c = complement(b);
        if c == 0 {
            return Err(invalid(seq));
        }
        rc.push(c);
    }
    Ok(rc)
}

/// Reverse complement of a sequence already known to be valid
pub(crate) fn reverse_complement_unchecked(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// Returns the canonical form of a k-mer over {A,C,G,T}
pub fn canonical(seq: &[u8]) -> Result<Vec<u8>> {
    validate_acgt(seq)?;
    if prefers_forward(seq) {
        Ok(seq.to_vec())
    } else {
        Ok(reverse_complement_unchecked(seq))
    }
}

/// Whether a k-mer over {A,C,G,T} is already in canonical form
pub fn is_canonical(seq: &[u8]) -> Result<bool> {
    validate_acgt(seq)?;
    Ok(prefers_forward(seq))
}

/// Compares `seq` with its reverse complement from both ends inward.
/// Palindromes compare equal and keep the forward orientation.
#[inline]
pub(crate) fn prefers_forward(seq: &[u8]) -> bool {
    let n = seq.len();
    for i in 0..n {
        let f = seq[i];
        let r = complement(seq[n - 1 - i]);
        if f != r {
            return f < r;
        }
    }
    true
}

fn validate_acgt(seq: &[u8]) -> Result<()> {
    if seq.iter().all(|&b| is_acgt(b)) {
        Ok(())
    } else {
        Err(invalid(seq))
    }
}

fn invalid(seq: &[u8]) -> IndexError {
    IndexError::InvalidSequence(String::from_utf8_lossy(seq).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement(b"ACGTN").unwrap(), b"NACGT".to_vec());
        assert_eq!(reverse_complement(b"AAAC").unwrap(), b"GTTT".to_vec());
        assert!(reverse_complement(b"ACXT").is_err());
    }

    #[test]
    fn test_canonical_picks_smaller() {
        assert_eq!(canonical(b"TTTG").unwrap(), b"CAAA".to_vec());
        assert_eq!(canonical(b"CAAA").unwrap(), b"CAAA".to_vec());
        // palindrome keeps its own orientation
        assert_eq!(canonical(b"ACGT").unwrap(), b"ACGT".to_vec());
        assert!(canonical(b"ACGN").is_err());
        assert!(canonical(b"acgt").is_err());
    }

    #[test]
    fn test_is_canonical_matches_canonical() {
        for kmer in [&b"AAAA"[..], b"TTTT", b"GATTACA", b"TGTAATC", b"ACGT"] {
            let c = canonical(kmer).unwrap();
            assert_eq!(is_canonical(kmer).unwrap(), c == kmer);
        }
    }

    #[test]
    fn test_canonical_idempotent_and_strand_independent() {
        let seqs = [&b"GGCATTACGA"[..], b"TTTTTTTTTC", b"ACGTACGTAC", b"CCCCGGGG"];
        for s in seqs {
            let c = canonical(s).unwrap();
            assert_eq!(canonical(&c).unwrap(), c);
            let rc = reverse_complement(s).unwrap();
            assert_eq!(canonical(&rc).unwrap(), c);
            assert_eq!(reverse_complement(&rc).unwrap(), s.to_vec());
        }
    }

    #[test]
    fn test_sides_follow_orientation() {
        assert_eq!(Side::entry(Orientation::Forward), Side::Left);
        assert_eq!(Side::exit(Orientation::Forward), Side::Right);
        assert_eq!(Side::entry(Orientation::Backward), Side::Right);
        assert_eq!(Side::exit(Orientation::Backward), Side::Left);
    }

    #[test]
    fn test_encode_kmer() {
        assert_eq!(encode_kmer(b"ACGT"), Some(0b00_01_10_11));
        assert_eq!(encode_kmer(b"ACNT"), None);
    }
}
