//! In-memory Ckmer and Base tables.
//!
//! Both tables are built once by the splitting k-mer extractor and are
//! read-only afterwards; pipeline workers share them through an `Arc`.
//! Sequences live in one flat buffer with a fixed stride, sorted
//! lexicographically, so lookup by sequence is a binary search and lookup
//! by link is direct indexing.

use crate::kmer::kmer::Side;
use serde::Serialize;

/// Dense index of a Ckmer or Base in its sorted table
pub type Link = u32;

/// Which sides of a canonical k-mer carry a splitting base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitType {
    Left,
    Right,
    Both,
}

impl SplitType {
    pub fn from_sides(left: bool, right: bool) -> Option<Self> {
        match (left, right) {
            (true, true) => Some(SplitType::Both),
            (true, false) => Some(SplitType::Left),
            (false, true) => Some(SplitType::Right),
            (false, false) => None,
        }
    }

    pub fn has(self, side: Side) -> bool {
        matches!(
            (self, side),
            (SplitType::Both, _) | (SplitType::Left, Side::Left) | (SplitType::Right, Side::Right)
        )
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SplitType::Left => 1,
            SplitType::Right => 2,
            SplitType::Both => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(SplitType::Left),
            2 => Some(SplitType::Right),
            3 => Some(SplitType::Both),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SplitType::Left => "left",
            SplitType::Right => "right",
            SplitType::Both => "both",
        }
    }
}

/// One branch slot of a Base: the letter's frequency and its Ckmer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub number: u64,
    pub ckmer: Option<Link>,
}

pub const LETTERS: [u8; 4] = [b'A', b'C', b'G', b'T'];

pub fn letter_index(letter: u8) -> Option<usize> {
    LETTERS.iter().position(|&l| l == letter)
}

/// Binary search in a flat, fixed-stride, sorted sequence buffer
pub(crate) fn search(seqs: &[u8], stride: usize, seq: &[u8]) -> Option<Link> {
    if stride == 0 || seq.len() != stride {
        return None;
    }
    let n = seqs.len() / stride;
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = (lo + hi) / 2;
        match seqs[mid * stride..(mid + 1) * stride].cmp(seq) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Some(mid as Link),
        }
    }
    None
}

/// Splitting k-mers in canonical orientation with their properties
#[derive(Debug, Clone, Default)]
pub struct KmerTable {
    pub k: usize,
    pub seqs: Vec<u8>,
    pub split: Vec<SplitType>,
    pub number: Vec<u64>,
    pub left_base: Vec<Option<Link>>,
    pub right_base: Vec<Option<Link>>,
}

impl KmerTable {
    pub fn len(&self) -> usize {
        self.split.len()
    }

    pub fn is_empty(&self) -> bool {
        self.split.is_empty()
    }

    pub fn seq(&self, link: Link) -> &[u8] {
        let i = link as usize * self.k;
        &self.seqs[i..i + self.k]
    }

    /// Link of a canonical k-mer sequence
    pub fn find(&self, seq: &[u8]) -> Option<Link> {
        search(&self.seqs, self.k, seq)
    }

    pub fn base(&self, link: Link, side: Side) -> Option<Link> {
        match side {
            Side::Left => self.left_base[link as usize],
            Side::Right => self.right_base[link as usize],
        }
    }

    /// Base grouping this k-mer with its alternatives when a read enters it
    /// through `entry`: entering on the left walks the canonical strand, so
    /// the k-mer is `right_base + letter`; entering on the right walks the
    /// reverse strand, where it is `left_base + letter`.
    pub fn arrival_base(&self, link: Link, entry: Side) -> Option<Link> {
        self.base(link, entry.opposite())
    }

    /// Approximate table memory in bytes
    pub fn memory_bytes(&self) -> usize {
        self.seqs.len() + self.len() * (1 + 8 + 2 * std::mem::size_of::<Option<Link>>())
    }
}

/// Shared (k-1)-contexts with up to four branch slots each
#[derive(Debug, Clone, Default)]
pub struct BaseTable {
    pub stride: usize,
    pub seqs: Vec<u8>,
    pub branches: Vec<[Branch; 4]>,
}

impl BaseTable {
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn seq(&self, link: Link) -> &[u8] {
        let i = link as usize * self.stride;
        &self.seqs[i..i + self.stride]
    }

    pub fn find(&self, seq: &[u8]) -> Option<Link> {
        search(&self.seqs, self.stride, seq)
    }

    /// Total number: the sum of the branch slot numbers
    pub fn number(&self, link: Link) -> u64 {
        self.branches[link as usize].iter().map(|b| b.number).sum()
    }

    /// Ckmers linked from this base's filled slots
    pub fn members(&self, link: Link) -> impl Iterator<Item = Link> + '_ {
        self.branches[link as usize].iter().filter_map(|b| b.ckmer)
    }
}
