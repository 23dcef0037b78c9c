//! Indirect connections from raw match runs
//!
//! A run is cut down to its informative occurrences: it starts at the first
//! occurrence that branches on its exit side, ends at the last one that
//! branches on its entry side, and keeps every branching occurrence in
//! between. What direct adjacency already says is dropped, so a filtered run
//! is kept when it has at least three elements, or two that are not already
//! direct-connected. Identical runs (read in either direction) are grouped
//! under a symmetric hash.

use crate::index::scanner::Match;
use crate::io::buckets::{read_leading_u64, SpillRecord};
use crate::kmer::kmer::{Orientation, Side};
use crate::kmer::table::{KmerTable, Link};
use crate::relations::extract::ReadRuns;
use crate::relations::resolve::DirectRelation;
use ahash::{AHashMap, RandomState};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::hash::BuildHasher;
use std::io::{self, Read, Write};

pub type Element = (Link, Orientation);

/// Resolved direct relations indexed by (Ckmer, side)
pub struct Adjacency {
    offsets: Vec<usize>,
    relations: Vec<DirectRelation>,
}

impl Adjacency {
    /// `relations` must be sorted
    pub fn new(num_kmers: usize, relations: Vec<DirectRelation>) -> Self {
        let mut offsets = vec![0usize; 2 * num_kmers + 1];
        for rel in &relations {
            offsets[slot(rel.from, rel.from_side) + 1] += 1;
        }
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }
        Self { offsets, relations }
    }

    pub fn relations(&self) -> &[DirectRelation] {
        &self.relations
    }

    pub fn into_relations(self) -> Vec<DirectRelation> {
        self.relations
    }

    pub fn group(&self, link: Link, side: Side) -> &[DirectRelation] {
        let s = slot(link, side);
        &self.relations[self.offsets[s]..self.offsets[s + 1]]
    }

    pub fn degree(&self, link: Link, side: Side) -> usize {
        self.group(link, side).len()
    }

    /// Whether two consecutive run occurrences are a stored direct relation
    pub fn is_direct(&self, a: &Match, b: &Match) -> bool {
        let to_side = Side::entry(b.orientation);
        let distance = b.position - a.position;
        self.group(a.link, Side::exit(a.orientation))
            .iter()
            .any(|r| r.to == b.link && r.to_side == to_side && r.distance == distance)
    }
}

fn slot(link: Link, side: Side) -> usize {
    2 * link as usize + side.as_u8() as usize
}

/// Informative elements of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredRun {
    pub elements: Vec<Element>,
    /// Span from the first to the last retained occurrence
    pub length: u32,
    /// Every step between the retained ends is a direct relation
    pub direct: bool,
}

impl FilteredRun {
    /// The smaller of the run and its reverse reading
    pub fn canonicalize(mut self) -> Self {
        let reversed: Vec<Element> = self.elements.iter().rev().map(|&(l, o)| (l, o.flip())).collect();
        if reversed < self.elements {
            self.elements = reversed;
        }
        self
    }

    pub fn hash(&self) -> u64 {
        symmetric_hash(&self.elements)
    }
}

impl SpillRecord for FilteredRun {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.elements.len() as u64)?;
        for &(link, o) in &self.elements {
            writer.write_u32::<LittleEndian>(link)?;
            writer.write_u8(o.as_u8())?;
        }
        writer.write_u32::<LittleEndian>(self.length)?;
        writer.write_u8(self.direct as u8)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let Some(len) = read_leading_u64(reader)? else {
            return Ok(None);
        };
        let mut elements = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let link = reader.read_u32::<LittleEndian>()?;
            elements.push((link, Orientation::from_u8(reader.read_u8()?)));
        }
        let length = reader.read_u32::<LittleEndian>()?;
        let direct = reader.read_u8()? == 1;
        Ok(Some(Self { elements, length, direct }))
    }
}

/// Hash identical for a run and its reverse reading
pub fn symmetric_hash(elements: &[Element]) -> u64 {
    let reversed: Vec<Element> = elements.iter().rev().map(|&(l, o)| (l, o.flip())).collect();
    let canonical = if reversed.as_slice() < elements {
        reversed.as_slice()
    } else {
        elements
    };
    let state = RandomState::with_seeds(0x5157_4d45_5253_4554, 0x2545_f491_4f6c_dd1d, 0x9e37_79b9_7f4a_7c15, 0xd6e8_feb8_6659_fd93);
    state.hash_one(canonical)
}

/// Retained occurrence indices of a run, `None` when nothing branches
fn informative_indices(run: &[Match], adjacency: &Adjacency) -> Option<Vec<usize>> {
    let out_branch = |m: &Match| adjacency.degree(m.link, Side::exit(m.orientation)) > 1;
    let in_branch = |m: &Match| adjacency.degree(m.link, Side::entry(m.orientation)) > 1;
    let first = run.iter().position(out_branch)?;
    let last = run.iter().rposition(in_branch)?;
    if first > last {
        return None;
    }
    let mut retained = vec![first];
    for (i, m) in run.iter().enumerate().take(last).skip(first + 1) {
        if out_branch(m) || in_branch(m) {
            retained.push(i);
        }
    }
    if last != first {
        retained.push(last);
    }
    Some(retained)
}

/// Filter one run; `None` if it carries nothing beyond direct adjacency
pub fn filter_run(run: &[Match], adjacency: &Adjacency) -> Option<FilteredRun> {
    if run.len() < 2 {
        return None;
    }
    let retained = informative_indices(run, adjacency)?;
    let (first, last) = (retained[0], retained[retained.len() - 1]);
    let direct = run[first..=last].windows(2).all(|w| adjacency.is_direct(&w[0], &w[1]));
    if retained.len() < 2 || (retained.len() == 2 && direct) {
        return None;
    }
    Some(FilteredRun {
        elements: retained.iter().map(|&i| (run[i].link, run[i].orientation)).collect(),
        length: run[last].position - run[first].position,
        direct,
    })
}

/// Distinct informative Ckmers of one mate
fn mate_links(runs: &[Vec<Match>], adjacency: &Adjacency) -> Vec<Link> {
    let mut links: Vec<Link> = Vec::new();
    for run in runs {
        match informative_indices(run, adjacency) {
            Some(retained) if run.len() > 2 => links.extend(retained.iter().map(|&i| run[i].link)),
            _ => links.extend(run.iter().map(|m| m.link)),
        }
    }
    links.sort_unstable();
    links.dedup();
    links
}

/// Pairing of a mate that reduces to a single Ckmer with an anchor in the
/// other mate: the least frequent Ckmer there, smallest link on ties
pub fn pair_anchor(first: &[Vec<Match>], second: &[Vec<Match>], adjacency: &Adjacency, kmers: &KmerTable) -> Option<(Link, Link)> {
    let a = mate_links(first, adjacency);
    let b = mate_links(second, adjacency);
    let (single, other) = match (a.len(), b.len()) {
        (1, n) if n > 0 => (a[0], b),
        (n, 1) if n > 0 => (b[0], a),
        _ => return None,
    };
    let anchor = other
        .iter()
        .copied()
        .filter(|&l| l != single)
        .min_by_key(|&l| (kmers.number[l as usize], l))?;
    Some((single, anchor))
}

/// Filtered runs and pairing contributed by one read or read pair
pub fn process_read(read: &ReadRuns, adjacency: &Adjacency, kmers: &KmerTable) -> (Vec<FilteredRun>, Option<(Link, Link)>) {
    let mut filtered: Vec<FilteredRun> = Vec::new();
    let mates = std::iter::once(&read.first).chain(read.second.iter());
    for runs in mates {
        filtered.extend(
            runs.iter()
                .filter(|r| r.len() > 2)
                .filter_map(|r| filter_run(r, adjacency))
                .map(FilteredRun::canonicalize),
        );
    }
    let pair = read
        .second
        .as_ref()
        .and_then(|second| pair_anchor(&read.first, second, adjacency, kmers));
    (filtered, pair)
}

/// A group of identical filtered runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedSet {
    pub hash: u64,
    pub elements: Vec<Element>,
    /// Median span over the grouped runs
    pub length: u32,
    pub count: u64,
    pub direct: bool,
}

impl ConnectedSet {
    pub fn size(&self) -> usize {
        self.elements.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PairedRelation {
    pub from: Link,
    pub to: Link,
    pub count: u64,
}

struct SetAccumulator {
    lengths: Vec<u32>,
    direct: bool,
}

/// Groups filtered runs and pairings; one per worker or bucket
#[derive(Default)]
pub struct ConnectionAggregator {
    sets: AHashMap<Vec<Element>, SetAccumulator>,
    pairs: AHashMap<(Link, Link), u64>,
}

impl ConnectionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `run` must be canonical
    pub fn add_run(&mut self, run: FilteredRun) {
        let acc = self.sets.entry(run.elements).or_insert(SetAccumulator {
            lengths: Vec::new(),
            direct: true,
        });
        acc.lengths.push(run.length);
        acc.direct &= run.direct;
    }

    pub fn add_pair(&mut self, a: Link, b: Link) {
        *self.pairs.entry((a, b)).or_insert(0) += 1;
        *self.pairs.entry((b, a)).or_insert(0) += 1;
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// Fold in an aggregator that saw other reads
    pub fn merge(&mut self, other: ConnectionAggregator) {
        for (elements, theirs) in other.sets {
            let acc = self.sets.entry(elements).or_insert(SetAccumulator {
                lengths: Vec::new(),
                direct: true,
            });
            acc.lengths.extend(theirs.lengths);
            acc.direct &= theirs.direct;
        }
        for (key, count) in other.pairs {
            *self.pairs.entry(key).or_insert(0) += count;
        }
    }

    /// Connected sets sorted by hash, paired relations sorted by endpoints
    pub fn finish(self) -> (Vec<ConnectedSet>, Vec<PairedRelation>) {
        let mut sets: Vec<ConnectedSet> = self
            .sets
            .into_iter()
            .map(|(elements, mut acc)| {
                acc.lengths.sort_unstable();
                ConnectedSet {
                    hash: symmetric_hash(&elements),
                    length: acc.lengths[(acc.lengths.len() - 1) / 2],
                    count: acc.lengths.len() as u64,
                    direct: acc.direct,
                    elements,
                }
            })
            .collect();
        sets.sort_unstable_by(|a, b| (a.hash, &a.elements).cmp(&(b.hash, &b.elements)));

        let mut pairs: Vec<PairedRelation> = self
            .pairs
            .into_iter()
            .map(|((from, to), count)| PairedRelation { from, to, count })
            .collect();
        pairs.sort_unstable();
        (sets, pairs)
    }
}
