//! Relation observations from per-read match runs
//!
//! Adjacent matches of a run become direct observations, emitted in both
//! directions. Repeated Ckmers anywhere in one read become cycle (same
//! orientation) or reversal (opposite orientation) observations. Reads whose
//! runs can carry indirect connections are kept whole as `ReadRuns`.

use crate::index::scanner::Match;
use crate::io::buckets::{read_leading_u64, SpillRecord};
use crate::kmer::kmer::{Orientation, Side};
use crate::kmer::table::Link;
use ahash::AHashMap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

/// One observed adjacency, seen from `from`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectObservation {
    pub from: Link,
    pub from_side: Side,
    pub to: Link,
    pub to_side: Side,
    pub distance: u32,
    /// Orientation in which the read crossed `from`
    pub orientation: Orientation,
}

impl SpillRecord for DirectObservation {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(((self.from as u64) << 32) | self.to as u64)?;
        writer.write_u32::<LittleEndian>(self.distance)?;
        writer.write_u8(self.from_side.as_u8() | (self.to_side.as_u8() << 1) | (self.orientation.as_u8() << 2))
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let Some(links) = read_leading_u64(reader)? else {
            return Ok(None);
        };
        let distance = reader.read_u32::<LittleEndian>()?;
        let flags = reader.read_u8()?;
        Ok(Some(Self {
            from: (links >> 32) as Link,
            from_side: Side::from_u8(flags & 1),
            to: links as Link,
            to_side: Side::from_u8((flags >> 1) & 1),
            distance,
            orientation: Orientation::from_u8((flags >> 2) & 1),
        }))
    }
}

/// A revisit of the same Ckmer within one read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatObservation {
    pub link: Link,
    pub length: u32,
    /// Opposite orientation to the previous occurrence
    pub reversal: bool,
}

impl SpillRecord for RepeatObservation {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(((self.link as u64) << 1) | self.reversal as u64)?;
        writer.write_u32::<LittleEndian>(self.length)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let Some(head) = read_leading_u64(reader)? else {
            return Ok(None);
        };
        let length = reader.read_u32::<LittleEndian>()?;
        Ok(Some(Self {
            link: (head >> 1) as Link,
            length,
            reversal: head & 1 == 1,
        }))
    }
}

/// Minimum length and occurrence count of a Ckmer's cycles or reversals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepeatSummary {
    pub min_length: u32,
    pub count: u64,
}

/// Runs of one read, or of both mates of an unmerged pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRuns {
    pub first: Vec<Vec<Match>>,
    pub second: Option<Vec<Vec<Match>>>,
}

impl ReadRuns {
    /// Worth keeping for indirect connections: a run longer than two, or a
    /// pair whose mates both matched
    pub fn is_informative(&self) -> bool {
        let long_run = |runs: &[Vec<Match>]| runs.iter().any(|r| r.len() > 2);
        let any_match = |runs: &[Vec<Match>]| runs.iter().any(|r| !r.is_empty());
        match &self.second {
            None => long_run(&self.first),
            Some(second) => {
                long_run(&self.first) || long_run(second) || (any_match(&self.first) && any_match(second))
            }
        }
    }
}

fn write_runs<W: Write>(writer: &mut W, runs: &[Vec<Match>]) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(runs.len() as u32)?;
    for run in runs {
        writer.write_u32::<LittleEndian>(run.len() as u32)?;
        for m in run {
            writer.write_u32::<LittleEndian>(m.position)?;
            writer.write_u32::<LittleEndian>(m.link)?;
            writer.write_u8(m.orientation.as_u8())?;
        }
    }
    Ok(())
}

fn read_runs<R: Read>(reader: &mut R) -> io::Result<Vec<Vec<Match>>> {
    let num_runs = reader.read_u32::<LittleEndian>()? as usize;
    let mut runs = Vec::with_capacity(num_runs);
    for _ in 0..num_runs {
        let len = reader.read_u32::<LittleEndian>()? as usize;
        let mut run = Vec::with_capacity(len);
        for _ in 0..len {
            let position = reader.read_u32::<LittleEndian>()?;
            let link = reader.read_u32::<LittleEndian>()?;
            let orientation = Orientation::from_u8(reader.read_u8()?);
            run.push(Match { position, link, orientation });
        }
        runs.push(run);
    }
    Ok(runs)
}

impl SpillRecord for ReadRuns {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.second.is_some() as u64)?;
        write_runs(writer, &self.first)?;
        if let Some(second) = &self.second {
            write_runs(writer, second)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let Some(paired) = read_leading_u64(reader)? else {
            return Ok(None);
        };
        let first = read_runs(reader)?;
        let second = if paired == 1 { Some(read_runs(reader)?) } else { None };
        Ok(Some(Self { first, second }))
    }
}

/// Direct observations for every adjacent pair of a run, in both directions
pub fn direct_observations(run: &[Match], out: &mut Vec<DirectObservation>) {
    for pair in run.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let distance = b.position - a.position;
        let a_side = Side::exit(a.orientation);
        let b_side = Side::entry(b.orientation);
        out.push(DirectObservation {
            from: a.link,
            from_side: a_side,
            to: b.link,
            to_side: b_side,
            distance,
            orientation: a.orientation,
        });
        out.push(DirectObservation {
            from: b.link,
            from_side: b_side,
            to: a.link,
            to_side: a_side,
            distance,
            orientation: b.orientation.flip(),
        });
    }
}

/// Cycle and reversal observations over all runs of one read
///
/// Every occurrence is compared with the most recent earlier occurrence of
/// the same Ckmer, even across ambiguity boundaries.
pub fn repeat_observations(runs: &[Vec<Match>], out: &mut Vec<RepeatObservation>) {
    let mut last: AHashMap<Link, Match> = AHashMap::new();
    for m in runs.iter().flatten() {
        if let Some(prev) = last.insert(m.link, *m) {
            out.push(RepeatObservation {
                link: m.link,
                length: m.position - prev.position,
                reversal: prev.orientation != m.orientation,
            });
        }
    }
}

/// Fold repeat observations into per-Ckmer (cycles, reversals) summaries
pub fn summarize_repeats<I>(observations: I) -> (Vec<(Link, RepeatSummary)>, Vec<(Link, RepeatSummary)>)
where
    I: IntoIterator<Item = RepeatObservation>,
{
    let mut cycles: AHashMap<Link, RepeatSummary> = AHashMap::new();
    let mut reversals: AHashMap<Link, RepeatSummary> = AHashMap::new();
    for obs in observations {
        let map = if obs.reversal { &mut reversals } else { &mut cycles };
        map.entry(obs.link)
            .and_modify(|s| {
                s.min_length = s.min_length.min(obs.length);
                s.count += 1;
            })
            .or_insert(RepeatSummary {
                min_length: obs.length,
                count: 1,
            });
    }
    let sorted = |map: AHashMap<Link, RepeatSummary>| {
        let mut v: Vec<_> = map.into_iter().collect();
        v.sort_unstable_by_key(|&(link, _)| link);
        v
    };
    (sorted(cycles), sorted(reversals))
}
