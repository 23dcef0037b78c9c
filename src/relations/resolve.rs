//! Direct relation resolution
//!
//! Observations are grouped by (from, from side). Each group is resolved on
//! its own:
//! 1. A single arrival base at a single distance is clean.
//! 2. Several bases: a base with strictly more support than every other wins
//!    and the rest is deleted. A tie is retried on reverse-orientation
//!    evidence only (problem 4 on success, problem 2 otherwise).
//! 3. Several distances: weak distances are dropped; one remaining distance
//!    gives problem 1, more give problem 3.
//! 4. Entries below the frequency floor are dropped when stronger evidence
//!    exists; otherwise the whole group is kept with problem 1.
//!
//! Every deletion is then mirrored onto the reverse relation. A group that
//! lost every relation only because its sole, below-floor evidence was
//! dropped at the other end is restored with problem 5. Relations lost to a
//! majority or distance decision are never restored.

use crate::kmer::kmer::{Orientation, Side};
use crate::kmer::table::{KmerTable, Link};
use crate::relations::extract::DirectObservation;
use ahash::{AHashMap, AHashSet};
use serde::Serialize;

pub const PROBLEM_CLEAN: u8 = 0;
pub const PROBLEM_REDUCED: u8 = 1;
pub const PROBLEM_TIED_BASES: u8 = 2;
pub const PROBLEM_DISTANCES: u8 = 3;
pub const PROBLEM_REVERSE_ONLY: u8 = 4;
pub const PROBLEM_LOST_SYMMETRY: u8 = 5;

/// Aggregated support for one (to, to side, distance) destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectEvidence {
    pub to: Link,
    pub to_side: Side,
    pub distance: u32,
    /// Reads that crossed `from` in forward orientation
    pub forward: u64,
    pub backward: u64,
}

impl DirectEvidence {
    pub fn count(&self) -> u64 {
        self.forward + self.backward
    }
}

/// All evidence leaving one side of one Ckmer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationGroup {
    pub from: Link,
    pub from_side: Side,
    pub entries: Vec<DirectEvidence>,
}

/// Grouping key of a destination: its arrival base, or the destination
/// itself when it has no base on that side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum BaseKey {
    Base(Link),
    Lone(Link, Side),
}

/// Why a group discarded an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Lost to a stronger arrival base or distance
    Outvoted,
    /// Below the frequency floor while stronger evidence exists
    BelowFloor,
}

/// An entry discarded by a group, to be mirrored onto the reverse relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub to: Link,
    pub to_side: Side,
    pub distance: u32,
    pub reason: RemovalReason,
}

impl Removal {
    fn of(e: &DirectEvidence, reason: RemovalReason) -> Self {
        Self {
            to: e.to,
            to_side: e.to_side,
            distance: e.distance,
            reason,
        }
    }
}

/// Outcome of resolving one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub from: Link,
    pub from_side: Side,
    pub kept: Vec<DirectEvidence>,
    pub problem: u8,
    pub removed: Vec<Removal>,
    /// No entry reached the frequency floor; `kept` is the sole evidence
    pub below_floor: bool,
}

impl Resolution {
    pub fn deleted(&self) -> u64 {
        self.removed.len() as u64
    }
}

/// A stored direct relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DirectRelation {
    pub from: Link,
    pub from_side: Side,
    pub to: Link,
    pub to_side: Side,
    pub distance: u32,
    pub count: u64,
    pub problem: u8,
}

impl DirectRelation {
    fn key(&self) -> (Link, Side, Link, Side, u32) {
        (self.from, self.from_side, self.to, self.to_side, self.distance)
    }

    fn reverse_key(&self) -> (Link, Side, Link, Side, u32) {
        (self.to, self.to_side, self.from, self.from_side, self.distance)
    }

    pub fn reversed(&self) -> Self {
        Self {
            from: self.to,
            from_side: self.to_side,
            to: self.from,
            to_side: self.from_side,
            ..*self
        }
    }
}

/// Counts from combining resolutions into the final table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeStats {
    /// Relations removed because the other end discarded their reverse
    pub mirrored_deletions: u64,
    /// Relations whose reverse was never kept nor discarded
    pub asymmetric_dropped: u64,
    pub restored_groups: u64,
}

/// Group observations sorted by (from, from side, to, to side, distance)
pub fn group_observations(sorted: &[DirectObservation]) -> Vec<RelationGroup> {
    let mut groups: Vec<RelationGroup> = Vec::new();
    for obs in sorted {
        let same_group = groups
            .last()
            .map_or(false, |g| g.from == obs.from && g.from_side == obs.from_side);
        if !same_group {
            groups.push(RelationGroup {
                from: obs.from,
                from_side: obs.from_side,
                entries: Vec::new(),
            });
        }
        let Some(group) = groups.last_mut() else {
            continue;
        };
        let forward = matches!(obs.orientation, Orientation::Forward) as u64;
        match group.entries.last_mut() {
            Some(e) if e.to == obs.to && e.to_side == obs.to_side && e.distance == obs.distance => {
                e.forward += forward;
                e.backward += 1 - forward;
            }
            _ => group.entries.push(DirectEvidence {
                to: obs.to,
                to_side: obs.to_side,
                distance: obs.distance,
                forward,
                backward: 1 - forward,
            }),
        }
    }
    groups
}

/// The key with strictly the largest total, if there is one
fn unique_max<K: Copy + Ord>(totals: &[(K, u64)]) -> Option<K> {
    let best = totals.iter().map(|&(_, t)| t).max()?;
    let mut winners = totals.iter().filter(|&&(_, t)| t == best);
    let first = winners.next()?;
    if winners.next().is_some() || best == 0 {
        None
    } else {
        Some(first.0)
    }
}

fn sum_by<K: Copy + Ord + std::hash::Hash>(
    entries: &[DirectEvidence],
    key: impl Fn(&DirectEvidence) -> K,
    value: impl Fn(&DirectEvidence) -> u64,
) -> Vec<(K, u64)> {
    let mut totals: AHashMap<K, u64> = AHashMap::new();
    for e in entries {
        *totals.entry(key(e)).or_insert(0) += value(e);
    }
    let mut v: Vec<_> = totals.into_iter().collect();
    v.sort_unstable();
    v
}

impl RelationGroup {
    fn base_key(&self, kmers: &KmerTable, e: &DirectEvidence) -> BaseKey {
        match kmers.arrival_base(e.to, e.to_side) {
            Some(base) => BaseKey::Base(base),
            None => BaseKey::Lone(e.to, e.to_side),
        }
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(DirectEvidence::count).sum()
    }

    pub fn resolve(&self, kmers: &KmerTable, minimum_frequency: u64) -> Resolution {
        let mut kept = self.entries.clone();
        let mut removed = Vec::new();
        let mut problem = PROBLEM_CLEAN;
        let min_freq = minimum_frequency.max(1);

        let bases = sum_by(&kept, |e| self.base_key(kmers, e), DirectEvidence::count);
        if bases.len() > 1 {
            let winner = match unique_max(&bases) {
                Some(b) => Some(b),
                None => {
                    let best = bases.iter().map(|&(_, t)| t).max().unwrap_or(0);
                    let tied: Vec<BaseKey> = bases.iter().filter(|&&(_, t)| t == best).map(|&(b, _)| b).collect();
                    let reverse: Vec<(BaseKey, u64)> = sum_by(&kept, |e| self.base_key(kmers, e), |e| e.backward)
                        .into_iter()
                        .filter(|(b, _)| tied.contains(b))
                        .collect();
                    let winner = unique_max(&reverse);
                    problem = if winner.is_some() {
                        PROBLEM_REVERSE_ONLY
                    } else {
                        PROBLEM_TIED_BASES
                    };
                    winner
                }
            };
            if let Some(base) = winner {
                let (winning, lost): (Vec<_>, Vec<_>) = kept.into_iter().partition(|e| self.base_key(kmers, e) == base);
                removed.extend(lost.iter().map(|e| Removal::of(e, RemovalReason::Outvoted)));
                kept = winning;
            }
        }

        if problem != PROBLEM_TIED_BASES {
            let distances = sum_by(&kept, |e| e.distance, DirectEvidence::count);
            if distances.len() > 1 {
                let max_count = distances.iter().map(|&(_, t)| t).max().unwrap_or(0);
                let threshold = (max_count as f64 / min_freq as f64).sqrt().floor() as u64;
                let strong: Vec<u32> = distances.iter().filter(|&&(_, t)| t > threshold).map(|&(d, _)| d).collect();
                let (strong_entries, lost): (Vec<_>, Vec<_>) = kept.into_iter().partition(|e| strong.contains(&e.distance));
                removed.extend(lost.iter().map(|e| Removal::of(e, RemovalReason::Outvoted)));
                kept = strong_entries;
                let reduced = if strong.len() == 1 {
                    PROBLEM_REDUCED
                } else {
                    PROBLEM_DISTANCES
                };
                problem = problem.max(reduced);
            }
        }

        let below_floor = !kept.iter().any(|e| e.count() >= min_freq);
        if below_floor {
            problem = problem.max(PROBLEM_REDUCED);
        } else {
            let (frequent, lost): (Vec<_>, Vec<_>) = kept.into_iter().partition(|e| e.count() >= min_freq);
            removed.extend(lost.iter().map(|e| Removal::of(e, RemovalReason::BelowFloor)));
            kept = frequent;
        }
        if kept.iter().map(DirectEvidence::count).sum::<u64>() < min_freq {
            problem = problem.max(PROBLEM_REDUCED);
        }

        Resolution {
            from: self.from,
            from_side: self.from_side,
            kept,
            problem,
            removed,
            below_floor,
        }
    }
}

/// Combine group resolutions into the symmetric relation table
///
/// A relation survives only when the group at its other end kept the
/// reverse and did not discard it. Each relation's problem code is the
/// larger of its two ends.
pub fn finalize_relations(resolutions: &[Resolution]) -> (Vec<DirectRelation>, FinalizeStats) {
    let candidates: Vec<DirectRelation> = resolutions
        .iter()
        .flat_map(|r| {
            r.kept.iter().map(move |e| DirectRelation {
                from: r.from,
                from_side: r.from_side,
                to: e.to,
                to_side: e.to_side,
                distance: e.distance,
                count: e.count(),
                problem: r.problem,
            })
        })
        .collect();
    let problems: AHashMap<_, u8> = candidates.iter().map(|r| (r.key(), r.problem)).collect();
    // keyed by the relation each removal kills at the other end
    let mirrored: AHashMap<(Link, Side, Link, Side, u32), RemovalReason> = resolutions
        .iter()
        .flat_map(|r| {
            r.removed
                .iter()
                .map(move |x| ((x.to, x.to_side, r.from, r.from_side, x.distance), x.reason))
        })
        .collect();

    let mut stats = FinalizeStats::default();
    let mut relations: Vec<DirectRelation> = Vec::with_capacity(candidates.len());
    let mut surviving_groups: AHashSet<(Link, Side)> = AHashSet::new();
    let mut outvoted_groups: AHashSet<(Link, Side)> = AHashSet::new();
    for rel in &candidates {
        if let Some(&reason) = mirrored.get(&rel.key()) {
            stats.mirrored_deletions += 1;
            if reason == RemovalReason::Outvoted {
                outvoted_groups.insert((rel.from, rel.from_side));
            }
            continue;
        }
        match problems.get(&rel.reverse_key()) {
            Some(&other) => {
                relations.push(DirectRelation {
                    problem: rel.problem.max(other),
                    ..*rel
                });
                surviving_groups.insert((rel.from, rel.from_side));
            }
            None => stats.asymmetric_dropped += 1,
        }
    }

    let mut present: AHashSet<_> = relations.iter().map(DirectRelation::key).collect();
    for r in resolutions {
        let group = (r.from, r.from_side);
        if r.kept.is_empty() || !r.below_floor || surviving_groups.contains(&group) || outvoted_groups.contains(&group) {
            continue;
        }
        stats.restored_groups += 1;
        for e in &r.kept {
            let rel = DirectRelation {
                from: r.from,
                from_side: r.from_side,
                to: e.to,
                to_side: e.to_side,
                distance: e.distance,
                count: e.count(),
                problem: PROBLEM_LOST_SYMMETRY,
            };
            for edge in [rel, rel.reversed()] {
                if present.insert(edge.key()) {
                    relations.push(edge);
                }
            }
        }
    }

    relations.sort_unstable();
    (relations, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::table::SplitType;

    /// Four Ckmers: 0 and 1 share the arrival base 0 on their left side,
    /// 2 arrives at base 1, 3 has no left base
    fn table() -> KmerTable {
        KmerTable {
            k: 4,
            seqs: b"AAAAAAACAAAGAAAT".to_vec(),
            split: vec![SplitType::Right, SplitType::Right, SplitType::Right, SplitType::Right],
            number: vec![10, 10, 10, 10],
            left_base: vec![None, None, None, None],
            right_base: vec![Some(0), Some(0), Some(1), None],
        }
    }

    fn ev(to: Link, distance: u32, forward: u64, backward: u64) -> DirectEvidence {
        DirectEvidence {
            to,
            to_side: Side::Left,
            distance,
            forward,
            backward,
        }
    }

    fn group(entries: Vec<DirectEvidence>) -> RelationGroup {
        RelationGroup {
            from: 9,
            from_side: Side::Right,
            entries,
        }
    }

    #[test]
    fn test_clean_group() {
        let r = group(vec![ev(0, 20, 3, 2), ev(1, 20, 1, 0)]).resolve(&table(), 2);
        // 0 and 1 share a base at one distance; 1 is below the floor
        assert_eq!(r.problem, PROBLEM_CLEAN);
        assert_eq!(r.kept, vec![ev(0, 20, 3, 2)]);
    }

    #[test]
    fn test_majority_base_wins() {
        let r = group(vec![ev(0, 20, 90, 0), ev(2, 20, 10, 0)]).resolve(&table(), 2);
        assert_eq!(r.problem, PROBLEM_CLEAN);
        assert_eq!(r.kept, vec![ev(0, 20, 90, 0)]);
        assert_eq!(r.deleted(), 1);
        assert_eq!(r.removed[0].reason, RemovalReason::Outvoted);

        let r = group(vec![ev(0, 20, 88, 0), ev(0, 21, 2, 0), ev(2, 20, 10, 0)]).resolve(&table(), 2);
        assert_eq!(r.problem, PROBLEM_REDUCED);
        assert_eq!(r.kept, vec![ev(0, 20, 88, 0)]);
    }

    #[test]
    fn test_tied_bases() {
        let r = group(vec![ev(0, 20, 5, 0), ev(2, 20, 5, 0)]).resolve(&table(), 2);
        assert_eq!(r.problem, PROBLEM_TIED_BASES);
        assert_eq!(r.kept.len(), 2);

        let r = group(vec![ev(0, 20, 2, 3), ev(3, 20, 4, 1)]).resolve(&table(), 2);
        assert_eq!(r.problem, PROBLEM_REVERSE_ONLY);
        assert_eq!(r.kept, vec![ev(0, 20, 2, 3)]);
    }

    #[test]
    fn test_distances_remain() {
        let r = group(vec![ev(0, 20, 10, 0), ev(0, 30, 9, 0)]).resolve(&table(), 2);
        assert_eq!(r.problem, PROBLEM_DISTANCES);
        assert_eq!(r.kept.len(), 2);
    }

    #[test]
    fn test_low_coverage_kept() {
        let r = group(vec![ev(0, 20, 1, 0)]).resolve(&table(), 2);
        assert_eq!(r.problem, PROBLEM_REDUCED);
        assert_eq!(r.kept.len(), 1);
    }

    #[test]
    fn test_group_observations() {
        let obs = |to, distance, orientation| DirectObservation {
            from: 1,
            from_side: Side::Right,
            to,
            to_side: Side::Left,
            distance,
            orientation,
        };
        let mut all = vec![
            obs(2, 10, Orientation::Forward),
            obs(2, 10, Orientation::Backward),
            obs(2, 10, Orientation::Forward),
            obs(3, 12, Orientation::Forward),
        ];
        all.sort_unstable();
        let groups = group_observations(&all);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entries[0], DirectEvidence { to: 2, to_side: Side::Left, distance: 10, forward: 2, backward: 1 });
        assert_eq!(groups[0].total(), 4);
    }

    fn resolution(from: Link, from_side: Side, kept: Vec<(Link, Side, u32, u64)>, problem: u8) -> Resolution {
        Resolution {
            from,
            from_side,
            kept: kept
                .into_iter()
                .map(|(to, to_side, distance, count)| DirectEvidence {
                    to,
                    to_side,
                    distance,
                    forward: count,
                    backward: 0,
                })
                .collect(),
            problem,
            removed: vec![],
            below_floor: false,
        }
    }

    #[test]
    fn test_finalize_symmetric() {
        let resolutions = vec![
            resolution(0, Side::Right, vec![(1, Side::Left, 15, 4)], PROBLEM_CLEAN),
            resolution(1, Side::Left, vec![(0, Side::Right, 15, 4)], PROBLEM_REDUCED),
            // 2 kept an edge to 1 that 1 never saw
            resolution(2, Side::Right, vec![(1, Side::Left, 30, 2)], PROBLEM_CLEAN),
        ];
        let (relations, stats) = finalize_relations(&resolutions);
        assert_eq!(stats.asymmetric_dropped, 1);
        assert_eq!(stats.restored_groups, 0);
        assert_eq!(relations.len(), 2);
        for rel in &relations {
            assert!(relations.contains(&rel.reversed()), "missing reverse of {:?}", rel);
            assert_eq!(rel.problem, PROBLEM_REDUCED);
        }
    }

    fn evidence_group(from: Link, from_side: Side, entries: Vec<(Link, Side, u32, u64)>) -> RelationGroup {
        RelationGroup {
            from,
            from_side,
            entries: entries
                .into_iter()
                .map(|(to, to_side, distance, count)| DirectEvidence {
                    to,
                    to_side,
                    distance,
                    forward: count,
                    backward: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_minority_base_stays_deleted() {
        // 3 reaches 0 (base 0) 90 times and 2 (base 1) 10 times
        let kmers = table();
        let majority = evidence_group(3, Side::Right, vec![(0, Side::Left, 20, 90), (2, Side::Left, 20, 10)]).resolve(&kmers, 2);
        assert_eq!(majority.problem, PROBLEM_CLEAN);
        assert_eq!(majority.removed[0].reason, RemovalReason::Outvoted);
        let resolutions = vec![
            majority,
            evidence_group(0, Side::Left, vec![(3, Side::Right, 20, 90)]).resolve(&kmers, 2),
            evidence_group(2, Side::Left, vec![(3, Side::Right, 20, 10)]).resolve(&kmers, 2),
        ];

        let (relations, stats) = finalize_relations(&resolutions);
        assert_eq!(stats.mirrored_deletions, 1);
        assert_eq!(stats.restored_groups, 0);
        assert_eq!(relations.len(), 2);
        assert!(relations.iter().all(|r| r.from != 2 && r.to != 2));
        assert!(relations.iter().all(|r| r.problem == PROBLEM_CLEAN && r.count == 90));
    }

    #[test]
    fn test_sole_low_coverage_evidence_restored() {
        // 2 sees 0 six times and 1 once (same base), so it drops 1 below the floor;
        // 1 has no other evidence
        let kmers = table();
        let strong = evidence_group(2, Side::Right, vec![(0, Side::Left, 12, 6), (1, Side::Left, 12, 1)]).resolve(&kmers, 2);
        assert_eq!(strong.kept.len(), 1);
        assert_eq!(strong.removed[0].reason, RemovalReason::BelowFloor);
        let weak = evidence_group(1, Side::Left, vec![(2, Side::Right, 12, 1)]).resolve(&kmers, 2);
        assert!(weak.below_floor);
        let partner = evidence_group(0, Side::Left, vec![(2, Side::Right, 12, 6)]).resolve(&kmers, 2);

        let (relations, stats) = finalize_relations(&[strong, weak, partner]);
        assert_eq!(stats.mirrored_deletions, 1);
        assert_eq!(stats.restored_groups, 1);
        assert_eq!(relations.len(), 4);
        for rel in &relations {
            assert!(relations.contains(&rel.reversed()), "missing reverse of {:?}", rel);
        }
        let restored: Vec<_> = relations.iter().filter(|r| r.from == 1 || r.to == 1).collect();
        assert_eq!(restored.len(), 2);
        assert!(restored.iter().all(|r| r.problem == PROBLEM_LOST_SYMMETRY && r.count == 1));
    }
}
