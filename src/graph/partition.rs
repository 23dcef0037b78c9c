//! Partitioning of the resolved direct-adjacency graph
//!
//! 1. Ckmers without edges to other Ckmers are tied to the Ckmers sharing
//!    one of their Bases.
//! 2. Connected components via union-find.
//! 3. Components of at most two nodes are packed together up to the target
//!    partition size, components up to the target get a partition each, and
//!    larger components are cut by BFS region growing followed by one
//!    boundary refinement pass.
//!
//! Every Ckmer ends up with exactly one partition id.

use crate::kmer::kmer::Side;
use crate::kmer::table::{BaseTable, KmerTable, Link};
use crate::relations::resolve::DirectRelation;
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Partition id per Ckmer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partitioning {
    pub assignment: Vec<u32>,
    pub sizes: Vec<u64>,
}

impl Partitioning {
    pub fn num_partitions(&self) -> usize {
        self.sizes.len()
    }

    pub fn of(&self, link: Link) -> u32 {
        self.assignment[link as usize]
    }
}

/// Undirected adjacency used for partitioning
pub struct PartitionGraph {
    neighbors: Vec<Vec<Link>>,
}

impl PartitionGraph {
    pub fn build(kmers: &KmerTable, bases: &BaseTable, relations: &[DirectRelation]) -> Self {
        let n = kmers.len();
        let mut neighbors: Vec<Vec<Link>> = vec![Vec::new(); n];
        for rel in relations.iter().filter(|r| r.from != r.to) {
            neighbors[rel.from as usize].push(rel.to);
        }

        let isolated: Vec<bool> = neighbors.iter().map(Vec::is_empty).collect();
        let mut base_edges = 0usize;
        for link in 0..n as Link {
            if !isolated[link as usize] {
                continue;
            }
            for side in [Side::Left, Side::Right] {
                let Some(base) = kmers.base(link, side) else {
                    continue;
                };
                for member in bases.members(base).filter(|&m| m != link) {
                    neighbors[link as usize].push(member);
                    neighbors[member as usize].push(link);
                    base_edges += 1;
                }
            }
        }
        debug!("Partition graph: {} base co-membership edges", base_edges);

        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        Self { neighbors }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn neighbors(&self, link: Link) -> &[Link] {
        &self.neighbors[link as usize]
    }

    /// Connected components, each sorted, ordered by smallest member
    pub fn components(&self) -> Vec<Vec<Link>> {
        let n = self.len();
        let mut uf: UnionFind<u32> = UnionFind::new(n);
        for (a, list) in self.neighbors.iter().enumerate() {
            for &b in list {
                uf.union(a as u32, b);
            }
        }
        let labels = uf.into_labeling();
        let mut slot_of_root: Vec<Option<usize>> = vec![None; n];
        let mut components: Vec<Vec<Link>> = Vec::new();
        for (node, &root) in labels.iter().enumerate() {
            let slot = match slot_of_root[root as usize] {
                Some(s) => s,
                None => {
                    components.push(Vec::new());
                    slot_of_root[root as usize] = Some(components.len() - 1);
                    components.len() - 1
                }
            };
            components[slot].push(node as Link);
        }
        components
    }
}

/// Assign every Ckmer a partition with about `target` members
pub fn partition_graph(graph: &PartitionGraph, target: usize) -> Partitioning {
    let target = target.max(1);
    let components = graph.components();
    let mut assignment = vec![0u32; graph.len()];
    let mut sizes: Vec<u64> = Vec::new();

    let (tiny, rest): (Vec<_>, Vec<_>) = components.into_iter().partition(|c| c.len() <= 2);
    let (medium, large): (Vec<_>, Vec<_>) = rest.into_iter().partition(|c| c.len() <= target);

    // bin-pack components of one or two nodes
    let mut open: Option<usize> = None;
    for component in &tiny {
        let id = match open {
            Some(id) if sizes[id] as usize + component.len() <= target => id,
            _ => {
                sizes.push(0);
                sizes.len() - 1
            }
        };
        open = Some(id);
        for &node in component {
            assignment[node as usize] = id as u32;
        }
        sizes[id] += component.len() as u64;
    }

    for component in &medium {
        let id = sizes.len() as u32;
        for &node in component {
            assignment[node as usize] = id;
        }
        sizes.push(component.len() as u64);
    }

    let split: Vec<Vec<usize>> = large
        .par_iter()
        .map(|component| grow_regions(graph, component, target))
        .collect();
    for (component, local) in large.iter().zip(split) {
        let offset = sizes.len();
        let parts = local.iter().max().map_or(0, |&p| p + 1);
        sizes.resize(offset + parts, 0);
        for (&node, &part) in component.iter().zip(&local) {
            assignment[node as usize] = (offset + part) as u32;
            sizes[offset + part] += 1;
        }
    }

    info!(
        "Partitioned {} k-mers into {} partitions ({} tiny, {} medium, {} large components)",
        graph.len(),
        sizes.len(),
        tiny.len(),
        medium.len(),
        large.len()
    );
    Partitioning { assignment, sizes }
}

/// Local part index for each node of a sorted component
fn grow_regions(graph: &PartitionGraph, component: &[Link], target: usize) -> Vec<usize> {
    let parts = component.len().div_ceil(target);
    let capacity = component.len().div_ceil(parts);
    let local_index = |link: Link| component.binary_search(&link).ok();

    let mut part_of: Vec<Option<usize>> = vec![None; component.len()];
    let mut sizes = vec![0usize; parts];
    let mut part = 0usize;
    let mut queue: VecDeque<usize> = VecDeque::new();
    let mut next_seed = 0usize;

    loop {
        if queue.is_empty() {
            while next_seed < component.len() && part_of[next_seed].is_some() {
                next_seed += 1;
            }
            if next_seed == component.len() {
                break;
            }
            queue.push_back(next_seed);
        }
        let Some(i) = queue.pop_front() else {
            break;
        };
        if part_of[i].is_some() {
            continue;
        }
        if sizes[part] == capacity {
            part = (part + 1).min(parts - 1);
            queue.clear();
            queue.push_back(i);
            continue;
        }
        part_of[i] = Some(part);
        sizes[part] += 1;
        for &nb in graph.neighbors(component[i]) {
            if let Some(j) = local_index(nb) {
                if part_of[j].is_none() {
                    queue.push_back(j);
                }
            }
        }
    }

    let mut result: Vec<usize> = part_of.into_iter().map(|p| p.unwrap_or(parts - 1)).collect();

    // move boundary nodes to the part holding most of their neighbours
    for i in 0..component.len() {
        let own = result[i];
        if sizes[own] <= 1 {
            continue;
        }
        let mut votes = vec![0usize; parts];
        for &nb in graph.neighbors(component[i]) {
            if let Some(j) = local_index(nb) {
                votes[result[j]] += 1;
            }
        }
        let best = (0..parts).max_by_key(|&p| (votes[p], p == own)).unwrap_or(own);
        if best != own && votes[best] > votes[own] && sizes[best] < capacity {
            sizes[own] -= 1;
            sizes[best] += 1;
            result[i] = best;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::table::{Branch, SplitType};

    fn graph_from_edges(n: usize, edges: &[(Link, Link)]) -> PartitionGraph {
        let mut neighbors = vec![Vec::new(); n];
        for &(a, b) in edges {
            neighbors[a as usize].push(b);
            neighbors[b as usize].push(a);
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        PartitionGraph { neighbors }
    }

    fn assert_total(p: &Partitioning, n: usize) {
        assert_eq!(p.assignment.len(), n);
        assert_eq!(p.sizes.iter().sum::<u64>(), n as u64);
        let mut counted = vec![0u64; p.num_partitions()];
        for &id in &p.assignment {
            counted[id as usize] += 1;
        }
        assert_eq!(counted, p.sizes);
    }

    #[test]
    fn test_tiny_components_packed() {
        // ten isolated nodes and two pairs
        let g = graph_from_edges(14, &[(10, 11), (12, 13)]);
        let p = partition_graph(&g, 5);
        assert_total(&p, 14);
        assert!(p.sizes.iter().all(|&s| s <= 5));
        assert_eq!(p.of(10), p.of(11));
        assert_eq!(p.of(12), p.of(13));
    }

    #[test]
    fn test_medium_component_single_partition() {
        let g = graph_from_edges(6, &[(0, 1), (1, 2), (2, 3), (4, 5)]);
        let p = partition_graph(&g, 4);
        assert_total(&p, 6);
        assert!((0..4).all(|l| p.of(l) == p.of(0)));
        assert_ne!(p.of(4), p.of(0));
    }

    #[test]
    fn test_large_component_split() {
        // a path of 20 nodes with target 6 becomes 4 parts of at most 5
        let edges: Vec<(Link, Link)> = (0..19).map(|i| (i, i + 1)).collect();
        let g = graph_from_edges(20, &edges);
        let p = partition_graph(&g, 6);
        assert_total(&p, 20);
        assert_eq!(p.num_partitions(), 4);
        assert!(p.sizes.iter().all(|&s| s <= 5));
        // contiguous regions along the path
        assert_eq!(p.of(0), p.of(1));
        assert_eq!(p.of(18), p.of(19));
    }

    #[test]
    fn test_isolated_nodes_joined_through_bases() {
        let kmers = KmerTable {
            k: 3,
            seqs: b"AACAAGTTT".to_vec(),
            split: vec![SplitType::Right; 3],
            number: vec![2, 3, 4],
            left_base: vec![None; 3],
            right_base: vec![Some(0), Some(0), None],
        };
        let bases = BaseTable {
            stride: 2,
            seqs: b"AA".to_vec(),
            branches: vec![[
                Default::default(),
                Branch { number: 2, ckmer: Some(0) },
                Branch { number: 3, ckmer: Some(1) },
                Default::default(),
            ]],
        };
        let g = PartitionGraph::build(&kmers, &bases, &[]);
        assert_eq!(g.neighbors(0), &[1]);
        assert_eq!(g.neighbors(1), &[0]);
        assert!(g.neighbors(2).is_empty());
        assert_eq!(g.components(), vec![vec![0, 1], vec![2]]);
    }
}
