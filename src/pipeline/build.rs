//! Index build orchestration
//!
//! Algorithm:
//! 1. Extract splitting k-mers and bases from the (k+1)-mer list
//! 2. Build the prefix match index and plan the worker pools
//! 3. Stream reads through the scan stages, spilling observations by link range
//! 4. Resolve direct relations per bucket, then enforce symmetry
//! 5. Summarize cycles and reversals
//! 6. Partition the relation graph
//! 7. Aggregate indirect connections per partition bucket
//! 8. Write the store and publish it atomically
//!
//! Memory: O(index + one bucket per merge thread); everything else is spilled.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::graph::connections::process_read;
use crate::graph::{partition_graph, Adjacency, ConnectedSet, ConnectionAggregator, FilteredRun, PartitionGraph};
use crate::index::MatchIndex;
use crate::io::buckets::{BucketFiles, BucketWriter};
use crate::kmer::splits::extract_splitting_kmers;
use crate::pipeline::scan::{scan_reads, ReadInputs};
use crate::pipeline::workers::WorkerPlan;
use crate::relations::extract::summarize_repeats;
use crate::relations::{finalize_relations, group_observations, Resolution};
use crate::stats::{histogram, BuildStats};
use crate::store::{write_store, Attributes, Histograms, StoreContents};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const SPILL_BUFFER: usize = 256 * 1024;

/// Builds a store from a k-mer list and FASTQ inputs
pub struct IndexBuilder {
    config: IndexConfig,
    cancel: Arc<AtomicBool>,
}

impl IndexBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a shutdown flag owned by the caller
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Setting this flag stops the build with `IndexError::Cancelled`
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run every phase and write the store to `output`
    pub fn build(&self, kmer_list: &Path, inputs: &ReadInputs, output: &Path) -> Result<BuildStats> {
        self.config.validate()?;
        let list = kmer_list.to_path_buf();
        for path in std::iter::once(&list).chain(inputs.paths()) {
            if !path.is_file() {
                return Err(IndexError::InvalidConfig(format!("input {:?} is not a file", path)));
            }
        }

        let base = self.config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&base)?;
        let temp = tempfile::Builder::new().prefix("splitmer-").tempdir_in(&base)?;

        let result = self.run(kmer_list, inputs, output, temp.path());
        if self.config.keep_temporary_files {
            let kept: PathBuf = temp.into_path();
            info!("Keeping temporary files in {:?}", kept);
        }
        result
    }

    fn run(&self, kmer_list: &Path, inputs: &ReadInputs, output: &Path, temp_dir: &Path) -> Result<BuildStats> {
        let config = &self.config;
        let min_freq = config.minimum_frequency;
        let keep = config.keep_temporary_files;

        info!("=== Splitting K-mer Index ===");
        info!("K-mer size: {}", config.k);
        info!("Minimum frequency: {}", min_freq);
        info!(
            "Inputs: {} unpaired, {} paired",
            inputs.unpaired.len(),
            inputs.paired.len()
        );

        info!("Phase 1/8: Extracting splitting k-mers...");
        let tables = extract_splitting_kmers(kmer_list, config, &temp_dir.join("extract"))?;
        let histograms_in = (tables.kmer_histogram.clone(), tables.splitting_histogram(), tables.base_histogram());
        let extraction = tables.stats.clone();
        let bases = tables.bases;
        let kmers = Arc::new(tables.kmers);
        self.check_cancel()?;

        info!("Phase 2/8: Building match index...");
        let index = MatchIndex::build(Arc::clone(&kmers), config.automaton_size());
        info!(
            "  {} patterns over {}-base prefixes ({:.2} MB)",
            index.num_patterns(),
            index.prefix_len(),
            index.memory_bytes() as f64 / 1e6
        );
        let plan = WorkerPlan::allocate(config, (index.memory_bytes() + kmers.memory_bytes()) as u64)?;
        self.check_cancel()?;

        info!("Phase 3/8: Scanning reads...");
        let scan = scan_reads(&index, inputs, &plan, config, &temp_dir.join("scan"), &self.cancel)?;
        let mut stats = scan.stats.clone();
        info!(
            "  {} reads, {} pairs ({} merged), {} matches, {} direct observations",
            stats.reads, stats.read_pairs, stats.merged_pairs, stats.matches, stats.direct_observations
        );
        if stats.lookup_mismatches > 0 {
            warn!("{} pre-filter hits were confirmed on one strand only", stats.lookup_mismatches);
        }
        if stats.aborted_files > 0 {
            warn!("{} input files were aborted on malformed records", stats.aborted_files);
        }
        drop(index);
        let kmers = Arc::try_unwrap(kmers).unwrap_or_else(|shared| (*shared).clone());
        self.check_cancel()?;

        info!("Phase 4/8: Resolving direct relations...");
        let resolutions: Vec<Resolution> = (0..scan.direct.num_buckets())
            .into_par_iter()
            .map(|bucket| -> Result<Vec<Resolution>> {
                let mut observations = scan.direct.read_bucket(bucket)?;
                observations.sort_unstable();
                Ok(group_observations(&observations)
                    .iter()
                    .map(|group| group.resolve(&kmers, min_freq))
                    .collect())
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        let deleted: u64 = resolutions.iter().map(Resolution::deleted).sum();
        let (relations, finalize) = finalize_relations(&resolutions);
        drop(resolutions);
        info!(
            "  {} relations kept, {} deleted, {} mirrored deletions, {} asymmetric dropped, {} groups restored",
            relations.len(),
            deleted,
            finalize.mirrored_deletions,
            finalize.asymmetric_dropped,
            finalize.restored_groups
        );
        self.check_cancel()?;

        info!("Phase 5/8: Summarizing cycles and reversals...");
        let per_bucket = (0..scan.repeats.num_buckets())
            .into_par_iter()
            .map(|bucket| -> Result<_> { Ok(summarize_repeats(scan.repeats.read_bucket(bucket)?)) })
            .collect::<Result<Vec<_>>>()?;
        let mut cycles = Vec::new();
        let mut reversals = Vec::new();
        for (c, r) in per_bucket {
            cycles.extend(c);
            reversals.extend(r);
        }
        info!("  {} Ckmers with cycles, {} with reversals", cycles.len(), reversals.len());
        self.check_cancel()?;

        info!("Phase 6/8: Partitioning...");
        let graph = PartitionGraph::build(&kmers, &bases, &relations);
        let target = config.partition_size_for(kmers.len());
        let partitioning = partition_graph(&graph, target);
        drop(graph);
        info!("  {} partitions (target size {})", partitioning.num_partitions(), target);
        self.check_cancel()?;

        info!("Phase 7/8: Aggregating indirect connections...");
        let adjacency = Adjacency::new(kmers.len(), relations);
        let num_buckets = scan.runs.num_buckets();
        let filtered_dir = temp_dir.join("connections");
        let per_task = (0..num_buckets)
            .into_par_iter()
            .map(|bucket| -> Result<(BucketFiles<FilteredRun>, ConnectionAggregator)> {
                let mut writer = BucketWriter::new(&filtered_dir, &format!("filtered_t{}", bucket), num_buckets, SPILL_BUFFER)?;
                let mut pairs = ConnectionAggregator::new();
                for read in scan.runs.read_bucket(bucket)? {
                    let (runs, pair) = process_read(&read, &adjacency, &kmers);
                    for run in runs {
                        let Some(&(first, _)) = run.elements.first() else {
                            continue;
                        };
                        writer.push(partitioning.of(first) as usize % num_buckets, &run)?;
                    }
                    if let Some((a, b)) = pair {
                        pairs.add_pair(a, b);
                    }
                }
                Ok((writer.finalize()?, pairs))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut filtered = BucketFiles::<FilteredRun>::new(num_buckets);
        let mut pairs = ConnectionAggregator::new();
        for (files, aggregator) in per_task {
            filtered.merge(files);
            pairs.merge(aggregator);
        }
        let mut connected: Vec<ConnectedSet> = (0..num_buckets)
            .into_par_iter()
            .map(|bucket| -> Result<Vec<ConnectedSet>> {
                let mut aggregator = ConnectionAggregator::new();
                for run in filtered.read_bucket(bucket)? {
                    aggregator.add_run(run);
                }
                Ok(aggregator.finish().0)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        connected.par_sort_unstable_by(|a, b| (a.hash, &a.elements).cmp(&(b.hash, &b.elements)));
        let (_, paired) = pairs.finish();
        info!(
            "  {} connected sets from {} filtered runs, {} paired relations",
            connected.len(),
            filtered.total(),
            paired.len()
        );
        if !keep {
            filtered.cleanup()?;
            scan.cleanup()?;
        }
        let relations = adjacency.into_relations();
        self.check_cancel()?;

        info!("Phase 8/8: Writing store...");
        stats.kmer_list_lines = extraction.lines;
        stats.malformed_kmer_lines = extraction.malformed_lines;
        stats.splitting_kmers = kmers.len() as u64;
        stats.bases = bases.len() as u64;
        stats.direct_relations = relations.len() as u64;
        stats.deleted_relations = deleted + finalize.mirrored_deletions + finalize.asymmetric_dropped;
        for rel in &relations {
            stats.problem_counts[rel.problem as usize] += 1;
        }
        stats.cycles = cycles.len() as u64;
        stats.reversals = reversals.len() as u64;
        stats.connected_sets = connected.len() as u64;
        stats.paired_relations = paired.len() as u64;
        stats.partitions = partitioning.num_partitions() as u64;

        let mut attributes = Attributes::new(config);
        attributes.min_read_length = stats.min_read_length;
        attributes.max_read_length = stats.max_read_length;
        attributes.histograms = Histograms {
            kmer: histograms_in.0,
            splitting_kmer: histograms_in.1,
            base: histograms_in.2,
            distance: histogram(
                relations
                    .iter()
                    .filter(|r| (r.from, r.from_side) <= (r.to, r.to_side))
                    .map(|r| r.distance as u64),
            ),
        };
        attributes.stats = stats.clone();

        let contents = StoreContents {
            attributes,
            kmers,
            bases,
            relations,
            cycles,
            reversals,
            partitioning,
            connected,
            paired,
        };
        self.check_cancel()?;
        write_store(output, &contents)?;

        info!("\n{}", stats);
        Ok(stats)
    }
}

/// Build a store with a fresh cancellation flag
pub fn build_index(config: &IndexConfig, kmer_list: &Path, inputs: &ReadInputs, output: &Path) -> Result<BuildStats> {
    IndexBuilder::new(config.clone()).build(kmer_list, inputs, output)
}
