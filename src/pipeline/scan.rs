//! Streaming read scan
//!
//! Reads flow through bounded queues between four stages:
//! 1. Reader: parses the FASTQ inputs one file at a time, reverse-complements
//!    mate 2 and batches reads.
//! 2. Automaton workers: merge overlapping mates and collect prefix hits on
//!    both strands.
//! 3. Index workers: confirm hits against the match index.
//! 4. Match workers: spill direct and repeat observations and informative
//!    read runs to their own bucket files.
//!
//! A queue closes once every producer feeding it has returned, so a worker
//! only sees the end of its input after all in-flight batches were delivered.
//! Match positions stay in read order through every stage; batches from
//! different reads arrive in any order.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::scanner::{confirm_candidates, find_candidates, merge_mates, Candidates, ScannedSequence};
use crate::index::MatchIndex;
use crate::io::buckets::{BucketFiles, BucketWriter};
use crate::io::fastq::{stream_fastq_records, stream_paired_fastq_records};
use crate::kmer::kmer::complement;
use crate::kmer::table::Link;
use crate::pipeline::workers::WorkerPlan;
use crate::relations::extract::{direct_observations, repeat_observations};
use crate::relations::{DirectObservation, ReadRuns, RepeatObservation};
use crate::stats::BuildStats;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ScopedJoinHandle};
use tracing::{debug, error, info};

const SPILL_BUFFER: usize = 256 * 1024;

/// FASTQ inputs of one build
#[derive(Debug, Clone, Default)]
pub struct ReadInputs {
    pub unpaired: Vec<PathBuf>,
    pub paired: Vec<(PathBuf, PathBuf)>,
}

impl ReadInputs {
    pub fn is_empty(&self) -> bool {
        self.unpaired.is_empty() && self.paired.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.unpaired
            .iter()
            .chain(self.paired.iter().flat_map(|(a, b)| [a, b]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadKind {
    Unpaired,
    Pair,
    MergedPair,
}

enum ReadItem {
    Single(Vec<u8>),
    /// Mate 2 already reverse-complemented
    Pair(Vec<u8>, Vec<u8>),
}

struct CandidateRead {
    kind: ReadKind,
    lengths: Vec<usize>,
    sequences: Vec<(Vec<u8>, Candidates)>,
}

struct ScannedRead {
    kind: ReadKind,
    lengths: Vec<usize>,
    scanned: Vec<ScannedSequence>,
}

/// Spilled scan results of all match workers
pub struct ScanOutput {
    /// Bucketed by link range of the observing Ckmer
    pub direct: BucketFiles<DirectObservation>,
    /// Bucketed by link range
    pub repeats: BucketFiles<RepeatObservation>,
    pub runs: BucketFiles<ReadRuns>,
    pub stats: BuildStats,
}

impl ScanOutput {
    fn empty(num_buckets: usize) -> Self {
        Self {
            direct: BucketFiles::new(num_buckets),
            repeats: BucketFiles::new(num_buckets),
            runs: BucketFiles::new(num_buckets),
            stats: BuildStats::default(),
        }
    }

    fn merge(&mut self, other: ScanOutput) {
        self.direct.merge(other.direct);
        self.repeats.merge(other.repeats);
        self.runs.merge(other.runs);
        self.stats.absorb(&other.stats);
    }

    pub fn cleanup(&self) -> Result<()> {
        self.direct.cleanup()?;
        self.repeats.cleanup()?;
        self.runs.cleanup()?;
        Ok(())
    }
}

/// Bucket of a link when `num_kmers` links are spread over `num_buckets`
/// contiguous ranges
pub fn link_bucket(link: Link, num_kmers: usize, num_buckets: usize) -> usize {
    let bucket = link as u64 * num_buckets as u64 / num_kmers.max(1) as u64;
    (bucket as usize).min(num_buckets.saturating_sub(1))
}

/// Reverse complement of a mate; characters outside ACGT become N
fn mate_reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match complement(b) {
            0 => b'N',
            c => c,
        })
        .collect()
}

fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        Err(IndexError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sends the current batch; false once every consumer is gone
fn flush(tx: &Sender<Vec<ReadItem>>, batch: &mut Vec<ReadItem>, batch_size: usize) -> bool {
    if batch.is_empty() {
        return true;
    }
    let full = std::mem::replace(batch, Vec::with_capacity(batch_size));
    tx.send(full).is_ok()
}

/// Reader stage; returns the number of aborted files
fn read_inputs(inputs: &ReadInputs, batch_size: usize, tx: Sender<Vec<ReadItem>>, cancel: &AtomicBool) -> Result<u64> {
    let mut aborted = 0u64;
    let mut batch = Vec::with_capacity(batch_size);

    for path in &inputs.unpaired {
        info!("Reading {:?}", path);
        for record in stream_fastq_records(path)? {
            match record {
                Ok(r) => batch.push(ReadItem::Single(r.sequence.into_bytes())),
                Err(e @ IndexError::MalformedFastq { .. }) => {
                    error!("Aborting {:?}: {}", path, e);
                    aborted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
            if batch.len() >= batch_size {
                check_cancel(cancel)?;
                if !flush(&tx, &mut batch, batch_size) {
                    return Ok(aborted);
                }
            }
        }
    }

    for (path1, path2) in &inputs.paired {
        info!("Reading pairs {:?} / {:?}", path1, path2);
        for pair in stream_paired_fastq_records(path1, path2)? {
            match pair {
                Ok((r1, r2)) => {
                    let mate2 = mate_reverse_complement(r2.sequence.as_bytes());
                    batch.push(ReadItem::Pair(r1.sequence.into_bytes(), mate2));
                }
                Err(e @ IndexError::MalformedFastq { .. }) => {
                    error!("Aborting pair {:?} / {:?}: {}", path1, path2, e);
                    aborted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
            if batch.len() >= batch_size {
                check_cancel(cancel)?;
                if !flush(&tx, &mut batch, batch_size) {
                    return Ok(aborted);
                }
            }
        }
    }

    check_cancel(cancel)?;
    flush(&tx, &mut batch, batch_size);
    Ok(aborted)
}

fn prefilter(index: &MatchIndex, item: ReadItem) -> CandidateRead {
    let with_hits = |seq: Vec<u8>| {
        let candidates = find_candidates(index, &seq);
        (seq, candidates)
    };
    match item {
        ReadItem::Single(seq) => CandidateRead {
            kind: ReadKind::Unpaired,
            lengths: vec![seq.len()],
            sequences: vec![with_hits(seq)],
        },
        ReadItem::Pair(mate1, mate2) => {
            let lengths = vec![mate1.len(), mate2.len()];
            match merge_mates(&mate1, &mate2, index.k()) {
                Some(merged) => CandidateRead {
                    kind: ReadKind::MergedPair,
                    lengths,
                    sequences: vec![with_hits(merged)],
                },
                None => CandidateRead {
                    kind: ReadKind::Pair,
                    lengths,
                    sequences: vec![with_hits(mate1), with_hits(mate2)],
                },
            }
        }
    }
}

fn automaton_worker(
    index: &MatchIndex,
    rx: Receiver<Vec<ReadItem>>,
    tx: Sender<Vec<CandidateRead>>,
    cancel: &AtomicBool,
) -> Result<()> {
    for batch in rx {
        check_cancel(cancel)?;
        let out: Vec<CandidateRead> = batch.into_iter().map(|item| prefilter(index, item)).collect();
        if tx.send(out).is_err() {
            break;
        }
    }
    Ok(())
}

fn index_worker(
    index: &MatchIndex,
    rx: Receiver<Vec<CandidateRead>>,
    tx: Sender<Vec<ScannedRead>>,
    cancel: &AtomicBool,
) -> Result<()> {
    for batch in rx {
        check_cancel(cancel)?;
        let out: Vec<ScannedRead> = batch
            .into_iter()
            .map(|read| ScannedRead {
                kind: read.kind,
                lengths: read.lengths,
                scanned: read
                    .sequences
                    .iter()
                    .map(|(seq, candidates)| confirm_candidates(index, seq, candidates))
                    .collect(),
            })
            .collect();
        if tx.send(out).is_err() {
            break;
        }
    }
    Ok(())
}

fn match_worker(
    id: usize,
    num_kmers: usize,
    rx: Receiver<Vec<ScannedRead>>,
    num_buckets: usize,
    spill_dir: &Path,
    cancel: &AtomicBool,
) -> Result<ScanOutput> {
    let mut direct = BucketWriter::new(spill_dir, &format!("direct_w{}", id), num_buckets, SPILL_BUFFER)?;
    let mut repeats = BucketWriter::new(spill_dir, &format!("repeat_w{}", id), num_buckets, SPILL_BUFFER)?;
    let mut runs = BucketWriter::new(spill_dir, &format!("runs_w{}", id), num_buckets, SPILL_BUFFER)?;
    let mut stats = BuildStats::default();

    let mut observations = Vec::new();
    let mut revisits = Vec::new();
    let mut next_run_bucket = 0usize;

    for batch in rx {
        check_cancel(cancel)?;
        for read in batch {
            for &len in &read.lengths {
                stats.record_read_length(len);
                stats.bases_scanned += len as u64;
            }
            match read.kind {
                ReadKind::Unpaired => stats.reads += 1,
                ReadKind::Pair => stats.read_pairs += 1,
                ReadKind::MergedPair => {
                    stats.read_pairs += 1;
                    stats.merged_pairs += 1;
                }
            }

            observations.clear();
            revisits.clear();
            for scanned in &read.scanned {
                stats.matches += scanned.num_matches() as u64;
                stats.lookup_mismatches += scanned.mismatches;
                for run in &scanned.runs {
                    direct_observations(run, &mut observations);
                }
                repeat_observations(&scanned.runs, &mut revisits);
            }
            stats.direct_observations += observations.len() as u64;
            for obs in &observations {
                direct.push(link_bucket(obs.from, num_kmers, num_buckets), obs)?;
            }
            for obs in &revisits {
                repeats.push(link_bucket(obs.link, num_kmers, num_buckets), obs)?;
            }

            let mut sequences = read.scanned.into_iter();
            let read_runs = ReadRuns {
                first: sequences.next().map(|s| s.runs).unwrap_or_default(),
                second: sequences.next().map(|s| s.runs),
            };
            if read_runs.is_informative() {
                runs.push(next_run_bucket, &read_runs)?;
                next_run_bucket = (next_run_bucket + 1) % num_buckets;
            }
        }
    }

    debug!(
        "Match worker {} done: {} reads, {} pairs, {} observations",
        id, stats.reads, stats.read_pairs, stats.direct_observations
    );
    Ok(ScanOutput {
        direct: direct.finalize()?,
        repeats: repeats.finalize()?,
        runs: runs.finalize()?,
        stats,
    })
}

fn join<T>(name: String, handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(IndexError::Cancelled)) => Err(IndexError::Cancelled),
        Ok(Err(e)) => {
            error!("Worker {} failed: {}", name, e);
            Err(IndexError::Worker {
                worker: name,
                message: e.to_string(),
            })
        }
        Err(_) => {
            error!("Worker {} panicked", name);
            Err(IndexError::Worker {
                worker: name,
                message: "worker panicked".to_string(),
            })
        }
    }
}

/// Keeps the first failure, preferring real errors over cancellation
fn record_failure(slot: &mut Option<IndexError>, e: IndexError) {
    match slot {
        None => *slot = Some(e),
        Some(IndexError::Cancelled) if !matches!(e, IndexError::Cancelled) => *slot = Some(e),
        Some(_) => {}
    }
}

/// Scan every input against `index` and spill the observations to `spill_dir`
pub fn scan_reads(
    index: &MatchIndex,
    inputs: &ReadInputs,
    plan: &WorkerPlan,
    config: &IndexConfig,
    spill_dir: &Path,
    cancel: &AtomicBool,
) -> Result<ScanOutput> {
    let num_buckets = config.num_buckets.max(1);
    let batch_size = config.batch_size.max(1);
    let num_kmers = index.kmers().len();
    let queue_len = 2 * plan.total().max(1);

    let (read_tx, read_rx) = bounded::<Vec<ReadItem>>(queue_len);
    let (hit_tx, hit_rx) = bounded::<Vec<CandidateRead>>(queue_len);
    let (scan_tx, scan_rx) = bounded::<Vec<ScannedRead>>(queue_len);

    thread::scope(|scope| {
        let reader = scope.spawn(move || read_inputs(inputs, batch_size, read_tx, cancel));

        let automata: Vec<_> = (0..plan.automaton.max(1))
            .map(|i| {
                let (rx, tx) = (read_rx.clone(), hit_tx.clone());
                (format!("automaton-{}", i), scope.spawn(move || automaton_worker(index, rx, tx, cancel)))
            })
            .collect();
        drop(read_rx);
        drop(hit_tx);

        let confirmers: Vec<_> = (0..plan.index.max(1))
            .map(|i| {
                let (rx, tx) = (hit_rx.clone(), scan_tx.clone());
                (format!("index-{}", i), scope.spawn(move || index_worker(index, rx, tx, cancel)))
            })
            .collect();
        drop(hit_rx);
        drop(scan_tx);

        let matchers: Vec<_> = (0..plan.matching.max(1))
            .map(|i| {
                let rx = scan_rx.clone();
                (
                    format!("match-{}", i),
                    scope.spawn(move || match_worker(i, num_kmers, rx, num_buckets, spill_dir, cancel)),
                )
            })
            .collect();
        drop(scan_rx);

        let mut failure = None;
        let mut output = ScanOutput::empty(num_buckets);

        match join("reader".to_string(), reader) {
            Ok(aborted) => output.stats.aborted_files = aborted,
            Err(e) => record_failure(&mut failure, e),
        }
        for (name, handle) in automata.into_iter().chain(confirmers) {
            if let Err(e) = join(name, handle) {
                record_failure(&mut failure, e);
            }
        }
        for (name, handle) in matchers {
            match join(name, handle) {
                Ok(part) => output.merge(part),
                Err(e) => record_failure(&mut failure, e),
            }
        }

        if failure.is_none() && cancel.load(Ordering::Relaxed) {
            failure = Some(IndexError::Cancelled);
        }
        if let Some(e) = failure {
            if !config.keep_temporary_files {
                output.cleanup()?;
            }
            return Err(e);
        }
        Ok(output)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::splits::extract_from_counts;
    use std::io::Write;
    use std::sync::Arc;

    fn small_index() -> MatchIndex {
        let tables = extract_from_counts(4, 1, vec![(b"AACGA".to_vec(), 5), (b"AACGT".to_vec(), 3)]);
        MatchIndex::build(Arc::new(tables.kmers), 2)
    }

    fn write_fastq(dir: &Path, name: &str, reads: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for (i, read) in reads.iter().enumerate() {
            writeln!(file, "@r{}\n{}\n+\n{}", i, read, "I".repeat(read.len())).unwrap();
        }
        path
    }

    fn small_config() -> IndexConfig {
        IndexConfig {
            batch_size: 2,
            num_buckets: 4,
            ..IndexConfig::with_k(4)
        }
    }

    fn plan() -> WorkerPlan {
        WorkerPlan {
            automaton: 1,
            index: 2,
            matching: 2,
        }
    }

    #[test]
    fn test_link_bucket_ranges() {
        assert_eq!(link_bucket(0, 10, 4), 0);
        assert_eq!(link_bucket(9, 10, 4), 3);
        assert_eq!(link_bucket(5, 10, 4), 2);
        assert_eq!(link_bucket(0, 0, 4), 0);
        assert_eq!(mate_reverse_complement(b"ACRT"), b"ANGT".to_vec());
    }

    #[test]
    fn test_scan_counts_reads_and_matches() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index();
        let reads = write_fastq(dir.path(), "reads.fq", &["GGACGAGGTCGTN", "ACGTNACGA", "TTTT"]);
        let inputs = ReadInputs {
            unpaired: vec![reads],
            paired: vec![],
        };
        let cancel = AtomicBool::new(false);
        let spill = dir.path().join("spill");
        let out = scan_reads(&index, &inputs, &plan(), &small_config(), &spill, &cancel).unwrap();

        assert_eq!(out.stats.reads, 3);
        assert_eq!(out.stats.matches, 4);
        assert_eq!(out.stats.min_read_length, 4);
        assert_eq!(out.stats.max_read_length, 13);
        // one adjacency in the first read, emitted in both directions
        assert_eq!(out.direct.total(), 2);
        // ACGA seen twice in opposite orientations
        assert_eq!(out.repeats.total(), 1);
    }

    #[test]
    fn test_malformed_file_is_aborted_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index();
        let good = write_fastq(dir.path(), "good.fq", &["GGACGAGG"]);
        let bad = dir.path().join("bad.fq");
        std::fs::write(&bad, "@r0\nACGA\n+\nIIII\n@r1\nACGA\nIIII\n").unwrap();
        let inputs = ReadInputs {
            unpaired: vec![bad, good],
            paired: vec![],
        };
        let cancel = AtomicBool::new(false);
        let out = scan_reads(&index, &inputs, &plan(), &small_config(), &dir.path().join("spill"), &cancel).unwrap();
        assert_eq!(out.stats.aborted_files, 1);
        // the record before the error and the whole second file
        assert_eq!(out.stats.reads, 2);
    }

    #[test]
    fn test_paired_reads_merge() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index();
        // mate 2 is the reverse complement of the tail of the fragment AAAACCCCGGGGTTTT
        let m1 = write_fastq(dir.path(), "r1.fq", &["AAAACCCCGGGG", "ACGAACCC"]);
        let m2 = write_fastq(dir.path(), "r2.fq", &["AAAACCCCGG", "TTTTTTTT"]);
        let inputs = ReadInputs {
            unpaired: vec![],
            paired: vec![(m1, m2)],
        };
        let cancel = AtomicBool::new(false);
        let out = scan_reads(&index, &inputs, &plan(), &small_config(), &dir.path().join("spill"), &cancel).unwrap();
        assert_eq!(out.stats.read_pairs, 2);
        assert_eq!(out.stats.merged_pairs, 1);
        assert_eq!(out.stats.reads, 0);
    }

    #[test]
    fn test_cancelled_scan() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index();
        let reads = write_fastq(dir.path(), "reads.fq", &["GGACGAGG"; 8]);
        let inputs = ReadInputs {
            unpaired: vec![reads],
            paired: vec![],
        };
        let cancel = AtomicBool::new(true);
        let result = scan_reads(&index, &inputs, &plan(), &small_config(), &dir.path().join("spill"), &cancel);
        assert!(matches!(result, Err(IndexError::Cancelled)));
    }

    #[test]
    fn test_match_worker_failure_aborts_scan() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index();
        let reads = write_fastq(dir.path(), "reads.fq", &["GGACGAGGTCGT"; 6]);
        let inputs = ReadInputs {
            unpaired: vec![reads],
            paired: vec![],
        };
        // spill files cannot be created under a regular file
        let spill = dir.path().join("spill");
        std::fs::write(&spill, b"occupied").unwrap();
        let cancel = AtomicBool::new(false);
        let result = scan_reads(&index, &inputs, &plan(), &small_config(), &spill, &cancel);
        match result {
            Err(IndexError::Worker { worker, .. }) => assert!(worker.starts_with("match-"), "{}", worker),
            other => panic!("expected a worker failure, got {:?}", other.map(|o| o.stats.reads)),
        }
        assert!(spill.is_file());
    }
}
