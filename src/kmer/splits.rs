//! Splitting k-mer extraction
//!
//! Consumes an externally counted (k+1)-mer list and derives the splitting
//! k-mers of the implied De Bruijn graph:
//! 1. Every (k+1)-mer is canonicalized and distributed to disk buckets in
//!    both orientations, keyed by its leading bases, so each k-length prefix
//!    group lands in exactly one bucket.
//! 2. Buckets are sorted and scanned in parallel. A prefix group with at
//!    least two extensions at or above the frequency floor makes every
//!    qualifying (k+1)-mer's last k bases a splitting k-mer, grouped under the
//!    (k-1)-base context they share.
//! 3. Records are merged into the sorted Ckmer and Base tables.

use crate::config::IndexConfig;
use crate::error::Result;
use crate::io::buckets::{read_bytes, read_leading_u64, write_bytes, BucketFiles, BucketWriter, SpillRecord};
use crate::io::kmer_list::read_kmer_list;
use crate::kmer::kmer::{complement, encode_kmer, prefers_forward, reverse_complement_unchecked, Side};
use crate::kmer::table::{letter_index, BaseTable, Branch, KmerTable, Link, SplitType};
use crate::stats::histogram;
use rayon::prelude::*;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{info, warn};

/// One oriented (k+1)-mer with its frequency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrientedEntry {
    pub seq: Vec<u8>,
    pub count: u64,
}

impl SpillRecord for OrientedEntry {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.count.to_le_bytes())?;
        write_bytes(writer, &self.seq)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let Some(count) = read_leading_u64(reader)? else {
            return Ok(None);
        };
        let seq = read_bytes(reader)?;
        Ok(Some(Self { seq, count }))
    }
}

/// Evidence that a canonical k-mer is a branch of `base`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecord {
    pub ckmer: Vec<u8>,
    /// Side of the canonical k-mer on which `base` lies
    pub side: Side,
    pub base: Vec<u8>,
    pub letter: u8,
    pub number: u64,
}

/// Totals from splitting k-mer extraction
#[derive(Debug, Clone, Default)]
pub struct ExtractionStats {
    pub lines: u64,
    pub malformed_lines: u64,
    pub canonical_entries: u64,
    pub split_records: u64,
}

/// Output of the extractor: the final tables plus the (k+1)-mer histogram
#[derive(Debug, Clone, Default)]
pub struct SplitTables {
    pub kmers: KmerTable,
    pub bases: BaseTable,
    pub kmer_histogram: Vec<(u64, u64)>,
    pub stats: ExtractionStats,
}

impl SplitTables {
    pub fn splitting_histogram(&self) -> Vec<(u64, u64)> {
        histogram(self.kmers.number.iter().copied())
    }

    pub fn base_histogram(&self) -> Vec<(u64, u64)> {
        histogram((0..self.bases.len() as Link).map(|b| self.bases.number(b)))
    }
}

/// Extract splitting k-mers from a (k+1)-mer count list on disk
pub fn extract_splitting_kmers(path: &Path, config: &IndexConfig, temp_dir: &Path) -> Result<SplitTables> {
    let k = config.k;
    let num_buckets = config.num_buckets;
    let key_len = k.min(8);

    info!("Distributing (k+1)-mers from {:?} to {} buckets", path, num_buckets);
    let mut writer = BucketWriter::<OrientedEntry>::new(temp_dir, "kmers", num_buckets, 4 * 1024 * 1024)?;

    let list_stats = read_kmer_list(path, k + 1, |seq, count| {
        let forward = if prefers_forward(seq) {
            seq.to_vec()
        } else {
            reverse_complement_unchecked(seq)
        };
        let reverse = reverse_complement_unchecked(&forward);
        for oriented in [Some(forward.clone()), (reverse != forward).then_some(reverse)]
            .into_iter()
            .flatten()
        {
            let bucket = bucket_of(&oriented[..key_len], num_buckets);
            writer.push(bucket, &OrientedEntry { seq: oriented, count })?;
        }
        Ok(())
    })?;
    if list_stats.malformed > 0 {
        warn!("Skipped {} malformed k-mer list lines", list_stats.malformed);
    }
    let files = writer.finalize()?;

    let min_freq = config.minimum_frequency;
    let per_bucket: Vec<(Vec<SplitRecord>, Vec<u64>)> = (0..files.num_buckets())
        .into_par_iter()
        .map(|b| process_bucket(&files, b, k, min_freq))
        .collect::<io::Result<Vec<_>>>()?;
    if !config.keep_temporary_files {
        files.cleanup()?;
    }

    let mut records = Vec::new();
    let mut frequencies = Vec::new();
    for (r, f) in per_bucket {
        records.extend(r);
        frequencies.extend(f);
    }

    let stats = ExtractionStats {
        lines: list_stats.lines,
        malformed_lines: list_stats.malformed,
        canonical_entries: frequencies.len() as u64,
        split_records: records.len() as u64,
    };
    let mut tables = build_tables(k, records);
    tables.kmer_histogram = histogram(frequencies.into_iter());
    tables.stats = stats;

    info!(
        "Extracted {} splitting k-mers and {} bases from {} canonical (k+1)-mers",
        tables.kmers.len(),
        tables.bases.len(),
        tables.stats.canonical_entries
    );
    Ok(tables)
}

/// In-memory extraction over (k+1)-mer counts in any orientation and order
pub fn extract_from_counts<I>(k: usize, minimum_frequency: u64, counts: I) -> SplitTables
where
    I: IntoIterator<Item = (Vec<u8>, u64)>,
{
    let mut entries = Vec::new();
    for (seq, count) in counts {
        if seq.len() != k + 1 || !seq.iter().all(|&b| crate::kmer::kmer::is_acgt(b)) {
            continue;
        }
        let forward = if prefers_forward(&seq) {
            seq
        } else {
            reverse_complement_unchecked(&seq)
        };
        let reverse = reverse_complement_unchecked(&forward);
        if reverse != forward {
            entries.push(OrientedEntry { seq: reverse, count });
        }
        entries.push(OrientedEntry { seq: forward, count });
    }
    let (records, frequencies) = sorted_records(entries, k, minimum_frequency);
    let mut tables = build_tables(k, records);
    tables.kmer_histogram = histogram(frequencies.into_iter());
    tables
}

fn bucket_of(key: &[u8], num_buckets: usize) -> usize {
    (encode_kmer(key).unwrap_or(0) % num_buckets as u64) as usize
}

fn process_bucket(
    files: &BucketFiles<OrientedEntry>,
    bucket: usize,
    k: usize,
    min_freq: u64,
) -> io::Result<(Vec<SplitRecord>, Vec<u64>)> {
    let entries = files.read_bucket(bucket)?;
    Ok(sorted_records(entries, k, min_freq))
}

/// Sort, merge duplicate entries and emit split records. Also returns the
/// frequency of every canonical (k+1)-mer for the histogram.
fn sorted_records(mut entries: Vec<OrientedEntry>, k: usize, min_freq: u64) -> (Vec<SplitRecord>, Vec<u64>) {
    entries.sort_unstable_by(|a, b| a.seq.cmp(&b.seq));
    entries.dedup_by(|next, kept| {
        if next.seq == kept.seq {
            kept.count += next.count;
            true
        } else {
            false
        }
    });

    let frequencies = entries
        .iter()
        .filter(|e| prefers_forward(&e.seq))
        .map(|e| e.count)
        .collect();
    (split_records(&entries, k, min_freq), frequencies)
}

/// Scan sorted, distinct oriented (k+1)-mers grouped by their k-length prefix
pub fn split_records(entries: &[OrientedEntry], k: usize, min_freq: u64) -> Vec<SplitRecord> {
    let mut records = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let prefix = &entries[i].seq[..k];
        let mut j = i + 1;
        while j < entries.len() && &entries[j].seq[..k] == prefix {
            j += 1;
        }

        let qualifying = entries[i..j].iter().filter(|e| e.count >= min_freq).count();
        if qualifying >= 2 {
            for entry in entries[i..j].iter().filter(|e| e.count >= min_freq) {
                let branch = &entry.seq[1..];
                let forward = prefers_forward(branch);
                records.push(SplitRecord {
                    ckmer: if forward {
                        branch.to_vec()
                    } else {
                        reverse_complement_unchecked(branch)
                    },
                    side: if forward { Side::Right } else { Side::Left },
                    base: branch[..k - 1].to_vec(),
                    letter: branch[k - 1],
                    number: entry.count,
                });
            }
        }
        i = j;
    }
    records
}

/// Merge split records into the sorted Ckmer and Base tables.
///
/// A Ckmer's number is the larger of its per-side summed branch
/// frequencies; each base slot carries the number of the Ckmer it links.
pub fn build_tables(k: usize, mut records: Vec<SplitRecord>) -> SplitTables {
    records.par_sort_unstable_by(|a, b| (&a.ckmer, a.side).cmp(&(&b.ckmer, b.side)));

    let mut base_seqs: Vec<&[u8]> = records.iter().map(|r| r.base.as_slice()).collect();
    base_seqs.par_sort_unstable();
    base_seqs.dedup();
    let stride = k - 1;
    let mut bases = BaseTable {
        stride,
        seqs: base_seqs.concat(),
        branches: vec![[Branch::default(); 4]; base_seqs.len()],
    };

    let mut kmers = KmerTable {
        k,
        ..Default::default()
    };
    // (base link, slot, ckmer link) filled once numbers are final
    let mut slots: Vec<(Link, usize, Link)> = Vec::new();

    let mut i = 0;
    while i < records.len() {
        let link = kmers.len() as Link;
        let ckmer = &records[i].ckmer;
        let mut side_numbers = [0u64; 2];
        let mut side_bases: [Option<Link>; 2] = [None, None];

        let mut j = i;
        while j < records.len() && &records[j].ckmer == ckmer {
            let r = &records[j];
            let s = r.side.as_u8() as usize;
            side_numbers[s] += r.number;
            if side_bases[s].is_none() {
                if let (Some(base_link), Some(slot)) = (bases.find(&r.base), letter_index(r.letter)) {
                    side_bases[s] = Some(base_link);
                    slots.push((base_link, slot, link));
                }
            }
            j += 1;
        }

        let Some(split) = SplitType::from_sides(side_bases[0].is_some(), side_bases[1].is_some()) else {
            i = j;
            continue;
        };
        kmers.seqs.extend_from_slice(ckmer);
        kmers.split.push(split);
        kmers.number.push(side_numbers[0].max(side_numbers[1]));
        kmers.left_base.push(side_bases[0]);
        kmers.right_base.push(side_bases[1]);
        i = j;
    }

    for (base_link, slot, link) in slots {
        bases.branches[base_link as usize][slot] = Branch {
            number: kmers.number[link as usize],
            ckmer: Some(link),
        };
    }

    SplitTables {
        kmers,
        bases,
        ..Default::default()
    }
}

/// Letter a Ckmer contributes to its base on `side`
pub fn branch_letter(ckmer: &[u8], side: Side) -> u8 {
    match side {
        Side::Right => ckmer[ckmer.len() - 1],
        Side::Left => complement(ckmer[0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::kmer::{canonical, reverse_complement};

    fn counts(list: &[(&str, u64)]) -> Vec<(Vec<u8>, u64)> {
        list.iter().map(|(s, c)| (s.as_bytes().to_vec(), *c)).collect()
    }

    #[test]
    fn test_single_branch_point() {
        // prefix AACG extends to AACGA and AACGT
        let tables = extract_from_counts(4, 2, counts(&[("AACGA", 5), ("AACGT", 3), ("CCCCC", 9)]));

        assert_eq!(tables.kmers.len(), 2);
        let acga = tables.kmers.find(&canonical(b"ACGA").unwrap()).unwrap();
        let acgt = tables.kmers.find(b"ACGT").unwrap();
        assert_eq!(tables.kmers.number[acga as usize], 5);
        assert_eq!(tables.kmers.number[acgt as usize], 3);

        assert_eq!(tables.kmers.split[acga as usize], SplitType::Right);
        assert_eq!(tables.kmers.split[acgt as usize], SplitType::Right);

        let base = tables.bases.find(b"ACG").unwrap();
        assert_eq!(tables.kmers.right_base[acga as usize], Some(base));
        assert_eq!(tables.kmers.right_base[acgt as usize], Some(base));
        assert_eq!(tables.kmers.left_base[acgt as usize], None);
        assert_eq!(tables.bases.number(base), 8);
        assert_eq!(tables.bases.branches[base as usize][0].ckmer, Some(acga));
        assert_eq!(tables.bases.branches[base as usize][3].ckmer, Some(acgt));
    }

    #[test]
    fn test_below_floor_is_not_splitting() {
        let tables = extract_from_counts(4, 4, counts(&[("AACGA", 5), ("AACGT", 3)]));
        assert!(tables.kmers.is_empty());
        assert!(tables.bases.is_empty());
        assert_eq!(tables.kmer_histogram, vec![(3, 1), (5, 1)]);
    }

    #[test]
    fn test_input_orientation_does_not_matter() {
        let forward = extract_from_counts(4, 2, counts(&[("AACGA", 5), ("AACGT", 3)]));
        let rc: Vec<(Vec<u8>, u64)> = counts(&[("AACGA", 5), ("AACGT", 3)])
            .into_iter()
            .map(|(s, c)| (reverse_complement(&s).unwrap(), c))
            .collect();
        let reversed = extract_from_counts(4, 2, rc);
        assert_eq!(forward.kmers.seqs, reversed.kmers.seqs);
        assert_eq!(forward.bases.seqs, reversed.bases.seqs);
    }

    #[test]
    fn test_ckmer_base_consistency() {
        // TAGG extends to C and A after both T and C; AGTCC extends to A and G
        let tables = extract_from_counts(
            5,
            1,
            counts(&[
                ("TTAGGC", 4),
                ("TTAGGA", 6),
                ("CTAGGC", 2),
                ("CTAGGA", 2),
                ("AGTCCA", 3),
                ("AGTCCG", 3),
            ]),
        );
        check_consistency(&tables);

        // the TAGG branches sum their evidence across both left contexts
        let taggc = tables.kmers.find(&canonical(b"TAGGC").unwrap()).unwrap();
        assert_eq!(tables.kmers.number[taggc as usize], 6);
    }

    #[test]
    fn test_both_sided_kmer() {
        // AACGT is a branch after CAACG and, on the reverse strand, after AACGT
        let tables = extract_from_counts(
            5,
            2,
            counts(&[("CAACGT", 3), ("CAACGA", 3), ("AACGTT", 4), ("AACGTA", 4)]),
        );
        check_consistency(&tables);
        let link = tables.kmers.find(b"AACGT").unwrap();
        assert_eq!(tables.kmers.split[link as usize], SplitType::Both);
        assert_eq!(tables.kmers.number[link as usize], 4);
    }

    fn check_consistency(tables: &SplitTables) {
        let k = tables.kmers.k;
        for link in 0..tables.kmers.len() as Link {
            let seq = tables.kmers.seq(link);
            assert!(prefers_forward(seq));
            let split = tables.kmers.split[link as usize];
            if split.has(Side::Right) {
                let b = tables.kmers.right_base[link as usize].unwrap();
                assert_eq!(tables.bases.seq(b), &seq[..k - 1]);
            }
            if split.has(Side::Left) {
                let b = tables.kmers.left_base[link as usize].unwrap();
                assert_eq!(tables.bases.seq(b), reverse_complement(&seq[1..]).unwrap().as_slice());
            }
        }
        for b in 0..tables.bases.len() as Link {
            let slots = &tables.bases.branches[b as usize];
            assert_eq!(tables.bases.number(b), slots.iter().map(|s| s.number).sum::<u64>());
            assert!(slots.iter().filter(|s| s.ckmer.is_some()).count() >= 2);
            for (i, slot) in slots.iter().enumerate() {
                if let Some(c) = slot.ckmer {
                    assert_eq!(slot.number, tables.kmers.number[c as usize]);
                    let mut branch = tables.bases.seq(b).to_vec();
                    branch.push(crate::kmer::table::LETTERS[i]);
                    assert_eq!(canonical(&branch).unwrap(), tables.kmers.seq(c));
                }
            }
        }
    }
}
