use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splitmer::kmer::{canonical, reverse_complement, SplitType};
use splitmer::relations::DirectRelation;
use splitmer::{IndexBuilder, IndexConfig, ReadInputs, Store};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

const K: usize = 31;

/// Two haplotypes of 121 bp differing only at position 60 (G / C)
fn haplotypes() -> (Vec<u8>, Vec<u8>) {
    let mut rng = StdRng::seed_from_u64(17);
    let flank = |rng: &mut StdRng| -> Vec<u8> { (0..60).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect() };
    let left = flank(&mut rng);
    let right = flank(&mut rng);
    let mut a = left.clone();
    a.push(b'G');
    a.extend_from_slice(&right);
    let mut b = left;
    b.push(b'C');
    b.extend_from_slice(&right);
    (a, b)
}

fn write_kmer_list(dir: &Path, reads: &[Vec<u8>]) -> PathBuf {
    let mut counts: HashMap<Vec<u8>, u64> = HashMap::new();
    for read in reads {
        for window in read.windows(K + 1) {
            *counts.entry(canonical(window).unwrap()).or_insert(0) += 1;
        }
    }
    let mut lines: Vec<_> = counts.into_iter().collect();
    lines.sort();
    let path = dir.join("kmers.tsv");
    let mut file = std::fs::File::create(&path).unwrap();
    for (seq, count) in lines {
        writeln!(file, "{}\t{}", String::from_utf8(seq).unwrap(), count).unwrap();
    }
    path
}

fn write_fastq(dir: &Path, name: &str, reads: &[Vec<u8>]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for (i, read) in reads.iter().enumerate() {
        writeln!(file, "@read{}\n{}\n+\n{}", i, String::from_utf8_lossy(read), "I".repeat(read.len())).unwrap();
    }
    path
}

fn config(dir: &Path) -> IndexConfig {
    IndexConfig {
        minimum_frequency: 2,
        maximum_processes: 4,
        maximum_memory: 4_000_000_000,
        temp_dir: Some(dir.join("tmp")),
        batch_size: 2,
        num_buckets: 8,
        ..IndexConfig::with_k(K)
    }
}

/// Ckmer/Base consistency, base completeness and partition totality
fn check_store_invariants(store: &Store) {
    let k = store.k();
    let num_partitions = store.attributes().num_partitions;
    for link in 0..store.num_kmers() as u32 {
        let record = store.kmer(link).unwrap();
        let seq = record.sequence.as_bytes();
        if matches!(record.split, SplitType::Right | SplitType::Both) {
            let base = store.base(record.right_base.unwrap()).unwrap();
            assert_eq!(base.sequence.as_bytes(), &seq[..k - 1]);
        }
        if matches!(record.split, SplitType::Left | SplitType::Both) {
            let base = store.base(record.left_base.unwrap()).unwrap();
            assert_eq!(base.sequence.as_bytes(), reverse_complement(&seq[1..]).unwrap().as_slice());
        }
        assert!((record.partition as u64) < num_partitions);
    }
    for link in 0..store.num_bases() as u32 {
        let base = store.base(link).unwrap();
        assert_eq!(base.number, base.branches.iter().map(|b| b.number).sum::<u64>());
        for (slot, branch) in base.branches.iter().enumerate() {
            if let Some(ckmer) = branch.ckmer {
                let record = store.kmer(ckmer).unwrap();
                assert_eq!(record.number, branch.number);
                let mut extended = base.sequence.clone().into_bytes();
                extended.push(b"ACGT"[slot]);
                assert_eq!(canonical(&extended).unwrap(), record.sequence.as_bytes());
            }
        }
    }
    let relations: Vec<DirectRelation> = store.all_direct_relations().collect();
    for rel in &relations {
        assert!(relations.contains(&rel.reversed()), "missing reverse of {:?}", rel);
    }
}

#[test]
fn test_build_two_haplotypes() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = haplotypes();
    let reads = vec![a.clone(), a.clone(), b.clone(), b.clone()];
    let list = write_kmer_list(dir.path(), &[a.clone(), a.clone(), b.clone(), b.clone()]);
    let fastq = write_fastq(dir.path(), "reads.fq", &reads);
    let output = dir.path().join("index.smi");

    let inputs = ReadInputs {
        unpaired: vec![fastq],
        paired: vec![],
    };
    let stats = IndexBuilder::new(config(dir.path())).build(&list, &inputs, &output).unwrap();
    assert_eq!(stats.reads, 4);
    assert_eq!(stats.splitting_kmers, 4);
    assert_eq!(stats.aborted_files, 0);

    let store = Store::open(&output).unwrap();
    assert_eq!(store.num_kmers(), 4);
    assert_eq!(store.num_bases(), 2);
    assert_eq!(store.attributes().min_read_length, 121);
    assert_eq!(store.attributes().max_read_length, 121);
    check_store_invariants(&store);

    // one base before the variant, with a G and a C branch seen twice each
    let base = store.base(store.base_link(&a[30..60]).unwrap()).unwrap();
    assert_eq!(base.branches[2].number, 2);
    assert_eq!(base.branches[1].number, 2);
    assert_eq!(base.branches[0].ckmer, None);

    // each haplotype links its two Ckmers 30 bp apart
    let relations: Vec<DirectRelation> = store.all_direct_relations().collect();
    assert_eq!(relations.len(), 4);
    for rel in &relations {
        assert_eq!((rel.distance, rel.count, rel.problem), (30, 2, 0));
    }
    let before = store.kmer_link(&a[30..61]).unwrap().unwrap();
    let after = store.kmer_link(&a[60..91]).unwrap().unwrap();
    assert!(store.direct_relations(before).iter().any(|r| r.to == after));

    assert!(store.cycles().is_empty());
    assert!(store.reversals().is_empty());
    assert_eq!(store.num_connected_sets(), 0);
    // one entry per symmetric pair
    assert_eq!(store.attributes().histograms.distance, vec![(30, 2)]);
    assert_eq!(store.attributes().stats.problem_counts[0], 4);
    assert!(!dir.path().join("tmp").read_dir().unwrap().any(|_| true));
}

#[test]
fn test_zero_reads_still_build_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = haplotypes();
    let list = write_kmer_list(dir.path(), &[a.clone(), a.clone(), b.clone(), b.clone()]);
    let output = dir.path().join("index.smi");

    let stats = IndexBuilder::new(config(dir.path()))
        .build(&list, &ReadInputs::default(), &output)
        .unwrap();
    assert_eq!(stats.reads, 0);

    let store = Store::open(&output).unwrap();
    assert_eq!(store.num_kmers(), 4);
    assert_eq!(store.attributes().num_direct_relations, 0);
    check_store_invariants(&store);
    for link in 0..4 {
        let record = store.kmer(link).unwrap();
        assert_eq!(record.direct_left.distinct + record.direct_right.distinct, 0);
        assert_eq!((record.cycles, record.reversals, record.connected_sets, record.paired), (0, 0, 0, 0));
    }
}

#[test]
fn test_overlapping_pairs_match_unpaired_reads() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = haplotypes();
    let list = write_kmer_list(dir.path(), &[a.clone(), a.clone(), b.clone(), b.clone()]);

    // mate 2 is sequenced from the other strand and overlaps mate 1 by 40 bp
    let mut mate1 = Vec::new();
    let mut mate2 = Vec::new();
    for hap in [&a, &a, &b, &b] {
        mate1.push(hap[..70].to_vec());
        mate2.push(reverse_complement(&hap[30..]).unwrap());
    }
    let inputs = ReadInputs {
        unpaired: vec![],
        paired: vec![(
            write_fastq(dir.path(), "r1.fq", &mate1),
            write_fastq(dir.path(), "r2.fq", &mate2),
        )],
    };
    let output = dir.path().join("paired.smi");
    let stats = IndexBuilder::new(config(dir.path())).build(&list, &inputs, &output).unwrap();
    assert_eq!(stats.read_pairs, 4);
    assert_eq!(stats.merged_pairs, 4);

    let store = Store::open(&output).unwrap();
    check_store_invariants(&store);
    let relations: Vec<DirectRelation> = store.all_direct_relations().collect();
    assert_eq!(relations.len(), 4);
    assert!(relations.iter().all(|r| r.distance == 30 && r.count == 2));
}

#[test]
fn test_separate_mates_become_paired_relations() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = haplotypes();
    let list = write_kmer_list(dir.path(), &[a.clone(), a.clone(), b.clone(), b.clone()]);

    // mate 1 ends with the Ckmer before the variant, mate 2 starts with the one after
    let mut mate1 = Vec::new();
    let mut mate2 = Vec::new();
    for hap in [&a, &a, &b, &b] {
        mate1.push(hap[..61].to_vec());
        mate2.push(reverse_complement(&hap[60..]).unwrap());
    }
    let inputs = ReadInputs {
        unpaired: vec![],
        paired: vec![(
            write_fastq(dir.path(), "r1.fq", &mate1),
            write_fastq(dir.path(), "r2.fq", &mate2),
        )],
    };
    let output = dir.path().join("mates.smi");
    let stats = IndexBuilder::new(config(dir.path())).build(&list, &inputs, &output).unwrap();
    assert_eq!(stats.read_pairs, 4);
    assert_eq!(stats.merged_pairs, 0);

    let store = Store::open(&output).unwrap();
    check_store_invariants(&store);
    assert_eq!(store.attributes().num_direct_relations, 0);
    assert_eq!(store.attributes().num_paired_relations, 4);
    let before = store.kmer_link(&a[30..61]).unwrap().unwrap();
    let after = store.kmer_link(&a[60..91]).unwrap().unwrap();
    let paired = store.paired(before);
    assert_eq!(paired.len(), 1);
    assert_eq!((paired[0].to, paired[0].count), (after, 2));
}

#[test]
fn test_keep_temporary_files() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = haplotypes();
    let list = write_kmer_list(dir.path(), &[a, b]);
    let config = IndexConfig {
        keep_temporary_files: true,
        minimum_frequency: 1,
        ..config(dir.path())
    };
    IndexBuilder::new(config)
        .build(&list, &ReadInputs::default(), &dir.path().join("index.smi"))
        .unwrap();
    assert_eq!(dir.path().join("tmp").read_dir().unwrap().count(), 1);
}
