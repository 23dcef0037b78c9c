//! Store writer
//!
//! The store is written to a temporary file next to its destination and
//! renamed into place once complete, so the output path only ever holds a
//! finished store.

use crate::error::{IndexError, Result};
use crate::kmer::kmer::Side;
use crate::kmer::table::LETTERS;
use crate::store::uint::UIntArray;
use crate::store::{encode_link, StoreContents, FORMAT_VERSION, MAGIC};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

type Column = (String, UIntArray);

fn column<I>(name: &str, values: I) -> Column
where
    I: Iterator<Item = u64> + Clone,
{
    (name.to_string(), UIntArray::collect(values))
}

/// CSR offsets of `keys` (sorted, each < `n`) into `n` slots
fn offsets(n: usize, keys: impl Iterator<Item = usize>) -> Vec<u64> {
    let mut offsets = vec![0u64; n + 1];
    for key in keys {
        offsets[key + 1] += 1;
    }
    for i in 1..offsets.len() {
        offsets[i] += offsets[i - 1];
    }
    offsets
}

fn kmer_columns(contents: &StoreContents) -> Vec<Column> {
    let kmers = &contents.kmers;
    let n = kmers.len();

    let mut direct = vec![[(0u64, 0u64); 2]; n];
    for rel in &contents.relations {
        let entry = &mut direct[rel.from as usize][rel.from_side.as_u8() as usize];
        entry.0 += 1;
        entry.1 += rel.count;
    }
    let mut cycles = vec![0u64; n];
    for (link, s) in &contents.cycles {
        cycles[*link as usize] = s.count;
    }
    let mut reversals = vec![0u64; n];
    for (link, s) in &contents.reversals {
        reversals[*link as usize] = s.count;
    }
    let mut connected = vec![0u64; n];
    for set in &contents.connected {
        let mut links: Vec<_> = set.elements.iter().map(|&(l, _)| l).collect();
        links.sort_unstable();
        links.dedup();
        for l in links {
            connected[l as usize] += 1;
        }
    }
    let mut paired = vec![0u64; n];
    for p in &contents.paired {
        paired[p.from as usize] += 1;
    }

    let left = Side::Left.as_u8() as usize;
    let right = Side::Right.as_u8() as usize;
    vec![
        ("kmer.seq".to_string(), UIntArray::U8(kmers.seqs.clone())),
        column("kmer.type", kmers.split.iter().map(|t| t.as_u8() as u64)),
        column("kmer.number", kmers.number.iter().copied()),
        column("kmer.left_base", kmers.left_base.iter().map(|&b| encode_link(b))),
        column("kmer.right_base", kmers.right_base.iter().map(|&b| encode_link(b))),
        column("kmer.direct_left_distinct", direct.iter().map(|d| d[left].0)),
        column("kmer.direct_left_number", direct.iter().map(|d| d[left].1)),
        column("kmer.direct_right_distinct", direct.iter().map(|d| d[right].0)),
        column("kmer.direct_right_number", direct.iter().map(|d| d[right].1)),
        column("kmer.partition", contents.partitioning.assignment.iter().map(|&p| p as u64)),
        column("kmer.cycles", cycles.iter().copied()),
        column("kmer.reversals", reversals.iter().copied()),
        column("kmer.connected", connected.iter().copied()),
        column("kmer.paired", paired.iter().copied()),
    ]
}

fn base_columns(contents: &StoreContents) -> Vec<Column> {
    let bases = &contents.bases;
    let mut columns = vec![
        ("base.seq".to_string(), UIntArray::U8(bases.seqs.clone())),
        column("base.number", (0..bases.len() as u32).map(|b| bases.number(b))),
    ];
    for (slot, letter) in LETTERS.iter().enumerate() {
        let letter = *letter as char;
        columns.push(column(
            &format!("base.number.{}", letter),
            bases.branches.iter().map(move |b| b[slot].number),
        ));
        columns.push(column(
            &format!("base.link.{}", letter),
            bases.branches.iter().map(move |b| encode_link(b[slot].ckmer)),
        ));
    }
    columns
}

fn relation_columns(contents: &StoreContents) -> Vec<Column> {
    let rels = &contents.relations;
    let n = contents.kmers.len();
    let mut columns = vec![
        column("direct.offsets", offsets(n, rels.iter().map(|r| r.from as usize)).into_iter()),
        column("direct.from_side", rels.iter().map(|r| r.from_side.as_u8() as u64)),
        column("direct.to", rels.iter().map(|r| r.to as u64)),
        column("direct.to_side", rels.iter().map(|r| r.to_side.as_u8() as u64)),
        column("direct.distance", rels.iter().map(|r| r.distance as u64)),
        column("direct.count", rels.iter().map(|r| r.count)),
        column("direct.problem", rels.iter().map(|r| r.problem as u64)),
    ];
    for (name, table) in [("cycle", &contents.cycles), ("reversal", &contents.reversals)] {
        columns.push(column(&format!("{}.link", name), table.iter().map(|(l, _)| *l as u64)));
        columns.push(column(&format!("{}.min_length", name), table.iter().map(|(_, s)| s.min_length as u64)));
        columns.push(column(&format!("{}.count", name), table.iter().map(|(_, s)| s.count)));
    }
    columns
}

fn connection_columns(contents: &StoreContents) -> Vec<Column> {
    let sets = &contents.connected;
    let n = contents.kmers.len();
    let set_offsets = offsets(sets.len(), sets.iter().enumerate().flat_map(|(i, s)| std::iter::repeat(i).take(s.size())));

    // set indices per Ckmer, in CSR form
    let mut memberships: Vec<(u32, u64)> = Vec::new();
    for (i, set) in sets.iter().enumerate() {
        let mut links: Vec<_> = set.elements.iter().map(|&(l, _)| l).collect();
        links.sort_unstable();
        links.dedup();
        memberships.extend(links.into_iter().map(|l| (l, i as u64)));
    }
    memberships.sort_unstable();

    let paired = &contents.paired;
    vec![
        column("connected.members", sets.iter().flat_map(|s| s.elements.iter().map(|&(l, _)| l as u64))),
        column(
            "connected.orientation",
            sets.iter().flat_map(|s| s.elements.iter().map(|&(_, o)| o.as_u8() as u64)),
        ),
        column("connected.offset", set_offsets.into_iter()),
        column("connected.hash", sets.iter().map(|s| s.hash)),
        column("connected.length", sets.iter().map(|s| s.length as u64)),
        column("connected.count", sets.iter().map(|s| s.count)),
        column("connected.direct", sets.iter().map(|s| s.direct as u64)),
        column(
            "connected.kmer_offsets",
            offsets(n, memberships.iter().map(|&(l, _)| l as usize)).into_iter(),
        ),
        column("connected.kmer_sets", memberships.iter().map(|&(_, s)| s)),
        column("paired.offsets", offsets(n, paired.iter().map(|p| p.from as usize)).into_iter()),
        column("paired.to", paired.iter().map(|p| p.to as u64)),
        column("paired.count", paired.iter().map(|p| p.count)),
    ]
}

/// Write a complete store to `path`
pub fn write_store(path: &Path, contents: &StoreContents) -> Result<()> {
    let mut attributes = contents.attributes.clone();
    attributes.format_version = FORMAT_VERSION;
    attributes.num_kmers = contents.kmers.len() as u64;
    attributes.num_bases = contents.bases.len() as u64;
    attributes.num_direct_relations = contents.relations.len() as u64;
    attributes.num_cycles = contents.cycles.len() as u64;
    attributes.num_reversals = contents.reversals.len() as u64;
    attributes.num_connected_sets = contents.connected.len() as u64;
    attributes.num_paired_relations = contents.paired.len() as u64;
    attributes.num_partitions = contents.partitioning.num_partitions() as u64;
    if contents.partitioning.assignment.len() != contents.kmers.len() {
        return Err(IndexError::CorruptStore(format!(
            "{} partition ids for {} k-mers",
            contents.partitioning.assignment.len(),
            contents.kmers.len()
        )));
    }

    let mut columns = kmer_columns(contents);
    columns.extend(base_columns(contents));
    columns.extend(relation_columns(contents));
    columns.extend(connection_columns(contents));

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::with_capacity(1 << 20, tmp.as_file_mut());
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        let json = serde_json::to_vec(&attributes)?;
        writer.write_u64::<LittleEndian>(json.len() as u64)?;
        writer.write_all(&json)?;
        writer.write_u32::<LittleEndian>(columns.len() as u32)?;
        for (name, values) in &columns {
            writer.write_u16::<LittleEndian>(name.len() as u16)?;
            writer.write_all(name.as_bytes())?;
            values.write_to(&mut writer)?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;

    let bytes: usize = columns.iter().map(|(_, c)| c.memory_bytes()).sum();
    info!("Wrote store {:?}: {} columns, {} bytes of column data", path, columns.len(), bytes);
    Ok(())
}
