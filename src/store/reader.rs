//! Read access to a persisted store

use crate::error::{IndexError, Result};
use crate::graph::{ConnectedSet, PairedRelation};
use crate::kmer::kmer::{canonical, Orientation, Side};
use crate::kmer::table::{search, Branch, Link, SplitType, LETTERS};
use crate::relations::{DirectRelation, RepeatSummary};
use crate::store::uint::UIntArray;
use crate::store::{decode_link, Attributes, BaseRecord, CkmerRecord, DirectSummary, FORMAT_VERSION, MAGIC};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

struct Columns(BTreeMap<String, UIntArray>);

impl Columns {
    fn take(&mut self, name: &str) -> Result<UIntArray> {
        self.0
            .remove(name)
            .ok_or_else(|| IndexError::CorruptStore(format!("missing column {}", name)))
    }

    fn take_len(&mut self, name: &str, len: usize) -> Result<UIntArray> {
        let column = self.take(name)?;
        if column.len() != len {
            return Err(IndexError::CorruptStore(format!(
                "column {} has {} entries, expected {}",
                name,
                column.len(),
                len
            )));
        }
        Ok(column)
    }

    fn take_bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        match self.take(name)? {
            UIntArray::U8(v) => Ok(v),
            _ => Err(IndexError::CorruptStore(format!("column {} is not a byte column", name))),
        }
    }
}

/// Columns of a Cycle or Reversal table
struct RepeatColumns {
    link: UIntArray,
    min_length: UIntArray,
    count: UIntArray,
}

impl RepeatColumns {
    fn load(columns: &mut Columns, name: &str) -> Result<Self> {
        let link = columns.take(&format!("{}.link", name))?;
        let n = link.len();
        Ok(Self {
            link,
            min_length: columns.take_len(&format!("{}.min_length", name), n)?,
            count: columns.take_len(&format!("{}.count", name), n)?,
        })
    }

    fn entries(&self) -> Vec<(Link, RepeatSummary)> {
        (0..self.link.len())
            .map(|i| {
                (
                    self.link.get(i) as Link,
                    RepeatSummary {
                        min_length: self.min_length.get(i) as u32,
                        count: self.count.get(i),
                    },
                )
            })
            .collect()
    }
}

/// An opened, fully loaded store
pub struct Store {
    attributes: Attributes,
    k: usize,
    kmer_seq: Vec<u8>,
    kmer_type: UIntArray,
    kmer_number: UIntArray,
    kmer_left_base: UIntArray,
    kmer_right_base: UIntArray,
    direct_summary: [UIntArray; 4],
    kmer_partition: UIntArray,
    kmer_cycles: UIntArray,
    kmer_reversals: UIntArray,
    kmer_connected: UIntArray,
    kmer_paired: UIntArray,
    base_seq: Vec<u8>,
    base_number: UIntArray,
    base_branch_number: [UIntArray; 4],
    base_branch_link: [UIntArray; 4],
    direct_offsets: UIntArray,
    direct_from_side: UIntArray,
    direct_to: UIntArray,
    direct_to_side: UIntArray,
    direct_distance: UIntArray,
    direct_count: UIntArray,
    direct_problem: UIntArray,
    cycles: RepeatColumns,
    reversals: RepeatColumns,
    connected_members: UIntArray,
    connected_orientation: UIntArray,
    connected_offset: UIntArray,
    connected_hash: UIntArray,
    connected_length: UIntArray,
    connected_count: UIntArray,
    connected_direct: UIntArray,
    connected_kmer_offsets: UIntArray,
    connected_kmer_sets: UIntArray,
    paired_offsets: UIntArray,
    paired_to: UIntArray,
    paired_count: UIntArray,
}

/// Account for `bytes` of the file, failing when fewer are left
fn consume(remaining: &mut u64, bytes: u64, what: &str) -> Result<()> {
    if bytes > *remaining {
        return Err(IndexError::CorruptStore(format!("{} runs past the end of the file", what)));
    }
    *remaining -= bytes;
    Ok(())
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut remaining = file.metadata()?.len();
        let mut reader = BufReader::with_capacity(1 << 20, file);

        consume(&mut remaining, 8 + 4 + 8, "header")?;
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(IndexError::CorruptStore(format!("{:?} is not a splitmer store", path)));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(IndexError::CorruptStore(format!("unsupported store version {}", version)));
        }
        let json_len = reader.read_u64::<LittleEndian>()?;
        consume(&mut remaining, json_len, "attributes")?;
        let mut json = vec![0u8; json_len as usize];
        reader.read_exact(&mut json)?;
        let attributes: Attributes = serde_json::from_slice(&json)?;

        consume(&mut remaining, 4, "column count")?;
        let num_columns = reader.read_u32::<LittleEndian>()?;
        let mut columns = BTreeMap::new();
        for _ in 0..num_columns {
            consume(&mut remaining, 2, "column name")?;
            let name_len = reader.read_u16::<LittleEndian>()?;
            consume(&mut remaining, name_len as u64, "column name")?;
            let mut name = vec![0u8; name_len as usize];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|_| IndexError::CorruptStore("column name is not UTF-8".to_string()))?;
            let column = UIntArray::read_from(&mut reader, remaining)
                .map_err(|e| IndexError::CorruptStore(format!("column {}: {}", name, e)))?;
            consume(&mut remaining, column.encoded_len(), "column")?;
            columns.insert(name, column);
        }
        Self::from_columns(attributes, Columns(columns))
    }

    fn from_columns(attributes: Attributes, mut c: Columns) -> Result<Self> {
        let k = attributes.k;
        let n = attributes.num_kmers as usize;
        let kmer_seq = c.take_bytes("kmer.seq")?;
        if kmer_seq.len() != n * k {
            return Err(IndexError::CorruptStore("k-mer sequence column length".to_string()));
        }
        let nb = attributes.num_bases as usize;
        let base_seq = c.take_bytes("base.seq")?;
        if base_seq.len() != nb * k.saturating_sub(1) {
            return Err(IndexError::CorruptStore("base sequence column length".to_string()));
        }

        let mut branch = |kind: &str| -> Result<[UIntArray; 4]> {
            Ok([
                c.take_len(&format!("base.{}.{}", kind, LETTERS[0] as char), nb)?,
                c.take_len(&format!("base.{}.{}", kind, LETTERS[1] as char), nb)?,
                c.take_len(&format!("base.{}.{}", kind, LETTERS[2] as char), nb)?,
                c.take_len(&format!("base.{}.{}", kind, LETTERS[3] as char), nb)?,
            ])
        };
        let base_branch_number = branch("number")?;
        let base_branch_link = branch("link")?;

        let direct_offsets = c.take_len("direct.offsets", n + 1)?;
        let nd = direct_offsets.get(n) as usize;
        let connected_offset = c.take("connected.offset")?;
        if connected_offset.is_empty() {
            return Err(IndexError::CorruptStore("empty connected set offsets".to_string()));
        }
        let ns = connected_offset.len().saturating_sub(1);
        let nm = connected_offset.get(ns) as usize;
        let connected_kmer_offsets = c.take_len("connected.kmer_offsets", n + 1)?;
        let nks = connected_kmer_offsets.get(n) as usize;
        let paired_offsets = c.take_len("paired.offsets", n + 1)?;
        let np = paired_offsets.get(n) as usize;

        Ok(Self {
            k,
            kmer_seq,
            kmer_type: c.take_len("kmer.type", n)?,
            kmer_number: c.take_len("kmer.number", n)?,
            kmer_left_base: c.take_len("kmer.left_base", n)?,
            kmer_right_base: c.take_len("kmer.right_base", n)?,
            direct_summary: [
                c.take_len("kmer.direct_left_distinct", n)?,
                c.take_len("kmer.direct_left_number", n)?,
                c.take_len("kmer.direct_right_distinct", n)?,
                c.take_len("kmer.direct_right_number", n)?,
            ],
            kmer_partition: c.take_len("kmer.partition", n)?,
            kmer_cycles: c.take_len("kmer.cycles", n)?,
            kmer_reversals: c.take_len("kmer.reversals", n)?,
            kmer_connected: c.take_len("kmer.connected", n)?,
            kmer_paired: c.take_len("kmer.paired", n)?,
            base_seq,
            base_number: c.take_len("base.number", nb)?,
            base_branch_number,
            base_branch_link,
            direct_offsets,
            direct_from_side: c.take_len("direct.from_side", nd)?,
            direct_to: c.take_len("direct.to", nd)?,
            direct_to_side: c.take_len("direct.to_side", nd)?,
            direct_distance: c.take_len("direct.distance", nd)?,
            direct_count: c.take_len("direct.count", nd)?,
            direct_problem: c.take_len("direct.problem", nd)?,
            cycles: RepeatColumns::load(&mut c, "cycle")?,
            reversals: RepeatColumns::load(&mut c, "reversal")?,
            connected_members: c.take_len("connected.members", nm)?,
            connected_orientation: c.take_len("connected.orientation", nm)?,
            connected_offset,
            connected_hash: c.take_len("connected.hash", ns)?,
            connected_length: c.take_len("connected.length", ns)?,
            connected_count: c.take_len("connected.count", ns)?,
            connected_direct: c.take_len("connected.direct", ns)?,
            connected_kmer_offsets,
            connected_kmer_sets: c.take_len("connected.kmer_sets", nks)?,
            paired_offsets,
            paired_to: c.take_len("paired.to", np)?,
            paired_count: c.take_len("paired.count", np)?,
            attributes,
        })
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn num_kmers(&self) -> usize {
        self.kmer_type.len()
    }

    pub fn num_bases(&self) -> usize {
        self.base_number.len()
    }

    /// Link of a k-mer given in either orientation
    pub fn kmer_link(&self, seq: &[u8]) -> Result<Option<Link>> {
        if seq.len() != self.k {
            return Ok(None);
        }
        let canon = canonical(&seq.to_ascii_uppercase())?;
        Ok(search(&self.kmer_seq, self.k, &canon))
    }

    pub fn kmer(&self, link: Link) -> Option<CkmerRecord> {
        let i = link as usize;
        if i >= self.num_kmers() {
            return None;
        }
        let seq = &self.kmer_seq[i * self.k..(i + 1) * self.k];
        Some(CkmerRecord {
            link,
            sequence: String::from_utf8_lossy(seq).into_owned(),
            split: SplitType::from_u8(self.kmer_type.get(i) as u8)?,
            number: self.kmer_number.get(i),
            left_base: decode_link(self.kmer_left_base.get(i)),
            right_base: decode_link(self.kmer_right_base.get(i)),
            direct_left: DirectSummary {
                distinct: self.direct_summary[0].get(i),
                number: self.direct_summary[1].get(i),
            },
            direct_right: DirectSummary {
                distinct: self.direct_summary[2].get(i),
                number: self.direct_summary[3].get(i),
            },
            partition: self.kmer_partition.get(i) as u32,
            cycles: self.kmer_cycles.get(i),
            reversals: self.kmer_reversals.get(i),
            connected_sets: self.kmer_connected.get(i),
            paired: self.kmer_paired.get(i),
        })
    }

    pub fn base_link(&self, seq: &[u8]) -> Option<Link> {
        search(&self.base_seq, self.k.saturating_sub(1), &seq.to_ascii_uppercase())
    }

    pub fn base(&self, link: Link) -> Option<BaseRecord> {
        let i = link as usize;
        if i >= self.num_bases() {
            return None;
        }
        let stride = self.k - 1;
        let mut branches = [Branch::default(); 4];
        for (slot, branch) in branches.iter_mut().enumerate() {
            branch.number = self.base_branch_number[slot].get(i);
            branch.ckmer = decode_link(self.base_branch_link[slot].get(i));
        }
        Some(BaseRecord {
            link,
            sequence: String::from_utf8_lossy(&self.base_seq[i * stride..(i + 1) * stride]).into_owned(),
            number: self.base_number.get(i),
            branches,
        })
    }

    fn direct_at(&self, from: Link, j: usize) -> DirectRelation {
        DirectRelation {
            from,
            from_side: Side::from_u8(self.direct_from_side.get(j) as u8),
            to: self.direct_to.get(j) as Link,
            to_side: Side::from_u8(self.direct_to_side.get(j) as u8),
            distance: self.direct_distance.get(j) as u32,
            count: self.direct_count.get(j),
            problem: self.direct_problem.get(j) as u8,
        }
    }

    /// Direct relations leaving either side of `link`
    pub fn direct_relations(&self, link: Link) -> Vec<DirectRelation> {
        let i = link as usize;
        if i >= self.num_kmers() {
            return Vec::new();
        }
        let (start, end) = (self.direct_offsets.get(i) as usize, self.direct_offsets.get(i + 1) as usize);
        (start..end).map(|j| self.direct_at(link, j)).collect()
    }

    /// Every stored direct relation, ordered by origin
    pub fn all_direct_relations(&self) -> impl Iterator<Item = DirectRelation> + '_ {
        (0..self.num_kmers() as Link).flat_map(move |l| self.direct_relations(l))
    }

    pub fn cycles(&self) -> Vec<(Link, RepeatSummary)> {
        self.cycles.entries()
    }

    pub fn reversals(&self) -> Vec<(Link, RepeatSummary)> {
        self.reversals.entries()
    }

    pub fn num_connected_sets(&self) -> usize {
        self.connected_hash.len()
    }

    pub fn connected_set(&self, index: usize) -> Option<ConnectedSet> {
        if index >= self.num_connected_sets() {
            return None;
        }
        let (start, end) = (
            self.connected_offset.get(index) as usize,
            self.connected_offset.get(index + 1) as usize,
        );
        Some(ConnectedSet {
            hash: self.connected_hash.get(index),
            elements: (start..end)
                .map(|j| {
                    (
                        self.connected_members.get(j) as Link,
                        Orientation::from_u8(self.connected_orientation.get(j) as u8),
                    )
                })
                .collect(),
            length: self.connected_length.get(index) as u32,
            count: self.connected_count.get(index),
            direct: self.connected_direct.get(index) == 1,
        })
    }

    pub fn connected_sets(&self) -> impl Iterator<Item = ConnectedSet> + '_ {
        (0..self.num_connected_sets()).filter_map(move |i| self.connected_set(i))
    }

    /// Sets with the given symmetric hash
    pub fn connected_sets_by_hash(&self, hash: u64) -> Vec<ConnectedSet> {
        let n = self.num_connected_sets();
        let (mut lo, mut hi) = (0usize, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.connected_hash.get(mid) < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo..n)
            .take_while(|&i| self.connected_hash.get(i) == hash)
            .filter_map(|i| self.connected_set(i))
            .collect()
    }

    /// Sets containing `link`
    pub fn connected_sets_of(&self, link: Link) -> Vec<ConnectedSet> {
        let i = link as usize;
        if i >= self.num_kmers() {
            return Vec::new();
        }
        let (start, end) = (
            self.connected_kmer_offsets.get(i) as usize,
            self.connected_kmer_offsets.get(i + 1) as usize,
        );
        (start..end)
            .filter_map(|j| self.connected_set(self.connected_kmer_sets.get(j) as usize))
            .collect()
    }

    pub fn paired(&self, link: Link) -> Vec<PairedRelation> {
        let i = link as usize;
        if i >= self.num_kmers() {
            return Vec::new();
        }
        let (start, end) = (self.paired_offsets.get(i) as usize, self.paired_offsets.get(i + 1) as usize);
        (start..end)
            .map(|j| PairedRelation {
                from: link,
                to: self.paired_to.get(j) as Link,
                count: self.paired_count.get(j),
            })
            .collect()
    }
}
