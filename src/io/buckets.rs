//! Disk buckets for spilled intermediates
//!
//! Records are distributed to bucket files by a caller-chosen key (prefix
//! code, k-mer link range, partition id). Every producer owns its own
//! `BucketWriter`; after all producers finish, their files are combined into
//! a `BucketFiles` set and each bucket is read back independently, so merges
//! of disjoint buckets run in parallel with no shared mutable state.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Fixed binary layout for records spilled to bucket files
pub trait SpillRecord: Sized + Send {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Reads the next record; `Ok(None)` at a clean end of file
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Self>>;
}

/// Reads a leading little-endian u64, returning `None` on a clean EOF.
pub fn read_leading_u64<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated spill record"));
        }
        filled += n;
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

/// Reads a length-prefixed byte string written by `write_bytes`
pub fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)
}

/// Bucket file written by a single producer
struct Bucket {
    path: PathBuf,
    writer: BufWriter<File>,
    count: u64,
}

impl Bucket {
    fn new(path: PathBuf, buffer_size: usize) -> io::Result<Self> {
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::with_capacity(buffer_size, file),
            count: 0,
        })
    }

    fn finalize(self) -> io::Result<(PathBuf, u64)> {
        let mut writer = self.writer;
        writer.flush()?;
        drop(writer);
        Ok((self.path, self.count))
    }
}

/// Per-producer set of bucket files, created lazily on first write
pub struct BucketWriter<T> {
    dir: PathBuf,
    prefix: String,
    buffer_size: usize,
    buckets: Vec<Option<Bucket>>,
    _record: PhantomData<T>,
}

impl<T: SpillRecord> BucketWriter<T> {
    pub fn new(dir: &Path, prefix: &str, num_buckets: usize, buffer_size: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            buffer_size,
            buckets: (0..num_buckets.max(1)).map(|_| None).collect(),
            _record: PhantomData,
        })
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn push(&mut self, bucket: usize, record: &T) -> io::Result<()> {
        let slot = &mut self.buckets[bucket];
        if slot.is_none() {
            let path = self.dir.join(format!("{}_{:04}.bin", self.prefix, bucket));
            *slot = Some(Bucket::new(path, self.buffer_size)?);
        }
        if let Some(b) = slot.as_mut() {
            record.write_to(&mut b.writer)?;
            b.count += 1;
        }
        Ok(())
    }

    pub fn finalize(self) -> io::Result<BucketFiles<T>> {
        let mut files = BucketFiles::new(self.buckets.len());
        for (i, slot) in self.buckets.into_iter().enumerate() {
            if let Some(bucket) = slot {
                let (path, count) = bucket.finalize()?;
                files.paths[i].push(path);
                files.total += count;
            }
        }
        Ok(files)
    }
}

/// Bucket files collected from one or more producers
pub struct BucketFiles<T> {
    paths: Vec<Vec<PathBuf>>,
    total: u64,
    _record: PhantomData<T>,
}

impl<T: SpillRecord> BucketFiles<T> {
    pub fn new(num_buckets: usize) -> Self {
        Self {
            paths: vec![Vec::new(); num_buckets.max(1)],
            total: 0,
            _record: PhantomData,
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.paths.len()
    }

    /// Total records across all buckets
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Absorb another producer's files; bucket counts must agree
    pub fn merge(&mut self, other: BucketFiles<T>) {
        debug_assert_eq!(self.paths.len(), other.paths.len());
        for (mine, theirs) in self.paths.iter_mut().zip(other.paths) {
            mine.extend(theirs);
        }
        self.total += other.total;
    }

    /// Read every record of one bucket into memory
    pub fn read_bucket(&self, bucket: usize) -> io::Result<Vec<T>> {
        let mut records = Vec::new();
        for path in &self.paths[bucket] {
            let file = File::open(path)?;
            let mut reader = BufReader::with_capacity(1 << 20, file);
            while let Some(record) = T::read_from(&mut reader)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn disk_bytes(&self) -> u64 {
        self.paths
            .iter()
            .flatten()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Remove all bucket files
    pub fn cleanup(&self) -> io::Result<()> {
        for path in self.paths.iter().flatten() {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
