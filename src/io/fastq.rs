// src/io/fastq.rs
#[derive(Debug, Clone)]
pub struct FastqRecord {
    pub header: String,
    pub sequence: String,
    pub quality: String,
}

use crate::error::{IndexError, Result};
use crate::io::open_input;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

/// Stream FASTQ records from a plain or gzipped file
///
/// Records are validated as they are read. The first structural error
/// (bad header marker, missing `+` separator, sequence/quality length
/// mismatch, truncated record) is yielded once and ends the stream; records
/// returned before it stand.
pub fn stream_fastq_records(path: &Path) -> Result<FastqStreamParser<io::Lines<Box<dyn BufRead + Send>>>> {
    let reader = open_input(path)?;
    Ok(FastqStreamParser::new(reader.lines(), path))
}

/// Iterator adaptor to handle streaming FASTQ parsing
pub struct FastqStreamParser<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    lines: I,
    path: PathBuf,
    record: u64,
    finished: bool,
}

impl<I> FastqStreamParser<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    pub fn new(lines: I, path: &Path) -> Self {
        Self {
            lines,
            path: path.to_path_buf(),
            record: 0,
            finished: false,
        }
    }

    /// Number of records returned so far
    pub fn records_read(&self) -> u64 {
        self.record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn malformed(&mut self, reason: &str) -> IndexError {
        self.finished = true;
        IndexError::MalformedFastq {
            path: self.path.clone(),
            record: self.record + 1,
            reason: reason.to_string(),
        }
    }

    fn next_line(&mut self, missing: &str) -> Result<String> {
        match self.lines.next() {
            Some(Ok(mut line)) => {
                if line.ends_with('\r') {
                    line.pop();
                }
                Ok(line)
            }
            Some(Err(e)) => {
                self.finished = true;
                Err(IndexError::Io(e))
            }
            None => Err(self.malformed(missing)),
        }
    }

    fn read_record(&mut self, header: String) -> Result<FastqRecord> {
        if !header.starts_with('@') {
            return Err(self.malformed("header does not start with '@'"));
        }
        let mut sequence = self.next_line("truncated record: missing sequence")?;
        let plus = self.next_line("truncated record: missing '+' separator")?;
        if !plus.starts_with('+') {
            return Err(self.malformed("missing '+' separator"));
        }
        let quality = self.next_line("truncated record: missing quality")?;
        if quality.len() != sequence.len() {
            return Err(self.malformed("sequence and quality lengths differ"));
        }
        sequence.make_ascii_uppercase();
        self.record += 1;
        Ok(FastqRecord {
            header,
            sequence,
            quality,
        })
    }
}

impl<I> Iterator for FastqStreamParser<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = Result<FastqRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let header = loop {
            match self.lines.next() {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => break line.trim_end_matches('\r').to_string(),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(IndexError::Io(e)));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        };
        Some(self.read_record(header))
    }
}

/// Stream paired FASTQ records; both files must hold the same number of records
pub fn stream_paired_fastq_records(
    path1: &Path,
    path2: &Path,
) -> Result<PairedFastqParser<io::Lines<Box<dyn BufRead + Send>>>> {
    Ok(PairedFastqParser {
        mate1: stream_fastq_records(path1)?,
        mate2: stream_fastq_records(path2)?,
        finished: false,
    })
}

pub struct PairedFastqParser<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    mate1: FastqStreamParser<I>,
    mate2: FastqStreamParser<I>,
    finished: bool,
}

impl<I> Iterator for PairedFastqParser<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = Result<(FastqRecord, FastqRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = match (self.mate1.next(), self.mate2.next()) {
            (None, None) => None,
            (Some(Err(e)), _) | (_, Some(Err(e))) => Some(Err(e)),
            (Some(Ok(r1)), Some(Ok(r2))) => return Some(Ok((r1, r2))),
            (Some(Ok(_)), None) => Some(Err(self.mate2.malformed("mate file ended early"))),
            (None, Some(Ok(_))) => Some(Err(self.mate1.malformed("mate file ended early"))),
        };
        self.finished = true;
        item
    }
}
