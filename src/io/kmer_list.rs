//! Reader for externally counted (k+1)-mer lists
//!
//! One `sequence<TAB>count` pair per line, as written by a k-mer counter.
//! Lines of the wrong length, with characters outside ACGT or with an
//! unparsable count are skipped and counted, never fatal.

use crate::error::Result;
use crate::io::open_input;
use std::io::BufRead;
use std::path::Path;

/// Totals gathered while reading a k-mer list
#[derive(Debug, Clone, Default)]
pub struct KmerListStats {
    pub lines: u64,
    pub accepted: u64,
    pub malformed: u64,
}

/// Parse one list line into (sequence, count); `None` for malformed lines.
pub fn parse_line(line: &str, expected_len: usize) -> Option<(&[u8], u64)> {
    let mut fields = line.split_whitespace();
    let seq = fields.next()?.as_bytes();
    let count = fields.next()?.parse::<u64>().ok()?;
    if fields.next().is_some() || seq.len() != expected_len {
        return None;
    }
    if !seq.iter().all(|&b| crate::kmer::kmer::is_acgt(b)) {
        return None;
    }
    Some((seq, count))
}

/// Stream a k-mer list, calling `sink` for every well-formed entry
pub fn read_kmer_list<P, F>(path: P, expected_len: usize, mut sink: F) -> Result<KmerListStats>
where
    P: AsRef<Path>,
    F: FnMut(&[u8], u64) -> Result<()>,
{
    let reader = open_input(path.as_ref())?;
    let mut stats = KmerListStats::default();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;
        match parse_line(&line, expected_len) {
            Some((seq, count)) => {
                stats.accepted += 1;
                sink(seq, count)?;
            }
            None => stats.malformed += 1,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("ACGT\t5", 4), Some((&b"ACGT"[..], 5)));
        assert_eq!(parse_line("ACGT 5", 4), Some((&b"ACGT"[..], 5)));
        assert_eq!(parse_line("ACGT\t5", 5), None);
        assert_eq!(parse_line("ACNT\t5", 4), None);
        assert_eq!(parse_line("ACGT\tfive", 4), None);
        assert_eq!(parse_line("ACGT", 4), None);
    }

    #[test]
    fn test_read_counts_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "AACG\t3").unwrap();
        writeln!(file, "AAC\t3").unwrap();
        writeln!(file, "AACT\t7").unwrap();
        writeln!(file, "AAXT\t7").unwrap();
        writeln!(file).unwrap();
        file.flush().unwrap();

        let mut seen = Vec::new();
        let stats = read_kmer_list(file.path(), 4, |seq, count| {
            seen.push((seq.to_vec(), count));
            Ok(())
        })
        .unwrap();

        assert_eq!(stats.lines, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.malformed, 2);
        assert_eq!(seen, vec![(b"AACG".to_vec(), 3), (b"AACT".to_vec(), 7)]);
    }

    #[test]
    fn test_read_gzipped_list() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let file = tempfile::Builder::new().suffix(".tsv.gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        writeln!(encoder, "AACG\t3").unwrap();
        writeln!(encoder, "AACT\t7").unwrap();
        encoder.finish().unwrap();

        let mut seen = Vec::new();
        let stats = read_kmer_list(file.path(), 4, |seq, count| {
            seen.push((seq.to_vec(), count));
            Ok(())
        })
        .unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(seen, vec![(b"AACG".to_vec(), 3), (b"AACT".to_vec(), 7)]);
    }
}
