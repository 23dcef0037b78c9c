//! Build configuration.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for building a splitting k-mer index
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// K-mer length; the input list holds (k+1)-mers
    pub k: usize,
    /// Read-error floor for splitting detection and direct relation acceptance
    pub minimum_frequency: u64,
    /// Prefix length of the pre-filter automaton (None = ceil((k+1)/2))
    pub automaton_kmer_size: Option<usize>,
    /// Memory ceiling in bytes for all workers together
    pub maximum_memory: u64,
    /// Upper bound on concurrently running workers
    pub maximum_processes: usize,
    /// Keep intermediate spill files for inspection
    pub keep_temporary_files: bool,
    /// Directory for intermediate files (None = system temp)
    pub temp_dir: Option<PathBuf>,
    /// Target number of k-mers per partition (None = ceil(N^(2/3)))
    pub partition_size: Option<usize>,
    /// Reads per queued batch
    pub batch_size: usize,
    /// Number of disk buckets for spilled intermediates
    pub num_buckets: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            k: 31,
            minimum_frequency: 2,
            automaton_kmer_size: None,
            maximum_memory: detect_system_ram(),
            maximum_processes: num_cpus::get(),
            keep_temporary_files: false,
            temp_dir: None,
            partition_size: None,
            batch_size: 4096,
            num_buckets: 64,
        }
    }
}

impl IndexConfig {
    /// Configuration with the given k and defaults for everything else
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective prefix length of the pre-filter automaton
    pub fn automaton_size(&self) -> usize {
        self.automaton_kmer_size.unwrap_or((self.k + 2) / 2)
    }

    /// Effective partition size for `total_nodes` k-mers
    ///
    /// The default is a size, not a count: partitions of `ceil(N^(2/3))`
    /// nodes, so a graph splits into about `N^(1/3)` of them. Tiny components
    /// are packed up to this size and larger ones split into
    /// `remaining / size` parts.
    pub fn partition_size_for(&self, total_nodes: usize) -> usize {
        match self.partition_size {
            Some(size) => size.max(1),
            None => {
                let root = (total_nodes as f64).cbrt();
                ((root * root - 1e-9).ceil() as usize).max(1)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k < 3 {
            return Err(IndexError::InvalidConfig(format!("k must be >= 3, got {}", self.k)));
        }
        let a = self.automaton_size();
        if a == 0 || a > self.k || a > 32 {
            return Err(IndexError::InvalidConfig(format!(
                "automaton k-mer size {} must be in 1..={}",
                a,
                self.k.min(32)
            )));
        }
        if self.minimum_frequency == 0 {
            return Err(IndexError::InvalidConfig("minimum frequency must be >= 1".into()));
        }
        if self.maximum_processes == 0 {
            return Err(IndexError::InvalidConfig("maximum processes must be >= 1".into()));
        }
        if self.batch_size == 0 || self.num_buckets == 0 {
            return Err(IndexError::InvalidConfig("batch size and bucket count must be >= 1".into()));
        }
        Ok(())
    }
}

fn detect_system_ram() -> u64 {
    if let Ok(contents) = fs::read_to_string("/proc/meminfo") {
        for line in contents.lines() {
            if line.starts_with("MemTotal:") {
                if let Some(kb) = line.split_whitespace().nth(1) {
                    if let Ok(kb) = kb.parse::<u64>() {
                        return kb * 1024;
                    }
                }
            }
        }
    }
    16 * 1024 * 1024 * 1024 // Default 16 GB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_automaton_size() {
        let config = IndexConfig::with_k(31);
        assert_eq!(config.automaton_size(), 16);
        let config = IndexConfig::with_k(4);
        assert_eq!(config.automaton_size(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = IndexConfig::with_k(31);
        assert!(config.validate().is_ok());

        config.minimum_frequency = 0;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::with_k(31);
        config.automaton_kmer_size = Some(40);
        assert!(config.validate().is_err());

        let config = IndexConfig::with_k(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partition_size() {
        let config = IndexConfig::with_k(31);
        assert_eq!(config.partition_size_for(1000), 100);
        assert_eq!(config.partition_size_for(0), 1);

        let config = IndexConfig {
            partition_size: Some(7),
            ..IndexConfig::with_k(31)
        };
        assert_eq!(config.partition_size_for(1000), 7);
    }

    #[test]
    fn test_json_round_trip_with_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"k": 21, "minimum_frequency": 3}"#).unwrap();

        let config = IndexConfig::from_json_file(&path).unwrap();
        assert_eq!(config.k, 21);
        assert_eq!(config.minimum_frequency, 3);
        assert_eq!(config.batch_size, 4096);
    }
}
