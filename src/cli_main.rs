use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "splitmer", version, about = "Splitting k-mer relation index builder", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an index from a (k+1)-mer count list and FASTQ reads
    Build {
        /// Sorted (k+1)-mer count list, tab separated, optionally gzipped
        #[arg(long)]
        kmers: PathBuf,

        /// Unpaired FASTQ(.gz) input; may be repeated
        #[arg(short, long)]
        unpaired: Vec<PathBuf>,

        /// Mate 1 FASTQ(.gz) of a pair; repeat together with --mate2
        #[arg(short = '1', long)]
        mate1: Vec<PathBuf>,

        /// Mate 2 FASTQ(.gz) of a pair
        #[arg(short = '2', long)]
        mate2: Vec<PathBuf>,

        /// Output store path
        #[arg(short, long)]
        output: PathBuf,

        /// JSON configuration file; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// K-mer length (the list holds k+1-mers)
        #[arg(short)]
        k: Option<usize>,

        /// Read-error frequency floor
        #[arg(long)]
        min_frequency: Option<u64>,

        /// Prefix length of the pre-filter automaton
        #[arg(long)]
        automaton_size: Option<usize>,

        /// Memory ceiling in GB
        #[arg(long)]
        max_memory_gb: Option<f64>,

        /// Number of threads
        #[arg(long)]
        threads: Option<usize>,

        /// Target k-mers per partition
        #[arg(long)]
        partition_size: Option<usize>,

        /// Directory for intermediate files
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Keep intermediate files after the build
        #[arg(long)]
        keep_temp: bool,
    },

    /// Print the attributes of a store as JSON
    Info {
        /// Store path
        store: PathBuf,
    },

    /// Look up a splitting k-mer (or a base of length k-1) in a store
    Lookup {
        /// Store path
        store: PathBuf,

        /// Sequence in either orientation
        sequence: String,
    },
}
