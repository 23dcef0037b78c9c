mod cli_main;

use anyhow::{bail, Context};
use clap::Parser;
use cli_main::{Cli, Commands};
use rayon::ThreadPoolBuilder;
use serde_json::json;
use splitmer::{IndexBuilder, IndexConfig, IndexError, ReadInputs, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

/// Interrupt handler body: ask the running build to stop
fn on_interrupt(cancel: &AtomicBool) {
    if !cancel.swap(true, Ordering::Relaxed) {
        warn!("Interrupt received, stopping the build");
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting tracing default failed")?;

    match cli.command {
        Commands::Build {
            kmers,
            unpaired,
            mate1,
            mate2,
            output,
            config,
            k,
            min_frequency,
            automaton_size,
            max_memory_gb,
            threads,
            partition_size,
            temp_dir,
            keep_temp,
        } => {
            if mate1.len() != mate2.len() {
                bail!("got {} mate 1 files but {} mate 2 files", mate1.len(), mate2.len());
            }
            let mut config = match config {
                Some(path) => IndexConfig::from_json_file(&path).with_context(|| format!("loading config {:?}", path))?,
                None => IndexConfig::default(),
            };
            if let Some(k) = k {
                config.k = k;
            }
            if let Some(f) = min_frequency {
                config.minimum_frequency = f;
            }
            if automaton_size.is_some() {
                config.automaton_kmer_size = automaton_size;
            }
            if let Some(gb) = max_memory_gb {
                config.maximum_memory = (gb * 1e9) as u64;
            }
            if let Some(t) = threads {
                config.maximum_processes = t;
            }
            if partition_size.is_some() {
                config.partition_size = partition_size;
            }
            if temp_dir.is_some() {
                config.temp_dir = temp_dir;
            }
            config.keep_temporary_files |= keep_temp;
            config.validate()?;

            ThreadPoolBuilder::new()
                .num_threads(config.maximum_processes)
                .build_global()
                .context("failed to build thread pool")?;

            let inputs = ReadInputs {
                unpaired,
                paired: mate1.into_iter().zip(mate2).collect(),
            };
            let builder = IndexBuilder::new(config);
            let cancel = builder.cancel_flag();
            ctrlc::set_handler(move || on_interrupt(&cancel)).context("failed to install interrupt handler")?;

            let start = std::time::Instant::now();
            match builder.build(&kmers, &inputs, &output) {
                Ok(_) => {}
                Err(IndexError::Cancelled) => bail!("build interrupted, no index written"),
                Err(e) => return Err(e.into()),
            }
            info!("Index written to {:?} in {:.2}s", output, start.elapsed().as_secs_f32());
        }

        Commands::Info { store } => {
            let store = Store::open(&store).with_context(|| format!("opening store {:?}", store))?;
            println!("{}", serde_json::to_string_pretty(store.attributes())?);
        }

        Commands::Lookup { store, sequence } => {
            let store = Store::open(&store).with_context(|| format!("opening store {:?}", store))?;
            let seq = sequence.to_ascii_uppercase().into_bytes();
            let report = if seq.len() + 1 == store.k() {
                let Some(link) = store.base_link(&seq) else {
                    bail!("{} is not a stored base", sequence);
                };
                json!({ "base": store.base(link) })
            } else {
                let Some(link) = store.kmer_link(&seq)? else {
                    bail!("{} is not a splitting k-mer of this store", sequence);
                };
                json!({
                    "ckmer": store.kmer(link),
                    "direct": store.direct_relations(link),
                    "cycles": store.cycles().into_iter().filter(|(l, _)| *l == link).map(|(_, s)| s).collect::<Vec<_>>(),
                    "reversals": store.reversals().into_iter().filter(|(l, _)| *l == link).map(|(_, s)| s).collect::<Vec<_>>(),
                    "connected": store.connected_sets_of(link),
                    "paired": store.paired(link),
                })
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_interrupt_cancels_build_and_removes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("kmers.tsv");
        std::fs::File::create(&list).unwrap().write_all(b"AACGA\t5\nAACGT\t3\n").unwrap();
        let config = IndexConfig {
            temp_dir: Some(dir.path().join("tmp")),
            ..IndexConfig::with_k(4)
        };
        let builder = IndexBuilder::new(config);
        let cancel = builder.cancel_flag();
        on_interrupt(&cancel);
        on_interrupt(&cancel);
        assert!(cancel.load(Ordering::Relaxed));

        let output = dir.path().join("index.smi");
        let result = builder.build(&list, &ReadInputs::default(), &output);
        assert!(matches!(result, Err(IndexError::Cancelled)));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }
}
