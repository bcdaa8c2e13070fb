extern crate clap;
extern crate crossfold;
extern crate failure;
extern crate serde_json;
extern crate tracing;
extern crate tracing_subscriber;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crossfold::algorithms::AlgorithmRegistry;
use crossfold::config::EvalConfig;
use crossfold::evaluator::EvalContext;

/// Cross-validate rating predictors described by a JSON config file.
#[derive(Debug, Parser)]
#[command(name = "crossfold-eval", version)]
struct Args {
    /// Path to the JSON run configuration.
    #[arg(short, long)]
    config: PathBuf,
    /// Override the number of folds.
    #[arg(long)]
    num_folds: Option<usize>,
    /// Override the fraction of each test user's ratings withheld.
    #[arg(long)]
    holdout_fraction: Option<f64>,
    /// Override the split mode (`random` or `timestamp`).
    #[arg(long)]
    split_mode: Option<String>,
    /// Override the results file.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Override the number of worker threads.
    #[arg(long)]
    threads: Option<usize>,
    /// Override the seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Write the run summary as JSON to this file.
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut EvalConfig) {
        if let Some(num_folds) = self.num_folds {
            config.num_folds = num_folds;
        }
        if let Some(holdout_fraction) = self.holdout_fraction {
            config.holdout_fraction = holdout_fraction;
        }
        if let Some(ref split_mode) = self.split_mode {
            config.split_mode = split_mode.clone();
        }
        if let Some(ref output) = self.output {
            config.output_file = output.clone();
        }
        if let Some(threads) = self.threads {
            config.num_threads = threads;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
    }
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = EvalConfig::from_path(&args.config)?;
    args.apply(&mut config);

    let context = EvalContext::new(tracing::info_span!(
        "crossfold",
        config = %args.config.display()
    ));
    let summary = config.run(&AlgorithmRegistry::default(), context)?;
    info!(output = %config.output_file.display(), "wrote results");

    print!("{}", summary);

    if let Some(ref path) = args.summary {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &summary)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_config_values() {
        let args = Args::try_parse_from(&[
            "crossfold-eval",
            "--config",
            "run.json",
            "--num-folds",
            "3",
            "--split-mode",
            "timestamp",
            "-o",
            "out.csv",
            "--seed",
            "9",
        ])
        .unwrap();

        let mut config = EvalConfig::new("ratings.tsv");
        args.apply(&mut config);

        assert_eq!(config.num_folds, 3);
        assert_eq!(config.split_mode, "timestamp");
        assert_eq!(config.output_file, PathBuf::from("out.csv"));
        assert_eq!(config.seed, 9);
        assert_eq!(config.holdout_fraction, 0.333333);
    }

    #[test]
    fn config_is_required() {
        assert!(Args::try_parse_from(&["crossfold-eval"]).is_err());
    }
}
