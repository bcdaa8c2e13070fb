//! JSON run configuration.
//!
//! ```json
//! {
//!     "data_file": "ratings.tsv",
//!     "num_folds": 5,
//!     "split_mode": "timestamp",
//!     "algorithms": [
//!         {"kind": "global_mean"},
//!         {"id": "damped", "kind": "item_mean", "params": {"damping": 5.0}}
//!     ]
//! }
//! ```
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use super::algorithms::{AlgorithmConfig, AlgorithmRegistry};
use tracing::info;

use super::data::RatingData;
use super::evaluator::{CrossfoldEvaluator, EvalContext, EvalSummary};
use super::sink::CsvFileSink;
use super::split::{ProfileSplitter, SplitMode};
use super::EvalError;

fn default_delimiter() -> String {
    "\t".to_owned()
}

fn default_output_file() -> PathBuf {
    PathBuf::from("crossfold.csv")
}

fn default_num_folds() -> usize {
    5
}

fn default_holdout_fraction() -> f64 {
    0.333333
}

fn default_split_mode() -> String {
    SplitMode::Random.to_string()
}

/// Parameters of one evaluation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalConfig {
    /// Delimited rating file: `user item rating [timestamp]` per line.
    pub data_file: PathBuf,
    /// Field separator of the rating file. Must be a single byte; `::` and
    /// other multi-character separators are rejected.
    #[serde(default = "default_delimiter")]
    pub input_delimiter: String,
    /// Destination of the CSV results.
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    /// Number of folds.
    #[serde(default = "default_num_folds")]
    pub num_folds: usize,
    /// Fraction of each test user's ratings withheld.
    #[serde(default = "default_holdout_fraction")]
    pub holdout_fraction: f64,
    /// `random` or `timestamp`, in any case.
    #[serde(default = "default_split_mode")]
    pub split_mode: String,
    /// Seed for profile splitting and fold assignment.
    #[serde(default)]
    pub seed: u64,
    /// Number of units evaluated concurrently.
    #[serde(default = "rayon::current_num_threads")]
    pub num_threads: usize,
    /// Algorithms to evaluate, in order.
    #[serde(default)]
    pub algorithms: Vec<AlgorithmConfig>,
}

impl EvalConfig {
    /// A configuration with default settings and no algorithms.
    pub fn new<P: Into<PathBuf>>(data_file: P) -> Self {
        EvalConfig {
            data_file: data_file.into(),
            input_delimiter: default_delimiter(),
            output_file: default_output_file(),
            num_folds: default_num_folds(),
            holdout_fraction: default_holdout_fraction(),
            split_mode: default_split_mode(),
            seed: 0,
            num_threads: rayon::current_num_threads(),
            algorithms: Vec::new(),
        }
    }

    /// Read a configuration from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            EvalError::Io(io::Error::new(
                err.kind(),
                format!("cannot open config file {}: {}", path.display(), err),
            ))
        })?;

        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| EvalError::config(format!("invalid config file {}: {}", path.display(), err)))
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, EvalError> {
        serde_json::from_str(json).map_err(|err| EvalError::config(format!("invalid config: {}", err)))
    }

    /// The parsed split mode.
    pub fn split_mode(&self) -> Result<SplitMode, EvalError> {
        self.split_mode.parse()
    }

    /// The input delimiter as a byte.
    pub fn delimiter(&self) -> Result<u8, EvalError> {
        match self.input_delimiter.as_bytes() {
            &[byte] => Ok(byte),
            _ => Err(EvalError::config(format!(
                "input delimiter must be a single byte, got {:?}",
                self.input_delimiter
            ))),
        }
    }

    /// Check every run parameter without touching the data.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.num_folds < 1 {
            return Err(EvalError::config("number of folds must be at least 1"));
        }

        if self.num_threads < 1 {
            return Err(EvalError::config("number of threads must be at least 1"));
        }

        if self.algorithms.is_empty() {
            return Err(EvalError::config("no algorithms to evaluate"));
        }

        for (idx, algorithm) in self.algorithms.iter().enumerate() {
            if self.algorithms[..idx]
                .iter()
                .any(|x| x.algorithm_id() == algorithm.algorithm_id())
            {
                return Err(EvalError::config(format!(
                    "duplicate algorithm id {:?}",
                    algorithm.algorithm_id()
                )));
            }
        }

        self.delimiter()?;
        self.splitter()?;

        Ok(())
    }

    /// Build the configured profile splitter.
    pub fn splitter(&self) -> Result<Box<dyn ProfileSplitter>, EvalError> {
        self.split_mode()?.splitter(self.holdout_fraction, self.seed)
    }

    /// Load the rating file.
    pub fn load_data(&self) -> Result<RatingData, EvalError> {
        RatingData::from_path(&self.data_file, self.delimiter()?)
    }

    /// Validate the configuration and build the evaluator, resolving
    /// algorithm kinds through `registry`.
    pub fn build_evaluator(&self, registry: &AlgorithmRegistry) -> Result<CrossfoldEvaluator, EvalError> {
        self.validate()?;

        let algorithms = registry.build_all(&self.algorithms)?;

        Ok(CrossfoldEvaluator::new(algorithms, self.num_folds, self.splitter()?)
            .seed(self.seed)
            .num_threads(self.num_threads))
    }

    /// Run the configured evaluation end to end, writing results to
    /// `output_file`.
    ///
    /// The output file is only replaced once every result has been written;
    /// any error leaves an existing file as it was.
    pub fn run(&self, registry: &AlgorithmRegistry, context: EvalContext) -> Result<EvalSummary, EvalError> {
        let mut evaluator = self.build_evaluator(registry)?.context(context);

        let data = self.load_data()?;
        info!(ratings = data.len(), users = data.num_users(), "loaded ratings");

        let mut sink = CsvFileSink::new(&self.output_file);
        evaluator.run(&data, &mut sink)
    }
}
