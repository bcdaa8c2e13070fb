#![deny(missing_docs)]
//! # crossfold
//!
//! `crossfold` evaluates rating-prediction recommender algorithms by k-fold
//! cross-validation over per-user rating histories. The user population is
//! partitioned into folds; for every fold the users of that fold have a
//! fraction of their ratings withheld, each algorithm is trained on everything
//! else, and one result row is produced per withheld rating.
//!
//! ## Example
//!
//! ```rust
//! # extern crate crossfold;
//! use crossfold::algorithms::mean::ItemMean;
//! use crossfold::data::{Rating, RatingData};
//! use crossfold::evaluator::CrossfoldEvaluator;
//! use crossfold::sink::MemorySink;
//! use crossfold::split::RandomSplitter;
//!
//! let ratings: Vec<Rating> = (0..10)
//!     .flat_map(|user| (0..6).map(move |item| Rating::new(user, item, ((user + item) % 5) as f64, None)))
//!     .collect();
//! let data = RatingData::from(ratings);
//!
//! let splitter = RandomSplitter::new(0.5, 42).unwrap();
//! let mut evaluator = CrossfoldEvaluator::new(vec![Box::new(ItemMean::new("item-mean"))], 5, Box::new(splitter))
//!     .num_threads(1);
//!
//! let mut sink = MemorySink::new();
//! let summary = evaluator.run(&data, &mut sink).unwrap();
//!
//! // 10 users with 6 ratings each, 3 withheld per user.
//! assert_eq!(summary.rows_written, 30);
//! assert_eq!(sink.rows().len(), 30);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
extern crate csv;
extern crate rand;
extern crate rand_xorshift;
extern crate rayon;
extern crate serde;
extern crate serde_json;
extern crate siphasher;
extern crate tracing;

#[cfg(feature = "datasets")]
extern crate reqwest;

pub mod algorithms;
pub mod config;
pub mod data;
#[cfg(feature = "datasets")]
pub mod datasets;
pub mod evaluation;
pub mod evaluator;
pub mod folds;
pub mod sink;
pub mod split;

use std::io;

/// Alias for user identifiers.
pub type UserId = usize;
/// Alias for item identifiers.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Errors that abort an evaluation run.
///
/// Configuration and data errors surface before any result is written;
/// I/O errors on the rating store or the result sink are always fatal.
/// Algorithm errors only reach this type when they are not isolated to a
/// single evaluation unit.
#[derive(Debug, Fail)]
pub enum EvalError {
    /// Invalid run parameters.
    #[fail(display = "Configuration error: {}", _0)]
    Configuration(String),
    /// Malformed or insufficient rating data.
    #[fail(display = "Data error: {}", _0)]
    Data(String),
    /// Algorithm failure.
    #[fail(display = "Algorithm error: {}", _0)]
    Algorithm(#[cause] AlgorithmError),
    /// Rating store or result sink access failure.
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] io::Error),
}

impl EvalError {
    pub(crate) fn config<T: Into<String>>(message: T) -> Self {
        EvalError::Configuration(message.into())
    }

    pub(crate) fn data<T: Into<String>>(message: T) -> Self {
        EvalError::Data(message.into())
    }
}

impl From<io::Error> for EvalError {
    fn from(err: io::Error) -> Self {
        EvalError::Io(err)
    }
}

impl From<AlgorithmError> for EvalError {
    fn from(err: AlgorithmError) -> Self {
        EvalError::Algorithm(err)
    }
}

impl From<csv::Error> for EvalError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io_err) => EvalError::Io(io_err),
                other => EvalError::Data(format!("{:?}", other)),
            }
        } else {
            EvalError::Data(err.to_string())
        }
    }
}

/// Failure of a single (fold, algorithm) evaluation unit.
///
/// These never abort a run: they are recorded in the run summary and the
/// evaluator moves on to the next unit.
#[derive(Clone, Debug, Fail, PartialEq)]
pub enum AlgorithmError {
    /// The training set does not contain enough data to build a model.
    #[fail(display = "Insufficient training data: {}", _0)]
    InsufficientData(String),
    /// Training failed.
    #[fail(display = "Training failed: {}", _0)]
    Training(String),
    /// Prediction failed in a way that invalidates the model.
    #[fail(display = "Prediction failed: {}", _0)]
    Prediction(String),
}

/// Prediction error types.
///
/// All variants except `Failed` describe a single (user, item) pair the model
/// cannot score; those produce an unpredictable result row.
#[derive(Clone, Debug, Fail, PartialEq)]
pub enum PredictionError {
    /// The user was not present in the training data.
    #[fail(display = "Unknown user: {}", _0)]
    UnknownUser(UserId),
    /// The item was not present in the training data.
    #[fail(display = "Unknown item: {}", _0)]
    UnknownItem(ItemId),
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// The model is unusable.
    #[fail(display = "Prediction failed: {}", _0)]
    Failed(String),
}
