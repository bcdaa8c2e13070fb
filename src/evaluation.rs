//! Evaluation of a single algorithm on a single fold.
use std::fmt;
use std::slice;

use serde::{Serialize, Serializer};
use tracing::debug;

use super::algorithms::{Algorithm, Model};
use super::data::Rating;
use super::folds::Fold;
use super::{AlgorithmError, ItemId, PredictionError, UserId};

/// Marker written in place of a predicted value the model could not produce.
pub const UNPREDICTABLE: &str = "NA";

/// A predicted rating.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Prediction {
    /// The model's score.
    Value(f64),
    /// The model has no prediction for this user and item.
    Unpredictable,
}

impl Prediction {
    /// The predicted value, if any.
    pub fn value(&self) -> Option<f64> {
        match *self {
            Prediction::Value(value) => Some(value),
            Prediction::Unpredictable => None,
        }
    }
}

impl Serialize for Prediction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Prediction::Value(value) => serializer.serialize_f64(value),
            Prediction::Unpredictable => serializer.serialize_str(UNPREDICTABLE),
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Prediction::Value(value) => write!(f, "{}", value),
            Prediction::Unpredictable => write!(f, "{}", UNPREDICTABLE),
        }
    }
}

/// One prediction for one withheld rating.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultRow {
    /// Fold the rating was withheld in.
    pub fold_index: usize,
    /// Algorithm that made the prediction.
    pub algorithm_id: String,
    /// Rating user.
    pub user_id: UserId,
    /// Rated item.
    pub item_id: ItemId,
    /// Withheld rating value.
    pub actual_value: f64,
    /// Predicted rating value.
    pub predicted_value: Prediction,
}

/// Train `algorithm` on the fold's training ratings and return the
/// predictions for the fold's test ratings.
///
/// Training happens before this returns; predictions are computed lazily as
/// the returned iterator is consumed, in test set order.
pub fn evaluate<'a>(fold: &'a Fold, algorithm: &'a dyn Algorithm) -> Result<UnitResults<'a>, AlgorithmError> {
    let model = algorithm.train(fold.train())?;

    debug!(
        fold = fold.index(),
        algorithm = algorithm.id(),
        train_ratings = fold.train().len(),
        "trained model"
    );

    Ok(UnitResults {
        fold_index: fold.index(),
        algorithm_id: algorithm.id(),
        model,
        test: fold.test().iter(),
        failed: false,
    })
}

/// Predictions of a trained model for a fold's test ratings.
///
/// Yields one row per test rating. A model failure yields a single error
/// and ends the sequence.
pub struct UnitResults<'a> {
    fold_index: usize,
    algorithm_id: &'a str,
    model: Box<dyn Model>,
    test: slice::Iter<'a, Rating>,
    failed: bool,
}

impl<'a> UnitResults<'a> {
    /// Number of rows still to be produced.
    pub fn remaining(&self) -> usize {
        if self.failed {
            0
        } else {
            self.test.len()
        }
    }

    fn row(&self, rating: &Rating, predicted_value: Prediction) -> ResultRow {
        ResultRow {
            fold_index: self.fold_index,
            algorithm_id: self.algorithm_id.to_owned(),
            user_id: rating.user_id(),
            item_id: rating.item_id(),
            actual_value: rating.value(),
            predicted_value,
        }
    }
}

impl<'a> Iterator for UnitResults<'a> {
    type Item = Result<ResultRow, AlgorithmError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let rating = self.test.next()?;

        let prediction = match self.model.predict(rating.user_id(), rating.item_id()) {
            Ok(value) if value.is_finite() => Prediction::Value(value),
            Ok(_) | Err(PredictionError::InvalidPredictionValue) => Prediction::Unpredictable,
            Err(PredictionError::UnknownUser(_)) | Err(PredictionError::UnknownItem(_)) => {
                Prediction::Unpredictable
            }
            Err(PredictionError::Failed(message)) => {
                self.failed = true;
                return Some(Err(AlgorithmError::Prediction(format!(
                    "user {}, item {}: {}",
                    rating.user_id(),
                    rating.item_id(),
                    message
                ))));
            }
        };

        Some(Ok(self.row(rating, prediction)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
