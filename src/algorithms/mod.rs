//! Algorithms module.
//!
//! An [`Algorithm`] is loaded once per run and trained once per fold; the
//! [`Model`] it returns belongs to that fold alone and is dropped when the
//! fold's evaluation finishes.
pub mod bias;
pub mod mean;
mod registry;

pub use self::registry::{AlgorithmConfig, AlgorithmFactory, AlgorithmRegistry};

use super::data::Ratings;
use super::{AlgorithmError, ItemId, PredictionError, UserId};

/// A trainable rating predictor.
pub trait Algorithm: Send + Sync {
    /// Identifier recorded in every result row.
    fn id(&self) -> &str;
    /// Build a model from the training ratings.
    fn train(&self, ratings: &Ratings) -> Result<Box<dyn Model>, AlgorithmError>;
}

/// A trained, fold-scoped model.
pub trait Model: Send {
    /// Predict the rating `user_id` would give `item_id`.
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Result<f64, PredictionError>;
}

fn check_finite(value: f64) -> Result<f64, PredictionError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PredictionError::InvalidPredictionValue)
    }
}

fn check_damping(damping: f64) -> Result<(), String> {
    if damping.is_finite() && damping >= 0.0 {
        Ok(())
    } else {
        Err(format!("damping must be finite and non-negative, got {}", damping))
    }
}
