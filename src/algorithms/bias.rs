//! Baseline predictor combining a global mean with damped item and user biases.
//!
//! The prediction for user `u` and item `i` is
//! ```text
//! r(u, i) = mu + b_i + b_u
//! b_i = sum(r(v, i) - mu) / (n_i + damping)
//! b_u = sum(r(u, j) - mu - b_j) / (n_u + damping)
//! ```
//! Users and items absent from the training data have a bias of zero.
use std::collections::HashMap;

use super::mean::sums_and_counts;
use super::{check_damping, check_finite, Algorithm, Model};
use crate::data::Ratings;
use crate::{AlgorithmError, ItemId, PredictionError, UserId};

/// Hyperparameters describing the bias model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hyperparameters {
    #[serde(default = "default_damping")]
    damping: f64,
}

fn default_damping() -> f64 {
    25.0
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            damping: default_damping(),
        }
    }
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the damping applied to both item and user biases.
    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Build the bias model.
    pub fn build<T: Into<String>>(self, id: T) -> Result<UserItemBias, AlgorithmError> {
        check_damping(self.damping).map_err(AlgorithmError::Training)?;

        Ok(UserItemBias {
            id: id.into(),
            hyper: self,
        })
    }
}

/// Global mean plus item and user biases.
#[derive(Clone, Debug)]
pub struct UserItemBias {
    id: String,
    hyper: Hyperparameters,
}

struct BiasModel {
    global_mean: f64,
    item_biases: HashMap<ItemId, f64>,
    user_biases: HashMap<UserId, f64>,
}

impl Model for BiasModel {
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Result<f64, PredictionError> {
        let item_bias = self.item_biases.get(&item_id).cloned().unwrap_or(0.0);
        let user_bias = self.user_biases.get(&user_id).cloned().unwrap_or(0.0);

        check_finite(self.global_mean + item_bias + user_bias)
    }
}

impl Algorithm for UserItemBias {
    fn id(&self) -> &str {
        &self.id
    }

    fn train(&self, ratings: &Ratings) -> Result<Box<dyn Model>, AlgorithmError> {
        let global_mean = ratings
            .mean()
            .ok_or_else(|| AlgorithmError::InsufficientData("no training ratings".to_owned()))?;
        let damping = self.hyper.damping;

        let item_biases: HashMap<ItemId, f64> =
            sums_and_counts(ratings, |x| x.item_id(), |_| global_mean)
                .into_iter()
                .map(|(item_id, (sum, count))| (item_id, sum / (count as f64 + damping)))
                .collect();

        let user_biases = sums_and_counts(
            ratings,
            |x| x.user_id(),
            |x| global_mean + item_biases.get(&x.item_id()).cloned().unwrap_or(0.0),
        )
        .into_iter()
        .map(|(user_id, (sum, count))| (user_id, sum / (count as f64 + damping)))
        .collect();

        Ok(Box::new(BiasModel {
            global_mean,
            item_biases,
            user_biases,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Rating;

    #[test]
    fn undamped_biases() {
        let ratings = Ratings::from(vec![
            Rating::new(0, 0, 4.0, None),
            Rating::new(0, 1, 2.0, None),
            Rating::new(1, 0, 4.0, None),
            Rating::new(1, 1, 2.0, None),
        ]);

        let model = Hyperparameters::new()
            .damping(0.0)
            .build("bias")
            .unwrap()
            .train(&ratings)
            .unwrap();

        assert_eq!(model.predict(0, 0).unwrap(), 4.0);
        assert_eq!(model.predict(1, 1).unwrap(), 2.0);
        // Unknown user and item fall back to the global mean.
        assert_eq!(model.predict(9, 9).unwrap(), 3.0);
    }

    #[test]
    fn damping_shrinks_toward_global_mean() {
        let ratings = Ratings::from(vec![
            Rating::new(0, 0, 5.0, None),
            Rating::new(1, 1, 1.0, None),
        ]);

        let undamped = Hyperparameters::new()
            .damping(0.0)
            .build("bias")
            .unwrap()
            .train(&ratings)
            .unwrap()
            .predict(2, 0)
            .unwrap();
        let damped = Hyperparameters::new()
            .build("bias")
            .unwrap()
            .train(&ratings)
            .unwrap()
            .predict(2, 0)
            .unwrap();

        assert_eq!(undamped, 5.0);
        assert!(damped > 3.0 && damped < undamped);
    }

    #[test]
    fn hyperparameters_from_json() {
        let hyper: Hyperparameters = serde_json::from_str(r#"{"damping": 5.0}"#).unwrap();
        assert_eq!(hyper.damping, 5.0);

        let hyper: Hyperparameters = serde_json::from_str("{}").unwrap();
        assert_eq!(hyper.damping, 25.0);

        assert!(serde_json::from_str::<Hyperparameters>(r#"{"dampening": 5.0}"#).is_err());
    }
}
