//! Mean-based baseline predictors.
use std::collections::HashMap;

use super::{check_damping, check_finite, Algorithm, Model};
use crate::data::{Rating, Ratings};
use crate::{AlgorithmError, ItemId, PredictionError, UserId};

/// Predicts the mean of all training ratings.
#[derive(Clone, Debug)]
pub struct GlobalMean {
    id: String,
}

impl GlobalMean {
    /// Build a new global mean predictor.
    pub fn new<T: Into<String>>(id: T) -> Self {
        GlobalMean { id: id.into() }
    }
}

struct GlobalMeanModel {
    mean: f64,
}

impl Model for GlobalMeanModel {
    fn predict(&self, _: UserId, _: ItemId) -> Result<f64, PredictionError> {
        check_finite(self.mean)
    }
}

impl Algorithm for GlobalMean {
    fn id(&self) -> &str {
        &self.id
    }

    fn train(&self, ratings: &Ratings) -> Result<Box<dyn Model>, AlgorithmError> {
        let mean = ratings
            .mean()
            .ok_or_else(|| AlgorithmError::InsufficientData("no training ratings".to_owned()))?;

        Ok(Box::new(GlobalMeanModel { mean }))
    }
}

/// Hyperparameters of the item mean predictor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hyperparameters {
    #[serde(default)]
    damping: f64,
    #[serde(default)]
    fallback_to_global: bool,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            damping: 0.0,
            fallback_to_global: false,
        }
    }
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shrink item means toward the global mean as if each item had
    /// `damping` extra ratings at the global mean.
    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Predict the global mean for items absent from the training data
    /// instead of reporting them as unpredictable.
    pub fn fallback_to_global(mut self, fallback_to_global: bool) -> Self {
        self.fallback_to_global = fallback_to_global;
        self
    }

    /// Build the item mean predictor.
    pub fn build<T: Into<String>>(self, id: T) -> Result<ItemMean, AlgorithmError> {
        check_damping(self.damping).map_err(AlgorithmError::Training)?;

        Ok(ItemMean {
            id: id.into(),
            hyper: self,
        })
    }
}

/// Predicts the (optionally damped) mean rating of the item.
#[derive(Clone, Debug)]
pub struct ItemMean {
    id: String,
    hyper: Hyperparameters,
}

impl ItemMean {
    /// Build an undamped item mean predictor.
    pub fn new<T: Into<String>>(id: T) -> Self {
        ItemMean {
            id: id.into(),
            hyper: Hyperparameters::default(),
        }
    }
}

struct ItemMeanModel {
    global_mean: f64,
    item_means: HashMap<ItemId, f64>,
    fallback_to_global: bool,
}

impl Model for ItemMeanModel {
    fn predict(&self, _: UserId, item_id: ItemId) -> Result<f64, PredictionError> {
        match self.item_means.get(&item_id) {
            Some(&mean) => check_finite(mean),
            None if self.fallback_to_global => check_finite(self.global_mean),
            None => Err(PredictionError::UnknownItem(item_id)),
        }
    }
}

/// Per-key sums and counts of training ratings.
pub(crate) fn sums_and_counts<K, O>(ratings: &Ratings, key: K, offset: O) -> HashMap<usize, (f64, usize)>
where
    K: Fn(&Rating) -> usize,
    O: Fn(&Rating) -> f64,
{
    let mut totals: HashMap<usize, (f64, usize)> = HashMap::new();

    for rating in ratings {
        let entry = totals.entry(key(rating)).or_insert((0.0, 0));
        entry.0 += rating.value() - offset(rating);
        entry.1 += 1;
    }

    totals
}

impl Algorithm for ItemMean {
    fn id(&self) -> &str {
        &self.id
    }

    fn train(&self, ratings: &Ratings) -> Result<Box<dyn Model>, AlgorithmError> {
        let global_mean = ratings
            .mean()
            .ok_or_else(|| AlgorithmError::InsufficientData("no training ratings".to_owned()))?;
        let damping = self.hyper.damping;

        let item_means = sums_and_counts(ratings, |x| x.item_id(), |_| global_mean)
            .into_iter()
            .map(|(item_id, (sum, count))| (item_id, global_mean + sum / (count as f64 + damping)))
            .collect();

        Ok(Box::new(ItemMeanModel {
            global_mean,
            item_means,
            fallback_to_global: self.hyper.fallback_to_global,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings() -> Ratings {
        Ratings::from(vec![
            Rating::new(0, 0, 5.0, None),
            Rating::new(1, 0, 3.0, None),
            Rating::new(0, 1, 1.0, None),
            Rating::new(2, 2, 3.0, None),
        ])
    }

    #[test]
    fn global_mean() {
        let model = GlobalMean::new("global").train(&ratings()).unwrap();

        assert_eq!(model.predict(9, 9).unwrap(), 3.0);
    }

    #[test]
    fn empty_training_set() {
        assert_eq!(
            GlobalMean::new("global").train(&Ratings::new()).err(),
            Some(AlgorithmError::InsufficientData("no training ratings".to_owned()))
        );
        assert!(ItemMean::new("item").train(&Ratings::new()).is_err());
    }

    #[test]
    fn item_mean() {
        let model = ItemMean::new("item").train(&ratings()).unwrap();

        assert_eq!(model.predict(5, 0).unwrap(), 4.0);
        assert_eq!(model.predict(5, 1).unwrap(), 1.0);
        assert_eq!(model.predict(5, 7), Err(PredictionError::UnknownItem(7)));
    }

    #[test]
    fn damped_item_mean_with_fallback() {
        let model = Hyperparameters::new()
            .damping(2.0)
            .fallback_to_global(true)
            .build("item")
            .unwrap()
            .train(&ratings())
            .unwrap();

        // Item 0: global mean 3, offsets (2 + 0) / (2 + 2).
        assert_eq!(model.predict(5, 0).unwrap(), 3.5);
        assert_eq!(model.predict(5, 7).unwrap(), 3.0);
    }

    #[test]
    fn negative_damping_is_rejected() {
        assert!(Hyperparameters::new().damping(-1.0).build("item").is_err());
    }
}
