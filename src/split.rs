//! Splitting a single user's profile into train and test ratings.
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use siphasher::sip::SipHasher;

use super::data::{Rating, UserProfile};
use super::EvalError;

/// Splits a user profile into `(train, test)` ratings.
pub trait ProfileSplitter: Send + Sync {
    /// Fraction of each profile withheld for testing.
    fn holdout_fraction(&self) -> f64;
    /// Split the profile. The two halves are disjoint and together contain
    /// every rating of the profile.
    fn split(&self, profile: &UserProfile) -> Result<(Vec<Rating>, Vec<Rating>), EvalError>;
}

/// Number of ratings withheld from a profile of `num_ratings` ratings.
///
/// Profiles with fewer than two ratings are never split.
pub fn test_size(num_ratings: usize, holdout_fraction: f64) -> usize {
    if num_ratings < 2 {
        0
    } else {
        (holdout_fraction * num_ratings as f64).floor().max(0.0) as usize
    }
}

fn check_holdout_fraction(holdout_fraction: f64) -> Result<(), EvalError> {
    if (0.0..1.0).contains(&holdout_fraction) {
        Ok(())
    } else {
        Err(EvalError::config(format!(
            "holdout fraction must be in [0, 1), got {}",
            holdout_fraction
        )))
    }
}

/// Withholds a random subset of each profile.
///
/// The shuffle for a user depends only on the run seed and the user id, so
/// a profile splits identically regardless of the order users are processed in.
#[derive(Clone, Debug)]
pub struct RandomSplitter {
    holdout_fraction: f64,
    seed: u64,
}

impl RandomSplitter {
    /// Build a new random splitter.
    pub fn new(holdout_fraction: f64, seed: u64) -> Result<Self, EvalError> {
        check_holdout_fraction(holdout_fraction)?;

        Ok(RandomSplitter {
            holdout_fraction,
            seed,
        })
    }

    fn user_rng(&self, profile: &UserProfile) -> XorShiftRng {
        let mut hasher = SipHasher::new_with_keys(self.seed, 0x5eed);
        hasher.write_usize(profile.user_id());
        XorShiftRng::seed_from_u64(hasher.finish())
    }
}

impl ProfileSplitter for RandomSplitter {
    fn holdout_fraction(&self) -> f64 {
        self.holdout_fraction
    }

    fn split(&self, profile: &UserProfile) -> Result<(Vec<Rating>, Vec<Rating>), EvalError> {
        let num_test = test_size(profile.len(), self.holdout_fraction);
        let mut ratings = profile.ratings().to_owned();

        if num_test == 0 {
            return Ok((ratings, Vec::new()));
        }

        ratings.shuffle(&mut self.user_rng(profile));
        let train = ratings.split_off(num_test);

        Ok((train, ratings))
    }
}

/// Withholds the most recent ratings of each profile.
#[derive(Clone, Debug)]
pub struct TimestampSplitter {
    holdout_fraction: f64,
}

impl TimestampSplitter {
    /// Build a new timestamp splitter.
    pub fn new(holdout_fraction: f64) -> Result<Self, EvalError> {
        check_holdout_fraction(holdout_fraction)?;

        Ok(TimestampSplitter { holdout_fraction })
    }
}

impl ProfileSplitter for TimestampSplitter {
    fn holdout_fraction(&self) -> f64 {
        self.holdout_fraction
    }

    fn split(&self, profile: &UserProfile) -> Result<(Vec<Rating>, Vec<Rating>), EvalError> {
        if let Some(rating) = profile.ratings().iter().find(|x| x.timestamp().is_none()) {
            return Err(EvalError::data(format!(
                "rating of item {} by user {} has no timestamp",
                rating.item_id(),
                profile.user_id()
            )));
        }

        let mut ratings = profile.ratings().to_owned();
        ratings.sort_by_key(|x| x.timestamp());

        let num_test = test_size(ratings.len(), self.holdout_fraction);
        let test = ratings.split_off(ratings.len() - num_test);

        Ok((ratings, test))
    }
}

/// Profile splitting policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Random holdout.
    Random,
    /// Most-recent holdout.
    Timestamp,
}

impl SplitMode {
    /// Build the splitter for this mode.
    pub fn splitter(self, holdout_fraction: f64, seed: u64) -> Result<Box<dyn ProfileSplitter>, EvalError> {
        let splitter: Box<dyn ProfileSplitter> = match self {
            SplitMode::Random => Box::new(RandomSplitter::new(holdout_fraction, seed)?),
            SplitMode::Timestamp => Box::new(TimestampSplitter::new(holdout_fraction)?),
        };

        Ok(splitter)
    }
}

impl FromStr for SplitMode {
    type Err = EvalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "random" => Ok(SplitMode::Random),
            "timestamp" => Ok(SplitMode::Timestamp),
            _ => Err(EvalError::config(format!("Invalid split mode: {}", value))),
        }
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SplitMode::Random => write!(f, "random"),
            SplitMode::Timestamp => write!(f, "timestamp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::ItemId;

    fn profile(num_ratings: usize) -> UserProfile {
        let ratings = (0..num_ratings)
            .map(|idx| Rating::new(7, idx, (idx % 5) as f64 + 1.0, Some(1000 - idx)))
            .collect();

        UserProfile::new(7, ratings).unwrap()
    }

    fn item_ids(ratings: &[Rating]) -> Vec<ItemId> {
        let mut ids: Vec<_> = ratings.iter().map(|x| x.item_id()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn nine_ratings_at_one_third() {
        let splitter = RandomSplitter::new(0.333333, 42).unwrap();
        let (train, test) = splitter.split(&profile(9)).unwrap();

        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 7);
    }

    #[test]
    fn single_rating_is_never_held_out() {
        for &fraction in &[0.0, 0.5, 0.99] {
            let (train, test) = RandomSplitter::new(fraction, 1)
                .unwrap()
                .split(&profile(1))
                .unwrap();
            assert_eq!((train.len(), test.len()), (1, 0));

            let (train, test) = TimestampSplitter::new(fraction)
                .unwrap()
                .split(&profile(1))
                .unwrap();
            assert_eq!((train.len(), test.len()), (1, 0));
        }
    }

    #[test]
    fn invalid_holdout_fraction() {
        for &fraction in &[1.0, -0.1, 1.5, std::f64::NAN] {
            match RandomSplitter::new(fraction, 0) {
                Err(EvalError::Configuration(_)) => {}
                other => panic!("unexpected result: {:?}", other),
            }
            match TimestampSplitter::new(fraction) {
                Err(EvalError::Configuration(_)) => {}
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[test]
    fn timestamp_split_holds_out_most_recent() {
        // Timestamps decrease with the item id, so the most recent are the
        // lowest ids.
        let splitter = TimestampSplitter::new(0.5).unwrap();
        let (train, test) = splitter.split(&profile(6)).unwrap();

        assert_eq!(item_ids(&test), vec![0, 1, 2]);
        assert_eq!(item_ids(&train), vec![3, 4, 5]);
    }

    #[test]
    fn timestamp_split_breaks_ties_by_ingestion_order() {
        let ratings = vec![
            Rating::new(1, 10, 1.0, Some(5)),
            Rating::new(1, 11, 1.0, Some(9)),
            Rating::new(1, 12, 1.0, Some(9)),
            Rating::new(1, 13, 1.0, Some(9)),
        ];
        let profile = UserProfile::new(1, ratings).unwrap();

        let (train, test) = TimestampSplitter::new(0.5).unwrap().split(&profile).unwrap();

        assert_eq!(test.iter().map(|x| x.item_id()).collect::<Vec<_>>(), vec![12, 13]);
        assert_eq!(train.iter().map(|x| x.item_id()).collect::<Vec<_>>(), vec![10, 11]);
    }

    #[test]
    fn timestamp_split_requires_timestamps() {
        let ratings = vec![Rating::new(1, 10, 1.0, Some(5)), Rating::new(1, 11, 1.0, None)];
        let profile = UserProfile::new(1, ratings).unwrap();

        match TimestampSplitter::new(0.5).unwrap().split(&profile) {
            Err(EvalError::Data(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn random_split_depends_on_seed() {
        let data = profile(50);
        let splits: Vec<_> = (0..4)
            .map(|seed| {
                let (_, test) = RandomSplitter::new(0.2, seed).unwrap().split(&data).unwrap();
                item_ids(&test)
            })
            .collect();

        assert!(splits.iter().any(|x| x != &splits[0]));
    }

    #[test]
    fn split_mode_parsing() {
        assert_eq!("random".parse::<SplitMode>().unwrap(), SplitMode::Random);
        assert_eq!("TimeStamp".parse::<SplitMode>().unwrap(), SplitMode::Timestamp);

        match "recency".parse::<SplitMode>() {
            Err(EvalError::Configuration(message)) => assert!(message.contains("recency")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn split_sizes_and_disjointness(num_ratings in 0usize..60, fraction in 0.0f64..0.999, seed in any::<u64>()) {
            let data = profile(num_ratings);
            let splitters: Vec<Box<dyn ProfileSplitter>> = vec![
                Box::new(RandomSplitter::new(fraction, seed).unwrap()),
                Box::new(TimestampSplitter::new(fraction).unwrap()),
            ];

            for splitter in &splitters {
                let (train, test) = splitter.split(&data).unwrap();
                let expected = if num_ratings < 2 { 0 } else { (fraction * num_ratings as f64).floor() as usize };

                prop_assert_eq!(test.len(), expected);
                prop_assert_eq!(train.len(), num_ratings - expected);

                let mut all = item_ids(&train);
                all.extend(item_ids(&test));
                all.sort();
                prop_assert_eq!(all, (0..num_ratings).collect::<Vec<_>>());
            }
        }

        #[test]
        fn random_split_is_deterministic(num_ratings in 2usize..60, fraction in 0.0f64..0.999, seed in any::<u64>()) {
            let data = profile(num_ratings);
            let first = RandomSplitter::new(fraction, seed).unwrap().split(&data).unwrap();
            let second = RandomSplitter::new(fraction, seed).unwrap().split(&data).unwrap();

            prop_assert_eq!(first, second);
        }

        #[test]
        fn timestamp_test_set_is_most_recent(num_ratings in 2usize..60, fraction in 0.0f64..0.999) {
            let (train, test) = TimestampSplitter::new(fraction).unwrap().split(&profile(num_ratings)).unwrap();

            let newest_train = train.iter().filter_map(|x| x.timestamp()).max();
            let oldest_test = test.iter().filter_map(|x| x.timestamp()).min();

            if let (Some(newest_train), Some(oldest_test)) = (newest_train, oldest_test) {
                prop_assert!(newest_train <= oldest_test);
            }
        }
    }
}
