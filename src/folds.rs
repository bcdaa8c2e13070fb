//! Partitioning users into cross-validation folds.
use std::collections::HashMap;
use std::hash::Hasher;

use siphasher::sip::SipHasher;
use tracing::debug;

use super::data::{Ratings, RatingStore};
use super::split::ProfileSplitter;
use super::{EvalError, UserId};

/// One cross-validation fold.
///
/// The test set holds the withheld ratings of the fold's test users; the
/// train set holds everything else.
#[derive(Clone, Debug)]
pub struct Fold {
    index: usize,
    test_users: Vec<UserId>,
    train: Ratings,
    test: Ratings,
}

impl Fold {
    /// Position of the fold in the run, starting at zero.
    pub fn index(&self) -> usize {
        self.index
    }
    /// Users whose profiles were split in this fold.
    pub fn test_users(&self) -> &[UserId] {
        &self.test_users
    }
    /// Training ratings.
    pub fn train(&self) -> &Ratings {
        &self.train
    }
    /// Withheld ratings.
    pub fn test(&self) -> &Ratings {
        &self.test
    }

    #[cfg(test)]
    pub(crate) fn for_tests(index: usize, train: Ratings, test: Ratings) -> Self {
        let mut test_users: Vec<UserId> = test.iter().map(|x| x.user_id()).collect();
        test_users.sort();
        test_users.dedup();

        Fold {
            index,
            test_users,
            train,
            test,
        }
    }
}

/// Assigns users to folds and assembles each fold's train and test sets.
///
/// Users are ordered by a keyed hash of their id and dealt round-robin into
/// groups, so group sizes differ by at most one and the assignment does not
/// depend on the order users are supplied in.
#[derive(Clone, Debug)]
pub struct FoldGenerator {
    num_folds: usize,
    seed: u64,
}

impl FoldGenerator {
    /// Build a generator producing `num_folds` folds.
    pub fn new(num_folds: usize, seed: u64) -> Self {
        FoldGenerator { num_folds, seed }
    }

    /// Number of folds generated.
    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    fn user_key(&self, user_id: UserId) -> u64 {
        let mut hasher = SipHasher::new_with_keys(self.seed, 0xf01d);
        hasher.write_usize(user_id);
        hasher.finish()
    }

    /// Partition users into `num_folds` disjoint groups of near-equal size.
    pub fn partition(&self, users: &[UserId]) -> Result<Vec<Vec<UserId>>, EvalError> {
        let mut users = users.to_owned();
        users.sort();
        users.dedup();

        if self.num_folds < 1 {
            return Err(EvalError::config("number of folds must be at least 1"));
        }

        if self.num_folds > users.len() {
            return Err(EvalError::config(format!(
                "cannot build {} folds from {} users",
                self.num_folds,
                users.len()
            )));
        }

        users.sort_by_key(|&user_id| (self.user_key(user_id), user_id));

        let mut groups = vec![Vec::with_capacity(users.len() / self.num_folds + 1); self.num_folds];

        for (idx, user_id) in users.into_iter().enumerate() {
            groups[idx % self.num_folds].push(user_id);
        }

        for group in &mut groups {
            group.sort();
        }

        Ok(groups)
    }

    /// Build the folds for `users`, splitting each test user's profile with `splitter`.
    ///
    /// Every profile is read from the store once and every user is split
    /// once, in the fold where it is a test user.
    pub fn generate<S: RatingStore + ?Sized>(
        &self,
        users: &[UserId],
        store: &S,
        splitter: &dyn ProfileSplitter,
    ) -> Result<Vec<Fold>, EvalError> {
        let groups = self.partition(users)?;

        let mut profiles = HashMap::with_capacity(users.len());
        let mut splits = HashMap::with_capacity(users.len());

        for user_id in groups.iter().flatten().cloned() {
            let profile = store.user_profile(user_id)?;
            splits.insert(user_id, splitter.split(&profile)?);
            profiles.insert(user_id, profile);
        }

        let folds: Vec<Fold> = groups
            .iter()
            .enumerate()
            .map(|(index, test_users)| {
                let mut train = Ratings::new();
                let mut test = Ratings::new();

                for (group_idx, group) in groups.iter().enumerate() {
                    for user_id in group {
                        if group_idx == index {
                            let (user_train, user_test) = &splits[user_id];
                            train.extend(user_train.iter().cloned());
                            test.extend(user_test.iter().cloned());
                        } else {
                            train.extend(profiles[user_id].ratings().iter().cloned());
                        }
                    }
                }

                debug!(
                    fold = index,
                    test_users = test_users.len(),
                    train_ratings = train.len(),
                    test_ratings = test.len(),
                    "generated fold"
                );

                Fold {
                    index,
                    test_users: test_users.clone(),
                    train,
                    test,
                }
            })
            .collect();

        Ok(folds)
    }
}
