//! Rating records, per-user profiles and the rating store.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{EvalError, ItemId, Timestamp, UserId};

/// A single rating of an item by a user.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    user_id: UserId,
    item_id: ItemId,
    value: f64,
    timestamp: Option<Timestamp>,
}

impl Rating {
    /// Build a new rating.
    pub fn new(user_id: UserId, item_id: ItemId, value: f64, timestamp: Option<Timestamp>) -> Self {
        Rating {
            user_id,
            item_id,
            value,
            timestamp,
        }
    }

    /// The rating user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
    /// The rated item.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }
    /// The rating value.
    pub fn value(&self) -> f64 {
        self.value
    }
    /// When the rating was made, if known.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }
}

/// One user's ratings, ordered by timestamp when every rating carries one
/// and in ingestion order otherwise.
#[derive(Clone, Debug)]
pub struct UserProfile {
    user_id: UserId,
    ratings: Vec<Rating>,
}

impl UserProfile {
    /// Build a profile. Fails if any rating belongs to a different user.
    pub fn new(user_id: UserId, mut ratings: Vec<Rating>) -> Result<Self, EvalError> {
        if let Some(stray) = ratings.iter().find(|x| x.user_id() != user_id) {
            return Err(EvalError::data(format!(
                "rating by user {} in profile of user {}",
                stray.user_id(),
                user_id
            )));
        }

        if ratings.iter().all(|x| x.timestamp().is_some()) {
            // Stable, so equal timestamps keep ingestion order.
            ratings.sort_by_key(|x| x.timestamp());
        }

        Ok(UserProfile { user_id, ratings })
    }

    /// The profile owner.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The ordered ratings.
    pub fn ratings(&self) -> &[Rating] {
        &self.ratings
    }

    /// Number of ratings.
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    /// Whether the profile has no ratings.
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Consume the profile, returning its ratings.
    pub fn into_ratings(self) -> Vec<Rating> {
        self.ratings
    }
}

/// A set of ratings, used for the train and test halves of a fold.
#[derive(Clone, Debug, Default)]
pub struct Ratings {
    ratings: Vec<Rating>,
}

impl Ratings {
    /// Build an empty rating set.
    pub fn new() -> Self {
        Ratings {
            ratings: Vec::new(),
        }
    }

    /// The ratings in iteration order.
    pub fn data(&self) -> &[Rating] {
        &self.ratings
    }

    /// Number of ratings.
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Iterate over the ratings.
    pub fn iter(&self) -> std::slice::Iter<'_, Rating> {
        self.ratings.iter()
    }

    /// Append ratings to the set.
    pub fn extend<I: IntoIterator<Item = Rating>>(&mut self, ratings: I) {
        self.ratings.extend(ratings);
    }

    /// Mean rating value, or `None` for an empty set.
    pub fn mean(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            None
        } else {
            Some(self.ratings.iter().map(|x| x.value()).sum::<f64>() / self.ratings.len() as f64)
        }
    }
}

impl From<Vec<Rating>> for Ratings {
    fn from(ratings: Vec<Rating>) -> Ratings {
        Ratings { ratings }
    }
}

impl<'a> IntoIterator for &'a Ratings {
    type Item = &'a Rating;
    type IntoIter = std::slice::Iter<'a, Rating>;

    fn into_iter(self) -> Self::IntoIter {
        self.ratings.iter()
    }
}

/// Read-only access to rating data.
///
/// Implementations are shared between evaluation workers, so they must be
/// safe to query concurrently.
pub trait RatingStore: Sync {
    /// All users with at least one rating, in ascending id order.
    fn user_ids(&self) -> Result<Vec<UserId>, EvalError>;
    /// The rating history of a single user.
    fn user_profile(&self, user_id: UserId) -> Result<UserProfile, EvalError>;
    /// Iterate over every rating in the store.
    fn ratings<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Rating> + 'a>;
}

/// In-memory rating store. Ratings are grouped by user once, at construction.
#[derive(Clone, Debug)]
pub struct RatingData {
    ratings: Vec<Rating>,
    user_index: BTreeMap<UserId, Vec<usize>>,
}

impl RatingData {
    /// Load ratings from a delimited text file with lines of the form
    /// `user item rating [timestamp]`.
    pub fn from_path<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self, EvalError> {
        let file = File::open(path.as_ref()).map_err(|err| {
            EvalError::Io(std::io::Error::new(
                err.kind(),
                format!("cannot open {}: {}", path.as_ref().display(), err),
            ))
        })?;

        Self::from_reader(file, delimiter)
    }

    /// Load ratings from any reader in the delimited format of `from_path`.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, EvalError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut ratings = Vec::new();

        for record in reader.records() {
            let record = record?;
            let line = record.position().map(|x| x.line()).unwrap_or(0);

            if record.len() == 1 && record[0].is_empty() {
                continue;
            }

            if record.len() < 3 || record.len() > 4 {
                return Err(EvalError::data(format!(
                    "line {}: expected 3 or 4 fields, found {}",
                    line,
                    record.len()
                )));
            }

            let user_id = parse_field(&record[0], "user", line)?;
            let item_id = parse_field(&record[1], "item", line)?;
            let value: f64 = parse_field(&record[2], "rating", line)?;
            let timestamp = match record.get(3) {
                Some(field) if !field.is_empty() => Some(parse_field(field, "timestamp", line)?),
                _ => None,
            };

            if !value.is_finite() {
                return Err(EvalError::data(format!(
                    "line {}: rating value is not finite",
                    line
                )));
            }

            ratings.push(Rating::new(user_id, item_id, value, timestamp));
        }

        Ok(RatingData::from(ratings))
    }

    /// Number of ratings.
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    /// Whether the store holds no ratings.
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Number of distinct users.
    pub fn num_users(&self) -> usize {
        self.user_index.len()
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, name: &str, line: u64) -> Result<T, EvalError> {
    field
        .parse()
        .map_err(|_| EvalError::data(format!("line {}: invalid {} field {:?}", line, name, field)))
}

impl From<Vec<Rating>> for RatingData {
    fn from(ratings: Vec<Rating>) -> RatingData {
        let mut user_index: BTreeMap<UserId, Vec<usize>> = BTreeMap::new();

        for (idx, rating) in ratings.iter().enumerate() {
            user_index.entry(rating.user_id()).or_default().push(idx);
        }

        RatingData {
            ratings,
            user_index,
        }
    }
}

impl RatingStore for RatingData {
    fn user_ids(&self) -> Result<Vec<UserId>, EvalError> {
        Ok(self.user_index.keys().cloned().collect())
    }

    fn user_profile(&self, user_id: UserId) -> Result<UserProfile, EvalError> {
        let indices = self
            .user_index
            .get(&user_id)
            .ok_or_else(|| EvalError::data(format!("unknown user {}", user_id)))?;

        UserProfile::new(user_id, indices.iter().map(|&idx| self.ratings[idx]).collect())
    }

    fn ratings<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Rating> + 'a> {
        Box::new(self.ratings.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_orders_by_timestamp_keeping_ties_stable() {
        let ratings = vec![
            Rating::new(1, 10, 3.0, Some(5)),
            Rating::new(1, 11, 4.0, Some(2)),
            Rating::new(1, 12, 5.0, Some(5)),
            Rating::new(1, 13, 1.0, Some(1)),
        ];

        let profile = UserProfile::new(1, ratings).unwrap();
        let items: Vec<ItemId> = profile.ratings().iter().map(|x| x.item_id()).collect();

        assert_eq!(items, vec![13, 11, 10, 12]);
    }

    #[test]
    fn profile_without_timestamps_keeps_ingestion_order() {
        let ratings = vec![
            Rating::new(1, 10, 3.0, Some(5)),
            Rating::new(1, 11, 4.0, None),
            Rating::new(1, 12, 5.0, Some(1)),
        ];

        let profile = UserProfile::new(1, ratings).unwrap();
        let items: Vec<ItemId> = profile.ratings().iter().map(|x| x.item_id()).collect();

        assert_eq!(items, vec![10, 11, 12]);
    }

    #[test]
    fn profile_rejects_foreign_ratings() {
        let ratings = vec![Rating::new(1, 10, 3.0, None), Rating::new(2, 11, 4.0, None)];

        match UserProfile::new(1, ratings) {
            Err(EvalError::Data(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn load_tab_delimited() {
        let input = "1\t10\t4.0\t881250949\n1\t11\t3.5\t881250950\n2\t10\t2\n\n";
        let data = RatingData::from_reader(input.as_bytes(), b'\t').unwrap();

        assert_eq!(data.len(), 3);
        assert_eq!(data.num_users(), 2);
        assert_eq!(data.user_ids().unwrap(), vec![1, 2]);

        let profile = data.user_profile(2).unwrap();
        assert_eq!(profile.ratings(), &[Rating::new(2, 10, 2.0, None)]);
    }

    #[test]
    fn load_comma_delimited() {
        let input = "3,7,1.5,100\n3,8,2.5,50\n";
        let data = RatingData::from_reader(input.as_bytes(), b',').unwrap();

        let items: Vec<ItemId> = data
            .user_profile(3)
            .unwrap()
            .ratings()
            .iter()
            .map(|x| x.item_id())
            .collect();

        assert_eq!(items, vec![8, 7]);
    }

    #[test]
    fn malformed_line_is_a_data_error() {
        let input = "1\t10\t4.0\n1\tnope\t3.0\n";

        match RatingData::from_reader(input.as_bytes(), b'\t') {
            Err(EvalError::Data(message)) => assert!(message.contains("line 2")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        match RatingData::from_path("/nonexistent/ratings.tsv", b'\t') {
            Err(EvalError::Io(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn unknown_user_is_a_data_error() {
        let data = RatingData::from(vec![Rating::new(1, 1, 1.0, None)]);

        assert!(data.user_profile(1).is_ok());
        match data.user_profile(2) {
            Err(EvalError::Data(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn bulk_iteration_visits_every_rating() {
        let data = RatingData::from(vec![
            Rating::new(1, 1, 1.0, None),
            Rating::new(2, 1, 2.0, None),
            Rating::new(1, 2, 3.0, None),
        ]);

        let total: f64 = data.ratings().map(|x| x.value()).sum();

        assert_eq!(total, 6.0);
    }
}
