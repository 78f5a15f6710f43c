use crate::database::UserDb;
use crate::error::{Error, Result};
use crate::model::{Rating, RatingInput, User};

pub const MAX_RATING: i64 = 10;

/// Owner-scoped access to the ratings embedded in each user record.
#[derive(Clone)]
pub struct RatingRepository {
    db: sled::Db,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

impl RatingRepository {
    pub fn new(db: sled::Db) -> Self {
        RatingRepository { db }
    }

    fn owner_id(&self, owner: &str) -> Result<u64> {
        self.db
            .get_user_id(owner)?
            .ok_or_else(|| Error::NotFound(owner.to_owned()))
    }

    pub fn add_rating(&self, owner: &str, input: RatingInput) -> Result<Rating> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("A movie name is required.".to_owned()));
        }
        if !(0..=MAX_RATING).contains(&input.rating) {
            return Err(Error::Validation(format!(
                "The rating must be between 0 and {}.",
                MAX_RATING
            )));
        }
        let score = input.rating as u8;

        let owner_id = self.owner_id(owner)?;
        let rating = Rating {
            id: self.db.generate_id()?,
            name: name.to_owned(),
            url: non_empty(input.url),
            rating: score,
            comment: non_empty(input.comment),
        };
        self.db
            .update_user(owner_id, |user| user.ratings.push(rating.clone()))?
            .ok_or_else(|| Error::NotFound(owner.to_owned()))?;
        Ok(rating)
    }

    /// Removing an id the owner does not have is a successful no-op; the
    /// returned flag tells whether anything was removed.
    pub fn remove_rating(&self, owner: &str, rating_id: u64) -> Result<bool> {
        let owner_id = self.owner_id(owner)?;
        self.db
            .update_user(owner_id, |user| {
                let before = user.ratings.len();
                user.ratings.retain(|rating| rating.id != rating_id);
                user.ratings.len() != before
            })?
            .ok_or_else(|| Error::NotFound(owner.to_owned()))
    }

    pub fn list_ratings(&self, owner: &str) -> Result<Vec<Rating>> {
        let owner_id = self.owner_id(owner)?;
        Ok(self
            .db
            .get_user(owner_id)?
            .map(|user| user.ratings)
            .unwrap_or_default())
    }

    /// Every user with their ratings, in registration order.
    pub fn list_users(&self) -> Result<Vec<User>> {
        Ok(self
            .db
            .users()?
            .into_iter()
            .map(|(_id, user)| user)
            .collect())
    }
}
