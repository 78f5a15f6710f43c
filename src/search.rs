use crate::database::UserDb;
use crate::error::Result;
use crate::model::Rating;
use serde::Serialize;

/// Key under which two movie names are considered equal: the trimmed,
/// lower-cased name with inner whitespace runs collapsed to one space.
pub fn match_key(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub username: String,
    pub rating: Rating,
}

#[derive(Clone)]
pub struct SearchService {
    db: sled::Db,
}

impl SearchService {
    pub fn new(db: sled::Db) -> Self {
        SearchService { db }
    }

    /// Scans every user's ratings. Hits come in user registration order and,
    /// per user, in insertion order.
    pub fn search_by_movie_name(&self, query: &str) -> Result<Vec<SearchHit>> {
        let key = match_key(query);
        if key.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits = Vec::new();
        for (_id, user) in self.db.users()? {
            let username = user.username;
            hits.extend(
                user.ratings
                    .into_iter()
                    .filter(|rating| match_key(&rating.name) == key)
                    .map(|rating| SearchHit {
                        username: username.clone(),
                        rating,
                    }),
            );
        }
        Ok(hits)
    }
}
