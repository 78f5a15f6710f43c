use crate::database::UserDb;
use crate::error::{Error, Result};
use crate::model::User;
use std::sync::Arc;

/// Owns the password verifiers. Raw passwords never leave this module.
#[derive(Clone)]
pub struct CredentialStore {
    db: sled::Db,
    cost: u32,
    // Verified against when the username is unknown, so both failure paths cost one bcrypt run.
    decoy: Arc<String>,
}

impl CredentialStore {
    pub fn new(db: sled::Db, cost: u32) -> Result<Self> {
        let decoy = bcrypt::hash("decoy credential", cost)?;
        Ok(CredentialStore {
            db,
            cost,
            decoy: Arc::new(decoy),
        })
    }

    pub fn create_user(&self, username: &str, email: &str, raw_password: &str) -> Result<User> {
        let user = User {
            username: username.to_owned(),
            email: email.to_owned(),
            ratings: Vec::new(),
        };
        let credential = bcrypt::hash(raw_password, self.cost)?;
        match self.db.add_user(&user, &credential)? {
            Some(id) => {
                log::debug!("created user {} with id {}", username, id);
                Ok(user)
            }
            None => Err(Error::DuplicateUsername),
        }
    }

    pub fn verify_credential(&self, username: &str, raw_password: &str) -> Result<User> {
        let stored = match self.db.get_user_by_username(username)? {
            Some((id, user)) => self.db.get_credential(id)?.map(|credential| (user, credential)),
            None => None,
        };
        match stored {
            Some((user, credential)) => {
                if bcrypt::verify(raw_password, &credential)? {
                    Ok(user)
                } else {
                    Err(Error::InvalidCredential)
                }
            }
            None => {
                let _ = bcrypt::verify(raw_password, &self.decoy);
                Err(Error::InvalidCredential)
            }
        }
    }
}
