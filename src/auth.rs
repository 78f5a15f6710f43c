use crate::credentials::CredentialStore;
use crate::database::UserDb;
use crate::error::{Error, Result};
use crate::model::{Flash, User};
use crate::session::SessionContext;
use log::{debug, error};

#[derive(Clone)]
pub struct AuthService {
    credentials: CredentialStore,
    db: sled::Db,
}

fn internal_failure(session: &mut SessionContext, err: &Error) {
    error!("{:?}", err);
    session.set_flash(Flash::failure());
}

impl AuthService {
    pub fn new(db: sled::Db, credentials: CredentialStore) -> Self {
        AuthService { credentials, db }
    }

    /// Creates the user and logs the session in on success. Failures leave
    /// the session anonymous with a danger flash.
    pub fn register(
        &self,
        session: &mut SessionContext,
        username: &str,
        email: &str,
        raw_password: &str,
    ) -> Result<User> {
        let result = if username.is_empty() || raw_password.is_empty() {
            Err(Error::Validation("username and password are required".to_owned()))
        } else {
            self.credentials.create_user(username, email, raw_password)
        };
        match result {
            Ok(user) => {
                debug!("registered {}", user.username);
                session.authenticate(&user.username);
                session.set_flash(Flash::success("", "you are now registered!"));
                Ok(user)
            }
            Err(err) if err.is_internal() => {
                internal_failure(session, &err);
                Err(err)
            }
            Err(err) => {
                debug!("registration of {:?} rejected: {}", username, err);
                session.set_flash(Flash::danger("Error! ", "Oops please try again!"));
                Err(err)
            }
        }
    }

    pub fn login(
        &self,
        session: &mut SessionContext,
        username: &str,
        raw_password: &str,
    ) -> Result<User> {
        if username.is_empty() || raw_password.is_empty() {
            session.set_flash(Flash::danger(
                "Empty fields! ",
                "Please insert your credentials",
            ));
            return Err(Error::Validation("empty credentials".to_owned()));
        }
        match self.credentials.verify_credential(username, raw_password) {
            Ok(user) => {
                session.authenticate(&user.username);
                Ok(user)
            }
            Err(err) if err.is_internal() => {
                internal_failure(session, &err);
                Err(err)
            }
            Err(err) => {
                session.set_flash(Flash::danger(
                    "Error! ",
                    "Wrong credentials. Please try again!",
                ));
                Err(err)
            }
        }
    }

    pub fn logout(&self, session: &mut SessionContext) {
        session.clear();
    }

    /// Resolves the session principal to its user record. A principal whose
    /// record no longer exists is dropped from the session.
    pub fn current_principal(&self, session: &mut SessionContext) -> Result<Option<User>> {
        let username = match session.principal() {
            Some(username) => username.to_owned(),
            None => return Ok(None),
        };
        match self.db.get_user_by_username(&username)? {
            Some((_id, user)) => Ok(Some(user)),
            None => {
                debug!("session principal {} no longer exists", username);
                session.clear();
                Ok(None)
            }
        }
    }
}
