use crate::auth::AuthService;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::mail::Mailer;
use crate::ratings::RatingRepository;
use crate::search::SearchService;
use crate::session::SessionStore;
use actix_web::web;
use std::sync::Arc;
use std::time::Duration;

/// Services shared by all workers. Everything in here blocks on sled or
/// bcrypt, so handlers go through [`AppState::run`].
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub sessions: SessionStore,
    pub ratings: RatingRepository,
    pub search: SearchService,
    pub mailer: Arc<dyn Mailer>,
    store_timeout: Duration,
}

impl AppState {
    pub fn open(
        db: sled::Db,
        bcrypt_cost: u32,
        store_timeout: Duration,
        session_ttl: Duration,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self> {
        let credentials = CredentialStore::new(db.clone(), bcrypt_cost)?;
        Ok(AppState {
            auth: AuthService::new(db.clone(), credentials),
            sessions: SessionStore::open(&db, session_ttl)?,
            ratings: RatingRepository::new(db.clone()),
            search: SearchService::new(db),
            mailer,
            store_timeout,
        })
    }

    /// Runs `f` on the blocking pool, failing with [`Error::Timeout`] once the
    /// store timeout elapses. Writes inside `f` are transactional, so a call
    /// that is given up on either fully applies or not at all.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&AppState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        let task = web::block(move || f(&state));
        match actix_rt::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Canceled),
            Err(_) => Err(Error::Timeout),
        }
    }
}
