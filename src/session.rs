//! Server-side sessions.
//!
//! The client only holds an opaque token (inside the identity cookie); the
//! principal and the pending flash message are stored in the `sessions` tree.
//! Records carry the time they were last written and expire after the
//! configured idle time; sessions holding nothing but a flash expire sooner.

use crate::error::Result;
use crate::model::Flash;
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SESSIONS: &[u8] = b"sessions";

/// Idle lifetime of a session without a principal.
pub const FLASH_TTL_SECS: i64 = 10 * 60;

/// Active sessions are rewritten at most this often to refresh `last_seen`.
const TOUCH_INTERVAL_SECS: i64 = 60;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
struct SessionData {
    principal: Option<String>,
    flash: Option<Flash>,
    last_seen: i64,
}

impl SessionData {
    fn is_empty(&self) -> bool {
        self.principal.is_none() && self.flash.is_none()
    }
}

/// Per-request view of a session, passed explicitly into every operation.
#[derive(Debug, Default)]
pub struct SessionContext {
    token: Option<String>,
    data: SessionData,
    dirty: bool,
    rotate: bool,
}

/// What the handler has to do with the identity cookie after a commit.
#[derive(Debug, PartialEq)]
pub enum CookieAction {
    Keep,
    Remember(String),
    Forget,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        SessionContext::default()
    }

    pub fn principal(&self) -> Option<&str> {
        self.data.principal.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.data.principal.is_some()
    }

    /// Binds the session to `username` under a fresh token.
    pub fn authenticate(&mut self, username: &str) {
        self.data.principal = Some(username.to_owned());
        self.rotate = true;
        self.dirty = true;
    }

    /// Drops the principal and any pending flash. Idempotent.
    pub fn clear(&mut self) {
        if self.token.is_some() || !self.data.is_empty() {
            self.data = SessionData::default();
            self.rotate = true;
            self.dirty = true;
        }
    }

    pub fn set_flash(&mut self, flash: Flash) {
        self.data.flash = Some(flash);
        self.dirty = true;
    }

    pub fn flash(&self) -> Option<&Flash> {
        self.data.flash.as_ref()
    }

    pub fn take_flash(&mut self) -> Option<Flash> {
        let flash = self.data.flash.take();
        if flash.is_some() {
            self.dirty = true;
        }
        flash
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: sled::Tree,
    ttl: i64,
}

impl SessionStore {
    pub fn open(db: &sled::Db, ttl: Duration) -> Result<Self> {
        Ok(SessionStore {
            sessions: db.open_tree(SESSIONS)?,
            ttl: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        })
    }

    fn expired(&self, data: &SessionData, now: i64) -> bool {
        let ttl = if data.principal.is_some() {
            self.ttl
        } else {
            self.ttl.min(FLASH_TTL_SECS)
        };
        now.saturating_sub(data.last_seen) > ttl
    }

    /// Unknown, missing or expired tokens yield an anonymous session.
    pub fn load(&self, token: Option<&str>) -> Result<SessionContext> {
        self.load_at(token, now())
    }

    fn load_at(&self, token: Option<&str>, now: i64) -> Result<SessionContext> {
        let token = match token {
            Some(token) => token,
            None => return Ok(SessionContext::anonymous()),
        };
        let data: SessionData = match self.sessions.get(token)? {
            Some(data) => bincode::deserialize(&data)?,
            None => return Ok(SessionContext::anonymous()),
        };
        if self.expired(&data, now) {
            self.sessions.remove(token)?;
            // Cleared under the old token so that the commit forgets the cookie.
            return Ok(SessionContext {
                token: Some(token.to_owned()),
                data: SessionData::default(),
                dirty: true,
                rotate: true,
            });
        }
        let dirty = now - data.last_seen >= TOUCH_INTERVAL_SECS;
        Ok(SessionContext {
            token: Some(token.to_owned()),
            data,
            dirty,
            rotate: false,
        })
    }

    pub fn commit(&self, session: &mut SessionContext) -> Result<CookieAction> {
        self.commit_at(session, now())
    }

    fn commit_at(&self, session: &mut SessionContext, now: i64) -> Result<CookieAction> {
        if !session.dirty {
            return Ok(CookieAction::Keep);
        }
        let had_token = session.token.is_some();
        if session.rotate {
            if let Some(old) = session.token.take() {
                self.sessions.remove(old)?;
            }
        }
        session.dirty = false;
        session.rotate = false;

        if session.data.is_empty() {
            if let Some(token) = session.token.take() {
                self.sessions.remove(token)?;
            }
            return Ok(if had_token {
                CookieAction::Forget
            } else {
                CookieAction::Keep
            });
        }

        session.data.last_seen = now;
        let data = bincode::serialize(&session.data)?;
        if let Some(token) = session.token.as_deref() {
            self.sessions.insert(token, data)?;
            return Ok(CookieAction::Keep);
        }
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.as_str(), data)?;
        session.token = Some(token.clone());
        Ok(CookieAction::Remember(token))
    }

    /// Deletes every expired record and returns how many were removed.
    pub fn sweep(&self) -> Result<usize> {
        self.sweep_at(now())
    }

    fn sweep_at(&self, now: i64) -> Result<usize> {
        let mut removed = 0;
        for entry in self.sessions.iter() {
            let (token, value) = entry?;
            let stale = match bincode::deserialize::<SessionData>(&value) {
                Ok(data) => self.expired(&data, now),
                Err(err) => {
                    warn!("dropping undecodable session record: {}", err);
                    true
                }
            };
            // A concurrent commit may have refreshed the record since it was read.
            if stale
                && self
                    .sessions
                    .compare_and_swap(&token, Some(&value), None::<&[u8]>)?
                    .is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }
}
