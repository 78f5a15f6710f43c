use log::{info, warn};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Value of `RATER_DATA_DIR` that selects a temporary store.
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub struct Config {
    pub bind: String,
    /// `None` opens a temporary store.
    pub data_dir: Option<PathBuf>,
    pub secret: Vec<u8>,
    pub bcrypt_cost: u32,
    pub store_timeout: Duration,
    /// Idle lifetime of a logged-in session.
    pub session_ttl: Duration,
    pub contact_address: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = load("RATER_DATA_DIR", "rater-data".to_owned())?;
        let secret = match env::var("RATER_SECRET") {
            Ok(secret) if secret.len() >= 32 => secret.into_bytes(),
            Ok(secret) => {
                return Err(ConfigError::Invalid {
                    key: "RATER_SECRET",
                    value: "<redacted>".to_owned(),
                    reason: format!("needs at least 32 bytes, got {}", secret.len()),
                })
            }
            Err(_) => {
                warn!("RATER_SECRET not set, sessions will not survive a restart");
                rand::random::<[u8; 32]>().to_vec()
            }
        };
        let bcrypt_cost = load("RATER_BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "RATER_BCRYPT_COST",
                value: bcrypt_cost.to_string(),
                reason: "must be between 4 and 31".to_owned(),
            });
        }

        Ok(Config {
            bind: load("RATER_BIND", "127.0.0.1:3000".to_owned())?,
            data_dir: if data_dir == IN_MEMORY {
                None
            } else {
                Some(PathBuf::from(data_dir))
            },
            secret,
            bcrypt_cost,
            store_timeout: Duration::from_millis(load("RATER_STORE_TIMEOUT_MS", 5000)?),
            session_ttl: Duration::from_secs(load(
                "RATER_SESSION_TTL_SECS",
                7 * 24 * 60 * 60,
            )?),
            contact_address: load("RATER_CONTACT", "contact@localhost".to_owned())?,
        })
    }
}

fn load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
            value,
        }),
        Err(_) => {
            info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
