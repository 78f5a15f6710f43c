use sled::transaction::TransactionError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("username is already taken")]
    DuplicateUsername,

    #[error("wrong credentials")]
    InvalidCredential,

    #[error("{0}")]
    Validation(String),

    #[error("user does not exist: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("storage call timed out")]
    Timeout,

    #[error("storage task was canceled")]
    Canceled,
}

impl Error {
    /// Errors whose detail must stay on the server.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Codec(_) | Error::Hash(_) | Error::Timeout | Error::Canceled
        )
    }
}

impl From<TransactionError<Error>> for Error {
    fn from(err: TransactionError<Error>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => Error::Storage(err),
        }
    }
}
