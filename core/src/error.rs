use std::time::Duration;
use thiserror::Error;

/// Every way an engine operation can fail.
///
/// Storage-layer errors are classified into one of these kinds before they leave the crate, so
/// callers never see a raw [`sqlx::Error`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not enough items for comparison")]
    InsufficientPool,

    #[error("you have judged everything available")]
    Exhausted,

    #[error("too many requests: limit is {times} per {} seconds", window.as_secs())]
    RateLimited { times: u64, window: Duration },

    #[error("conflicting concurrent update, try again")]
    TransientConflict,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The HTTP status an API layer should answer with for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::InsufficientPool | Self::Exhausted => 404,
            Self::InvalidArgument(_) => 400,
            Self::RateLimited { .. } => 429,
            Self::TransientConflict => 500,
            Self::StorageUnavailable(_) => 503,
        }
    }

    /// Whether the operation may succeed if it is simply run again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConflict)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row".into()),
            sqlx::Error::Database(db) if is_busy(db.code().as_deref()) => Self::TransientConflict,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::InvalidArgument(db.message().into())
            }
            _ => Self::StorageUnavailable(err),
        }
    }
}

/// SQLite reports lock contention as `SQLITE_BUSY` (5) or `SQLITE_LOCKED` (6), possibly with an
/// extended code in the upper bits.
fn is_busy(code: Option<&str>) -> bool {
    code.and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}
