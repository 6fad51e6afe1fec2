use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found")]
    NotFound,

    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
