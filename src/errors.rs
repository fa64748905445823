//! Error types for the session pool

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("failed to create session: {0}")]
    CreateSession(String),

    #[error("pool is exhausted - increase either max_pool_size or borrow_timeout")]
    Exhausted,

    #[error("pool was already destroyed - you can no longer use it")]
    Destroyed,

    #[error("session pool error: {0}")]
    Internal(String),
}

pub type PoolResult<T> = Result<T, PoolError>;
