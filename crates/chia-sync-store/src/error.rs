use thiserror::Error;

/// An error that can occur while interacting with the wallet database.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error occurred while interacting with the SQLite database.
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// An error occurred while running migrations.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A record could not be encoded or decoded canonically.
    #[error("streamable error: {0}")]
    Streamable(#[from] chia_traits::Error),

    /// A persisted row contained a value that could not be parsed.
    #[error("invalid {0} in stored row")]
    InvalidRow(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;
