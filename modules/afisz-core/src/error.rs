use thiserror::Error;

/// Central error type for the ingestion pipeline.
///
/// Client crates (places, embeddings, headless) carry their own typed errors;
/// this enum is what the domain layer and the binary surface to callers.
#[derive(Debug, Error)]
pub enum AfiszError {
    /// The database rejected or could not serve a statement. Callers may retry.
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("scraping error: {0}")]
    Scraping(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    /// The embedding provider circuit is open. The read API maps this to 503.
    #[error("embedding provider unavailable")]
    EmbeddingUnavailable,

    #[error("configuration error: {0}")]
    Config(String),

    /// A concurrent writer inserted the same naturally-keyed row first.
    /// Callers treat this as success and re-read.
    #[error("lost insert race: {0}")]
    Race(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AfiszError {
    fn from(err: sqlx::Error) -> Self {
        AfiszError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AfiszError>;

/// SQLSTATE for unique-constraint violations. A concurrent writer won the
/// insert race; the losing side re-reads instead of failing.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Whether a sqlx error is a unique-constraint race with a concurrent writer.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}
