use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeadlessError>;

#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for HeadlessError {
    fn from(err: reqwest::Error) -> Self {
        HeadlessError::Network(err.to_string())
    }
}
