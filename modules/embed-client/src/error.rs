use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbedError>;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// The provider returned a vector whose length disagrees with the
    /// configured dimension. Always permanent: the model or the deployment
    /// is misconfigured.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        match self {
            EmbedError::Network(_) => true,
            EmbedError::Api { status, .. } => *status == 429 || *status >= 500,
            EmbedError::Parse(_) | EmbedError::Dimension { .. } => false,
        }
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        EmbedError::Network(err.to_string())
    }
}
