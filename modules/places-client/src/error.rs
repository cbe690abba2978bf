use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlacesError>;

#[derive(Debug, Error)]
pub enum PlacesError {
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP-level failure from the provider.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider-level status in the response body, e.g. `OVER_QUERY_LIMIT`
    /// or `REQUEST_DENIED`.
    #[error("Provider status {status}: {message}")]
    Status { status: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl PlacesError {
    /// Transient errors are retried and counted by the circuit breaker;
    /// permanent ones (auth, quota exhausted, malformed request) fail fast.
    pub fn is_transient(&self) -> bool {
        match self {
            PlacesError::Network(_) => true,
            PlacesError::Api { status, .. } => *status == 429 || *status >= 500,
            PlacesError::Status { status, .. } => {
                matches!(status.as_str(), "OVER_QUERY_LIMIT" | "UNKNOWN_ERROR")
            }
            PlacesError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for PlacesError {
    fn from(err: reqwest::Error) -> Self {
        PlacesError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(PlacesError::Network("timed out".into()).is_transient());
        assert!(PlacesError::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!PlacesError::Api {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(PlacesError::Status {
            status: "OVER_QUERY_LIMIT".into(),
            message: String::new()
        }
        .is_transient());
        assert!(!PlacesError::Status {
            status: "REQUEST_DENIED".into(),
            message: String::new()
        }
        .is_transient());
    }
}
