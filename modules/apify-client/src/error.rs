use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Run failed with status: {0}")]
    RunFailed(String),
}

impl ApifyError {
    /// Network hiccups and 429/5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ApifyError::Network(_) => true,
            ApifyError::Api { status, .. } => *status == 429 || *status >= 500,
            ApifyError::Parse(_) | ApifyError::RunFailed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApifyError::Parse(err.to_string());
        }
        ApifyError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        ApifyError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        let rate_limited = ApifyError::Api {
            status: 429,
            message: String::new(),
        };
        let unavailable = ApifyError::Api {
            status: 503,
            message: String::new(),
        };
        assert!(rate_limited.is_transient());
        assert!(unavailable.is_transient());
        assert!(ApifyError::Network("reset".into()).is_transient());
    }

    #[test]
    fn client_errors_and_failed_runs_are_not_transient() {
        let unauthorized = ApifyError::Api {
            status: 401,
            message: "bad token".into(),
        };
        assert!(!unauthorized.is_transient());
        assert!(!ApifyError::RunFailed("ABORTED".into()).is_transient());
    }
}
