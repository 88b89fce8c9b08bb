use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Errors raised while loading the source file. All of them are fatal.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("CSV file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors returned by a remote table backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network or TLS failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote refused the request (constraint violation, policy, 5xx, ...).
    #[error("remote rejected request (status {status}, code {}): {message}", .code.as_deref().unwrap_or("-"))]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Failure from the direct Postgres connection.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The response body did not have the expected shape.
    #[error("could not decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid remote configuration: {0}")]
    InvalidConfig(String),
}

impl RemoteError {
    /// Machine-readable code reported by the remote, if any
    pub fn code(&self) -> Option<String> {
        match self {
            RemoteError::Rejected { code, .. } => code.clone(),
            RemoteError::Database(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display_includes_code() {
        let err = RemoteError::Rejected {
            status: 409,
            code: Some("23505".to_string()),
            message: "duplicate key value".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("409"));
        assert!(text.contains("23505"));
        assert!(text.contains("duplicate key value"));
        assert_eq!(err.code().as_deref(), Some("23505"));
    }

    #[test]
    fn test_rejected_display_without_code() {
        let err = RemoteError::Rejected {
            status: 503,
            code: None,
            message: "unavailable".to_string(),
        };
        assert!(err.to_string().contains("code -"));
        assert_eq!(err.code(), None);
    }
}
