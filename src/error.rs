use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Haze gateway
#[derive(Error, Debug)]
pub enum HazeError {
    // Store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Selection errors
    #[error("No healthy proxies available")]
    NoHealthyProxies,

    #[error("Unknown rotation strategy: {0}")]
    UnknownStrategy(String),

    // Upstream errors
    #[error("Upstream connection failed: {0}")]
    UpstreamConnect(String),

    #[error("Upstream proxy blocked the request: {0}")]
    Blocked(String),

    #[error("All upstream attempts failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Operation timed out")]
    Timeout,

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Maintainer errors
    #[error("Source fetch failed: {0}")]
    SourceFetch(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Auth
    #[error("Invalid API secret")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Haze operations
pub type Result<T> = std::result::Result<T, HazeError>;

impl HazeError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            HazeError::InvalidRequest(_)
            | HazeError::UnknownStrategy(_)
            | HazeError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            HazeError::Unauthorized => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            HazeError::NotFound(_) => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            HazeError::UpstreamConnect(_)
            | HazeError::Blocked(_)
            | HazeError::Tunnel(_)
            | HazeError::SourceFetch(_)
            | HazeError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            HazeError::NoHealthyProxies | HazeError::DatabaseConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            HazeError::Timeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            HazeError::Database(_)
            | HazeError::Io(_)
            | HazeError::Http(_)
            | HazeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for HazeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from hyper errors
impl From<hyper::Error> for HazeError {
    fn from(err: hyper::Error) -> Self {
        HazeError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for HazeError {
    fn from(err: url::ParseError) -> Self {
        HazeError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            HazeError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HazeError::UnknownStrategy("fastest".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HazeError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            HazeError::NotFound("override".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HazeError::RetriesExhausted { attempts: 4 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            HazeError::NoHealthyProxies.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(HazeError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(HazeError::InvalidRequest("bad".to_string()).is_client_error());
        assert!(!HazeError::InvalidRequest("bad".to_string()).is_server_error());

        assert!(HazeError::NoHealthyProxies.is_server_error());
        assert!(!HazeError::NoHealthyProxies.is_client_error());
    }
}
