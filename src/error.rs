//! Error types for pkgvault

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Error types that can occur anywhere in the vault
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Value not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Origin fetch error: {0}")]
    OriginFetchError(String),

    #[error("Origin server returned 4xx error: {status} - {message}")]
    OriginClientError { status: u16, message: String },

    #[error("Origin server returned 5xx error: {status} - {message}")]
    OriginServerError { status: u16, message: String },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => VaultError::NotFound(err.to_string()),
            _ => VaultError::IoError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VaultError::Timeout(err.to_string())
        } else {
            VaultError::OriginFetchError(err.to_string())
        }
    }
}

impl From<serde_yaml::Error> for VaultError {
    fn from(err: serde_yaml::Error) -> Self {
        VaultError::ConfigError(err.to_string())
    }
}

impl VaultError {
    /// Absence of a key or artifact.
    ///
    /// Absence is routine control flow (group fallback, 404 rendering),
    /// so callers check it instead of matching the variant by hand.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::NotFound(_))
    }

    /// Whether the error was produced while talking to a remote origin
    pub fn is_origin_failure(&self) -> bool {
        matches!(
            self,
            VaultError::OriginFetchError(_)
                | VaultError::OriginClientError { .. }
                | VaultError::OriginServerError { .. }
        )
    }

    /// Convert error to HTTP status code
    ///
    /// Maps internal errors to appropriate HTTP status codes:
    /// - Absent values: 404 Not Found
    /// - Origin failures: 502 Bad Gateway
    /// - Timeouts: 504 Gateway Timeout
    /// - Everything else: 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            VaultError::NotFound(_) => 404,
            VaultError::Unauthorized(_) => 401,
            VaultError::InvalidKey(_) => 400,

            VaultError::OriginFetchError(_) => 502,
            VaultError::OriginClientError { .. } => 502,
            VaultError::OriginServerError { .. } => 502,
            VaultError::HttpError(_) => 502,
            VaultError::Timeout(_) => 504,

            VaultError::ConfigError(_) => 500,
            VaultError::IoError(_) => 500,
            VaultError::InternalError(_) => 500,
        }
    }

    /// Create a NotFound error for a missing key
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        VaultError::NotFound(what.to_string())
    }

    /// Create an OriginClientError from a status code and message
    pub fn origin_client_error(status: u16, message: impl Into<String>) -> Self {
        VaultError::OriginClientError {
            status,
            message: message.into(),
        }
    }

    /// Create an OriginServerError from a status code and message
    pub fn origin_server_error(status: u16, message: impl Into<String>) -> Self {
        VaultError::OriginServerError {
            status,
            message: message.into(),
        }
    }

    /// Create an error from an origin HTTP status code
    ///
    /// 404 and 410 mean the origin does not have the artifact, which is
    /// absence rather than failure. Other codes are categorized as 4xx or 5xx.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 | 410 => VaultError::NotFound(message),
            400..=499 => VaultError::origin_client_error(status, message),
            500..=599 => VaultError::origin_server_error(status, message),
            _ => VaultError::OriginFetchError(format!("HTTP {}: {}", status, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status_classifies() {
        assert!(VaultError::from_http_status(404, "gone").is_not_found());
        assert!(VaultError::from_http_status(410, "gone").is_not_found());
        assert_eq!(
            VaultError::from_http_status(403, "nope"),
            VaultError::origin_client_error(403, "nope")
        );
        assert_eq!(
            VaultError::from_http_status(503, "busy"),
            VaultError::origin_server_error(503, "busy")
        );
        assert!(VaultError::from_http_status(302, "moved").is_origin_failure());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(VaultError::not_found("a/b").to_http_status(), 404);
        assert_eq!(VaultError::origin_server_error(500, "x").to_http_status(), 502);
        assert_eq!(VaultError::OriginFetchError("refused".into()).to_http_status(), 502);
        assert_eq!(VaultError::Timeout("slow".into()).to_http_status(), 504);
        assert_eq!(VaultError::ConfigError("bad".into()).to_http_status(), 500);
        assert_eq!(VaultError::IoError("disk".into()).to_http_status(), 500);
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: VaultError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(err.is_not_found());
        let err: VaultError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, VaultError::IoError(_)));
    }
}
