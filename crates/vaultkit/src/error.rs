//! Error types for Vault operations.
//!
//! Errors are categorized so callers can tell transient connectivity
//! problems apart from missing objects and rejected credentials.

use std::fmt;

/// Result type alias for Vault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of Vault errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (transient, retryable).
    Network,
    /// Policy, mount or path does not exist.
    NotFound,
    /// Token missing, expired or lacking permissions.
    Auth,
    /// Response could not be parsed.
    Format,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::NotFound => "Vault object not found",
            Self::Auth => "Vault rejected the token",
            Self::Format => "Invalid Vault response",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check that Vault is reachable and unsealed, then try again",
            Self::NotFound => "Verify the mount path or policy name",
            Self::Auth => "Check VAULT_TOKEN and the policies attached to it",
            Self::Format => "Check that the address points to a Vault server",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while talking to Vault.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// Object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request was rejected (401/403).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid response from Vault.
    #[error("invalid Vault response: {0}")]
    InvalidResponse(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Http { .. } => ErrorCategory::Network,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::PermissionDenied(_) => ErrorCategory::Auth,
            Self::InvalidResponse(_) => ErrorCategory::Format,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether Vault reported the object as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(404) => Self::NotFound("HTTP 404".to_string()),
            ureq::Error::StatusCode(code @ (401 | 403)) => {
                Self::PermissionDenied(format!("HTTP {code}"))
            }
            ureq::Error::StatusCode(code) => Self::Http {
                message: format!("HTTP {code}"),
                status: Some(code),
            },
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
