//! Authentication error taxonomy.
//!
//! The `Display` text of every variant is safe to return to callers. Detail
//! carried in variant fields is for logs only.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Wrong username or password.
    #[error("Authentication failed")]
    InvalidCredentials,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    MalformedToken,

    #[error("Invalid token")]
    InvalidSignature,

    /// The presented refresh token is not the one currently stored. This is
    /// either a stale token or a replay.
    #[error("Invalid refresh token")]
    RefreshTokenMismatch,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    InvalidParameters(String),

    #[error("Username must be at least 6 characters long")]
    InvalidUsername,

    #[error("Password must be at least 6 characters long")]
    InvalidPassword,

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Permission denied")]
    Forbidden,

    /// The identity provider rejected the token or could not be reached.
    #[error("Authentication failed")]
    ExchangeFailure { provider: String, reason: String },

    #[error("Service temporarily unavailable")]
    UpstreamUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AuthError {
    pub fn exchange(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExchangeFailure {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Short stable identifier, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::TokenExpired => "token_expired",
            Self::MalformedToken => "malformed_token",
            Self::InvalidSignature => "invalid_signature",
            Self::RefreshTokenMismatch => "refresh_token_mismatch",
            Self::AccountDisabled => "account_disabled",
            Self::UserNotFound => "user_not_found",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::InvalidUsername => "invalid_username",
            Self::InvalidPassword => "invalid_password",
            Self::UsernameTaken => "username_taken",
            Self::Forbidden => "forbidden",
            Self::ExchangeFailure { .. } => "exchange_failure",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(op) => Self::UpstreamUnavailable(format!("{op} timed out")),
            StoreError::Unavailable(msg) => Self::UpstreamUnavailable(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
