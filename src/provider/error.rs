//! Error types for provider calls.

use thiserror::Error;

/// HTTP statuses treated as transient (retried per policy).
pub const TRANSIENT_STATUSES: &[u16] = &[429, 500, 502, 503, 504, 529];

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error type (e.g. "overloaded_error").
    pub provider_code: Option<String>,
    /// Request ID from provider headers.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling a generation provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limited by the provider - transient.
    #[error("rate limited")]
    RateLimited { context: Option<ErrorContext> },

    /// Non-success API status. Transient only for the overload statuses.
    #[error("api error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Invalid request - terminal, never retried.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Authentication failure - terminal.
    #[error("authentication error: {message}")]
    Auth {
        message: String,
        context: Option<ErrorContext>,
    },

    /// HTTP/network error. Timeouts and connection failures are transient.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, bad base URL, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn rate_limited(context: ErrorContext) -> Self {
        Self::RateLimited {
            context: Some(context),
        }
    }

    pub fn api(status: u16, message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Api {
            status,
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn auth(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Auth {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => TRANSIENT_STATUSES.contains(status),
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest { .. } => false,
            Self::Auth { .. } => false,
            Self::Config(_) => false,
        }
    }

    /// Short error kind for the persisted record.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Api { .. } => "api_status_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Auth { .. } => "auth_error",
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "connection_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context } => context.as_ref(),
            Self::Api { context, .. } => context.as_ref(),
            Self::InvalidRequest { context, .. } => context.as_ref(),
            Self::Auth { context, .. } => context.as_ref(),
            Self::Http(_) => None,
            Self::Config(_) => None,
        }
    }
}
