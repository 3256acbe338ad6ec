use thiserror::Error;

use crate::ProviderCode;

/// Validation errors for configuration and boundary input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("provider code cannot be empty")]
    EmptyProviderCode,
    #[error("provider code length {len} exceeds max {max}")]
    ProviderCodeTooLong { len: usize, max: usize },
    #[error("provider code contains invalid character '{ch}' at index {index}")]
    ProviderCodeInvalidChar { ch: char, index: usize },

    #[error("base url for provider '{provider}' must start with http:// or https://: '{value}'")]
    InvalidBaseUrl { provider: String, value: String },
    #[error("provider '{provider}' is registered more than once")]
    DuplicateProvider { provider: String },
    #[error("provider '{provider}' must allow at least one poll attempt when auto-approve is on")]
    ZeroPollAttempts { provider: String },
    #[error("provider '{provider}' asks for {attempts} poll attempts, at most {max} are allowed")]
    TooManyPollAttempts {
        provider: String,
        attempts: u32,
        max: u32,
    },

    #[error("client id cannot be empty")]
    EmptyClientId,
    #[error("mapping entry '{value}' must look like <provider>=<client>")]
    InvalidMappingEntry { value: String },

    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnvValue { name: &'static str, value: String },

    #[error("timestamp is not RFC3339: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("failed to read provider registry '{path}': {message}")]
    RegistryFile { path: String, message: String },
}

/// Classification of orchestration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankErrorKind {
    Transport,
    Auth,
    ConsentOperation,
    Upstream,
    NotFound,
    Validation,
    Internal,
}

/// Error raised by token, consent, and data operations against a provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BankError {
    #[error("transport error talking to '{provider}': {message}")]
    Transport {
        provider: ProviderCode,
        message: String,
        retryable: bool,
    },

    #[error("token exchange with '{provider}' failed (status {status:?}): {body}")]
    Auth {
        provider: ProviderCode,
        status: Option<u16>,
        body: String,
    },

    #[error("consent operation with '{provider}' failed: {message}")]
    ConsentOperation {
        provider: ProviderCode,
        message: String,
    },

    #[error("'{provider}' returned status {status} for {operation}")]
    Upstream {
        provider: ProviderCode,
        operation: &'static str,
        status: u16,
    },

    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BankError {
    pub fn unknown_provider(code: impl Into<String>) -> Self {
        Self::NotFound {
            what: "provider",
            id: code.into(),
        }
    }

    pub fn unknown_consent(id: impl Into<String>) -> Self {
        Self::NotFound {
            what: "consent",
            id: id.into(),
        }
    }

    pub const fn kind(&self) -> BankErrorKind {
        match self {
            Self::Transport { .. } => BankErrorKind::Transport,
            Self::Auth { .. } => BankErrorKind::Auth,
            Self::ConsentOperation { .. } => BankErrorKind::ConsentOperation,
            Self::Upstream { .. } => BankErrorKind::Upstream,
            Self::NotFound { .. } => BankErrorKind::NotFound,
            Self::Validation(_) => BankErrorKind::Validation,
            Self::Internal(_) => BankErrorKind::Internal,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self.kind() {
            BankErrorKind::Transport => "bank.transport",
            BankErrorKind::Auth => "bank.auth",
            BankErrorKind::ConsentOperation => "bank.consent",
            BankErrorKind::Upstream => "bank.upstream",
            BankErrorKind::NotFound => "bank.not_found",
            BankErrorKind::Validation => "bank.validation",
            BankErrorKind::Internal => "bank.internal",
        }
    }

    /// Whether repeating the same call later could reasonably succeed.
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            Self::Auth { .. } | Self::ConsentOperation { .. } => true,
            Self::NotFound { .. } | Self::Validation(_) | Self::Internal(_) => false,
        }
    }
}
