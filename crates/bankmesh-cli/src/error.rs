use bankmesh_core::{BankError, BankErrorKind, ValidationError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{}: {}", .0.code(), .0)]
    Bank(#[from] BankError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Bank(error) => match error.kind() {
                BankErrorKind::Validation => 2,
                BankErrorKind::NotFound => 3,
                BankErrorKind::Auth
                | BankErrorKind::Transport
                | BankErrorKind::Upstream
                | BankErrorKind::ConsentOperation => 4,
                BankErrorKind::Internal => 1,
            },
            Self::Serialization(_) => 5,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let not_found = CliError::from(BankError::unknown_consent("c1"));
        let validation = CliError::from(ValidationError::EmptyClientId);
        let nested = CliError::from(BankError::from(ValidationError::EmptyProviderCode));

        assert_eq!(not_found.exit_code(), 3);
        assert_eq!(validation.exit_code(), 2);
        assert_eq!(nested.exit_code(), 2);
        assert!(not_found.to_string().starts_with("bank.not_found: consent"));
    }
}
