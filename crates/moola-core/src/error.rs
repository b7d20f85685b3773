use crate::types::{MemberId, Team};
use thiserror::Error;

/// Moola core errors.
#[derive(Debug, Error)]
pub enum MoolaError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Member is already linked to {masked_address}")]
    AlreadyLinked { masked_address: String },

    #[error("Member '{0}' has not linked an address yet")]
    NotLinked(MemberId),

    #[error("Sender '{0}' not found")]
    SenderNotFound(MemberId),

    #[error("Receiver '{0}' not found")]
    ReceiverNotFound(MemberId),

    #[error("Target '{0}' not found")]
    TargetNotFound(MemberId),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("Link token is unknown, already consumed, or issued to another member")]
    TokenUnavailable,

    #[error("Member has already joined the {0} team")]
    AlreadyOnTeam(Team),

    #[error("Member '{0}' is not permitted to perform this action")]
    Forbidden(MemberId),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Role directory error: {0}")]
    RoleDirectory(String),

    #[error("External call timed out: {0}")]
    Timeout(String),

    #[error("Balance of '{0}' kept changing; gave up after repeated conflicts")]
    Contention(MemberId),
}

/// Coarse error classes callers map to their own surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientBalance,
    Conflict,
    Forbidden,
    Configuration,
    ExternalDependency,
}

impl MoolaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotLinked(_)
            | Self::SenderNotFound(_)
            | Self::ReceiverNotFound(_)
            | Self::TargetNotFound(_)
            | Self::TokenUnavailable => ErrorKind::NotFound,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::AlreadyLinked { .. } | Self::AlreadyOnTeam(_) | Self::Contention(_) => {
                ErrorKind::Conflict
            }
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Storage(_) | Self::RoleDirectory(_) | Self::Timeout(_) => {
                ErrorKind::ExternalDependency
            }
        }
    }

    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }

    /// True when the failure came from a collaborator rather than the request itself.
    pub fn is_external(&self) -> bool {
        self.kind() == ErrorKind::ExternalDependency
    }
}
