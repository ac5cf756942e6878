//! The closed error taxonomy shared by every layer of the broker.
//!
//! Each kind maps to exactly one federation wire condition (see
//! `frb-federation::errors`). `Communication` is the generic bucket for
//! failures that do not fit any application kind.

use serde::{Deserialize, Serialize};

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("instance not found: {0}")]
    InstanceNotFound(String),
    #[error("unacceptable operation: {0}")]
    UnacceptableOperation(String),
    #[error("unavailable provider: {0}")]
    UnavailableProvider(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal server error: {0}")]
    InternalServer(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("communication error: {0}")]
    Communication(String),
}

/// Discriminant of [`BrokerError`] without the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Unauthenticated,
    InvalidParameter,
    InstanceNotFound,
    UnacceptableOperation,
    UnavailableProvider,
    Configuration,
    InternalServer,
    NotImplemented,
    Communication,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Unauthorized,
        ErrorKind::Unauthenticated,
        ErrorKind::InvalidParameter,
        ErrorKind::InstanceNotFound,
        ErrorKind::UnacceptableOperation,
        ErrorKind::UnavailableProvider,
        ErrorKind::Configuration,
        ErrorKind::InternalServer,
        ErrorKind::NotImplemented,
        ErrorKind::Communication,
    ];
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Unauthorized(_) => ErrorKind::Unauthorized,
            BrokerError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            BrokerError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            BrokerError::InstanceNotFound(_) => ErrorKind::InstanceNotFound,
            BrokerError::UnacceptableOperation(_) => ErrorKind::UnacceptableOperation,
            BrokerError::UnavailableProvider(_) => ErrorKind::UnavailableProvider,
            BrokerError::Configuration(_) => ErrorKind::Configuration,
            BrokerError::InternalServer(_) => ErrorKind::InternalServer,
            BrokerError::NotImplemented(_) => ErrorKind::NotImplemented,
            BrokerError::Communication(_) => ErrorKind::Communication,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BrokerError::Unauthorized(m)
            | BrokerError::Unauthenticated(m)
            | BrokerError::InvalidParameter(m)
            | BrokerError::InstanceNotFound(m)
            | BrokerError::UnacceptableOperation(m)
            | BrokerError::UnavailableProvider(m)
            | BrokerError::Configuration(m)
            | BrokerError::InternalServer(m)
            | BrokerError::NotImplemented(m)
            | BrokerError::Communication(m) => m,
        }
    }

    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let m = message.into();
        match kind {
            ErrorKind::Unauthorized => BrokerError::Unauthorized(m),
            ErrorKind::Unauthenticated => BrokerError::Unauthenticated(m),
            ErrorKind::InvalidParameter => BrokerError::InvalidParameter(m),
            ErrorKind::InstanceNotFound => BrokerError::InstanceNotFound(m),
            ErrorKind::UnacceptableOperation => BrokerError::UnacceptableOperation(m),
            ErrorKind::UnavailableProvider => BrokerError::UnavailableProvider(m),
            ErrorKind::Configuration => BrokerError::Configuration(m),
            ErrorKind::InternalServer => BrokerError::InternalServer(m),
            ErrorKind::NotImplemented => BrokerError::NotImplemented(m),
            ErrorKind::Communication => BrokerError::Communication(m),
        }
    }

    /// Transient failures leave an order where it is so the next worker
    /// pass retries it. Everything else is a rejection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::UnavailableProvider(_) | BrokerError::Communication(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_kind_inverts_kind() {
        for k in ErrorKind::ALL {
            let e = BrokerError::from_kind(k, "x");
            assert_eq!(e.kind(), k);
            assert_eq!(e.message(), "x");
        }
    }

    #[test]
    fn only_provider_and_communication_failures_are_transient() {
        let transient: Vec<ErrorKind> = ErrorKind::ALL
            .into_iter()
            .filter(|k| BrokerError::from_kind(*k, "").is_transient())
            .collect();
        assert_eq!(
            transient,
            vec![ErrorKind::UnavailableProvider, ErrorKind::Communication]
        );
    }

    #[test]
    fn display_carries_message() {
        let e = BrokerError::InstanceNotFound("vm-7".into());
        assert_eq!(e.to_string(), "instance not found: vm-7");
    }
}
