//! Translation between the local error taxonomy and wire conditions.
//!
//! | BrokerError            | condition                 |
//! |------------------------|---------------------------|
//! | Unauthorized           | forbidden                 |
//! | Unauthenticated        | not-authorized            |
//! | InvalidParameter       | bad-request               |
//! | InstanceNotFound       | item-not-found            |
//! | UnacceptableOperation  | not-acceptable            |
//! | UnavailableProvider    | remote-server-not-found   |
//! | Configuration          | conflict                  |
//! | InternalServer         | internal-server-error     |
//! | NotImplemented         | feature-not-implemented   |
//! | Communication          | communication-error       |
//!
//! Anything that is not a `BrokerError` is sent as `communication-error`
//! and logged at error level.

use frb_schemas::BrokerError;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCondition {
    Forbidden,
    NotAuthorized,
    BadRequest,
    ItemNotFound,
    NotAcceptable,
    RemoteServerNotFound,
    Conflict,
    InternalServerError,
    FeatureNotImplemented,
    CommunicationError,
}

impl ErrorCondition {
    pub const ALL: [ErrorCondition; 10] = [
        ErrorCondition::Forbidden,
        ErrorCondition::NotAuthorized,
        ErrorCondition::BadRequest,
        ErrorCondition::ItemNotFound,
        ErrorCondition::NotAcceptable,
        ErrorCondition::RemoteServerNotFound,
        ErrorCondition::Conflict,
        ErrorCondition::InternalServerError,
        ErrorCondition::FeatureNotImplemented,
        ErrorCondition::CommunicationError,
    ];

    /// Message used when the peer sent a condition without text.
    fn default_message(&self) -> &'static str {
        match self {
            ErrorCondition::Forbidden => "operation not authorized for this user",
            ErrorCondition::NotAuthorized => "user not authenticated",
            ErrorCondition::BadRequest => "invalid parameter",
            ErrorCondition::ItemNotFound => "instance not found",
            ErrorCondition::NotAcceptable => "operation not acceptable",
            ErrorCondition::RemoteServerNotFound => "unable to retrieve response from providing member",
            ErrorCondition::Conflict => "configuration error at providing member",
            ErrorCondition::InternalServerError => "unexpected error at providing member",
            ErrorCondition::FeatureNotImplemented => "operation not implemented by providing member",
            ErrorCondition::CommunicationError => "communication error",
        }
    }
}

pub fn condition_for(err: &BrokerError) -> ErrorCondition {
    match err {
        BrokerError::Unauthorized(_) => ErrorCondition::Forbidden,
        BrokerError::Unauthenticated(_) => ErrorCondition::NotAuthorized,
        BrokerError::InvalidParameter(_) => ErrorCondition::BadRequest,
        BrokerError::InstanceNotFound(_) => ErrorCondition::ItemNotFound,
        BrokerError::UnacceptableOperation(_) => ErrorCondition::NotAcceptable,
        BrokerError::UnavailableProvider(_) => ErrorCondition::RemoteServerNotFound,
        BrokerError::Configuration(_) => ErrorCondition::Conflict,
        BrokerError::InternalServer(_) => ErrorCondition::InternalServerError,
        BrokerError::NotImplemented(_) => ErrorCondition::FeatureNotImplemented,
        BrokerError::Communication(_) => ErrorCondition::CommunicationError,
    }
}

/// Inverse of [`condition_for`].
pub fn error_for(condition: ErrorCondition, message: Option<String>) -> BrokerError {
    let m = message.unwrap_or_else(|| condition.default_message().to_string());
    match condition {
        ErrorCondition::Forbidden => BrokerError::Unauthorized(m),
        ErrorCondition::NotAuthorized => BrokerError::Unauthenticated(m),
        ErrorCondition::BadRequest => BrokerError::InvalidParameter(m),
        ErrorCondition::ItemNotFound => BrokerError::InstanceNotFound(m),
        ErrorCondition::NotAcceptable => BrokerError::UnacceptableOperation(m),
        ErrorCondition::RemoteServerNotFound => BrokerError::UnavailableProvider(m),
        ErrorCondition::Conflict => BrokerError::Configuration(m),
        ErrorCondition::InternalServerError => BrokerError::InternalServer(m),
        ErrorCondition::FeatureNotImplemented => BrokerError::NotImplemented(m),
        ErrorCondition::CommunicationError => BrokerError::Communication(m),
    }
}

/// Classify an arbitrary handler failure for the wire.
pub fn classify(err: &anyhow::Error) -> (ErrorCondition, String) {
    match err.downcast_ref::<BrokerError>() {
        Some(be) => (condition_for(be), be.message().to_string()),
        None => {
            error!(error = %format!("{err:#}"), "unexpected error serving remote request");
            (ErrorCondition::CommunicationError, err.to_string())
        }
    }
}
