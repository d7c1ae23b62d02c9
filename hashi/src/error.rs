//! Error types for hashi

use serde_json::Value;
use thiserror::Error;

use crate::config::protocol::{EventKind, Namespace};
use crate::package::PackageError;

#[derive(Error, Debug)]
pub enum HashiError {
    /// A shim was asked to handle an event it does not declare.
    #[error("{event:?} is not a valid event for the {namespace} shim")]
    UnknownEvent {
        namespace: Namespace,
        event: EventKind,
    },

    #[error("No reply to {namespace} request {message_id} within {timeout_ms}ms")]
    ReplyTimeout {
        namespace: Namespace,
        message_id: String,
        timeout_ms: u64,
    },

    /// The remote side answered with `status: failure`.
    #[error("Request rejected: {0}")]
    Rejected(Value),

    #[error("Request cancelled: mediator shut down")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid statement: {0}")]
    Validation(#[from] xapi::ValidationError),

    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A content provider could not answer a host RPC.
    #[error("Provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, HashiError>;
