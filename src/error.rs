//! Error taxonomy for the run runtime core.
//!
//! Kinds, not classes: every fallible core operation surfaces one of these
//! variants so the HTTP layer can map them to status codes and the event
//! paths can decide what is fatal to an emit versus local to a subscriber.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input: unknown enum, bad decimal, missing required field.
    #[error("validation: {0}")]
    Validation(String),

    /// Unknown run/order id.
    #[error("not found: {0}")]
    NotFound(String),

    /// State-machine violation (start a non-pending run, stop a terminal
    /// run, duplicate client_order_id).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Adapter operation before connect().
    #[error("adapter not connected")]
    NotConnected,

    /// Venue rejection, timeout, or rate limit.
    #[error("adapter failure [{code}]: {message}")]
    AdapterFailure { code: String, message: String },

    /// Re-registering a (type, version) with a differing schema.
    #[error("schema conflict for {event_type} v{version}")]
    SchemaConflict { event_type: String, version: u32 },

    /// Payload failed validation against the registered schema. Fatal to
    /// the emit, never silently dropped.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },

    /// A persisted `running` run was found at startup.
    #[error("recovery abort for run {0}")]
    RecoveryAbort(uuid::Uuid),

    /// Slow consumer; subscription stays registered, delivery was dropped.
    #[error("subscriber lag on subscription {0}")]
    SubscriberLag(u64),

    #[error("storage: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Validation(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
