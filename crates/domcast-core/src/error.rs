//! Error types for Domcast

use thiserror::Error;

use crate::capture::HostError;

/// Error type for capture-side operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// A host binding call failed (cross-origin access, detached node, ...)
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Configuration could not be parsed or is inconsistent
    #[error("Config error: {0}")]
    Config(String),

    /// Error while serializing an outgoing payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session was reset while the operation was in flight
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// A capture task panicked and was abandoned
    #[error("Task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String },
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Error type for payload decoding
///
/// Every variant is fatal to the decode call: a payload is either decoded
/// completely or not at all.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid JSON or does not have the `{ e, a, p? }` shape
    #[error("Invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload version is outside the tolerated drift
    #[error("Invalid version. Actual: {actual} | Expected: {expected} (+/- 1 patch) | {excerpt}")]
    IncompatibleVersion {
        /// Version declared by the payload envelope
        actual: String,
        /// Version of the running decoder
        expected: String,
        /// First 250 characters of the raw payload
        excerpt: String,
    },

    /// A version string does not follow `MAJOR.MINOR.PATCH[-bBETA]`
    #[error("Unparsable version: {0}")]
    InvalidVersion(String),

    /// Envelope tokens are missing or have the wrong type at some position
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// An event array does not start with `[time, eventType]`
    #[error("Malformed event {event}: {reason}")]
    MalformedEvent {
        /// Index of the offending array, counting `a` then `p`
        event: usize,
        /// What was wrong with it
        reason: String,
    },
}

/// Result type alias using DecodeError
pub type DecodeResult<T> = Result<T, DecodeError>;
